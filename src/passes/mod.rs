//! Method transforms and the compilation pipeline.
//!
//! A [`MethodPass`] rewrites one [`MethodBody`] in place through a
//! [`MethodTransformContext`], which also hands out cached analyses. The pass reports
//! what it changed as [`MethodInvalidations`]; any change drops the cached analyses.
//!
//! # Key Components
//!
//! - [`SsaPromotion`] - rewrites promotable variables into SSA values and phis
//! - [`Pipeline`] - import, passes and verification for one or many methods

use std::sync::Arc;

use bitflags::bitflags;

use crate::{
    analysis::{AnalysisManager, MethodAnalysis},
    ir::MethodBody,
    Result,
};

mod pipeline;
mod ssa_promotion;

pub use pipeline::{Pipeline, PipelineConfig};
pub use ssa_promotion::{PromotionConfig, SsaPromotion};

bitflags! {
    /// Facts a pass may have broken.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct MethodInvalidations: u8 {
        /// Blocks or edges changed
        const CONTROL_FLOW = 0x01;
        /// Instructions or operands changed
        const DATA_FLOW = 0x02;
        /// Loop structure changed
        const LOOPS = 0x04;
    }
}

/// Mutable access to one method body plus its analysis cache.
#[derive(Debug)]
pub struct MethodTransformContext<'a> {
    /// The body being transformed
    pub body: &'a mut MethodBody,
    analyses: AnalysisManager,
}

impl<'a> MethodTransformContext<'a> {
    /// Wraps `body` with an empty analysis cache.
    pub fn new(body: &'a mut MethodBody) -> Self {
        Self {
            body,
            analyses: AnalysisManager::new(),
        }
    }

    /// Returns analysis `A`, computing it if needed; see [`AnalysisManager::get`].
    ///
    /// # Errors
    ///
    /// Propagates failures of the analysis.
    pub fn get_analysis<A: MethodAnalysis>(&mut self, preserve: bool) -> Result<Arc<A>> {
        self.analyses.get::<A>(&*self.body, preserve)
    }

    /// Drops cached analyses if `invalidations` is not empty.
    pub fn invalidate(&mut self, invalidations: MethodInvalidations) {
        if !invalidations.is_empty() {
            self.analyses.invalidate_all();
        }
    }

    /// The analysis cache.
    #[must_use]
    pub fn analyses(&self) -> &AnalysisManager {
        &self.analyses
    }
}

/// A transform over one method body.
///
/// Passes run on one method at a time and own no state shared between methods, so a
/// fresh instance can be created per method on any thread.
pub trait MethodPass: Send {
    /// Unique name for logging and debugging.
    fn name(&self) -> &'static str;

    /// Transforms `ctx.body` in place.
    ///
    /// Returns the facts the pass invalidated; empty if nothing changed.
    ///
    /// # Errors
    ///
    /// Returns an error if the body violates an invariant the pass relies on. The body
    /// must be discarded in that case.
    fn run(&mut self, ctx: &mut MethodTransformContext<'_>) -> Result<MethodInvalidations>;
}
