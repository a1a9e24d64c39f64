//! Import, transform and verify methods.

use rayon::prelude::*;
use tracing::{debug, instrument, trace};

use crate::{
    frontend::ILImporter,
    il::IlMethod,
    ir::{verify, MethodBody},
    passes::{MethodPass, MethodTransformContext, PromotionConfig, SsaPromotion},
    Result,
};

/// Options for [`Pipeline`].
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Run [`SsaPromotion`] after import (default: true).
    pub promote_variables: bool,

    /// Run [`verify`] on every finished body (default: true in debug builds).
    pub verify: bool,

    /// Compile batches on the rayon thread pool (default: true).
    pub parallel: bool,

    /// Warn about reads of variables with no reaching definition (default: true).
    pub warn_on_undefined: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            promote_variables: true,
            verify: cfg!(debug_assertions),
            parallel: true,
            warn_on_undefined: true,
        }
    }
}

/// Compiles IL methods into method bodies.
///
/// Every method is compiled independently: its passes are created fresh and no state is
/// shared with other methods, so batches can be spread over threads.
///
/// # Examples
///
/// ```rust
/// use dotssa::{
///     entities::{IrType, MethodSig},
///     il::{IlBuilder, OpCode},
///     passes::Pipeline,
/// };
///
/// let mut builder = IlBuilder::new(MethodSig::new_static(vec![IrType::I32, IrType::I32], IrType::I32));
/// builder.emit(OpCode::Ldarg0).emit(OpCode::Ldarg1).emit(OpCode::Add).emit(OpCode::Ret);
///
/// let body = Pipeline::new().compile(&builder.build()?)?;
/// assert_eq!(body.num_blocks(), 1);
/// # Ok::<(), dotssa::Error>(())
/// ```
#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    /// Creates a pipeline with default options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a pipeline with the given options.
    #[must_use]
    pub fn with_config(config: PipelineConfig) -> Self {
        Self { config }
    }

    /// The options in use.
    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    fn passes(&self) -> Vec<Box<dyn MethodPass>> {
        let mut passes: Vec<Box<dyn MethodPass>> = Vec::new();
        if self.config.promote_variables {
            passes.push(Box::new(SsaPromotion::with_config(PromotionConfig {
                warn_on_undefined: self.config.warn_on_undefined,
                ..PromotionConfig::default()
            })));
        }
        passes
    }

    /// Compiles one method.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidProgram`] or [`crate::Error::NotSupported`] if the
    /// bytecode cannot be imported, and [`crate::Error::Verification`] if verification is
    /// enabled and the result is malformed.
    #[instrument(skip_all, fields(method = %method.name))]
    pub fn compile(&self, method: &IlMethod) -> Result<MethodBody> {
        let mut body = ILImporter::new(method).import()?;

        let mut ctx = MethodTransformContext::new(&mut body);
        for mut pass in self.passes() {
            let invalidations = pass.run(&mut ctx)?;
            trace!(pass = pass.name(), ?invalidations, "pass finished");
            ctx.invalidate(invalidations);
        }

        if self.config.verify {
            verify(&body)?;
        }
        debug!(blocks = body.num_blocks(), "compiled method");
        Ok(body)
    }

    /// Compiles a batch of methods, one result per method in input order.
    ///
    /// A failing method does not affect the others.
    pub fn compile_all(&self, methods: &[IlMethod]) -> Vec<Result<MethodBody>> {
        if self.config.parallel {
            methods.par_iter().map(|method| self.compile(method)).collect()
        } else {
            methods.iter().map(|method| self.compile(method)).collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        entities::{IrType, MethodSig},
        il::{IlBuilder, OpCode},
        ir::InstKind,
        Error,
    };

    fn local_roundtrip() -> IlMethod {
        let mut builder = IlBuilder::new(MethodSig::new_static(vec![], IrType::I32));
        let local = builder.local(IrType::I32);
        assert_eq!(local, 0);
        builder
            .ldc_i4(5)
            .emit(OpCode::Stloc0)
            .emit(OpCode::Ldloc0)
            .emit(OpCode::Ret);
        builder.build().unwrap()
    }

    fn var_accesses(body: &MethodBody) -> usize {
        body.blocks()
            .flat_map(|b| body.insts(b))
            .filter(|i| matches!(body.kind(*i), InstKind::LoadVar(_) | InstKind::StoreVar(_)))
            .count()
    }

    #[test]
    fn test_compile_promotes() {
        let body = Pipeline::new().compile(&local_roundtrip()).unwrap();
        assert_eq!(var_accesses(&body), 0);
    }

    #[test]
    fn test_compile_without_promotion() {
        let pipeline = Pipeline::with_config(PipelineConfig {
            promote_variables: false,
            verify: true,
            ..PipelineConfig::default()
        });
        let body = pipeline.compile(&local_roundtrip()).unwrap();
        assert_eq!(var_accesses(&body), 2);
    }

    #[test]
    fn test_compile_all_keeps_order() {
        let mut broken = IlBuilder::new(MethodSig::new_static(vec![], IrType::Void));
        broken.emit(OpCode::Arglist).emit(OpCode::Pop).emit(OpCode::Ret);
        let methods = vec![local_roundtrip(), broken.build().unwrap(), local_roundtrip()];

        for parallel in [true, false] {
            let pipeline = Pipeline::with_config(PipelineConfig {
                parallel,
                ..PipelineConfig::default()
            });
            let results = pipeline.compile_all(&methods);
            assert_eq!(results.len(), 3);
            assert!(results[0].is_ok());
            assert!(matches!(results[1], Err(Error::NotSupported(OpCode::Arglist))));
            assert!(results[2].is_ok());
        }
    }
}
