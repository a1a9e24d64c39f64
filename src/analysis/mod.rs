//! Analyses over method bodies.
//!
//! Analyses are read-only facts derived from a [`crate::ir::MethodBody`]. They are
//! computed lazily through an [`AnalysisManager`], which caches them per method until
//! the control-flow graph changes.
//!
//! - [`DominatorTree`] - immediate dominators, dominance queries and tree walks
//! - [`DominanceFrontier`] - per-block frontiers for phi placement
//!
//! # Usage
//!
//! ```rust
//! use dotssa::{
//!     analysis::{AnalysisManager, DominanceFrontier, DominatorTree},
//!     entities::IrType,
//!     ir::{InstKind, MethodBody},
//! };
//!
//! let mut body = MethodBody::new(vec![IrType::Bool], IrType::Void);
//! let entry = body.create_block(None);
//! let left = body.create_block(None);
//! let right = body.create_block(None);
//! let join = body.create_block(None);
//!
//! let branch = body.create_inst(
//!     InstKind::Branch { then_block: left, else_block: right },
//!     vec![body.arg(0)],
//!     IrType::Void,
//! )?;
//! body.insert_last(entry, branch)?;
//! body.set_branch(left, join)?;
//! body.set_branch(right, join)?;
//!
//! let mut analyses = AnalysisManager::new();
//! let doms = analyses.get::<DominatorTree>(&body, true)?;
//! assert_eq!(doms.idom(join), Some(entry));
//!
//! let frontiers = analyses.get::<DominanceFrontier>(&body, true)?;
//! assert_eq!(frontiers.of(left), &[join]);
//! # Ok::<(), dotssa::Error>(())
//! ```

mod dominators;
mod manager;

pub use dominators::{DominanceFrontier, DominatorTree};
pub use manager::{AnalysisManager, MethodAnalysis};
