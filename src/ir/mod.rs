//! The register-based intermediate representation.
//!
//! A [`MethodBody`] owns every block, instruction, argument and variable of one method
//! in index-addressed arenas. Instructions reference their operands through [`Value`]s;
//! every operand slot holding an argument or instruction is threaded into the use list of
//! that value, so users can be enumerated and rewritten in O(1) per edge.
//!
//! Before SSA promotion, locals, arguments and cross-block stack slots are [`Variable`]s
//! accessed with `LoadVar`/`StoreVar`. After promotion, promotable variables are gone and
//! values flow directly, joined by phis.
//!
//! # Key Components
//!
//! - [`MethodBody`] - the arena and its mutation API
//! - [`InstKind`] - the closed set of operations
//! - [`Value`] / [`Const`] - operands
//! - [`verify`] - structural checker
//! - [`IrCloner`] - block copying with generic specialization

mod block;
mod body;
mod cloner;
mod inst;
mod uses;
mod value;
mod variable;
mod verify;

pub use body::{BlockIter, InstIter, MethodBody};
pub use cloner::IrCloner;
pub use inst::{BinaryOp, CompareOp, GuardKind, InstKind, IntrinsicId, MemoryFlags, UnaryOp};
pub use uses::UseIter;
pub use value::{ArgId, BlockId, Const, InstId, Use, Value, VarId};
pub use variable::{Variable, VariableOrigin};
pub use verify::verify;
