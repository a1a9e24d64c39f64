//! Opaque descriptors for types, methods and fields.
//!
//! The IR treats every descriptor as a comparable, hashable handle. The only operations it
//! relies on are equality, the declaring type of a member and [`GenericContext`]
//! substitution through `get_spec`. Resolving descriptors against metadata is left to the
//! loader that produced them.

mod members;
mod token;
mod types;

pub use members::{EntityDesc, FieldDesc, FieldHandle, MethodDesc, MethodHandle, MethodSig};
pub use token::Token;
pub use types::{GenericContext, IrType, StackType, TypeDefDesc};
