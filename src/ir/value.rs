//! Values, ids and use records.
//!
//! Everything that can appear as an operand is a [`Value`]. Constants and [`Value::Undef`]
//! compare by value and are never tracked. Arguments and instructions are *tracked*: they
//! are identified by their arena index and own a use list inside the
//! [`crate::ir::MethodBody`] that created them.

use std::{
    fmt,
    hash::{Hash, Hasher},
    sync::Arc,
};

use crate::entities::IrType;

macro_rules! arena_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(pub(crate) u32);

        impl $name {
            /// Creates an id from a raw arena index.
            #[must_use]
            pub const fn new(index: usize) -> Self {
                Self(index as u32)
            }

            /// Returns the arena index.
            #[must_use]
            pub const fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }
    };
}

arena_id!(
    /// Identifies an instruction in its method body.
    InstId,
    "r"
);
arena_id!(
    /// Identifies a basic block in its method body.
    BlockId,
    "BB_"
);
arena_id!(
    /// Identifies a method argument.
    ArgId,
    "#arg"
);
arena_id!(
    /// Identifies a pre-SSA variable.
    VarId,
    "$v"
);

/// A compile-time constant.
#[derive(Debug, Clone)]
pub enum Const {
    /// `int32`
    I32(i32),
    /// `int64`
    I64(i64),
    /// `float32`
    F32(f32),
    /// `float64`
    F64(f64),
    /// The null reference
    Null,
    /// A string literal
    String(Arc<str>),
}

impl Const {
    /// Type of the constant.
    #[must_use]
    pub fn ty(&self) -> IrType {
        match self {
            Const::I32(_) => IrType::I32,
            Const::I64(_) => IrType::I64,
            Const::F32(_) => IrType::F32,
            Const::F64(_) => IrType::F64,
            Const::Null => IrType::Object,
            Const::String(_) => IrType::String,
        }
    }
}

// Floats compare by bit pattern so that constants can key hash maps.
impl PartialEq for Const {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Const::I32(a), Const::I32(b)) => a == b,
            (Const::I64(a), Const::I64(b)) => a == b,
            (Const::F32(a), Const::F32(b)) => a.to_bits() == b.to_bits(),
            (Const::F64(a), Const::F64(b)) => a.to_bits() == b.to_bits(),
            (Const::Null, Const::Null) => true,
            (Const::String(a), Const::String(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Const {}

impl Hash for Const {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Const::I32(v) => v.hash(state),
            Const::I64(v) => v.hash(state),
            Const::F32(v) => v.to_bits().hash(state),
            Const::F64(v) => v.to_bits().hash(state),
            Const::Null => {}
            Const::String(s) => s.hash(state),
        }
    }
}

impl fmt::Display for Const {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Const::I32(v) => write!(f, "{v}"),
            Const::I64(v) => write!(f, "{v}L"),
            Const::F32(v) => write!(f, "{v}f"),
            Const::F64(v) => write!(f, "{v}"),
            Const::Null => write!(f, "null"),
            Const::String(s) => write!(f, "{s:?}"),
        }
    }
}

/// An operand.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Value {
    /// A constant
    Const(Const),
    /// The value read from a variable with no reaching definition
    Undef(IrType),
    /// A method argument
    Arg(ArgId),
    /// The result of an instruction
    Inst(InstId),
}

impl Value {
    /// Shorthand for an `int32` constant.
    #[must_use]
    pub const fn i32(value: i32) -> Self {
        Value::Const(Const::I32(value))
    }

    /// Shorthand for an `int64` constant.
    #[must_use]
    pub const fn i64(value: i64) -> Self {
        Value::Const(Const::I64(value))
    }

    /// Shorthand for the null constant.
    #[must_use]
    pub const fn null() -> Self {
        Value::Const(Const::Null)
    }

    /// Returns `true` for arguments and instructions.
    #[must_use]
    pub const fn is_tracked(&self) -> bool {
        matches!(self, Value::Arg(_) | Value::Inst(_))
    }

    /// Returns `true` for constants and undefined values.
    #[must_use]
    pub const fn is_const(&self) -> bool {
        matches!(self, Value::Const(_) | Value::Undef(_))
    }

    /// Returns the instruction id of instruction values.
    #[must_use]
    pub const fn as_inst(&self) -> Option<InstId> {
        match self {
            Value::Inst(id) => Some(*id),
            _ => None,
        }
    }

    /// Returns the argument id of argument values.
    #[must_use]
    pub const fn as_arg(&self) -> Option<ArgId> {
        match self {
            Value::Arg(id) => Some(*id),
            _ => None,
        }
    }

    /// Returns the `int32` payload of `int32` constants.
    #[must_use]
    pub const fn as_i32(&self) -> Option<i32> {
        match self {
            Value::Const(Const::I32(v)) => Some(*v),
            _ => None,
        }
    }
}

impl From<InstId> for Value {
    fn from(id: InstId) -> Self {
        Value::Inst(id)
    }
}

impl From<ArgId> for Value {
    fn from(id: ArgId) -> Self {
        Value::Arg(id)
    }
}

impl From<Const> for Value {
    fn from(c: Const) -> Self {
        Value::Const(c)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Const(c) => write!(f, "{c}"),
            Value::Undef(ty) => write!(f, "undef({ty})"),
            Value::Arg(id) => write!(f, "{id}"),
            Value::Inst(id) => write!(f, "{id}"),
        }
    }
}

/// One operand edge: slot `slot` of instruction `inst`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Use {
    /// The instruction owning the operand
    pub inst: InstId,
    /// Index of the operand slot
    pub slot: u32,
}

impl Use {
    /// Creates a use record.
    #[must_use]
    pub const fn new(inst: InstId, slot: u32) -> Self {
        Use { inst, slot }
    }
}
