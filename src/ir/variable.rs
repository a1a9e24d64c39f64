use std::fmt;

use crate::entities::IrType;

/// Where a variable came from in the bytecode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VariableOrigin {
    /// Copy of method argument `n` (`this` is 0 for instance methods)
    Argument(u16),
    /// Local variable `n`
    Local(u16),
    /// Evaluation stack slot at depth `n`, live across a block boundary
    Stack(u32),
}

impl fmt::Display for VariableOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VariableOrigin::Argument(n) => write!(f, "arg{n}"),
            VariableOrigin::Local(n) => write!(f, "loc{n}"),
            VariableOrigin::Stack(n) => write!(f, "stk{n}"),
        }
    }
}

/// A named storage slot used before SSA promotion.
///
/// Variables are read and written with `LoadVar`/`StoreVar` instructions. Promotion
/// rewrites those into direct value references unless the variable is pinned or its
/// address is exposed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variable {
    /// Declared type
    pub ty: IrType,
    /// Bytecode origin
    pub origin: VariableOrigin,
    /// Pinned by the GC (`pinned` locals)
    pub is_pinned: bool,
    /// May be accessed through memory: its address was taken, or it is written inside an
    /// exception region and read elsewhere
    pub is_exposed: bool,
}

impl Variable {
    /// Creates an unpinned, unexposed variable.
    #[must_use]
    pub fn new(ty: IrType, origin: VariableOrigin) -> Self {
        Variable {
            ty,
            origin,
            is_pinned: false,
            is_exposed: false,
        }
    }

    /// Returns `true` if loads and stores of the variable may be rewritten into SSA values.
    #[must_use]
    pub fn can_promote(&self) -> bool {
        !self.is_pinned && !self.is_exposed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_can_promote() {
        let mut var = Variable::new(IrType::I32, VariableOrigin::Local(0));
        assert!(var.can_promote());
        var.is_exposed = true;
        assert!(!var.can_promote());
        var.is_exposed = false;
        var.is_pinned = true;
        assert!(!var.can_promote());
    }

    #[test]
    fn test_origin_display() {
        assert_eq!(VariableOrigin::Argument(1).to_string(), "arg1");
        assert_eq!(VariableOrigin::Stack(0).to_string(), "stk0");
    }
}
