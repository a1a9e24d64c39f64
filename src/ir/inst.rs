//! Instruction kinds.
//!
//! [`InstKind`] is a closed enum: every pass dispatches over it with `match`, so adding a
//! kind forces every consumer to handle it. A kind holds the non-value attributes of an
//! instruction (opcode variants, referenced entities, target blocks); value operands live in
//! the operand slots managed by [`crate::ir::MethodBody`].
//!
//! # Operand layout
//!
//! | Kind | Operands |
//! |------|----------|
//! | `Binary`, `Compare` | `[left, right]` |
//! | `Unary`, `Convert` | `[value]` |
//! | `Load` | `[address]` |
//! | `Store` | `[address, value]` |
//! | `StoreVar` | `[value]` |
//! | `FieldAddr` | `[]` for static fields, `[object]` otherwise |
//! | `ExtractField` | `[object]` |
//! | `ArrayAddr` | `[array, index]` |
//! | `Call` | arguments, `this` first |
//! | `NewObj` | constructor arguments without `this` |
//! | `FuncAddr` | `[object]` if virtual, else `[]` |
//! | `Branch` / `Switch` | `[condition]` / `[selector]` |
//! | `Phi` | one value per entry in `blocks` |
//! | `Return` / `Throw` / `Resume` | `[]` or `[value]` |

use bitflags::bitflags;
use strum::IntoStaticStr;

use crate::{
    entities::{EntityDesc, FieldHandle, GenericContext, IrType, MethodHandle},
    ir::{BlockId, VarId},
};

/// Two-operand arithmetic and bitwise operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum BinaryOp {
    /// Addition
    Add,
    /// Subtraction
    Sub,
    /// Multiplication
    Mul,
    /// Signed division
    SDiv,
    /// Unsigned division
    UDiv,
    /// Signed remainder
    SRem,
    /// Unsigned remainder
    URem,
    /// Bitwise and
    And,
    /// Bitwise or
    Or,
    /// Bitwise exclusive or
    Xor,
    /// Shift left
    Shl,
    /// Arithmetic shift right
    Shra,
    /// Logical shift right
    Shrl,
    /// Signed addition, throwing on overflow
    AddOvf,
    /// Unsigned addition, throwing on overflow
    UAddOvf,
    /// Signed subtraction, throwing on overflow
    SubOvf,
    /// Unsigned subtraction, throwing on overflow
    USubOvf,
    /// Signed multiplication, throwing on overflow
    MulOvf,
    /// Unsigned multiplication, throwing on overflow
    UMulOvf,
}

impl BinaryOp {
    /// Returns `true` for shifts, whose result type is the type of the left operand.
    #[must_use]
    pub const fn is_shift(self) -> bool {
        matches!(self, BinaryOp::Shl | BinaryOp::Shra | BinaryOp::Shrl)
    }
}

/// One-operand operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum UnaryOp {
    /// Arithmetic negation
    Neg,
    /// Bitwise complement
    Not,
}

/// Comparisons producing a `bool`.
///
/// For floating point operands the unsigned forms are the unordered comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum CompareOp {
    /// Equal
    Eq,
    /// Not equal (unordered for floats)
    Ne,
    /// Signed less than
    Slt,
    /// Signed greater than
    Sgt,
    /// Signed less or equal
    Sle,
    /// Signed greater or equal
    Sge,
    /// Unsigned less than
    Ult,
    /// Unsigned greater than
    Ugt,
    /// Unsigned less or equal
    Ule,
    /// Unsigned greater or equal
    Uge,
}

impl CompareOp {
    /// Returns the comparison with swapped operands.
    #[must_use]
    pub const fn swap(self) -> CompareOp {
        match self {
            CompareOp::Eq => CompareOp::Eq,
            CompareOp::Ne => CompareOp::Ne,
            CompareOp::Slt => CompareOp::Sgt,
            CompareOp::Sgt => CompareOp::Slt,
            CompareOp::Sle => CompareOp::Sge,
            CompareOp::Sge => CompareOp::Sle,
            CompareOp::Ult => CompareOp::Ugt,
            CompareOp::Ugt => CompareOp::Ult,
            CompareOp::Ule => CompareOp::Uge,
            CompareOp::Uge => CompareOp::Ule,
        }
    }
}

/// Kind of protected region a guard describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum GuardKind {
    /// Typed catch
    Catch,
    /// Filtered catch
    Filter,
    /// Finally
    Finally,
    /// Fault
    Fault,
}

/// Operations on the object model that need no dedicated instruction kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum IntrinsicId {
    /// `castclass T`: `[object]`
    CastClass,
    /// `isinst T`: `[object]`
    IsInst,
    /// `box T`: `[value]`
    Box,
    /// `unbox T`: `[object]`, yields `T&`
    Unbox,
    /// `unbox.any T`: `[object]`
    UnboxAny,
    /// `newarr T`: `[length]`
    NewArray,
    /// `ldlen`: `[array]`
    ArrayLen,
    /// `ldtoken`: `[]`
    LoadToken,
    /// `localloc`: `[size]`
    StackAlloc,
    /// `initobj T`: `[address]`
    InitObj,
    /// `sizeof T`: `[]`
    SizeOf,
}

bitflags! {
    /// Modifiers of memory accesses, from the `volatile.` and `unaligned.` prefixes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct MemoryFlags: u8 {
        /// The access may not be reordered or elided
        const VOLATILE = 0x01;
        /// The address may not be naturally aligned
        const UNALIGNED = 0x02;
    }
}

/// The operation an instruction performs.
#[derive(Debug, Clone, PartialEq, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum InstKind {
    /// Arithmetic or bitwise operation
    Binary(BinaryOp),
    /// Negation or complement
    Unary(UnaryOp),
    /// Comparison
    Compare(CompareOp),
    /// Numeric conversion to the result type
    Convert {
        /// Throw if the value does not fit the target
        check_overflow: bool,
        /// Treat the source as unsigned
        src_unsigned: bool,
    },
    /// Read through an address; the result type is the loaded type
    Load {
        /// Access modifiers
        flags: MemoryFlags,
    },
    /// Write through an address
    Store {
        /// Type of the stored location
        elem_type: IrType,
        /// Access modifiers
        flags: MemoryFlags,
    },
    /// Read a pre-SSA variable
    LoadVar(VarId),
    /// Write a pre-SSA variable
    StoreVar(VarId),
    /// Take the address of a pre-SSA variable
    VarAddr(VarId),
    /// Address of a field
    FieldAddr {
        /// The field
        field: FieldHandle,
    },
    /// Field of a value type instance
    ExtractField {
        /// The field
        field: FieldHandle,
    },
    /// Address of an array element
    ArrayAddr {
        /// Element type
        elem_type: IrType,
        /// From a `readonly.` prefix
        readonly: bool,
    },
    /// Method call
    Call {
        /// Callee
        method: MethodHandle,
        /// Dispatch through the vtable
        is_virtual: bool,
        /// Type from a `constrained.` prefix
        constraint: Option<IrType>,
    },
    /// Object allocation and constructor call
    NewObj {
        /// Constructor
        ctor: MethodHandle,
    },
    /// Function pointer
    FuncAddr {
        /// Target method
        method: MethodHandle,
        /// Resolved through the object's vtable
        is_virtual: bool,
    },
    /// Object model operation
    Intrinsic {
        /// Which operation
        id: IntrinsicId,
        /// Entities the operation is parameterized by
        static_args: Vec<EntityDesc>,
    },
    /// Unconditional branch
    Jump {
        /// Target
        target: BlockId,
    },
    /// Two-way branch on a condition
    Branch {
        /// Target if the condition is non-zero
        then_block: BlockId,
        /// Target otherwise
        else_block: BlockId,
    },
    /// Jump table
    Switch {
        /// Target for each selector value
        targets: Vec<BlockId>,
        /// Target for out-of-range selectors
        default: BlockId,
    },
    /// SSA join; one incoming block per operand
    Phi {
        /// Predecessor each operand arrives from
        blocks: Vec<BlockId>,
    },
    /// Return from the method
    Return,
    /// Protected region starting at the hosting block
    Guard {
        /// Region kind
        kind: GuardKind,
        /// First handler block
        handler: BlockId,
        /// First filter block, for filter regions
        filter: Option<BlockId>,
        /// Caught type, for catch regions
        catch_type: Option<IrType>,
    },
    /// Raise an exception (`[exception]`) or re-raise the current one
    Throw {
        /// `rethrow` inside a catch handler
        rethrow: bool,
    },
    /// Exit a protected region
    Leave {
        /// Block to continue at after finally handlers ran
        target: BlockId,
    },
    /// End of a finally, fault (`[]`) or filter (`[result]`) block
    Resume,
}

impl InstKind {
    /// Short lowercase name of the kind, e.g. `store_var`.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.into()
    }

    /// Returns `true` if the instruction must be the last one of its block.
    #[must_use]
    pub const fn is_terminator(&self) -> bool {
        matches!(
            self,
            InstKind::Jump { .. }
                | InstKind::Branch { .. }
                | InstKind::Switch { .. }
                | InstKind::Return
                | InstKind::Throw { .. }
                | InstKind::Leave { .. }
                | InstKind::Resume
        )
    }

    /// Returns `true` for phis.
    #[must_use]
    pub const fn is_phi(&self) -> bool {
        matches!(self, InstKind::Phi { .. })
    }

    /// Returns `true` for guards.
    #[must_use]
    pub const fn is_guard(&self) -> bool {
        matches!(self, InstKind::Guard { .. })
    }

    /// Blocks the instruction transfers control to.
    ///
    /// For terminators these are the branch targets. Guards yield their handler and filter,
    /// the dummy edges keeping handlers reachable. Phi blocks are not control targets.
    #[must_use]
    pub fn successors(&self) -> Vec<BlockId> {
        match self {
            InstKind::Jump { target } | InstKind::Leave { target } => vec![*target],
            InstKind::Branch {
                then_block,
                else_block,
            } => vec![*then_block, *else_block],
            InstKind::Switch { targets, default } => {
                let mut succs = targets.clone();
                succs.push(*default);
                succs
            }
            InstKind::Guard {
                handler, filter, ..
            } => {
                let mut succs = vec![*handler];
                succs.extend(filter);
                succs
            }
            _ => Vec::new(),
        }
    }

    /// Rewrites every control target equal to `old` to `new`. Returns `true` if any changed.
    pub fn replace_successor(&mut self, old: BlockId, new: BlockId) -> bool {
        let mut changed = false;
        self.map_blocks(|b| {
            if b == old {
                changed = true;
                new
            } else {
                b
            }
        });
        changed
    }

    /// Applies `f` to every block reference, phi blocks included.
    pub fn map_blocks(&mut self, mut f: impl FnMut(BlockId) -> BlockId) {
        match self {
            InstKind::Jump { target } | InstKind::Leave { target } => *target = f(*target),
            InstKind::Branch {
                then_block,
                else_block,
            } => {
                *then_block = f(*then_block);
                *else_block = f(*else_block);
            }
            InstKind::Switch { targets, default } => {
                for t in targets.iter_mut() {
                    *t = f(*t);
                }
                *default = f(*default);
            }
            InstKind::Phi { blocks } => {
                for b in blocks.iter_mut() {
                    *b = f(*b);
                }
            }
            InstKind::Guard {
                handler, filter, ..
            } => {
                *handler = f(*handler);
                if let Some(filter) = filter {
                    *filter = f(*filter);
                }
            }
            _ => {}
        }
    }

    /// Number of operands the kind requires, `None` if it depends on the instance.
    #[must_use]
    pub fn fixed_arity(&self) -> Option<usize> {
        match self {
            InstKind::Binary(_) | InstKind::Compare(_) | InstKind::Store { .. } | InstKind::ArrayAddr { .. } => {
                Some(2)
            }
            InstKind::Unary(_)
            | InstKind::Convert { .. }
            | InstKind::Load { .. }
            | InstKind::StoreVar(_)
            | InstKind::ExtractField { .. }
            | InstKind::Branch { .. }
            | InstKind::Switch { .. } => Some(1),
            InstKind::LoadVar(_)
            | InstKind::VarAddr(_)
            | InstKind::Jump { .. }
            | InstKind::Guard { .. }
            | InstKind::Leave { .. } => Some(0),
            InstKind::FieldAddr { field } => Some(usize::from(!field.is_static)),
            InstKind::Call { method, .. } => Some(method.sig.arg_count()),
            InstKind::NewObj { ctor } => Some(ctor.sig.params.len()),
            InstKind::FuncAddr { is_virtual, .. } => Some(usize::from(*is_virtual)),
            InstKind::Throw { rethrow } => Some(usize::from(!*rethrow)),
            InstKind::Phi { blocks } => Some(blocks.len()),
            InstKind::Intrinsic { id, .. } => Some(match id {
                IntrinsicId::LoadToken | IntrinsicId::SizeOf => 0,
                _ => 1,
            }),
            InstKind::Return | InstKind::Resume => None,
        }
    }

    /// Specializes every referenced entity under `ctx`.
    #[must_use]
    pub fn get_spec(&self, ctx: &GenericContext) -> InstKind {
        match self {
            InstKind::Store { elem_type, flags } => InstKind::Store {
                elem_type: elem_type.get_spec(ctx),
                flags: *flags,
            },
            InstKind::FieldAddr { field } => InstKind::FieldAddr {
                field: field.get_spec(ctx),
            },
            InstKind::ExtractField { field } => InstKind::ExtractField {
                field: field.get_spec(ctx),
            },
            InstKind::ArrayAddr { elem_type, readonly } => InstKind::ArrayAddr {
                elem_type: elem_type.get_spec(ctx),
                readonly: *readonly,
            },
            InstKind::Call {
                method,
                is_virtual,
                constraint,
            } => InstKind::Call {
                method: method.get_spec(ctx),
                is_virtual: *is_virtual,
                constraint: constraint.as_ref().map(|c| c.get_spec(ctx)),
            },
            InstKind::NewObj { ctor } => InstKind::NewObj {
                ctor: ctor.get_spec(ctx),
            },
            InstKind::FuncAddr { method, is_virtual } => InstKind::FuncAddr {
                method: method.get_spec(ctx),
                is_virtual: *is_virtual,
            },
            InstKind::Intrinsic { id, static_args } => InstKind::Intrinsic {
                id: *id,
                static_args: static_args.iter().map(|a| a.get_spec(ctx)).collect(),
            },
            InstKind::Guard {
                kind,
                handler,
                filter,
                catch_type,
            } => InstKind::Guard {
                kind: *kind,
                handler: *handler,
                filter: *filter,
                catch_type: catch_type.as_ref().map(|c| c.get_spec(ctx)),
            },
            other => other.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{FieldDesc, MethodDesc, MethodSig, Token};

    #[test]
    fn test_names() {
        assert_eq!(InstKind::StoreVar(VarId::new(0)).name(), "store_var");
        assert_eq!(InstKind::Binary(BinaryOp::Add).name(), "binary");
        let op: &'static str = BinaryOp::Shrl.into();
        assert_eq!(op, "shrl");
    }

    #[test]
    fn test_successors() {
        let switch = InstKind::Switch {
            targets: vec![BlockId::new(1), BlockId::new(2)],
            default: BlockId::new(3),
        };
        assert!(switch.is_terminator());
        assert_eq!(switch.successors(), vec![BlockId::new(1), BlockId::new(2), BlockId::new(3)]);

        let guard = InstKind::Guard {
            kind: GuardKind::Filter,
            handler: BlockId::new(5),
            filter: Some(BlockId::new(4)),
            catch_type: None,
        };
        assert!(!guard.is_terminator());
        assert_eq!(guard.successors(), vec![BlockId::new(5), BlockId::new(4)]);
        assert!(InstKind::Return.successors().is_empty());
    }

    #[test]
    fn test_replace_successor() {
        let mut br = InstKind::Branch {
            then_block: BlockId::new(1),
            else_block: BlockId::new(1),
        };
        assert!(br.replace_successor(BlockId::new(1), BlockId::new(7)));
        assert_eq!(br.successors(), vec![BlockId::new(7), BlockId::new(7)]);
        assert!(!br.replace_successor(BlockId::new(1), BlockId::new(8)));
    }

    #[test]
    fn test_fixed_arity() {
        let sig = MethodSig::new_instance(vec![crate::entities::IrType::I32], crate::entities::IrType::Void);
        let method = MethodDesc::new(Token::default(), crate::entities::IrType::Object, "Set", sig);
        assert_eq!(
            InstKind::Call {
                method: method.clone(),
                is_virtual: false,
                constraint: None
            }
            .fixed_arity(),
            Some(2)
        );
        assert_eq!(InstKind::NewObj { ctor: method }.fixed_arity(), Some(1));

        let field = FieldDesc::new_static(Token::default(), crate::entities::IrType::Object, "F", crate::entities::IrType::I32);
        assert_eq!(InstKind::FieldAddr { field }.fixed_arity(), Some(0));
        assert_eq!(InstKind::Throw { rethrow: true }.fixed_arity(), Some(0));
        assert_eq!(InstKind::Return.fixed_arity(), None);
    }

    #[test]
    fn test_compare_swap() {
        assert_eq!(CompareOp::Slt.swap(), CompareOp::Sgt);
        assert_eq!(CompareOp::Uge.swap(), CompareOp::Ule);
        assert_eq!(CompareOp::Eq.swap(), CompareOp::Eq);
    }
}
