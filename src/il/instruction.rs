use crate::{
    entities::{FieldHandle, IrType, MethodHandle, MethodSig},
    il::{OpCode, OperandKind},
};

/// Decoded inline operand of an instruction.
///
/// Branch targets are absolute byte offsets; the decoder has already added the relative
/// displacement to the end offset of the branch.
#[derive(Debug, Clone, PartialEq)]
pub enum IlOperand {
    /// No operand
    None,
    /// 8 or 32-bit integer
    I32(i32),
    /// 64-bit integer
    I64(i64),
    /// 32-bit float
    F32(f32),
    /// 64-bit float
    F64(f64),
    /// Absolute branch target offset
    Target(u32),
    /// Absolute switch target offsets
    Switch(Vec<u32>),
    /// String literal
    String(String),
    /// Argument or local index
    Var(u16),
    /// Type token
    Type(IrType),
    /// Method token
    Method(MethodHandle),
    /// Field token
    Field(FieldHandle),
}

/// A decoded instruction at a byte offset.
#[derive(Debug, Clone, PartialEq)]
pub struct IlInstruction {
    /// Operation
    pub opcode: OpCode,
    /// Byte offset from the start of the method body
    pub offset: u32,
    /// Decoded operand
    pub operand: IlOperand,
}

impl IlInstruction {
    /// Creates an instruction record.
    #[must_use]
    pub fn new(opcode: OpCode, offset: u32, operand: IlOperand) -> Self {
        IlInstruction {
            opcode,
            offset,
            operand,
        }
    }

    /// Encoded size of opcode and operand.
    #[must_use]
    pub fn size(&self) -> u32 {
        let operand = match (self.opcode.operand_kind(), &self.operand) {
            (OperandKind::InlineSwitch, IlOperand::Switch(targets)) => 4 + 4 * targets.len() as u32,
            (OperandKind::InlineSwitch, _) => 4,
            (kind, _) => kind.size(),
        };
        self.opcode.size() + operand
    }

    /// Offset of the next instruction.
    #[must_use]
    pub fn end_offset(&self) -> u32 {
        self.offset + self.size()
    }

    /// Offsets this instruction may transfer control to, besides falling through.
    #[must_use]
    pub fn branch_targets(&self) -> Vec<u32> {
        match &self.operand {
            IlOperand::Target(target) => vec![*target],
            IlOperand::Switch(targets) => targets.clone(),
            _ => Vec::new(),
        }
    }
}

/// Kind of an exception-handling clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegionKind {
    /// Typed catch clause
    Catch,
    /// Filtered catch clause
    Filter,
    /// Finally clause
    Finally,
    /// Fault clause
    Fault,
}

/// An exception-handling clause.
///
/// Ranges are half-open byte offsets. Regions are ordered innermost-first.
#[derive(Debug, Clone, PartialEq)]
pub struct ExceptionRegion {
    /// Clause kind
    pub kind: RegionKind,
    /// First protected offset
    pub try_start: u32,
    /// End of the protected range
    pub try_end: u32,
    /// First handler offset
    pub handler_start: u32,
    /// End of the handler
    pub handler_end: u32,
    /// First filter offset, for [`RegionKind::Filter`]
    pub filter_start: Option<u32>,
    /// Caught type, for [`RegionKind::Catch`]
    pub catch_type: Option<IrType>,
}

impl ExceptionRegion {
    /// Returns `true` if `offset` lies in the protected range.
    #[must_use]
    pub fn try_contains(&self, offset: u32) -> bool {
        (self.try_start..self.try_end).contains(&offset)
    }

    /// Returns `true` if `offset` lies in the handler or filter.
    #[must_use]
    pub fn handler_contains(&self, offset: u32) -> bool {
        let in_filter = self
            .filter_start
            .is_some_and(|start| (start..self.handler_start).contains(&offset));
        in_filter || (self.handler_start..self.handler_end).contains(&offset)
    }

    /// Returns `true` if `offset` is covered by any part of the clause.
    #[must_use]
    pub fn contains(&self, offset: u32) -> bool {
        self.try_contains(offset) || self.handler_contains(offset)
    }
}

/// A local variable declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalDecl {
    /// Declared type
    pub ty: IrType,
    /// Whether the local is pinned
    pub pinned: bool,
}

/// The decoded body of one method, as handed to the importer.
#[derive(Debug, Clone, PartialEq)]
pub struct IlMethod {
    /// Method name, used in diagnostics
    pub name: String,
    /// Declaring type, the type of `this` for instance methods
    pub declaring_type: IrType,
    /// Signature
    pub sig: MethodSig,
    /// Local variable declarations
    pub locals: Vec<LocalDecl>,
    /// Instructions ordered by offset
    pub instructions: Vec<IlInstruction>,
    /// Exception-handling clauses, innermost first
    pub regions: Vec<ExceptionRegion>,
}

impl IlMethod {
    /// Total size of the code in bytes.
    #[must_use]
    pub fn code_size(&self) -> u32 {
        self.instructions.last().map_or(0, IlInstruction::end_offset)
    }

    /// Types of all arguments, `this` first for instance methods.
    #[must_use]
    pub fn arg_types(&self) -> Vec<IrType> {
        let mut types = Vec::with_capacity(self.sig.arg_count());
        if self.sig.has_this {
            if self.declaring_type.is_value_type() {
                types.push(IrType::by_ref(self.declaring_type.clone()));
            } else {
                types.push(self.declaring_type.clone());
            }
        }
        types.extend(self.sig.params.iter().cloned());
        types
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instruction_size() {
        let nop = IlInstruction::new(OpCode::Nop, 0, IlOperand::None);
        assert_eq!(nop.size(), 1);
        let br = IlInstruction::new(OpCode::BrS, 1, IlOperand::Target(10));
        assert_eq!(br.end_offset(), 3);
        let ceq = IlInstruction::new(OpCode::Ceq, 3, IlOperand::None);
        assert_eq!(ceq.size(), 2);
        let switch = IlInstruction::new(OpCode::Switch, 5, IlOperand::Switch(vec![20, 30, 40]));
        assert_eq!(switch.size(), 1 + 4 + 12);
        assert_eq!(switch.branch_targets(), vec![20, 30, 40]);
    }

    #[test]
    fn test_region_ranges() {
        let region = ExceptionRegion {
            kind: RegionKind::Filter,
            try_start: 0,
            try_end: 10,
            handler_start: 16,
            handler_end: 24,
            filter_start: Some(10),
            catch_type: None,
        };
        assert!(region.try_contains(9));
        assert!(!region.try_contains(10));
        assert!(region.handler_contains(10));
        assert!(region.handler_contains(23));
        assert!(!region.contains(24));
    }
}
