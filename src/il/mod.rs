//! Decoded bytecode consumed by the importer.
//!
//! # Key Components
//!
//! - [`OpCode`] - The ECMA-335 opcode table with sizes and flow behaviour
//! - [`IlInstruction`] / [`IlOperand`] - One decoded instruction at its byte offset
//! - [`ExceptionRegion`] - One exception-handling clause
//! - [`IlMethod`] - Signature, locals, instructions and clauses of one method
//! - [`IlBuilder`] - Label-based assembler producing [`IlMethod`] records

mod builder;
mod instruction;
mod opcodes;

pub use builder::IlBuilder;
pub use instruction::{ExceptionRegion, IlInstruction, IlMethod, IlOperand, LocalDecl, RegionKind};
pub use opcodes::{FlowType, OpCode, OperandKind};
