use thiserror::Error;

use crate::il::OpCode;

/// Builds an [`Error::InvalidProgram`] for the given bytecode offset.
macro_rules! invalid_program {
    // Single string version
    ($offset:expr, $msg:expr) => {
        crate::Error::InvalidProgram {
            message: $msg.to_string(),
            offset: $offset,
        }
    };

    // Format string with arguments version
    ($offset:expr, $fmt:expr, $($arg:tt)*) => {
        crate::Error::InvalidProgram {
            message: format!($fmt, $($arg)*),
            offset: $offset,
        }
    };
}

/// Builds an [`Error::Invariant`] tagged with the source location that detected it.
macro_rules! invariant_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Invariant {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Invariant {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// # Error Categories
///
/// ## Malformed Input
/// - [`Error::InvalidProgram`] - The bytecode or its exception-region table is inconsistent
/// - [`Error::NotSupported`] - The bytecode uses an opcode the importer does not translate
/// - [`Error::UndefinedLabel`] - An [`crate::il::IlBuilder`] label was referenced but never placed
///
/// ## Contract Violations
/// - [`Error::Invariant`] - A graph mutation would break an IR invariant
/// - [`Error::Verification`] - [`crate::ir::verify`] found an inconsistent graph
///
/// None of these are recovered internally. A failing method is abandoned as a whole and the
/// caller decides whether to skip it or abort the batch.
///
/// # Examples
///
/// ```rust
/// use dotssa::{Error, il::{IlBuilder, OpCode}, entities::{IrType, MethodSig}};
///
/// let mut builder = IlBuilder::new(MethodSig::new_static(vec![], IrType::Void));
/// builder.branch(OpCode::Br, "nowhere");
///
/// match builder.build() {
///     Err(Error::UndefinedLabel(label)) => assert_eq!(label, "nowhere"),
///     other => panic!("unexpected: {other:?}"),
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// The method body is not a valid program.
    ///
    /// Raised for branches into the middle of an instruction, lookups past the end of the
    /// instruction stream, evaluation stack underflow or height mismatches at block
    /// boundaries and exception regions whose boundaries do not fall on instructions.
    ///
    /// # Fields
    ///
    /// * `message` - Description of the inconsistency
    /// * `offset` - Bytecode offset at which it was detected
    #[error("Invalid program at IL_{offset:04x}: {message}")]
    InvalidProgram {
        /// Description of the inconsistency
        message: String,
        /// Bytecode offset at which it was detected
        offset: u32,
    },

    /// The importer has no translation for this opcode.
    #[error("Opcode '{0}' is not supported")]
    NotSupported(OpCode),

    /// An IR invariant would be violated by the requested operation.
    ///
    /// Examples are removing a block that still has predecessors, removing an instruction
    /// that still has users, or addressing an operand slot that does not exist.
    ///
    /// # Fields
    ///
    /// * `message` - The violated contract
    /// * `file` - Source file where the violation was detected
    /// * `line` - Source line where the violation was detected
    #[error("Invariant violation - {file}:{line}: {message}")]
    Invariant {
        /// The violated contract
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// A branch or region references a label that was never placed.
    #[error("Label '{0}' was referenced but never defined")]
    UndefinedLabel(String),

    /// The IR verifier rejected the method body.
    #[error("IR verification failed: {0}")]
    Verification(String),
}
