//! Bytecode import.
//!
//! [`ILImporter`] turns a decoded [`crate::il::IlMethod`] into a [`crate::ir::MethodBody`]
//! whose arguments, locals and cross-block stack values are still variables. Exception
//! regions become guard instructions on the first block of each protected range.
//!
//! Import is all or nothing: malformed bytecode aborts the method with
//! [`crate::Error::InvalidProgram`] and no partial body is returned.

mod importer;
mod translate;

pub use importer::ILImporter;
