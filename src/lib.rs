// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![deny(unsafe_code)]

//! # dotssa
//!
//! The front half of a .NET method compiler: `dotssa` imports decoded CIL bytecode into a
//! register-based, graph-shaped intermediate representation and promotes its variables
//! into SSA form.
//!
//! ## Features
//!
//! - **Arena IR** - blocks, instructions, arguments and variables addressed by index, with
//!   intrusive use lists and symmetric control-flow edges
//! - **Bytecode import** - the evaluation stack is flattened into values, cross-block stack
//!   slots become variables and exception regions become guard instructions
//! - **SSA construction** - dominator tree, dominance frontiers and phi placement with
//!   renaming over the dominator tree
//! - **Batch compilation** - independent methods compiled in parallel with `rayon`
//!
//! ## Quick Start
//!
//! ```rust
//! use dotssa::prelude::*;
//!
//! // static int Max(int a, int b) => a > b ? a : b;
//! let mut il = IlBuilder::new(MethodSig::new_static(vec![IrType::I32, IrType::I32], IrType::I32));
//! il.emit(OpCode::Ldarg0)
//!     .emit(OpCode::Ldarg1)
//!     .branch(OpCode::BleS, "other")
//!     .emit(OpCode::Ldarg0)
//!     .emit(OpCode::Ret)
//!     .label("other")
//!     .emit(OpCode::Ldarg1)
//!     .emit(OpCode::Ret);
//!
//! let body = Pipeline::new().compile(&il.build()?)?;
//! verify(&body)?;
//! assert_eq!(body.num_blocks(), 3);
//! # Ok::<(), dotssa::Error>(())
//! ```
//!
//! ## Architecture
//!
//! - [`il`] - decoded bytecode records and a label-based builder
//! - [`entities`] - opaque type, method and field descriptors
//! - [`ir`] - the method body arena, instruction kinds and the verifier
//! - [`frontend`] - the bytecode importer
//! - [`analysis`] - dominators, dominance frontiers and the analysis cache
//! - [`passes`] - the pass interface, SSA promotion and the pipeline
//!
//! ## Logging
//!
//! The crate logs through [`tracing`]: per-method summaries at `debug`, individual steps at
//! `trace` and reads of undefined variables at `warn`. No subscriber is installed.

#[macro_use]
pub(crate) mod error;

/// Convenient re-exports of the most commonly used types.
///
/// # Example
///
/// ```rust
/// use dotssa::prelude::*;
///
/// let mut il = IlBuilder::new(MethodSig::new_static(vec![], IrType::Void));
/// il.emit(OpCode::Ret);
/// let body = ILImporter::new(&il.build()?).import()?;
/// assert_eq!(body.num_blocks(), 1);
/// # Ok::<(), dotssa::Error>(())
/// ```
pub mod prelude;

pub mod analysis;
pub mod entities;
pub mod frontend;
pub mod il;
pub mod ir;
pub mod passes;
pub mod utils;

/// `dotssa` Result type
///
/// A type alias for [`std::result::Result<T, Error>`] where the error type is always [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// `dotssa` Error type
///
/// # Examples
///
/// ```rust
/// use dotssa::{il::{IlBuilder, OpCode}, entities::{IrType, MethodSig}, passes::Pipeline, Error};
///
/// let mut il = IlBuilder::new(MethodSig::new_static(vec![], IrType::Void));
/// il.emit(OpCode::Arglist).emit(OpCode::Pop).emit(OpCode::Ret);
///
/// match Pipeline::new().compile(&il.build()?) {
///     Err(Error::NotSupported(opcode)) => println!("cannot translate {opcode:?}"),
///     Err(Error::InvalidProgram { message, offset }) => println!("IL_{offset:04x}: {message}"),
///     Err(e) => println!("Error: {e}"),
///     Ok(_) => unreachable!(),
/// }
/// # Ok::<(), dotssa::Error>(())
/// ```
pub use error::Error;
