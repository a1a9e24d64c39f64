//! # dotssa Prelude
//!
//! The types needed to build, import and promote a method body with one glob import.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all dotssa operations
pub use crate::Error;

/// The result type used throughout dotssa
pub use crate::Result;

// ================================================================================================
// Bytecode Input
// ================================================================================================

/// Decoded methods and the builder producing them
pub use crate::il::{ExceptionRegion, IlBuilder, IlInstruction, IlMethod, IlOperand, OpCode, RegionKind};

/// Descriptors referenced by instructions
pub use crate::entities::{FieldDesc, GenericContext, IrType, MethodDesc, MethodSig, Token};

// ================================================================================================
// Intermediate Representation
// ================================================================================================

/// The method body arena and its building blocks
pub use crate::ir::{verify, BlockId, Const, GuardKind, InstId, InstKind, MethodBody, Value, VarId, VariableOrigin};

// ================================================================================================
// Import, Analysis and Transformation
// ================================================================================================

/// Bytecode importer
pub use crate::frontend::ILImporter;

/// Cached analyses
pub use crate::analysis::{AnalysisManager, DominanceFrontier, DominatorTree, MethodAnalysis};

/// Passes and the compilation pipeline
pub use crate::passes::{
    MethodInvalidations, MethodPass, MethodTransformContext, Pipeline, PipelineConfig, PromotionConfig, SsaPromotion,
};
