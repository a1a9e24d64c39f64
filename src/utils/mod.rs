//! Shared helpers for the importer and the analyses.

mod bitset;
mod traversal;

pub use bitset::{BitSet, BitSetIter};
pub use traversal::{depth_first, Visit};
