// crates/types/src/lib.rs
//! Shared data model for document job tracking.

pub mod job;
pub mod wire;

pub use job::*;
pub use wire::*;
