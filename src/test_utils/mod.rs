//! Test utilities: a scripted in-memory backend and small builders for rows and procedures.

pub mod memory;
pub mod test_helpers;

pub use memory::{
    ExecutedCommand, ExecutionKind, Invocation, MemoryDriver, MemoryStats, Response,
    XML_COLUMN_NAME,
};
pub use test_helpers::*;
