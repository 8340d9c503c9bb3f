//! Logging and observability
//!
//! This module provides the assignment audit log. Diagnostic events go
//! through `tracing`; the binary decides where they are written.

pub mod jsonl;

pub use jsonl::{AssignmentRecord, JsonlLogger};
