//! Checkout split - coordinated weighted round-robin assignment
//!
//! Routes checkout requests to a primary or secondary provider in a fixed
//! slot rotation. The rotation counter lives in a shared key-value store and
//! is advanced under a lock; when the lock is unavailable a weighted random
//! draw keeps the request moving.

// Allow multiple crate versions from dependencies (can't easily control)
#![allow(clippy::multiple_crate_versions)]

pub mod checkout;
pub mod cli;
pub mod cycle;
pub mod doctor;
pub mod error;
pub mod handler;
pub mod log;
pub mod simulate;
pub mod store;

#[cfg(test)]
mod testutil;

// Re-export commonly used types
pub use checkout::{CheckoutResolver, Plan};
pub use cycle::config::SplitConfig;
pub use cycle::rules::Variant;
pub use cycle::service::{AssignmentResult, CycleAssignmentService, CycleInfo, ServiceSettings};
pub use error::SplitError;
pub use handler::{handle_checkout, handle_checkout_body, CheckoutRequest, CheckoutResponse};
pub use log::{AssignmentRecord, JsonlLogger};
pub use store::{ConfigStore, FileStore, MemoryStore};
