//! Checkout destinations
//!
//! Resolves a variant decision plus a billing plan into the redirect URL,
//! carrying the visitor's attribution parameters along.

pub mod resolver;
pub mod url;

pub use resolver::{CheckoutResolver, Plan, PlanUrls};
pub use url::{append_attribution, Attribution};
