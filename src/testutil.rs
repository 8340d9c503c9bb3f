//! Shared test utilities
//!
//! Common helpers used across test modules. Only compiled in test builds.

use std::time::Duration;

use chrono::Utc;

use crate::checkout::{CheckoutResolver, PlanUrls};
use crate::cycle::lock::LockPolicy;
use crate::cycle::rules::Variant;
use crate::cycle::service::ServiceSettings;
use crate::log::jsonl::AssignmentRecord;

/// Default service settings with millisecond-scale lock timings.
///
/// Three attempts, so a held lock exhausts retries in a few milliseconds.
#[must_use]
pub fn fast_settings() -> ServiceSettings {
    ServiceSettings {
        lock: LockPolicy {
            max_attempts: 3,
            confirm_delay: Duration::from_millis(1),
            backoff_step: Duration::from_millis(1),
            ..LockPolicy::default()
        },
        ..ServiceSettings::default()
    }
}

/// Checkout table pointing at example.com hosts.
#[must_use]
pub fn test_resolver() -> CheckoutResolver {
    CheckoutResolver {
        primary: PlanUrls {
            annual: "https://primary.example.com/annual".to_string(),
            monthly: "https://primary.example.com/monthly".to_string(),
        },
        secondary: PlanUrls {
            annual: "https://secondary.example.com/annual".to_string(),
            monthly: "https://secondary.example.com/monthly".to_string(),
        },
    }
}

/// Create a successful `AssignmentRecord` for testing.
///
/// Coordinated records carry `cycle_index`; fallback records leave it `None`.
#[must_use]
pub fn make_test_record(
    variant: Variant,
    cycle_index: Option<u32>,
    used_fallback: bool,
) -> AssignmentRecord {
    AssignmentRecord {
        timestamp: Utc::now(),
        plan: Some("annual".to_string()),
        success: true,
        variant: Some(variant),
        used_fallback,
        cycle_index,
        split_version: Some(if used_fallback {
            "cycle-80-20-fallback".to_string()
        } else {
            "cycle-80-20".to_string()
        }),
        error_kind: None,
        error: None,
        attribution_keys: vec![],
    }
}

/// Create a failed `AssignmentRecord` for testing.
#[must_use]
pub fn make_failed_record(error_kind: &str, error: &str) -> AssignmentRecord {
    AssignmentRecord {
        timestamp: Utc::now(),
        plan: Some("annual".to_string()),
        success: false,
        variant: None,
        used_fallback: false,
        cycle_index: None,
        split_version: None,
        error_kind: Some(error_kind.to_string()),
        error: Some(error.to_string()),
        attribution_keys: vec![],
    }
}
