//! Split doctor: diagnostics and health checks
//!
//! Analyzes the stored cycle state, `.split/assignments.jsonl` and
//! `split.toml` to diagnose issues and suggest fixes. Returns a structured
//! report with categories: errors (must fix), warnings (should fix), info
//! (suggestions).

use chrono::{DateTime, Utc};

use crate::checkout::Plan;
use crate::cycle::config::SplitConfig;
use crate::cycle::rules::Variant;
use crate::cycle::state::CycleState;
use crate::log::AssignmentRecord;

/// Fallback share of logged assignments above which D003 fires
const FALLBACK_SHARE_LIMIT: f64 = 0.10;

/// Coordinated records needed before ratio drift is judged
const DRIFT_MIN_RECORDS: usize = 50;

/// Allowed deviation of the coordinated secondary share, in share units
const DRIFT_TOLERANCE: f64 = 0.05;

/// Severity level for a diagnostic finding
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Severity {
    /// Must fix, something is broken
    Error,
    /// Should fix, suboptimal configuration or degraded coordination
    Warning,
    /// Suggestion only
    Info,
}

/// A single diagnostic finding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finding {
    /// Severity of the finding
    pub severity: Severity,
    /// Short code for the finding (e.g., "D001")
    pub code: String,
    /// Human-readable message
    pub message: String,
    /// Suggested fix (optional)
    pub suggestion: Option<String>,
}

/// Diagnostic report from `checkout-split doctor`
#[derive(Debug, Clone)]
pub struct DiagnosticReport {
    /// All findings, in order of severity (errors first)
    pub findings: Vec<Finding>,
}

impl DiagnosticReport {
    /// Returns true if the report has no findings at all
    #[must_use]
    pub const fn is_clean(&self) -> bool {
        self.findings.is_empty()
    }

    /// Returns the number of errors
    #[must_use]
    pub fn error_count(&self) -> usize {
        self.count(&Severity::Error)
    }

    /// Returns the number of warnings
    #[must_use]
    pub fn warning_count(&self) -> usize {
        self.count(&Severity::Warning)
    }

    /// Returns the number of info items
    #[must_use]
    pub fn info_count(&self) -> usize {
        self.count(&Severity::Info)
    }

    fn count(&self, severity: &Severity) -> usize {
        self.findings
            .iter()
            .filter(|f| &f.severity == severity)
            .count()
    }
}

/// Run all diagnostic checks and return a report.
#[must_use]
pub fn diagnose(
    config: &SplitConfig,
    state: Option<&CycleState>,
    log: &[AssignmentRecord],
    now: DateTime<Utc>,
) -> DiagnosticReport {
    let mut findings = Vec::new();

    if let Some(state) = state {
        check_lock(config, state, now, &mut findings);
        check_index_range(config, state, &mut findings);
    }
    check_fallback_share(log, &mut findings);
    check_ratio_drift(config, log, &mut findings);
    check_failures(log, &mut findings);
    check_checkout_table(config, &mut findings);

    findings.sort_by_key(|f| match f.severity {
        Severity::Error => 0,
        Severity::Warning => 1,
        Severity::Info => 2,
    });

    DiagnosticReport { findings }
}

/// D001: Report a held lock, and whether it has gone stale
fn check_lock(
    config: &SplitConfig,
    state: &CycleState,
    now: DateTime<Utc>,
    findings: &mut Vec<Finding>,
) {
    if !state.locked {
        return;
    }

    let age = now - state.last_update;
    let stale_after = config.lock.stale_after();

    if state.is_stale(now, stale_after) {
        findings.push(Finding {
            severity: Severity::Warning,
            code: "D001".to_string(),
            message: format!(
                "Lock held by '{}' for {}s, past the {}s staleness threshold",
                state.lock_owner,
                age.num_seconds(),
                config.lock.stale_after_secs
            ),
            suggestion: Some(
                "The next assignment will take it over; run `checkout-split unlock` to clear it now"
                    .to_string(),
            ),
        });
    } else {
        findings.push(Finding {
            severity: Severity::Info,
            code: "D001".to_string(),
            message: format!(
                "Lock currently held by '{}' ({}s old)",
                state.lock_owner,
                age.num_seconds()
            ),
            suggestion: None,
        });
    }
}

/// D002: Stored index must fit the configured cycle
fn check_index_range(config: &SplitConfig, state: &CycleState, findings: &mut Vec<Finding>) {
    if state.cycle_index >= config.split.cycle_length {
        findings.push(Finding {
            severity: Severity::Error,
            code: "D002".to_string(),
            message: format!(
                "Stored cycle_index {} is outside the configured cycle length {}",
                state.cycle_index, config.split.cycle_length
            ),
            suggestion: Some(
                "Assignments wrap the index modulo the cycle length; reset cycle_index if the layout changed on purpose"
                    .to_string(),
            ),
        });
    }
}

/// D003: Too many requests bypassing coordination
fn check_fallback_share(log: &[AssignmentRecord], findings: &mut Vec<Finding>) {
    let assigned: Vec<&AssignmentRecord> = log.iter().filter(|r| r.success).collect();
    if assigned.is_empty() {
        return;
    }

    let fallback = assigned.iter().filter(|r| r.used_fallback).count();
    let share = ratio(fallback, assigned.len());
    if share > FALLBACK_SHARE_LIMIT {
        findings.push(Finding {
            severity: Severity::Warning,
            code: "D003".to_string(),
            message: format!(
                "{fallback}/{} assignments ({:.0}%) used the fallback draw",
                assigned.len(),
                share * 100.0
            ),
            suggestion: Some(
                "Check store latency and lock contention; raise [lock] max_attempts or backoff_step_ms"
                    .to_string(),
            ),
        });
    }
}

/// D004: Coordinated assignments should match the configured ratio
fn check_ratio_drift(config: &SplitConfig, log: &[AssignmentRecord], findings: &mut Vec<Finding>) {
    let Ok(rules) = config.slot_rules() else {
        return;
    };

    let coordinated: Vec<&AssignmentRecord> = log
        .iter()
        .filter(|r| r.success && !r.used_fallback)
        .collect();
    if coordinated.len() < DRIFT_MIN_RECORDS {
        return;
    }

    let secondary = coordinated
        .iter()
        .filter(|r| r.variant == Some(Variant::Secondary))
        .count();
    let share = ratio(secondary, coordinated.len());
    let expected = rules.secondary_ratio();

    if (share - expected).abs() > DRIFT_TOLERANCE {
        findings.push(Finding {
            severity: Severity::Warning,
            code: "D004".to_string(),
            message: format!(
                "Coordinated secondary share is {:.1}% over {} assignments, expected {:.1}%",
                share * 100.0,
                coordinated.len(),
                expected * 100.0
            ),
            suggestion: Some(
                "Concurrent writers may be bypassing the lock; prefer strategy = \"compare-and-swap\""
                    .to_string(),
            ),
        });
    }
}

/// D005: Failed requests in the log
fn check_failures(log: &[AssignmentRecord], findings: &mut Vec<Finding>) {
    let failed: Vec<&AssignmentRecord> = log.iter().filter(|r| !r.success).collect();
    if failed.is_empty() {
        return;
    }

    let mut kinds: Vec<&str> = failed
        .iter()
        .filter_map(|r| r.error_kind.as_deref())
        .collect();
    kinds.sort_unstable();
    kinds.dedup();

    findings.push(Finding {
        severity: Severity::Error,
        code: "D005".to_string(),
        message: format!(
            "{} request(s) failed ({})",
            failed.len(),
            kinds.join(", ")
        ),
        suggestion: failed
            .last()
            .and_then(|r| r.error.as_ref())
            .map(|e| format!("Most recent error: {e}")),
    });
}

/// D006: Lint the checkout table
fn check_checkout_table(config: &SplitConfig, findings: &mut Vec<Finding>) {
    let checkout = &config.checkout;

    for plan in [Plan::Annual, Plan::Monthly] {
        if checkout.base_url(Variant::Primary, plan) == checkout.base_url(Variant::Secondary, plan) {
            findings.push(Finding {
                severity: Severity::Warning,
                code: "D006".to_string(),
                message: format!("Both variants use the same {plan} checkout URL"),
                suggestion: Some(format!(
                    "Point [checkout.secondary] {plan} at the secondary provider"
                )),
            });
        }
    }

    for (variant, plan, url) in checkout.entries() {
        if !url.starts_with("https://") {
            findings.push(Finding {
                severity: Severity::Info,
                code: "D006".to_string(),
                message: format!("Checkout URL for {variant}/{plan} is not https: {url}"),
                suggestion: None,
            });
        }
    }
}

#[allow(clippy::cast_precision_loss)]
fn ratio(part: usize, whole: usize) -> f64 {
    part as f64 / whole as f64
}
