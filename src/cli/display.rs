//! Rich CLI display for checkout assignments
//!
//! Renders assignments, cycle state and reports as human-readable terminal
//! output. All output goes to stderr so stdout remains clean for piping.

use chrono::{DateTime, Utc};
use colored::Colorize;

use crate::cycle::rules::{SlotRules, Variant};
use crate::cycle::service::AssignmentResult;
use crate::cycle::state::CycleState;
use crate::doctor::{DiagnosticReport, Severity};
use crate::error::SplitError;
use crate::simulate::SimulationSummary;

/// Print a one-line summary of an assignment
pub fn render_assignment(result: &AssignmentResult) {
    let variant = colorize_variant(result.variant);
    let position = result.cycle_info.map_or_else(
        || "fallback draw".yellow().to_string(),
        |info| format!("slot {} → {}", info.cycle_index, info.next_index),
    );
    eprintln!(
        "  {} {} {} ({}) {}",
        "✓".green().bold(),
        variant,
        result.plan.to_string().bold(),
        position,
        result.split_version.dimmed()
    );
    eprintln!("  {} {}", "URL:".dimmed(), result.resolved_url);
}

/// Print a failed request
pub fn render_failure(err: &SplitError) {
    eprintln!(
        "  {} {} {}",
        "✗".red().bold(),
        format!("[{}]", err.kind()).red(),
        err
    );
}

/// Print the stored cycle state against the slot layout
pub fn render_state(
    state: Option<&CycleState>,
    rules: &SlotRules,
    stale_after: chrono::Duration,
    now: DateTime<Utc>,
) {
    eprintln!(
        "\n{} {}",
        "===".bold().cyan(),
        "Checkout split status".bold().cyan()
    );
    eprintln!("{}", "─".repeat(50).dimmed());

    let Some(state) = state else {
        eprintln!("  No cycle state yet. The first assignment creates it.");
        eprintln!();
        return;
    };

    eprintln!("  {} {}", "Slots:".dimmed(), slot_strip(rules, state.cycle_index));
    eprintln!(
        "  {} {} of {} (next: {})",
        "Index:".dimmed(),
        state.cycle_index,
        rules.cycle_length(),
        colorize_variant(rules.variant_for(state.cycle_index % rules.cycle_length()))
    );

    let lock = if !state.locked {
        "free".green().to_string()
    } else if state.is_stale(now, stale_after) {
        format!("stale, held by {}", state.lock_owner)
            .yellow()
            .to_string()
    } else {
        format!("held by {}", state.lock_owner).red().to_string()
    };
    eprintln!("  {} {}", "Lock:".dimmed(), lock);
    eprintln!(
        "  {} {} (version {})",
        "Updated:".dimmed(),
        state.last_update.to_rfc3339(),
        state.version
    );
    eprintln!();
}

/// Print the outcome of a simulation run
pub fn render_simulation(summary: &SimulationSummary, expected_ratio: f64) {
    eprintln!(
        "\n{} {}",
        "===".bold().cyan(),
        format!("Simulated {} assignments", summary.total)
            .bold()
            .cyan()
    );
    eprintln!("{}", "─".repeat(50).dimmed());
    eprintln!(
        "  {} {} primary | {} secondary",
        "Variants:".dimmed(),
        summary.primary,
        summary.secondary
    );
    eprintln!(
        "  {} {} coordinated | {} fallback",
        "Paths:".dimmed(),
        summary.coordinated,
        summary.fallback
    );
    eprintln!(
        "  {} {:.1}% (configured {:.1}%)",
        "Secondary:".dimmed(),
        summary.secondary_share * 100.0,
        expected_ratio * 100.0
    );
    eprintln!("  {} {}", "Final index:".dimmed(), summary.final_index);
    eprintln!();
}

/// Print a diagnostic report from `checkout-split doctor`
pub fn render_diagnostic_report(report: &DiagnosticReport) {
    eprintln!(
        "\n{} {}",
        "===".bold().cyan(),
        "Checkout split doctor".bold().cyan()
    );
    eprintln!("{}", "─".repeat(50).dimmed());

    if report.is_clean() {
        eprintln!("  {} No issues found", "✓".green().bold());
        eprintln!();
        return;
    }

    for finding in &report.findings {
        let tag = match finding.severity {
            Severity::Error => "ERROR".red().bold(),
            Severity::Warning => "WARN".yellow().bold(),
            Severity::Info => "INFO".blue().bold(),
        };
        eprintln!("  {} {} {}", tag, finding.code.dimmed(), finding.message);
        if let Some(suggestion) = &finding.suggestion {
            eprintln!("        {} {}", "→".dimmed(), suggestion.dimmed());
        }
    }

    eprintln!("{}", "─".repeat(50).dimmed());
    eprintln!(
        "  {} error(s), {} warning(s), {} info",
        report.error_count(),
        report.warning_count(),
        report.info_count()
    );
    eprintln!();
}

fn colorize_variant(variant: Variant) -> String {
    match variant {
        Variant::Primary => variant.as_str().green().bold().to_string(),
        Variant::Secondary => variant.as_str().magenta().bold().to_string(),
    }
}

/// One character per slot: `P`/`S`, with the current slot bracketed
fn slot_strip(rules: &SlotRules, current: u32) -> String {
    (0..rules.cycle_length())
        .map(|index| {
            let mark = match rules.variant_for(index) {
                Variant::Primary => "P",
                Variant::Secondary => "S",
            };
            if index == current {
                format!("[{mark}]")
            } else {
                mark.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkout::Plan;
    use crate::cycle::service::CycleInfo;
    use crate::doctor::Finding;

    fn sample_state(locked: bool) -> CycleState {
        CycleState {
            cycle_index: 3,
            locked,
            last_update: Utc::now(),
            lock_owner: if locked {
                "00000000deadbeef".to_string()
            } else {
                String::new()
            },
            version: 12,
        }
    }

    #[test]
    fn test_slot_strip_marks_current() {
        let rules = SlotRules::default();
        assert_eq!(slot_strip(&rules, 3), "P P P [S] P P P S P P");
    }

    #[test]
    fn test_slot_strip_out_of_range_index() {
        let rules = SlotRules::default();
        assert_eq!(slot_strip(&rules, 42), "P P P S P P P S P P");
    }

    #[test]
    fn test_colorize_variant_contains_label() {
        assert!(colorize_variant(Variant::Primary).contains("primary"));
        assert!(colorize_variant(Variant::Secondary).contains("secondary"));
    }

    // Rendering only writes to stderr; these check nothing panics
    #[test]
    fn test_render_assignment_no_panic() {
        render_assignment(&AssignmentResult {
            variant: Variant::Secondary,
            plan: Plan::Annual,
            resolved_url: "https://secondary.example.com/annual?utm_source=fb".to_string(),
            used_fallback: false,
            cycle_info: Some(CycleInfo {
                cycle_index: 3,
                next_index: 4,
                is_secondary_slot: true,
            }),
            split_version: "cycle-80-20".to_string(),
        });
        render_assignment(&AssignmentResult {
            variant: Variant::Primary,
            plan: Plan::Monthly,
            resolved_url: "https://primary.example.com/monthly".to_string(),
            used_fallback: true,
            cycle_info: None,
            split_version: "cycle-80-20-fallback".to_string(),
        });
    }

    #[test]
    fn test_render_failure_no_panic() {
        render_failure(&SplitError::InvalidPlan("weekly".to_string()));
    }

    #[test]
    fn test_render_state_no_panic() {
        let rules = SlotRules::default();
        let now = Utc::now();
        let stale_after = chrono::Duration::seconds(30);

        render_state(None, &rules, stale_after, now);
        render_state(Some(&sample_state(false)), &rules, stale_after, now);
        render_state(Some(&sample_state(true)), &rules, stale_after, now);

        let stale = CycleState {
            last_update: now - chrono::Duration::seconds(120),
            ..sample_state(true)
        };
        render_state(Some(&stale), &rules, stale_after, now);
    }

    #[test]
    fn test_render_simulation_no_panic() {
        render_simulation(
            &SimulationSummary {
                total: 100,
                primary: 80,
                secondary: 20,
                fallback: 2,
                coordinated: 98,
                final_index: 8,
                secondary_share: 0.2,
            },
            0.2,
        );
    }

    #[test]
    fn test_render_diagnostic_report_no_panic() {
        render_diagnostic_report(&DiagnosticReport { findings: vec![] });
        render_diagnostic_report(&DiagnosticReport {
            findings: vec![
                Finding {
                    severity: Severity::Error,
                    code: "D005".to_string(),
                    message: "1 request(s) failed (store)".to_string(),
                    suggestion: Some("Most recent error: down".to_string()),
                },
                Finding {
                    severity: Severity::Info,
                    code: "D001".to_string(),
                    message: "Lock currently held".to_string(),
                    suggestion: None,
                },
            ],
        });
    }
}
