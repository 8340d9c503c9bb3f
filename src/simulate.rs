//! Concurrent assignment simulation
//!
//! Runs a burst of assignments against an in-memory store to show how the
//! lock strategy and retry policy hold up under contention.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::checkout::{Attribution, CheckoutResolver, Plan};
use crate::cycle::rules::Variant;
use crate::cycle::service::{AssignmentResult, CycleAssignmentService, ServiceSettings};
use crate::error::{Result, SplitError};
use crate::store::MemoryStore;

/// Aggregate outcome of a simulation run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimulationSummary {
    /// Assignments requested
    pub total: usize,
    /// Assignments routed to the primary variant
    pub primary: usize,
    /// Assignments routed to the secondary variant
    pub secondary: usize,
    /// Assignments decided by the fallback draw
    pub fallback: usize,
    /// Assignments decided by the shared counter
    pub coordinated: usize,
    /// Counter value after the run
    pub final_index: u32,
    /// Share of all assignments that went to the secondary variant
    pub secondary_share: f64,
}

impl SimulationSummary {
    /// Tally a batch of results.
    #[must_use]
    pub fn from_results(results: &[AssignmentResult], final_index: u32) -> Self {
        let secondary = results
            .iter()
            .filter(|r| r.variant == Variant::Secondary)
            .count();
        let fallback = results.iter().filter(|r| r.used_fallback).count();

        #[allow(clippy::cast_precision_loss)]
        let secondary_share = if results.is_empty() {
            0.0
        } else {
            secondary as f64 / results.len() as f64
        };

        Self {
            total: results.len(),
            primary: results.len() - secondary,
            secondary,
            fallback,
            coordinated: results.len() - fallback,
            final_index,
            secondary_share,
        }
    }
}

/// Run `count` assignments spread over `concurrency` workers.
///
/// Plans alternate between annual and monthly. The first error stops the run.
pub async fn simulate(
    settings: ServiceSettings,
    resolver: CheckoutResolver,
    count: usize,
    concurrency: usize,
) -> Result<SimulationSummary> {
    if concurrency == 0 {
        return Err(SplitError::Configuration(
            "simulation concurrency must be at least 1".to_string(),
        ));
    }

    let service = Arc::new(CycleAssignmentService::new(
        Arc::new(MemoryStore::new()),
        settings,
        resolver,
    )?);
    service.ensure_state().await?;

    let next_job = Arc::new(AtomicUsize::new(0));
    let mut workers = Vec::with_capacity(concurrency);

    for worker in 0..concurrency {
        let service = Arc::clone(&service);
        let next_job = Arc::clone(&next_job);
        workers.push(tokio::spawn(async move {
            let attribution = Attribution::new();
            let mut results = Vec::new();
            loop {
                let job = next_job.fetch_add(1, Ordering::Relaxed);
                if job >= count {
                    break;
                }
                let plan = if job % 2 == 0 {
                    Plan::Annual
                } else {
                    Plan::Monthly
                };
                results.push(service.assign(plan, &attribution).await?);
            }
            debug!(worker, assigned = results.len(), "simulation worker done");
            Ok::<_, SplitError>(results)
        }));
    }

    let mut results = Vec::with_capacity(count);
    for handle in workers {
        let batch = handle
            .await
            .map_err(|e| SplitError::Persistence(format!("simulation worker panicked: {e}")))??;
        results.extend(batch);
    }

    let final_index = service
        .state()
        .await?
        .map_or(0, |state| state.cycle_index);

    Ok(SimulationSummary::from_results(&results, final_index))
}
