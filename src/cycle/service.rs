//! Cycle assignment service
//!
//! Assigns each checkout request to a variant by walking a shared rotation
//! counter under a lock. When the lock cannot be taken, the request is
//! assigned by a weighted coin flip instead so the caller is never blocked.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::checkout::{Attribution, CheckoutResolver, Plan};
use crate::cycle::lock::{self, HeldLock, LockPolicy, LockStrategy};
use crate::cycle::rules::{SlotRules, Variant};
use crate::cycle::state::CycleState;
use crate::error::{Result, SplitError};
use crate::store::{CasOutcome, ConfigStore};

/// Tuning for one assignment service instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSettings {
    /// Store namespace holding the cycle state
    pub namespace: String,
    /// Cycle length and secondary slots
    pub rules: SlotRules,
    /// Lock retry policy
    pub lock: LockPolicy,
    /// Tag reported with every assignment
    pub split_version: String,
    /// Appended to `split_version` for fallback assignments
    pub fallback_suffix: String,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            namespace: "checkout_split".to_string(),
            rules: SlotRules::default(),
            lock: LockPolicy::default(),
            split_version: "cycle-80-20".to_string(),
            fallback_suffix: "-fallback".to_string(),
        }
    }
}

/// Where in the rotation a coordinated assignment landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleInfo {
    /// Index before advancing
    pub cycle_index: u32,
    /// Index persisted for the next caller
    pub next_index: u32,
    /// Whether `cycle_index` is a fixed secondary slot
    pub is_secondary_slot: bool,
}

/// Outcome of one `assign` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignmentResult {
    /// Chosen destination
    pub variant: Variant,
    /// Plan the caller asked for
    pub plan: Plan,
    /// Redirect URL with attribution appended
    pub resolved_url: String,
    /// True when the lock could not be taken and the variant was drawn at random
    pub used_fallback: bool,
    /// Rotation position, absent on the fallback path
    pub cycle_info: Option<CycleInfo>,
    /// Version tag, suffixed on the fallback path
    pub split_version: String,
}

/// How the variant was decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Decision {
    Coordinated(Variant, CycleInfo),
    Fallback(Variant),
}

/// Assigns checkout variants from a shared rotation counter.
#[derive(Debug)]
pub struct CycleAssignmentService<S> {
    store: S,
    settings: ServiceSettings,
    resolver: CheckoutResolver,
}

impl<S: ConfigStore> CycleAssignmentService<S> {
    /// Create a service over `store`.
    ///
    /// Fails with [`SplitError::Configuration`] if the namespace is blank or
    /// the lock policy allows no attempts.
    pub fn new(store: S, settings: ServiceSettings, resolver: CheckoutResolver) -> Result<Self> {
        if settings.namespace.trim().is_empty() {
            return Err(SplitError::Configuration(
                "store namespace is missing".to_string(),
            ));
        }
        if settings.lock.max_attempts == 0 {
            return Err(SplitError::Configuration(
                "lock max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            store,
            settings,
            resolver,
        })
    }

    /// The backing store.
    #[must_use]
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Active settings.
    #[must_use]
    pub const fn settings(&self) -> &ServiceSettings {
        &self.settings
    }

    /// Create the cycle state if the namespace is empty, then return it.
    pub async fn ensure_state(&self) -> Result<CycleState> {
        let namespace = &self.settings.namespace;
        if let Some(record) = self.store.get(namespace).await? {
            return CycleState::from_record(&record);
        }
        info!(namespace = %namespace, "initializing cycle state");
        let record = self
            .store
            .create(namespace, CycleState::initial_fields(Utc::now()))
            .await?;
        CycleState::from_record(&record)
    }

    /// Current state, or `None` before the first assignment.
    pub async fn state(&self) -> Result<Option<CycleState>> {
        self.store
            .get(&self.settings.namespace)
            .await?
            .map(|record| CycleState::from_record(&record))
            .transpose()
    }

    /// Clear the lock regardless of holder.
    pub async fn force_unlock(&self) -> Result<CycleState> {
        lock::force_unlock(&self.store, &self.settings.namespace).await
    }

    /// Assign a variant for one checkout attempt.
    ///
    /// Bootstrap failures are returned as errors. Failing to take the lock is
    /// not an error: the request falls back to a weighted random draw.
    pub async fn assign(&self, plan: Plan, attribution: &Attribution) -> Result<AssignmentResult> {
        self.ensure_state().await?;

        let decision = match lock::acquire(&self.store, &self.settings.namespace, &self.settings.lock)
            .await
        {
            Some(held) => {
                let (variant, info) = self.advance_and_release(&held).await?;
                Decision::Coordinated(variant, info)
            }
            None => {
                let variant = self.settings.rules.fallback_variant(&mut rand::thread_rng());
                info!(
                    namespace = %self.settings.namespace,
                    variant = %variant,
                    "lock unavailable, using fallback assignment"
                );
                Decision::Fallback(variant)
            }
        };

        Ok(self.build_result(decision, plan, attribution))
    }

    /// Advance the counter, then release the lock whatever the outcome.
    async fn advance_and_release(&self, held: &HeldLock) -> Result<(Variant, CycleInfo)> {
        let namespace = &self.settings.namespace;
        let advanced = self.advance(held).await;

        if let Err(e) = &advanced {
            warn!(namespace = %namespace, error = %e, "assignment failed while holding lock");
        }
        if let Err(e) = lock::release(&self.store, namespace, &self.settings.lock, held).await {
            warn!(namespace = %namespace, error = %e, "failed to release lock");
        }

        advanced
    }

    /// Read the index, decide, and persist the next index. Lock must be held.
    async fn advance(&self, held: &HeldLock) -> Result<(Variant, CycleInfo)> {
        let namespace = &self.settings.namespace;
        let rules = &self.settings.rules;

        let record = lock::read_record(&self.store, namespace)
            .await
            .map_err(|e| SplitError::Persistence(format!("reading cycle state: {e}")))?;
        let state = CycleState::from_record(&record)?;

        if self.settings.lock.strategy == LockStrategy::CompareAndSwap
            && !state.is_held_by(&held.owner)
        {
            return Err(SplitError::Persistence(format!(
                "lock was taken over by '{}' before the counter was read",
                state.lock_owner
            )));
        }

        let cycle_index = if state.cycle_index < rules.cycle_length() {
            state.cycle_index
        } else {
            warn!(
                namespace = %namespace,
                stored = state.cycle_index,
                cycle_length = rules.cycle_length(),
                "stored index outside cycle, wrapping"
            );
            state.cycle_index % rules.cycle_length()
        };
        let next_index = rules.next_index(cycle_index);
        let fields = CycleState::advance_fields(next_index, Utc::now());

        match self.settings.lock.strategy {
            LockStrategy::CompareAndSwap => {
                match self
                    .store
                    .compare_and_set(namespace, record.version, fields)
                    .await
                    .map_err(|e| SplitError::Persistence(format!("writing next index: {e}")))?
                {
                    CasOutcome::Applied(_) => {}
                    CasOutcome::Conflict { current_version } => {
                        return Err(SplitError::Persistence(format!(
                            "cycle state changed under the lock (expected version {}, found {current_version})",
                            record.version
                        )));
                    }
                }
            }
            LockStrategy::DoubleCheck => {
                self.store
                    .set(namespace, fields)
                    .await
                    .map_err(|e| SplitError::Persistence(format!("writing next index: {e}")))?;
            }
        }

        let info = CycleInfo {
            cycle_index,
            next_index,
            is_secondary_slot: rules.is_secondary_slot(cycle_index),
        };
        let variant = rules.variant_for(cycle_index);
        debug!(
            namespace = %namespace,
            cycle_index,
            next_index,
            variant = %variant,
            "cycle advanced"
        );
        Ok((variant, info))
    }

    fn build_result(
        &self,
        decision: Decision,
        plan: Plan,
        attribution: &Attribution,
    ) -> AssignmentResult {
        let (variant, cycle_info, used_fallback) = match decision {
            Decision::Coordinated(variant, info) => (variant, Some(info), false),
            Decision::Fallback(variant) => (variant, None, true),
        };

        let split_version = if used_fallback {
            format!(
                "{}{}",
                self.settings.split_version, self.settings.fallback_suffix
            )
        } else {
            self.settings.split_version.clone()
        };

        AssignmentResult {
            variant,
            plan,
            resolved_url: self.resolver.resolve(variant, plan, attribution),
            used_fallback,
            cycle_info,
            split_version,
        }
    }
}
