//! Lock over the shared cycle state
//!
//! The lock lives in the same record as the counter: `locked`,
//! `last_update` and `lock_owner`. Acquisition retries a bounded number of
//! times with linear backoff and takes over locks whose holder has not
//! written for longer than the staleness threshold.
//!
//! Two strategies are supported:
//! - **compare-and-swap**: the lock write is conditioned on the record
//!   version that was read, so only one of several racing callers wins.
//! - **double-check**: unconditional write, then a delayed re-read that must
//!   still show our owner token. Narrows the race window without closing it.

use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::cycle::state::CycleState;
use crate::error::{Result, SplitError};
use crate::store::{CasOutcome, ConfigStore, Record, StoreError};

/// Conditional release is retried this many times when it races a
/// concurrent version bump.
const RELEASE_ATTEMPTS: u32 = 3;

/// How the lock write is protected against concurrent writers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LockStrategy {
    /// Version-conditioned write
    #[default]
    CompareAndSwap,
    /// Write, wait, re-read
    DoubleCheck,
}

/// Retry, backoff and staleness settings for lock acquisition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockPolicy {
    /// Write protection strategy
    pub strategy: LockStrategy,
    /// Acquisition attempts before falling back
    pub max_attempts: u32,
    /// Age after which a held lock is treated as abandoned
    pub stale_after: Duration,
    /// Delay before the confirming re-read (double-check only)
    pub confirm_delay: Duration,
    /// Backoff unit; attempt `n` (0-based) waits `(n + 1) * backoff_step`
    pub backoff_step: Duration,
}

impl Default for LockPolicy {
    fn default() -> Self {
        Self {
            strategy: LockStrategy::CompareAndSwap,
            max_attempts: 5,
            stale_after: Duration::from_secs(30),
            confirm_delay: Duration::from_millis(100),
            backoff_step: Duration::from_millis(200),
        }
    }
}

impl LockPolicy {
    /// Wait after the failed attempt `attempt` (0-based).
    #[must_use]
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        self.backoff_step.saturating_mul(attempt.saturating_add(1))
    }

    fn stale_after_chrono(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.stale_after).unwrap_or(chrono::Duration::MAX)
    }
}

/// Proof that this caller wrote the lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeldLock {
    /// Token written to `lock_owner`
    pub owner: String,
    /// State as of the lock write
    pub state: CycleState,
    /// Attempts it took to acquire (1-based)
    pub attempts: u32,
}

/// Generate a fresh owner token.
#[must_use]
pub fn new_owner_token() -> String {
    format!("{:016x}", rand::random::<u64>())
}

/// Try to take the lock, retrying per `policy`.
///
/// Returns `None` once every attempt has failed. Store errors during an
/// attempt count as a failed attempt; they never abort the retry loop.
pub async fn acquire<S: ConfigStore>(
    store: &S,
    namespace: &str,
    policy: &LockPolicy,
) -> Option<HeldLock> {
    let owner = new_owner_token();

    for attempt in 0..policy.max_attempts {
        match try_acquire(store, namespace, policy, &owner).await {
            Ok(Some(state)) => {
                debug!(namespace, owner = %owner, attempt, "lock acquired");
                return Some(HeldLock {
                    owner,
                    state,
                    attempts: attempt + 1,
                });
            }
            Ok(None) => debug!(namespace, attempt, "lock busy"),
            Err(e) => warn!(namespace, attempt, error = %e, "lock attempt failed"),
        }

        if attempt + 1 < policy.max_attempts {
            tokio::time::sleep(policy.backoff_for(attempt)).await;
        }
    }

    info!(
        namespace,
        attempts = policy.max_attempts,
        "lock attempts exhausted"
    );
    None
}

/// One acquisition attempt. `Ok(None)` means the lock is held by someone else
/// or another caller won the race.
async fn try_acquire<S: ConfigStore>(
    store: &S,
    namespace: &str,
    policy: &LockPolicy,
    owner: &str,
) -> Result<Option<CycleState>> {
    let record = read_record(store, namespace).await?;
    let state = CycleState::from_record(&record)?;
    let now = Utc::now();
    let stale_after = policy.stale_after_chrono();

    if !state.is_acquirable(now, stale_after) {
        return Ok(None);
    }
    if state.is_stale(now, stale_after) {
        info!(
            namespace,
            previous_owner = %state.lock_owner,
            last_update = %state.last_update,
            "taking over stale lock"
        );
    }

    let lock_fields = CycleState::lock_fields(owner, now);
    match policy.strategy {
        LockStrategy::CompareAndSwap => {
            match store
                .compare_and_set(namespace, record.version, lock_fields)
                .await?
            {
                CasOutcome::Applied(updated) => Ok(Some(CycleState::from_record(&updated)?)),
                CasOutcome::Conflict { current_version } => {
                    debug!(
                        namespace,
                        expected = record.version,
                        current_version,
                        "lost lock race"
                    );
                    Ok(None)
                }
            }
        }
        LockStrategy::DoubleCheck => {
            store.set(namespace, lock_fields).await?;
            tokio::time::sleep(policy.confirm_delay).await;
            let confirmed = CycleState::from_record(&read_record(store, namespace).await?)?;
            Ok(confirmed.is_held_by(owner).then_some(confirmed))
        }
    }
}

/// Clear a lock this caller holds.
///
/// With compare-and-swap the lock is only cleared while it still carries our
/// owner token; a lock that went stale and was taken over is left alone.
pub async fn release<S: ConfigStore>(
    store: &S,
    namespace: &str,
    policy: &LockPolicy,
    held: &HeldLock,
) -> Result<()> {
    match policy.strategy {
        LockStrategy::DoubleCheck => {
            store
                .set(namespace, CycleState::unlock_fields(Utc::now()))
                .await?;
            Ok(())
        }
        LockStrategy::CompareAndSwap => {
            for _ in 0..RELEASE_ATTEMPTS {
                let record = read_record(store, namespace).await?;
                let state = CycleState::from_record(&record)?;
                if !state.is_held_by(&held.owner) {
                    warn!(
                        namespace,
                        owner = %held.owner,
                        current_owner = %state.lock_owner,
                        "lock no longer held at release, leaving it in place"
                    );
                    return Ok(());
                }

                let outcome = store
                    .compare_and_set(
                        namespace,
                        record.version,
                        CycleState::unlock_fields(Utc::now()),
                    )
                    .await?;
                if matches!(outcome, CasOutcome::Applied(_)) {
                    debug!(namespace, owner = %held.owner, "lock released");
                    return Ok(());
                }
            }
            Err(SplitError::Persistence(format!(
                "lock release kept conflicting after {RELEASE_ATTEMPTS} attempts"
            )))
        }
    }
}

/// Clear the lock regardless of who holds it.
///
/// Operator recovery for an abandoned lock that should not wait out the
/// staleness threshold.
pub async fn force_unlock<S: ConfigStore>(store: &S, namespace: &str) -> Result<CycleState> {
    read_record(store, namespace).await?;
    let record = store
        .set(namespace, CycleState::unlock_fields(Utc::now()))
        .await?;
    warn!(namespace, "lock force-released");
    CycleState::from_record(&record)
}

pub(crate) async fn read_record<S: ConfigStore>(store: &S, namespace: &str) -> Result<Record> {
    store
        .get(namespace)
        .await?
        .ok_or_else(|| SplitError::Store(StoreError::NotFound(namespace.to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    const NS: &str = "split";

    fn fast_policy(strategy: LockStrategy) -> LockPolicy {
        LockPolicy {
            strategy,
            max_attempts: 3,
            stale_after: Duration::from_secs(30),
            confirm_delay: Duration::from_millis(1),
            backoff_step: Duration::from_millis(1),
        }
    }

    async fn seeded_store() -> MemoryStore {
        let store = MemoryStore::new();
        store
            .create(NS, CycleState::initial_fields(Utc::now()))
            .await
            .unwrap();
        store
    }

    #[test]
    fn test_backoff_grows_linearly() {
        let policy = LockPolicy::default();
        assert_eq!(policy.backoff_for(0), Duration::from_millis(200));
        assert_eq!(policy.backoff_for(1), Duration::from_millis(400));
        assert_eq!(policy.backoff_for(4), Duration::from_millis(1000));
    }

    #[test]
    fn test_owner_tokens_differ() {
        assert_ne!(new_owner_token(), new_owner_token());
        assert_eq!(new_owner_token().len(), 16);
    }

    #[tokio::test]
    async fn test_acquire_free_lock_with_cas() {
        let store = seeded_store().await;
        let held = acquire(&store, NS, &fast_policy(LockStrategy::CompareAndSwap))
            .await
            .unwrap();

        assert_eq!(held.attempts, 1);
        assert!(held.state.is_held_by(&held.owner));
        let stored = CycleState::from_record(&store.peek(NS).unwrap()).unwrap();
        assert!(stored.is_held_by(&held.owner));
    }

    #[tokio::test]
    async fn test_acquire_free_lock_with_double_check() {
        let store = seeded_store().await;
        let held = acquire(&store, NS, &fast_policy(LockStrategy::DoubleCheck))
            .await
            .unwrap();
        assert!(held.state.is_held_by(&held.owner));
    }

    #[tokio::test]
    async fn test_acquire_gives_up_on_held_lock() {
        let store = seeded_store().await;
        let policy = fast_policy(LockStrategy::CompareAndSwap);
        let first = acquire(&store, NS, &policy).await.unwrap();

        assert!(acquire(&store, NS, &policy).await.is_none());

        release(&store, NS, &policy, &first).await.unwrap();
        assert!(acquire(&store, NS, &policy).await.is_some());
    }

    #[tokio::test]
    async fn test_acquire_takes_over_stale_lock() {
        let store = seeded_store().await;
        let stale = Utc::now() - chrono::Duration::seconds(120);
        store
            .set(NS, CycleState::lock_fields("crashed", stale))
            .await
            .unwrap();

        let held = acquire(&store, NS, &fast_policy(LockStrategy::CompareAndSwap))
            .await
            .unwrap();
        assert_ne!(held.owner, "crashed");
        assert!(held.state.is_held_by(&held.owner));
    }

    #[tokio::test]
    async fn test_acquire_missing_namespace_exhausts() {
        let store = MemoryStore::new();
        assert!(acquire(&store, NS, &fast_policy(LockStrategy::CompareAndSwap))
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_release_leaves_taken_over_lock_alone() {
        let store = seeded_store().await;
        let policy = fast_policy(LockStrategy::CompareAndSwap);
        let held = acquire(&store, NS, &policy).await.unwrap();

        store
            .set(NS, CycleState::lock_fields("successor", Utc::now()))
            .await
            .unwrap();
        release(&store, NS, &policy, &held).await.unwrap();

        let stored = CycleState::from_record(&store.peek(NS).unwrap()).unwrap();
        assert!(stored.is_held_by("successor"));
    }

    #[tokio::test]
    async fn test_double_check_release_is_unconditional() {
        let store = seeded_store().await;
        let policy = fast_policy(LockStrategy::DoubleCheck);
        let held = acquire(&store, NS, &policy).await.unwrap();

        store
            .set(NS, CycleState::lock_fields("successor", Utc::now()))
            .await
            .unwrap();
        release(&store, NS, &policy, &held).await.unwrap();

        let stored = CycleState::from_record(&store.peek(NS).unwrap()).unwrap();
        assert!(!stored.locked);
    }

    #[tokio::test]
    async fn test_force_unlock_clears_foreign_lock() {
        let store = seeded_store().await;
        store
            .set(NS, CycleState::lock_fields("someone", Utc::now()))
            .await
            .unwrap();

        let state = force_unlock(&store, NS).await.unwrap();
        assert!(!state.locked);
        assert!(state.lock_owner.is_empty());
    }

    #[tokio::test]
    async fn test_force_unlock_missing_namespace_errors() {
        let store = MemoryStore::new();
        assert!(force_unlock(&store, NS).await.is_err());
    }
}
