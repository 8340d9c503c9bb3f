//! Persistent rotation state
//!
//! `CycleState` is stored as string fields of one record so it maps onto
//! spreadsheet-like row stores.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SplitError};
use crate::store::{fields, Fields, Record};

/// Field holding the current rotation position.
pub const FIELD_CYCLE_INDEX: &str = "cycle_index";
/// Field holding `"true"` while the lock is held.
pub const FIELD_LOCKED: &str = "locked";
/// Field holding the RFC 3339 time of the last write.
pub const FIELD_LAST_UPDATE: &str = "last_update";
/// Field holding the token of the current lock holder.
pub const FIELD_LOCK_OWNER: &str = "lock_owner";

/// The shared counter and its lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleState {
    /// Current rotation position
    pub cycle_index: u32,
    /// Whether a caller holds the lock
    pub locked: bool,
    /// Time of the last write
    pub last_update: DateTime<Utc>,
    /// Token of the lock holder, empty when unlocked
    #[serde(default)]
    pub lock_owner: String,
    /// Store version the state was read at
    #[serde(default)]
    pub version: u64,
}

impl CycleState {
    /// Fields for a fresh namespace: index 0, unlocked.
    #[must_use]
    pub fn initial_fields(now: DateTime<Utc>) -> Fields {
        fields([
            (FIELD_CYCLE_INDEX, "0".to_string()),
            (FIELD_LOCKED, "false".to_string()),
            (FIELD_LAST_UPDATE, now.to_rfc3339()),
            (FIELD_LOCK_OWNER, String::new()),
        ])
    }

    /// Fields that mark the lock as held by `owner`.
    #[must_use]
    pub fn lock_fields(owner: &str, now: DateTime<Utc>) -> Fields {
        fields([
            (FIELD_LOCKED, "true".to_string()),
            (FIELD_LAST_UPDATE, now.to_rfc3339()),
            (FIELD_LOCK_OWNER, owner.to_string()),
        ])
    }

    /// Fields that clear the lock.
    #[must_use]
    pub fn unlock_fields(now: DateTime<Utc>) -> Fields {
        fields([
            (FIELD_LOCKED, "false".to_string()),
            (FIELD_LAST_UPDATE, now.to_rfc3339()),
            (FIELD_LOCK_OWNER, String::new()),
        ])
    }

    /// Fields that move the counter to `index`.
    #[must_use]
    pub fn advance_fields(index: u32, now: DateTime<Utc>) -> Fields {
        fields([
            (FIELD_CYCLE_INDEX, index.to_string()),
            (FIELD_LAST_UPDATE, now.to_rfc3339()),
        ])
    }

    /// Decode a stored record.
    ///
    /// A missing `lock_owner` is read as unowned, since older rows may not
    /// carry the field. All other fields are required.
    pub fn from_record(record: &Record) -> Result<Self> {
        let cycle_index = required(record, FIELD_CYCLE_INDEX)?
            .trim()
            .parse::<u32>()
            .map_err(|e| {
                SplitError::CorruptState(format!("{FIELD_CYCLE_INDEX} is not an index: {e}"))
            })?;

        let locked = match required(record, FIELD_LOCKED)?.trim() {
            "true" | "TRUE" | "1" => true,
            "false" | "FALSE" | "0" | "" => false,
            other => {
                return Err(SplitError::CorruptState(format!(
                    "{FIELD_LOCKED} has unexpected value '{other}'"
                )))
            }
        };

        let last_update = DateTime::parse_from_rfc3339(required(record, FIELD_LAST_UPDATE)?.trim())
            .map_err(|e| {
                SplitError::CorruptState(format!("{FIELD_LAST_UPDATE} is not a timestamp: {e}"))
            })?
            .with_timezone(&Utc);

        Ok(Self {
            cycle_index,
            locked,
            last_update,
            lock_owner: record.field(FIELD_LOCK_OWNER).unwrap_or_default().to_string(),
            version: record.version,
        })
    }

    /// Whether a held lock has outlived `stale_after` and may be taken over.
    #[must_use]
    pub fn is_stale(&self, now: DateTime<Utc>, stale_after: Duration) -> bool {
        self.locked && now - self.last_update > stale_after
    }

    /// Whether a new caller may take the lock.
    #[must_use]
    pub fn is_acquirable(&self, now: DateTime<Utc>, stale_after: Duration) -> bool {
        !self.locked || self.is_stale(now, stale_after)
    }

    /// Whether the lock is currently held by `owner`.
    #[must_use]
    pub fn is_held_by(&self, owner: &str) -> bool {
        self.locked && !owner.is_empty() && self.lock_owner == owner
    }
}

fn required<'a>(record: &'a Record, name: &str) -> Result<&'a str> {
    record
        .field(name)
        .ok_or_else(|| SplitError::CorruptState(format!("missing field '{name}'")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(fields: Fields) -> Record {
        Record { version: 7, fields }
    }

    #[test]
    fn test_initial_fields_decode() {
        let now = Utc::now();
        let state = CycleState::from_record(&record(CycleState::initial_fields(now))).unwrap();

        assert_eq!(state.cycle_index, 0);
        assert!(!state.locked);
        assert!(state.lock_owner.is_empty());
        assert_eq!(state.version, 7);
        assert_eq!(state.last_update.timestamp(), now.timestamp());
    }

    #[test]
    fn test_lock_fields_decode_as_held() {
        let now = Utc::now();
        let mut f = CycleState::initial_fields(now);
        f.extend(CycleState::lock_fields("abc", now));
        let state = CycleState::from_record(&record(f)).unwrap();

        assert!(state.locked);
        assert!(state.is_held_by("abc"));
        assert!(!state.is_held_by("xyz"));
    }

    #[test]
    fn test_missing_owner_reads_as_unowned() {
        let now = Utc::now();
        let mut f = CycleState::initial_fields(now);
        f.remove(FIELD_LOCK_OWNER);
        let state = CycleState::from_record(&record(f)).unwrap();
        assert!(state.lock_owner.is_empty());
        assert!(!state.is_held_by(""));
    }

    #[test]
    fn test_corrupt_index_rejected() {
        let mut f = CycleState::initial_fields(Utc::now());
        f.insert(FIELD_CYCLE_INDEX.to_string(), "three".to_string());
        let err = CycleState::from_record(&record(f)).unwrap_err();
        assert!(matches!(err, SplitError::CorruptState(_)));
    }

    #[test]
    fn test_corrupt_locked_rejected() {
        let mut f = CycleState::initial_fields(Utc::now());
        f.insert(FIELD_LOCKED.to_string(), "maybe".to_string());
        assert!(CycleState::from_record(&record(f)).is_err());
    }

    #[test]
    fn test_missing_timestamp_rejected() {
        let mut f = CycleState::initial_fields(Utc::now());
        f.remove(FIELD_LAST_UPDATE);
        let err = CycleState::from_record(&record(f)).unwrap_err();
        assert!(err.to_string().contains("last_update"));
    }

    #[test]
    fn test_staleness() {
        let now = Utc::now();
        let state = CycleState {
            cycle_index: 0,
            locked: true,
            last_update: now - Duration::seconds(31),
            lock_owner: "old".to_string(),
            version: 1,
        };
        assert!(state.is_stale(now, Duration::seconds(30)));
        assert!(state.is_acquirable(now, Duration::seconds(30)));

        let fresh = CycleState {
            last_update: now - Duration::seconds(5),
            ..state
        };
        assert!(!fresh.is_stale(now, Duration::seconds(30)));
        assert!(!fresh.is_acquirable(now, Duration::seconds(30)));
    }

    #[test]
    fn test_unlocked_is_never_stale() {
        let now = Utc::now();
        let state = CycleState {
            cycle_index: 4,
            locked: false,
            last_update: now - Duration::hours(2),
            lock_owner: String::new(),
            version: 1,
        };
        assert!(!state.is_stale(now, Duration::seconds(30)));
        assert!(state.is_acquirable(now, Duration::seconds(30)));
    }
}
