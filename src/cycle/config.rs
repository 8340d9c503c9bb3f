//! Split configuration parser
//!
//! Parses `split.toml` into store, rotation, lock and checkout settings.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::checkout::CheckoutResolver;
use crate::cycle::lock::{LockPolicy, LockStrategy};
use crate::cycle::rules::SlotRules;
use crate::cycle::service::ServiceSettings;

/// Which store implementation backs the cycle state
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// JSON document on disk, shared by every process pointing at it
    File,
    /// Process-local, lost on exit
    Memory,
}

/// `[store]` section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoreConfig {
    /// Store implementation (default: file)
    #[serde(default = "default_backend")]
    pub backend: StoreBackend,
    /// Document path for the file backend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    /// Namespace holding the cycle state (default: `checkout_split`)
    #[serde(default = "default_namespace")]
    pub namespace: String,
}

const fn default_backend() -> StoreBackend {
    StoreBackend::File
}

fn default_namespace() -> String {
    "checkout_split".to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            path: None,
            namespace: default_namespace(),
        }
    }
}

/// `[split]` section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SplitSection {
    /// Version tag reported with assignments
    #[serde(default = "default_version")]
    pub version: String,
    /// Suffix appended to the version for fallback assignments
    #[serde(default = "default_fallback_suffix")]
    pub fallback_suffix: String,
    /// Slots per rotation (default: 10)
    #[serde(default = "default_cycle_length")]
    pub cycle_length: u32,
    /// 0-based slots routed to the secondary variant (default: 3 and 7)
    #[serde(default = "default_secondary_slots")]
    pub secondary_slots: Vec<u32>,
}

fn default_version() -> String {
    "cycle-80-20".to_string()
}

fn default_fallback_suffix() -> String {
    "-fallback".to_string()
}

const fn default_cycle_length() -> u32 {
    10
}

fn default_secondary_slots() -> Vec<u32> {
    vec![3, 7]
}

impl Default for SplitSection {
    fn default() -> Self {
        Self {
            version: default_version(),
            fallback_suffix: default_fallback_suffix(),
            cycle_length: default_cycle_length(),
            secondary_slots: default_secondary_slots(),
        }
    }
}

/// `[lock]` section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LockConfig {
    /// `compare-and-swap` (default) or `double-check`
    #[serde(default)]
    pub strategy: LockStrategy,
    /// Attempts before falling back (default: 5)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Seconds after which a held lock is treated as abandoned (default: 30)
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,
    /// Delay before the confirming re-read, double-check only (default: 100)
    #[serde(default = "default_confirm_delay_ms")]
    pub confirm_delay_ms: u64,
    /// Linear backoff unit between attempts (default: 200)
    #[serde(default = "default_backoff_step_ms")]
    pub backoff_step_ms: u64,
}

const fn default_max_attempts() -> u32 {
    5
}

const fn default_stale_after_secs() -> u64 {
    30
}

const fn default_confirm_delay_ms() -> u64 {
    100
}

const fn default_backoff_step_ms() -> u64 {
    200
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            strategy: LockStrategy::default(),
            max_attempts: default_max_attempts(),
            stale_after_secs: default_stale_after_secs(),
            confirm_delay_ms: default_confirm_delay_ms(),
            backoff_step_ms: default_backoff_step_ms(),
        }
    }
}

impl LockConfig {
    /// Convert to the runtime lock policy.
    #[must_use]
    pub const fn policy(&self) -> LockPolicy {
        LockPolicy {
            strategy: self.strategy,
            max_attempts: self.max_attempts,
            stale_after: Duration::from_secs(self.stale_after_secs),
            confirm_delay: Duration::from_millis(self.confirm_delay_ms),
            backoff_step: Duration::from_millis(self.backoff_step_ms),
        }
    }

    /// Staleness threshold as a chrono duration, saturating at its maximum.
    #[must_use]
    pub fn stale_after(&self) -> chrono::Duration {
        i64::try_from(self.stale_after_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .unwrap_or(chrono::Duration::MAX)
    }
}

/// Top-level configuration parsed from split.toml
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SplitConfig {
    /// Backing store
    #[serde(default)]
    pub store: StoreConfig,
    /// Rotation layout and version tags
    #[serde(default)]
    pub split: SplitSection,
    /// Lock retry policy
    #[serde(default)]
    pub lock: LockConfig,
    /// Checkout URL table
    pub checkout: CheckoutResolver,
}

impl SplitConfig {
    /// Parse a split.toml file from a path
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    /// Parse split.toml content from a string
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).context("Failed to parse split.toml")?;
        config.validate()?;
        Ok(config)
    }

    /// Slot rules described by the `[split]` section.
    pub fn slot_rules(&self) -> Result<SlotRules> {
        SlotRules::new(self.split.cycle_length, &self.split.secondary_slots)
            .context("Invalid [split] slot layout")
    }

    /// Settings for a [`crate::CycleAssignmentService`].
    pub fn service_settings(&self) -> Result<ServiceSettings> {
        Ok(ServiceSettings {
            namespace: self.store.namespace.clone(),
            rules: self.slot_rules()?,
            lock: self.lock.policy(),
            split_version: self.split.version.clone(),
            fallback_suffix: self.split.fallback_suffix.clone(),
        })
    }

    /// Validate the configuration
    fn validate(&self) -> Result<()> {
        if self.store.namespace.trim().is_empty() {
            bail!("Store namespace cannot be empty");
        }

        if self.store.backend == StoreBackend::File
            && self
                .store
                .path
                .as_ref()
                .is_none_or(|p| p.as_os_str().is_empty())
        {
            bail!("Store backend 'file' requires a 'path'");
        }

        self.slot_rules()?;

        if self.split.version.trim().is_empty() {
            bail!("Split version cannot be empty");
        }

        if self.lock.max_attempts == 0 {
            bail!("Lock max_attempts must be at least 1");
        }

        for (variant, plan, url) in self.checkout.entries() {
            if url.trim().is_empty() {
                bail!("Checkout URL for {variant}/{plan} cannot be empty");
            }
        }

        Ok(())
    }
}
