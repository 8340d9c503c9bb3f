//! Slot rules for the rotation cycle
//!
//! A cycle is a fixed-length sequence of slots. A fixed subset of slot
//! indices routes to the secondary variant; every other slot routes to the
//! primary one.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SplitError};

/// Which payment destination a request is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Variant {
    /// Majority destination
    Primary,
    /// Minority destination, assigned on the fixed secondary slots
    Secondary,
}

impl Variant {
    /// Lowercase label used in responses and config keys.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Secondary => "secondary",
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Variant {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "primary" => Ok(Self::Primary),
            "secondary" => Ok(Self::Secondary),
            other => Err(format!("unknown variant '{other}'")),
        }
    }
}

/// Cycle length and the slot indices that route to [`Variant::Secondary`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotRules {
    cycle_length: u32,
    secondary_slots: BTreeSet<u32>,
}

impl SlotRules {
    /// Build rules, rejecting slots outside the cycle or a layout with no
    /// primary slot left.
    pub fn new(cycle_length: u32, secondary_slots: &[u32]) -> Result<Self> {
        if cycle_length == 0 {
            return Err(SplitError::Configuration(
                "cycle length must be at least 1".to_string(),
            ));
        }

        let mut slots = BTreeSet::new();
        for &slot in secondary_slots {
            if slot >= cycle_length {
                return Err(SplitError::Configuration(format!(
                    "secondary slot {slot} is outside a cycle of length {cycle_length}"
                )));
            }
            if !slots.insert(slot) {
                return Err(SplitError::Configuration(format!(
                    "secondary slot {slot} is listed more than once"
                )));
            }
        }

        if slots.len() == cycle_length as usize {
            return Err(SplitError::Configuration(
                "every slot is secondary; at least one primary slot is required".to_string(),
            ));
        }

        Ok(Self {
            cycle_length,
            secondary_slots: slots,
        })
    }

    /// Number of slots in one cycle.
    #[must_use]
    pub const fn cycle_length(&self) -> u32 {
        self.cycle_length
    }

    /// Secondary slot indices in ascending order.
    #[must_use]
    pub fn secondary_slots(&self) -> Vec<u32> {
        self.secondary_slots.iter().copied().collect()
    }

    /// Whether `index` is one of the fixed secondary slots.
    #[must_use]
    pub fn is_secondary_slot(&self, index: u32) -> bool {
        self.secondary_slots.contains(&index)
    }

    /// Variant assigned to the slot at `index`.
    #[must_use]
    pub fn variant_for(&self, index: u32) -> Variant {
        if self.is_secondary_slot(index) {
            Variant::Secondary
        } else {
            Variant::Primary
        }
    }

    /// Slot following `index`, wrapping at the end of the cycle.
    #[must_use]
    pub const fn next_index(&self, index: u32) -> u32 {
        (index + 1) % self.cycle_length
    }

    /// Share of slots routed to the secondary variant.
    #[must_use]
    pub fn secondary_ratio(&self) -> f64 {
        // Slot counts are bounded by a u32 cycle length.
        #[allow(clippy::cast_precision_loss)]
        let slots = self.secondary_slots.len() as f64;
        slots / f64::from(self.cycle_length)
    }

    /// Weighted random variant with the same ratio as a full cycle.
    pub fn fallback_variant<R: Rng + ?Sized>(&self, rng: &mut R) -> Variant {
        if rng.gen_bool(self.secondary_ratio()) {
            Variant::Secondary
        } else {
            Variant::Primary
        }
    }
}

impl Default for SlotRules {
    fn default() -> Self {
        Self {
            cycle_length: 10,
            secondary_slots: BTreeSet::from([3, 7]),
        }
    }
}
