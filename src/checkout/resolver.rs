//! Checkout destination table

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::checkout::url::{append_attribution, Attribution};
use crate::cycle::rules::Variant;
use crate::error::SplitError;

/// Billing plan selected by the visitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Plan {
    /// Yearly billing
    Annual,
    /// Monthly billing
    Monthly,
}

impl Plan {
    /// Lowercase label used on the wire.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Annual => "annual",
            Self::Monthly => "monthly",
        }
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Plan {
    type Err = SplitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "annual" => Ok(Self::Annual),
            "monthly" => Ok(Self::Monthly),
            _ => Err(SplitError::InvalidPlan(s.to_string())),
        }
    }
}

/// Base URLs for one variant, per plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanUrls {
    /// Checkout for the annual plan
    pub annual: String,
    /// Checkout for the monthly plan
    pub monthly: String,
}

impl PlanUrls {
    /// URL for `plan`.
    #[must_use]
    pub fn get(&self, plan: Plan) -> &str {
        match plan {
            Plan::Annual => &self.annual,
            Plan::Monthly => &self.monthly,
        }
    }
}

/// Maps `(variant, plan)` to a checkout URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutResolver {
    /// Destinations for the primary variant
    pub primary: PlanUrls,
    /// Destinations for the secondary variant
    pub secondary: PlanUrls,
}

impl CheckoutResolver {
    /// Base URL for a decision, without attribution.
    #[must_use]
    pub fn base_url(&self, variant: Variant, plan: Plan) -> &str {
        match variant {
            Variant::Primary => self.primary.get(plan),
            Variant::Secondary => self.secondary.get(plan),
        }
    }

    /// Full redirect URL for a decision, with attribution appended.
    #[must_use]
    pub fn resolve(&self, variant: Variant, plan: Plan, attribution: &Attribution) -> String {
        append_attribution(self.base_url(variant, plan), attribution)
    }

    /// Every `(variant, plan, url)` entry.
    #[must_use]
    pub fn entries(&self) -> Vec<(Variant, Plan, &str)> {
        let mut entries = Vec::with_capacity(4);
        for variant in [Variant::Primary, Variant::Secondary] {
            for plan in [Plan::Annual, Plan::Monthly] {
                entries.push((variant, plan, self.base_url(variant, plan)));
            }
        }
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> CheckoutResolver {
        CheckoutResolver {
            primary: PlanUrls {
                annual: "https://primary.example.com/annual".to_string(),
                monthly: "https://primary.example.com/monthly".to_string(),
            },
            secondary: PlanUrls {
                annual: "https://secondary.example.com/c?plan=annual".to_string(),
                monthly: "https://secondary.example.com/c?plan=monthly".to_string(),
            },
        }
    }

    #[test]
    fn test_base_url_table() {
        let r = resolver();
        assert_eq!(
            r.base_url(Variant::Primary, Plan::Annual),
            "https://primary.example.com/annual"
        );
        assert_eq!(
            r.base_url(Variant::Primary, Plan::Monthly),
            "https://primary.example.com/monthly"
        );
        assert_eq!(
            r.base_url(Variant::Secondary, Plan::Annual),
            "https://secondary.example.com/c?plan=annual"
        );
        assert_eq!(
            r.base_url(Variant::Secondary, Plan::Monthly),
            "https://secondary.example.com/c?plan=monthly"
        );
    }

    #[test]
    fn test_resolve_appends_attribution() {
        let mut attribution = Attribution::new();
        attribution.insert("utm_source".to_string(), "facebook".to_string());
        attribution.insert("utm_content".to_string(), String::new());

        assert_eq!(
            resolver().resolve(Variant::Secondary, Plan::Monthly, &attribution),
            "https://secondary.example.com/c?plan=monthly&utm_source=facebook"
        );
    }

    #[test]
    fn test_entries_cover_table() {
        assert_eq!(resolver().entries().len(), 4);
    }

    #[test]
    fn test_plan_parsing() {
        assert_eq!("annual".parse::<Plan>().unwrap(), Plan::Annual);
        assert_eq!(" Monthly ".parse::<Plan>().unwrap(), Plan::Monthly);
        let err = "weekly".parse::<Plan>().unwrap_err();
        assert!(matches!(err, SplitError::InvalidPlan(ref p) if p == "weekly"));
    }
}
