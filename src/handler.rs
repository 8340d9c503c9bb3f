//! Checkout request handling
//!
//! Wire contract around [`CycleAssignmentService::assign`]: a JSON request
//! with `plan`, `utmParams` and `quizData`, answered with either a success
//! body carrying the checkout URL or a failure body with an error message.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::checkout::{Attribution, Plan};
use crate::cycle::rules::Variant;
use crate::cycle::service::{AssignmentResult, CycleAssignmentService, CycleInfo};
use crate::error::{Result, SplitError};
use crate::store::ConfigStore;

/// Incoming checkout request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckoutRequest {
    /// `annual` or `monthly`; required
    #[serde(
        default,
        deserialize_with = "plan_as_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub plan: Option<String>,
    /// Attribution parameters to carry to the checkout URL
    #[serde(default, rename = "utmParams", deserialize_with = "null_as_default")]
    pub utm_params: BTreeMap<String, Value>,
    /// Quiz answers; recorded but not used for routing
    #[serde(default, rename = "quizData", deserialize_with = "null_as_default")]
    pub quiz_data: serde_json::Map<String, Value>,
}

/// Keep a non-string `plan` as its JSON text so it fails plan validation
/// instead of body parsing. `null` reads as absent.
fn plan_as_text<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s),
        Some(other) => Some(other.to_string()),
    })
}

fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl CheckoutRequest {
    /// Parse a request body.
    pub fn from_json(body: &str) -> serde_json::Result<Self> {
        serde_json::from_str(body)
    }

    /// Parse a request body, reporting a malformed body as a client error.
    pub fn parse(body: &str) -> Result<Self> {
        Self::from_json(body).map_err(|e| SplitError::InvalidRequest(e.to_string()))
    }

    /// Validated plan selector.
    pub fn plan(&self) -> Result<Plan> {
        match self.plan.as_deref() {
            Some(raw) => raw.parse(),
            None => Err(SplitError::InvalidPlan(String::new())),
        }
    }

    /// Attribution parameters as strings.
    ///
    /// Numbers and booleans are rendered as text; nulls, arrays and objects
    /// are dropped.
    #[must_use]
    pub fn attribution(&self) -> Attribution {
        self.utm_params
            .iter()
            .filter_map(|(key, value)| {
                let text = match value {
                    Value::String(s) => s.clone(),
                    Value::Number(n) => n.to_string(),
                    Value::Bool(b) => b.to_string(),
                    Value::Null | Value::Array(_) | Value::Object(_) => return None,
                };
                Some((key.clone(), text))
            })
            .collect()
    }
}

/// Successful response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutSuccess {
    /// Always `true`
    pub success: bool,
    /// Chosen destination
    pub checkout_variant: Variant,
    /// Plan echoed back
    pub checkout_plan: Plan,
    /// Redirect target
    pub checkout_url: String,
    /// Version tag, suffixed for fallback assignments
    pub split_version: String,
    /// Rotation position for coordinated assignments
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cycle_info: Option<CycleInfo>,
}

/// Failure response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutFailure {
    /// Always `false`
    pub success: bool,
    /// Short description
    pub error: String,
    /// Underlying cause
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Response body for a checkout request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CheckoutResponse {
    /// Assignment made
    Success(CheckoutSuccess),
    /// Request rejected or assignment failed
    Failure(CheckoutFailure),
}

impl CheckoutResponse {
    /// Build the response for an assignment outcome.
    #[must_use]
    pub fn from_outcome(outcome: &Result<AssignmentResult>) -> Self {
        match outcome {
            Ok(result) => Self::Success(CheckoutSuccess {
                success: true,
                checkout_variant: result.variant,
                checkout_plan: result.plan,
                checkout_url: result.resolved_url.clone(),
                split_version: result.split_version.clone(),
                cycle_info: result.cycle_info,
            }),
            Err(err) => Self::failure(err),
        }
    }

    /// Failure body for `err`.
    #[must_use]
    pub fn failure(err: &SplitError) -> Self {
        let error = match err {
            SplitError::InvalidPlan(_) => "Invalid or missing plan",
            SplitError::InvalidRequest(_) => "Invalid request body",
            _ => "Checkout assignment failed",
        };
        Self::Failure(CheckoutFailure {
            success: false,
            error: error.to_string(),
            details: Some(err.to_string()),
        })
    }

    /// Whether this is a success body.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

/// Validate a request and run the assignment.
///
/// The plan is checked before the store is touched.
pub async fn process_checkout<S: ConfigStore>(
    service: &CycleAssignmentService<S>,
    request: &CheckoutRequest,
) -> Result<AssignmentResult> {
    let plan = request.plan()?;
    service.assign(plan, &request.attribution()).await
}

/// Validate, assign and render the response body.
pub async fn handle_checkout<S: ConfigStore>(
    service: &CycleAssignmentService<S>,
    request: &CheckoutRequest,
) -> CheckoutResponse {
    CheckoutResponse::from_outcome(&process_checkout(service, request).await)
}

/// Parse a raw body, then validate, assign and render the response body.
///
/// A body that is not a request object gets a failure body too.
pub async fn handle_checkout_body<S: ConfigStore>(
    service: &CycleAssignmentService<S>,
    body: &str,
) -> CheckoutResponse {
    match CheckoutRequest::parse(body) {
        Ok(request) => handle_checkout(service, &request).await,
        Err(err) => CheckoutResponse::failure(&err),
    }
}
