use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Store-assigned primary key of a policy.
pub type PolicyId = i64;

/// A named, authored control document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Policy {
    pub id: PolicyId,
    #[serde(rename = "policyName")]
    pub name: String,
    pub author: String,
    pub control_data: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Body of a create or update request, as decoded off the wire.
///
/// Every field is optional here so that a missing field surfaces as a
/// [`ValidationError`] instead of a decode failure.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyRequest {
    #[serde(default)]
    pub policy_name: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub control_data: Option<serde_json::Value>,
}

/// A request that passed validation. Store writes only accept this type.
#[derive(Clone, Debug, PartialEq)]
pub struct PolicyDraft {
    pub name: String,
    pub author: String,
    pub control_data: serde_json::Value,
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("{0} cannot be empty")]
    EmptyField(&'static str),
}

impl ValidationError {
    pub fn field(&self) -> &'static str {
        match self {
            Self::EmptyField(field) => field,
        }
    }
}

impl PolicyRequest {
    pub fn new(
        policy_name: impl Into<String>,
        author: impl Into<String>,
        control_data: serde_json::Value,
    ) -> Self {
        Self {
            policy_name: policy_name.into(),
            author: author.into(),
            control_data: Some(control_data),
        }
    }

    /// Check required fields in wire order and convert into a [`PolicyDraft`].
    /// An explicit JSON `null` control document counts as missing.
    pub fn validate(self) -> Result<PolicyDraft, ValidationError> {
        if self.policy_name.is_empty() {
            return Err(ValidationError::EmptyField("policyName"));
        }
        if self.author.is_empty() {
            return Err(ValidationError::EmptyField("author"));
        }
        let control_data = match self.control_data {
            Some(value) if !value.is_null() => value,
            _ => return Err(ValidationError::EmptyField("controlData")),
        };
        Ok(PolicyDraft {
            name: self.policy_name,
            author: self.author,
            control_data,
        })
    }
}
