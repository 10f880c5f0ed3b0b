use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::policy::PolicyId;

/// What kind of mutation a [`Notification`] describes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotificationKind {
    #[serde(rename = "policy.created")]
    PolicyCreated,
    #[serde(rename = "policy.updated")]
    PolicyUpdated,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PolicyCreated => "policy.created",
            Self::PolicyUpdated => "policy.updated",
        }
    }

    fn message(&self) -> &'static str {
        match self {
            Self::PolicyCreated => "Create Policy has been triggered",
            Self::PolicyUpdated => "Update Policy has been triggered",
        }
    }
}

/// Change notification pushed to every subscriber after a committed mutation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub policy_id: PolicyId,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl Notification {
    pub fn new(kind: NotificationKind, policy_id: PolicyId) -> Self {
        Self {
            kind,
            policy_id,
            message: kind.message().to_string(),
            timestamp: Utc::now(),
        }
    }

    pub fn created(policy_id: PolicyId) -> Self {
        Self::new(NotificationKind::PolicyCreated, policy_id)
    }

    pub fn updated(policy_id: PolicyId) -> Self {
        Self::new(NotificationKind::PolicyUpdated, policy_id)
    }
}
