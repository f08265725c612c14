use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::failure::{FailureEvent, FailureType};

/// Immutable outcome of one recovery attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryRecord {
    pub timestamp: DateTime<Utc>,
    pub failure_id: String,
    pub failure_type: FailureType,
    pub success: bool,
    /// Copy of the event's resolution steps at the time of the attempt
    pub steps: Vec<String>,
    pub affected_services: BTreeSet<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RecoveryRecord {
    pub fn from_event(event: &FailureEvent, success: bool, error: Option<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            failure_id: event.id().to_string(),
            failure_type: event.failure_type(),
            success,
            steps: event.resolution_steps().to_vec(),
            affected_services: event.affected_services().clone(),
            error,
        }
    }
}
