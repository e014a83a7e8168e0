//! Structured audit trail of state commits, rollbacks, hardware failures and
//! lifecycle events.
//!
//! Records are JSON documents emitted on the `audit` log target, so they can
//! be filtered apart from operational logging (`RUST_LOG=audit=info`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditCategory {
    /// Client route or label changes and switch settings.
    ConfigurationChange,
    StateCommit,
    StateRollback,
    HardwareFailure,
    SystemLifecycle,
    WarmBoot,
    AdminAction,
}

impl fmt::Display for AuditCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AuditCategory::ConfigurationChange => "CONFIGURATION_CHANGE",
            AuditCategory::StateCommit => "STATE_COMMIT",
            AuditCategory::StateRollback => "STATE_ROLLBACK",
            AuditCategory::HardwareFailure => "HARDWARE_FAILURE",
            AuditCategory::SystemLifecycle => "SYSTEM_LIFECYCLE",
            AuditCategory::WarmBoot => "WARM_BOOT",
            AuditCategory::AdminAction => "ADMIN_ACTION",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    Failure,
    InProgress,
    /// Rejected before anything changed.
    Denied,
}

impl fmt::Display for AuditOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AuditOutcome::Success => "success",
            AuditOutcome::Failure => "failure",
            AuditOutcome::InProgress => "in_progress",
            AuditOutcome::Denied => "denied",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub timestamp: DateTime<Utc>,
    pub category: AuditCategory,
    /// Component that produced the record.
    pub source: String,
    pub action: String,
    pub outcome: AuditOutcome,
    /// Transaction name, VRF, label or file the record is about.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AuditRecord {
    /// New record stamped now, with outcome `InProgress` until set.
    pub fn new(category: AuditCategory, source: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            category,
            source: source.into(),
            action: action.into(),
            outcome: AuditOutcome::InProgress,
            object_id: None,
            generation: None,
            details: None,
            error: None,
        }
    }

    pub fn with_outcome(mut self, outcome: AuditOutcome) -> Self {
        self.outcome = outcome;
        self
    }

    pub fn with_object_id(mut self, id: impl Into<String>) -> Self {
        self.object_id = Some(id.into());
        self
    }

    pub fn with_generation(mut self, generation: u64) -> Self {
        self.generation = Some(generation);
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Attaches an error and marks the record failed.
    pub fn with_error(mut self, error: impl fmt::Display) -> Self {
        self.error = Some(error.to_string());
        self.outcome = AuditOutcome::Failure;
        self
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self)
            .unwrap_or_else(|e| format!(r#"{{"error":"serialization_failed","message":"{}"}}"#, e))
    }
}

/// Emits an [`AuditRecord`] on the `audit` target. Successes log at info,
/// in-progress records at debug, failures and denials at warn.
#[macro_export]
macro_rules! audit_log {
    ($record:expr) => {{
        let record = $record;
        match record.outcome {
            $crate::audit::AuditOutcome::Success => {
                ::tracing::info!(
                    target: "audit",
                    category = %record.category,
                    action = %record.action,
                    "AUDIT {}",
                    record.to_json()
                );
            }
            $crate::audit::AuditOutcome::InProgress => {
                ::tracing::debug!(
                    target: "audit",
                    category = %record.category,
                    action = %record.action,
                    "AUDIT {}",
                    record.to_json()
                );
            }
            $crate::audit::AuditOutcome::Failure | $crate::audit::AuditOutcome::Denied => {
                ::tracing::warn!(
                    target: "audit",
                    category = %record.category,
                    action = %record.action,
                    error = record.error.as_deref().unwrap_or(""),
                    "AUDIT {}",
                    record.to_json()
                );
            }
        }
    }};
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_record_builder() {
        let record = AuditRecord::new(AuditCategory::StateCommit, "TransactionCoordinator", "add_unicast_routes")
            .with_outcome(AuditOutcome::Success)
            .with_object_id("vrf0")
            .with_generation(7);

        assert_eq!(record.category, AuditCategory::StateCommit);
        assert_eq!(record.outcome, AuditOutcome::Success);
        assert_eq!(record.object_id.as_deref(), Some("vrf0"));
        assert_eq!(record.generation, Some(7));
    }

    #[test]
    fn test_error_marks_failure() {
        let record = AuditRecord::new(AuditCategory::HardwareFailure, "TransactionCoordinator", "apply")
            .with_error("2 route add/update failures");
        assert_eq!(record.outcome, AuditOutcome::Failure);
        assert_eq!(record.error.as_deref(), Some("2 route add/update failures"));
    }

    #[test]
    fn test_json_shape() {
        let record = AuditRecord::new(AuditCategory::WarmBoot, "main", "restore_snapshot")
            .with_outcome(AuditOutcome::Success)
            .with_details(serde_json::json!({ "routes": 12 }));
        let json: serde_json::Value = serde_json::from_str(&record.to_json()).unwrap();
        assert_eq!(json["category"], "WARM_BOOT");
        assert_eq!(json["outcome"], "success");
        assert_eq!(json["details"]["routes"], 12);
        assert!(json.get("error").is_none());
    }

    #[test]
    fn test_category_display() {
        assert_eq!(AuditCategory::StateRollback.to_string(), "STATE_ROLLBACK");
        assert_eq!(AuditOutcome::InProgress.to_string(), "in_progress");
    }
}
