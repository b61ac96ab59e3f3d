//! Audit logging for dataplane changes.
//!
//! Every create, modify and delete the agent pushes into the dataplane, every
//! resync pass, and daemon start and stop produce one [`AuditRecord`]. Records
//! are emitted through `tracing` under the `audit` target with the full record
//! attached as JSON, so they can be split from operational logs by target.
//!
//! The `*_log!` macros attach a `source` field naming the emitting component.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// What kind of change a record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditCategory {
    ResourceCreate,
    /// Changed in place or recreated
    ResourceModify,
    ResourceDelete,
    /// Agent init and shutdown
    SystemLifecycle,
    /// One resync pass, per family or for the whole agent
    Resync,
    /// Deferred on, or released by, a prerequisite
    Dependency,
}

impl AuditCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditCategory::ResourceCreate => "RESOURCE_CREATE",
            AuditCategory::ResourceModify => "RESOURCE_MODIFY",
            AuditCategory::ResourceDelete => "RESOURCE_DELETE",
            AuditCategory::SystemLifecycle => "SYSTEM_LIFECYCLE",
            AuditCategory::Resync => "RESYNC",
            AuditCategory::Dependency => "DEPENDENCY",
        }
    }
}

impl fmt::Display for AuditCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of an audited action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    Failure,
    /// Accepted but waiting on a prerequisite
    InProgress,
}

impl AuditOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditOutcome::Success => "success",
            AuditOutcome::Failure => "failure",
            AuditOutcome::InProgress => "in_progress",
        }
    }
}

impl fmt::Display for AuditOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One audited dataplane change or agent event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub at: DateTime<Utc>,
    pub category: AuditCategory,
    /// Emitting component, e.g. "InterfaceConfigurator"
    pub source: String,
    pub action: String,
    pub outcome: AuditOutcome,
    /// Logical resource name or key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_id: Option<String>,
    /// Resource family, e.g. "interface" or "sr_policy"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Shared by every record of one resync pass
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl AuditRecord {
    /// Starts an `InProgress` record stamped now.
    pub fn new(category: AuditCategory, source: &str, action: &str) -> Self {
        Self {
            at: Utc::now(),
            category,
            source: source.to_string(),
            action: action.to_string(),
            outcome: AuditOutcome::InProgress,
            object_id: None,
            object_type: None,
            details: None,
            error: None,
            correlation_id: None,
        }
    }

    pub fn with_outcome(self, outcome: AuditOutcome) -> Self {
        Self { outcome, ..self }
    }

    pub fn with_object_id(self, name: impl Into<String>) -> Self {
        Self {
            object_id: Some(name.into()),
            ..self
        }
    }

    pub fn with_object_type(self, family: &str) -> Self {
        Self {
            object_type: Some(family.to_string()),
            ..self
        }
    }

    pub fn with_details(self, details: serde_json::Value) -> Self {
        Self {
            details: Some(details),
            ..self
        }
    }

    /// Records the failure; the outcome becomes `Failure`.
    pub fn with_error(self, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            outcome: AuditOutcome::Failure,
            ..self
        }
    }

    /// `Success` for `Ok`, the error for `Err`.
    pub fn with_result<T, E: fmt::Display>(self, result: &Result<T, E>) -> Self {
        match result {
            Ok(_) => self.with_outcome(AuditOutcome::Success),
            Err(e) => self.with_error(e.to_string()),
        }
    }

    pub fn with_correlation_id(self, id: impl Into<String>) -> Self {
        Self {
            correlation_id: Some(id.into()),
            ..self
        }
    }

    pub fn to_json(&self) -> String {
        match serde_json::to_string(self) {
            Ok(json) => json,
            Err(e) => serde_json::json!({ "unserializable_audit_record": e.to_string() }).to_string(),
        }
    }

    /// Logs the record under the `audit` target. Failures go out at warn,
    /// successes at info and in-progress records at debug.
    pub fn emit(&self) {
        let object = self.object_id.as_deref().unwrap_or("-");
        let json = self.to_json();
        match self.outcome {
            AuditOutcome::Failure => tracing::warn!(
                target: "audit",
                source = %self.source,
                object,
                error = self.error.as_deref().unwrap_or_default(),
                record = %json,
                "{} {} failed",
                self.category,
                self.action
            ),
            AuditOutcome::Success => tracing::info!(
                target: "audit",
                source = %self.source,
                object,
                record = %json,
                "{} {}",
                self.category,
                self.action
            ),
            AuditOutcome::InProgress => tracing::debug!(
                target: "audit",
                source = %self.source,
                object,
                record = %json,
                "{} {} pending",
                self.category,
                self.action
            ),
        }
    }
}

/// Debug-level log with a `source` field.
///
/// ```ignore
/// debug_log!("StnConfigurator", rule = %key, "rule already present");
/// ```
#[macro_export]
macro_rules! debug_log {
    ($source:expr, $($arg:tt)*) => {
        tracing::debug!(
            source = $source,
            $($arg)*
        )
    };
}

/// Info-level log with a `source` field.
#[macro_export]
macro_rules! info_log {
    ($source:expr, $($arg:tt)*) => {
        tracing::info!(
            source = $source,
            $($arg)*
        )
    };
}

/// Warn-level log with a `source` field.
#[macro_export]
macro_rules! warn_log {
    ($source:expr, $($arg:tt)*) => {
        tracing::warn!(
            source = $source,
            $($arg)*
        )
    };
}

/// Error-level log with a `source` field.
#[macro_export]
macro_rules! error_log {
    ($source:expr, $($arg:tt)*) => {
        tracing::error!(
            source = $source,
            $($arg)*
        )
    };
}

/// Emits an [`AuditRecord`] through [`AuditRecord::emit`].
///
/// ```ignore
/// audit_log!(AuditRecord::new(AuditCategory::ResourceCreate, SOURCE, "configure")
///     .with_object_id("loop1")
///     .with_result(&result));
/// ```
#[macro_export]
macro_rules! audit_log {
    ($record:expr) => {
        $crate::audit::AuditRecord::emit(&$record)
    };
}

/// Installs a JSON subscriber. `RUST_LOG` overrides `log_level`.
pub fn init_logging(log_level: &str) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .json(),
        )
        .init();
}

/// Installs a human-readable subscriber for interactive use.
pub fn init_logging_pretty(log_level: &str) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(false)
                .with_file(true)
                .with_line_number(true)
                .pretty(),
        )
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_deferred_resource_record() {
        let record = AuditRecord::new(AuditCategory::Dependency, "StnConfigurator", "defer")
            .with_object_id("stn-iface-loop1")
            .with_object_type("stn_rule");
        assert_eq!(record.outcome, AuditOutcome::InProgress);
        assert_eq!(record.object_id.as_deref(), Some("stn-iface-loop1"));
        assert!(record.error.is_none());
    }

    #[test]
    fn test_result_sets_outcome() {
        let ok: Result<(), String> = Ok(());
        let record = AuditRecord::new(AuditCategory::ResourceModify, "NatConfigurator", "modify")
            .with_result(&ok);
        assert_eq!(record.outcome, AuditOutcome::Success);

        let failed: Result<(), String> =
            Err("stn_add_del_rule returned no such entry (-6)".to_string());
        let record = AuditRecord::new(AuditCategory::ResourceDelete, "StnConfigurator", "delete")
            .with_result(&failed);
        assert_eq!(record.outcome, AuditOutcome::Failure);
        assert!(record.error.unwrap().contains("stn_add_del_rule"));
    }

    #[test]
    fn test_resync_record_json() {
        let record = AuditRecord::new(AuditCategory::Resync, "InterfaceConfigurator", "resync")
            .with_outcome(AuditOutcome::Success)
            .with_correlation_id("interface-resync-1")
            .with_details(serde_json::json!({ "created": 2, "deleted": 2 }));

        let value: serde_json::Value = serde_json::from_str(&record.to_json()).unwrap();
        assert_eq!(value["category"], "RESYNC");
        assert_eq!(value["outcome"], "success");
        assert_eq!(value["details"]["created"], 2);
        assert_eq!(value["correlation_id"], "interface-resync-1");
        assert!(value.get("error").is_none());
        assert!(value.get("object_id").is_none());
    }

    #[test]
    fn test_names_match_serialized_form() {
        for category in [AuditCategory::ResourceCreate, AuditCategory::Dependency] {
            let json = serde_json::to_string(&category).unwrap();
            assert_eq!(json, format!("\"{}\"", category));
        }
        assert_eq!(AuditOutcome::InProgress.to_string(), "in_progress");
    }

    #[test]
    fn test_emit_without_subscriber() {
        let record = AuditRecord::new(AuditCategory::SystemLifecycle, "Agent", "shutdown")
            .with_outcome(AuditOutcome::Success);
        audit_log!(record);
        audit_log!(AuditRecord::new(AuditCategory::SystemLifecycle, "Agent", "init").with_error("boom"));
    }
}
