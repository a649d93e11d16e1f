/// Structured audit events for script invocations
/// Each event is a single JSON object logged under the `nschannel::audit` target,
/// so operators can route them separately from diagnostic logging.
use crate::kernel::signal::KillReport;
use chrono::{DateTime, Utc};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const AUDIT_TARGET: &str = "nschannel::audit";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditSeverity {
    High,
    Medium,
    Low,
}

/// Types of audit events emitted around an invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditEventType {
    ExecutionStart,
    ExecutionEnd,
    ForcedKill,
    StagingFailure,
}

impl AuditEventType {
    pub fn default_severity(&self) -> AuditSeverity {
        match self {
            AuditEventType::ExecutionStart => AuditSeverity::Low,
            AuditEventType::ExecutionEnd => AuditSeverity::Low,
            AuditEventType::StagingFailure => AuditSeverity::Medium,
            AuditEventType::ForcedKill => AuditSeverity::High,
        }
    }
}

/// Individual audit event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: String,
    pub event_type: AuditEventType,
    pub severity: AuditSeverity,
    pub timestamp: DateTime<Utc>,
    pub details: String,

    /// Invocation id, shared by every event of one `run_script` call
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invocation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_pid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wall_time_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kill_report: Option<KillReport>,
}

impl AuditEvent {
    pub fn new(event_type: AuditEventType, details: impl Into<String>) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            event_type,
            severity: event_type.default_severity(),
            timestamp: Utc::now(),
            details: details.into(),
            invocation_id: None,
            target_pid: None,
            command: None,
            package: None,
            response_code: None,
            wall_time_ms: None,
            kill_report: None,
        }
    }

    pub fn with_invocation_id(mut self, id: &str) -> Self {
        self.invocation_id = Some(id.to_string());
        self
    }

    pub fn with_target_pid(mut self, pid: Option<&str>) -> Self {
        self.target_pid = pid.map(str::to_string);
        self
    }

    pub fn with_command(mut self, command: &str) -> Self {
        self.command = Some(command.to_string());
        self
    }

    pub fn with_package(mut self, package: &str) -> Self {
        self.package = Some(package.to_string());
        self
    }

    pub fn with_response_code(mut self, code: i32) -> Self {
        self.response_code = Some(code);
        self
    }

    pub fn with_wall_time_ms(mut self, ms: u64) -> Self {
        self.wall_time_ms = Some(ms);
        self
    }

    pub fn with_kill_report(mut self, report: KillReport) -> Self {
        self.kill_report = Some(report);
        self
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            format!(
                "{{\"event_id\":\"{}\",\"serialization_error\":\"{}\"}}",
                self.event_id, e
            )
        })
    }
}

/// Log an audit event at a level matching its severity
pub fn log_audit_event(event: &AuditEvent) {
    let line = event.to_json();
    match event.severity {
        AuditSeverity::High => error!(target: AUDIT_TARGET, "{}", line),
        AuditSeverity::Medium => warn!(target: AUDIT_TARGET, "{}", line),
        AuditSeverity::Low => info!(target: AUDIT_TARGET, "{}", line),
    }
}

/// Convenience functions for invocation lifecycle events
pub mod events {
    use super::*;

    pub fn execution_start(invocation_id: &str, target_pid: Option<&str>, package: &str) {
        let event = AuditEvent::new(
            AuditEventType::ExecutionStart,
            format!("Running script package {}", package),
        )
        .with_invocation_id(invocation_id)
        .with_target_pid(target_pid)
        .with_package(package);
        log_audit_event(&event);
    }

    pub fn execution_end(invocation_id: &str, command: &str, code: i32, wall_time_ms: u64) {
        let event = AuditEvent::new(
            AuditEventType::ExecutionEnd,
            format!("Script finished with code {}", code),
        )
        .with_invocation_id(invocation_id)
        .with_command(command)
        .with_response_code(code)
        .with_wall_time_ms(wall_time_ms);
        log_audit_event(&event);
    }

    /// Deadline expired and the helper's process tree was killed
    pub fn forced_kill(command: &str, pid: i32, report: &KillReport) {
        let event = AuditEvent::new(
            AuditEventType::ForcedKill,
            format!(
                "Killed process tree of pid {} ({} descendants)",
                pid,
                report.descendants.len()
            ),
        )
        .with_command(command)
        .with_kill_report(report.clone());
        log_audit_event(&event);
    }

    pub fn staging_failure(invocation_id: &str, package: &str, reason: &str) {
        let event = AuditEvent::new(
            AuditEventType::StagingFailure,
            format!("Staging failed: {}", reason),
        )
        .with_invocation_id(invocation_id)
        .with_package(package);
        log_audit_event(&event);
    }
}
