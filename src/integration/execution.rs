//! Execution records: status machine, monotonic progress and ordered logs.

use std::fmt;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::failure::Failure;

use super::errors::IntegrationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    Completed,
    Failed,
    Paused,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Paused => "paused",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(ExecutionStatus::Running),
            "completed" => Some(ExecutionStatus::Completed),
            "failed" => Some(ExecutionStatus::Failed),
            "paused" => Some(ExecutionStatus::Paused),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecutionStatus::Completed | ExecutionStatus::Failed)
    }

    /// `running → completed | failed | paused`, `paused → running | failed`.
    pub fn can_transition_to(&self, next: ExecutionStatus) -> bool {
        use ExecutionStatus::*;
        matches!(
            (self, next),
            (Running, Completed) | (Running, Failed) | (Running, Paused) | (Paused, Running) | (Paused, Failed)
        )
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: String,
    pub step: String,
    pub level: LogLevel,
    pub message: String,
}

/// Tracked state of one workflow run or composite operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    pub id: String,
    /// Workflow or composite operation name.
    pub workflow_id: String,
    pub status: ExecutionStatus,
    pub current_step: Option<String>,
    /// 0 to 100, never decreases.
    pub progress: f32,
    pub start_time: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Failure>,
    pub logs: Vec<LogEntry>,
}

impl ExecutionRecord {
    pub fn new(workflow_id: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            workflow_id: workflow_id.into(),
            status: ExecutionStatus::Running,
            current_step: None,
            progress: 0.0,
            start_time: Utc::now().to_rfc3339(),
            end_time: None,
            result: None,
            error: None,
            logs: Vec::new(),
        }
    }

    pub fn transition(&mut self, next: ExecutionStatus) -> Result<(), IntegrationError> {
        if !self.status.can_transition_to(next) {
            return Err(IntegrationError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        if next.is_terminal() {
            self.end_time = Some(Utc::now().to_rfc3339());
        }
        Ok(())
    }

    /// Raise progress; lower or non-finite values are ignored.
    pub fn set_progress(&mut self, progress: f32) {
        if progress.is_finite() {
            self.progress = self.progress.max(progress.clamp(0.0, 100.0));
        }
    }

    pub fn log(&mut self, step: impl Into<String>, level: LogLevel, message: impl Into<String>) {
        self.logs.push(LogEntry {
            timestamp: Utc::now().to_rfc3339(),
            step: step.into(),
            level,
            message: message.into(),
        });
    }

    pub fn step_started(&mut self, step: &str) {
        self.current_step = Some(step.to_string());
        self.log(step, LogLevel::Info, format!("starting {step}"));
    }

    pub fn step_finished(&mut self, step: &str, success: bool, message: impl Into<String>) {
        let level = if success { LogLevel::Success } else { LogLevel::Error };
        self.log(step, level, message);
    }

    pub fn complete(&mut self, result: serde_json::Value) -> Result<(), IntegrationError> {
        self.transition(ExecutionStatus::Completed)?;
        self.set_progress(100.0);
        self.result = Some(result);
        Ok(())
    }

    pub fn fail(&mut self, error: Failure) -> Result<(), IntegrationError> {
        self.transition(ExecutionStatus::Failed)?;
        self.error = Some(error);
        Ok(())
    }

    pub fn pause(&mut self) -> Result<(), IntegrationError> {
        self.transition(ExecutionStatus::Paused)?;
        let step = self.current_step.clone().unwrap_or_default();
        self.log(step, LogLevel::Warning, "paused");
        Ok(())
    }

    pub fn resume(&mut self) -> Result<(), IntegrationError> {
        if self.status != ExecutionStatus::Paused {
            return Err(IntegrationError::InvalidTransition {
                from: self.status,
                to: ExecutionStatus::Running,
            });
        }
        self.transition(ExecutionStatus::Running)?;
        let step = self.current_step.clone().unwrap_or_default();
        self.log(step, LogLevel::Info, "resumed");
        Ok(())
    }
}
