use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;

/// A workflow run as reported by the GitHub REST API. Read-only; constructed
/// per request from upstream JSON.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct WorkflowRun {
    pub id: u64,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub conclusion: Option<String>,
    #[serde(default)]
    pub head_sha: Option<String>,
    #[serde(default)]
    pub html_url: Option<String>,
    #[serde(default)]
    pub event: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl WorkflowRun {
    /// No further polling is useful once the conclusion is set or the
    /// upstream status reads "completed".
    pub fn is_terminal(&self) -> bool { self.conclusion.is_some() || self.status == "completed" }
}

/// An artifact descriptor from the run's artifact listing.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Artifact {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub expired: bool,
}

/// Normalized test results decoded from a run artifact.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ParsedTestResults {
    pub passed: u64,
    pub failed: u64,
    pub total: u64,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub summary: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Passed,
    Failed,
    Running,
    Error,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Passed => "passed",
            Self::Failed => "failed",
            Self::Running => "running",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// Upstream state carried through alongside the derived status.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct RawRunInfo {
    pub status: String,
    pub conclusion: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_error: Option<String>,
}

/// The orchestrator's canonical output for a single workflow run.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ActionsRunResult {
    pub status: RunStatus,
    pub run_id: u64,
    pub conclusion: Option<String>,
    pub tests_passed: Option<u64>,
    pub tests_failed: Option<u64>,
    pub tests_total: Option<u64>,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub head_sha: Option<String>,
    pub html_url: Option<String>,
    pub raw: RawRunInfo,
    /// Hint for the next poll, in milliseconds. Present iff still running.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poll_after_ms: Option<u64>,
}

impl ActionsRunResult {
    pub fn is_terminal(&self) -> bool {
        self.conclusion.is_some() || self.status != RunStatus::Running
    }
}

/// A persisted submission record as read back from the durable store. The
/// presenter consumes these as plain data and never mutates them.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SubmissionRecord {
    pub tests_passed: Option<i64>,
    pub tests_failed: Option<i64>,
    pub test_output: Option<String>,
    pub diff_summary_json: Option<String>,
    pub code_repo_path: Option<String>,
    pub commit_sha: Option<String>,
    pub workflow_run_id: Option<u64>,
    pub workflow_run_status: Option<String>,
    pub workflow_run_conclusion: Option<String>,
    pub last_run_at: Option<String>,
}
