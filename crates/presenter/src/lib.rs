//! Read-model for persisted test results. Redacts secrets, truncates long
//! streams per view, derives a display status, and precomputes the GitHub
//! URLs a UI needs.

use serde::Serialize;
use serde_json::{Map, Value};
use tenon_core::{
    models::SubmissionRecord,
    util::{redact, truncate_output},
};

/// Keys of a structured test output that pass through to callers; everything
/// else is dropped.
const OUTPUT_KEYS: [&str; 10] = [
    "passed", "failed", "total", "stdout", "stderr", "summary", "runId", "run_id", "conclusion",
    "timeout",
];

const KNOWN_STATUSES: [&str; 4] = ["passed", "failed", "timeout", "error"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum View {
    List,
    Detail,
}

impl View {
    fn max_output_chars(self) -> usize {
        match self {
            View::List => 4_000,
            View::Detail => 20_000,
        }
    }
}

/// Persisted `test_output` is one of absent, free text, or a JSON object.
/// Parsed once on entry; all three branches converge on the same view shape.
enum TestOutput {
    Absent,
    Text(String),
    Structured(Map<String, Value>),
}

impl TestOutput {
    fn parse(raw: Option<&str>) -> Self {
        let Some(raw) = raw else { return TestOutput::Absent };
        if raw.trim().is_empty() {
            return TestOutput::Absent;
        }
        match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(map)) => TestOutput::Structured(map),
            _ => TestOutput::Text(raw.to_string()),
        }
    }

    fn is_absent(&self) -> bool { matches!(self, TestOutput::Absent) }

    fn structured(&self) -> Option<&Map<String, Value>> {
        match self {
            TestOutput::Structured(map) => Some(map),
            _ => None,
        }
    }

    fn get_i64(&self, key: &str) -> Option<i64> {
        self.structured()?.get(key).and_then(Value::as_i64)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResultsView {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tests_passed: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tests_failed: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    pub stdout_truncated: bool,
    pub stderr_truncated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conclusion: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow_run_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diff_url: Option<String>,
    pub artifact_present: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_run_at: Option<String>,
    /// Whitelisted structured output; only populated on the detail view.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
}

/// Build the view for a persisted record. Returns `None` when the record has
/// never seen a test run: no counts, no output, no workflow run id, no commit
/// sha, and no last-run timestamp.
pub fn present(record: &SubmissionRecord, view: View) -> Option<TestResultsView> {
    let output = TestOutput::parse(record.test_output.as_deref());
    if record.tests_passed.is_none()
        && record.tests_failed.is_none()
        && output.is_absent()
        && record.workflow_run_id.is_none()
        && record.commit_sha.is_none()
        && record.last_run_at.is_none()
    {
        return None;
    }

    let max = view.max_output_chars();
    let (raw_stdout, raw_stderr) = match &output {
        TestOutput::Absent => (None, None),
        TestOutput::Text(text) => (Some(text.clone()), None),
        TestOutput::Structured(map) => (
            map.get("stdout").and_then(Value::as_str).map(str::to_string),
            map.get("stderr").and_then(Value::as_str).map(str::to_string),
        ),
    };
    let (stdout, stdout_truncated) = sanitize(raw_stdout, max);
    let (stderr, stderr_truncated) = sanitize(raw_stderr, max);

    let tests_passed = record.tests_passed.or_else(|| output.get_i64("passed"));
    let tests_failed = record.tests_failed.or_else(|| output.get_i64("failed"));
    let run_id = record.workflow_run_id.or_else(|| {
        let map = output.structured()?;
        map.get("run_id").or_else(|| map.get("runId")).and_then(Value::as_u64)
    });

    let commit_url = match (&record.code_repo_path, &record.commit_sha) {
        (Some(repo), Some(sha)) => Some(format!("https://github.com/{repo}/commit/{sha}")),
        _ => None,
    };
    let workflow_run_url = record
        .code_repo_path
        .as_ref()
        .zip(run_id)
        .map(|(repo, id)| format!("https://github.com/{repo}/actions/runs/{id}"));

    Some(TestResultsView {
        status: derive_status(record, &output),
        tests_passed,
        tests_failed,
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
        run_id,
        conclusion: record.workflow_run_conclusion.clone(),
        commit_url,
        workflow_run_url,
        diff_url: diff_url(record),
        artifact_present: !output.is_absent()
            || record.tests_passed.is_some()
            || record.tests_failed.is_some(),
        artifact_error_code: artifact_error_code(&output),
        last_run_at: record.last_run_at.clone(),
        output: match view {
            View::Detail => output.structured().map(|map| filter_output(map, max)),
            View::List => None,
        },
    })
}

fn derive_status(record: &SubmissionRecord, output: &TestOutput) -> Option<String> {
    if record.tests_passed.is_none() && record.tests_failed.is_none() && output.is_absent() {
        return None;
    }
    let timed_out = output
        .structured()
        .and_then(|m| m.get("timeout"))
        .and_then(Value::as_bool)
        .unwrap_or(false)
        || record.workflow_run_conclusion.as_deref() == Some("timed_out");
    if timed_out {
        return Some("timeout".to_string());
    }
    if let Some(status) = output.structured().and_then(|m| m.get("status")).and_then(Value::as_str)
    {
        if KNOWN_STATUSES.contains(&status) {
            return Some(status.to_string());
        }
    }
    let failed = record.tests_failed.or_else(|| output.get_i64("failed"));
    let passed = record.tests_passed.or_else(|| output.get_i64("passed"));
    if failed.is_some_and(|n| n > 0) {
        Some("failed".to_string())
    } else if passed.is_some() {
        Some("passed".to_string())
    } else {
        Some("unknown".to_string())
    }
}

/// Redact secrets, then truncate to the view limit. Order matters: a token
/// must never survive by straddling the truncation boundary.
fn sanitize(text: Option<String>, max: usize) -> (Option<String>, bool) {
    match text {
        Some(text) => {
            let redacted = redact(&text);
            let (out, truncated) = truncate_output(&redacted, max);
            (Some(out), truncated)
        }
        None => (None, false),
    }
}

fn artifact_error_code(output: &TestOutput) -> Option<String> {
    let map = output.structured()?;
    let code = map
        .get("artifact_error")
        .or_else(|| map.get("raw").and_then(|raw| raw.get("artifact_error")))
        .and_then(Value::as_str)?;
    Some(code.to_ascii_lowercase())
}

fn diff_url(record: &SubmissionRecord) -> Option<String> {
    let repo = record.code_repo_path.as_deref()?;
    let raw = record.diff_summary_json.as_deref()?;
    let value: Value = match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(e) => {
            tracing::debug!("Ignoring unparseable diff summary: {}", e);
            return None;
        }
    };
    let base = value.get("base")?.as_str()?;
    let head = value.get("head")?.as_str()?;
    Some(format!("https://github.com/{repo}/compare/{base}...{head}"))
}

fn filter_output(map: &Map<String, Value>, max: usize) -> Value {
    let mut filtered = Map::new();
    for key in OUTPUT_KEYS {
        let Some(value) = map.get(key) else { continue };
        let value = match (key, value) {
            ("stdout" | "stderr", Value::String(s)) => {
                let redacted = redact(s);
                let (text, _) = truncate_output(&redacted, max);
                Value::String(text)
            }
            _ => value.clone(),
        };
        filtered.insert(key.to_string(), value);
    }
    Value::Object(filtered)
}
