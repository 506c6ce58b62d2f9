//! Maps GitHub's (status, conclusion) tuple to a single derived status.

use tenon_core::models::{ActionsRunResult, RawRunInfo, RunStatus, WorkflowRun};

/// Build the base result for a run. Counts and output streams are left
/// absent; the orchestrator fills them in after artifact parsing.
pub fn normalize_run(run: &WorkflowRun, timed_out: bool, running: bool) -> ActionsRunResult {
    let conclusion = run.conclusion.as_deref().map(str::to_ascii_lowercase);
    let status = if running || timed_out {
        RunStatus::Running
    } else {
        match conclusion.as_deref() {
            Some("success") => RunStatus::Passed,
            Some("failure" | "timed_out" | "cancelled") => RunStatus::Failed,
            Some(_) => RunStatus::Error,
            None => match run.status.as_str() {
                "queued" | "in_progress" => RunStatus::Running,
                _ => RunStatus::Error,
            },
        }
    };
    ActionsRunResult {
        status,
        run_id: run.id,
        conclusion: conclusion.clone(),
        tests_passed: None,
        tests_failed: None,
        tests_total: None,
        stdout: None,
        stderr: None,
        head_sha: run.head_sha.clone(),
        html_url: run.html_url.clone(),
        raw: RawRunInfo {
            status: run.status.clone(),
            conclusion,
            artifact_count: None,
            summary: None,
            artifact_error: None,
        },
        poll_after_ms: None,
    }
}
