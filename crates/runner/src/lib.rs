//! Dispatches CI workflows, tracks the resulting run to completion, and
//! resolves test-result artifacts into a normalized outcome.

pub mod cache;
pub mod normalize;

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use anyhow::{bail, Context, Result};
use serde_json::{Map, Value};
use tenon_core::{
    config::Config,
    models::{ActionsRunResult, Artifact, RunStatus, WorkflowRun},
};
use tenon_github::{artifact::parse_artifact_zip, ActionsApi, DEFAULT_RUNS_PER_PAGE};
use time::OffsetDateTime;
use tokio::{sync::Mutex, time::sleep};

use crate::{
    cache::{ArtifactEntry, ArtifactKey, RunCache, RunKey},
    normalize::normalize_run,
};

/// Tolerance subtracted from the dispatch timestamp when matching candidate
/// runs; absorbs clock skew between this host and GitHub.
const DISPATCH_SKEW: Duration = Duration::from_secs(10);

/// Upper bound on the poll-after hint handed to UI pollers.
const MAX_POLL_AFTER_MS: u64 = 15_000;

pub const ARTIFACT_MISSING: &str = "artifact_missing";
pub const ARTIFACT_UNAVAILABLE: &str = "artifact_unavailable";
pub const ARTIFACT_DOWNLOAD_FAILED: &str = "artifact_download_failed";
pub const ARTIFACT_CORRUPT: &str = "artifact_corrupt";

pub struct Orchestrator {
    api: Arc<dyn ActionsApi>,
    workflow_fallbacks: Vec<String>,
    artifact_namespace: String,
    artifact_names: Vec<String>,
    poll_interval: Duration,
    poll_interval_ms: u64,
    max_poll: Duration,
    cache: Mutex<RunCache>,
}

impl Orchestrator {
    pub fn new(api: Arc<dyn ActionsApi>, config: &Config) -> Self {
        Self {
            api,
            workflow_fallbacks: config.github.workflow_fallbacks(),
            artifact_namespace: config.actions.artifact_namespace.clone(),
            artifact_names: config
                .actions
                .artifact_names()
                .into_iter()
                .map(str::to_string)
                .collect(),
            poll_interval: config.actions.poll_interval(),
            poll_interval_ms: config.actions.poll_interval_ms(),
            max_poll: config.actions.max_poll(),
            cache: Mutex::new(RunCache::new(config.actions.cache_capacity)),
        }
    }

    /// Dispatch the CI workflow on `git_ref`, identify the resulting run, and
    /// poll it to completion. On deadline with a known but unfinished run,
    /// returns a running result with a poll-after hint rather than failing.
    pub async fn dispatch_and_wait(
        &self,
        repo: &str,
        git_ref: &str,
        inputs: Option<Value>,
    ) -> Result<ActionsRunResult> {
        let inputs = inputs.unwrap_or_else(|| Value::Object(Map::new()));
        let workflow_file = self.dispatch_workflow(repo, git_ref, &inputs).await?;
        let dispatched_at = OffsetDateTime::now_utc();
        let deadline = Instant::now() + self.max_poll;
        let cutoff = dispatched_at - DISPATCH_SKEW;

        let mut candidate: Option<WorkflowRun> = None;
        loop {
            // Once a candidate is identified its id stays pinned; later
            // dispatches for the same branch cannot steal the slot.
            match &candidate {
                Some(run) => {
                    let refreshed = self
                        .api
                        .get_workflow_run(repo, run.id)
                        .await
                        .context("Failed to fetch workflow run")?;
                    candidate = Some(refreshed);
                }
                None => {
                    let runs = self
                        .api
                        .list_workflow_runs(repo, &workflow_file, git_ref, DEFAULT_RUNS_PER_PAGE)
                        .await
                        .context("Failed to list workflow runs")?;
                    candidate = runs
                        .into_iter()
                        .find(|r| r.event == "workflow_dispatch" && r.created_at >= cutoff);
                    if let Some(run) = &candidate {
                        tracing::debug!("Identified workflow run {} for {}", run.id, repo);
                    }
                }
            }

            if let Some(run) = &candidate {
                if run.is_terminal() {
                    return self.build_result(repo, run.clone()).await;
                }
                let key = (repo.to_string(), run.id);
                // A non-terminal run is running no matter what upstream calls
                // its status ("waiting", "requested", "pending", ...)
                let mut result = normalize_run(run, false, true);
                if Instant::now() >= deadline {
                    tracing::warn!(
                        "Workflow run {} for {} still not finished after {:?}",
                        run.id,
                        repo,
                        self.max_poll
                    );
                    self.store_with_backoff(key, &mut result).await;
                    return Ok(result);
                }
                self.store_with_backoff(key, &mut result).await;
            } else if Instant::now() >= deadline {
                bail!("No workflow run found for {repo} after dispatching {workflow_file}");
            }

            sleep(self.poll_interval).await;
        }
    }

    /// Refresh a run by id. A cached terminal result is returned as-is.
    pub async fn fetch_run_result(&self, repo: &str, run_id: u64) -> Result<ActionsRunResult> {
        let key = (repo.to_string(), run_id);
        if let Some(result) = self.cache.lock().await.get_run(&key) {
            if result.is_terminal() {
                return Ok(result);
            }
        }
        let run = self
            .api
            .get_workflow_run(repo, run_id)
            .await
            .context("Failed to fetch workflow run")?;
        if run.is_terminal() {
            self.build_result(repo, run).await
        } else {
            let mut result = normalize_run(&run, false, true);
            self.store_with_backoff(key, &mut result).await;
            Ok(result)
        }
    }

    /// Cheap cache read for pollers; never touches the network.
    pub async fn cached_result(&self, repo: &str, run_id: u64) -> Option<ActionsRunResult> {
        self.cache.lock().await.get_run(&(repo.to_string(), run_id))
    }

    /// Try each fallback workflow filename in order. Only a 404 moves on to
    /// the next; any other upstream error aborts the dispatch.
    async fn dispatch_workflow(&self, repo: &str, git_ref: &str, inputs: &Value) -> Result<String> {
        let preferred = self.workflow_fallbacks.first().context("No workflow files configured")?;
        let last = self.workflow_fallbacks.len() - 1;
        for (i, file) in self.workflow_fallbacks.iter().enumerate() {
            match self.api.trigger_workflow_dispatch(repo, file, git_ref, inputs).await {
                Ok(()) => {
                    if i > 0 {
                        tracing::warn!(
                            "Workflow {} not found in {}, dispatched fallback {}",
                            preferred,
                            repo,
                            file
                        );
                    }
                    return Ok(file.clone());
                }
                Err(e) if e.is_not_found() && i < last => {
                    tracing::debug!("Workflow {} not found in {}, trying next", file, repo);
                }
                Err(e) => return Err(e).context("Failed to dispatch workflow"),
            }
        }
        bail!("Failed to dispatch workflow for {repo}: no workflow file found")
    }

    /// Normalize a terminal run and enrich it with parsed artifact content.
    async fn build_result(&self, repo: &str, run: WorkflowRun) -> Result<ActionsRunResult> {
        let mut result = normalize_run(&run, false, false);
        let key: RunKey = (repo.to_string(), run.id);

        // Take the lock in its own statement so the guard drops before the
        // cache is locked again below
        let cached = self.cache.lock().await.get_artifact_list(&key);
        let list = match cached {
            Some(list) => list,
            None => {
                let list = self
                    .api
                    .list_artifacts(repo, run.id)
                    .await
                    .context("Failed to list artifacts")?;
                self.cache.lock().await.store_artifact_list(key.clone(), list.clone());
                list
            }
        };
        result.raw.artifact_count = Some(list.len());
        tracing::debug!("Run {} ({} artifacts)", run.id, list.len());

        let active: Vec<Artifact> = list.into_iter().filter(|a| !a.expired).collect();
        let mut parsed = None;
        let mut last_error: Option<String> = None;
        if active.is_empty() {
            last_error = Some(ARTIFACT_MISSING.to_string());
        } else {
            let (preferred, others): (Vec<_>, Vec<_>) =
                active.into_iter().partition(|a| self.artifact_names.contains(&a.name));
            for artifact in preferred.into_iter().chain(others) {
                let akey: ArtifactKey = (key.0.clone(), run.id, artifact.id);
                match self.cache.lock().await.get_artifact(&akey) {
                    Some(ArtifactEntry::Parsed(p)) => {
                        parsed = Some(p);
                        break;
                    }
                    Some(ArtifactEntry::Error(code)) => {
                        last_error = Some(code);
                        continue;
                    }
                    None => {}
                }
                match self.api.download_artifact_zip(repo, artifact.id).await {
                    Ok(bytes) => match parse_artifact_zip(&bytes, &self.artifact_namespace) {
                        Some(p) => {
                            self.cache
                                .lock()
                                .await
                                .store_artifact(akey, ArtifactEntry::Parsed(p.clone()));
                            parsed = Some(p);
                            break;
                        }
                        None => {
                            tracing::warn!(
                                "No test results found in artifact {} ({})",
                                artifact.name,
                                artifact.id
                            );
                            self.record_artifact_error(akey, ARTIFACT_CORRUPT, &mut last_error)
                                .await;
                        }
                    },
                    Err(e) => {
                        tracing::error!(
                            "Failed to download artifact {} ({}): {:?}",
                            artifact.name,
                            artifact.id,
                            e
                        );
                        self.record_artifact_error(akey, ARTIFACT_DOWNLOAD_FAILED, &mut last_error)
                            .await;
                    }
                }
            }
            if parsed.is_none() && last_error.is_none() {
                last_error = Some(ARTIFACT_UNAVAILABLE.to_string());
            }
        }

        match parsed {
            Some(p) => {
                result.tests_passed = Some(p.passed);
                result.tests_failed = Some(p.failed);
                result.tests_total = Some(p.total);
                result.stdout = p.stdout;
                result.stderr = p.stderr;
                result.raw.summary = p.summary;
            }
            None => {
                let code = last_error.unwrap_or_else(|| ARTIFACT_UNAVAILABLE.to_string());
                if result.raw.artifact_error.is_none() {
                    result.raw.artifact_error = Some(code.clone());
                }
                if run.conclusion.is_some() {
                    result.status = RunStatus::Error;
                    if result.stderr.is_none() {
                        result.stderr =
                            Some(format!("Test results artifact was unavailable ({code})"));
                    }
                }
            }
        }

        tracing::info!("Workflow run {} for {} finished: {}", run.id, repo, result.status);
        self.cache.lock().await.store_run(key, result.clone());
        Ok(result)
    }

    async fn record_artifact_error(
        &self,
        key: ArtifactKey,
        code: &str,
        last_error: &mut Option<String>,
    ) {
        self.cache.lock().await.store_artifact(key, ArtifactEntry::Error(code.to_string()));
        *last_error = Some(code.to_string());
    }

    /// Store a non-terminal result and stamp it with the exponential
    /// poll-after hint, capped at 15 seconds.
    async fn store_with_backoff(&self, key: RunKey, result: &mut ActionsRunResult) {
        let mut cache = self.cache.lock().await;
        let attempts = cache.bump_poll_attempts(&key);
        let shift = (attempts - 1).min(16);
        let hint = self.poll_interval_ms.saturating_mul(1u64 << shift).min(MAX_POLL_AFTER_MS);
        result.poll_after_ms = Some(hint);
        cache.store_run(key, result.clone());
    }
}
