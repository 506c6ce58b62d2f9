//! Bounded LRU caches for run results, artifact listings, and parsed artifact
//! content, plus a per-run poll-attempt counter.
//!
//! The struct itself is not thread-safe; the orchestrator owns one behind a
//! mutex and never holds the lock across a network call.

use std::{collections::HashMap, num::NonZeroUsize};

use lru::LruCache;
use tenon_core::models::{ActionsRunResult, Artifact, ParsedTestResults};

pub type RunKey = (String, u64);
pub type ArtifactKey = (String, u64, u64);

/// A cached artifact holds either a parsed result or an error code, never
/// both.
#[derive(Debug, Clone, PartialEq)]
pub enum ArtifactEntry {
    Parsed(ParsedTestResults),
    Error(String),
}

pub struct RunCache {
    runs: LruCache<RunKey, ActionsRunResult>,
    artifact_lists: LruCache<RunKey, Vec<Artifact>>,
    artifacts: LruCache<ArtifactKey, ArtifactEntry>,
    poll_attempts: HashMap<RunKey, u32>,
}

impl RunCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap();
        Self {
            runs: LruCache::new(capacity),
            artifact_lists: LruCache::new(capacity),
            artifacts: LruCache::new(capacity),
            poll_attempts: HashMap::new(),
        }
    }

    pub fn get_run(&mut self, key: &RunKey) -> Option<ActionsRunResult> {
        self.runs.get(key).cloned()
    }

    /// Storing a terminal result ends the polling cycle for that run.
    pub fn store_run(&mut self, key: RunKey, result: ActionsRunResult) {
        if result.is_terminal() {
            self.poll_attempts.remove(&key);
        }
        self.runs.put(key, result);
    }

    pub fn get_artifact_list(&mut self, key: &RunKey) -> Option<Vec<Artifact>> {
        self.artifact_lists.get(key).cloned()
    }

    /// Eviction here cascades: artifact-content entries are only valid while
    /// the listing that produced their ids is authoritative.
    pub fn store_artifact_list(&mut self, key: RunKey, list: Vec<Artifact>) {
        if let Some((evicted, _)) = self.artifact_lists.push(key.clone(), list) {
            if evicted != key {
                self.drop_artifacts_for(&evicted);
            }
        }
    }

    fn drop_artifacts_for(&mut self, key: &RunKey) {
        let stale: Vec<ArtifactKey> = self
            .artifacts
            .iter()
            .filter(|((repo, run_id, _), _)| *repo == key.0 && *run_id == key.1)
            .map(|(k, _)| k.clone())
            .collect();
        for k in stale {
            self.artifacts.pop(&k);
        }
    }

    pub fn get_artifact(&mut self, key: &ArtifactKey) -> Option<ArtifactEntry> {
        self.artifacts.get(key).cloned()
    }

    pub fn store_artifact(&mut self, key: ArtifactKey, entry: ArtifactEntry) {
        self.artifacts.put(key, entry);
    }

    /// Increment and return the poll-attempt count for a run.
    pub fn bump_poll_attempts(&mut self, key: &RunKey) -> u32 {
        let attempts = self.poll_attempts.entry(key.clone()).or_insert(0);
        *attempts += 1;
        *attempts
    }

    pub fn poll_attempts(&self, key: &RunKey) -> u32 {
        self.poll_attempts.get(key).copied().unwrap_or(0)
    }
}
