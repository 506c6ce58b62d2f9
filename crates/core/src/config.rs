use std::{fs::File, io::BufReader, path::Path, time::Duration};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Workflow file dispatched by default when none is configured.
pub const DEFAULT_WORKFLOW_FILE: &str = "tenon-ci.yml";

/// Artifact name the CI workflow is expected to upload.
pub const DEFAULT_ARTIFACT_NAMESPACE: &str = "tenon-test-results";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub github: GitHubConfig,
    #[serde(default)]
    pub actions: ActionsConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GitHubConfig {
    #[serde(default = "default_api_base")]
    pub api_base: String,
    pub token: String,
    #[serde(default)]
    pub org: Option<String>,
    #[serde(default = "default_workflow_file")]
    pub workflow_file: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ActionsConfig {
    /// Seconds between workflow run polls.
    pub poll_interval_seconds: f64,
    /// Wall-clock deadline for a single dispatch-and-wait call, in seconds.
    pub max_poll_seconds: u64,
    /// Capacity of each LRU cache map.
    pub cache_capacity: usize,
    pub artifact_namespace: String,
}

fn default_api_base() -> String { "https://api.github.com".to_string() }

fn default_workflow_file() -> String { DEFAULT_WORKFLOW_FILE.to_string() }

impl Default for ActionsConfig {
    fn default() -> Self {
        Self {
            poll_interval_seconds: 2.0,
            max_poll_seconds: 120,
            cache_capacity: 128,
            artifact_namespace: DEFAULT_ARTIFACT_NAMESPACE.to_string(),
        }
    }
}

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let file = BufReader::new(File::open(path.as_ref()).context("Failed to open config file")?);
        serde_yaml::from_reader(file).context("Failed to parse config file")
    }

    /// Build a configuration from the documented environment variables.
    /// `GITHUB_TOKEN` is required; everything else falls back to defaults.
    pub fn from_env() -> Result<Self> {
        Ok(Self { github: GitHubConfig::from_env()?, actions: ActionsConfig::default() })
    }
}

impl GitHubConfig {
    pub fn from_env() -> Result<Self> {
        let token = std::env::var("GITHUB_TOKEN").context("GITHUB_TOKEN not set")?;
        let api_base = std::env::var("GITHUB_API_BASE").unwrap_or_else(|_| default_api_base());
        let org = std::env::var("GITHUB_ORG").ok().filter(|s| !s.is_empty());
        let workflow_file = std::env::var("GITHUB_ACTIONS_WORKFLOW_FILE")
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(default_workflow_file);
        Ok(Self { api_base, token, org, workflow_file })
    }

    /// Workflow filenames to attempt on dispatch, in order, de-duplicated.
    /// The configured file is always tried first.
    pub fn workflow_fallbacks(&self) -> Vec<String> {
        let mut files = vec![
            self.workflow_file.clone(),
            DEFAULT_WORKFLOW_FILE.to_string(),
            format!(".github/workflows/{DEFAULT_WORKFLOW_FILE}"),
        ];
        let mut seen = Vec::with_capacity(files.len());
        files.retain(|f| {
            if seen.contains(f) {
                false
            } else {
                seen.push(f.clone());
                true
            }
        });
        files
    }
}

impl ActionsConfig {
    pub fn poll_interval(&self) -> Duration { Duration::from_secs_f64(self.poll_interval_secs()) }

    pub fn poll_interval_ms(&self) -> u64 { (self.poll_interval_secs() * 1000.0) as u64 }

    /// Interval with junk config values replaced by the default;
    /// `Duration::from_secs_f64` panics on NaN and out-of-range input.
    fn poll_interval_secs(&self) -> f64 {
        let secs = self.poll_interval_seconds;
        if secs.is_finite() && (0.0..=3600.0).contains(&secs) {
            secs
        } else {
            2.0
        }
    }

    pub fn max_poll(&self) -> Duration { Duration::from_secs(self.max_poll_seconds) }

    /// Artifact names recognized as test results, preferred-first.
    pub fn artifact_names(&self) -> Vec<&str> {
        let mut names = vec![self.artifact_namespace.as_str()];
        for name in ["test-results", "junit"] {
            if !names.contains(&name) {
                names.push(name);
            }
        }
        names
    }
}
