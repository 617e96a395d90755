//! Uploader configuration.
//!
//! Read from `$XDG_CONFIG_HOME/mediaferry/config.json` unless a path is
//! given on the command line. Missing fields take their defaults.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context as _;
use mediaferry_engine::EngineConfig;
use mediaferry_ingest::HttpIngestConfig;
use mediaferry_transfer::RetryScheduler;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploaderConfig {
    /// Creation URL of the ingest server.
    pub endpoint: String,
    pub bearer_token: Option<String>,
    /// Static headers added to every request.
    pub headers: BTreeMap<String, String>,
    pub chunk_size_mib: usize,
    pub request_timeout_secs: u64,
    /// Backoff before each retry, indexed by failure count.
    pub retry_delays_secs: Vec<u64>,
    pub max_attempts: u32,
    /// Where session records are kept. Defaults to the platform data dir.
    pub session_dir: Option<PathBuf>,
}

impl Default for UploaderConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:1080/files/".into(),
            bearer_token: None,
            headers: BTreeMap::new(),
            chunk_size_mib: 8,
            request_timeout_secs: 30,
            retry_delays_secs: vec![0, 3, 5, 10, 20],
            max_attempts: 5,
            session_dir: None,
        }
    }
}

impl UploaderConfig {
    /// Loads `path`, or the default location when `None`.
    ///
    /// A missing file yields the defaults; an unparsable one is reported
    /// and ignored.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => match config_path() {
                Some(p) => p,
                None => return Ok(Self::default()),
            },
        };
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        match serde_json::from_str(&content) {
            Ok(config) => Ok(config),
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config, using defaults"
                );
                Ok(Self::default())
            }
        }
    }

    pub fn engine_config(&self) -> anyhow::Result<EngineConfig> {
        let delays = self
            .retry_delays_secs
            .iter()
            .map(|&s| Duration::from_secs(s))
            .collect();
        let retry = RetryScheduler::new(delays, self.max_attempts)
            .context("invalid retry settings")?;
        anyhow::ensure!(self.chunk_size_mib > 0, "chunk_size_mib must be positive");

        Ok(EngineConfig {
            chunk_size: self.chunk_size_mib * 1024 * 1024,
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            retry,
            ..EngineConfig::default()
        })
    }

    pub fn ingest_config(&self) -> HttpIngestConfig {
        let mut config = HttpIngestConfig::new(self.endpoint.clone());
        config.bearer_token = self.bearer_token.clone();
        config.extra_headers = self.headers.clone();
        config
    }

    pub fn session_dir(&self) -> anyhow::Result<PathBuf> {
        self.session_dir
            .clone()
            .or_else(mediaferry_session_store::default_store_dir)
            .context("no session directory configured and no data directory found")
    }
}

/// Returns `mediaferry/config.json` under the platform config directory.
fn config_path() -> Option<PathBuf> {
    config_base_dir().map(|d| d.join("mediaferry").join("config.json"))
}

fn config_base_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var("APPDATA").ok().map(PathBuf::from)
    }

    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("XDG_CONFIG_HOME")
            .ok()
            .filter(|d| !d.is_empty())
            .map(PathBuf::from)
            .or_else(|| {
                std::env::var("HOME")
                    .ok()
                    .map(|h| PathBuf::from(h).join(".config"))
            })
    }
}
