//! Configuration management for the forge3d client and CLI

use config::{Config as ConfigSource, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

use crate::error::{ForgeError, Result};

const DEFAULT_DISCOVERY_URL: &str = "http://localhost:3000";
const DEFAULT_PLACEHOLDER_THUMBNAIL: &str = "/logo/dark.png";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
}

/// HTTP client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Web host serving the discovery endpoint
    #[serde(default = "default_discovery_url")]
    pub discovery_url: String,
    /// Fixed backend address; skips discovery when set
    #[serde(default)]
    pub backend_url: Option<String>,
    /// Per-request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default = "default_use_proxy")]
    pub use_proxy: bool,
}

/// Generation pipeline limits and timings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_max_requests")]
    pub max_requests: usize,
    #[serde(default = "default_rate_window_secs")]
    pub rate_window_secs: u64,
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,
    /// Consecutive failed status checks tolerated before a job is failed
    #[serde(default = "default_max_consecutive_poll_failures")]
    pub max_consecutive_poll_failures: u32,
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    /// Snapshots whose encoded length is at or below this are treated as blank
    #[serde(default = "default_min_snapshot_len")]
    pub min_snapshot_len: usize,
    #[serde(default = "default_placeholder_thumbnail")]
    pub placeholder_thumbnail: String,
    #[serde(default)]
    pub library_capacity: Option<usize>,
}

fn default_discovery_url() -> String {
    DEFAULT_DISCOVERY_URL.to_string()
}

fn default_timeout() -> u64 {
    30
}

fn default_use_proxy() -> bool {
    true
}

fn default_poll_interval_ms() -> u64 {
    3000
}

fn default_max_requests() -> usize {
    5
}

fn default_rate_window_secs() -> u64 {
    600
}

fn default_max_concurrent_jobs() -> usize {
    3
}

fn default_max_consecutive_poll_failures() -> u32 {
    5
}

fn default_settle_delay_ms() -> u64 {
    500
}

fn default_min_snapshot_len() -> usize {
    1000
}

fn default_placeholder_thumbnail() -> String {
    DEFAULT_PLACEHOLDER_THUMBNAIL.to_string()
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            discovery_url: default_discovery_url(),
            backend_url: None,
            timeout: default_timeout(),
            use_proxy: default_use_proxy(),
        }
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            max_requests: default_max_requests(),
            rate_window_secs: default_rate_window_secs(),
            max_concurrent_jobs: default_max_concurrent_jobs(),
            max_consecutive_poll_failures: default_max_consecutive_poll_failures(),
            settle_delay_ms: default_settle_delay_ms(),
            min_snapshot_len: default_min_snapshot_len(),
            placeholder_thumbnail: default_placeholder_thumbnail(),
            library_capacity: None,
        }
    }
}

impl ClientConfig {
    pub fn validate(&self) -> Result<()> {
        if self.discovery_url.trim().is_empty() {
            return Err(ForgeError::invalid_endpoint("Discovery URL cannot be empty"));
        }
        if let Some(backend) = &self.backend_url {
            if !backend.starts_with("http://") && !backend.starts_with("https://") {
                return Err(ForgeError::invalid_endpoint(format!(
                    "Backend URL must start with http:// or https://: {}",
                    backend
                )));
            }
        }
        if self.timeout == 0 {
            return Err(ForgeError::config("Timeout must be at least one second"));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    /// Full URL of the discovery endpoint
    pub fn discovery_endpoint(&self) -> String {
        let base = if self.discovery_url.starts_with("http://")
            || self.discovery_url.starts_with("https://")
        {
            self.discovery_url.clone()
        } else {
            format!("https://{}", self.discovery_url)
        };
        join_url(&base, forge3d_protocol::DISCOVERY_PATH)
    }
}

impl GenerationConfig {
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(ForgeError::validation_field(
                "Poll interval must be positive",
                "poll_interval_ms",
            ));
        }
        if self.max_requests == 0 {
            return Err(ForgeError::validation_field(
                "At least one request per window is required",
                "max_requests",
            ));
        }
        if self.rate_window_secs == 0 {
            return Err(ForgeError::validation_field(
                "Rate window must be positive",
                "rate_window_secs",
            ));
        }
        if self.max_concurrent_jobs == 0 {
            return Err(ForgeError::validation_field(
                "At least one concurrent job is required",
                "max_concurrent_jobs",
            ));
        }
        if self.max_consecutive_poll_failures == 0 {
            return Err(ForgeError::validation_field(
                "Poll failure budget must be positive",
                "max_consecutive_poll_failures",
            ));
        }
        if let Some(capacity) = self.library_capacity {
            if capacity < self.max_concurrent_jobs {
                return Err(ForgeError::validation_field(
                    "Library capacity cannot be smaller than the concurrent job cap",
                    "library_capacity",
                ));
            }
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn rate_window(&self) -> Duration {
        Duration::from_secs(self.rate_window_secs)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    /// Load defaults, then the optional JSON file, then `FORGE3D_*` environment variables
    pub fn from_file_and_env<P: AsRef<Path>>(config_file: Option<P>) -> Result<Self> {
        let mut builder = ConfigSource::builder()
            .set_default("client.discovery_url", DEFAULT_DISCOVERY_URL)?
            .set_default("client.timeout", default_timeout())?
            .set_default("client.use_proxy", default_use_proxy())?
            .set_default("generation.poll_interval_ms", default_poll_interval_ms())?
            .set_default("generation.max_requests", default_max_requests() as u64)?
            .set_default("generation.rate_window_secs", default_rate_window_secs())?
            .set_default(
                "generation.max_concurrent_jobs",
                default_max_concurrent_jobs() as u64,
            )?
            .set_default(
                "generation.max_consecutive_poll_failures",
                default_max_consecutive_poll_failures() as u64,
            )?
            .set_default("generation.settle_delay_ms", default_settle_delay_ms())?
            .set_default(
                "generation.min_snapshot_len",
                default_min_snapshot_len() as u64,
            )?
            .set_default(
                "generation.placeholder_thumbnail",
                DEFAULT_PLACEHOLDER_THUMBNAIL,
            )?;

        if let Some(config_path) = config_file {
            if config_path.as_ref().exists() {
                builder = builder.add_source(File::from(config_path.as_ref()));
            }
        }
        builder = builder.add_source(
            Environment::with_prefix("FORGE3D")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: Self = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load from the given path, or from the default location
    pub async fn load(config_path: Option<&Path>) -> Result<Self> {
        let path = match config_path {
            Some(path) => path.to_path_buf(),
            None => default_config_path(),
        };
        Self::from_file_and_env(Some(path))
    }

    pub async fn save(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| ForgeError::io_from_error("Create config directory", e))?;
        }

        let content = serde_json::to_string_pretty(self)?;
        fs::write(config_path, content)
            .await
            .map_err(|e| ForgeError::io_from_error("Write config", e))?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.client.validate()?;
        self.generation.validate()
    }
}

/// Builder for Config
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    discovery_url: Option<String>,
    backend_url: Option<String>,
    timeout: Option<u64>,
    use_proxy: Option<bool>,
    poll_interval_ms: Option<u64>,
    max_requests: Option<usize>,
    rate_window_secs: Option<u64>,
    max_concurrent_jobs: Option<usize>,
    library_capacity: Option<usize>,
    config_file: Option<PathBuf>,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn discovery_url<S: Into<String>>(mut self, url: S) -> Self {
        self.discovery_url = Some(url.into());
        self
    }

    pub fn backend_url<S: Into<String>>(mut self, url: S) -> Self {
        self.backend_url = Some(url.into());
        self
    }

    pub fn timeout(mut self, timeout: u64) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn use_proxy(mut self, use_proxy: bool) -> Self {
        self.use_proxy = Some(use_proxy);
        self
    }

    pub fn poll_interval_ms(mut self, interval: u64) -> Self {
        self.poll_interval_ms = Some(interval);
        self
    }

    pub fn max_requests(mut self, max: usize) -> Self {
        self.max_requests = Some(max);
        self
    }

    pub fn rate_window_secs(mut self, secs: u64) -> Self {
        self.rate_window_secs = Some(secs);
        self
    }

    pub fn max_concurrent_jobs(mut self, max: usize) -> Self {
        self.max_concurrent_jobs = Some(max);
        self
    }

    pub fn library_capacity(mut self, capacity: usize) -> Self {
        self.library_capacity = Some(capacity);
        self
    }

    pub fn config_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_file = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn build(self) -> Result<Config> {
        let mut config = Config::from_file_and_env(self.config_file.as_deref())?;

        if let Some(url) = self.discovery_url {
            config.client.discovery_url = url;
        }
        if let Some(url) = self.backend_url {
            config.client.backend_url = Some(url);
        }
        if let Some(timeout) = self.timeout {
            config.client.timeout = timeout;
        }
        if let Some(use_proxy) = self.use_proxy {
            config.client.use_proxy = use_proxy;
        }
        if let Some(interval) = self.poll_interval_ms {
            config.generation.poll_interval_ms = interval;
        }
        if let Some(max) = self.max_requests {
            config.generation.max_requests = max;
        }
        if let Some(secs) = self.rate_window_secs {
            config.generation.rate_window_secs = secs;
        }
        if let Some(max) = self.max_concurrent_jobs {
            config.generation.max_concurrent_jobs = max;
        }
        if let Some(capacity) = self.library_capacity {
            config.generation.library_capacity = Some(capacity);
        }

        config.validate()?;
        Ok(config)
    }
}

/// Join a base URL and a path with exactly one slash between them
pub fn join_url(base: &str, path: &str) -> String {
    let path = path.strip_prefix('/').unwrap_or(path);
    format!("{}/{}", base.trim_end_matches('/'), path)
}

pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("forge3d")
}

pub fn default_config_path() -> PathBuf {
    default_config_dir().join("config.json")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::utils::test_helpers::*;

    #[test]
    fn test_defaults_match_observed_limits() {
        let config = Config::default();
        assert_eq!(config.generation.poll_interval(), Duration::from_secs(3));
        assert_eq!(config.generation.max_requests, 5);
        assert_eq!(config.generation.rate_window(), Duration::from_secs(600));
        assert_eq!(config.generation.max_concurrent_jobs, 3);
        assert_eq!(config.generation.settle_delay(), Duration::from_millis(500));
        assert_eq!(config.generation.placeholder_thumbnail, "/logo/dark.png");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_discovery_endpoint() {
        let mut client = ClientConfig::default();
        client.discovery_url = "https://forge.example.com/".to_string();
        assert_eq!(
            client.discovery_endpoint(),
            "https://forge.example.com/api/get-backend-url"
        );

        client.discovery_url = "forge.example.com".to_string();
        assert_eq!(
            client.discovery_endpoint(),
            "https://forge.example.com/api/get-backend-url"
        );
    }

    #[test]
    fn test_join_url() {
        assert_eq!(join_url("http://a.io/", "/jobs/1"), "http://a.io/jobs/1");
        assert_eq!(join_url("http://a.io", "jobs/1"), "http://a.io/jobs/1");
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = Config::default();
        config.generation.max_concurrent_jobs = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.client.backend_url = Some("ftp://backend".to_string());
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.generation.library_capacity = Some(2);
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn test_file_values_override_defaults() {
        let dir = create_temp_dir();
        let path = create_temp_file_with_content(
            &dir,
            "config.json",
            br#"{"client":{"backend_url":"https://gpu.example.com","timeout":12},"generation":{"max_requests":2}}"#,
        );

        let config = Config::load(Some(&path)).await.unwrap();
        assert_eq!(
            config.client.backend_url.as_deref(),
            Some("https://gpu.example.com")
        );
        assert_eq!(config.client.timeout, 12);
        assert_eq!(config.generation.max_requests, 2);
        assert_eq!(config.generation.max_concurrent_jobs, 3);
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let dir = create_temp_dir();
        let path = dir.path().join("nested").join("config.json");

        let mut config = Config::default();
        config.generation.library_capacity = Some(50);
        config.save(&path).await.unwrap();

        let loaded = Config::load(Some(&path)).await.unwrap();
        assert_eq!(loaded.generation.library_capacity, Some(50));
    }

    #[test]
    fn test_builder_overrides() {
        let config = Config::builder()
            .backend_url("http://127.0.0.1:8000")
            .max_concurrent_jobs(4)
            .poll_interval_ms(250)
            .build()
            .unwrap();
        assert_eq!(
            config.client.backend_url.as_deref(),
            Some("http://127.0.0.1:8000")
        );
        assert_eq!(config.generation.max_concurrent_jobs, 4);
        assert_eq!(config.generation.poll_interval_ms, 250);
    }
}
