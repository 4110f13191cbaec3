use crate::error::{ProxyError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

pub const DEFAULT_API_ORIGIN: &str = "https://api.themoviedb.org";
pub const DEFAULT_IMAGE_ORIGIN: &str = "https://image.tmdb.org";
pub const DEFAULT_MOUNT_PREFIX: &str = "/api/tmdb";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_mount_prefix")]
    pub mount_prefix: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_log: Option<PathBuf>,
    #[serde(default)]
    pub upstream: UpstreamConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_api_origin")]
    pub api_origin: String,
    #[serde(default = "default_image_origin")]
    pub image_origin: String,
    /// Unset leaves connection setup to the OS.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connect_timeout_secs: Option<u64>,
    #[serde(default = "default_max_image_redirects")]
    pub max_image_redirects: usize,
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8787
}

fn default_mount_prefix() -> String {
    DEFAULT_MOUNT_PREFIX.to_string()
}

fn default_api_origin() -> String {
    DEFAULT_API_ORIGIN.to_string()
}

fn default_image_origin() -> String {
    DEFAULT_IMAGE_ORIGIN.to_string()
}

fn default_max_image_redirects() -> usize {
    10
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            mount_prefix: default_mount_prefix(),
            access_log: None,
            upstream: UpstreamConfig::default(),
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            api_origin: default_api_origin(),
            image_origin: default_image_origin(),
            connect_timeout_secs: None,
            max_image_redirects: default_max_image_redirects(),
        }
    }
}

impl UpstreamConfig {
    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_secs.map(Duration::from_secs)
    }
}

impl ProxyConfig {
    /// Load config from a TOML file. Missing keys take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ProxyError::config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        let config: Self = toml::from_str(&content)?;
        config.validate()
    }

    /// Search standard locations for a config file, falling back to defaults.
    /// Priority: CLI arg > CWD > XDG config > home dir
    pub fn find_and_load(explicit_path: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit_path {
            return Self::load(path);
        }

        for candidate in config_search_paths() {
            if candidate.exists() {
                tracing::info!(path = %candidate.display(), "Loading config");
                return Self::load(&candidate);
            }
        }

        tracing::info!("No config file found, using defaults");
        Self::default().validate()
    }

    /// Check origins and mount prefix, normalizing trailing slashes away.
    pub fn validate(mut self) -> Result<Self> {
        self.upstream.api_origin = normalize_origin("api_origin", &self.upstream.api_origin)?;
        self.upstream.image_origin =
            normalize_origin("image_origin", &self.upstream.image_origin)?;

        let prefix = self.mount_prefix.trim_end_matches('/');
        if !prefix.is_empty() && !prefix.starts_with('/') {
            return Err(ProxyError::config(format!(
                "mount_prefix '{}' must be empty or start with '/'",
                self.mount_prefix
            )));
        }
        self.mount_prefix = prefix.to_string();

        Ok(self)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

fn normalize_origin(field: &str, value: &str) -> Result<String> {
    let url = Url::parse(value)
        .map_err(|e| ProxyError::config(format!("{} '{}' is not a valid URL: {}", field, value, e)))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ProxyError::config(format!(
            "{} '{}' must use http or https",
            field, value
        )));
    }
    if url.host_str().is_none() {
        return Err(ProxyError::config(format!("{} '{}' has no host", field, value)));
    }
    if url.path() != "/" || url.query().is_some() || url.fragment().is_some() {
        return Err(ProxyError::config(format!(
            "{} '{}' must be a bare origin without path, query or fragment",
            field, value
        )));
    }

    Ok(value.trim_end_matches('/').to_string())
}

pub fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    // CWD
    paths.push(PathBuf::from("tmdb-proxy.toml"));

    // XDG / platform config dir
    if cfg!(target_os = "macos") {
        if let Some(home) = dirs_path() {
            paths.push(
                home.join("Library")
                    .join("Application Support")
                    .join("tmdb-proxy")
                    .join("config.toml"),
            );
        }
    } else {
        if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
            paths.push(PathBuf::from(xdg).join("tmdb-proxy").join("config.toml"));
        }
        if let Some(home) = dirs_path() {
            paths.push(home.join(".config").join("tmdb-proxy").join("config.toml"));
        }
    }

    // Home directory fallback
    if let Some(home) = dirs_path() {
        paths.push(home.join(".tmdb-proxy.toml"));
    }

    paths
}

fn dirs_path() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}
