use dirs::config_dir;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{MirrorError, Result};
use crate::repository::GITHUB_API_URL;

/// Main configuration structure for a mirror run
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct Config {
    /// Root of the mirrored tree
    pub base_dir: PathBuf,

    /// Proxy server as `host:port`
    #[serde(default)]
    pub proxy: Option<String>,

    /// Repository identifiers, mirrored in this order
    #[serde(default)]
    pub urls: Vec<String>,

    /// GitHub bearer token
    #[serde(default)]
    pub github_token: Option<String>,

    /// GitLab private token
    #[serde(default)]
    pub gitlab_token: Option<String>,

    /// GitHub API root, for GitHub Enterprise hosts
    #[serde(default)]
    pub github_api_url: Option<String>,
}

/// Command-line values that replace file-sourced fields wholesale
#[derive(Debug, Default, Clone)]
pub struct ConfigOverrides {
    pub base_dir: Option<PathBuf>,
    pub proxy: Option<String>,
    pub github_token: Option<String>,
    pub gitlab_token: Option<String>,
}

impl Config {
    /// Minimal configuration for a single `--repo` run
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            proxy: None,
            urls: Vec::new(),
            github_token: None,
            gitlab_token: None,
            github_api_url: None,
        }
    }

    /// Load configuration from a YAML or TOML file, chosen by extension
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            MirrorError::config(format!("failed to read config file {}: {}", path.display(), e))
        })?;

        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();

        let mut config: Config = match extension.as_str() {
            "yaml" | "yml" => serde_yaml::from_str(&content).map_err(|e| {
                MirrorError::config(format!("failed to parse config file {}: {}", path.display(), e))
            })?,
            "toml" => toml::from_str(&content).map_err(|e| {
                MirrorError::config(format!("failed to parse config file {}: {}", path.display(), e))
            })?,
            other => {
                return Err(MirrorError::config(format!(
                    "unsupported config format: .{}",
                    other
                )))
            }
        };

        config.expand_paths()?;

        Ok(config)
    }

    /// Get the default configuration file path (XDG compliant)
    pub fn default_config_path() -> Result<PathBuf> {
        let config_dir = config_dir()
            .ok_or_else(|| MirrorError::config("failed to get user config directory"))?;

        Ok(config_dir.join("release-mirror").join("config.yml"))
    }

    /// Expand `~` and environment variables in `base_dir`
    pub fn expand_paths(&mut self) -> Result<()> {
        let raw = self.base_dir.to_string_lossy().into_owned();
        let expanded = shellexpand::full(&raw)
            .map_err(|e| MirrorError::config(format!("failed to expand base_dir: {}", e)))?;
        self.base_dir = PathBuf::from(expanded.as_ref());
        Ok(())
    }

    /// Apply command-line overrides field by field
    pub fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(base_dir) = overrides.base_dir {
            self.base_dir = base_dir;
        }
        if let Some(proxy) = overrides.proxy {
            self.proxy = Some(proxy);
        }
        if let Some(token) = overrides.github_token {
            self.github_token = Some(token);
        }
        if let Some(token) = overrides.gitlab_token {
            self.gitlab_token = Some(token);
        }
    }

    /// Fill missing tokens from `GITHUB_TOKEN` / `GITLAB_TOKEN`
    pub fn apply_env_tokens(&mut self) {
        if self.github_token.is_none() {
            self.github_token = non_empty_env("GITHUB_TOKEN");
        }
        if self.gitlab_token.is_none() {
            self.gitlab_token = non_empty_env("GITLAB_TOKEN");
        }
    }

    /// Reject configurations the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.base_dir.as_os_str().is_empty() {
            return Err(MirrorError::config("base_dir must not be empty"));
        }
        if let Some(proxy) = &self.proxy {
            if proxy.trim().is_empty() {
                return Err(MirrorError::config("proxy must not be empty"));
            }
        }
        Ok(())
    }

    pub fn github_api_url(&self) -> &str {
        self.github_api_url.as_deref().unwrap_or(GITHUB_API_URL)
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}
