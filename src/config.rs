//! TOML configuration.
//!
//! Resolution order: an explicit path, the `OPSMEDIC_CONFIG` environment
//! variable, `/etc/opsmedic/opsmedic.toml`, then compiled-in defaults.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

pub const CONFIG_ENV: &str = "OPSMEDIC_CONFIG";
const SYSTEM_CONFIG_PATH: &str = "/etc/opsmedic/opsmedic.toml";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub render: RenderConfig,
    #[serde(default)]
    pub status_pages: StatusPagesConfig,
    #[serde(default)]
    pub watch: WatchConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Resolve configuration. An explicit path must load; the fallbacks
    /// degrade to defaults with a warning.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(cfg) => return Ok(cfg),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "OPSMEDIC_CONFIG set but file could not be loaded, trying fallback");
                }
            }
        }

        let system_path = Path::new(SYSTEM_CONFIG_PATH);
        if system_path.exists() {
            match Self::load(system_path) {
                Ok(cfg) => return Ok(cfg),
                Err(e) => {
                    warn!(path = %system_path.display(), error = %e, "system config file exists but could not be loaded, using defaults");
                }
            }
        }

        debug!("no config file found, using compiled-in defaults");
        Ok(Self::default())
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Decision-engine tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Settle time between remediation and validation.
    pub validation_delay_secs: u64,
    /// Instance count used by `scale` actions.
    pub scale_target: u32,
    pub similar_incident_limit: usize,
    pub memory_search_limit: usize,
    /// Shortest first-signal title used verbatim as the incident title.
    pub title_min_len: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            validation_delay_secs: 30,
            scale_target: 2,
            similar_incident_limit: 5,
            memory_search_limit: 5,
            title_min_len: 10,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Names added to the built-in entity catalog.
    pub extra_services: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: "data/opsmedic.db".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Collaborators
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub base_url: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    pub timeout_secs: u64,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.render.com/v1".to_string(),
            api_key_env: "RENDER_API_KEY".to_string(),
            timeout_secs: 10,
        }
    }
}

impl RenderConfig {
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env).ok().filter(|k| !k.is_empty())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusPagesConfig {
    /// Statuspage base URLs, e.g. `https://status.render.com`.
    pub urls: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Six-field cron expression (seconds first).
    pub cron: String,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            cron: "0 */5 * * * *".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Emit JSON log lines instead of human-readable output.
    pub json: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let cfg = Config::default();
        assert_eq!(cfg.engine.validation_delay_secs, 30);
        assert_eq!(cfg.engine.scale_target, 2);
        assert_eq!(cfg.engine.similar_incident_limit, 5);
        assert_eq!(cfg.storage.db_path, "data/opsmedic.db");
        assert!(!cfg.logging.json);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            "[engine]\nscale_target = 4\n\n[classifier]\nextra_services = [\"ghost-api\"]\n\n[status_pages]\nurls = [\"https://status.render.com\"]\n"
        )
        .unwrap();

        let cfg = Config::load(file.path()).unwrap();
        assert_eq!(cfg.engine.scale_target, 4);
        assert_eq!(cfg.engine.validation_delay_secs, 30);
        assert_eq!(cfg.classifier.extra_services, vec!["ghost-api"]);
        assert_eq!(cfg.status_pages.urls.len(), 1);
        assert_eq!(cfg.render.api_key_env, "RENDER_API_KEY");
    }

    #[test]
    fn test_explicit_path_must_load() {
        assert!(Config::resolve(Some(Path::new("/nonexistent/opsmedic.toml"))).is_err());
    }

    #[test]
    fn test_invalid_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[engine\nscale_target = ").unwrap();
        assert!(Config::load(file.path()).is_err());
    }
}
