//! Layered configuration
//!
//! Layers, lowest precedence first:
//! 1. Built-in defaults
//! 2. Config file (`$SLM_CONFIG`, else `~/.config/slm/config.toml` if present)
//! 3. Environment (`SLM_DB_PATH`, `SLM_API_URL`, `SLM_SBATCH`)
//! 4. CLI flags

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default reporting service address.
pub const DEFAULT_API_URL: &str = "http://127.0.0.1:9008";

/// Errors for configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("TOML parse error in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid configuration: {0}")]
    Validation(String),
}

/// Effective configuration for one `slm` invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlmConfig {
    /// SQLite job database used by the direct-store transport
    pub db_path: PathBuf,
    /// Whether the direct-store transport may be used at all
    pub db_enabled: bool,
    /// Base URL of the reporting service
    pub api_url: String,
    /// Timeout for each reporting request
    pub request_timeout_seconds: u64,
    /// Timeout for the startup health probe
    pub probe_timeout_seconds: u64,
    /// How long a terminated child gets between SIGTERM and SIGKILL
    pub terminate_grace_seconds: u64,
    /// Program invoked by `slm submit`
    pub sbatch: String,
}

impl Default for SlmConfig {
    fn default() -> Self {
        Self {
            db_path: slm_store::default_db_path(),
            db_enabled: true,
            api_url: DEFAULT_API_URL.to_string(),
            request_timeout_seconds: 5,
            probe_timeout_seconds: 2,
            terminate_grace_seconds: 5,
            sbatch: "sbatch".to_string(),
        }
    }
}

/// File layer; every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    db_path: Option<PathBuf>,
    db_enabled: Option<bool>,
    api_url: Option<String>,
    request_timeout_seconds: Option<u64>,
    probe_timeout_seconds: Option<u64>,
    terminate_grace_seconds: Option<u64>,
    sbatch: Option<String>,
}

/// CLI layer
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub no_db: bool,
    pub db_path: Option<PathBuf>,
    pub api_url: Option<String>,
}

impl SlmConfig {
    /// Load from the process environment and the default file locations.
    pub fn load(cli: &CliOverrides) -> Result<Self, ConfigError> {
        Self::load_from(|key| std::env::var(key).ok(), cli)
    }

    /// Load with an injected environment lookup.
    pub fn load_from<F>(env: F, cli: &CliOverrides) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        let file = match env("SLM_CONFIG") {
            Some(path) => Some(PathBuf::from(path)),
            None => env("HOME")
                .map(|home| PathBuf::from(home).join(".config/slm/config.toml"))
                .filter(|path| path.exists()),
        };
        if let Some(path) = file {
            config.apply_file(&path)?;
        }

        if let Some(path) = env("SLM_DB_PATH").filter(|v| !v.is_empty()) {
            config.db_path = PathBuf::from(path);
        }
        if let Some(url) = env("SLM_API_URL").filter(|v| !v.is_empty()) {
            config.api_url = url;
        }
        if let Some(program) = env("SLM_SBATCH").filter(|v| !v.is_empty()) {
            config.sbatch = program;
        }

        if cli.no_db {
            config.db_enabled = false;
        }
        if let Some(ref path) = cli.db_path {
            config.db_path = path.clone();
        }
        if let Some(ref url) = cli.api_url {
            config.api_url = url.clone();
        }

        config.validate()?;
        Ok(config)
    }

    fn apply_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let file: FileConfig = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        if let Some(v) = file.db_path {
            self.db_path = v;
        }
        if let Some(v) = file.db_enabled {
            self.db_enabled = v;
        }
        if let Some(v) = file.api_url {
            self.api_url = v;
        }
        if let Some(v) = file.request_timeout_seconds {
            self.request_timeout_seconds = v;
        }
        if let Some(v) = file.probe_timeout_seconds {
            self.probe_timeout_seconds = v;
        }
        if let Some(v) = file.terminate_grace_seconds {
            self.terminate_grace_seconds = v;
        }
        if let Some(v) = file.sbatch {
            self.sbatch = v;
        }
        tracing::debug!(path = %path.display(), "loaded config file");
        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.request_timeout_seconds == 0 || self.request_timeout_seconds > 300 {
            return Err(ConfigError::Validation(
                "request_timeout_seconds must be in (0, 300]".to_string(),
            ));
        }
        if self.probe_timeout_seconds == 0 || self.probe_timeout_seconds > 60 {
            return Err(ConfigError::Validation(
                "probe_timeout_seconds must be in (0, 60]".to_string(),
            ));
        }
        if self.terminate_grace_seconds > 600 {
            return Err(ConfigError::Validation(
                "terminate_grace_seconds must be at most 600".to_string(),
            ));
        }
        if !(self.api_url.starts_with("http://") || self.api_url.starts_with("https://")) {
            return Err(ConfigError::Validation(format!(
                "api_url must be an http(s) URL: {}",
                self.api_url
            )));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_seconds)
    }

    pub fn terminate_grace(&self) -> Duration {
        Duration::from_secs(self.terminate_grace_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = SlmConfig::load_from(env_of(&[]), &CliOverrides::default()).unwrap();
        assert_eq!(config.api_url, DEFAULT_API_URL);
        assert!(config.db_enabled);
        assert_eq!(config.request_timeout_seconds, 5);
        assert_eq!(config.probe_timeout_seconds, 2);
        assert_eq!(config.terminate_grace_seconds, 5);
        assert_eq!(config.sbatch, "sbatch");
    }

    #[test]
    fn test_file_then_env_then_cli() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "db_path = \"/file/slm.db\"\napi_url = \"http://file:1\"\nterminate_grace_seconds = 1\n",
        )
        .unwrap();
        let path_str = path.to_str().unwrap();

        let config = SlmConfig::load_from(
            env_of(&[("SLM_CONFIG", path_str), ("SLM_API_URL", "http://env:2")]),
            &CliOverrides::default(),
        )
        .unwrap();
        assert_eq!(config.db_path, PathBuf::from("/file/slm.db"));
        assert_eq!(config.api_url, "http://env:2");
        assert_eq!(config.terminate_grace_seconds, 1);

        let cli = CliOverrides {
            no_db: true,
            db_path: Some(PathBuf::from("/cli/slm.db")),
            api_url: None,
        };
        let config = SlmConfig::load_from(env_of(&[("SLM_CONFIG", path_str)]), &cli).unwrap();
        assert!(!config.db_enabled);
        assert_eq!(config.db_path, PathBuf::from("/cli/slm.db"));
        assert_eq!(config.api_url, "http://file:1");
    }

    #[test]
    fn test_home_config_only_when_present() {
        let dir = tempfile::tempdir().unwrap();
        let home = dir.path().to_str().unwrap();
        let config = SlmConfig::load_from(env_of(&[("HOME", home)]), &CliOverrides::default());
        assert!(config.is_ok());

        fs::create_dir_all(dir.path().join(".config/slm")).unwrap();
        fs::write(dir.path().join(".config/slm/config.toml"), "sbatch = \"/opt/slurm/bin/sbatch\"\n")
            .unwrap();
        let config =
            SlmConfig::load_from(env_of(&[("HOME", home)]), &CliOverrides::default()).unwrap();
        assert_eq!(config.sbatch, "/opt/slurm/bin/sbatch");
    }

    #[test]
    fn test_unknown_key_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "webhook = \"http://x\"\n").unwrap();
        let err = SlmConfig::load_from(
            env_of(&[("SLM_CONFIG", path.to_str().unwrap())]),
            &CliOverrides::default(),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_validation() {
        let err = SlmConfig::load_from(
            env_of(&[("SLM_API_URL", "10.0.0.1:9008")]),
            &CliOverrides::default(),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        let err = SlmConfig::load_from(
            env_of(&[("SLM_CONFIG", "/nonexistent/slm.toml")]),
            &CliOverrides::default(),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
