use std::path::{Path, PathBuf};
use std::time::Duration;
use serde::{Deserialize, Serialize};
use tracing::debug;
use crate::error::{EngineError, Result};
use crate::global::{get_global_config_file, get_global_data_dir};
use crate::util::default_python;

pub const ENV_HOME: &str = "ISOTOOL_HOME";
pub const ENV_ENVIRONMENTS_DIR: &str = "ISOTOOL_ENVIRONMENTS_DIR";
pub const ENV_WHEELS_PATH: &str = "ISOTOOL_WHEELS_PATH";
pub const ENV_BUNDLES_PATH: &str = "ISOTOOL_BUNDLES_PATH";
pub const ENV_PYTHON: &str = "ISOTOOL_PYTHON";

/// Engine settings, read from `config.toml` and `ISOTOOL_*` variables.
///
/// Every directory not set explicitly is derived from `home`:
///
/// ```text
/// <home>/environments/<tool>/   isolated environments
/// <home>/wheels/                standalone archives
/// <home>/bundles/<bundle>/      grouped archives
/// <home>/logs/isotool.log       optional log file
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    /// Root for everything isotool writes.
    pub home: PathBuf,
    /// Where per-tool environments live. Defaults to `<home>/environments`.
    pub environments_dir: Option<PathBuf>,
    /// Search locations for standalone archives. Defaults to `<home>/wheels`.
    pub wheel_paths: Vec<PathBuf>,
    /// Search locations for bundles. Defaults to the bundles directory.
    pub bundle_paths: Vec<PathBuf>,
    /// Where installed bundles are written. Defaults to `<home>/bundles`.
    pub bundles_dir: Option<PathBuf>,
    /// Base interpreter used to provision environments.
    pub python: String,
    pub validate_timeout_secs: u64,
    /// No timeout for installer runs unless set.
    pub install_timeout_secs: Option<u64>,
    pub log_to_file: bool,
}

impl Default for Settings {
    fn default() -> Self {
        let home = get_global_data_dir().unwrap_or_else(|_| PathBuf::from(".isotool"));
        Settings::with_home(home)
    }
}

impl Settings {
    /// Settings rooted at `home` with every other value at its default.
    pub fn with_home<P: AsRef<Path>>(home: P) -> Settings {
        Settings {
            home: home.as_ref().to_path_buf(),
            environments_dir: None,
            wheel_paths: Vec::new(),
            bundle_paths: Vec::new(),
            bundles_dir: None,
            python: default_python(),
            validate_timeout_secs: 10,
            install_timeout_secs: None,
            log_to_file: false,
        }
    }

    /// Loads settings from a TOML file. A missing file yields the defaults.
    ///
    /// # Errors
    /// Returns [`EngineError::Config`] if the file exists but can't be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Settings> {
        let path = path.as_ref();
        if !path.exists() {
            debug!(path = %path.display(), "no settings file, using defaults");
            return Ok(Settings::default());
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("{}: {e}", path.display())))?;
        toml::from_str(&content)
            .map_err(|e| EngineError::Config(format!("{}: {e}", path.display())))
    }

    /// Loads the per-user settings file and applies `ISOTOOL_*` overrides
    /// from the process environment.
    pub fn from_env() -> Result<Settings> {
        let mut settings = match get_global_config_file() {
            Ok(path) => Settings::load(path)?,
            Err(e) => {
                debug!("no per-user config directory: {e}");
                Settings::default()
            }
        };
        settings.apply_overrides(|key| std::env::var(key).ok());
        Ok(settings)
    }

    /// Applies overrides looked up through `lookup` (normally `std::env::var`).
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(home) = lookup(ENV_HOME).filter(|v| !v.is_empty()) {
            self.home = PathBuf::from(home);
        }
        if let Some(dir) = lookup(ENV_ENVIRONMENTS_DIR).filter(|v| !v.is_empty()) {
            self.environments_dir = Some(PathBuf::from(dir));
        }
        if let Some(paths) = lookup(ENV_WHEELS_PATH).filter(|v| !v.is_empty()) {
            self.wheel_paths = std::env::split_paths(&paths).collect();
        }
        if let Some(paths) = lookup(ENV_BUNDLES_PATH).filter(|v| !v.is_empty()) {
            self.bundle_paths = std::env::split_paths(&paths).collect();
        }
        if let Some(python) = lookup(ENV_PYTHON).filter(|v| !v.is_empty()) {
            self.python = python;
        }
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn environments_dir(&self) -> PathBuf {
        self.environments_dir
            .clone()
            .unwrap_or_else(|| self.home.join("environments"))
    }

    pub fn bundles_dir(&self) -> PathBuf {
        self.bundles_dir
            .clone()
            .unwrap_or_else(|| self.home.join("bundles"))
    }

    pub fn wheel_search_paths(&self) -> Vec<PathBuf> {
        if self.wheel_paths.is_empty() {
            vec![self.home.join("wheels")]
        } else {
            self.wheel_paths.clone()
        }
    }

    pub fn bundle_search_paths(&self) -> Vec<PathBuf> {
        if self.bundle_paths.is_empty() {
            vec![self.bundles_dir()]
        } else {
            self.bundle_paths.clone()
        }
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.home.join("logs")
    }

    pub fn validate_timeout(&self) -> Duration {
        Duration::from_secs(self.validate_timeout_secs)
    }

    pub fn install_timeout(&self) -> Option<Duration> {
        self.install_timeout_secs.map(Duration::from_secs)
    }
}
