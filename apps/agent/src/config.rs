use std::{env, fmt, fs, path};

use serde::{Deserialize, Serialize};

pub const REGION_ENV_VAR: &str = "WORKER_REGION";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to read config file: {0}")]
    ReadFailed(std::io::Error),
    #[error("failed to write config file: {0}")]
    WriteFailed(std::io::Error),
    #[error("failed to parse config file: {0}")]
    ParseFailed(String),
    #[error("no config path available: set XDG_CONFIG_HOME or HOME")]
    ConfigPathUnavailable,
    #[error("no region configured: pass --region, set {REGION_ENV_VAR} or add it to the config")]
    MissingRegion,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Config {
    pub agent: Agent,
    pub store: Store,
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Agent {
    /// Region this agent probes for. Overridable by flag and env var.
    pub region: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Store {
    /// "libsql" or "http"
    pub backend: String,
    /// Database path for the libsql backend.
    pub path: String,
    /// Base URL for the http backend.
    pub endpoint: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub poll_interval_seconds: u64,
    pub flush_interval_seconds: u64,
    pub result_queue_capacity: usize,
    pub max_buffered_results: usize,
}

/// Used to ensure we are actually reading a toml file
fn normalize_toml_path(path: &path::Path) -> path::PathBuf {
    let mut path = path.to_path_buf();
    if path.extension().map(|ext| ext != "toml").unwrap_or(true) {
        path.set_extension("toml");
    }
    path
}

/// Get default config path ($XDG_CONFIG_HOME/vigil/config.toml or
/// $HOME/.config/...)
fn default_config_path() -> Result<path::PathBuf, Error> {
    let path = if let Ok(config_home) = env::var("XDG_CONFIG_HOME") {
        path::PathBuf::from(config_home)
    } else if let Some(home_dir) = env::home_dir() {
        home_dir.join(".config")
    } else {
        return Err(Error::ConfigPathUnavailable);
    };

    Ok(path.join("vigil/config.toml"))
}

impl Default for Config {
    fn default() -> Self {
        Self {
            agent: Agent { region: None },
            store: Store {
                backend: "libsql".into(),
                path: "vigil.db".into(),
                endpoint: "http://localhost:8080".into(),
            },
            scheduler: SchedulerConfig::default(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_seconds: 60,
            flush_interval_seconds: 30,
            result_queue_capacity: 20_000,
            max_buffered_results: 100_000,
        }
    }
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let write_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str, value: &dyn fmt::Display| {
                writeln!(f, "  {:indent$}{}: {}", "", label, value, indent = level * 2)
            }
        };
        let write_title_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str| {
                writeln!(f, "{:indent$}{}", "", label, indent = level * 2)
            }
        };

        let write_title_1 = write_title_indented(1);
        let write_1 = write_indented(1);

        writeln!(f, "Current Internal Configuration State:")?;
        write_title_1(f, "Agent")?;
        write_1(f, "Region", &self.agent.region.as_deref().unwrap_or("<unset>"))?;
        write_title_1(f, "Store")?;
        write_1(f, "Backend", &self.store.backend)?;
        write_1(f, "Path", &self.store.path)?;
        write_1(f, "Endpoint", &self.store.endpoint)?;
        write_title_1(f, "Scheduler")?;
        write_1(f, "Poll Interval (s)", &self.scheduler.poll_interval_seconds)?;
        write_1(f, "Flush Interval (s)", &self.scheduler.flush_interval_seconds)?;
        write_1(f, "Result Queue Capacity", &self.scheduler.result_queue_capacity)?;
        write_1(f, "Max Buffered Results", &self.scheduler.max_buffered_results)?;

        Ok(())
    }
}

impl Config {
    /// Generate Config structure from file
    ///
    /// Creates a default config in ~/.config/vigil/config.toml
    ///  or the specified path, with the name config.toml if one does not exist
    pub fn from_config(optional_path: Option<impl AsRef<path::Path>>) -> Result<Self, Error> {
        let config_path: path::PathBuf = if let Some(path) = optional_path {
            normalize_toml_path(path.as_ref())
        } else {
            default_config_path()?
        };

        if config_path.exists() {
            let raw_string = fs::read_to_string(&config_path).map_err(Error::ReadFailed)?;
            toml::from_str(raw_string.as_str()).map_err(|err| Error::ParseFailed(err.to_string()))
        } else {
            let config = Self::default();
            config.write_config(&config_path)?;
            Ok(config)
        }
    }

    /// Serialize and write a config to a file
    pub fn write_config(&self, path: &std::path::Path) -> Result<(), Error> {
        let config_str: String =
            toml::to_string_pretty(self).map_err(|err| Error::ParseFailed(err.to_string()))?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(Error::WriteFailed)?;
        }

        std::fs::write(path, config_str).map_err(Error::WriteFailed)
    }

    /// Region precedence: command-line flag, then the environment, then
    /// the config file. No region at all is fatal.
    pub fn resolve_region(&self, flag: Option<String>) -> Result<String, Error> {
        if let Some(region) = flag {
            return Ok(region);
        }
        if let Ok(region) = env::var(REGION_ENV_VAR) {
            if !region.is_empty() {
                return Ok(region);
            }
        }
        self.agent.region.clone().ok_or(Error::MissingRegion)
    }
}
