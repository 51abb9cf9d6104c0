use std::{
    env,
    fmt::{self, Display},
    fs,
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use log::warn;
use model_registry::{CheckpointDescriptor, LabelTable};

use crate::error::ConfigError;

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8000;
const DEFAULT_CHECKPOINT_DIRS: [&str; 2] = [".", "backend"];
const DEFAULT_CLEANUP_INTERVAL_SECS: u64 = 3600;
const DEFAULT_UNVERIFIED_TTL_HOURS: i64 = 24;

/// Where forward passes are asked to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Device {
    Cpu,
    Cuda,
}

impl FromStr for Device {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cpu" => Ok(Device::Cpu),
            "cuda" | "gpu" => Ok(Device::Cuda),
            other => Err(format!("unknown device '{other}', expected cpu or cuda")),
        }
    }
}

impl Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => f.write_str("cpu"),
            Device::Cuda => f.write_str("cuda"),
        }
    }
}

impl Device {
    /// The device inference will actually use. Only the CPU backend exists, so
    /// accelerator requests fall back to it.
    pub fn resolve(self) -> Device {
        if self != Device::Cpu {
            warn!(requested:% = self; "no accelerator backend available, running on cpu");
        }

        Device::Cpu
    }
}

/// The server's runtime configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Base directories relative checkpoint paths are searched in, in priority order.
    pub checkpoint_dirs: Vec<PathBuf>,
    /// A JSON file with the checkpoint descriptors, the built-in table is used otherwise.
    pub models_path: Option<PathBuf>,
    /// A text file with one class name per line, CIFAR-100 is used otherwise.
    pub labels_path: Option<PathBuf>,
    pub device: Device,
    pub cleanup_interval: Duration,
    /// How long an account may stay unverified before being purged.
    pub unverified_ttl: chrono::Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            checkpoint_dirs: DEFAULT_CHECKPOINT_DIRS.iter().map(PathBuf::from).collect(),
            models_path: None,
            labels_path: None,
            device: Device::Cpu,
            cleanup_interval: Duration::from_secs(DEFAULT_CLEANUP_INTERVAL_SECS),
            unverified_ttl: chrono::Duration::hours(DEFAULT_UNVERIFIED_TTL_HOURS),
        }
    }
}

impl ServerConfig {
    /// Reads the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| env::var(var).ok())
    }

    /// Reads the configuration through `lookup`, unset variables keep their defaults.
    ///
    /// # Arguments
    /// * `lookup` - Returns the value of an environment variable, if set.
    ///
    /// # Returns
    /// The configuration, or the first variable that couldn't be parsed.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(host) = lookup("HOST") {
            config.host = host;
        }
        if let Some(port) = lookup("PORT") {
            config.port = parse("PORT", &port)?;
        }
        if let Some(dirs) = lookup("CHECKPOINT_DIRS") {
            config.checkpoint_dirs = env::split_paths(&dirs)
                .filter(|dir| !dir.as_os_str().is_empty())
                .collect();
        }
        config.models_path = lookup("MODELS_PATH").map(PathBuf::from);
        config.labels_path = lookup("LABELS_PATH").map(PathBuf::from);
        if let Some(device) = lookup("DEVICE") {
            config.device = parse("DEVICE", &device)?;
        }
        if let Some(secs) = lookup("CLEANUP_INTERVAL_SECS") {
            let secs: u64 = parse("CLEANUP_INTERVAL_SECS", &secs)?;
            if secs == 0 {
                return Err(ConfigError::invalid(
                    "CLEANUP_INTERVAL_SECS",
                    "0",
                    "the interval must be positive",
                ));
            }
            config.cleanup_interval = Duration::from_secs(secs);
        }
        if let Some(hours) = lookup("UNVERIFIED_TTL_HOURS") {
            config.unverified_ttl = chrono::Duration::hours(parse("UNVERIFIED_TTL_HOURS", &hours)?);
        }

        Ok(config)
    }

    /// The socket address to listen at.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// The configured checkpoint descriptors.
    pub fn descriptors(&self) -> Result<Vec<CheckpointDescriptor>, ConfigError> {
        let Some(path) = &self.models_path else {
            return Ok(CheckpointDescriptor::defaults());
        };

        let raw = fs::read_to_string(path).map_err(|e| ConfigError::Io(path.clone(), e))?;
        serde_json::from_str(&raw).map_err(|e| ConfigError::Json(path.clone(), e))
    }

    /// The configured label table.
    pub fn labels(&self) -> Result<LabelTable, ConfigError> {
        match &self.labels_path {
            Some(path) => LabelTable::from_file(path).map_err(|e| ConfigError::Io(path.clone(), e)),
            None => Ok(LabelTable::cifar100()),
        }
    }
}

fn parse<T>(var: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::invalid(var, value, e.to_string()))
}
