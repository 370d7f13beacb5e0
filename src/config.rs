//! Configuration loading and management
//!
//! Defaults, then `config.toml` in the data directory, then `FINGERTYPE_*`
//! environment variables.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::capture::DetectorSettings;
use crate::error::{EngineError, EngineResult};

/// Settings of one capture session
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Seconds a fingertip must rest on a key before it is typed
    pub dwell_threshold_secs: f64,
    /// Seconds without typing after which the current word is committed
    pub word_timeout_secs: f64,
    /// Camera used when a start request names none
    pub camera_index: u32,
    /// Requested capture format; the device may deliver something else
    pub frame_width: u32,
    pub frame_height: u32,
    pub fps: u32,
    /// Consecutive frame processing failures tolerated before the session ends
    pub max_consecutive_errors: u32,
    /// Camera indices `0..probe_count` are probed when listing cameras
    pub probe_count: u32,
    pub detector: DetectorSettings,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            dwell_threshold_secs: 3.0,
            word_timeout_secs: 2.0,
            camera_index: 0,
            frame_width: 1280,
            frame_height: 720,
            fps: 30,
            max_consecutive_errors: 30,
            probe_count: 4,
            detector: DetectorSettings::default(),
        }
    }
}

impl EngineConfig {
    /// Reject settings the capture loop cannot run with
    pub fn validate(&self) -> EngineResult<()> {
        positive_secs("dwell_threshold_secs", self.dwell_threshold_secs)?;
        positive_secs("word_timeout_secs", self.word_timeout_secs)?;

        if self.frame_width == 0 || self.frame_height == 0 || self.fps == 0 {
            return Err(EngineError::Configuration(format!(
                "capture format {}x{}@{} must be non-zero",
                self.frame_width, self.frame_height, self.fps
            )));
        }
        if self.max_consecutive_errors == 0 {
            return Err(EngineError::Configuration(
                "max_consecutive_errors must be at least 1".to_string(),
            ));
        }
        self.detector.validate()
    }

    pub fn dwell_threshold(&self) -> Duration {
        Duration::from_secs_f64(self.dwell_threshold_secs)
    }

    pub fn word_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.word_timeout_secs)
    }
}

fn positive_secs(name: &str, value: f64) -> EngineResult<()> {
    if value.is_finite() && value > 0.0 && value < 3600.0 {
        Ok(())
    } else {
        Err(EngineError::Configuration(format!(
            "{} must be between 0 and 3600 seconds, got {}",
            name, value
        )))
    }
}

/// Contents of `config.toml`
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    socket_path: Option<PathBuf>,
    autostart: Option<bool>,
    trace: Option<PathBuf>,
    engine: EngineConfig,
}

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the Unix domain socket for IPC
    pub socket_path: PathBuf,

    /// Directory for runtime data
    pub data_dir: PathBuf,

    /// Start a session on the default camera at launch
    pub autostart: bool,

    /// Fingertip trace replayed instead of a live camera
    pub trace_path: Option<PathBuf>,

    pub engine: EngineConfig,
}

impl Config {
    /// Load configuration from defaults, the config file and environment
    pub fn load() -> Result<Self> {
        let home = std::env::var("HOME")?;
        let data_dir = PathBuf::from(&home)
            .join(".local")
            .join("share")
            .join("fingertype");

        let config_file = data_dir.join("config.toml");
        let file = if config_file.exists() {
            Some(
                std::fs::read_to_string(&config_file)
                    .with_context(|| format!("failed to read {}", config_file.display()))?,
            )
        } else {
            None
        };

        Self::from_sources(&data_dir, file.as_deref(), |name| std::env::var(name).ok())
    }

    /// Merge the config file contents and environment lookups over defaults
    pub fn from_sources(
        data_dir: &Path,
        file: Option<&str>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let file: FileConfig = match file {
            Some(contents) => toml::from_str(contents).context("invalid config.toml")?,
            None => FileConfig::default(),
        };

        let mut config = Self {
            socket_path: file
                .socket_path
                .unwrap_or_else(|| data_dir.join("daemon.sock")),
            data_dir: data_dir.to_path_buf(),
            autostart: file.autostart.unwrap_or(false),
            trace_path: file.trace,
            engine: file.engine,
        };

        if let Some(path) = env("FINGERTYPE_SOCKET") {
            config.socket_path = PathBuf::from(path);
        }
        if let Some(path) = env("FINGERTYPE_TRACE") {
            config.trace_path = Some(PathBuf::from(path));
        }
        if let Some(v) = parse_env(&env, "FINGERTYPE_AUTOSTART")? {
            config.autostart = v;
        }
        if let Some(v) = parse_env(&env, "FINGERTYPE_DWELL_SECS")? {
            config.engine.dwell_threshold_secs = v;
        }
        if let Some(v) = parse_env(&env, "FINGERTYPE_WORD_TIMEOUT_SECS")? {
            config.engine.word_timeout_secs = v;
        }
        if let Some(v) = parse_env(&env, "FINGERTYPE_CAMERA")? {
            config.engine.camera_index = v;
        }

        Ok(config)
    }

    /// Ensure data directory exists
    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        Ok(())
    }
}

fn parse_env<T>(env: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    env(name)
        .map(|raw| raw.trim().parse::<T>())
        .transpose()
        .with_context(|| format!("invalid value for {}", name))
}
