//! Engine configuration.
//!
//! Resolution order: built-in defaults, then an optional TOML file, then
//! `ROLLCALL_*` environment variables. The result is validated before use.

use rollcall_core::DistanceMetric;
use rollcall_vision::{BackendKind, BackendSpec};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    pub face: FaceConfig,
    pub absentee: AbsenteeConfig,
    pub notifications: NotificationConfig,
    pub daemon: DaemonConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FaceConfig {
    pub backend: BackendKind,
    /// Directory containing `det_10g.onnx` and `w600k_r50.onnx`.
    pub model_dir: PathBuf,
    pub metric: DistanceMetric,
    /// A match requires a distance strictly below this value.
    pub threshold: f32,
    /// Distance that maps to zero confidence.
    pub max_distance: f32,
    pub extract_timeout_ms: u64,
    /// Embedding dimension produced by the stub backend.
    pub embedding_dim: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AbsenteeConfig {
    /// Percentage below which a low-attendance warning is emitted.
    pub low_attendance_threshold: f64,
    /// Number of course sessions per evaluation window.
    pub window_sessions: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NotificationConfig {
    pub confirm_face_marks: bool,
    pub queue_capacity: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DaemonConfig {
    pub sweep_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: data_dir().join("rollcall.db"),
            face: FaceConfig::default(),
            absentee: AbsenteeConfig::default(),
            notifications: NotificationConfig::default(),
            daemon: DaemonConfig::default(),
        }
    }
}

impl Default for FaceConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Stub,
            model_dir: data_dir().join("models"),
            metric: DistanceMetric::Euclidean,
            threshold: 0.6,
            max_distance: 1.0,
            extract_timeout_ms: 5_000,
            embedding_dim: 512,
        }
    }
}

impl Default for AbsenteeConfig {
    fn default() -> Self {
        Self {
            low_attendance_threshold: 75.0,
            window_sessions: 10,
        }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            confirm_face_marks: true,
            queue_capacity: 256,
        }
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 60,
        }
    }
}

/// `$XDG_DATA_HOME/rollcall`, falling back to `~/.local/share/rollcall`.
fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("rollcall")
}

impl Config {
    /// Defaults, then `path` if given, then the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })?;
                Self::from_toml_str(&text)?
            }
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Apply `ROLLCALL_*` overrides from `lookup`. Unparseable values are
    /// ignored with a warning.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let lookup = &lookup;
        if let Some(path) = lookup("ROLLCALL_DB_PATH") {
            self.db_path = PathBuf::from(path);
        }
        if let Some(dir) = lookup("ROLLCALL_MODEL_DIR") {
            self.face.model_dir = PathBuf::from(dir);
        }

        let face = &mut self.face;
        face.backend = env_parse(lookup, "ROLLCALL_FACE_BACKEND", face.backend);
        face.metric = env_parse(lookup, "ROLLCALL_FACE_METRIC", face.metric);
        face.threshold = env_f32(lookup, "ROLLCALL_FACE_THRESHOLD", face.threshold);
        face.max_distance = env_f32(lookup, "ROLLCALL_FACE_MAX_DISTANCE", face.max_distance);
        face.extract_timeout_ms =
            env_u64(lookup, "ROLLCALL_EXTRACT_TIMEOUT_MS", face.extract_timeout_ms);
        face.embedding_dim = env_usize(lookup, "ROLLCALL_EMBEDDING_DIM", face.embedding_dim);

        let absentee = &mut self.absentee;
        absentee.low_attendance_threshold = env_parse(
            lookup,
            "ROLLCALL_LOW_ATTENDANCE_THRESHOLD",
            absentee.low_attendance_threshold,
        );
        absentee.window_sessions =
            env_usize(lookup, "ROLLCALL_WINDOW_SESSIONS", absentee.window_sessions);

        let notifications = &mut self.notifications;
        notifications.confirm_face_marks = lookup("ROLLCALL_CONFIRM_FACE_MARKS")
            .map(|v| v != "0" && !v.eq_ignore_ascii_case("false"))
            .unwrap_or(notifications.confirm_face_marks);
        notifications.queue_capacity =
            env_usize(lookup, "ROLLCALL_QUEUE_CAPACITY", notifications.queue_capacity);

        self.daemon.sweep_interval_secs = env_u64(
            lookup,
            "ROLLCALL_SWEEP_INTERVAL_SECS",
            self.daemon.sweep_interval_secs,
        );
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let face = &self.face;
        if !face.threshold.is_finite() || face.threshold <= 0.0 {
            return Err(invalid(format!("face.threshold must be > 0, got {}", face.threshold)));
        }
        if !face.max_distance.is_finite() || face.max_distance < face.threshold {
            return Err(invalid(format!(
                "face.max_distance ({}) must be >= face.threshold ({})",
                face.max_distance, face.threshold
            )));
        }
        if face.extract_timeout_ms == 0 {
            return Err(invalid("face.extract_timeout_ms must be > 0"));
        }
        if face.embedding_dim == 0 {
            return Err(invalid("face.embedding_dim must be > 0"));
        }
        let pct = self.absentee.low_attendance_threshold;
        if !(0.0..=100.0).contains(&pct) {
            return Err(invalid(format!(
                "absentee.low_attendance_threshold must be within [0, 100], got {pct}"
            )));
        }
        if self.absentee.window_sessions == 0 {
            return Err(invalid("absentee.window_sessions must be > 0"));
        }
        if self.notifications.queue_capacity == 0 {
            return Err(invalid("notifications.queue_capacity must be > 0"));
        }
        if self.daemon.sweep_interval_secs == 0 {
            return Err(invalid("daemon.sweep_interval_secs must be > 0"));
        }
        Ok(())
    }

    pub fn backend_spec(&self) -> BackendSpec {
        BackendSpec {
            kind: self.face.backend,
            model_dir: self.face.model_dir.clone(),
            embedding_dim: self.face.embedding_dim,
        }
    }

    pub fn extract_timeout(&self) -> Duration {
        Duration::from_millis(self.face.extract_timeout_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.daemon.sweep_interval_secs)
    }
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(message.into())
}

fn env_parse<T: FromStr>(lookup: &dyn Fn(&str) -> Option<String>, key: &str, current: T) -> T {
    match lookup(key) {
        Some(raw) => match raw.parse() {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!(key, value = %raw, "ignoring unparseable override");
                current
            }
        },
        None => current,
    }
}

fn env_f32(lookup: &dyn Fn(&str) -> Option<String>, key: &str, current: f32) -> f32 {
    env_parse(lookup, key, current)
}

fn env_u64(lookup: &dyn Fn(&str) -> Option<String>, key: &str, current: u64) -> u64 {
    env_parse(lookup, key, current)
}

fn env_usize(lookup: &dyn Fn(&str) -> Option<String>, key: &str, current: usize) -> usize {
    env_parse(lookup, key, current)
}
