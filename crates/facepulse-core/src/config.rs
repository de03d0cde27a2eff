use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

use facepulse_signals::RppgConfig;

use crate::throttle::Age;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
    #[error("Invalid value '{value}' for environment variable {name}")]
    EnvVar { name: String, value: String },
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Default emotion label set of the expression classifier
pub const EMOTION_CLASSES: [&str; 7] = [
    "Angry", "Disgust", "Fear", "Happy", "Sad", "Surprise", "Neutral",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct FusionConfig {
    pub smoothing: SmoothingConfig,
    pub biometrics: BiometricsConfig,
    pub expression: ExpressionConfig,
    pub rppg: RppgConfig,
    pub runtime: RuntimeConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmoothingConfig {
    /// EMA weight on new bounding box coordinates
    pub box_alpha: f64,
    /// EMA weight on new emotion probabilities
    pub emotion_alpha: f64,
}

impl Default for SmoothingConfig {
    fn default() -> Self {
        Self {
            box_alpha: 0.25,
            emotion_alpha: 0.25,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BiometricsConfig {
    /// Frames between identity/demographics refreshes
    pub refresh_interval: u64,
    pub default_identity: String,
    pub default_gender: String,
    pub default_age: Age,
}

impl Default for BiometricsConfig {
    fn default() -> Self {
        Self {
            refresh_interval: 30, // ~2 seconds at 15 fps
            default_identity: "Guest".to_string(),
            default_gender: "Unknown".to_string(),
            default_age: Age::Label("Unknown".to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpressionConfig {
    /// Label set reported by the classifier
    pub labels: Vec<String>,
    /// Label forced to a slight majority when the classifier fails
    pub fallback_label: String,
    /// Extra weight given to `fallback_label` before normalization
    pub fallback_bias: f64,
}

impl Default for ExpressionConfig {
    fn default() -> Self {
        Self {
            labels: EMOTION_CLASSES.iter().map(|s| s.to_string()).collect(),
            fallback_label: "Neutral".to_string(),
            fallback_bias: 0.1,
        }
    }
}

impl ExpressionConfig {
    /// Near-uniform distribution with `fallback_label` slightly ahead
    pub fn fallback_distribution(&self) -> BTreeMap<String, f64> {
        let total = self.labels.len() as f64 + self.fallback_bias;
        self.labels
            .iter()
            .map(|label| {
                let weight = if *label == self.fallback_label {
                    1.0 + self.fallback_bias
                } else {
                    1.0
                };
                (label.clone(), weight / total)
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Threads serving collaborator calls
    pub worker_threads: usize,
    /// Upper bound on one collaborator call
    pub call_timeout_ms: u64,
    /// Latest-wins frame queue depth
    pub frame_queue_capacity: usize,
    /// Sleep between polls when no frame is ready
    pub idle_poll_ms: u64,
    /// Capture thread pacing
    pub capture_fps: f64,
    /// Detections below this confidence are dropped
    pub detector_confidence_threshold: f64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            worker_threads: 4,
            call_timeout_ms: 2000,
            frame_queue_capacity: 2,
            idle_poll_ms: 10,
            capture_fps: 15.0,
            detector_confidence_threshold: 0.35,
        }
    }
}

impl FusionConfig {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        let config: FusionConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration with environment variable overrides
    /// Environment variables are prefixed with FACEPULSE_
    /// Example: FACEPULSE_BOX_ALPHA=0.2
    pub fn from_file_with_env<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::from_file(path)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Load from multiple sources with priority:
    /// 1. Environment variables (highest priority)
    /// 2. User config file (if exists)
    /// 3. Default config file
    /// 4. Built-in defaults (lowest priority)
    pub fn load_layered(
        default_path: Option<&Path>,
        user_path: Option<&Path>,
    ) -> Result<Self, ConfigError> {
        let mut config = FusionConfig::default();

        if let Some(path) = default_path {
            if path.exists() {
                config = Self::from_file(path)?;
            }
        }

        // A user file replaces the default file wholesale
        if let Some(path) = user_path {
            if path.exists() {
                config = Self::from_file(path)?;
            }
        }

        config.apply_env_overrides()?;
        config.validate()?;

        Ok(config)
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        env_override("FACEPULSE_BOX_ALPHA", &mut self.smoothing.box_alpha)?;
        env_override("FACEPULSE_EMOTION_ALPHA", &mut self.smoothing.emotion_alpha)?;
        env_override(
            "FACEPULSE_REFRESH_INTERVAL",
            &mut self.biometrics.refresh_interval,
        )?;
        env_override("FACEPULSE_RPPG_SAMPLE_RATE", &mut self.rppg.sample_rate)?;
        env_override("FACEPULSE_RPPG_CAPACITY", &mut self.rppg.capacity)?;
        env_override("FACEPULSE_WORKER_THREADS", &mut self.runtime.worker_threads)?;
        env_override("FACEPULSE_CALL_TIMEOUT_MS", &mut self.runtime.call_timeout_ms)?;
        env_override("FACEPULSE_CAPTURE_FPS", &mut self.runtime.capture_fps)?;
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        let alpha_ok = |a: f64| a > 0.0 && a <= 1.0;
        if !alpha_ok(self.smoothing.box_alpha) {
            return Err(ConfigError::Validation(
                "smoothing.box_alpha must be in (0, 1]".to_string(),
            ));
        }
        if !alpha_ok(self.smoothing.emotion_alpha) {
            return Err(ConfigError::Validation(
                "smoothing.emotion_alpha must be in (0, 1]".to_string(),
            ));
        }

        if self.biometrics.refresh_interval == 0 {
            return Err(ConfigError::Validation(
                "biometrics.refresh_interval must be >= 1".to_string(),
            ));
        }

        if self.expression.labels.is_empty() {
            return Err(ConfigError::Validation(
                "expression.labels must not be empty".to_string(),
            ));
        }
        if !self.expression.labels.contains(&self.expression.fallback_label) {
            return Err(ConfigError::Validation(format!(
                "expression.fallback_label '{}' is not in expression.labels",
                self.expression.fallback_label
            )));
        }
        if self.expression.fallback_bias < 0.0 {
            return Err(ConfigError::Validation(
                "expression.fallback_bias must be non-negative".to_string(),
            ));
        }

        self.rppg.validate().map_err(ConfigError::Validation)?;

        if self.runtime.worker_threads == 0 {
            return Err(ConfigError::Validation(
                "runtime.worker_threads must be >= 1".to_string(),
            ));
        }
        if self.runtime.frame_queue_capacity == 0 {
            return Err(ConfigError::Validation(
                "runtime.frame_queue_capacity must be >= 1".to_string(),
            ));
        }
        if self.runtime.capture_fps <= 0.0 {
            return Err(ConfigError::Validation(
                "runtime.capture_fps must be positive".to_string(),
            ));
        }

        Ok(())
    }

    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        fs::write(path, self.to_toml_string()?)?;
        Ok(())
    }
}

fn env_override<T: FromStr>(name: &str, target: &mut T) -> Result<(), ConfigError> {
    if let Ok(val) = std::env::var(name) {
        *target = val.parse().map_err(|_| ConfigError::EnvVar {
            name: name.to_string(),
            value: val.clone(),
        })?;
    }
    Ok(())
}
