use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub camera: CameraConfig,
    pub detection: DetectionConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub server: ServerConfig,
    pub location: LocationConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CameraConfig {
    /// Camera endpoint: an MJPEG stream URL or a single-frame URL.
    pub url: String,
    #[serde(default = "default_mode")]
    pub mode: String,
    #[serde(default = "default_quality")]
    pub quality: u32,
    #[serde(default = "default_fps")]
    pub fps: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DetectionConfig {
    /// Inference endpoint that accepts a JPEG body and returns detections.
    pub model_url: String,
    #[serde(default = "default_accident_class")]
    pub accident_class: u32,
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f32,
    /// Only every Nth captured frame is forwarded to the detector.
    #[serde(default = "default_sample_interval")]
    pub sample_interval: u64,
    /// Pause after a persisted detection before sampling resumes.
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_dir")]
    pub dir: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_refresh_secs")]
    pub refresh_secs: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LocationConfig {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            dir: default_store_dir(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            refresh_secs: default_refresh_secs(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFile(path.display().to_string(), e))?;
        let config: Config =
            toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that downstream duration math cannot represent.
    fn validate(&self) -> Result<(), ConfigError> {
        if !self.camera.fps.is_finite() || self.camera.fps <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "camera.fps must be a positive number, got {}",
                self.camera.fps
            )));
        }
        if !self.detection.cooldown_secs.is_finite() || self.detection.cooldown_secs < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "detection.cooldown_secs must be a non-negative number, got {}",
                self.detection.cooldown_secs
            )));
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    ReadFile(String, std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

// Default value functions
fn default_mode() -> String {
    "mjpeg".into()
}
fn default_quality() -> u32 {
    80
}
fn default_fps() -> f64 {
    10.0
}
fn default_accident_class() -> u32 {
    1
}
fn default_min_confidence() -> f32 {
    0.0
}
fn default_sample_interval() -> u64 {
    5
}
fn default_cooldown_secs() -> f64 {
    2.0
}
fn default_store_dir() -> String {
    "accident_images".into()
}
fn default_bind() -> String {
    "0.0.0.0:5000".into()
}
fn default_refresh_secs() -> u32 {
    5
}
fn default_log_level() -> String {
    "info".into()
}
