use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub stream: StreamConfig,
    #[serde(default)]
    pub reader: ReaderConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamConfig {
    pub url: String,
    /// Single-JPEG endpoint used in `polling` mode. Derived from `url` when unset.
    #[serde(default)]
    pub snapshot_url: Option<String>,
    #[serde(default = "default_mode")]
    pub mode: String,
    /// When set, `quality` (and `fps` for MJPEG) are appended as query parameters.
    #[serde(default)]
    pub quality: Option<u32>,
    #[serde(default = "default_fps")]
    pub fps: f64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,
    #[serde(default = "default_max_backoff")]
    pub max_backoff_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReaderConfig {
    #[serde(default)]
    pub camera_parameter_path: Option<PathBuf>,
    #[serde(default)]
    pub undistort: bool,
    #[serde(default = "default_poll_interval_us")]
    pub poll_interval_us: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_output_dir")]
    pub dir: PathBuf,
    /// 0 runs until the camera closes.
    #[serde(default)]
    pub max_frames: u64,
    #[serde(default = "default_save_every")]
    pub save_every: u64,
    #[serde(default = "default_frame_timeout")]
    pub frame_timeout_secs: u64,
    /// "sequential" names files after the reader's frame names; "dated" files them
    /// under per-day directories keyed by capture time.
    #[serde(default = "default_layout")]
    pub layout: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            camera_parameter_path: None,
            undistort: false,
            poll_interval_us: default_poll_interval_us(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
            max_frames: 0,
            save_every: default_save_every(),
            frame_timeout_secs: default_frame_timeout(),
            layout: default_layout(),
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
        let config = Self::parse(&content)?;
        debug!(path = %path.display(), "config loaded");
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }
}

impl StreamConfig {
    /// Stream settings for `url` with every other field at its default.
    pub fn from_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            snapshot_url: None,
            mode: default_mode(),
            quality: None,
            fps: default_fps(),
            connect_timeout_secs: default_connect_timeout(),
            read_timeout_secs: default_read_timeout(),
            max_backoff_secs: default_max_backoff(),
        }
    }

    /// URL requested in `mjpeg` mode.
    pub fn stream_url(&self) -> String {
        match self.quality {
            Some(quality) => with_query(
                &self.url,
                &format!("quality={quality}&fps={fps}", fps = self.fps),
            ),
            None => self.url.clone(),
        }
    }

    /// URL requested in `polling` mode.
    pub fn snapshot_url(&self) -> String {
        let base = self
            .snapshot_url
            .clone()
            .unwrap_or_else(|| self.url.replace("/stream", "/frame"));
        match self.quality {
            Some(quality) => with_query(&base, &format!("quality={quality}")),
            None => base,
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_secs(self.max_backoff_secs)
    }

    /// Interval between snapshot requests. Rates that are not positive, or too small
    /// to give a representable interval, fall back to the default.
    pub fn frame_interval(&self) -> Duration {
        let fallback = Duration::from_secs_f64(1.0 / default_fps());
        if self.fps > 0.0 {
            Duration::try_from_secs_f64(1.0 / self.fps).unwrap_or(fallback)
        } else {
            fallback
        }
    }
}

impl ReaderConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_micros(self.poll_interval_us.max(1))
    }
}

impl OutputConfig {
    pub fn frame_timeout(&self) -> Duration {
        Duration::from_secs(self.frame_timeout_secs)
    }
}

fn with_query(url: &str, query: &str) -> String {
    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{url}{separator}{query}")
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    ReadFile(String, std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(String),
}

// Default value functions
fn default_mode() -> String {
    "mjpeg".into()
}
fn default_fps() -> f64 {
    10.0
}
fn default_connect_timeout() -> u64 {
    10
}
fn default_read_timeout() -> u64 {
    5
}
fn default_max_backoff() -> u64 {
    30
}
fn default_poll_interval_us() -> u64 {
    10_000
}
fn default_output_dir() -> PathBuf {
    PathBuf::from("frames")
}
fn default_save_every() -> u64 {
    1
}
fn default_frame_timeout() -> u64 {
    10
}
fn default_layout() -> String {
    "sequential".into()
}
fn default_log_level() -> String {
    "info".into()
}
