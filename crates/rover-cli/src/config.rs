//! Configuration Vault – reads/writes `~/.rover/config.toml`.
//!
//! The file holds everything needed to wire the bridge: video transport,
//! serial gateway, perception endpoints, and safety timings.  Library crates
//! never see this type; they receive the plain config structs built by the
//! `*_config` helpers below.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use rover_hal::{GatewayConfig, IngestConfig, VideoSource};
use rover_runtime::detector::{DEFAULT_OBSTACLE_CLASSES, DetectorConfig};
use rover_runtime::{HazardPolicy, NavigatorConfig, SchedulerConfig};

/// Which transport delivers camera frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum VideoMode {
    #[default]
    Udp,
    Http,
    Device,
}

impl std::fmt::Display for VideoMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VideoMode::Udp => write!(f, "udp"),
            VideoMode::Http => write!(f, "http"),
            VideoMode::Device => write!(f, "device"),
        }
    }
}

impl std::str::FromStr for VideoMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "udp" => Ok(VideoMode::Udp),
            "http" => Ok(VideoMode::Http),
            "device" => Ok(VideoMode::Device),
            other => Err(format!("unknown video mode '{other}'")),
        }
    }
}

/// Persisted bridge configuration stored in `~/.rover/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub video_mode: VideoMode,

    /// UDP port the rover camera sends datagrams to.
    #[serde(default = "default_udp_port")]
    pub udp_port: u16,

    /// MJPEG stream URL for `http` mode.
    #[serde(default = "default_http_url")]
    pub http_url: String,

    /// Directory of JPEG files replayed in `device` mode.
    #[serde(default = "default_device_dir")]
    pub device_dir: String,

    #[serde(default = "default_device_fps")]
    pub device_fps: f64,

    /// Serial device node.  Empty means auto-detect.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub gateway_port: String,

    /// Navigator endpoint.  Empty disables the strategic layer.
    #[serde(default)]
    pub navigator_url: String,

    /// Bearer token for the navigator endpoint.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub navigator_api_key: String,

    #[serde(default = "default_navigator_timeout_secs")]
    pub navigator_timeout_secs: f64,

    #[serde(default = "default_navigator_cooldown_secs")]
    pub navigator_cooldown_secs: f64,

    /// Detector endpoint.  Empty disables the tactical layer.
    #[serde(default)]
    pub detector_url: String,

    #[serde(default = "default_stop_area_ratio")]
    pub stop_area_ratio: f32,

    #[serde(default = "default_obstacle_classes")]
    pub obstacle_classes: Vec<String>,

    #[serde(default = "default_min_confidence")]
    pub min_confidence: f32,

    /// Let strategic commands through without operator approval.
    #[serde(default)]
    pub auto_mode: bool,

    #[serde(default = "default_cruise_speed")]
    pub cruise_speed: f32,

    /// Show annotated detector frames instead of the raw feed.
    #[serde(default)]
    pub annotate: bool,

    #[serde(default = "default_reconnect_backoff_ms")]
    pub reconnect_backoff_ms: u64,

    /// Frame silence that triggers a SAFETY stop.  0 disables.
    #[serde(default = "default_camera_timeout_ms")]
    pub camera_timeout_ms: u64,

    /// Gateway feedback silence that triggers a SAFETY stop.  0 disables.
    #[serde(default)]
    pub gateway_timeout_ms: u64,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("video_mode", &self.video_mode)
            .field("udp_port", &self.udp_port)
            .field("http_url", &self.http_url)
            .field("gateway_port", &self.gateway_port)
            .field("navigator_url", &self.navigator_url)
            .field(
                "navigator_api_key",
                if self.navigator_api_key.is_empty() { &"<not set>" } else { &"<redacted>" },
            )
            .field("detector_url", &self.detector_url)
            .field("auto_mode", &self.auto_mode)
            .finish_non_exhaustive()
    }
}

fn default_udp_port() -> u16 {
    9999
}
fn default_http_url() -> String {
    "http://192.168.1.10/stream".to_string()
}
fn default_device_dir() -> String {
    "frames".to_string()
}
fn default_device_fps() -> f64 {
    15.0
}
fn default_navigator_timeout_secs() -> f64 {
    3.0
}
fn default_navigator_cooldown_secs() -> f64 {
    2.0
}
fn default_stop_area_ratio() -> f32 {
    0.4
}
fn default_obstacle_classes() -> Vec<String> {
    DEFAULT_OBSTACLE_CLASSES.iter().map(|c| c.to_string()).collect()
}
fn default_min_confidence() -> f32 {
    0.5
}
fn default_cruise_speed() -> f32 {
    0.3
}
fn default_reconnect_backoff_ms() -> u64 {
    2000
}
fn default_camera_timeout_ms() -> u64 {
    2000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            video_mode: VideoMode::default(),
            udp_port: default_udp_port(),
            http_url: default_http_url(),
            device_dir: default_device_dir(),
            device_fps: default_device_fps(),
            gateway_port: String::new(),
            navigator_url: String::new(),
            navigator_api_key: String::new(),
            navigator_timeout_secs: default_navigator_timeout_secs(),
            navigator_cooldown_secs: default_navigator_cooldown_secs(),
            detector_url: String::new(),
            stop_area_ratio: default_stop_area_ratio(),
            obstacle_classes: default_obstacle_classes(),
            min_confidence: default_min_confidence(),
            auto_mode: false,
            cruise_speed: default_cruise_speed(),
            annotate: false,
            reconnect_backoff_ms: default_reconnect_backoff_ms(),
            camera_timeout_ms: default_camera_timeout_ms(),
            gateway_timeout_ms: 0,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Library configs
// ─────────────────────────────────────────────────────────────────────────────

fn non_empty(s: &str) -> Option<String> {
    let s = s.trim();
    (!s.is_empty()).then(|| s.to_string())
}

fn secs(value: f64, fallback: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or_else(|_| Duration::from_secs_f64(fallback))
}

impl Config {
    pub fn video_source(&self) -> VideoSource {
        match self.video_mode {
            VideoMode::Udp => VideoSource::Udp { port: self.udp_port },
            VideoMode::Http => VideoSource::Http { url: self.http_url.clone() },
            VideoMode::Device => VideoSource::Device {
                dir: PathBuf::from(&self.device_dir),
                fps: self.device_fps,
            },
        }
    }

    pub fn ingest_config(&self) -> IngestConfig {
        IngestConfig {
            backoff: Duration::from_millis(self.reconnect_backoff_ms),
            ..IngestConfig::default()
        }
    }

    pub fn gateway_config(&self) -> GatewayConfig {
        GatewayConfig {
            port: non_empty(&self.gateway_port).map(PathBuf::from),
            reconnect_delay: Duration::from_millis(self.reconnect_backoff_ms),
        }
    }

    pub fn navigator_config(&self) -> NavigatorConfig {
        NavigatorConfig {
            url: non_empty(&self.navigator_url),
            api_key: non_empty(&self.navigator_api_key),
            timeout: secs(self.navigator_timeout_secs, default_navigator_timeout_secs()),
            cooldown: secs(self.navigator_cooldown_secs, default_navigator_cooldown_secs()),
            ..NavigatorConfig::default()
        }
    }

    pub fn detector_config(&self) -> DetectorConfig {
        DetectorConfig {
            url: non_empty(&self.detector_url),
            ..DetectorConfig::default()
        }
    }

    pub fn hazard_policy(&self) -> HazardPolicy {
        HazardPolicy {
            obstacle_classes: self.obstacle_classes.clone(),
            stop_area_ratio: self.stop_area_ratio,
            min_confidence: self.min_confidence,
        }
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            cruise_speed: self.cruise_speed,
            annotate: self.annotate,
            ..SchedulerConfig::default()
        }
    }

    /// `None` when the watchdog for that link is disabled.
    pub fn camera_timeout(&self) -> Option<Duration> {
        (self.camera_timeout_ms > 0).then(|| Duration::from_millis(self.camera_timeout_ms))
    }

    pub fn gateway_timeout(&self) -> Option<Duration> {
        (self.gateway_timeout_ms > 0).then(|| Duration::from_millis(self.gateway_timeout_ms))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Load / save
// ─────────────────────────────────────────────────────────────────────────────

/// Return the path to `~/.rover/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".rover").join("config.toml")
}

/// Load the config from disk.  Returns `None` if the file does not exist.
pub fn load() -> Result<Option<Config>, String> {
    load_from(&config_path())
}

pub(crate) fn load_from(path: &PathBuf) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let mut cfg: Config =
        toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

/// Apply `ROVER_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `ROVER_VIDEO_MODE` | `video_mode` |
/// | `ROVER_NAVIGATOR_URL` | `navigator_url` |
/// | `ROVER_GATEWAY_PORT` | `gateway_port` |
/// | `ROVER_UDP_PORT` | `udp_port` |
///
/// Unparsable values are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("ROVER_VIDEO_MODE")
        && let Ok(mode) = v.parse::<VideoMode>()
    {
        cfg.video_mode = mode;
    }
    if let Ok(v) = std::env::var("ROVER_NAVIGATOR_URL") {
        cfg.navigator_url = v;
    }
    if let Ok(v) = std::env::var("ROVER_GATEWAY_PORT") {
        cfg.gateway_port = v;
    }
    if let Ok(v) = std::env::var("ROVER_UDP_PORT")
        && let Ok(port) = v.parse::<u16>()
    {
        cfg.udp_port = port;
    }
}

/// Save the config to disk, creating `~/.rover/` if necessary.
pub fn save(cfg: &Config) -> Result<(), String> {
    save_to(cfg, &config_path())
}

pub(crate) fn save_to(cfg: &Config, path: &PathBuf) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| format!("Failed to set config directory permissions: {}", e))?;
        }
    }
    let raw =
        toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))?;
    // The navigator key may be stored here: owner read/write only.
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| {
                use std::io::Write;
                f.write_all(raw.as_bytes())
            })
            .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw)
        .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    Ok(())
}
