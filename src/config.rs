use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::ingest::CameraSettings;

const DEFAULT_CAMERA_DEVICE: &str = "stub://camera0";
const DEFAULT_CAMERA_FPS: u32 = 10;
const DEFAULT_CAMERA_WIDTH: u32 = 640;
const DEFAULT_CAMERA_HEIGHT: u32 = 480;
const DEFAULT_API_ADDR: &str = "127.0.0.1:5001";
const DEFAULT_SNAPSHOT_DIR: &str = "snapshots";
const DEFAULT_SETTINGS_PATH: &str = "settings.json";
const DEFAULT_ALERT_COOLDOWN_SECS: u64 = 30;
const DEFAULT_NOTIFY_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct WatchpostConfigFile {
    camera: Option<CameraConfigFile>,
    api: Option<ApiConfigFile>,
    snapshot_dir: Option<PathBuf>,
    settings_path: Option<PathBuf>,
    alert: Option<AlertConfigFile>,
    detector: Option<DetectorConfigFile>,
    notify: Option<NotifyConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct CameraConfigFile {
    device: Option<String>,
    target_fps: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ApiConfigFile {
    addr: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct AlertConfigFile {
    cooldown_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct DetectorConfigFile {
    model_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct NotifyConfigFile {
    relay_url: Option<String>,
    from: Option<String>,
    to: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct WatchpostConfig {
    pub camera: CameraSettings,
    pub api_addr: String,
    pub snapshot_dir: PathBuf,
    pub settings_path: PathBuf,
    pub alert_cooldown: Duration,
    pub model_path: Option<PathBuf>,
    pub notify: NotifySettings,
}

/// Relay notification settings. The token never comes from a file.
#[derive(Clone, Default)]
pub struct NotifySettings {
    pub relay_url: Option<String>,
    pub token: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub timeout: Duration,
}

impl std::fmt::Debug for NotifySettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotifySettings")
            .field("relay_url", &self.relay_url)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("from", &self.from)
            .field("to", &self.to)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl NotifySettings {
    pub fn relay_configured(&self) -> bool {
        self.relay_url.is_some()
    }
}

impl WatchpostConfig {
    /// Load from the file named by `WATCHPOST_CONFIG` (if set), then apply
    /// environment overrides and validate.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("WATCHPOST_CONFIG").ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: WatchpostConfigFile) -> Self {
        let camera = file.camera.unwrap_or_default();
        let notify = file.notify.unwrap_or_default();
        Self {
            camera: CameraSettings {
                device: camera
                    .device
                    .unwrap_or_else(|| DEFAULT_CAMERA_DEVICE.to_string()),
                target_fps: camera.target_fps.unwrap_or(DEFAULT_CAMERA_FPS),
                width: camera.width.unwrap_or(DEFAULT_CAMERA_WIDTH),
                height: camera.height.unwrap_or(DEFAULT_CAMERA_HEIGHT),
            },
            api_addr: file
                .api
                .and_then(|api| api.addr)
                .unwrap_or_else(|| DEFAULT_API_ADDR.to_string()),
            snapshot_dir: file
                .snapshot_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_SNAPSHOT_DIR)),
            settings_path: file
                .settings_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_SETTINGS_PATH)),
            alert_cooldown: Duration::from_secs(
                file.alert
                    .and_then(|alert| alert.cooldown_secs)
                    .unwrap_or(DEFAULT_ALERT_COOLDOWN_SECS),
            ),
            model_path: file.detector.and_then(|detector| detector.model_path),
            notify: NotifySettings {
                relay_url: notify.relay_url,
                token: None,
                from: notify.from,
                to: notify.to,
                timeout: Duration::from_secs(
                    notify.timeout_secs.unwrap_or(DEFAULT_NOTIFY_TIMEOUT_SECS),
                ),
            },
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(device) = env_nonempty("WATCHPOST_CAMERA") {
            self.camera.device = device;
        }
        if let Some(addr) = env_nonempty("WATCHPOST_API_ADDR") {
            self.api_addr = addr;
        }
        if let Some(dir) = env_nonempty("WATCHPOST_SNAPSHOT_DIR") {
            self.snapshot_dir = PathBuf::from(dir);
        }
        if let Some(path) = env_nonempty("WATCHPOST_SETTINGS") {
            self.settings_path = PathBuf::from(path);
        }
        if let Some(path) = env_nonempty("WATCHPOST_MODEL_PATH") {
            self.model_path = Some(PathBuf::from(path));
        }
        if let Some(cooldown) = env_nonempty("WATCHPOST_ALERT_COOLDOWN_SECS") {
            let seconds: u64 = cooldown.trim().parse().map_err(|_| {
                anyhow!("WATCHPOST_ALERT_COOLDOWN_SECS must be an integer number of seconds")
            })?;
            self.alert_cooldown = Duration::from_secs(seconds);
        }
        if let Some(url) = env_nonempty("WATCHPOST_NOTIFY_URL") {
            self.notify.relay_url = Some(url);
        }
        if let Some(from) = env_nonempty("WATCHPOST_NOTIFY_FROM") {
            self.notify.from = Some(from);
        }
        if let Some(to) = env_nonempty("WATCHPOST_NOTIFY_TO") {
            self.notify.to = Some(to);
        }
        self.notify.token = env_nonempty("WATCHPOST_NOTIFY_TOKEN");
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.camera.device.trim().is_empty() {
            return Err(anyhow!("camera.device must not be empty"));
        }
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(anyhow!("camera width and height must be greater than zero"));
        }
        if self.camera.target_fps == 0 {
            return Err(anyhow!("camera.target_fps must be greater than zero"));
        }
        if self.alert_cooldown.is_zero() {
            return Err(anyhow!("alert.cooldown_secs must be greater than zero"));
        }
        self.api_addr
            .parse::<SocketAddr>()
            .map_err(|e| anyhow!("invalid api addr '{}': {}", self.api_addr, e))?;
        if self.notify.relay_configured() {
            if self.notify.token.is_none() {
                return Err(anyhow!(
                    "notify.relay_url is set but WATCHPOST_NOTIFY_TOKEN is not"
                ));
            }
            if self.notify.to.is_none() {
                return Err(anyhow!("notify.relay_url is set but notify.to is not"));
            }
        }
        Ok(())
    }

    /// Interval between frames at the configured rate.
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(1000 / u64::from(self.camera.target_fps.max(1)))
    }
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn read_config_file(path: &Path) -> Result<WatchpostConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("toml"))
        .unwrap_or(false);
    let cfg = if is_toml {
        toml::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}
