use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    sync::{PoisonError, RwLock},
    time::Duration,
};

use crate::camera::Credentials;
use crate::telemetry::{StreamConfig, DEFAULT_TELEMETRY_PORT};

pub const SETTINGS_PATH_ENV: &str = "THERMALWATCH_SETTINGS";
const DEFAULT_SETTINGS_FILE: &str = "thermalwatch.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraSettings {
    /// Control endpoint host, optionally `host:port`.
    pub address: String,
    pub user_id: String,
    pub password: String,
    pub telemetry_port: u16,
    pub request_timeout_ms: u64,
    pub connect_timeout_ms: u64,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            address: "192.168.0.56".into(),
            user_id: "admin".into(),
            password: String::new(),
            telemetry_port: DEFAULT_TELEMETRY_PORT,
            request_timeout_ms: 2_000,
            connect_timeout_ms: 10_000,
        }
    }
}

impl CameraSettings {
    pub fn credentials(&self) -> Credentials {
        Credentials::new(self.user_id.clone(), self.password.clone())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Telemetry goes to the same host as the control endpoint, on its own port.
    pub fn stream_config(&self) -> StreamConfig {
        let host = self
            .address
            .rsplit_once(':')
            .map(|(host, _)| host)
            .unwrap_or(&self.address);
        StreamConfig {
            host: host.to_string(),
            port: self.telemetry_port,
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlarmSettings {
    pub cooldown_secs: u64,
    pub evaluation_interval_ms: u64,
    pub reconnect_interval_secs: u64,
}

impl Default for AlarmSettings {
    fn default() -> Self {
        Self {
            cooldown_secs: 3,
            evaluation_interval_ms: 500,
            reconnect_interval_secs: 5,
        }
    }
}

impl AlarmSettings {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    pub fn evaluation_interval(&self) -> Duration {
        Duration::from_millis(self.evaluation_interval_ms.max(1))
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_secs(self.reconnect_interval_secs.max(1))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct UserSettings {
    camera: CameraSettings,
    alarm: AlarmSettings,
}

pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<UserSettings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_else(|err| {
                log::warn!("Ignoring unreadable settings in {}: {err}", path.display());
                UserSettings::default()
            })
        } else {
            UserSettings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    /// `THERMALWATCH_SETTINGS` if set, otherwise `thermalwatch.json` in the working directory.
    pub fn default_path() -> PathBuf {
        std::env::var_os(SETTINGS_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SETTINGS_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn camera(&self) -> CameraSettings {
        self.read().camera.clone()
    }

    pub fn alarm(&self) -> AlarmSettings {
        self.read().alarm.clone()
    }

    pub fn update_camera(&self, settings: CameraSettings) -> Result<()> {
        let mut guard = self.data.write().unwrap_or_else(PoisonError::into_inner);
        guard.camera = settings;
        self.persist(&guard)
    }

    pub fn update_alarm(&self, settings: AlarmSettings) -> Result<()> {
        let mut guard = self.data.write().unwrap_or_else(PoisonError::into_inner);
        guard.alarm = settings;
        self.persist(&guard)
    }

    pub fn reload(&self) -> Result<()> {
        let contents = fs::read_to_string(&self.path)?;
        let data: UserSettings = serde_json::from_str(&contents)?;
        let mut guard = self.data.write().unwrap_or_else(PoisonError::into_inner);
        *guard = data;
        Ok(())
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, UserSettings> {
        self.data.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn persist(&self, data: &UserSettings) -> Result<()> {
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }
}
