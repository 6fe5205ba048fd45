pub mod controller;

use serde::Serialize;

use crate::alarm::DisplayHighlight;
use crate::error::CameraError;
use crate::models::{AlarmEvent, RegionTable};
use crate::settings::{AlarmSettings, CameraSettings, SettingsStore};
use crate::telemetry::{ReadingSnapshot, StreamState};

pub use controller::MonitorSession;

/// Callbacks from a running session. Invoked from runtime worker tasks, so
/// implementations must not block.
pub trait SessionObserver: Send + Sync {
    /// A freshly fetched table replaced the previous one.
    fn on_region_config_changed(&self, regions: &RegionTable);

    /// Violations admitted by the cooldown gate, all dispatched together.
    fn on_alarm_events(&self, events: &[AlarmEvent]);

    fn on_stream_state_changed(&self, _state: StreamState) {}

    /// The camera refused the credentials mid-session. Telemetry has been
    /// stopped and the session will not recover.
    fn on_authentication_failed(&self, _error: &CameraError) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum StreamHealth {
    Live,
    /// Telemetry is down; the last readings are still shown.
    Degraded,
    /// Credentials were rejected. Nothing is evaluated until a new session starts.
    Unauthorized,
}

/// Everything the renderer needs to draw one overlay frame.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OverlaySnapshot {
    pub regions: RegionTable,
    pub readings: ReadingSnapshot,
    pub highlights: Vec<DisplayHighlight>,
    pub health: StreamHealth,
}

#[derive(Debug, Clone, Default)]
pub struct SessionSettings {
    pub camera: CameraSettings,
    pub alarm: AlarmSettings,
}

impl From<&SettingsStore> for SessionSettings {
    fn from(store: &SettingsStore) -> Self {
        Self {
            camera: store.camera(),
            alarm: store.alarm(),
        }
    }
}
