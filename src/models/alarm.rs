use serde::{Deserialize, Serialize};

use super::region::{Condition, Mode, RegionIndex};

/// A single region in violation during one evaluation cycle. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlarmEvent {
    pub region: RegionIndex,
    pub mode: Mode,
    pub measured_celsius: f64,
    pub threshold_celsius: f64,
    pub condition: Condition,
}

impl AlarmEvent {
    pub fn message(&self) -> String {
        format!(
            "Region {}: {} {:.1}°C is {} threshold {:.1}°C",
            self.region,
            self.mode.as_str(),
            self.measured_celsius,
            self.condition.as_str(),
            self.threshold_celsius
        )
    }
}
