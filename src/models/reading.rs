//! Per-region temperature readings decoded from the telemetry port.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::region::Mode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelPoint {
    pub x: i32,
    pub y: i32,
}

/// Latest temperatures for one region. `None` means the camera sent nothing usable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reading {
    pub max_celsius: Option<f64>,
    pub min_celsius: Option<f64>,
    pub avg_celsius: Option<f64>,
    pub hot_point: Option<PixelPoint>,
    pub cold_point: Option<PixelPoint>,
    pub received_at: DateTime<Utc>,
}

impl Reading {
    pub fn metric(&self, mode: Mode) -> Option<f64> {
        match mode {
            Mode::Maximum => self.max_celsius,
            Mode::Minimum => self.min_celsius,
            Mode::Average => self.avg_celsius,
        }
    }
}
