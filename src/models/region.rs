//! Region configuration data models.
//!
//! A camera exposes exactly ten rectangular regions of interest. Each one
//! carries a single `used` flag plus optional alarm and display (ISO) rules.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub const REGION_COUNT: usize = 10;

/// Wire-level `area_id` that announces a configuration change instead of a reading.
pub const CONFIG_CHANGED_AREA_ID: i64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct RegionIndex(u8);

impl RegionIndex {
    pub fn new(value: u8) -> Option<Self> {
        (usize::from(value) < REGION_COUNT).then_some(Self(value))
    }

    pub fn from_area_id(area_id: i64) -> Option<Self> {
        u8::try_from(area_id).ok().and_then(Self::new)
    }

    pub fn get(self) -> u8 {
        self.0
    }

    pub fn as_usize(self) -> usize {
        usize::from(self.0)
    }

    pub fn all() -> impl Iterator<Item = RegionIndex> {
        (0..REGION_COUNT as u8).map(RegionIndex)
    }
}

impl TryFrom<u8> for RegionIndex {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value).ok_or_else(|| format!("region index {value} out of range 0..{REGION_COUNT}"))
    }
}

impl From<RegionIndex> for u8 {
    fn from(index: RegionIndex) -> Self {
        index.0
    }
}

impl fmt::Display for RegionIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which aggregate statistic of a region feeds an alarm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Mode {
    Maximum,
    Minimum,
    Average,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Maximum => "maximum",
            Mode::Minimum => "minimum",
            Mode::Average => "average",
        }
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "maximum" => Ok(Mode::Maximum),
            "minimum" => Ok(Mode::Minimum),
            "average" => Ok(Mode::Average),
            _ => Err(format!("unknown mode '{value}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Condition {
    Above,
    Below,
}

impl Condition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Condition::Above => "above",
            Condition::Below => "below",
        }
    }

    /// Strict comparison: a measurement equal to the threshold never crosses it.
    pub fn crossed(&self, measured: f64, threshold: f64) -> bool {
        match self {
            Condition::Above => measured > threshold,
            Condition::Below => measured < threshold,
        }
    }
}

impl FromStr for Condition {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "above" => Ok(Condition::Above),
            "below" => Ok(Condition::Below),
            _ => Err(format!("unknown condition '{value}'")),
        }
    }
}

/// Relay output driven by the camera when an alarm fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OutputChannel {
    #[default]
    None,
    One,
    Two,
}

impl OutputChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputChannel::None => "none",
            OutputChannel::One => "1",
            OutputChannel::Two => "2",
        }
    }
}

impl FromStr for OutputChannel {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "none" | "" => Ok(OutputChannel::None),
            "1" => Ok(OutputChannel::One),
            "2" => Ok(OutputChannel::Two),
            _ => Err(format!("unknown alarm output '{value}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum IsoColor {
    #[default]
    Red,
    Green,
    Blue,
    Grey,
}

impl IsoColor {
    pub fn as_str(&self) -> &'static str {
        match self {
            IsoColor::Red => "red",
            IsoColor::Green => "green",
            IsoColor::Blue => "blue",
            IsoColor::Grey => "grey",
        }
    }
}

impl FromStr for IsoColor {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "red" => Ok(IsoColor::Red),
            "green" => Ok(IsoColor::Green),
            "blue" => Ok(IsoColor::Blue),
            "grey" | "gray" => Ok(IsoColor::Grey),
            _ => Err(format!("unknown iso color '{value}'")),
        }
    }
}

/// Rectangle in the camera's native pixel space. No ordering is enforced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Geometry {
    pub start_x: i32,
    pub start_y: i32,
    pub end_x: i32,
    pub end_y: i32,
}

impl Geometry {
    pub fn new(start_x: i32, start_y: i32, end_x: i32, end_y: i32) -> Self {
        Self {
            start_x,
            start_y,
            end_x,
            end_y,
        }
    }

    /// Returns the same rectangle with start <= end on both axes.
    pub fn normalized(&self) -> Self {
        Self {
            start_x: self.start_x.min(self.end_x),
            start_y: self.start_y.min(self.end_y),
            end_x: self.start_x.max(self.end_x),
            end_y: self.start_y.max(self.end_y),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlarmRule {
    pub enabled: bool,
    pub mode: Mode,
    pub condition: Condition,
    pub threshold_celsius: f64,
    /// Carried for round-tripping to the camera; evaluation does not apply it.
    pub start_delay_secs: u32,
    /// Carried for round-tripping to the camera; evaluation does not apply it.
    pub stop_delay_secs: u32,
    pub output: OutputChannel,
}

/// ISO threshold coloring rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayRule {
    pub enabled: bool,
    pub condition: Condition,
    pub threshold_celsius: f64,
    pub color: IsoColor,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Region {
    pub index: RegionIndex,
    pub used: bool,
    pub geometry: Geometry,
    pub alarm_rule: Option<AlarmRule>,
    pub display_rule: Option<DisplayRule>,
}

impl Region {
    pub fn unused(index: RegionIndex) -> Self {
        Self {
            index,
            used: false,
            geometry: Geometry::default(),
            alarm_rule: None,
            display_rule: None,
        }
    }

    /// The alarm rule, only when both the region and the rule are switched on.
    pub fn active_alarm_rule(&self) -> Option<&AlarmRule> {
        if !self.used {
            return None;
        }
        self.alarm_rule.as_ref().filter(|rule| rule.enabled)
    }

    pub fn active_display_rule(&self) -> Option<&DisplayRule> {
        if !self.used {
            return None;
        }
        self.display_rule.as_ref().filter(|rule| rule.enabled)
    }
}

/// All ten region slots, always fully populated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionTable {
    regions: [Region; REGION_COUNT],
}

impl RegionTable {
    pub fn unused() -> Self {
        Self {
            regions: std::array::from_fn(|slot| Region::unused(RegionIndex(slot as u8))),
        }
    }

    /// Places each region in the slot named by its own index; missing slots stay unused.
    pub fn from_regions(regions: impl IntoIterator<Item = Region>) -> Self {
        let mut table = Self::unused();
        for region in regions {
            let slot = region.index.as_usize();
            table.regions[slot] = region;
        }
        table
    }

    pub fn get(&self, index: RegionIndex) -> &Region {
        &self.regions[index.as_usize()]
    }

    pub fn get_mut(&mut self, index: RegionIndex) -> &mut Region {
        &mut self.regions[index.as_usize()]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Region> {
        self.regions.iter()
    }

    pub fn used_count(&self) -> usize {
        self.regions.iter().filter(|region| region.used).count()
    }
}

impl Default for RegionTable {
    fn default() -> Self {
        Self::unused()
    }
}
