mod alarm;
mod reading;
mod region;

pub use alarm::AlarmEvent;
pub use reading::{PixelPoint, Reading};
pub use region::{
    AlarmRule, Condition, DisplayRule, Geometry, IsoColor, Mode, OutputChannel, Region,
    RegionIndex, RegionTable, CONFIG_CHANGED_AREA_ID, REGION_COUNT,
};
