pub mod sync;

pub use sync::{AlarmRow, DisplayRow, GeometryRow, RegionEditor, UsageChange};
