pub mod cooldown;
pub mod evaluator;

pub use cooldown::{AlarmGate, DEFAULT_ALARM_COOLDOWN};
pub use evaluator::{
    check_region, display_highlights, evaluate, evaluate_snapshot, DisplayHighlight,
};
