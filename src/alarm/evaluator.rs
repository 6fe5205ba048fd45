//! Alarm and ISO display predicates.
//!
//! Pure functions over a region table and a set of readings: no state, no I/O.
//! Regions without a reading or without the metric a rule asks for are skipped.

use serde::Serialize;

use crate::models::{AlarmEvent, Condition, IsoColor, Reading, Region, RegionIndex, RegionTable};
use crate::telemetry::{ReadingSnapshot, ReadingStore};

/// Evaluates every region against the store's current readings.
pub fn evaluate(regions: &RegionTable, readings: &ReadingStore) -> Vec<AlarmEvent> {
    evaluate_snapshot(regions, &readings.snapshot())
}

pub fn evaluate_snapshot(regions: &RegionTable, readings: &ReadingSnapshot) -> Vec<AlarmEvent> {
    regions
        .iter()
        .filter_map(|region| check_region(region, readings.get(&region.index)))
        .collect()
}

pub fn check_region(region: &Region, reading: Option<&Reading>) -> Option<AlarmEvent> {
    let rule = region.active_alarm_rule()?;
    let measured = reading?.metric(rule.mode)?;

    rule.condition
        .crossed(measured, rule.threshold_celsius)
        .then(|| AlarmEvent {
            region: region.index,
            mode: rule.mode,
            measured_celsius: measured,
            threshold_celsius: rule.threshold_celsius,
            condition: rule.condition,
        })
}

/// A region whose ISO rule is currently met, with the color to paint it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayHighlight {
    pub region: RegionIndex,
    pub color: IsoColor,
}

/// ISO rules have no mode: `above` looks at the hottest point, `below` at the coldest.
pub fn display_highlights(regions: &RegionTable, readings: &ReadingSnapshot) -> Vec<DisplayHighlight> {
    regions
        .iter()
        .filter_map(|region| {
            let rule = region.active_display_rule()?;
            let reading = readings.get(&region.index)?;
            let measured = match rule.condition {
                Condition::Above => reading.max_celsius,
                Condition::Below => reading.min_celsius,
            }?;

            rule.condition
                .crossed(measured, rule.threshold_celsius)
                .then_some(DisplayHighlight {
                    region: region.index,
                    color: rule.color,
                })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    use crate::models::{AlarmRule, DisplayRule, Geometry, Mode, OutputChannel};

    fn idx(value: u8) -> RegionIndex {
        RegionIndex::new(value).unwrap()
    }

    fn alarm_region(index: u8, mode: Mode, condition: Condition, threshold: f64) -> Region {
        Region {
            index: idx(index),
            used: true,
            geometry: Geometry::new(10, 10, 50, 50),
            alarm_rule: Some(AlarmRule {
                enabled: true,
                mode,
                condition,
                threshold_celsius: threshold,
                start_delay_secs: 0,
                stop_delay_secs: 0,
                output: OutputChannel::None,
            }),
            display_rule: None,
        }
    }

    fn reading(max: Option<f64>, min: Option<f64>, avg: Option<f64>) -> Reading {
        Reading {
            max_celsius: max,
            min_celsius: min,
            avg_celsius: avg,
            hot_point: None,
            cold_point: None,
            received_at: Utc::now(),
        }
    }

    #[test]
    fn region_two_scenario() {
        let regions =
            RegionTable::from_regions([alarm_region(2, Mode::Maximum, Condition::Above, 40.0)]);
        let store = ReadingStore::new();

        store.update(idx(2), reading(Some(42.3), None, None));
        assert_eq!(
            evaluate(&regions, &store),
            vec![AlarmEvent {
                region: idx(2),
                mode: Mode::Maximum,
                measured_celsius: 42.3,
                threshold_celsius: 40.0,
                condition: Condition::Above,
            }]
        );

        store.update(idx(2), reading(Some(39.9), None, None));
        assert!(evaluate(&regions, &store).is_empty());
    }

    #[test]
    fn threshold_equality_never_fires() {
        let regions = RegionTable::from_regions([
            alarm_region(0, Mode::Average, Condition::Above, 30.0),
            alarm_region(1, Mode::Minimum, Condition::Below, 30.0),
        ]);
        let store = ReadingStore::new();
        store.update(idx(0), reading(None, None, Some(30.0)));
        store.update(idx(1), reading(None, Some(30.0), None));
        assert!(evaluate(&regions, &store).is_empty());
    }

    #[test]
    fn mode_selects_metric() {
        let regions = RegionTable::from_regions([
            alarm_region(0, Mode::Minimum, Condition::Below, 0.0),
            alarm_region(1, Mode::Average, Condition::Above, 25.0),
        ]);
        let store = ReadingStore::new();
        // Region 0: max is cold enough but min is what counts.
        store.update(idx(0), reading(Some(-5.0), Some(1.0), Some(0.5)));
        store.update(idx(1), reading(Some(10.0), Some(5.0), Some(26.0)));

        let events = evaluate(&regions, &store);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].region, idx(1));
        assert_eq!(events[0].measured_celsius, 26.0);
    }

    #[test]
    fn unused_region_is_suppressed_even_with_enabled_rule() {
        let mut region = alarm_region(3, Mode::Maximum, Condition::Above, 20.0);
        region.used = false;
        region.display_rule = Some(DisplayRule {
            enabled: true,
            condition: Condition::Above,
            threshold_celsius: 20.0,
            color: IsoColor::Red,
        });
        let regions = RegionTable::from_regions([region]);
        let store = ReadingStore::new();
        store.update(idx(3), reading(Some(80.0), Some(70.0), Some(75.0)));

        assert!(evaluate(&regions, &store).is_empty());
        assert!(display_highlights(&regions, &store.snapshot()).is_empty());
    }

    #[test]
    fn disabled_rule_and_missing_data_are_skipped() {
        let mut disabled = alarm_region(0, Mode::Maximum, Condition::Above, 20.0);
        if let Some(rule) = disabled.alarm_rule.as_mut() {
            rule.enabled = false;
        }
        let regions = RegionTable::from_regions([
            disabled,
            alarm_region(1, Mode::Maximum, Condition::Above, 20.0),
            alarm_region(2, Mode::Average, Condition::Above, 20.0),
        ]);
        let store = ReadingStore::new();
        store.update(idx(0), reading(Some(90.0), None, None));
        // Region 1 has no reading; region 2 has no average.
        store.update(idx(2), reading(Some(90.0), None, None));

        assert!(evaluate(&regions, &store).is_empty());
    }

    #[test]
    fn repeated_evaluation_is_deterministic() {
        let regions = RegionTable::from_regions([
            alarm_region(4, Mode::Maximum, Condition::Above, 10.0),
            alarm_region(7, Mode::Minimum, Condition::Below, 10.0),
        ]);
        let store = ReadingStore::new();
        store.update(idx(4), reading(Some(11.0), Some(2.0), Some(6.0)));
        store.update(idx(7), reading(Some(11.0), Some(2.0), Some(6.0)));
        let snapshot = store.snapshot();

        let first = evaluate_snapshot(&regions, &snapshot);
        for _ in 0..5 {
            assert_eq!(evaluate_snapshot(&regions, &snapshot), first);
        }
        assert_eq!(first.len(), 2);
    }

    #[test]
    fn display_rule_uses_extremes() {
        let mut hot = Region::unused(idx(5));
        hot.used = true;
        hot.display_rule = Some(DisplayRule {
            enabled: true,
            condition: Condition::Above,
            threshold_celsius: 50.0,
            color: IsoColor::Green,
        });
        let mut cold = Region::unused(idx(6));
        cold.used = true;
        cold.display_rule = Some(DisplayRule {
            enabled: true,
            condition: Condition::Below,
            threshold_celsius: 0.0,
            color: IsoColor::Blue,
        });
        let regions = RegionTable::from_regions([hot, cold]);

        let store = ReadingStore::new();
        store.update(idx(5), reading(Some(51.0), Some(20.0), Some(30.0)));
        store.update(idx(6), reading(Some(10.0), Some(0.0), Some(5.0)));

        assert_eq!(
            display_highlights(&regions, &store.snapshot()),
            vec![DisplayHighlight {
                region: idx(5),
                color: IsoColor::Green,
            }]
        );
    }
}
