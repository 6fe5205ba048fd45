//! `key=value` response bodies from the camera's CGI control endpoint.

use std::collections::HashMap;

use log::warn;

use crate::models::{
    AlarmRule, Condition, DisplayRule, Geometry, IsoColor, Mode, OutputChannel, Region,
    RegionIndex,
};

const ON: &str = "on";

/// One pair per line. Lines without `=` are ignored and the last duplicate wins.
pub fn parse_kv_body(body: &str) -> HashMap<String, String> {
    body.lines()
        .filter_map(|line| line.split_once('='))
        .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
        .collect()
}

/// Builds a region from a `getthermalroi{N}` response. Absent keys fall back to an
/// unused region with zero geometry and no rules.
pub fn region_from_kv(index: RegionIndex, kv: &HashMap<String, String>) -> Region {
    Region {
        index,
        used: flag(kv, "roi_use"),
        geometry: geometry_from_kv(index, kv),
        alarm_rule: alarm_rule_from_kv(index, kv),
        display_rule: display_rule_from_kv(index, kv),
    }
}

fn flag(kv: &HashMap<String, String>, key: &str) -> bool {
    kv.get(key).map(|value| value == ON).unwrap_or(false)
}

fn text<'a>(kv: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    kv.get(key).map(String::as_str).filter(|value| !value.is_empty())
}

fn geometry_from_kv(index: RegionIndex, kv: &HashMap<String, String>) -> Geometry {
    let coord = |key: &str| -> Result<i32, String> {
        match kv.get(key) {
            None => Ok(0),
            Some(raw) => raw
                .parse::<i32>()
                .map_err(|err| format!("{key}='{raw}': {err}")),
        }
    };

    let parsed = (|| {
        Ok::<_, String>(Geometry::new(
            coord("startx")?,
            coord("starty")?,
            coord("endx")?,
            coord("endy")?,
        ))
    })();

    // One bad coordinate invalidates the whole rectangle.
    parsed.unwrap_or_else(|err| {
        warn!("region {index}: coordinate parse failed ({err}); using zero geometry");
        Geometry::default()
    })
}

fn threshold(index: RegionIndex, kv: &HashMap<String, String>) -> Option<f64> {
    let raw = text(kv, "temperature")?;
    match raw.parse::<f64>() {
        Ok(value) if value.is_finite() => Some(value),
        _ => {
            warn!("region {index}: ignoring unparsable temperature '{raw}'");
            None
        }
    }
}

fn condition(index: RegionIndex, kv: &HashMap<String, String>) -> Option<Condition> {
    let raw = text(kv, "condition")?;
    raw.parse()
        .map_err(|err| warn!("region {index}: {err}"))
        .ok()
}

fn delay_secs(kv: &HashMap<String, String>, key: &str) -> u32 {
    text(kv, key).and_then(|raw| raw.parse().ok()).unwrap_or(0)
}

fn alarm_rule_from_kv(index: RegionIndex, kv: &HashMap<String, String>) -> Option<AlarmRule> {
    let mode = match text(kv, "mode")?.parse::<Mode>() {
        Ok(mode) => mode,
        Err(err) => {
            warn!("region {index}: {err}");
            return None;
        }
    };

    let output = text(kv, "alarm_out")
        .map(|raw| {
            raw.parse::<OutputChannel>().unwrap_or_else(|err| {
                warn!("region {index}: {err}");
                OutputChannel::None
            })
        })
        .unwrap_or_default();

    Some(AlarmRule {
        enabled: flag(kv, "alarm_use"),
        mode,
        condition: condition(index, kv)?,
        threshold_celsius: threshold(index, kv)?,
        start_delay_secs: delay_secs(kv, "start_delay"),
        stop_delay_secs: delay_secs(kv, "stop_delay"),
        output,
    })
}

// The camera shares `condition` and `temperature` between alarm and ISO rules.
fn display_rule_from_kv(index: RegionIndex, kv: &HashMap<String, String>) -> Option<DisplayRule> {
    let condition = condition(index, kv)?;
    let threshold_celsius = threshold(index, kv)?;
    let color = text(kv, "iso_color")
        .and_then(|raw| raw.parse::<IsoColor>().ok())
        .unwrap_or_default();

    Some(DisplayRule {
        enabled: flag(kv, "iso_use"),
        condition,
        threshold_celsius,
        color,
    })
}

/// Query parameters for `setthermalroi{N}`, the inverse of [`region_from_kv`].
pub fn region_to_params(region: &Region) -> Vec<(&'static str, String)> {
    let on_off = |value: bool| if value { "on" } else { "off" }.to_string();
    let geometry = region.geometry;

    let mut params = vec![
        ("roi_use", on_off(region.used)),
        ("startx", geometry.start_x.to_string()),
        ("starty", geometry.start_y.to_string()),
        ("endx", geometry.end_x.to_string()),
        ("endy", geometry.end_y.to_string()),
    ];

    match &region.alarm_rule {
        Some(rule) => params.extend([
            ("alarm_use", on_off(rule.enabled)),
            ("mode", rule.mode.as_str().to_string()),
            ("condition", rule.condition.as_str().to_string()),
            ("temperature", rule.threshold_celsius.to_string()),
            ("start_delay", rule.start_delay_secs.to_string()),
            ("stop_delay", rule.stop_delay_secs.to_string()),
            ("alarm_out", rule.output.as_str().to_string()),
        ]),
        None => params.push(("alarm_use", on_off(false))),
    }

    match &region.display_rule {
        Some(rule) => {
            params.push(("iso_use", on_off(rule.enabled)));
            params.push(("iso_color", rule.color.as_str().to_string()));
            if rule.enabled {
                // ISO values win over the alarm's when both share the keys.
                params.retain(|(key, _)| *key != "condition" && *key != "temperature");
                params.push(("condition", rule.condition.as_str().to_string()));
                params.push(("temperature", rule.threshold_celsius.to_string()));
            }
        }
        None => params.push(("iso_use", on_off(false))),
    }

    params
}
