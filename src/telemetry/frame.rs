//! Decoding of the camera's unframed telemetry text.
//!
//! The camera writes JSON arrays of per-region objects back to back with no
//! length prefix or separator, and a single socket read may end mid-array.
//! Splitting that text into parseable chunks is isolated behind
//! [`FrameSplitter`] so the bracket heuristic can be swapped for a stricter
//! tokenizer without touching the rest of the pipeline.

use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;

use crate::error::CameraError;
use crate::models::{PixelPoint, Reading, RegionIndex, CONFIG_CHANGED_AREA_ID};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_warn};

/// Turns one decoded text chunk into independently parseable JSON documents.
pub trait FrameSplitter: Send + Sync {
    fn split(&self, text: &str) -> Vec<String>;
}

/// Best-effort splitter for the camera's framing.
///
/// Closes a trailing array that lost its `]`, then cuts at every `][` boundary.
/// Assumes truncation only happens between objects, never inside one; a chunk
/// cut mid-object still fails to parse and is dropped by the decoder.
#[derive(Debug, Default, Clone, Copy)]
pub struct BracketRepairSplitter;

impl FrameSplitter for BracketRepairSplitter {
    fn split(&self, text: &str) -> Vec<String> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Vec::new();
        }

        let mut repaired = trimmed.to_string();
        if repaired.starts_with('[') && !repaired.ends_with(']') {
            repaired.push(']');
        }

        let mut chunks = Vec::new();
        let mut start = 0;
        for (boundary, _) in repaired.match_indices("][") {
            chunks.push(repaired[start..=boundary].to_string());
            start = boundary + 1;
        }
        chunks.push(repaired[start..].to_string());
        chunks
    }
}

/// A decoded telemetry object. The reserved `area_id` never leaks past this point.
#[derive(Debug, Clone, PartialEq)]
pub enum TelemetryMessage {
    Reading { region: RegionIndex, reading: Reading },
    ConfigChanged,
}

#[derive(Debug, Deserialize)]
struct RawAreaReading {
    area_id: Option<Value>,
    temp_max: Option<Value>,
    temp_min: Option<Value>,
    temp_avr: Option<Value>,
    point_max_x: Option<Value>,
    point_max_y: Option<Value>,
    point_min_x: Option<Value>,
    point_min_y: Option<Value>,
}

pub struct TelemetryDecoder {
    splitter: Box<dyn FrameSplitter>,
}

impl Default for TelemetryDecoder {
    fn default() -> Self {
        Self::new(Box::new(BracketRepairSplitter))
    }
}

impl TelemetryDecoder {
    pub fn new(splitter: Box<dyn FrameSplitter>) -> Self {
        Self { splitter }
    }

    /// Decodes one socket read. Never fails: undecodable bytes and malformed
    /// chunks are logged and skipped so the stream keeps running.
    pub fn decode(&self, bytes: &[u8]) -> Vec<TelemetryMessage> {
        let text = match std::str::from_utf8(bytes) {
            Ok(text) => text,
            Err(err) => {
                log_warn!("discarding {} telemetry bytes: invalid UTF-8 ({err})", bytes.len());
                return Vec::new();
            }
        };

        let mut messages = Vec::new();
        for chunk in self.splitter.split(text) {
            match decode_chunk(&chunk) {
                Ok(decoded) => messages.extend(decoded),
                Err(err) => log_warn!("skipping telemetry chunk: {err}"),
            }
        }
        log_debug!("decoded {} telemetry messages from {} bytes", messages.len(), bytes.len());
        messages
    }
}

/// Parses one JSON document (normally an array of area objects).
pub fn decode_chunk(chunk: &str) -> Result<Vec<TelemetryMessage>, CameraError> {
    let document: Value = serde_json::from_str(chunk)
        .map_err(|err| CameraError::ProtocolParse(format!("{err} in {}", preview(chunk))))?;

    let items = match document {
        Value::Array(items) => items,
        object @ Value::Object(_) => vec![object],
        other => {
            return Err(CameraError::ProtocolParse(format!(
                "expected array of area objects, got {other}"
            )))
        }
    };

    Ok(items.into_iter().filter_map(decode_item).collect())
}

fn decode_item(item: Value) -> Option<TelemetryMessage> {
    let raw: RawAreaReading = match serde_json::from_value(item) {
        Ok(raw) => raw,
        Err(err) => {
            log_warn!("skipping telemetry object: {err}");
            return None;
        }
    };

    let Some(area_id) = raw.area_id.as_ref().and_then(as_integer) else {
        log_warn!("skipping telemetry object without integer area_id");
        return None;
    };

    if area_id == CONFIG_CHANGED_AREA_ID {
        return Some(TelemetryMessage::ConfigChanged);
    }

    let Some(region) = RegionIndex::from_area_id(area_id) else {
        log_warn!("skipping telemetry for unknown area_id {area_id}");
        return None;
    };

    let reading = Reading {
        max_celsius: raw.temp_max.as_ref().and_then(as_celsius),
        min_celsius: raw.temp_min.as_ref().and_then(as_celsius),
        avg_celsius: raw.temp_avr.as_ref().and_then(as_celsius),
        hot_point: point(raw.point_max_x.as_ref(), raw.point_max_y.as_ref()),
        cold_point: point(raw.point_min_x.as_ref(), raw.point_min_y.as_ref()),
        received_at: Utc::now(),
    };

    Some(TelemetryMessage::Reading { region, reading })
}

fn as_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

// Temperatures arrive as numbers or numeric strings; anything else is unknown.
fn as_celsius(value: &Value) -> Option<f64> {
    let celsius = match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    celsius.is_finite().then_some(celsius)
}

fn point(x: Option<&Value>, y: Option<&Value>) -> Option<PixelPoint> {
    let x = i32::try_from(as_integer(x?)?).ok()?;
    let y = i32::try_from(as_integer(y?)?).ok()?;
    Some(PixelPoint { x, y })
}

fn preview(chunk: &str) -> String {
    const MAX_PREVIEW_CHARS: usize = 64;
    if chunk.chars().count() <= MAX_PREVIEW_CHARS {
        chunk.to_string()
    } else {
        let head: String = chunk.chars().take(MAX_PREVIEW_CHARS).collect();
        format!("{head}...")
    }
}
