//! In-memory region editing ahead of an explicit save.
//!
//! The ROI, alarm and ISO tables an operator edits are views over one
//! `RegionTable`. Each row reads `used` from the single `Region.used` flag, so the
//! three representations cannot drift apart.

use serde::Serialize;

use crate::models::{AlarmRule, DisplayRule, Geometry, RegionIndex, RegionTable};

/// Whether an edit changed anything the overlay draws.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageChange {
    Unchanged,
    Redraw,
}

impl UsageChange {
    pub fn needs_redraw(self) -> bool {
        self == UsageChange::Redraw
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GeometryRow {
    pub index: RegionIndex,
    pub used: bool,
    pub geometry: Geometry,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlarmRow {
    pub index: RegionIndex,
    pub used: bool,
    pub rule: Option<AlarmRule>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayRow {
    pub index: RegionIndex,
    pub used: bool,
    pub rule: Option<DisplayRule>,
}

/// Pending region configuration. Never touches the network.
#[derive(Debug, Clone)]
pub struct RegionEditor {
    pending: RegionTable,
    dirty: bool,
}

impl RegionEditor {
    pub fn new(table: RegionTable) -> Self {
        Self {
            pending: table,
            dirty: false,
        }
    }

    /// Applies a usage toggle from any of the three tables. Re-applying the
    /// current value is a no-op.
    pub fn on_usage_changed(&mut self, index: RegionIndex, used: bool) -> UsageChange {
        let region = self.pending.get_mut(index);
        if region.used == used {
            return UsageChange::Unchanged;
        }
        region.used = used;
        self.dirty = true;
        UsageChange::Redraw
    }

    pub fn set_geometry(&mut self, index: RegionIndex, geometry: Geometry) -> UsageChange {
        let region = self.pending.get_mut(index);
        if region.geometry == geometry {
            return UsageChange::Unchanged;
        }
        region.geometry = geometry;
        self.dirty = true;
        UsageChange::Redraw
    }

    pub fn set_alarm_rule(&mut self, index: RegionIndex, rule: Option<AlarmRule>) {
        let region = self.pending.get_mut(index);
        if region.alarm_rule != rule {
            region.alarm_rule = rule;
            self.dirty = true;
        }
    }

    pub fn set_display_rule(&mut self, index: RegionIndex, rule: Option<DisplayRule>) {
        let region = self.pending.get_mut(index);
        if region.display_rule != rule {
            region.display_rule = rule;
            self.dirty = true;
        }
    }

    pub fn geometry_rows(&self) -> Vec<GeometryRow> {
        self.pending
            .iter()
            .map(|region| GeometryRow {
                index: region.index,
                used: region.used,
                geometry: region.geometry,
            })
            .collect()
    }

    pub fn alarm_rows(&self) -> Vec<AlarmRow> {
        self.pending
            .iter()
            .map(|region| AlarmRow {
                index: region.index,
                used: region.used,
                rule: region.alarm_rule.clone(),
            })
            .collect()
    }

    pub fn display_rows(&self) -> Vec<DisplayRow> {
        self.pending
            .iter()
            .map(|region| DisplayRow {
                index: region.index,
                used: region.used,
                rule: region.display_rule.clone(),
            })
            .collect()
    }

    pub fn pending(&self) -> &RegionTable {
        &self.pending
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Replaces the pending table wholesale, e.g. after a refresh from the camera.
    pub fn reset(&mut self, table: RegionTable) {
        self.pending = table;
        self.dirty = false;
    }

    pub fn mark_saved(&mut self) {
        self.dirty = false;
    }
}
