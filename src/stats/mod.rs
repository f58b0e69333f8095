//! Detection statistics: aggregate counters, capped history and on-disk persistence.

pub mod artifacts;
pub mod store;

use crate::types::{DetectionRecord, Label};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub use artifacts::ArtifactWriter;
pub use store::StatsStore;

/// Graded objects split by outcome.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    #[serde(rename = "OK")]
    pub ok: u64,
    #[serde(rename = "DEFECTIVE")]
    pub defective: u64,
}

/// Aggregate counters over every recorded detection.
///
/// `total_objects == sum(objects_by_type) == objects_by_status.ok + objects_by_status.defective`
/// and `total_detections == total_objects + total_non_objects` hold after every update.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatsSummary {
    pub total_detections: u64,
    pub total_objects: u64,
    pub total_non_objects: u64,
    pub objects_by_type: BTreeMap<String, u64>,
    pub objects_by_status: StatusCounts,
    /// `objects_by_status.ok / total_objects`, 0 when nothing was graded
    pub success_rate: f64,
}

impl StatsSummary {
    pub fn apply(&mut self, record: &DetectionRecord) {
        self.total_detections += 1;
        if record.is_object {
            self.total_objects += 1;
            *self.objects_by_type.entry(record.fruit_type.clone()).or_insert(0) += 1;
            if record.label == Label::Defective {
                self.objects_by_status.defective += 1;
            } else {
                self.objects_by_status.ok += 1;
            }
        } else {
            self.total_non_objects += 1;
        }
        self.refresh_success_rate();
    }

    pub fn refresh_success_rate(&mut self) {
        self.success_rate = if self.total_objects > 0 {
            self.objects_by_status.ok as f64 / self.total_objects as f64
        } else {
            0.0
        };
    }

    pub fn is_consistent(&self) -> bool {
        let by_type: u64 = self.objects_by_type.values().sum();
        self.total_objects == by_type
            && self.total_objects == self.objects_by_status.ok + self.objects_by_status.defective
            && self.total_detections == self.total_objects + self.total_non_objects
    }

    pub fn is_zero(&self) -> bool {
        *self == StatsSummary::default()
    }
}

/// Everything the store publishes; also the persisted document layout.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub summary: StatsSummary,
    #[serde(rename = "detection_history", default)]
    pub history: Vec<DetectionRecord>,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
}

impl StatsSnapshot {
    /// Count `record` and append it, evicting the oldest entries past `history_limit`.
    pub fn apply(&mut self, record: DetectionRecord, history_limit: usize) {
        self.summary.apply(&record);
        self.history.push(record);
        self.trim_history(history_limit);
        self.last_updated = Some(Utc::now());
    }

    pub fn trim_history(&mut self, history_limit: usize) {
        if self.history.len() > history_limit {
            let excess = self.history.len() - history_limit;
            self.history.drain(..excess);
        }
    }

    /// The newest `limit` records, oldest first.
    pub fn recent(&self, limit: usize) -> &[DetectionRecord] {
        let start = self.history.len().saturating_sub(limit);
        &self.history[start..]
    }
}
