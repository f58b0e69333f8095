use super::blocking;
use crate::lifecycle::{CameraLifecycle, HealthReport};
use crate::stats::{StatsSnapshot, StatsSummary};
use crate::types::DetectionRecord;
use serde::{Deserialize, Serialize};

/// Default page size for `get_history`.
pub const DEFAULT_HISTORY_LIMIT: usize = 50;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub history: Vec<DetectionRecord>,
    pub total: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResetResponse {
    pub status: String,
    pub summary: StatsSummary,
}

pub async fn get_stats(lifecycle: &CameraLifecycle) -> Result<StatsSnapshot, String> {
    Ok(lifecycle.get_stats().as_ref().clone())
}

/// Newest `limit` records (oldest first) and the size of the retained history.
pub async fn get_history(lifecycle: &CameraLifecycle, limit: Option<usize>) -> Result<HistoryResponse, String> {
    let (history, total) = lifecycle.get_history(limit.unwrap_or(DEFAULT_HISTORY_LIMIT));
    Ok(HistoryResponse { history, total })
}

pub async fn reset_stats(lifecycle: &CameraLifecycle) -> Result<ResetResponse, String> {
    let snapshot = blocking(lifecycle, |lc| lc.reset_stats()).await.map_err(|e| {
        log::error!("Failed to reset statistics: {}", e);
        e
    })?;
    Ok(ResetResponse {
        status: "reset".to_string(),
        summary: snapshot.summary.clone(),
    })
}

pub async fn health(lifecycle: &CameraLifecycle) -> Result<HealthReport, String> {
    Ok(lifecycle.health())
}
