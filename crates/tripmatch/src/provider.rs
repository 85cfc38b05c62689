//! External collaborator interfaces.
//!
//! The pipeline only ever talks to the vehicle feed, the trace-matching
//! service, and storage through this trait; implementations decide transport.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use geo::MultiLineString;
use serde::{Deserialize, Serialize};

use crate::matcher::{MatchRequest, MatchResponse};
use crate::model::{TimePoint, TripRecord};

/// One raw vehicle report from the feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawReport {
    pub vehicle_id: String,
    #[serde(default)]
    pub trip_id: String,
    #[serde(default)]
    pub block_id: String,
    #[serde(default)]
    pub route_id: String,
    #[serde(default)]
    pub direction_id: String,
    pub longitude: f64,
    pub latitude: f64,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub report_time: DateTime<Utc>,
    #[serde(default)]
    pub nearest_stop_id: Option<String>,
    #[serde(default)]
    pub distance_along_trip: Option<f64>,
    #[serde(default)]
    pub stop_time_offset: Option<i64>,
}

/// One polling cycle's worth of vehicle reports.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedSnapshot {
    #[serde(with = "chrono::serde::ts_seconds")]
    pub server_time: DateTime<Utc>,
    pub reports: Vec<RawReport>,
}

/// Detail record for a single stop, as served by the feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopDetail {
    pub stop_id: String,
    pub name: String,
    #[serde(default)]
    pub code: Option<String>,
    pub longitude: f64,
    pub latitude: f64,
}

/// Everything the pipeline needs from the outside world.
///
/// Feed lookups and the match call are reads against live services; the rest
/// writes to storage. All calls may fail transiently and callers retry per
/// their configured policy.
#[async_trait]
pub trait Provider: Send + Sync + Clone + 'static {
    /// Fetches the current feed snapshot.
    async fn fetch_snapshot(&self) -> Result<FeedSnapshot>;

    /// Fetches detail for one stop; `None` when the feed does not know it.
    async fn fetch_stop_detail(&self, stop_id: &str) -> Result<Option<StopDetail>>;

    /// Sends a trace to the matching service.
    async fn match_trace(&self, request: &MatchRequest) -> Result<MatchResponse>;

    /// Looks up the stored default route geometry (geographic coordinates)
    /// for a direction, as of the given time.
    async fn default_route(
        &self, direction_id: &str, as_of: DateTime<Utc>,
    ) -> Result<Option<MultiLineString<f64>>>;

    /// Persists a retired trip as collected, before matching.
    async fn save_trip(&self, trip: &TripRecord) -> Result<()>;

    /// Persists a match outcome. Geometry is in local planar coordinates.
    async fn save_match(
        &self, trip_id: &str, confidence: f64, geometry: &MultiLineString<f64>,
    ) -> Result<()>;

    /// Persists the final timepoint sequence for a useable trip.
    async fn save_timepoints(&self, trip_id: &str, timepoints: &[TimePoint]) -> Result<()>;

    /// Records that a trip was dropped, and why.
    async fn mark_ignored(&self, trip_id: &str, reason: &str) -> Result<()>;

    /// Inserts or updates a stop record.
    async fn upsert_stop(&self, stop: &StopDetail) -> Result<()>;
}
