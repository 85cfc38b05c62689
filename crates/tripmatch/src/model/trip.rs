use chrono::{DateTime, Utc};
use geo::Point;
use serde::Serialize;

use crate::model::stop::{Stop, TimePoint};

/// Lifecycle of a trip record. Transitions only run forward:
/// `Active -> Ending -> Matched | Unusable`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum TripStatus {
    Active,
    Ending,
    Matched,
    Unusable,
}

/// One observed vehicle position within a trip.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VehicleFix {
    #[serde(with = "chrono::serde::ts_seconds")]
    pub report_time: DateTime<Utc>,
    pub longitude: f64,
    pub latitude: f64,
    #[serde(skip)]
    point: Point<f64>,
    pub measure: Option<f64>,
}

impl VehicleFix {
    #[must_use]
    pub fn new(report_time: DateTime<Utc>, longitude: f64, latitude: f64, point: Point<f64>) -> Self {
        Self { report_time, longitude, latitude, point, measure: None }
    }

    #[must_use]
    pub const fn point(&self) -> Point<f64> {
        self.point
    }

    /// Sets the measure along the matched geometry. Measures never go
    /// negative; the locators clamp before calling this.
    pub fn set_measure(&mut self, measure: f64) {
        debug_assert!(measure >= 0.0);
        self.measure = Some(measure);
    }
}

/// Accumulator for one vehicle's continuous journey on one route/direction.
///
/// The fleet tracker appends fixes and provisional timepoints while the trip
/// is active; the matcher and locators fill in measures and replace the
/// timepoints after retirement.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TripRecord {
    pub trip_id: String,
    pub block_id: String,
    pub route_id: String,
    pub direction_id: String,
    pub vehicle_id: String,
    pub fixes: Vec<VehicleFix>,
    #[serde(skip)]
    pub stops: Vec<Stop>,
    pub timepoints: Vec<TimePoint>,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub last_seen: DateTime<Utc>,
    pub status: TripStatus,
}

impl TripRecord {
    #[must_use]
    pub fn new(
        trip_id: &str, block_id: &str, route_id: &str, direction_id: &str, vehicle_id: &str,
        last_seen: DateTime<Utc>,
    ) -> Self {
        Self {
            trip_id: trip_id.to_string(),
            block_id: block_id.to_string(),
            route_id: route_id.to_string(),
            direction_id: direction_id.to_string(),
            vehicle_id: vehicle_id.to_string(),
            fixes: Vec::new(),
            stops: Vec::new(),
            timepoints: Vec::new(),
            last_seen,
            status: TripStatus::Active,
        }
    }

    pub fn add_fix(&mut self, fix: VehicleFix) {
        self.fixes.push(fix);
    }

    #[must_use]
    pub fn last_fix_time(&self) -> Option<DateTime<Utc>> {
        self.fixes.last().map(|fix| fix.report_time)
    }

    /// Records a nearest-stop annotation from the feed.
    ///
    /// A repeated stop id refines the existing timepoint when the new offset
    /// is closer to the stop (smaller absolute value); anything else inserts.
    /// Returns `true` when an existing timepoint was refined.
    pub fn upsert_provisional(
        &mut self, stop_id: &str, measure: f64, offset: i64, report_time: DateTime<Utc>,
    ) -> bool {
        if let Some(existing) = self.timepoints.iter_mut().find(|tp| tp.stop_id == stop_id) {
            let current = existing.smallest_offset.map_or(i64::MAX, i64::abs);
            if offset.abs() < current {
                *existing = TimePoint::provisional(stop_id, measure, offset, report_time);
            }
            return true;
        }
        self.timepoints.push(TimePoint::provisional(stop_id, measure, offset, report_time));
        false
    }

    pub fn retire(&mut self) {
        self.status = TripStatus::Ending;
    }
}
