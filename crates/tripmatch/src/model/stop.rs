use chrono::{DateTime, Duration, Utc};
use geo::Point;
use serde::{Deserialize, Serialize};

use crate::geom::Projector;
use crate::provider::StopDetail;

/// Distance-from-route placeholder for timepoints created from feed
/// annotations, before any geometry exists to measure against.
const PROVISIONAL_DISTANCE: f64 = 5.0;

/// A physical transit stop, projected into the local plane.
#[derive(Debug, Clone)]
pub struct Stop {
    pub stop_id: String,
    pub latitude: f64,
    pub longitude: f64,
    point: Point<f64>,
}

impl Stop {
    /// Builds a stop from a feed detail payload.
    #[must_use]
    pub fn from_detail(detail: &StopDetail, projector: &Projector) -> Self {
        Self::from_coordinates(&detail.stop_id, detail.latitude, detail.longitude, projector)
    }

    /// Builds a stop from raw coordinates.
    #[must_use]
    pub fn from_coordinates(
        stop_id: &str, latitude: f64, longitude: f64, projector: &Projector,
    ) -> Self {
        Self {
            stop_id: stop_id.to_string(),
            latitude,
            longitude,
            point: projector.project(longitude, latitude),
        }
    }

    #[must_use]
    pub const fn point(&self) -> Point<f64> {
        self.point
    }
}

/// One resolved stop visit along a trip's geometry.
///
/// `stop_id` refers into the trip's stop collection; the timepoint never owns
/// the stop itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimePoint {
    pub stop_id: String,
    pub measure: f64,
    pub distance_from_route: f64,
    #[serde(default)]
    pub smallest_offset: Option<i64>,
    #[serde(default, with = "chrono::serde::ts_seconds_option")]
    pub arrival_time: Option<DateTime<Utc>>,
}

impl TimePoint {
    /// A timepoint from a feed nearest-stop annotation, collected while the
    /// trip is still running.
    #[must_use]
    pub fn provisional(
        stop_id: &str, measure: f64, offset: i64, report_time: DateTime<Utc>,
    ) -> Self {
        Self {
            stop_id: stop_id.to_string(),
            measure,
            distance_from_route: PROVISIONAL_DISTANCE,
            smallest_offset: Some(offset),
            arrival_time: Some(report_time + Duration::seconds(offset)),
        }
    }

    /// A timepoint placed by the stop locator; arrival is interpolated later.
    #[must_use]
    pub fn located(stop_id: &str, measure: f64, distance_from_route: f64) -> Self {
        Self {
            stop_id: stop_id.to_string(),
            measure,
            distance_from_route,
            smallest_offset: None,
            arrival_time: None,
        }
    }
}
