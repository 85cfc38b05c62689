//! Fleet state: which vehicle is on which trip right now.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use chrono::Duration;
use tracing::{debug, info};

use crate::config::Config;
use crate::geom::Projector;
use crate::model::{TripRecord, VehicleFix};
use crate::provider::{FeedSnapshot, RawReport};

/// Tracks every vehicle's current trip and decides when a trip is over.
///
/// One snapshot applies at a time: `ingest` holds the fleet map for the whole
/// update so nothing observes it half-applied.
pub struct FleetTracker {
    active: Mutex<HashMap<String, TripRecord>>,
    projector: Projector,
    inactivity: Duration,
}

impl FleetTracker {
    #[must_use]
    pub fn new(config: &Config) -> Self {
        Self {
            active: Mutex::new(HashMap::new()),
            projector: Projector::new(config.origin_longitude, config.origin_latitude),
            inactivity: Duration::seconds(
                i64::try_from(config.inactivity_timeout.as_secs()).unwrap_or(1_800),
            ),
        }
    }

    /// Number of vehicles currently tracked.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.active.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Applies one feed snapshot and returns the trips it retired.
    ///
    /// A vehicle on a changed route or direction retires its current trip and
    /// starts a new one; a vehicle silent for longer than the inactivity
    /// timeout retires its trip whether or not it appears in this snapshot.
    /// Reports without a trip id, and reports repeating the latest fix's
    /// timestamp, are skipped.
    pub fn ingest(&self, snapshot: &FeedSnapshot) -> Vec<TripRecord> {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        let mut retired = Vec::new();

        let cutoff = snapshot.server_time - self.inactivity;
        let stale: Vec<String> = active
            .iter()
            .filter(|(_, trip)| trip.last_seen < cutoff)
            .map(|(vehicle_id, _)| vehicle_id.clone())
            .collect();
        for vehicle_id in stale {
            if let Some(mut ended) = active.remove(&vehicle_id) {
                ended.retire();
                info!(trip_id = %ended.trip_id, vehicle_id = %vehicle_id, "trip ended by inactivity");
                retired.push(ended);
            }
        }

        for report in &snapshot.reports {
            if report.trip_id.is_empty() {
                continue;
            }

            let fix = VehicleFix::new(
                report.report_time,
                report.longitude,
                report.latitude,
                self.projector.project(report.longitude, report.latitude),
            );

            let service_changed = active.get(&report.vehicle_id).is_some_and(|trip| {
                trip.route_id != report.route_id || trip.direction_id != report.direction_id
            });
            if service_changed
                && let Some(mut ended) = active.remove(&report.vehicle_id)
            {
                ended.retire();
                info!(
                    trip_id = %ended.trip_id,
                    vehicle_id = %report.vehicle_id,
                    "trip ended by service change",
                );
                retired.push(ended);
            }

            if let Some(trip) = active.get_mut(&report.vehicle_id) {
                if trip.last_fix_time() == Some(report.report_time) {
                    debug!(trip_id = %trip.trip_id, "repeated report time, fix skipped");
                    continue;
                }
                trip.add_fix(fix);
                trip.last_seen = report.report_time;
                annotate(trip, report);
            } else {
                let mut trip = TripRecord::new(
                    &report.trip_id,
                    &report.block_id,
                    &report.route_id,
                    &report.direction_id,
                    &report.vehicle_id,
                    report.report_time,
                );
                trip.add_fix(fix);
                annotate(&mut trip, report);
                info!(trip_id = %report.trip_id, vehicle_id = %report.vehicle_id, "tracking new trip");
                active.insert(report.vehicle_id.clone(), trip);
            }
        }

        info!(active = active.len(), retired = retired.len(), "snapshot applied");
        retired
    }
}

/// Folds a report's nearest-stop annotation into the trip's provisional
/// timepoints.
fn annotate(trip: &mut TripRecord, report: &RawReport) {
    let (Some(stop_id), Some(offset)) = (&report.nearest_stop_id, report.stop_time_offset) else {
        return;
    };
    let measure = report.distance_along_trip.unwrap_or(0.0);
    if trip.upsert_provisional(stop_id, measure, offset, report.report_time) {
        debug!(trip_id = %trip.trip_id, stop_id = %stop_id, "refined stop time estimate");
    } else {
        debug!(trip_id = %trip.trip_id, stop_id = %stop_id, "provisional stop added");
    }
}
