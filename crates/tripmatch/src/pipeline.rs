//! Finalization of retired trips on a bounded worker pool.
//!
//! The fleet tracker hands retired trips to `Pipeline::submit`; a fixed set
//! of workers drains the queue so one slow match never holds up ingestion or
//! the other trips. Each worker owns its trip outright from pickup to
//! completion.

use std::sync::Arc;

use chrono::DateTime;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::clean::{self, CleanVerdict};
use crate::config::Config;
use crate::error::Result;
use crate::geom::{self, Projector};
use crate::locate::{locate_stops, locate_vehicles};
use crate::matcher::{self, MatchResult};
use crate::model::{Stop, TripRecord, TripStatus};
use crate::provider::{Provider, StopDetail};
use crate::stop_locks::StopLocks;

/// Handle to the finalization workers.
pub struct Pipeline {
    sender: mpsc::Sender<TripRecord>,
    workers: Vec<JoinHandle<()>>,
}

impl Pipeline {
    /// Starts the worker pool against the given provider.
    #[must_use]
    pub fn spawn<P: Provider>(provider: P, config: Config) -> Self {
        let config = Arc::new(config);
        let projector = Projector::new(config.origin_longitude, config.origin_latitude);
        let locks = StopLocks::default();
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));

        let workers = (0..config.workers)
            .map(|_| {
                let receiver = Arc::clone(&receiver);
                let provider = provider.clone();
                let config = Arc::clone(&config);
                let locks = locks.clone();
                tokio::spawn(work(receiver, provider, config, projector, locks))
            })
            .collect();

        Self { sender, workers }
    }

    /// Queues a retired trip for finalization, waiting while the queue is
    /// full.
    pub async fn submit(&self, trip: TripRecord) {
        if let Err(rejected) = self.sender.send(trip).await {
            // only happens once shutdown has closed the queue
            warn!(trip_id = %rejected.0.trip_id, "trip dropped, pipeline is shutting down");
        }
    }

    /// Closes the queue and waits for in-flight trips to finish.
    pub async fn shutdown(self) {
        drop(self.sender);
        for worker in self.workers {
            if let Err(err) = worker.await {
                warn!(error = %err, "pipeline worker panicked");
            }
        }
    }
}

async fn work<P: Provider>(
    receiver: Arc<Mutex<mpsc::Receiver<TripRecord>>>, provider: P, config: Arc<Config>,
    projector: Projector, locks: StopLocks,
) {
    loop {
        let next = {
            let mut queue = receiver.lock().await;
            queue.recv().await
        };
        let Some(mut trip) = next else {
            break;
        };
        debug!(trip_id = %trip.trip_id, "finalizing trip");
        if let Err(err) = finalize_trip(&provider, &config, &projector, &locks, &mut trip).await {
            warn!(trip_id = %trip.trip_id, error = %err, "trip finalization failed");
        }
    }
}

/// Runs one retired trip through cleaning, matching, location, and
/// persistence.
///
/// # Errors
///
/// Fails when a storage write fails; feed and match-service trouble is
/// retried and degraded around instead.
pub async fn finalize_trip<P: Provider>(
    provider: &P, config: &Config, projector: &Projector, locks: &StopLocks,
    trip: &mut TripRecord,
) -> Result<()> {
    match clean::clean(trip, config) {
        CleanVerdict::Ready => {}
        verdict => {
            if let Some(reason) = verdict.ignore_reason() {
                provider.mark_ignored(&trip.trip_id, reason).await?;
                info!(trip_id = %trip.trip_id, reason, "trip ignored");
            }
            trip.status = TripStatus::Unusable;
            return Ok(());
        }
    }

    collect_stops(provider, config, projector, locks, trip).await?;
    provider.save_trip(trip).await?;

    let Some(result) = matcher::match_trip(provider, config, projector, trip).await? else {
        trip.status = TripStatus::Unusable;
        return Ok(());
    };

    locate_vehicles(trip, &result, config);
    if !trip.stops.is_empty() && geom::length(&result.geometry) > 0.0 {
        trip.timepoints = locate_stops(trip, &result, config);
    }
    interpolate_times(trip);

    if is_useable(trip, &result, config.min_confidence) {
        trip.status = TripStatus::Matched;
        provider.save_timepoints(&trip.trip_id, &trip.timepoints).await?;
        info!(trip_id = %trip.trip_id, timepoints = trip.timepoints.len(), "trip matched");
    } else {
        trip.status = TripStatus::Unusable;
        info!(trip_id = %trip.trip_id, "trip unusable after matching");
    }
    Ok(())
}

/// Resolves the stops named by the trip's provisional timepoints, in feed
/// order, and records them against the trip. Every resolved stop is also
/// upserted to storage under its per-stop critical section. A stop the feed
/// cannot resolve is skipped.
async fn collect_stops<P: Provider>(
    provider: &P, config: &Config, projector: &Projector, locks: &StopLocks,
    trip: &mut TripRecord,
) -> Result<()> {
    let mut stop_ids: Vec<String> = Vec::new();
    for timepoint in &trip.timepoints {
        if !stop_ids.contains(&timepoint.stop_id) {
            stop_ids.push(timepoint.stop_id.clone());
        }
    }

    for stop_id in stop_ids {
        let Some(detail) = fetch_stop_detail(provider, config, &stop_id).await else {
            continue;
        };
        {
            let _hold = locks.hold(&stop_id).await;
            provider.upsert_stop(&detail).await?;
        }
        trip.stops.push(Stop::from_detail(&detail, projector));
    }
    Ok(())
}

async fn fetch_stop_detail<P: Provider>(
    provider: &P, config: &Config, stop_id: &str,
) -> Option<StopDetail> {
    for try_number in 1..=config.stop_retries {
        match provider.fetch_stop_detail(stop_id).await {
            Ok(Some(detail)) => return Some(detail),
            Ok(None) => {
                debug!(stop_id = %stop_id, "stop unknown to the feed");
                return None;
            }
            Err(err) => {
                warn!(stop_id = %stop_id, try_number, error = %err, "stop detail fetch failed");
                if try_number < config.stop_retries {
                    tokio::time::sleep(config.retry_backoff * (1 << (try_number - 1))).await;
                }
            }
        }
    }
    None
}

/// Estimates each timepoint's arrival from the measured fix sequence:
/// linear interpolation between the surrounding fixes, or extrapolation at
/// the overall trip speed past either end.
fn interpolate_times(trip: &mut TripRecord) {
    let measured: Vec<(f64, i64)> = trip
        .fixes
        .iter()
        .filter_map(|fix| fix.measure.map(|measure| (measure, fix.report_time.timestamp())))
        .collect();
    if measured.len() < 2 {
        return;
    }
    let (first_m, first_t) = measured[0];
    let (last_m, last_t) = measured[measured.len() - 1];
    if (last_m - first_m).abs() < f64::EPSILON {
        return;
    }
    // seconds per meter over the whole observed span
    let trip_speed = (last_t - first_t) as f64 / (last_m - first_m);

    for timepoint in &mut trip.timepoints {
        let seconds = if timepoint.measure < first_m {
            Some((timepoint.measure - first_m).mul_add(trip_speed, first_t as f64))
        } else if timepoint.measure > last_m {
            Some((timepoint.measure - last_m).mul_add(trip_speed, last_t as f64))
        } else {
            interpolate_within(&measured, timepoint.measure)
        };
        timepoint.arrival_time = seconds.and_then(|s| DateTime::from_timestamp(s.round() as i64, 0));
    }
}

fn interpolate_within(measured: &[(f64, i64)], measure: f64) -> Option<f64> {
    for pair in measured.windows(2) {
        let ((m1, t1), (m2, t2)) = (pair[0], pair[1]);
        if m1 <= measure && measure <= m2 {
            if (measure - m1).abs() < f64::EPSILON || (m2 - m1).abs() < f64::EPSILON {
                return Some(t1 as f64);
            }
            let fraction = (measure - m1) / (m2 - m1);
            return Some(fraction.mul_add((t2 - t1) as f64, t1 as f64));
        }
    }
    None
}

/// Final call on whether the derived geometry and timepoints can be
/// trusted: the match held up (or the default route stood in), the trip
/// kept more than three fixes that actually travelled, and more than one
/// timepoint was placed.
#[must_use]
pub fn is_useable(trip: &TripRecord, result: &MatchResult, min_confidence: f64) -> bool {
    let sufficient = result.confidence >= min_confidence || result.used_default_route;
    let travelled = match (
        trip.fixes.first().and_then(|fix| fix.measure),
        trip.fixes.last().and_then(|fix| fix.measure),
    ) {
        (Some(first), Some(last)) => (last - first).abs() > f64::EPSILON,
        _ => false,
    };
    sufficient && trip.fixes.len() > 3 && travelled && trip.timepoints.len() > 1
}
