//! Stop measures along the matched geometry.

use crate::config::Config;
use crate::geom;
use crate::matcher::MatchResult;
use crate::model::{Stop, TimePoint, TripRecord};

/// Places the trip's stops along the match geometry.
///
/// The geometry is walked in fixed-length segments and every stop is tested
/// against each segment on its own, so a route that passes the same stop
/// twice detects it once per pass instead of only at its globally nearest
/// point. Returns the timepoints sorted by measure; the caller replaces the
/// trip's provisional set with them.
#[must_use]
pub fn locate_stops(trip: &TripRecord, result: &MatchResult, config: &Config) -> Vec<TimePoint> {
    if trip.stops.is_empty() || geom::length(&result.geometry) <= 0.0 {
        return Vec::new();
    }

    let mut candidates = Vec::new();
    let mut remaining = result.geometry.clone();
    let mut traversed = 0.0;
    while geom::length(&remaining) > 0.0 {
        let (segment, rest) = geom::cut(&remaining, config.segment_length);
        for stop in &trip.stops {
            let location = geom::locate(&segment, stop.point());
            if location.distance <= config.stop_distance {
                candidates.push(TimePoint::located(
                    &stop.stop_id,
                    traversed + location.measure,
                    location.distance,
                ));
            }
        }
        traversed += config.segment_length;
        remaining = rest;
    }

    // A stop sitting near a cut lands in both neighboring segments with
    // near-equal measures; those are one visit, kept at the smaller offset.
    let near = config.stop_distance * 2.0;
    let mut timepoints: Vec<TimePoint> = Vec::new();
    for candidate in &candidates {
        let duplicate = timepoints.iter_mut().find(|existing| {
            existing.stop_id == candidate.stop_id
                && (existing.measure - candidate.measure).abs() < near
        });
        match duplicate {
            Some(existing) => {
                if candidate.distance_from_route < existing.distance_from_route {
                    *existing = candidate.clone();
                }
            }
            None => timepoints.push(candidate.clone()),
        }
    }

    if result.used_default_route {
        trim_to_observed(&mut timepoints, trip, config);
    } else {
        add_terminals(&mut timepoints, &candidates, trip, result, config);
    }

    timepoints.sort_by(|a, b| a.measure.total_cmp(&b.measure));
    timepoints
}

/// First and last stops sit at the ends of the route, where the walk often
/// misses them; place any that went undetected by projecting onto the whole
/// geometry and nudging the measure out past the nearer end.
fn add_terminals(
    timepoints: &mut Vec<TimePoint>, candidates: &[TimePoint], trip: &TripRecord,
    result: &MatchResult, config: &Config,
) {
    let total = geom::length(&result.geometry);

    let mut terminals: Vec<&Stop> = Vec::new();
    for stop in [trip.stops.first(), trip.stops.last()].into_iter().flatten() {
        if !terminals.iter().any(|seen| seen.stop_id == stop.stop_id) {
            terminals.push(stop);
        }
    }

    for stop in terminals {
        if candidates.iter().any(|tp| tp.stop_id == stop.stop_id) {
            continue;
        }
        let location = geom::locate(&result.geometry, stop.point());
        if location.distance < config.terminal_distance {
            let measure = if location.measure < total / 2.0 {
                location.measure - location.distance
            } else {
                location.measure + location.distance
            };
            timepoints.push(TimePoint::located(
                &stop.stop_id,
                measure.max(0.0),
                location.distance,
            ));
        }
    }
}

/// A default route can run well past where this trip was actually observed;
/// keep only timepoints near the span the fixes cover.
fn trim_to_observed(timepoints: &mut Vec<TimePoint>, trip: &TripRecord, config: &Config) {
    let first = trip.fixes.first().and_then(|fix| fix.measure);
    let last = trip.fixes.last().and_then(|fix| fix.measure);
    if let (Some(first), Some(last)) = (first, last) {
        timepoints.retain(|tp| {
            tp.measure > first - config.terminal_distance
                && tp.measure < last + config.terminal_distance
        });
    } else {
        timepoints.clear();
    }
}
