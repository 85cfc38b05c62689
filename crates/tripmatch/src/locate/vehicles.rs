//! Vehicle measures along the matched geometry.

use crate::config::Config;
use crate::geom;
use crate::matcher::{MatchResult, MatchTrace};
use crate::model::TripRecord;

/// Assigns each retained fix its distance along the match geometry.
///
/// A service match names its own outliers and leg distances, so measures
/// accumulate directly from the trace; a default route offers no such
/// correspondence, so each fix is projected onto the geometry and the
/// ordering repaired afterwards.
pub fn locate_vehicles(trip: &mut TripRecord, result: &MatchResult, config: &Config) {
    match result.trace.as_ref() {
        Some(trace) => from_trace(trip, result, trace),
        None => from_projection(trip, result, config),
    }
}

fn from_trace(trip: &mut TripRecord, result: &MatchResult, trace: &MatchTrace) {
    // outliers the service nulled out, removed back to front
    for i in (0..trace.dropped.len().min(trip.fixes.len())).rev() {
        if trace.dropped[i] {
            trip.fixes.remove(i);
        }
    }

    // each matching starts at the running total; each leg extends it
    let mut measures = Vec::with_capacity(trip.fixes.len());
    let mut cumulative = 0.0;
    for legs in &trace.legs {
        measures.push(cumulative);
        for leg in legs {
            cumulative += leg;
            measures.push(cumulative);
        }
    }
    for (fix, measure) in trip.fixes.iter_mut().zip(&measures) {
        fix.set_measure(*measure);
    }

    // simplification shaved a little length off the geometry; rescale so the
    // last fix lands on its end
    let last_raw = trip.fixes.last().and_then(|fix| fix.measure).unwrap_or(0.0);
    if last_raw > 0.0 {
        let factor = geom::length(&result.geometry) / last_raw;
        for fix in &mut trip.fixes {
            if let Some(measure) = fix.measure {
                fix.set_measure(measure * factor);
            }
        }
    }
}

fn from_projection(trip: &mut TripRecord, result: &MatchResult, config: &Config) {
    trip.fixes.retain_mut(|fix| {
        let location = geom::locate(&result.geometry, fix.point());
        if location.distance <= config.stop_distance {
            fix.set_measure(location.measure);
            true
        } else {
            false
        }
    });

    // Projected measures should already rise with report order; where they
    // do not, drop the worst-transposed fixes until they do. Wrong-direction
    // travel can leave as little as a single fix here.
    loop {
        let measures: Vec<f64> = trip.fixes.iter().map(|fix| fix.measure.unwrap_or(0.0)).collect();
        if measures.windows(2).all(|pair| pair[0] <= pair[1]) {
            break;
        }

        let mut order: Vec<usize> = (0..measures.len()).collect();
        order.sort_by(|&a, &b| measures[a].total_cmp(&measures[b]));
        let mut rank = vec![0; order.len()];
        for (sorted_position, &original) in order.iter().enumerate() {
            rank[original] = sorted_position;
        }

        let displacement: Vec<usize> =
            rank.iter().enumerate().map(|(i, &r)| r.abs_diff(i)).collect();
        let Some(worst) = displacement.iter().copied().max().filter(|&d| d > 0) else {
            break;
        };
        for i in (0..trip.fixes.len()).rev() {
            if displacement[i] == worst {
                trip.fixes.remove(i);
            }
        }
    }
}
