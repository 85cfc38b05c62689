//! Pre-match trace quality pass.
//!
//! Raw traces carry GPS glitches: position spikes, stationary runs at either
//! end, duplicated reports. Each inter-fix gap is classified by speed into a
//! one-character code and regex patterns over the resulting string drive the
//! repairs, one dropped fix per pass.

use std::sync::LazyLock;

use regex::Regex;

use crate::config::Config;
use crate::geom;
use crate::model::{TripRecord, VehicleFix};

/// Above this (km/h) a gap reads as a position spike.
const SPIKE_KMH: f64 = 120.0;
/// Below this (km/h) a gap reads as stationary.
const CRAWL_KMH: f64 = 0.1;
/// Repairs stop once the trace would shrink below this many fixes.
const MIN_REPAIR_FIXES: usize = 5;

/// Any repairable pattern: a stationary run, a stationary end, or a spike.
static ERRORS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("oo|^o|o$|x").expect("valid pattern"));

/// Repairs in precedence order; the first hit names the fix to drop.
static REPAIRS: LazyLock<[(Regex, Target); 7]> = LazyLock::new(|| {
    let pattern = |p: &str| Regex::new(p).expect("valid pattern");
    [
        // stationary start
        (pattern("^oo*"), Target::First),
        // stationary end
        (pattern("oo*$"), Target::Last),
        // spike in the first four gaps
        (pattern("^.{0,3}x"), Target::First),
        // spike in the last four gaps
        (pattern("x.{0,3}$"), Target::Last),
        // interior stationary run
        (pattern(".ooo*."), Target::PastStart),
        // interior spike run
        (pattern(".xxx*"), Target::PastStart),
        // lone interior spike
        (pattern(".x."), Target::PastStart),
    ]
});

#[derive(Clone, Copy)]
enum Target {
    First,
    Last,
    /// The fix one past the match start, at the head of the flagged run.
    PastStart,
}

/// Outcome of the quality pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanVerdict {
    /// Trace is error-free and long enough to match.
    Ready,
    /// Fewer than two fixes to begin with.
    TooFewReports,
    /// Point-to-point length under the configured minimum.
    TooShort,
    /// Repairs shrank the trace below five fixes with errors remaining.
    MadeTooShort,
}

impl CleanVerdict {
    /// The reason recorded against an ignored trip, `None` when matchable.
    #[must_use]
    pub const fn ignore_reason(self) -> Option<&'static str> {
        match self {
            Self::Ready => None,
            Self::TooFewReports => Some("too few vehicle reports"),
            Self::TooShort => Some("too short"),
            Self::MadeTooShort => Some("cleaning made too short"),
        }
    }
}

/// Classifies and repairs a retired trip's trace.
///
/// Mutates `trip.fixes`: duplicate-time fixes always go, and each repair pass
/// drops the one fix implicated by the first matching pattern.
pub fn clean(trip: &mut TripRecord, config: &Config) -> CleanVerdict {
    if trip.fixes.len() < 2 {
        return CleanVerdict::TooFewReports;
    }

    let (speeds, length_km) = segment_speeds(&mut trip.fixes);
    if length_km < config.min_trip_km {
        return CleanVerdict::TooShort;
    }

    let mut pattern = speed_string(&speeds);
    while ERRORS.is_match(&pattern) {
        if trip.fixes.len() < MIN_REPAIR_FIXES {
            return CleanVerdict::MadeTooShort;
        }
        // every ERRORS class has a repair; a miss here would spin
        if !repair_one(&mut trip.fixes, &pattern) {
            break;
        }
        let (speeds, _) = segment_speeds(&mut trip.fixes);
        pattern = speed_string(&speeds);
    }

    CleanVerdict::Ready
}

/// Speeds (km/h) over the gaps between consecutive fixes, plus the summed
/// point-to-point length in km. Removes any fix whose report time repeats
/// its predecessor's.
fn segment_speeds(fixes: &mut Vec<VehicleFix>) -> (Vec<f64>, f64) {
    let mut speeds = Vec::with_capacity(fixes.len().saturating_sub(1));
    let mut length_km = 0.0;

    let mut i = 1;
    while i < fixes.len() {
        let elapsed = fixes[i].report_time - fixes[i - 1].report_time;
        if elapsed.is_zero() {
            fixes.remove(i);
            continue;
        }
        let km = geom::point_distance(fixes[i - 1].point(), fixes[i].point()) / 1_000.0;
        let hours = elapsed.num_seconds() as f64 / 3_600.0;
        length_km += km;
        speeds.push(km / hours);
        i += 1;
    }

    (speeds, length_km)
}

fn speed_string(speeds: &[f64]) -> String {
    speeds
        .iter()
        .map(|&kmh| {
            if kmh > SPIKE_KMH {
                'x'
            } else if kmh < CRAWL_KMH {
                'o'
            } else {
                '-'
            }
        })
        .collect()
}

fn repair_one(fixes: &mut Vec<VehicleFix>, pattern: &str) -> bool {
    for (regex, target) in REPAIRS.iter() {
        if let Some(found) = regex.find(pattern) {
            let index = match target {
                Target::First => 0,
                Target::Last => fixes.len() - 1,
                Target::PastStart => found.start() + 1,
            };
            fixes.remove(index);
            return true;
        }
    }
    false
}

#[cfg(test)]
mod test {
    use chrono::{DateTime, Utc};
    use geo::Point;

    use super::*;

    // One fix per (seconds, x-meters) pair, on a straight east-west track.
    fn trip_with_track(track: &[(i64, f64)]) -> TripRecord {
        let mut trip = TripRecord::new("T1", "B1", "R1", "0", "V1", Utc::now());
        for &(secs, x) in track {
            let time = DateTime::from_timestamp(secs, 0).unwrap();
            trip.add_fix(VehicleFix::new(time, 0.0, 0.0, Point::new(x, 0.0)));
        }
        trip
    }

    #[test]
    fn steady_trace_passes() {
        let mut trip = trip_with_track(&[
            (0, 0.0),
            (10, 100.0),
            (20, 200.0),
            (30, 300.0),
            (40, 400.0),
            (50, 500.0),
        ]);
        assert_eq!(clean(&mut trip, &Config::from_env()), CleanVerdict::Ready);
        assert_eq!(trip.fixes.len(), 6);
    }

    #[test]
    fn single_fix_is_too_few() {
        let mut trip = trip_with_track(&[(0, 0.0)]);
        assert_eq!(clean(&mut trip, &Config::from_env()), CleanVerdict::TooFewReports);
    }

    #[test]
    fn short_trace_is_rejected() {
        let mut trip = trip_with_track(&[(0, 0.0), (10, 10.0), (20, 20.0)]);
        assert_eq!(clean(&mut trip, &Config::from_env()), CleanVerdict::TooShort);
    }

    // A repeated report time drops the later fix before speeds are read.
    #[test]
    fn duplicate_times_are_removed() {
        let mut trip =
            trip_with_track(&[(0, 0.0), (10, 150.0), (10, 150.0), (20, 300.0)]);
        assert_eq!(clean(&mut trip, &Config::from_env()), CleanVerdict::Ready);
        assert_eq!(trip.fixes.len(), 3);
    }

    // Leading 'o' gaps peel fixes off the front.
    #[test]
    fn stationary_start_dropped() {
        let mut trip = trip_with_track(&[
            (0, 0.0),
            (10, 0.0),
            (20, 100.0),
            (30, 200.0),
            (40, 300.0),
            (50, 400.0),
        ]);
        assert_eq!(clean(&mut trip, &Config::from_env()), CleanVerdict::Ready);
        assert_eq!(trip.fixes.len(), 5);
        assert_eq!(trip.fixes[0].report_time.timestamp(), 10);
    }

    #[test]
    fn stationary_end_dropped() {
        let mut trip = trip_with_track(&[
            (0, 0.0),
            (10, 100.0),
            (20, 200.0),
            (30, 300.0),
            (40, 400.0),
            (50, 400.0),
        ]);
        assert_eq!(clean(&mut trip, &Config::from_env()), CleanVerdict::Ready);
        assert_eq!(trip.fixes.len(), 5);
        assert_eq!(trip.fixes[4].report_time.timestamp(), 40);
    }

    // A spike in the first four gaps costs the first fix.
    #[test]
    fn early_spike_dropped() {
        let mut trip = trip_with_track(&[
            (0, 0.0),
            (10, 1_000.0),
            (20, 1_100.0),
            (30, 1_200.0),
            (40, 1_300.0),
            (50, 1_400.0),
        ]);
        assert_eq!(clean(&mut trip, &Config::from_env()), CleanVerdict::Ready);
        assert_eq!(trip.fixes.len(), 5);
        assert!((trip.fixes[0].point().x() - 1_000.0).abs() < 1e-9);
    }

    #[test]
    fn late_spike_dropped() {
        let mut trip = trip_with_track(&[
            (0, 0.0),
            (10, 100.0),
            (20, 200.0),
            (30, 300.0),
            (40, 400.0),
            (50, 1_400.0),
        ]);
        assert_eq!(clean(&mut trip, &Config::from_env()), CleanVerdict::Ready);
        assert_eq!(trip.fixes.len(), 5);
        assert!((trip.fixes[4].point().x() - 400.0).abs() < 1e-9);
    }

    // An interior crawl run loses the fix at its head; the lone 'o' gap left
    // behind is legal.
    #[test]
    fn interior_stationary_run_repaired() {
        let mut trip = trip_with_track(&[
            (0, 0.0),
            (10, 100.0),
            (20, 100.05),
            (30, 100.1),
            (40, 200.0),
            (50, 300.0),
        ]);
        assert_eq!(clean(&mut trip, &Config::from_env()), CleanVerdict::Ready);
        assert_eq!(trip.fixes.len(), 5);
        assert!((trip.fixes[1].point().x() - 100.05).abs() < 1e-9);
    }

    // A two-gap spike run resolves in two passes: the run repair merges it
    // into a lone spike, which then goes too.
    #[test]
    fn interior_spike_run_repaired() {
        let mut trip = trip_with_track(&[
            (0, 0.0),
            (10, 100.0),
            (20, 200.0),
            (30, 300.0),
            (40, 400.0),
            (50, 800.0),
            (60, 1_200.0),
            (70, 1_300.0),
            (80, 1_400.0),
            (90, 1_500.0),
            (100, 1_600.0),
        ]);
        assert_eq!(clean(&mut trip, &Config::from_env()), CleanVerdict::Ready);
        assert_eq!(trip.fixes.len(), 9);
        assert!((trip.fixes[3].point().x() - 300.0).abs() < 1e-9);
        assert!((trip.fixes[4].point().x() - 1_200.0).abs() < 1e-9);
    }

    // With four fixes left and a spike still present, cleaning gives up.
    #[test]
    fn sparse_trace_with_errors_aborts() {
        let mut trip =
            trip_with_track(&[(0, 0.0), (10, 100.0), (20, 5_100.0), (30, 5_200.0)]);
        assert_eq!(clean(&mut trip, &Config::from_env()), CleanVerdict::MadeTooShort);
        assert_eq!(trip.fixes.len(), 4);
    }

    #[test]
    fn verdict_reasons() {
        assert_eq!(CleanVerdict::Ready.ignore_reason(), None);
        assert_eq!(CleanVerdict::TooFewReports.ignore_reason(), Some("too few vehicle reports"));
        assert_eq!(CleanVerdict::TooShort.ignore_reason(), Some("too short"));
        assert_eq!(CleanVerdict::MadeTooShort.ignore_reason(), Some("cleaning made too short"));
    }
}
