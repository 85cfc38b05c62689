#![allow(missing_docs)]


use std::time::Duration;

use chrono::{DateTime, Utc};
use geo::{Coord, LineString, MultiLineString};
use pretty_assertions::assert_eq;
use provider::MockProvider;
use tripmatch::geom::{self, Projector};
use tripmatch::matcher::{self, LineGeometry, Leg, MatchResponse, Matching, Tracepoint};
use tripmatch::model::{TripRecord, VehicleFix};
use tripmatch::Config;

fn at(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).expect("valid timestamp")
}

fn config() -> Config {
    let mut config = Config::from_env();
    config.match_retries = 2;
    config.retry_backoff = Duration::from_millis(1);
    config
}

fn projector() -> Projector {
    Projector::new(174.76, -36.85)
}

fn trip() -> TripRecord {
    let projector = projector();
    let mut trip = TripRecord::new("T1", "B1", "27", "27-out", "V1", at(400));
    for i in 0..5 {
        let longitude = 0.002f64.mul_add(f64::from(i), 174.76);
        trip.add_fix(VehicleFix::new(
            at(i64::from(i) * 100),
            longitude,
            -36.85,
            projector.project(longitude, -36.85),
        ));
    }
    trip
}

fn response(confidence: f64, coordinates: Vec<[f64; 2]>, legs: Vec<f64>) -> MatchResponse {
    // one tracepoint per trip fix, none dropped
    let tracepoints = (0..5).map(|_| Some(Tracepoint { location: coordinates[0] })).collect();
    MatchResponse {
        code: "Ok".to_string(),
        matchings: Some(vec![Matching {
            confidence,
            geometry: LineGeometry { kind: "LineString".to_string(), coordinates },
            legs: legs.into_iter().map(|distance| Leg { distance }).collect(),
        }]),
        tracepoints: Some(tracepoints),
    }
}

fn default_route() -> MultiLineString<f64> {
    MultiLineString::new(vec![LineString::new(vec![
        Coord { x: 174.76, y: -36.85 },
        Coord { x: 174.77, y: -36.85 },
    ])])
}

// A confident first answer is saved and comes back projected into meters.
#[tokio::test]
async fn confident_match_is_saved() {
    let mock = MockProvider::default();
    mock.push_match_response(response(
        0.93,
        vec![[174.76, -36.85], [174.77, -36.85]],
        vec![220.0, 220.0, 220.0, 220.0],
    ));

    let result = matcher::match_trip(&mock, &config(), &projector(), &trip())
        .await
        .expect("should match")
        .expect("should produce a result");

    assert!(!result.used_default_route);
    assert!((result.confidence - 0.93).abs() < 1e-9);
    assert_eq!(result.geometry.0.len(), 1);

    // 0.01 degrees of longitude at this latitude is roughly 890 meters
    let meters = geom::length(&result.geometry);
    assert!(meters > 880.0 && meters < 900.0);

    let trace = result.trace.expect("service match should carry a trace");
    assert_eq!(trace.dropped, vec![false; 5]);
    assert_eq!(trace.legs, vec![vec![220.0, 220.0, 220.0, 220.0]]);

    let saved = mock.saved_matches();
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0].0, "T1");
    assert!((saved[0].1 - 0.93).abs() < 1e-9);

    let requests = mock.match_requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].coordinates.len(), 5);
    assert!((requests[0].radiuses[0] - 20.0).abs() < 1e-9);
}

// A weak answer earns one more attempt at double the search radius.
#[tokio::test]
async fn weak_match_retries_wider() {
    let mock = MockProvider::default();
    mock.push_match_response(response(0.4, vec![[174.76, -36.85], [174.77, -36.85]], vec![890.0]));
    mock.push_match_response(response(
        0.91,
        vec![[174.76, -36.85], [174.77, -36.85]],
        vec![890.0],
    ));

    let result = matcher::match_trip(&mock, &config(), &projector(), &trip())
        .await
        .expect("should match")
        .expect("should produce a result");

    assert!((result.confidence - 0.91).abs() < 1e-9);

    let requests = mock.match_requests();
    assert_eq!(requests.len(), 2);
    assert!((requests[1].radiuses[0] - requests[0].radiuses[0] * 2.0).abs() < 1e-9);
}

// Two weak answers fall back to the stored route for the direction.
#[tokio::test]
async fn weak_match_falls_back_to_default_route() {
    let mock = MockProvider::default();
    mock.push_match_response(response(0.4, vec![[174.76, -36.85], [174.77, -36.85]], vec![890.0]));
    mock.push_match_response(response(0.5, vec![[174.76, -36.85], [174.77, -36.85]], vec![890.0]));
    mock.set_default_route("27-out", default_route());

    let result = matcher::match_trip(&mock, &config(), &projector(), &trip())
        .await
        .expect("should match")
        .expect("should produce a result");

    assert!(result.used_default_route);
    assert!((result.confidence - 1.0).abs() < 1e-9);
    assert!(result.trace.is_none());

    // saved with full confidence, projected
    let saved = mock.saved_matches();
    assert_eq!(saved.len(), 1);
    assert!((saved[0].1 - 1.0).abs() < 1e-9);
    assert!(geom::length(&saved[0].2) > 880.0);
}

// No acceptable answer and no stored route: the trip is written off.
#[tokio::test]
async fn unmatchable_trip_is_ignored() {
    let mock = MockProvider::default();
    mock.push_match_response(response(0.4, vec![[174.76, -36.85], [174.77, -36.85]], vec![890.0]));
    mock.push_match_response(response(0.5, vec![[174.76, -36.85], [174.77, -36.85]], vec![890.0]));

    let result =
        matcher::match_trip(&mock, &config(), &projector(), &trip()).await.expect("should match");

    assert!(result.is_none());
    assert!(mock.saved_matches().is_empty());
    assert_eq!(mock.ignored(), vec![("T1".to_string(), "no match".to_string())]);
}

// Transport failure exhausts its retries and never reaches the fallback,
// even when a default route exists.
#[tokio::test]
async fn unreachable_service_skips_the_fallback() {
    let mock = MockProvider::default();
    mock.fail_next_matches(2);
    mock.set_default_route("27-out", default_route());

    let result =
        matcher::match_trip(&mock, &config(), &projector(), &trip()).await.expect("should match");

    assert!(result.is_none());
    assert_eq!(mock.match_requests().len(), 2);
    assert!(mock.saved_matches().is_empty());
    assert_eq!(mock.ignored(), vec![("T1".to_string(), "connection issue".to_string())]);
}

// Losing the service mid-escalation counts as unreachable too.
#[tokio::test]
async fn failure_during_escalation_is_ignored() {
    let mock = MockProvider::default();
    mock.push_match_response(response(0.4, vec![[174.76, -36.85], [174.77, -36.85]], vec![890.0]));

    let result =
        matcher::match_trip(&mock, &config(), &projector(), &trip()).await.expect("should match");

    // first attempt answered weakly, the wider one found nothing seeded
    assert!(result.is_none());
    assert_eq!(mock.match_requests().len(), 3);
    assert_eq!(mock.ignored(), vec![("T1".to_string(), "connection issue".to_string())]);
}
