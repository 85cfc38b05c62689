//! Trace matching against the road network.
//!
//! A retired trip's fixes go to an OSRM-style match service; a low-confidence
//! answer gets one retry at double the search radius, then falls back to the
//! stored default route for the trip's direction. Whatever geometry survives
//! comes back projected into the local plane for the locators.

use geo::{Coord, LineString, MultiLineString};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::Config;
use crate::error::Result;
use crate::geom::{self, Projector};
use crate::model::TripRecord;
use crate::provider::Provider;

/// Trace-matching request: ordered coordinates with one search radius per
/// point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchRequest {
    pub coordinates: Vec<[f64; 2]>,
    pub radiuses: Vec<f64>,
}

impl MatchRequest {
    #[must_use]
    pub fn from_trip(trip: &TripRecord, radius: f64) -> Self {
        Self {
            coordinates: trip.fixes.iter().map(|fix| [fix.longitude, fix.latitude]).collect(),
            radiuses: vec![radius; trip.fixes.len()],
        }
    }

    /// Renders the request as an OSRM match path with query string.
    #[must_use]
    pub fn osrm_path(&self) -> String {
        let coordinates = self
            .coordinates
            .iter()
            .map(|c| format!("{},{}", c[0], c[1]))
            .collect::<Vec<_>>()
            .join(";");
        let radiuses =
            self.radiuses.iter().map(ToString::to_string).collect::<Vec<_>>().join(";");
        format!(
            "/match/v1/transit/{coordinates}?radiuses={radiuses}&steps=false&geometries=geojson&annotations=false&overview=full&gaps=ignore&tidy=true&generate_hints=false"
        )
    }
}

/// Trace-matching response, OSRM match schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchResponse {
    pub code: String,
    #[serde(default)]
    pub matchings: Option<Vec<Matching>>,
    #[serde(default)]
    pub tracepoints: Option<Vec<Option<Tracepoint>>>,
}

impl MatchResponse {
    /// Overall confidence: the mean over match segments, zero when the
    /// service did not report an Ok match.
    #[must_use]
    pub fn confidence(&self) -> f64 {
        if self.code != "Ok" {
            return 0.0;
        }
        match self.matchings.as_deref() {
            Some(matchings) if !matchings.is_empty() => {
                matchings.iter().map(|m| m.confidence).sum::<f64>() / matchings.len() as f64
            }
            _ => 0.0,
        }
    }
}

/// One matched sub-route.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Matching {
    pub confidence: f64,
    pub geometry: LineGeometry,
    #[serde(default)]
    pub legs: Vec<Leg>,
}

/// GeoJSON line geometry, `[longitude, latitude]` positions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineGeometry {
    #[serde(rename = "type")]
    pub kind: String,
    pub coordinates: Vec<[f64; 2]>,
}

/// Travel between two consecutive matched points.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Leg {
    pub distance: f64,
}

/// Matched point for one input coordinate; an input the service dropped as
/// an outlier arrives as `null` instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tracepoint {
    pub location: [f64; 2],
}

/// Outcome of matching one trip.
#[derive(Debug, Clone)]
pub struct MatchResult {
    /// Route geometry in local planar coordinates.
    pub geometry: MultiLineString<f64>,
    pub confidence: f64,
    pub used_default_route: bool,
    /// Raw match detail for the vehicle locator; present exactly when the
    /// geometry came from the matching service.
    pub trace: Option<MatchTrace>,
}

/// What the vehicle locator needs from the raw response.
#[derive(Debug, Clone, Default)]
pub struct MatchTrace {
    /// Per input fix: did the service drop it as an outlier?
    pub dropped: Vec<bool>,
    /// Leg distances per matching, in matched order.
    pub legs: Vec<Vec<f64>>,
}

/// Matches a retired trip against the road network.
///
/// Returns `None` when the trip turned out unmatchable; the ignore marker is
/// already written by then. A `Some` result always carries a projected,
/// non-degenerate geometry assembled from the service response or the
/// default route.
///
/// # Errors
///
/// Fails only on storage writes (`save_match`, `mark_ignored`); the match
/// service being unreachable is handled, not raised.
pub async fn match_trip<P: Provider>(
    provider: &P, config: &Config, projector: &Projector, trip: &TripRecord,
) -> Result<Option<MatchResult>> {
    let Some(mut response) = attempt(provider, config, trip, config.match_radius).await else {
        return service_unreachable(provider, trip).await;
    };

    if response.confidence() < config.min_confidence {
        // wider net before giving up on the service
        let Some(wider) =
            attempt(provider, config, trip, config.match_radius * 2.0).await
        else {
            return service_unreachable(provider, trip).await;
        };
        response = wider;
    }

    let confidence = response.confidence();
    if confidence >= config.min_confidence {
        let matchings = response.matchings.as_deref().unwrap_or_default();
        let geographic = MultiLineString::new(
            matchings
                .iter()
                .map(|matching| {
                    LineString::new(
                        matching
                            .geometry
                            .coordinates
                            .iter()
                            .map(|c| Coord { x: c[0], y: c[1] })
                            .collect(),
                    )
                })
                .collect(),
        );
        let geometry =
            geom::simplify(&projector.project_multiline(&geographic), config.simplify_tolerance);
        let trace = MatchTrace {
            dropped: response
                .tracepoints
                .as_deref()
                .unwrap_or_default()
                .iter()
                .map(|point| point.is_none())
                .collect(),
            legs: matchings
                .iter()
                .map(|matching| matching.legs.iter().map(|leg| leg.distance).collect())
                .collect(),
        };

        provider.save_match(&trip.trip_id, confidence, &geometry).await?;
        info!(trip_id = %trip.trip_id, confidence, "match found");
        return Ok(Some(MatchResult {
            geometry,
            confidence,
            used_default_route: false,
            trace: Some(trace),
        }));
    }

    if let Some(default) = provider.default_route(&trip.direction_id, trip.last_seen).await? {
        let geometry = projector.project_multiline(&default);
        provider.save_match(&trip.trip_id, 1.0, &geometry).await?;
        info!(trip_id = %trip.trip_id, direction_id = %trip.direction_id, "default route used");
        return Ok(Some(MatchResult {
            geometry,
            confidence: 1.0,
            used_default_route: true,
            trace: None,
        }));
    }

    provider.mark_ignored(&trip.trip_id, "no match").await?;
    info!(trip_id = %trip.trip_id, confidence, "no match and no default route, trip ignored");
    Ok(None)
}

/// One radius's worth of attempts against the match service, with backoff.
/// `None` means the service stayed unreachable through every retry.
async fn attempt<P: Provider>(
    provider: &P, config: &Config, trip: &TripRecord, radius: f64,
) -> Option<MatchResponse> {
    let request = MatchRequest::from_trip(trip, radius);
    for try_number in 1..=config.match_retries {
        match provider.match_trace(&request).await {
            Ok(response) => return Some(response),
            Err(err) => {
                warn!(trip_id = %trip.trip_id, try_number, error = %err, "match request failed");
                if try_number < config.match_retries {
                    tokio::time::sleep(config.retry_backoff * (1 << (try_number - 1))).await;
                }
            }
        }
    }
    None
}

async fn service_unreachable<P: Provider>(
    provider: &P, trip: &TripRecord,
) -> Result<Option<MatchResult>> {
    provider.mark_ignored(&trip.trip_id, "connection issue").await?;
    warn!(trip_id = %trip.trip_id, "match service unreachable, trip ignored");
    Ok(None)
}
