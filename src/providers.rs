//! HTTP implementations of the domain provider trait.
//!
//! One `reqwest` client serves three collaborators: the vehicle feed, the
//! OSRM-style matching service, and trip storage. All payloads are JSON.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use geo::{Coord, LineString, MultiLineString};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tripmatch::matcher::{MatchRequest, MatchResponse};
use tripmatch::model::{TimePoint, TripRecord};
use tripmatch::provider::{FeedSnapshot, Provider, StopDetail};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Multiline geometry on the wire: GeoJSON `MultiLineString` coordinates,
/// `[x, y]` positions.
#[derive(Debug, Serialize, Deserialize)]
struct GeometryPayload {
    coordinates: Vec<Vec<[f64; 2]>>,
}

impl GeometryPayload {
    fn from_lines(geometry: &MultiLineString<f64>) -> Self {
        Self {
            coordinates: geometry
                .0
                .iter()
                .map(|line| line.coords().map(|c| [c.x, c.y]).collect())
                .collect(),
        }
    }

    fn into_lines(self) -> MultiLineString<f64> {
        MultiLineString::new(
            self.coordinates
                .into_iter()
                .map(|line| {
                    LineString::new(line.into_iter().map(|c| Coord { x: c[0], y: c[1] }).collect())
                })
                .collect(),
        )
    }
}

/// Body of `POST /trips/:tripId/match`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MatchOutcome {
    confidence: f64,
    geometry: GeometryPayload,
}

/// Body of `POST /trips/:tripId/ignore`.
#[derive(Debug, Serialize)]
struct IgnoreMarker<'a> {
    reason: &'a str,
}

/// The real collaborators, reached over HTTP.
#[derive(Debug, Clone)]
pub struct HttpProvider {
    client: Client,
    feed_base: String,
    match_base: String,
    storage_base: String,
}

impl HttpProvider {
    /// Builds a provider against the three service base URLs.
    ///
    /// # Errors
    /// Fails when the HTTP client cannot be constructed.
    pub fn new(feed_base: &str, match_base: &str, storage_base: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("building http client")?;
        Ok(Self {
            client,
            feed_base: feed_base.trim_end_matches('/').to_string(),
            match_base: match_base.trim_end_matches('/').to_string(),
            storage_base: storage_base.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl Provider for HttpProvider {
    async fn fetch_snapshot(&self) -> Result<FeedSnapshot> {
        let url = format!("{}/vehicles", self.feed_base);
        let response =
            self.client.get(&url).send().await.context("requesting vehicle snapshot")?;
        let snapshot =
            response.error_for_status()?.json().await.context("decoding vehicle snapshot")?;
        Ok(snapshot)
    }

    async fn fetch_stop_detail(&self, stop_id: &str) -> Result<Option<StopDetail>> {
        let url = format!("{}/stops/{stop_id}", self.feed_base);
        let response = self.client.get(&url).send().await.context("requesting stop detail")?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let detail = response.error_for_status()?.json().await.context("decoding stop detail")?;
        Ok(Some(detail))
    }

    async fn match_trace(&self, request: &MatchRequest) -> Result<MatchResponse> {
        let url = format!("{}{}", self.match_base, request.osrm_path());
        let response = self.client.get(&url).send().await.context("requesting trace match")?;
        let matched =
            response.error_for_status()?.json().await.context("decoding match response")?;
        Ok(matched)
    }

    async fn default_route(
        &self, direction_id: &str, as_of: DateTime<Utc>,
    ) -> Result<Option<MultiLineString<f64>>> {
        let url = format!("{}/routes/{direction_id}/default", self.storage_base);
        let response = self
            .client
            .get(&url)
            .query(&[("asOf", as_of.timestamp())])
            .send()
            .await
            .context("requesting default route")?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let payload: GeometryPayload =
            response.error_for_status()?.json().await.context("decoding default route")?;
        Ok(Some(payload.into_lines()))
    }

    async fn save_trip(&self, trip: &TripRecord) -> Result<()> {
        let url = format!("{}/trips", self.storage_base);
        let response =
            self.client.post(&url).json(trip).send().await.context("saving trip")?;
        response.error_for_status()?;
        Ok(())
    }

    async fn save_match(
        &self, trip_id: &str, confidence: f64, geometry: &MultiLineString<f64>,
    ) -> Result<()> {
        let url = format!("{}/trips/{trip_id}/match", self.storage_base);
        let body = MatchOutcome { confidence, geometry: GeometryPayload::from_lines(geometry) };
        let response =
            self.client.post(&url).json(&body).send().await.context("saving match outcome")?;
        response.error_for_status()?;
        Ok(())
    }

    async fn save_timepoints(&self, trip_id: &str, timepoints: &[TimePoint]) -> Result<()> {
        let url = format!("{}/trips/{trip_id}/timepoints", self.storage_base);
        let response =
            self.client.put(&url).json(timepoints).send().await.context("saving timepoints")?;
        response.error_for_status()?;
        Ok(())
    }

    async fn mark_ignored(&self, trip_id: &str, reason: &str) -> Result<()> {
        let url = format!("{}/trips/{trip_id}/ignore", self.storage_base);
        let body = IgnoreMarker { reason };
        let response =
            self.client.post(&url).json(&body).send().await.context("marking trip ignored")?;
        response.error_for_status()?;
        Ok(())
    }

    async fn upsert_stop(&self, stop: &StopDetail) -> Result<()> {
        let url = format!("{}/stops/{}", self.storage_base, stop.stop_id);
        let response =
            self.client.put(&url).json(stop).send().await.context("upserting stop")?;
        response.error_for_status()?;
        Ok(())
    }
}
