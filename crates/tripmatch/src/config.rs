use std::env;
use std::time::Duration;

/// Pipeline tuning values, loaded once at startup.
///
/// Distances are in meters of the local planar projection, durations in
/// seconds. Every value has a default suitable for an urban bus network and
/// can be overridden through the environment.
#[derive(Debug, Clone)]
pub struct Config {
    /// Per-point search radius sent with the first match attempt.
    pub match_radius: f64,
    /// Minimum acceptable match confidence before falling back.
    pub min_confidence: f64,
    /// How close a point must be to a geometry to count as "at" it.
    pub stop_distance: f64,
    /// Tolerance for simplifying matched geometries.
    pub simplify_tolerance: f64,
    /// Length of the segments the stop locator walks.
    pub segment_length: f64,
    /// Search distance for off-path terminal stops.
    pub terminal_distance: f64,
    /// A trip with no report for this long is considered over.
    pub inactivity_timeout: Duration,
    /// Traces shorter than this (km, point to point) are not matched.
    pub min_trip_km: f64,
    pub match_retries: u32,
    pub stop_retries: u32,
    pub feed_retries: u32,
    /// Base delay for exponential backoff between retries.
    pub retry_backoff: Duration,
    /// Worker tasks finalizing retired trips.
    pub workers: usize,
    /// Bound of the retired-trip queue feeding the workers.
    pub queue_capacity: usize,
    /// Reference point of the planar projection.
    pub origin_longitude: f64,
    pub origin_latitude: f64,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            match_radius: env_f64("MATCH_RADIUS", 20.0),
            min_confidence: env_f64("MIN_MATCH_CONFIDENCE", 0.85),
            stop_distance: env_f64("STOP_DISTANCE", 30.0),
            simplify_tolerance: env_f64("SIMPLIFY_TOLERANCE", 2.0),
            segment_length: env_f64("SEGMENT_LENGTH", 750.0),
            terminal_distance: env_f64("TERMINAL_DISTANCE", 500.0),
            inactivity_timeout: Duration::from_secs(env_u64("INACTIVITY_TIMEOUT", 1_800)),
            min_trip_km: env_f64("MIN_TRIP_KM", 0.25),
            match_retries: env_u32("MATCH_RETRIES", 5),
            stop_retries: env_u32("STOP_RETRIES", 3),
            feed_retries: env_u32("FEED_RETRIES", 3),
            retry_backoff: Duration::from_millis(env_u64("RETRY_BACKOFF_MS", 1_000)),
            workers: usize::try_from(env_u64("PIPELINE_WORKERS", 4)).unwrap_or(4),
            queue_capacity: usize::try_from(env_u64("PIPELINE_QUEUE", 64)).unwrap_or(64),
            origin_longitude: env_f64("ORIGIN_LONGITUDE", 174.76),
            origin_latitude: env_f64("ORIGIN_LATITUDE", -36.85),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

fn env_f64(key: &str, default: f64) -> f64 {
    env::var(key).ok().and_then(|value| value.parse::<f64>().ok()).unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key).ok().and_then(|value| value.parse::<u64>().ok()).unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    env::var(key).ok().and_then(|value| value.parse::<u32>().ok()).unwrap_or(default)
}
