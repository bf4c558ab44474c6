//! # External Data Providers
//!
//! Black-box services the observation pull depends on. Each is a trait so the
//! handlers can run against in-memory doubles; the HTTP clients retry
//! transient failures themselves and surface anything persistent as
//! [`PipelineError::Provider`].

pub mod elevation;
pub mod inaturalist;

pub use elevation::OpenElevationClient;
pub use inaturalist::INaturalistClient;

use crate::error::{PipelineError, PipelineResult};
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::warn;

/// Observation field names that carry the number of specimens taken
const SPECIMEN_COUNT_FIELDS: &[&str] = &["Number of bees collected", "Specimens collected"];
const SAMPLING_METHOD_FIELDS: &[&str] = &["Sampling method", "Collection method"];

/// Parameters of one observation pull
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservationQuery {
    pub project_id: String,
    pub min_date: Option<NaiveDate>,
    pub max_date: Option<NaiveDate>,
}

/// Observation as returned by an [`ObservationSource`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub id: u64,
    pub url: String,
    pub observed_on: Option<NaiveDate>,
    pub observer: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub place_guess: String,
    /// Every place containing the observation, coarse and fine
    pub place_ids: Vec<u64>,
    pub taxon_id: Option<u64>,
    pub taxon_name: String,
    /// Observation field values keyed by field name
    pub field_values: BTreeMap<String, String>,
}

impl Observation {
    fn field_value(&self, names: &[&str]) -> Option<&str> {
        names.iter().find_map(|name| {
            self.field_values
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v.trim())
                .filter(|v| !v.is_empty())
        })
    }

    /// Count of specimens physically collected, at least one
    pub fn specimens_collected(&self) -> u32 {
        self.field_value(SPECIMEN_COUNT_FIELDS)
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(1)
            .max(1)
    }

    pub fn sampling_method(&self) -> Option<&str> {
        self.field_value(SAMPLING_METHOD_FIELDS)
    }
}

/// A place of the provider's gazetteer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Place {
    pub id: u64,
    pub name: String,
    /// 0 country, 10 state, 20 county; `None` for user-defined places
    pub admin_level: Option<i32>,
}

/// A taxon with the ancestry the dataset records need
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Taxon {
    pub id: u64,
    pub name: String,
    pub rank: String,
    pub family: Option<String>,
    pub genus: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Rounded to 4 decimals, so nearby points share one lookup
    pub fn rounded(&self) -> Self {
        let round = |v: f64| (v * 10_000.0).round() / 10_000.0;
        Self::new(round(self.latitude), round(self.longitude))
    }

    /// Hashable identity of a rounded coordinate
    pub fn key(&self) -> (i64, i64) {
        let r = self.rounded();
        (
            (r.latitude * 10_000.0).round() as i64,
            (r.longitude * 10_000.0).round() as i64,
        )
    }
}

#[async_trait]
pub trait ObservationSource: Send + Sync {
    /// Every observation matching the query, across all pages
    async fn fetch_observations(&self, query: &ObservationQuery) -> PipelineResult<Vec<Observation>>;

    async fn fetch_places(&self, ids: &[u64]) -> PipelineResult<Vec<Place>>;

    async fn fetch_taxa(&self, ids: &[u64]) -> PipelineResult<Vec<Taxon>>;
}

#[async_trait]
pub trait ElevationService: Send + Sync {
    /// Elevation in meters for each coordinate, positionally aligned
    async fn lookup(&self, coordinates: &[Coordinate]) -> PipelineResult<Vec<Option<f64>>>;
}

/// Linear-backoff retry policy shared by the HTTP providers
#[derive(Debug, Clone, Copy)]
pub(crate) struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    /// Send the request built by `build`, retrying timeouts, connection
    /// failures, 429 and 5xx responses
    pub(crate) async fn send<F>(&self, provider: &str, mut build: F) -> PipelineResult<Response>
    where
        F: FnMut() -> RequestBuilder,
    {
        let mut attempt = 0;
        loop {
            let outcome = build().send().await;
            let retryable = match &outcome {
                Ok(response) => is_retryable_status(response.status()),
                Err(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            };
            if !retryable || attempt >= self.max_retries {
                return match outcome {
                    Ok(response) if response.status().is_success() => Ok(response),
                    Ok(response) => {
                        let status = response.status();
                        let body = response.text().await.unwrap_or_default();
                        Err(PipelineError::provider(
                            provider,
                            format!("HTTP {status}: {}", truncate(&body, 200)),
                        ))
                    }
                    Err(e) => Err(PipelineError::provider(provider, e.to_string())),
                };
            }

            attempt += 1;
            let delay = self.backoff * attempt;
            warn!(
                provider = provider,
                attempt = attempt,
                max_retries = self.max_retries,
                delay_ms = delay.as_millis() as u64,
                "Provider request failed; retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((i, _)) => &s[..i],
        None => s,
    }
}
