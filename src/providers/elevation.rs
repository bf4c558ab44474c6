//! Open-Elevation batch lookup client.

use super::{Coordinate, ElevationService, RetryPolicy};
use crate::config::ProviderConfig;
use crate::error::{PipelineError, PipelineResult};
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use tracing::debug;

const PROVIDER: &str = "open-elevation";

#[derive(Debug, Serialize)]
struct LookupRequest<'a> {
    locations: &'a [Coordinate],
}

#[derive(Debug, Deserialize)]
struct LookupResponse {
    results: Vec<LookupResult>,
}

#[derive(Debug, Deserialize)]
struct LookupResult {
    #[serde(default)]
    elevation: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct OpenElevationClient {
    client: Client,
    lookup_url: Url,
    batch_size: usize,
    retry: RetryPolicy,
}

impl OpenElevationClient {
    pub fn new(config: &ProviderConfig) -> PipelineResult<Self> {
        let lookup_url = Url::parse(&format!(
            "{}/lookup",
            config.elevation_base_url.trim_end_matches('/')
        ))
        .map_err(|e| PipelineError::validation(format!("Invalid elevation URL: {e}")))?;
        let client = Client::builder().timeout(config.request_timeout()).build()?;
        Ok(Self {
            client,
            lookup_url,
            batch_size: config.elevation_batch_size.max(1),
            retry: RetryPolicy {
                max_retries: config.max_retries,
                backoff: config.retry_backoff(),
            },
        })
    }
}

#[async_trait]
impl ElevationService for OpenElevationClient {
    async fn lookup(&self, coordinates: &[Coordinate]) -> PipelineResult<Vec<Option<f64>>> {
        let mut elevations = Vec::with_capacity(coordinates.len());
        for batch in coordinates.chunks(self.batch_size) {
            let body = LookupRequest { locations: batch };
            let response = self
                .retry
                .send(PROVIDER, || self.client.post(self.lookup_url.clone()).json(&body))
                .await?;
            let parsed: LookupResponse = response
                .json()
                .await
                .map_err(|e| PipelineError::provider(PROVIDER, format!("Invalid response: {e}")))?;
            if parsed.results.len() != batch.len() {
                return Err(PipelineError::provider(
                    PROVIDER,
                    format!(
                        "Expected {} elevations, received {}",
                        batch.len(),
                        parsed.results.len()
                    ),
                ));
            }
            elevations.extend(parsed.results.into_iter().map(|r| r.elevation));
        }
        debug!(lookups = coordinates.len(), "Resolved elevations");
        Ok(elevations)
    }
}
