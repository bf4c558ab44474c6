//! iNaturalist v1 API client.

use super::{Observation, ObservationQuery, ObservationSource, Place, RetryPolicy, Taxon};
use crate::config::ProviderConfig;
use crate::error::{PipelineError, PipelineResult};
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::{Client, Url};
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::{debug, info};

const PROVIDER: &str = "inaturalist";
/// Id lists per place/taxon request
const ID_BATCH: usize = 30;

#[derive(Debug, Deserialize)]
struct Page<T> {
    #[serde(default)]
    total_results: u64,
    #[serde(default = "Vec::new")]
    results: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct ApiObservation {
    id: u64,
    #[serde(default)]
    uri: Option<String>,
    #[serde(default)]
    observed_on: Option<String>,
    #[serde(default)]
    user: Option<ApiUser>,
    #[serde(default)]
    geojson: Option<ApiGeoJson>,
    #[serde(default)]
    place_guess: Option<String>,
    #[serde(default)]
    place_ids: Vec<u64>,
    #[serde(default)]
    taxon: Option<ApiTaxonRef>,
    #[serde(default)]
    ofvs: Vec<ApiFieldValue>,
}

#[derive(Debug, Deserialize)]
struct ApiUser {
    #[serde(default)]
    login: String,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiGeoJson {
    /// `[longitude, latitude]`
    coordinates: Vec<f64>,
}

#[derive(Debug, Deserialize)]
struct ApiTaxonRef {
    id: u64,
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct ApiFieldValue {
    name: String,
    #[serde(default)]
    value: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ApiPlace {
    id: u64,
    #[serde(default)]
    name: String,
    #[serde(default)]
    admin_level: Option<i32>,
}

#[derive(Debug, Deserialize)]
struct ApiTaxon {
    id: u64,
    #[serde(default)]
    name: String,
    #[serde(default)]
    rank: String,
    #[serde(default)]
    ancestors: Vec<ApiAncestor>,
}

#[derive(Debug, Deserialize)]
struct ApiAncestor {
    #[serde(default)]
    name: String,
    #[serde(default)]
    rank: String,
}

impl From<ApiObservation> for Observation {
    fn from(api: ApiObservation) -> Self {
        let (longitude, latitude) = match api.geojson.as_ref().map(|g| g.coordinates.as_slice()) {
            Some([lng, lat, ..]) => (Some(*lng), Some(*lat)),
            _ => (None, None),
        };
        let observer = api
            .user
            .map(|u| u.name.filter(|n| !n.trim().is_empty()).unwrap_or(u.login))
            .unwrap_or_default();
        let field_values: BTreeMap<String, String> = api
            .ofvs
            .into_iter()
            .filter_map(|ofv| {
                let value = match ofv.value? {
                    serde_json::Value::String(s) => s,
                    serde_json::Value::Null => return None,
                    other => other.to_string(),
                };
                Some((ofv.name, value))
            })
            .collect();

        Observation {
            url: api
                .uri
                .unwrap_or_else(|| format!("https://www.inaturalist.org/observations/{}", api.id)),
            id: api.id,
            observed_on: api
                .observed_on
                .as_deref()
                .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok()),
            observer,
            latitude,
            longitude,
            place_guess: api.place_guess.unwrap_or_default(),
            place_ids: api.place_ids,
            taxon_id: api.taxon.as_ref().map(|t| t.id),
            taxon_name: api.taxon.map(|t| t.name).unwrap_or_default(),
            field_values,
        }
    }
}

impl From<ApiTaxon> for Taxon {
    fn from(api: ApiTaxon) -> Self {
        let ancestor = |rank: &str| {
            api.ancestors
                .iter()
                .find(|a| a.rank == rank)
                .map(|a| a.name.clone())
        };
        let family = if api.rank == "family" {
            Some(api.name.clone())
        } else {
            ancestor("family")
        };
        let genus = if api.rank == "genus" {
            Some(api.name.clone())
        } else {
            ancestor("genus")
        };
        Taxon {
            id: api.id,
            name: api.name,
            rank: api.rank,
            family,
            genus,
        }
    }
}

/// HTTP client for the iNaturalist API
#[derive(Debug, Clone)]
pub struct INaturalistClient {
    client: Client,
    base_url: Url,
    per_page: u32,
    max_pages: u32,
    retry: RetryPolicy,
}

impl INaturalistClient {
    pub fn new(config: &ProviderConfig) -> PipelineResult<Self> {
        let base_url = Url::parse(&format!(
            "{}/",
            config.inaturalist_base_url.trim_end_matches('/')
        ))
        .map_err(|e| PipelineError::validation(format!("Invalid iNaturalist URL: {e}")))?;
        let client = Client::builder()
            .timeout(config.request_timeout())
            .user_agent(format!("pipeline-worker/{}", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            base_url,
            per_page: config.per_page.max(1),
            max_pages: config.max_pages.max(1),
            retry: RetryPolicy {
                max_retries: config.max_retries,
                backoff: config.retry_backoff(),
            },
        })
    }

    fn endpoint(&self, path: &str) -> PipelineResult<Url> {
        self.base_url
            .join(path)
            .map_err(|e| PipelineError::validation(format!("Invalid iNaturalist path {path}: {e}")))
    }

    async fn get_page<T>(&self, url: Url, query: &[(&str, String)]) -> PipelineResult<Page<T>>
    where
        T: serde::de::DeserializeOwned,
    {
        let response = self
            .retry
            .send(PROVIDER, || self.client.get(url.clone()).query(query))
            .await?;
        response
            .json::<Page<T>>()
            .await
            .map_err(|e| PipelineError::provider(PROVIDER, format!("Invalid response: {e}")))
    }

    async fn get_by_ids<T>(&self, resource: &str, ids: &[u64]) -> PipelineResult<Vec<T>>
    where
        T: serde::de::DeserializeOwned,
    {
        let mut results = Vec::new();
        for chunk in ids.chunks(ID_BATCH) {
            let joined = chunk
                .iter()
                .map(u64::to_string)
                .collect::<Vec<_>>()
                .join(",");
            let url = self.endpoint(&format!("{resource}/{joined}"))?;
            let page: Page<T> = self.get_page(url, &[]).await?;
            results.extend(page.results);
        }
        Ok(results)
    }
}

#[async_trait]
impl ObservationSource for INaturalistClient {
    async fn fetch_observations(&self, query: &ObservationQuery) -> PipelineResult<Vec<Observation>> {
        let url = self.endpoint("observations")?;
        let mut observations = Vec::new();

        for page in 1..=self.max_pages {
            let mut params = vec![
                ("project_id", query.project_id.clone()),
                ("per_page", self.per_page.to_string()),
                ("page", page.to_string()),
                ("order_by", "id".to_string()),
                ("order", "asc".to_string()),
            ];
            if let Some(d1) = query.min_date {
                params.push(("d1", d1.format("%Y-%m-%d").to_string()));
            }
            if let Some(d2) = query.max_date {
                params.push(("d2", d2.format("%Y-%m-%d").to_string()));
            }

            let response: Page<ApiObservation> = self.get_page(url.clone(), &params).await?;
            let received = response.results.len();
            debug!(
                page = page,
                received = received,
                total_results = response.total_results,
                "Fetched observation page"
            );
            observations.extend(response.results.into_iter().map(Observation::from));
            if received < self.per_page as usize {
                break;
            }
        }

        info!(
            project_id = %query.project_id,
            observations = observations.len(),
            "Fetched observations"
        );
        Ok(observations)
    }

    async fn fetch_places(&self, ids: &[u64]) -> PipelineResult<Vec<Place>> {
        let places: Vec<ApiPlace> = self.get_by_ids("places", ids).await?;
        Ok(places
            .into_iter()
            .map(|p| Place {
                id: p.id,
                name: p.name,
                admin_level: p.admin_level,
            })
            .collect())
    }

    async fn fetch_taxa(&self, ids: &[u64]) -> PipelineResult<Vec<Taxon>> {
        let taxa: Vec<ApiTaxon> = self.get_by_ids("taxa", ids).await?;
        Ok(taxa.into_iter().map(Taxon::from).collect())
    }
}
