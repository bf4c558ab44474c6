//! Canned observation and elevation providers.

use crate::error::{PipelineError, PipelineResult};
use crate::providers::{
    Coordinate, ElevationService, Observation, ObservationQuery, ObservationSource, Place, Taxon,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;

/// Serves fixed observations, places and taxa and records what was asked for
#[derive(Debug, Default)]
pub struct StaticObservationSource {
    observations: Vec<Observation>,
    places: Vec<Place>,
    taxa: Vec<Taxon>,
    fail: bool,
    place_requests: Mutex<Vec<Vec<u64>>>,
    taxon_requests: Mutex<Vec<Vec<u64>>>,
}

impl StaticObservationSource {
    pub fn new(observations: Vec<Observation>) -> Self {
        Self {
            observations,
            ..Self::default()
        }
    }

    pub fn with_places(mut self, places: Vec<Place>) -> Self {
        self.places = places;
        self
    }

    pub fn with_taxa(mut self, taxa: Vec<Taxon>) -> Self {
        self.taxa = taxa;
        self
    }

    /// Every fetch fails with a provider error
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn place_requests(&self) -> Vec<Vec<u64>> {
        self.place_requests.lock().clone()
    }

    pub fn taxon_requests(&self) -> Vec<Vec<u64>> {
        self.taxon_requests.lock().clone()
    }

    fn check(&self) -> PipelineResult<()> {
        if self.fail {
            return Err(PipelineError::provider("static", "source unavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl ObservationSource for StaticObservationSource {
    async fn fetch_observations(&self, query: &ObservationQuery) -> PipelineResult<Vec<Observation>> {
        self.check()?;
        Ok(self
            .observations
            .iter()
            .filter(|o| match o.observed_on {
                Some(date) => {
                    query.min_date.map_or(true, |min| date >= min)
                        && query.max_date.map_or(true, |max| date <= max)
                }
                None => query.min_date.is_none() && query.max_date.is_none(),
            })
            .cloned()
            .collect())
    }

    async fn fetch_places(&self, ids: &[u64]) -> PipelineResult<Vec<Place>> {
        self.check()?;
        self.place_requests.lock().push(ids.to_vec());
        Ok(self
            .places
            .iter()
            .filter(|p| ids.contains(&p.id))
            .cloned()
            .collect())
    }

    async fn fetch_taxa(&self, ids: &[u64]) -> PipelineResult<Vec<Taxon>> {
        self.check()?;
        self.taxon_requests.lock().push(ids.to_vec());
        Ok(self
            .taxa
            .iter()
            .filter(|t| ids.contains(&t.id))
            .cloned()
            .collect())
    }
}

/// Elevation lookup backed by a fixed table keyed by rounded coordinate
#[derive(Debug, Default)]
pub struct StaticElevationService {
    elevations: HashMap<(i64, i64), f64>,
    lookups: Mutex<usize>,
}

impl StaticElevationService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_elevation(mut self, latitude: f64, longitude: f64, meters: f64) -> Self {
        self.elevations
            .insert(Coordinate::new(latitude, longitude).key(), meters);
        self
    }

    /// Coordinates looked up so far
    pub fn lookups(&self) -> usize {
        *self.lookups.lock()
    }
}

#[async_trait]
impl ElevationService for StaticElevationService {
    async fn lookup(&self, coordinates: &[Coordinate]) -> PipelineResult<Vec<Option<f64>>> {
        *self.lookups.lock() += coordinates.len();
        Ok(coordinates
            .iter()
            .map(|c| self.elevations.get(&c.key()).copied())
            .collect())
    }
}
