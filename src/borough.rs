//! Borough classifiers.

use serde::{Deserialize, Serialize};

use crate::model::Coordinates;
use crate::traits::BoroughClassifier;

/// Classifier for deployments without jurisdiction boundaries.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoBoroughs;

impl BoroughClassifier for NoBoroughs {
    fn borough(&self, _at: Coordinates) -> Option<String> {
        None
    }
}

/// Named latitude/longitude rectangle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoroughRegion {
    pub name: String,
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

impl BoroughRegion {
    pub fn new(name: impl Into<String>, (min_lat, max_lat): (f64, f64), (min_lon, max_lon): (f64, f64)) -> Self {
        Self {
            name: name.into(),
            min_lat,
            max_lat,
            min_lon,
            max_lon,
        }
    }

    pub fn contains(&self, at: Coordinates) -> bool {
        (self.min_lat..=self.max_lat).contains(&at.lat) && (self.min_lon..=self.max_lon).contains(&at.lon)
    }
}

/// Bounding-box classifier; the first matching region wins.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegionBoroughs {
    regions: Vec<BoroughRegion>,
}

impl RegionBoroughs {
    pub fn new(regions: Vec<BoroughRegion>) -> Self {
        Self { regions }
    }

    pub fn with_region(mut self, region: BoroughRegion) -> Self {
        self.regions.push(region);
        self
    }
}

impl BoroughClassifier for RegionBoroughs {
    fn borough(&self, at: Coordinates) -> Option<String> {
        self.regions
            .iter()
            .find(|region| region.contains(at))
            .map(|region| region.name.clone())
    }
}
