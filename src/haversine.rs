//! Haversine distance matrix provider (fallback when no geo-index or OSRM).
//!
//! Uses great-circle distance scaled by a road coefficient.
//! Less accurate than a road network but always available.

use rayon::prelude::*;

use crate::model::{Coordinates, Location};
use crate::traits::DistanceMatrixProvider;

/// Earth radius in miles.
const EARTH_RADIUS_MILES: f64 = 3958.8;

/// Straight line to road distance.
const DEFAULT_ROAD_COEFFICIENT: f64 = 1.0;

/// Great-circle distance between two points in miles.
pub fn haversine_miles(from: Coordinates, to: Coordinates) -> f64 {
    let lat1_rad = from.lat.to_radians();
    let lat2_rad = to.lat.to_radians();
    let delta_lat = (to.lat - from.lat).to_radians();
    let delta_lon = (to.lon - from.lon).to_radians();

    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().asin();

    EARTH_RADIUS_MILES * c
}

/// Haversine-based distance matrix provider.
#[derive(Debug, Clone)]
pub struct HaversineMatrix {
    /// Multiplier applied to the straight-line distance.
    pub road_coefficient: f64,
}

impl Default for HaversineMatrix {
    fn default() -> Self {
        Self {
            road_coefficient: DEFAULT_ROAD_COEFFICIENT,
        }
    }
}

impl HaversineMatrix {
    pub fn new(road_coefficient: f64) -> Self {
        Self { road_coefficient }
    }

    pub fn miles(&self, from: Coordinates, to: Coordinates) -> Option<f64> {
        let miles = haversine_miles(from, to) * self.road_coefficient;
        miles.is_finite().then_some(miles)
    }
}

impl DistanceMatrixProvider for HaversineMatrix {
    fn matrix_for(&self, locations: &[Location]) -> Vec<Vec<Option<f64>>> {
        locations
            .par_iter()
            .enumerate()
            .map(|(i, from)| {
                locations
                    .iter()
                    .enumerate()
                    .map(|(j, to)| {
                        if i == j {
                            Some(0.0)
                        } else {
                            self.miles(from.coordinates, to.coordinates)
                        }
                    })
                    .collect()
            })
            .collect()
    }
}
