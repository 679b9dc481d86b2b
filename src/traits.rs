//! Collaborator seams for the planner.
//!
//! Distance backends (OSRM, haversine, precomputed tables) and
//! jurisdiction lookups live behind these traits.

use crate::model::{Coordinates, Location};

/// Something with a location identifier and a position on the map.
pub trait Located {
    fn location_id(&self) -> &str;

    fn coordinates(&self) -> Coordinates;
}

impl Located for Location {
    fn location_id(&self) -> &str {
        &self.id
    }

    fn coordinates(&self) -> Coordinates {
        self.coordinates
    }
}

/// Pairwise travel distance keyed by location identifier.
///
/// `None` means unknown or unreachable and must never be read as zero.
pub trait DistanceProvider: Send + Sync {
    /// Distance in miles.
    fn distance(&self, from: &str, to: &str) -> Option<f64>;
}

/// Provides a distance matrix (miles) for a set of locations.
///
/// The matrix is indexed by the provided location order. Unknown cells are
/// `None`; the diagonal is always `Some(0.0)`.
pub trait DistanceMatrixProvider: Send + Sync {
    fn matrix_for(&self, locations: &[Location]) -> Vec<Vec<Option<f64>>>;
}

/// Jurisdiction lookup used to tighten the travel radius across boundaries.
pub trait BoroughClassifier: Send + Sync {
    fn borough(&self, at: Coordinates) -> Option<String>;

    /// Two points with an unknown borough are treated as the same borough.
    fn same_borough(&self, a: Coordinates, b: Coordinates) -> bool {
        match (self.borough(a), self.borough(b)) {
            (Some(left), Some(right)) => left == right,
            _ => true,
        }
    }
}
