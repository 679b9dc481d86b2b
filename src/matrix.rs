//! Dense, symmetric distance matrix keyed by location id.

use std::collections::HashMap;

use rayon::prelude::*;
use tracing::debug;

use crate::model::Location;
use crate::traits::{DistanceMatrixProvider, DistanceProvider};

/// Symmetric `(location, location) -> miles` table.
///
/// Unknown pairs are `None`. Lookups involving an id that is not in the
/// matrix are also `None`, except for an id compared with itself.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DistanceMatrix {
    ids: Vec<String>,
    index: HashMap<String, usize>,
    data: Vec<Option<f64>>,
}

impl DistanceMatrix {
    /// Matrix over `ids` with every off-diagonal pair unknown.
    pub fn unknown<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut ids_vec: Vec<String> = Vec::new();
        let mut index = HashMap::new();
        for id in ids {
            let id = id.into();
            if index.contains_key(&id) {
                continue;
            }
            index.insert(id.clone(), ids_vec.len());
            ids_vec.push(id);
        }
        let size = ids_vec.len();
        let mut data = vec![None; size * size];
        for i in 0..size {
            data[i * size + i] = Some(0.0);
        }
        Self {
            ids: ids_vec,
            index,
            data,
        }
    }

    /// Builds the matrix from a coordinate-based provider.
    ///
    /// Locations are deduplicated by id. Asymmetric answers are folded to
    /// the larger known value; a pair is unknown if either direction is.
    pub fn from_matrix_provider(locations: &[Location], provider: &dyn DistanceMatrixProvider) -> Self {
        let unique = dedupe_locations(locations);
        let mut matrix = Self::unknown(unique.iter().map(|l| l.id.clone()));
        let raw = provider.matrix_for(&unique);
        let size = matrix.size();

        if raw.len() != size || raw.iter().any(|row| row.len() != size) {
            debug!(expected = size, got = raw.len(), "provider returned malformed matrix; all pairs unknown");
            return matrix;
        }

        for i in 0..size {
            for j in (i + 1)..size {
                let value = match (raw[i][j], raw[j][i]) {
                    (Some(a), Some(b)) => Some(a.max(b)),
                    _ => None,
                };
                matrix.set_index(i, j, value);
            }
        }
        matrix
    }

    /// Builds the matrix by querying a pairwise provider, rows in parallel.
    pub fn from_provider<S: AsRef<str> + Sync>(ids: &[S], provider: &dyn DistanceProvider) -> Self {
        let mut matrix = Self::unknown(ids.iter().map(|id| id.as_ref().to_string()));
        let size = matrix.size();
        let names = matrix.ids.clone();

        let rows: Vec<Vec<(usize, Option<f64>)>> = (0..size)
            .into_par_iter()
            .map(|i| {
                ((i + 1)..size)
                    .map(|j| {
                        let forward = provider.distance(&names[i], &names[j]);
                        let value = forward.or_else(|| provider.distance(&names[j], &names[i]));
                        (j, value.filter(|d| d.is_finite() && *d >= 0.0))
                    })
                    .collect()
            })
            .collect();

        for (i, row) in rows.into_iter().enumerate() {
            for (j, value) in row {
                matrix.set_index(i, j, value);
            }
        }
        matrix
    }

    pub fn size(&self) -> usize {
        self.ids.len()
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    /// Sets both directions of a pair. Ids not yet present are appended.
    pub fn insert(&mut self, a: &str, b: &str, miles: Option<f64>) {
        let i = self.ensure(a);
        let j = self.ensure(b);
        if i != j {
            self.set_index(i, j, miles);
        }
    }

    pub fn get(&self, a: &str, b: &str) -> Option<f64> {
        if a == b {
            return Some(0.0);
        }
        let i = self.index_of(a)?;
        let j = self.index_of(b)?;
        self.get_index(i, j)
    }

    pub fn get_index(&self, i: usize, j: usize) -> Option<f64> {
        let size = self.size();
        if i >= size || j >= size {
            return None;
        }
        self.data[i * size + j]
    }

    fn set_index(&mut self, i: usize, j: usize, miles: Option<f64>) {
        let size = self.size();
        self.data[i * size + j] = miles;
        self.data[j * size + i] = miles;
    }

    fn ensure(&mut self, id: &str) -> usize {
        if let Some(existing) = self.index_of(id) {
            return existing;
        }
        let old = self.size();
        let new = old + 1;
        let mut data = vec![None; new * new];
        for i in 0..old {
            for j in 0..old {
                data[i * new + j] = self.data[i * old + j];
            }
        }
        data[old * new + old] = Some(0.0);
        self.data = data;
        self.index.insert(id.to_string(), old);
        self.ids.push(id.to_string());
        old
    }
}

impl DistanceProvider for DistanceMatrix {
    fn distance(&self, from: &str, to: &str) -> Option<f64> {
        self.get(from, to)
    }
}

impl DistanceMatrixProvider for DistanceMatrix {
    fn matrix_for(&self, locations: &[Location]) -> Vec<Vec<Option<f64>>> {
        locations
            .iter()
            .map(|from| locations.iter().map(|to| self.get(&from.id, &to.id)).collect())
            .collect()
    }
}

fn dedupe_locations(locations: &[Location]) -> Vec<Location> {
    let mut seen: HashMap<&str, ()> = HashMap::new();
    let mut unique = Vec::new();
    for location in locations {
        if seen.insert(location.id.as_str(), ()).is_some() {
            continue;
        }
        unique.push(location.clone());
    }
    unique
}
