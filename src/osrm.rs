//! OSRM HTTP adapter for distance matrices.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::Result;
use crate::model::Location;
use crate::traits::DistanceMatrixProvider;

const METERS_PER_MILE: f64 = 1609.344;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OsrmConfig {
    pub base_url: String,
    pub profile: String,
    pub timeout_secs: u64,
}

impl Default for OsrmConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000".to_string(),
            profile: "car".to_string(),
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OsrmClient {
    config: OsrmConfig,
    client: reqwest::blocking::Client,
}

impl OsrmClient {
    pub fn new(config: OsrmConfig) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self { config, client })
    }

    pub fn table_url(&self, locations: &[Location]) -> String {
        let coords = locations
            .iter()
            .map(|location| format!("{:.6},{:.6}", location.coordinates.lon, location.coordinates.lat))
            .collect::<Vec<_>>()
            .join(";");

        format!(
            "{}/table/v1/{}/{}?annotations=distance",
            self.config.base_url.trim_end_matches('/'),
            self.config.profile,
            coords
        )
    }

    /// Queries the table service, surfacing transport and status errors.
    pub fn try_matrix(&self, locations: &[Location]) -> Result<Vec<Vec<Option<f64>>>> {
        if locations.is_empty() {
            return Ok(Vec::new());
        }

        let body = self
            .client
            .get(self.table_url(locations))
            .send()
            .and_then(|resp| resp.error_for_status())
            .and_then(|resp| resp.json::<OsrmTableResponse>())?;

        Ok(table_to_miles(body, locations.len()))
    }
}

impl DistanceMatrixProvider for OsrmClient {
    fn matrix_for(&self, locations: &[Location]) -> Vec<Vec<Option<f64>>> {
        match self.try_matrix(locations) {
            Ok(matrix) => matrix,
            Err(err) => {
                warn!(error = %err, locations = locations.len(), "OSRM table failed; treating all pairs as unknown");
                unknown_matrix(locations.len())
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct OsrmTableResponse {
    distances: Option<Vec<Vec<Option<f64>>>>,
}

/// Converts meters to miles. Missing rows or cells stay unknown; the
/// diagonal is forced to zero.
fn table_to_miles(body: OsrmTableResponse, size: usize) -> Vec<Vec<Option<f64>>> {
    let mut matrix = unknown_matrix(size);
    let Some(rows) = body.distances else {
        return matrix;
    };

    for (i, row) in rows.into_iter().enumerate().take(size) {
        for (j, value) in row.into_iter().enumerate().take(size) {
            if i != j {
                matrix[i][j] = value.map(|meters| meters / METERS_PER_MILE);
            }
        }
    }
    matrix
}

fn unknown_matrix(size: usize) -> Vec<Vec<Option<f64>>> {
    (0..size)
        .map(|i| (0..size).map(|j| if i == j { Some(0.0) } else { None }).collect())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Coordinates;

    #[test]
    fn test_null_cells_stay_unknown() {
        let body: OsrmTableResponse =
            serde_json::from_str(r#"{"code":"Ok","distances":[[0,1609.344],[null,0]]}"#).unwrap();
        let matrix = table_to_miles(body, 2);
        assert_eq!(matrix[0][1], Some(1.0));
        assert_eq!(matrix[1][0], None);
        assert_eq!(matrix[1][1], Some(0.0));
    }

    #[test]
    fn test_missing_distances_yield_unknown_matrix() {
        let body: OsrmTableResponse = serde_json::from_str(r#"{"code":"NoTable"}"#).unwrap();
        let matrix = table_to_miles(body, 2);
        assert_eq!(matrix, vec![vec![Some(0.0), None], vec![None, Some(0.0)]]);
    }

    #[test]
    fn test_table_url_orders_lon_lat() {
        let client = OsrmClient::new(OsrmConfig {
            base_url: "http://osrm.local/".to_string(),
            ..OsrmConfig::default()
        })
        .unwrap();
        let url = client.table_url(&[Location::new("a", Coordinates::new(40.5, -73.25))]);
        assert_eq!(url, "http://osrm.local/table/v1/car/-73.250000,40.500000?annotations=distance");
    }

    #[test]
    fn test_unreachable_server_degrades_to_unknown() {
        let client = OsrmClient::new(OsrmConfig {
            base_url: "http://127.0.0.1:9".to_string(),
            timeout_secs: 1,
            ..OsrmConfig::default()
        })
        .unwrap();
        let locations = vec![
            Location::new("a", Coordinates::new(40.7, -73.9)),
            Location::new("b", Coordinates::new(40.8, -73.9)),
        ];
        let matrix = client.matrix_for(&locations);
        assert_eq!(matrix[0][1], None);
        assert_eq!(matrix[0][0], Some(0.0));
    }
}
