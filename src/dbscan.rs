//! Bounded DBSCAN over a distance matrix.
//!
//! Density is defined by the matrix itself: a point's neighbors are the
//! points it has a known distance to (optionally within `eps_miles`),
//! nearest first, truncated to `max_points - 1`. Expansion stops once a
//! cluster holds `max_points` members.

use std::collections::VecDeque;

use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info};

use crate::config::DbscanOptions;
use crate::context::RunContext;
use crate::error::Result;
use crate::matrix::DistanceMatrix;
use crate::traits::Located;

const UNVISITED: i32 = -2;
const NOISE: i32 = -1;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DbscanResult {
    /// Cluster label per input point in discovery order; `-1` for noise.
    pub clusters: Vec<i32>,
    /// Points still unclustered after the optional reassignment pass.
    pub noise: Vec<usize>,
    /// Points that were noise before reassignment.
    pub initial_noise: Vec<usize>,
    pub was_noise: Vec<bool>,
    pub cluster_count: usize,
}

impl DbscanResult {
    pub fn cluster_sizes(&self) -> Vec<usize> {
        let mut sizes = vec![0; self.cluster_count];
        for &label in &self.clusters {
            if label >= 0 {
                sizes[label as usize] += 1;
            }
        }
        sizes
    }
}

pub fn cluster_dbscan<P: Located + Sync>(
    points: &[P],
    matrix: &DistanceMatrix,
    options: &DbscanOptions,
    ctx: &RunContext,
) -> Result<DbscanResult> {
    options.validate()?;

    let n = points.len();
    let neighbors = neighbor_lists(points, matrix, options);
    let core_threshold = options.min_points.saturating_sub(1);

    let mut labels = vec![UNVISITED; n];
    let mut sizes: Vec<usize> = Vec::new();

    for p in 0..n {
        if labels[p] != UNVISITED {
            continue;
        }
        ctx.checkpoint()?;
        ctx.report_band(0.0, 0.9, p, n);

        if neighbors[p].len() < core_threshold {
            labels[p] = NOISE;
            continue;
        }

        let cluster = sizes.len() as i32;
        labels[p] = cluster;
        let mut size = 1usize;
        let mut queue: VecDeque<usize> = neighbors[p].iter().map(|&(q, _)| q).collect();

        while let Some(q) = queue.pop_front() {
            if size >= options.max_points {
                break;
            }
            match labels[q] {
                NOISE => {
                    // Border point: joins but does not expand.
                    labels[q] = cluster;
                    size += 1;
                }
                UNVISITED => {
                    labels[q] = cluster;
                    size += 1;
                    if neighbors[q].len() >= core_threshold {
                        queue.extend(neighbors[q].iter().map(|&(r, _)| r));
                    }
                }
                _ => {}
            }
        }

        sizes.push(size);
        debug!(cluster, size, seed = p, "DBSCAN cluster formed");
    }

    let was_noise: Vec<bool> = labels.iter().map(|&label| label == NOISE).collect();
    let initial_noise: Vec<usize> = (0..n).filter(|&i| was_noise[i]).collect();

    if options.cluster_unclustered {
        ctx.checkpoint()?;
        reassign_noise(&mut labels, &mut sizes, &neighbors);
    }

    let noise: Vec<usize> = (0..n).filter(|&i| labels[i] < 0).collect();
    let clusters = labels.into_iter().map(|label| label.max(NOISE)).collect();

    info!(
        points = n,
        clusters = sizes.len(),
        initial_noise = initial_noise.len(),
        noise = noise.len(),
        "DBSCAN finished"
    );
    ctx.report(1.0);

    Ok(DbscanResult {
        clusters,
        noise,
        initial_noise,
        was_noise,
        cluster_count: sizes.len(),
    })
}

/// Known-distance neighbors per point, nearest first, at most
/// `max_points - 1` each.
fn neighbor_lists<P: Located + Sync>(
    points: &[P],
    matrix: &DistanceMatrix,
    options: &DbscanOptions,
) -> Vec<Vec<(usize, f64)>> {
    let slots: Vec<Option<usize>> = points.iter().map(|p| matrix.index_of(p.location_id())).collect();
    let limit = options.max_points.saturating_sub(1);

    (0..points.len())
        .into_par_iter()
        .map(|i| {
            let mut found: Vec<(usize, f64)> = (0..points.len())
                .filter(|&j| j != i)
                .filter_map(|j| {
                    let same_place = points[i].location_id() == points[j].location_id();
                    let distance = if same_place {
                        0.0
                    } else {
                        matrix.get_index(slots[i]?, slots[j]?)?
                    };
                    let within = options.eps_miles.is_none_or(|eps| distance <= eps);
                    within.then_some((j, distance))
                })
                .collect();
            found.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
            found.truncate(limit);
            found
        })
        .collect()
}

/// Moves each noise point into the cluster of its nearest clustered
/// neighbor. The size cap is not applied here; `was_noise` records the move.
fn reassign_noise(labels: &mut [i32], sizes: &mut [usize], neighbors: &[Vec<(usize, f64)>]) {
    let noise: Vec<usize> = (0..labels.len()).filter(|&i| labels[i] == NOISE).collect();
    for point in noise {
        let target = neighbors[point]
            .iter()
            .find_map(|&(q, _)| (labels[q] >= 0).then_some(labels[q]));
        if let Some(cluster) = target {
            labels[point] = cluster;
            sizes[cluster as usize] += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Coordinates, Location};

    fn points(ids: &[&str]) -> Vec<Location> {
        ids.iter()
            .map(|id| Location::new(*id, Coordinates::new(40.7, -73.9)))
            .collect()
    }

    fn chain_matrix() -> DistanceMatrix {
        let mut matrix = DistanceMatrix::unknown(["a", "b", "c", "d", "e"]);
        matrix.insert("a", "b", Some(1.0));
        matrix.insert("a", "c", Some(1.5));
        matrix.insert("b", "c", Some(1.0));
        matrix.insert("d", "e", Some(0.5));
        matrix
    }

    #[test]
    fn test_clusters_in_discovery_order() {
        let pts = points(&["a", "b", "c", "d", "e"]);
        let result =
            cluster_dbscan(&pts, &chain_matrix(), &DbscanOptions::new(2, 5), &RunContext::detached()).unwrap();
        assert_eq!(result.clusters, vec![0, 0, 0, 1, 1]);
        assert!(result.noise.is_empty());
    }

    #[test]
    fn test_cluster_size_is_capped() {
        let pts = points(&["a", "b", "c"]);
        let result =
            cluster_dbscan(&pts, &chain_matrix(), &DbscanOptions::new(2, 2), &RunContext::detached()).unwrap();
        assert_eq!(result.cluster_sizes().iter().max(), Some(&2));
        assert!(result.cluster_sizes().iter().all(|&size| size <= 2));
    }

    #[test]
    fn test_isolated_point_is_noise_not_panic() {
        let pts = points(&["a", "b", "c", "lonely"]);
        let mut matrix = chain_matrix();
        matrix.insert("lonely", "a", None);
        let result = cluster_dbscan(&pts, &matrix, &DbscanOptions::new(2, 5), &RunContext::detached()).unwrap();
        assert_eq!(result.clusters[3], -1);
        assert_eq!(result.initial_noise, vec![3]);
        assert!(result.was_noise[3]);
    }

    fn triangle_with_straggler() -> DistanceMatrix {
        // a, b, c are mutually close; x only knows c and is cut from c's
        // truncated neighbor list once max_points is 3.
        let mut matrix = DistanceMatrix::unknown(["a", "b", "c", "x"]);
        matrix.insert("a", "b", Some(1.0));
        matrix.insert("a", "c", Some(1.0));
        matrix.insert("b", "c", Some(1.0));
        matrix.insert("x", "c", Some(5.0));
        matrix
    }

    #[test]
    fn test_straggler_stays_noise_by_default() {
        let pts = points(&["a", "b", "c", "x"]);
        let result = cluster_dbscan(
            &pts,
            &triangle_with_straggler(),
            &DbscanOptions::new(3, 3),
            &RunContext::detached(),
        )
        .unwrap();
        assert_eq!(result.clusters, vec![0, 0, 0, -1]);
        assert_eq!(result.noise, vec![3]);
    }

    #[test]
    fn test_noise_reassignment_joins_nearest_cluster() {
        let pts = points(&["a", "b", "c", "x"]);
        let options = DbscanOptions {
            cluster_unclustered: true,
            ..DbscanOptions::new(3, 3)
        };
        let result = cluster_dbscan(&pts, &triangle_with_straggler(), &options, &RunContext::detached()).unwrap();
        assert_eq!(result.clusters, vec![0, 0, 0, 0]);
        assert!(result.noise.is_empty());
        assert_eq!(result.initial_noise, vec![3]);
        assert_eq!(result.was_noise, vec![false, false, false, true]);
    }

    #[test]
    fn test_eps_limits_neighbors() {
        let pts = points(&["a", "b", "c", "x"]);
        let options = DbscanOptions {
            cluster_unclustered: true,
            eps_miles: Some(2.0),
            ..DbscanOptions::new(3, 5)
        };
        let result = cluster_dbscan(&pts, &triangle_with_straggler(), &options, &RunContext::detached()).unwrap();
        // x has no neighbor within eps, so reassignment has nothing to join.
        assert_eq!(result.clusters[3], -1);
    }
}
