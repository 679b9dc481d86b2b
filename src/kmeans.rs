//! Adaptive k-means with cardinality bounds.
//!
//! `k` starts at `ceil(n / max_points)` and moves up when a cluster is too
//! large and down when one is too small. Lloyd iterations use Euclidean
//! distance on (lat, lon), which is adequate at city scale. Two budgets
//! (`max_total_iterations`, `max_k_changes`) bound the search; running out
//! is reported through `max_iterations_reached`.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::KMeansOptions;
use crate::context::RunContext;
use crate::error::Result;
use crate::model::Coordinates;
use crate::traits::Located;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KMeansResult {
    /// Cluster label per input point, dense from 0; `-1` when unclaimed.
    pub clusters: Vec<i32>,
    pub centroids: Vec<Coordinates>,
    pub k: usize,
    pub cost: f64,
    pub max_iterations_reached: bool,
    pub k_change_count: usize,
    pub total_iterations: usize,
}

impl KMeansResult {
    pub fn cluster_sizes(&self) -> Vec<usize> {
        let mut sizes = vec![0; self.centroids.len()];
        for &label in &self.clusters {
            if label >= 0 {
                sizes[label as usize] += 1;
            }
        }
        sizes
    }
}

/// One Lloyd run.
#[derive(Debug, Clone)]
struct Attempt {
    assignment: Vec<usize>,
    centroids: Vec<(f64, f64)>,
    cost: f64,
}

impl Attempt {
    fn sizes(&self) -> Vec<usize> {
        let mut sizes = vec![0; self.centroids.len()];
        for &cluster in &self.assignment {
            sizes[cluster] += 1;
        }
        sizes
    }
}

/// Clusters `points`, seeding the random source from `options.seed`.
pub fn cluster_kmeans<P: Located>(points: &[P], options: &KMeansOptions, ctx: &RunContext) -> Result<KMeansResult> {
    let mut rng = match options.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };
    cluster_kmeans_with_rng(points, options, &mut rng, ctx)
}

/// Clusters `points` with an injected random source.
pub fn cluster_kmeans_with_rng<P, R>(
    points: &[P],
    options: &KMeansOptions,
    rng: &mut R,
    ctx: &RunContext,
) -> Result<KMeansResult>
where
    P: Located,
    R: Rng,
{
    options.validate()?;

    let coords: Vec<(f64, f64)> = points
        .iter()
        .map(|p| {
            let c = p.coordinates();
            (c.lat, c.lon)
        })
        .collect();
    let n = coords.len();
    if n == 0 {
        return Ok(KMeansResult {
            clusters: Vec::new(),
            centroids: Vec::new(),
            k: 0,
            cost: 0.0,
            max_iterations_reached: false,
            k_change_count: 0,
            total_iterations: 0,
        });
    }

    let mut k = n.div_ceil(options.max_points).clamp(1, n);
    let mut k_changes = 0usize;
    let mut total_iterations = 0usize;
    let mut best: Option<Attempt> = None;
    let mut last: Option<Attempt> = None;
    let mut refinements_left: Option<usize> = None;
    let mut exhausted = false;

    loop {
        if total_iterations >= options.max_total_iterations || k_changes >= options.max_k_changes {
            exhausted = true;
            break;
        }
        ctx.checkpoint()?;
        ctx.report(total_iterations as f64 / options.max_total_iterations as f64);

        let attempt = lloyd(&coords, k, options, rng, &mut total_iterations, ctx)?;
        let sizes = attempt.sizes();
        let too_big = sizes.iter().any(|&size| size > options.max_points);
        let too_small = sizes.iter().any(|&size| size > 0 && size < options.min_points);
        last = Some(attempt.clone());

        // While refining, only same-k restarts are tried.
        if let Some(left) = refinements_left {
            if !too_big && !too_small && best.as_ref().is_none_or(|b| attempt.cost < b.cost) {
                best = Some(attempt);
            }
            if left == 0 {
                break;
            }
            refinements_left = Some(left - 1);
            continue;
        }

        // Fewer points than min_points: no k can satisfy the minimum.
        let unfixable = !too_big && too_small && k == 1;

        if (too_big || too_small) && !unfixable {
            let grow = match (too_big && k < n, too_small && k > 1) {
                (true, true) => rng.random_bool(0.5),
                (true, false) => true,
                (false, true) => false,
                // Stuck at a bound: step the other way.
                (false, false) => k == 1,
            };
            k = if grow { (k + 1).min(n) } else { k.saturating_sub(1).max(1) };
            k_changes += 1;
            debug!(k, k_changes, too_big, too_small, "k-means adjusting k");
            continue;
        }

        if best.as_ref().is_none_or(|b| attempt.cost < b.cost) {
            best = Some(attempt);
        }
        if options.refinement_restarts == 0 {
            break;
        }
        refinements_left = Some(options.refinement_restarts - 1);
    }

    let chosen = match best.or(last) {
        Some(attempt) => attempt,
        None => {
            // Budget was already spent before the first attempt.
            let mut fallback_iterations = 0;
            lloyd(&coords, k, options, rng, &mut fallback_iterations, ctx)?
        }
    };

    if exhausted {
        warn!(
            total_iterations,
            k_changes, "k-means budget exhausted; returning best clustering found"
        );
    }

    let result = finalize(chosen, exhausted, k_changes, total_iterations, n);
    info!(
        points = n,
        k = result.k,
        cost = result.cost,
        max_iterations_reached = result.max_iterations_reached,
        "k-means finished"
    );
    ctx.report(1.0);
    Ok(result)
}

fn lloyd<R: Rng>(
    coords: &[(f64, f64)],
    k: usize,
    options: &KMeansOptions,
    rng: &mut R,
    total_iterations: &mut usize,
    ctx: &RunContext,
) -> Result<Attempt> {
    let n = coords.len();
    let mut centroids = initial_centroids(coords, k, rng);
    let mut assignment = vec![0usize; n];
    let mut previous_cost = f64::INFINITY;
    let mut cost = f64::INFINITY;

    for _ in 0..options.max_iterations {
        ctx.checkpoint()?;
        *total_iterations += 1;

        cost = 0.0;
        for (i, point) in coords.iter().enumerate() {
            let (nearest, dist) = nearest_centroid(*point, &centroids);
            assignment[i] = nearest;
            cost += dist;
        }

        let mut sums = vec![(0.0, 0.0, 0usize); k];
        for (i, point) in coords.iter().enumerate() {
            let entry = &mut sums[assignment[i]];
            entry.0 += point.0;
            entry.1 += point.1;
            entry.2 += 1;
        }
        for (cluster, (lat_sum, lon_sum, count)) in sums.into_iter().enumerate() {
            centroids[cluster] = if count == 0 {
                coords[rng.random_range(0..n)]
            } else {
                (lat_sum / count as f64, lon_sum / count as f64)
            };
        }

        if (previous_cost - cost).abs() < options.tolerance || *total_iterations >= options.max_total_iterations {
            break;
        }
        previous_cost = cost;
    }

    // Final assignment against the last centroids keeps cost and labels in sync.
    cost = if cost.is_finite() {
        let mut final_cost = 0.0;
        for (i, point) in coords.iter().enumerate() {
            let (nearest, dist) = nearest_centroid(*point, &centroids);
            assignment[i] = nearest;
            final_cost += dist;
        }
        final_cost
    } else {
        cost
    };

    Ok(Attempt {
        assignment,
        centroids,
        cost,
    })
}

/// Forgy initialization: `k` distinct random points.
fn initial_centroids<R: Rng>(coords: &[(f64, f64)], k: usize, rng: &mut R) -> Vec<(f64, f64)> {
    let mut indices: Vec<usize> = (0..coords.len()).collect();
    for i in 0..k.min(indices.len()) {
        let j = rng.random_range(i..indices.len());
        indices.swap(i, j);
    }
    indices.iter().take(k).map(|&i| coords[i]).collect()
}

fn nearest_centroid(point: (f64, f64), centroids: &[(f64, f64)]) -> (usize, f64) {
    let mut best = (0, f64::INFINITY);
    for (index, centroid) in centroids.iter().enumerate() {
        let d = (point.0 - centroid.0).powi(2) + (point.1 - centroid.1).powi(2);
        if d < best.1 {
            best = (index, d);
        }
    }
    best
}

/// Drops empty clusters and renumbers labels densely from 0.
fn finalize(attempt: Attempt, exhausted: bool, k_changes: usize, total_iterations: usize, n: usize) -> KMeansResult {
    let sizes = attempt.sizes();
    let mut remap = vec![-1i32; sizes.len()];
    let mut centroids = Vec::new();
    for (cluster, &size) in sizes.iter().enumerate() {
        if size > 0 {
            remap[cluster] = centroids.len() as i32;
            let (lat, lon) = attempt.centroids[cluster];
            centroids.push(Coordinates::new(lat, lon));
        }
    }

    let clusters = (0..n)
        .map(|i| attempt.assignment.get(i).map_or(-1, |&cluster| remap[cluster]))
        .collect();

    KMeansResult {
        clusters,
        k: centroids.len(),
        centroids,
        cost: attempt.cost,
        max_iterations_reached: exhausted,
        k_change_count: k_changes,
        total_iterations,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::CancelToken;
    use crate::error::PlannerError;
    use crate::model::Location;

    fn grid(groups: &[(f64, f64)], per_group: usize) -> Vec<Location> {
        let mut points = Vec::new();
        for (g, (lat, lon)) in groups.iter().enumerate() {
            for i in 0..per_group {
                let offset = i as f64 * 0.001;
                points.push(Location::new(format!("g{}-{}", g, i), Coordinates::new(lat + offset, lon - offset)));
            }
        }
        points
    }

    fn seeded(min: usize, max: usize) -> KMeansOptions {
        KMeansOptions {
            seed: Some(7),
            ..KMeansOptions::new(min, max)
        }
    }

    #[test]
    fn test_empty_input() {
        let points: Vec<Location> = Vec::new();
        let result = cluster_kmeans(&points, &seeded(1, 3), &RunContext::detached()).unwrap();
        assert_eq!(result.k, 0);
        assert!(result.clusters.is_empty());
    }

    #[test]
    fn test_well_separated_groups_respect_bounds() {
        let points = grid(&[(40.70, -73.90), (40.90, -73.70), (40.50, -74.10)], 4);
        let result = cluster_kmeans(&points, &seeded(2, 4), &RunContext::detached()).unwrap();

        assert!(!result.max_iterations_reached);
        for size in result.cluster_sizes() {
            assert!((2..=4).contains(&size), "size {} out of bounds", size);
        }
        assert!(result.clusters.iter().all(|&label| label >= 0 && (label as usize) < result.k));
    }

    #[test]
    fn test_same_seed_is_deterministic() {
        let points = grid(&[(40.70, -73.90), (40.90, -73.70)], 5);
        let a = cluster_kmeans(&points, &seeded(1, 5), &RunContext::detached()).unwrap();
        let b = cluster_kmeans(&points, &seeded(1, 5), &RunContext::detached()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_exhausted_budget_is_flagged() {
        // Five identical points can never be split into clusters of at most two
        // with a minimum of two, so k keeps moving until the budget runs out.
        let points: Vec<Location> = (0..5)
            .map(|i| Location::new(format!("p{}", i), Coordinates::new(40.7, -73.9)))
            .collect();
        let options = KMeansOptions {
            max_total_iterations: 200,
            max_k_changes: 50,
            ..seeded(2, 2)
        };
        let result = cluster_kmeans(&points, &options, &RunContext::detached()).unwrap();
        assert!(result.max_iterations_reached);
        assert_eq!(result.clusters.len(), 5);
        assert!(result.k_change_count <= 50);
    }

    #[test]
    fn test_fewer_points_than_minimum_returns_single_cluster() {
        let points = grid(&[(40.70, -73.90)], 2);
        let result = cluster_kmeans(&points, &seeded(5, 10), &RunContext::detached()).unwrap();
        assert!(!result.max_iterations_reached);
        assert_eq!(result.k, 1);
        assert_eq!(result.clusters, vec![0, 0]);
    }

    #[test]
    fn test_cancelled_context_stops() {
        let token = CancelToken::new();
        token.cancel();
        let points = grid(&[(40.70, -73.90)], 3);
        let result = cluster_kmeans(&points, &seeded(1, 2), &RunContext::with_token(token));
        assert!(matches!(result, Err(PlannerError::Cancelled(_))));
    }
}
