//! End-to-end pipeline: prepare, cluster, schedule, aggregate.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::aggregate::{ClusterSummary, aggregate};
use crate::compute::{ComputeHandle, ComputeHost};
use crate::config::{DbscanOptions, KMeansOptions, ScheduleOptions};
use crate::context::RunContext;
use crate::dbscan::cluster_dbscan;
use crate::error::{PlannerError, Result};
use crate::kmeans::cluster_kmeans;
use crate::matrix::DistanceMatrix;
use crate::model::{Location, RawService, ScheduleResult, Service, UnscheduledReason, UnscheduledService};
use crate::prepare::prepare_services;
use crate::scheduler::{ScheduleOutcome, ShiftScheduler};
use crate::traits::{BoroughClassifier, DistanceMatrixProvider};

/// Share of the progress bar given to clustering when it runs.
const CLUSTERING_BAND: f64 = 0.3;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "options", rename_all = "snake_case")]
pub enum ClusteringMode {
    /// Schedule every service as one group.
    #[default]
    None,
    #[serde(rename = "kmeans")]
    KMeans(KMeansOptions),
    Dbscan(DbscanOptions),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanOptions {
    pub clustering: ClusteringMode,
    pub schedule: ScheduleOptions,
}

#[derive(Clone)]
pub struct Planner {
    distances: Arc<dyn DistanceMatrixProvider>,
    boroughs: Arc<dyn BoroughClassifier>,
}

impl Planner {
    pub fn new(distances: Arc<dyn DistanceMatrixProvider>, boroughs: Arc<dyn BoroughClassifier>) -> Self {
        Self { distances, boroughs }
    }

    #[instrument(skip_all, fields(services = raw.len()))]
    pub fn plan(&self, raw: &[RawService], options: &PlanOptions, ctx: &RunContext) -> Result<ScheduleResult> {
        if raw.is_empty() {
            return Err(PlannerError::InvalidRequest("no services to plan".to_string()));
        }
        let started = Instant::now();

        let prepared = prepare_services(raw);
        ctx.checkpoint()?;

        let locations: Vec<Location> = prepared.valid.iter().map(Service::location).collect();
        let matrix = DistanceMatrix::from_matrix_provider(&locations, self.distances.as_ref());
        ctx.checkpoint()?;

        let (groups, summary, schedule_ctx) = match &options.clustering {
            ClusteringMode::None => {
                let everything = (0..prepared.valid.len()).collect();
                (vec![(None, everything)], None, ctx.clone())
            }
            ClusteringMode::KMeans(kmeans) => {
                let result = cluster_kmeans(&prepared.valid, kmeans, &ctx.scoped(0.0, CLUSTERING_BAND))?;
                let sizes = result.cluster_sizes();
                let summary = ClusterSummary {
                    noise: 0,
                    max_iterations_reached: result.max_iterations_reached,
                    sizes,
                };
                let groups = groups_from_labels(&result.clusters, summary.sizes.len());
                (groups, Some(summary), ctx.scoped(CLUSTERING_BAND, 1.0))
            }
            ClusteringMode::Dbscan(dbscan) => {
                let result = cluster_dbscan(&prepared.valid, &matrix, dbscan, &ctx.scoped(0.0, CLUSTERING_BAND))?;
                let summary = ClusterSummary {
                    sizes: result.cluster_sizes(),
                    noise: result.noise.len(),
                    max_iterations_reached: false,
                };
                let groups = groups_from_labels(&result.clusters, result.cluster_count);
                (groups, Some(summary), ctx.scoped(CLUSTERING_BAND, 1.0))
            }
        };

        let mut scheduler = ShiftScheduler::new(
            &prepared.valid,
            &matrix,
            self.boroughs.as_ref(),
            &options.schedule,
            &schedule_ctx,
        )?;
        for (cluster, members) in &groups {
            scheduler.schedule_group(members, *cluster)?;
        }
        let outcome = scheduler.finish();
        ctx.report(1.0);

        let result = aggregate(&outcome, &prepared.invalid, summary.as_ref(), started.elapsed());
        info!(
            scheduled = result.scheduled_services.len(),
            unscheduled = result.unscheduled_services.len(),
            invalid = result.invalid_services.len(),
            shifts = result.shifts.len(),
            elapsed_ms = result.metrics.performance_duration_ms,
            "plan complete"
        );
        Ok(result)
    }

    /// Runs [`Planner::plan`] on `host` under `key`. On timeout or failure
    /// the handle yields [`degraded_result`] for the same input.
    pub fn submit(
        &self,
        host: &ComputeHost,
        key: impl Into<String>,
        raw: Vec<RawService>,
        options: PlanOptions,
    ) -> ComputeHandle<ScheduleResult> {
        let planner = self.clone();
        let fallback_input = raw.clone();
        host.submit(
            key,
            move |ctx: &RunContext| planner.plan(&raw, &options, ctx),
            move || degraded_result(&fallback_input),
        )
    }
}

/// Result used when planning could not finish: every valid service is
/// unscheduled with [`UnscheduledReason::ComputeAborted`] and invalid
/// services keep their reasons.
pub fn degraded_result(raw: &[RawService]) -> ScheduleResult {
    let prepared = prepare_services(raw);
    let outcome = ScheduleOutcome {
        shifts: Vec::new(),
        unscheduled: prepared
            .valid
            .into_iter()
            .map(|service| UnscheduledService::new(service, UnscheduledReason::ComputeAborted))
            .collect(),
        enforced_conflicts: 0,
    };
    aggregate(&outcome, &prepared.invalid, None, Duration::ZERO)
}

/// One group per cluster label in label order, then the outliers.
fn groups_from_labels(labels: &[i32], clusters: usize) -> Vec<(Option<usize>, Vec<usize>)> {
    let mut groups: Vec<(Option<usize>, Vec<usize>)> = (0..clusters).map(|c| (Some(c), Vec::new())).collect();
    let mut outliers = Vec::new();
    for (i, &label) in labels.iter().enumerate() {
        match usize::try_from(label).ok().filter(|&c| c < clusters) {
            Some(c) => groups[c].1.push(i),
            None => outliers.push(i),
        }
    }
    groups.push((None, outliers));
    groups.retain(|(_, members)| !members.is_empty());
    groups
}
