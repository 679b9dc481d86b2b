//! Flattening of shifts into the result set plus summary metrics.

use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::model::{InvalidService, ScheduleMetrics, ScheduleResult, ScheduledService, Shift};
use crate::scheduler::ScheduleOutcome;

/// What the spatial clusterer reported, for the metrics block.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSummary {
    pub sizes: Vec<usize>,
    /// Services the clusterer left as noise.
    pub noise: usize,
    pub max_iterations_reached: bool,
}

/// Builds the final result. Pure: the same arguments always produce the
/// same result, and feeding a result's shifts back in reproduces it.
pub fn aggregate(
    outcome: &ScheduleOutcome,
    invalid: &[InvalidService],
    clustering: Option<&ClusterSummary>,
    elapsed: Duration,
) -> ScheduleResult {
    let mut shifts: Vec<Shift> = Vec::with_capacity(outcome.shifts.len());
    let mut scheduled: Vec<ScheduledService> = Vec::new();

    for (id, shift) in outcome.shifts.iter().filter(|s| !s.services.is_empty()).enumerate() {
        let mut services = shift.services.clone();
        services.sort_by_key(|s| s.start);
        for (sequence, service) in services.iter_mut().enumerate() {
            service.shift_id = id;
            service.tech_id = shift.tech_id.clone();
            service.cluster = shift.cluster;
            service.sequence = sequence;
        }

        let shift_start = services.iter().map(|s| s.start).min().unwrap_or(shift.shift_start);
        let shift_end = services.iter().map(|s| s.end).max().unwrap_or(shift.shift_end);
        scheduled.extend(services.iter().cloned());
        shifts.push(Shift {
            id,
            tech_id: shift.tech_id.clone(),
            cluster: shift.cluster,
            services,
            shift_start,
            shift_end,
        });
    }

    let technician_count = shifts.iter().map(|s| s.tech_id.as_str()).collect::<HashSet<_>>().len();
    let unscheduled_count = outcome.unscheduled.len();

    let (total_clusters, cluster_sizes, connected_points_count, outlier_count, max_iterations_reached) =
        match clustering {
            Some(summary) => (
                summary.sizes.len(),
                summary.sizes.clone(),
                summary.sizes.iter().sum(),
                summary.noise + unscheduled_count,
                summary.max_iterations_reached,
            ),
            None => (
                shifts.len(),
                shifts.iter().map(|s| s.services.len()).collect(),
                scheduled.len(),
                unscheduled_count,
                false,
            ),
        };

    let metrics = ScheduleMetrics {
        total_clusters,
        total_shifts: shifts.len(),
        cluster_sizes,
        connected_points_count,
        outlier_count,
        unscheduled_count,
        invalid_count: invalid.len(),
        technician_count,
        performance_duration_ms: elapsed.as_micros() as f64 / 1000.0,
        max_iterations_reached,
        enforced_conflicts: outcome.enforced_conflicts,
    };

    ScheduleResult {
        scheduled_services: scheduled,
        unscheduled_services: outcome.unscheduled.clone(),
        invalid_services: invalid.to_vec(),
        shifts,
        metrics,
    }
}
