//! Tunable options for clustering, scheduling and the compute host.
//!
//! Every struct has a `Default` with the production values and can be
//! deserialized with missing fields falling back to those defaults.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PlannerError, Result};

/// Weights of the placement score.
///
/// `score = -distance·(d/hard)² - gap·(idle_h)^1.5 + duration·min(span,max)/60
///          - window·ln(width_h) + same_location_bonus`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreWeights {
    pub distance: f64,
    pub gap: f64,
    pub duration: f64,
    pub window: f64,
    /// Added when the shift already visits the same location.
    pub same_location_bonus: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            distance: 10.0,
            gap: 2.0,
            duration: 1.0,
            window: 0.5,
            same_location_bonus: 5.0,
        }
    }
}

/// Radius rules applied when two services sit in different boroughs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoroughRules {
    pub max_radius_across_boroughs_miles: f64,
    /// Window overlap (fraction of the narrower window) at which the
    /// cross-borough radius is relaxed.
    pub relax_overlap_fraction: f64,
    pub relaxed_radius_miles: f64,
}

impl Default for BoroughRules {
    fn default() -> Self {
        Self {
            max_radius_across_boroughs_miles: 5.0,
            relax_overlap_fraction: 0.5,
            relaxed_radius_miles: 10.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleOptions {
    pub max_points_per_shift: usize,
    /// Shifts below this size may be merged even into a shift that is
    /// already comfortably full.
    pub min_points: usize,
    pub enforce_boundaries: bool,
    pub max_shift_duration_minutes: i64,
    /// Nominal length of a freshly seeded shift.
    pub shift_duration_minutes: i64,
    pub step_minutes: i64,
    pub hard_max_radius_miles: f64,
    pub boroughs: BoroughRules,
    /// Upper bound on generated technicians (`Tech 1..N`).
    pub max_technicians: usize,
    pub average_speed_mph: f64,
    /// A shift whose span reaches this fraction of the cap counts as full
    /// during the merge pass.
    pub merge_full_fraction: f64,
    /// Candidates tried per extension round.
    pub extension_candidate_limit: usize,
    pub weights: ScoreWeights,
}

impl Default for ScheduleOptions {
    fn default() -> Self {
        Self {
            max_points_per_shift: 8,
            min_points: 1,
            enforce_boundaries: true,
            max_shift_duration_minutes: 480,
            shift_duration_minutes: 480,
            step_minutes: 15,
            hard_max_radius_miles: 25.0,
            boroughs: BoroughRules::default(),
            max_technicians: 50,
            average_speed_mph: 30.0,
            merge_full_fraction: 0.9,
            extension_candidate_limit: 25,
            weights: ScoreWeights::default(),
        }
    }
}

impl ScheduleOptions {
    pub fn validate(&self) -> Result<()> {
        if self.max_points_per_shift == 0 {
            return Err(invalid("max_points_per_shift must be at least 1"));
        }
        if self.max_shift_duration_minutes <= 0 || self.shift_duration_minutes <= 0 {
            return Err(invalid("shift durations must be positive"));
        }
        if self.step_minutes <= 0 {
            return Err(invalid("step_minutes must be positive"));
        }
        if self.hard_max_radius_miles <= 0.0 || self.average_speed_mph <= 0.0 {
            return Err(invalid("radius and speed must be positive"));
        }
        if self.boroughs.max_radius_across_boroughs_miles < 0.0
            || self.boroughs.relaxed_radius_miles < 0.0
        {
            return Err(invalid("borough radii must not be negative"));
        }
        Ok(())
    }

    /// Minutes needed to drive `miles`.
    pub fn travel_minutes(&self, miles: f64) -> f64 {
        miles / self.average_speed_mph * 60.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KMeansOptions {
    pub min_points: usize,
    pub max_points: usize,
    /// Inner Lloyd steps per attempt.
    pub max_iterations: usize,
    /// Inner steps across all attempts.
    pub max_total_iterations: usize,
    pub max_k_changes: usize,
    /// Extra restarts at the accepted k after the first valid clustering.
    pub refinement_restarts: usize,
    pub tolerance: f64,
    pub seed: Option<u64>,
}

impl Default for KMeansOptions {
    fn default() -> Self {
        Self {
            min_points: 1,
            max_points: 10,
            max_iterations: 100,
            max_total_iterations: 50_000,
            max_k_changes: 20_000,
            refinement_restarts: 5,
            tolerance: 1e-6,
            seed: None,
        }
    }
}

impl KMeansOptions {
    pub fn new(min_points: usize, max_points: usize) -> Self {
        Self {
            min_points,
            max_points,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_points == 0 {
            return Err(invalid("k-means max_points must be at least 1"));
        }
        if self.min_points > self.max_points {
            return Err(invalid("k-means min_points exceeds max_points"));
        }
        if self.max_iterations == 0 {
            return Err(invalid("k-means max_iterations must be at least 1"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DbscanOptions {
    pub min_points: usize,
    pub max_points: usize,
    pub cluster_unclustered: bool,
    /// Optional neighborhood radius on top of the matrix's known pairs.
    pub eps_miles: Option<f64>,
}

impl Default for DbscanOptions {
    fn default() -> Self {
        Self {
            min_points: 2,
            max_points: 10,
            cluster_unclustered: false,
            eps_miles: None,
        }
    }
}

impl DbscanOptions {
    pub fn new(min_points: usize, max_points: usize) -> Self {
        Self {
            min_points,
            max_points,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_points == 0 {
            return Err(invalid("DBSCAN max_points must be at least 1"));
        }
        if self.min_points > self.max_points {
            return Err(invalid("DBSCAN min_points exceeds max_points"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComputeConfig {
    pub workers: usize,
    pub timeout_ms: u64,
}

impl Default for ComputeConfig {
    fn default() -> Self {
        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(2)
            .max(2);
        Self {
            workers,
            timeout_ms: 10_000,
        }
    }
}

impl ComputeConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(invalid("compute host needs at least one worker"));
        }
        if self.timeout_ms == 0 {
            return Err(invalid("timeout_ms must be positive"));
        }
        Ok(())
    }
}

fn invalid(message: &str) -> PlannerError {
    PlannerError::InvalidConfig(message.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_options_fall_back_to_defaults() {
        let options: ScheduleOptions =
            serde_json::from_str(r#"{"max_points_per_shift": 3, "boroughs": {"relaxed_radius_miles": 7.5}}"#)
                .unwrap();
        assert_eq!(options.max_points_per_shift, 3);
        assert_eq!(options.max_shift_duration_minutes, 480);
        assert_eq!(options.boroughs.relaxed_radius_miles, 7.5);
        assert_eq!(options.boroughs.max_radius_across_boroughs_miles, 5.0);
    }

    #[test]
    fn test_validate_rejects_zero_cap() {
        let options = ScheduleOptions {
            max_points_per_shift: 0,
            ..ScheduleOptions::default()
        };
        assert!(matches!(options.validate(), Err(PlannerError::InvalidConfig(_))));
    }

    #[test]
    fn test_kmeans_bounds_must_be_ordered() {
        assert!(KMeansOptions::new(5, 3).validate().is_err());
        assert!(KMeansOptions::new(2, 3).validate().is_ok());
    }

    #[test]
    fn test_travel_minutes() {
        let options = ScheduleOptions::default();
        assert!((options.travel_minutes(15.0) - 30.0).abs() < 1e-9);
    }
}
