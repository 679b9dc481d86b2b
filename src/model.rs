//! Domain records for a scheduling run.

use std::fmt;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinates {
    pub const fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }
}

/// A distinct place services happen at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub id: String,
    pub coordinates: Coordinates,
}

impl Location {
    pub fn new(id: impl Into<String>, coordinates: Coordinates) -> Self {
        Self {
            id: id.into(),
            coordinates,
        }
    }
}

/// Allowed range for a service's start time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub earliest: NaiveDateTime,
    pub latest: NaiveDateTime,
}

impl TimeWindow {
    /// Returns `None` when `earliest > latest`.
    pub fn new(earliest: NaiveDateTime, latest: NaiveDateTime) -> Option<Self> {
        (earliest <= latest).then_some(Self { earliest, latest })
    }

    pub fn width_minutes(&self) -> i64 {
        (self.latest - self.earliest).num_minutes()
    }

    /// Signed overlap in minutes; negative values are the gap between windows.
    pub fn overlap_minutes(&self, other: &TimeWindow) -> i64 {
        let start = self.earliest.max(other.earliest);
        let end = self.latest.min(other.latest);
        (end - start).num_minutes()
    }

    pub fn contains(&self, at: NaiveDateTime) -> bool {
        self.earliest <= at && at <= self.latest
    }

    pub fn clamp(&self, at: NaiveDateTime) -> NaiveDateTime {
        at.clamp(self.earliest, self.latest)
    }
}

/// Service record as received from the outer layer, before validation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawService {
    pub id: String,
    pub location_id: String,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub time_window_start: Option<String>,
    pub time_window_end: Option<String>,
    pub preferred_time: Option<String>,
    pub duration_minutes: i64,
    pub tech_code: Option<String>,
    pub enforced: bool,
    pub borough: Option<String>,
}

/// A validated service ready for clustering and scheduling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    pub id: String,
    pub location_id: String,
    pub coordinates: Coordinates,
    pub time_window: TimeWindow,
    pub preferred_time: NaiveDateTime,
    pub duration_minutes: i64,
    pub tech_code: Option<String>,
    pub enforced: bool,
    pub borough: Option<String>,
}

impl Service {
    pub fn day(&self) -> NaiveDate {
        self.time_window.earliest.date()
    }

    pub fn location(&self) -> Location {
        Location::new(self.location_id.clone(), self.coordinates)
    }
}

impl crate::traits::Located for Service {
    fn location_id(&self) -> &str {
        &self.location_id
    }

    fn coordinates(&self) -> Coordinates {
        self.coordinates
    }
}

/// A service with a concrete slot inside a shift.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledService {
    #[serde(flatten)]
    pub service: Service,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub shift_id: usize,
    pub tech_id: String,
    pub cluster: Option<usize>,
    /// Position within the shift, starting at 0.
    pub sequence: usize,
    pub distance_from_previous: Option<f64>,
    pub travel_minutes_from_previous: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Shift {
    pub id: usize,
    pub tech_id: String,
    pub cluster: Option<usize>,
    pub services: Vec<ScheduledService>,
    pub shift_start: NaiveDateTime,
    pub shift_end: NaiveDateTime,
}

impl Shift {
    pub fn duration_minutes(&self) -> i64 {
        (self.shift_end - self.shift_start).num_minutes()
    }
}

/// Why a raw service never entered scheduling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidReason {
    InvalidTimeRange,
    MissingCoordinates,
    InvalidDuration,
    MissingTechCode,
}

impl fmt::Display for InvalidReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            InvalidReason::InvalidTimeRange => "Invalid time range",
            InvalidReason::MissingCoordinates => "Missing coordinates",
            InvalidReason::InvalidDuration => "Invalid duration",
            InvalidReason::MissingTechCode => "Enforced service without tech code",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidService {
    pub service: RawService,
    pub kind: InvalidReason,
    pub reason: String,
}

impl InvalidService {
    pub fn new(service: RawService, kind: InvalidReason) -> Self {
        Self {
            service,
            kind,
            reason: kind.to_string(),
        }
    }
}

/// Why a valid service could not be placed in any shift.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnscheduledReason {
    TechnicianCapReached,
    ExceedsShiftDuration,
    EnforcedConflict,
    ComputeAborted,
}

impl fmt::Display for UnscheduledReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            UnscheduledReason::TechnicianCapReached => {
                "No shift or technician available within the configured cap"
            }
            UnscheduledReason::ExceedsShiftDuration => "Service is longer than the maximum shift",
            UnscheduledReason::EnforcedConflict => {
                "Pinned technician is already busy at the preferred time"
            }
            UnscheduledReason::ComputeAborted => "Scheduling did not complete",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnscheduledService {
    #[serde(flatten)]
    pub service: Service,
    pub kind: UnscheduledReason,
    pub reason: String,
}

impl UnscheduledService {
    pub fn new(service: Service, kind: UnscheduledReason) -> Self {
        Self {
            service,
            kind,
            reason: kind.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleMetrics {
    pub total_clusters: usize,
    pub total_shifts: usize,
    pub cluster_sizes: Vec<usize>,
    pub connected_points_count: usize,
    pub outlier_count: usize,
    pub unscheduled_count: usize,
    pub invalid_count: usize,
    pub technician_count: usize,
    /// Wall-clock runtime in milliseconds.
    #[serde(rename = "performanceDuration")]
    pub performance_duration_ms: f64,
    pub max_iterations_reached: bool,
    pub enforced_conflicts: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleResult {
    pub scheduled_services: Vec<ScheduledService>,
    pub unscheduled_services: Vec<UnscheduledService>,
    pub invalid_services: Vec<InvalidService>,
    pub shifts: Vec<Shift>,
    pub metrics: ScheduleMetrics,
}

impl ScheduleResult {
    /// Number of input records accounted for by this result.
    pub fn accounted_for(&self) -> usize {
        self.scheduled_services.len() + self.unscheduled_services.len() + self.invalid_services.len()
    }
}
