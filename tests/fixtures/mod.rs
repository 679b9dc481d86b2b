//! Test fixtures for shift-planner.
//!
//! Provides:
//! - Real New York area locations
//! - A builder for raw services with sensible defaults
//! - Helpers to prepare, measure and schedule a batch
#![allow(dead_code)]

pub mod nyc_locations;

pub use nyc_locations::*;

use shift_planner::borough::{BoroughRegion, NoBoroughs, RegionBoroughs};
use shift_planner::config::ScheduleOptions;
use shift_planner::context::RunContext;
use shift_planner::haversine::HaversineMatrix;
use shift_planner::matrix::DistanceMatrix;
use shift_planner::model::{RawService, ScheduleResult, Service};
use shift_planner::prepare::prepare_services;
use shift_planner::scheduler::schedule_shifts;
use shift_planner::traits::BoroughClassifier;

/// Calendar day used by every builder unless overridden.
pub const DAY: &str = "2024-03-04";

pub fn at(day: &str, time: &str) -> String {
    format!("{}T{}:00", day, time)
}

/// Builder for raw services with sensible defaults: Times Square,
/// 09:00-11:00 on [`DAY`], 30 minutes.
#[derive(Clone, Debug)]
pub struct TestService {
    raw: RawService,
    day: String,
}

impl TestService {
    pub fn new(id: &str) -> Self {
        Self {
            raw: RawService {
                id: id.to_string(),
                location_id: TIMES_SQUARE.name.to_string(),
                lat: Some(TIMES_SQUARE.lat),
                lon: Some(TIMES_SQUARE.lon),
                time_window_start: Some(at(DAY, "09:00")),
                time_window_end: Some(at(DAY, "11:00")),
                duration_minutes: 30,
                ..RawService::default()
            },
            day: DAY.to_string(),
        }
    }

    pub fn at(mut self, place: Place) -> Self {
        self.raw.location_id = place.name.to_string();
        self.raw.lat = Some(place.lat);
        self.raw.lon = Some(place.lon);
        self
    }

    pub fn on(mut self, day: &str) -> Self {
        self.day = day.to_string();
        self
    }

    /// Window as `HH:MM` times on the builder's day.
    pub fn window(mut self, start: &str, end: &str) -> Self {
        self.raw.time_window_start = Some(at(&self.day, start));
        self.raw.time_window_end = Some(at(&self.day, end));
        self
    }

    pub fn duration(mut self, minutes: i64) -> Self {
        self.raw.duration_minutes = minutes;
        self
    }

    pub fn preferred(mut self, time: &str) -> Self {
        self.raw.preferred_time = Some(at(&self.day, time));
        self
    }

    pub fn pinned_to(mut self, tech: &str) -> Self {
        self.raw.enforced = true;
        self.raw.tech_code = Some(tech.to_string());
        self
    }

    pub fn borough(mut self, name: &str) -> Self {
        self.raw.borough = Some(name.to_string());
        self
    }

    pub fn build(self) -> RawService {
        self.raw
    }
}

pub fn raw(services: Vec<TestService>) -> Vec<RawService> {
    services.into_iter().map(TestService::build).collect()
}

pub fn prepared(services: Vec<TestService>) -> Vec<Service> {
    prepare_services(&raw(services)).valid
}

pub fn haversine_matrix(services: &[Service]) -> DistanceMatrix {
    let locations: Vec<_> = services.iter().map(Service::location).collect();
    DistanceMatrix::from_matrix_provider(&locations, &HaversineMatrix::default())
}

/// Schedules with straight-line distances and no borough classifier.
pub fn schedule(services: &[Service], options: &ScheduleOptions) -> ScheduleResult {
    schedule_with(services, &haversine_matrix(services), &NoBoroughs, options)
}

pub fn schedule_with(
    services: &[Service],
    matrix: &DistanceMatrix,
    boroughs: &dyn BoroughClassifier,
    options: &ScheduleOptions,
) -> ScheduleResult {
    schedule_shifts(services, matrix, boroughs, options, &RunContext::detached()).unwrap()
}

/// Manhattan / Brooklyn split along the East River (rough boxes).
pub fn nyc_boroughs() -> RegionBoroughs {
    RegionBoroughs::default()
        .with_region(BoroughRegion::new("manhattan", (40.70, 40.88), (-74.02, -73.93)))
        .with_region(BoroughRegion::new("brooklyn", (40.57, 40.70), (-74.04, -73.85)))
}
