//! Service normalization ahead of clustering and scheduling.
//!
//! Parses time windows, drops records that cannot be scheduled (with a
//! reason) and orders the rest so the most constrained services are
//! placed first.

use std::cmp::Reverse;

use chrono::{DateTime, NaiveDateTime};
use tracing::debug;

use crate::model::{Coordinates, InvalidReason, InvalidService, RawService, Service, TimeWindow};

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PreparedServices {
    pub valid: Vec<Service>,
    pub invalid: Vec<InvalidService>,
}

/// Validates and orders raw services.
///
/// Valid services are sorted by calendar day, then ascending window width,
/// then descending duration. The sort is stable.
pub fn prepare_services(raw: &[RawService]) -> PreparedServices {
    let mut prepared = PreparedServices::default();

    for record in raw {
        match validate(record) {
            Ok(service) => prepared.valid.push(service),
            Err(kind) => {
                debug!(service_id = %record.id, reason = %kind, "service excluded");
                prepared.invalid.push(InvalidService::new(record.clone(), kind));
            }
        }
    }

    prepared.valid.sort_by_key(|service| {
        (
            service.day(),
            service.time_window.width_minutes(),
            Reverse(service.duration_minutes),
        )
    });

    prepared
}

/// Parses RFC 3339 (offset dropped, local wall time kept) or naive
/// `YYYY-MM-DD[T ]HH:MM[:SS]` timestamps.
pub fn parse_timestamp(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    if let Ok(with_offset) = DateTime::parse_from_rfc3339(value) {
        return Some(with_offset.naive_local());
    }
    NAIVE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
}

fn validate(record: &RawService) -> Result<Service, InvalidReason> {
    let earliest = record.time_window_start.as_deref().and_then(parse_timestamp);
    let latest = record.time_window_end.as_deref().and_then(parse_timestamp);
    let time_window = match (earliest, latest) {
        (Some(earliest), Some(latest)) => {
            TimeWindow::new(earliest, latest).ok_or(InvalidReason::InvalidTimeRange)?
        }
        _ => return Err(InvalidReason::InvalidTimeRange),
    };

    let coordinates = match (record.lat, record.lon) {
        (Some(lat), Some(lon)) if lat.is_finite() && lon.is_finite() => Coordinates::new(lat, lon),
        _ => return Err(InvalidReason::MissingCoordinates),
    };

    if record.duration_minutes <= 0 {
        return Err(InvalidReason::InvalidDuration);
    }

    let tech_code = record
        .tech_code
        .as_deref()
        .map(str::trim)
        .filter(|code| !code.is_empty())
        .map(str::to_string);
    if record.enforced && tech_code.is_none() {
        return Err(InvalidReason::MissingTechCode);
    }

    let preferred_time = record
        .preferred_time
        .as_deref()
        .and_then(parse_timestamp)
        .map(|at| time_window.clamp(at))
        .unwrap_or(time_window.earliest);

    let location_id = if record.location_id.is_empty() {
        format!("{:.6},{:.6}", coordinates.lat, coordinates.lon)
    } else {
        record.location_id.clone()
    };

    Ok(Service {
        id: record.id.clone(),
        location_id,
        coordinates,
        time_window,
        preferred_time,
        duration_minutes: record.duration_minutes,
        tech_code,
        enforced: record.enforced,
        borough: record.borough.clone().filter(|b| !b.is_empty()),
    })
}
