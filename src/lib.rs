//! shift-planner core
//!
//! Heuristic scheduling of field services into technician shifts: service
//! preparation, optional spatial clustering (bounded k-means or DBSCAN), a
//! greedy shift builder with extension and merge passes, and a bounded
//! worker pool that supersedes stale requests and falls back on timeout.

pub mod aggregate;
pub mod borough;
pub mod compute;
pub mod config;
pub mod context;
pub mod dbscan;
pub mod error;
pub mod haversine;
pub mod kmeans;
pub mod matrix;
pub mod model;
pub mod osrm;
pub mod planner;
pub mod prepare;
pub mod scheduler;
pub mod traits;

pub use error::{PlannerError, Result};
pub use planner::{ClusteringMode, PlanOptions, Planner};
