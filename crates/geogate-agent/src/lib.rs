//! # geogate-agent
//!
//! Local agent for geogate. Hosts the geofence engine and background task
//! and exposes them to the platform bridge over a REST API.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

pub mod api;
pub mod logging;
pub mod state;
