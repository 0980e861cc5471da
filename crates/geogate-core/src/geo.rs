//! Coordinates and great-circle distance.
//!
//! The door coordinate and geofence radius are fixed at build time. Every
//! proximity decision in the crate goes through [`distance`].

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Mean Earth radius used by the haversine formula, in meters.
pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// Radius of the geofence around the door, in meters.
pub const GEOFENCE_RADIUS_METERS: f64 = 100.0;

/// The door's position.
pub const DOOR_LOCATION: GeoCoordinate = GeoCoordinate {
    latitude: 51.314_239_887_728_7,
    longitude: 16.914_705_160_479_76,
};

/// A point on Earth in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "latitude": 51.3142398877287,
    "longitude": 16.91470516047976
}))]
pub struct GeoCoordinate {
    /// Latitude in degrees, positive north.
    #[schema(example = 51.314_239_887_728_7)]
    pub latitude: f64,

    /// Longitude in degrees, positive east.
    #[schema(example = 16.914_705_160_479_76)]
    pub longitude: f64,
}

impl GeoCoordinate {
    /// Create a coordinate from latitude and longitude in degrees.
    #[must_use]
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Distance from this coordinate to `other`, in meters.
    #[must_use]
    pub fn distance_to(&self, other: &Self) -> f64 {
        distance(*self, *other)
    }
}

/// Great-circle distance between two coordinates, in meters.
///
/// Uses the haversine formula with [`EARTH_RADIUS_METERS`]. Inputs are not
/// validated: NaN or out-of-range degrees produce NaN or meaningless values.
#[must_use]
pub fn distance(a: GeoCoordinate, b: GeoCoordinate) -> f64 {
    let d_lat = (b.latitude - a.latitude).to_radians();
    let d_lon = (b.longitude - a.longitude).to_radians();
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + (d_lon / 2.0).sin().powi(2) * lat1.cos() * lat2.cos();
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());

    EARTH_RADIUS_METERS * c
}

/// Whether a measured distance lies inside the geofence.
#[inline]
#[must_use]
pub fn is_within_radius(distance_meters: f64, radius_meters: f64) -> bool {
    distance_meters < radius_meters
}
