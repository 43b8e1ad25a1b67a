// Geofence boundary registry and containment predicate.
//
// Boundaries are registered per site (classroom or deployment) at startup
// and checked against the coordinate reported with each frame. A site with
// no registered boundary is reported as Unknown; it is never silently
// treated as inside.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::observation::Coordinate;

/// Mean Earth radius in meters, used by the great-circle distance.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Result of a containment check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GeofenceStatus {
    Inside,
    Outside,
    /// No boundary registered for the requested site.
    Unknown,
}

/// Errors raised while loading boundary configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid boundary document: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("boundary for site '{0}' has a non-positive radius")]
    InvalidRadius(String),
}

/// A registered circular boundary: center point plus inclusive radius.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Boundary {
    pub center: Coordinate,
    pub radius_m: f64,
}

impl Boundary {
    pub fn new(center: Coordinate, radius_m: f64) -> Self {
        Self {
            center,
            radius_m,
        }
    }

    /// Containment is inclusive: a point exactly at the radius is inside.
    pub fn contains(&self, point: &Coordinate) -> bool {
        haversine_m(&self.center, point) <= self.radius_m
    }
}

/// Great-circle distance in meters between two coordinates.
pub fn haversine_m(a: &Coordinate, b: &Coordinate) -> f64 {
    let lat_a = a.latitude.to_radians();
    let lat_b = b.latitude.to_radians();
    let d_lat = (b.latitude - a.latitude).to_radians();
    let d_lon = (b.longitude - a.longitude).to_radians();

    let h = (d_lat / 2.0).sin().powi(2)
        + lat_a.cos() * lat_b.cos() * (d_lon / 2.0).sin().powi(2);

    2.0 * EARTH_RADIUS_M * h.sqrt().asin()
}

/// Site-keyed boundary registry, loaded once at startup.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BoundaryRegistry {
    sites: HashMap<String, Boundary>,
}

impl BoundaryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a JSON document mapping site names to boundaries, e.g.
    /// `{"room-101": {"center": {"latitude": 40.0, "longitude": -3.0}, "radius_m": 30.0}}`.
    pub fn from_json(doc: &str) -> Result<Self, ConfigError> {
        let sites: HashMap<String, Boundary> = serde_json::from_str(doc)?;
        for (site, boundary) in &sites {
            if boundary.radius_m <= 0.0 {
                return Err(ConfigError::InvalidRadius(site.clone()));
            }
        }
        Ok(Self {
            sites,
        })
    }

    pub fn register(&mut self, site: impl Into<String>, boundary: Boundary) {
        self.sites.insert(site.into(), boundary);
    }

    pub fn boundary(&self, site: &str) -> Option<&Boundary> {
        self.sites.get(site)
    }

    pub fn len(&self) -> usize {
        self.sites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }

    /// Checks a coordinate against the boundary registered for `site`.
    pub fn check(&self, point: &Coordinate, site: &str) -> GeofenceStatus {
        match self.sites.get(site) {
            None => GeofenceStatus::Unknown,
            Some(boundary) if boundary.contains(point) => GeofenceStatus::Inside,
            Some(_) => GeofenceStatus::Outside,
        }
    }
}
