//! Geographic position types

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Decimal places kept when rendering or transmitting coordinates
pub const COORDINATE_PRECISION: u32 = 6;

/// Geographic position reported by a node or shared from chat
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// Latitude in degrees (-90 to 90)
    pub latitude: f64,
    /// Longitude in degrees (-180 to 180)
    pub longitude: f64,
    /// Optional altitude in meters
    pub altitude: Option<f64>,
}

impl Position {
    /// Create a validated position
    pub fn new(latitude: f64, longitude: f64, altitude: Option<f64>) -> Result<Self, CoreError> {
        if !(-90.0..=90.0).contains(&latitude) || latitude.is_nan() {
            return Err(CoreError::InvalidCoordinate {
                field: "latitude",
                value: latitude,
            });
        }
        if !(-180.0..=180.0).contains(&longitude) || longitude.is_nan() {
            return Err(CoreError::InvalidCoordinate {
                field: "longitude",
                value: longitude,
            });
        }
        if let Some(alt) = altitude {
            // Dead Sea to stratospheric balloon, anything else is a decode bug
            if !(-1000.0..=50000.0).contains(&alt) || alt.is_nan() {
                return Err(CoreError::InvalidCoordinate {
                    field: "altitude",
                    value: alt,
                });
            }
        }
        Ok(Self {
            latitude,
            longitude,
            altitude,
        })
    }

    /// Round coordinates to [`COORDINATE_PRECISION`] decimal places
    pub fn rounded(&self) -> Self {
        let factor = 10f64.powi(COORDINATE_PRECISION as i32);
        Self {
            latitude: (self.latitude * factor).round() / factor,
            longitude: (self.longitude * factor).round() / factor,
            altitude: self.altitude,
        }
    }
}
