//! Geodetic conversions on the WGS84 ellipsoid.

pub mod geoid;

use serde::Serialize;

use crate::{
    geo::geoid::GeoidGrid,
    rtcm::station::{
        AntennaReferencePoint,
        Ecef,
    },
};

/// WGS84 semi-major axis in meters
pub const WGS84_A: f64 = 6_378_137.0;

/// WGS84 first eccentricity squared
pub const WGS84_E2: f64 = 6.69437999014e-3;

/// Geodetic coordinates. Angles are in degrees, height in meters above the
/// ellipsoid.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Geodetic {
    pub latitude: f64,
    pub longitude: f64,
    pub height: f64,
}

impl Geodetic {
    /// Converts ECEF coordinates using Bowring's method.
    ///
    /// Returns `None` for results outside of ±91° latitude or ±181°
    /// longitude.
    pub fn from_ecef(ecef: Ecef) -> Option<Self> {
        let a = WGS84_A;
        let e2 = WGS84_E2;
        let b = a * (1.0 - e2).sqrt();
        let ep2 = (a * a - b * b) / (b * b);

        let p = ecef.x.hypot(ecef.y);
        let theta = (ecef.z * a).atan2(p * b);
        let (sin_theta, cos_theta) = theta.sin_cos();

        let longitude = ecef.y.atan2(ecef.x);
        let latitude = (ecef.z + ep2 * b * sin_theta.powi(3)).atan2(p - e2 * a * cos_theta.powi(3));

        let (sin_lat, cos_lat) = latitude.sin_cos();
        let n = a / (1.0 - e2 * sin_lat * sin_lat).sqrt();
        let height = if cos_lat.abs() > 1e-10 {
            p / cos_lat - n
        }
        else {
            // at the poles p/cos(lat) is undefined
            ecef.z.abs() - b
        };

        let geodetic = Self {
            latitude: latitude.to_degrees(),
            longitude: longitude.to_degrees(),
            height,
        };

        (geodetic.latitude.abs() <= 91.0 && geodetic.longitude.abs() <= 181.0).then_some(geodetic)
    }
}

/// Position of a base station, as learned from its antenna reference point
/// messages.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct ObservedPosition {
    pub station_id: u16,
    pub latitude: f64,
    pub longitude: f64,
    pub ellipsoidal_height: f64,

    /// Height above mean sea level. Only available with a geoid grid.
    pub orthometric_height: Option<f64>,

    /// Geoid undulation in meters. Only available with a geoid grid.
    pub undulation: Option<f64>,

    pub antenna_height: Option<f64>,
}

impl ObservedPosition {
    pub fn from_reference_point(
        reference_point: &AntennaReferencePoint,
        geoid: Option<&GeoidGrid>,
    ) -> Option<Self> {
        let geodetic = Geodetic::from_ecef(reference_point.position)?;

        let undulation =
            geoid.map(|geoid| geoid.undulation(geodetic.latitude, geodetic.longitude));

        Some(Self {
            station_id: reference_point.station_id,
            latitude: geodetic.latitude,
            longitude: geodetic.longitude,
            ellipsoidal_height: geodetic.height,
            orthometric_height: undulation.map(|undulation| geodetic.height - undulation),
            undulation,
            antenna_height: reference_point.antenna_height,
        })
    }
}

/// A position that was configured for a mountpoint, e.g. to be listed in the
/// sourcetable.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, serde::Deserialize)]
pub struct DeclaredPosition {
    pub latitude: f64,
    pub longitude: f64,
}
