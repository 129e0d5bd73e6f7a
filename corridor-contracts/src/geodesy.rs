//! Great-circle helpers shared by every component that needs distances or headings.
//!
//! All angles are in degrees at the API surface, distances in metres.

use serde::{Deserialize, Serialize};

/// Mean Earth radius used by every computation in this module.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GeoError {
    #[error("invalid WGS84 coordinates lat={lat} lng={lng}")]
    InvalidCoordinates { lat: f64, lng: f64 },
}

/// A WGS84 position. Construct through [`LatLng::new`] to get validation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

impl LatLng {
    pub fn new(lat: f64, lng: f64) -> Result<Self, GeoError> {
        if is_valid_pair(lat, lng) {
            Ok(Self { lat, lng })
        } else {
            Err(GeoError::InvalidCoordinates { lat, lng })
        }
    }

    pub fn is_valid(&self) -> bool {
        is_valid_pair(self.lat, self.lng)
    }
}

pub fn is_valid_pair(lat: f64, lng: f64) -> bool {
    lat.is_finite() && lng.is_finite() && (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lng)
}

pub fn haversine_m(a: LatLng, b: LatLng) -> f64 {
    let (phi1, phi2) = (a.lat.to_radians(), b.lat.to_radians());
    let d_phi = (b.lat - a.lat).to_radians();
    let d_lambda = (b.lng - a.lng).to_radians();

    let h = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().min(1.0).asin()
}

/// Initial bearing from `a` towards `b`, normalised to `[0, 360)`.
pub fn initial_bearing_deg(a: LatLng, b: LatLng) -> f64 {
    let (phi1, phi2) = (a.lat.to_radians(), b.lat.to_radians());
    let d_lambda = (b.lng - a.lng).to_radians();

    let y = d_lambda.sin() * phi2.cos();
    let x = phi1.cos() * phi2.sin() - phi1.sin() * phi2.cos() * d_lambda.cos();
    normalize_bearing(y.atan2(x).to_degrees())
}

/// Point reached after travelling `distance_m` from `origin` on `bearing_deg`.
pub fn destination(origin: LatLng, bearing_deg: f64, distance_m: f64) -> LatLng {
    let delta = distance_m / EARTH_RADIUS_M;
    let theta = bearing_deg.to_radians();
    let phi1 = origin.lat.to_radians();
    let lambda1 = origin.lng.to_radians();

    let phi2 = (phi1.sin() * delta.cos() + phi1.cos() * delta.sin() * theta.cos()).asin();
    let lambda2 = lambda1
        + (theta.sin() * delta.sin() * phi1.cos()).atan2(delta.cos() - phi1.sin() * phi2.sin());

    LatLng {
        lat: phi2.to_degrees(),
        lng: normalize_longitude(lambda2.to_degrees()),
    }
}

/// Whole minutes needed to cover `distance_m` at `speed_mps`, never below one.
pub fn eta_minutes(distance_m: f64, speed_mps: f64) -> Option<u32> {
    if !(speed_mps > 0.0) || !distance_m.is_finite() {
        return None;
    }
    let minutes = (distance_m.max(0.0) / speed_mps / 60.0).ceil();
    Some((minutes as u32).max(1))
}

fn normalize_bearing(deg: f64) -> f64 {
    let b = deg.rem_euclid(360.0);
    if b >= 360.0 { 0.0 } else { b }
}

fn normalize_longitude(deg: f64) -> f64 {
    (deg + 540.0).rem_euclid(360.0) - 180.0
}
