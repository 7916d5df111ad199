//! Great-circle helpers on a spherical Earth.
//!
//! Accuracy near the poles and for antipodal pairs is not guaranteed.

use crate::model::Coordinate;

/// Mean Earth radius in meters.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Haversine distance between two coordinates, in meters.
pub fn distance_meters(a: &Coordinate, b: &Coordinate) -> f64 {
    let lat1 = a.lat().to_radians();
    let lat2 = b.lat().to_radians();
    let dlat = (b.lat() - a.lat()).to_radians();
    let dlng = (b.lng() - a.lng()).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlng / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    EARTH_RADIUS_M * c
}

/// Forward azimuth from `a` to `b` in degrees, normalized to `[0, 360)`.
pub fn bearing_degrees(a: &Coordinate, b: &Coordinate) -> f64 {
    let lat1 = a.lat().to_radians();
    let lat2 = b.lat().to_radians();
    let dlng = (b.lng() - a.lng()).to_radians();

    let y = dlng.sin() * lat2.cos();
    let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * dlng.cos();
    normalize_degrees(y.atan2(x).to_degrees())
}

/// Point reached by travelling `distance_m` from `origin` along `bearing_deg`.
///
/// Longitude is wrapped into `[-180, 180]` and latitude clamped to the valid
/// range, so the result is always a valid [`Coordinate`].
pub fn destination(origin: &Coordinate, bearing_deg: f64, distance_m: f64) -> Coordinate {
    let delta = distance_m / EARTH_RADIUS_M;
    let theta = bearing_deg.to_radians();
    let lat1 = origin.lat().to_radians();
    let lng1 = origin.lng().to_radians();

    let lat2 = (lat1.sin() * delta.cos() + lat1.cos() * delta.sin() * theta.cos()).asin();
    let lng2 = lng1
        + (theta.sin() * delta.sin() * lat1.cos()).atan2(delta.cos() - lat1.sin() * lat2.sin());

    let lat = lat2.to_degrees().clamp(-90.0, 90.0);
    let lng = (lng2.to_degrees() + 540.0).rem_euclid(360.0) - 180.0;
    Coordinate::new(lat, lng).unwrap_or(*origin)
}

/// Approximate area of a simple polygon in square meters.
///
/// Vertices are projected onto a local equirectangular plane centred on the
/// ring's mean latitude, then the shoelace formula is applied. Good enough
/// for field-sized survey areas.
pub fn polygon_area_m2(vertices: &[Coordinate]) -> f64 {
    if vertices.len() < 3 {
        return 0.0;
    }
    let mean_lat = vertices.iter().map(|c| c.lat()).sum::<f64>() / vertices.len() as f64;
    let k = EARTH_RADIUS_M.to_radians();
    let kx = k * mean_lat.to_radians().cos();

    let projected: Vec<(f64, f64)> = vertices
        .iter()
        .map(|c| (c.lng() * kx, c.lat() * k))
        .collect();

    let mut twice_area = 0.0;
    for (i, &(x1, y1)) in projected.iter().enumerate() {
        let (x2, y2) = projected[(i + 1) % projected.len()];
        twice_area += x1 * y2 - x2 * y1;
    }
    twice_area.abs() / 2.0
}

/// Wraps any angle in degrees into `[0, 360)`.
pub fn normalize_degrees(deg: f64) -> f64 {
    let wrapped = deg.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360.0 for tiny negative inputs.
    if wrapped >= 360.0 {
        0.0
    } else {
        wrapped
    }
}
