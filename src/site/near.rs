use std::cmp::Ordering;
use std::collections::HashMap;

use rayon::prelude::*;
use serde::Serialize;
use tracing::warn;

use crate::model::Location;

/// Neighbors further than this are not worth showing on a location page.
const NEAR_RADIUS_METERS: f64 = 50_000.0;
const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// One entry in a location's `near` list.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Near {
    pub id: String,
    pub distance: f64,
}

/// Great-circle distance in meters between two (lat, long) points in
/// degrees, by the haversine formula over the mean Earth radius.
pub fn distance_meters(a: (f64, f64), b: (f64, f64)) -> f64 {
    let (lat1, lon1) = (a.0.to_radians(), a.1.to_radians());
    let (lat2, lon2) = (b.0.to_radians(), b.1.to_radians());
    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_METERS * h.sqrt().atan2((1.0 - h).sqrt())
}

/// For every location with usable coordinates, the other locations within
/// the radius, closest first, ties ordered by ID. Locations without usable
/// coordinates are reported and left out entirely, both as subjects and as
/// candidates. Output is independent of input order.
pub fn nearby_index(locations: &[Location]) -> HashMap<String, Vec<Near>> {
    let mut usable: Vec<(&str, (f64, f64))> = Vec::new();
    for location in locations {
        match location.coordinates() {
            Some(coordinates) => usable.push((location.id.as_str(), coordinates)),
            None => warn!(
                "location {} has no usable coordinates, omitted from nearby index",
                location.id
            ),
        }
    }
    // candidates ordered by ID up front, so the stable sort below leaves
    // equal distances in ID order
    usable.sort_by(|a, b| a.0.cmp(b.0));

    usable
        .par_iter()
        .map(|&(id, point)| {
            let mut near: Vec<Near> = usable
                .iter()
                .filter(|&&(other_id, _)| other_id != id)
                .filter_map(|&(other_id, other_point)| {
                    let distance = distance_meters(point, other_point);
                    if distance < NEAR_RADIUS_METERS {
                        Some(Near {
                            id: other_id.to_string(),
                            distance,
                        })
                    } else {
                        None
                    }
                })
                .collect();
            near.sort_by(|a, b| {
                a.distance
                    .partial_cmp(&b.distance)
                    .unwrap_or(Ordering::Equal)
            });
            (id.to_string(), near)
        })
        .collect()
}
