//! Great-circle distance and proximity grouping of geotagged files.

use crate::organizer_core::gps::GpsCoordinate;
use serde::Serialize;
use std::path::PathBuf;

const EARTH_RADIUS_KM: f64 = 6371.0;

pub const DEFAULT_MAX_DISTANCE_KM: f64 = 1.0;

/// Haversine distance in kilometres.
pub fn distance_km(a: GpsCoordinate, b: GpsCoordinate) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let dlat = (b.latitude - a.latitude).to_radians();
    let dlon = (b.longitude - a.longitude).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().min(1.0).asin()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocationGroup {
    /// First file's coordinate; `None` for the group of files without GPS.
    pub anchor: Option<GpsCoordinate>,
    pub files: Vec<PathBuf>,
}

impl LocationGroup {
    pub fn has_gps(&self) -> bool {
        self.anchor.is_some()
    }
}

/// Greedy anchor-based grouping.
///
/// Files are visited in input order. Each unassigned file opens a group and
/// pulls in every later unassigned file within `max_km` of it. Membership is
/// measured against the anchor only, so the result is not a transitive
/// closure. Files without a coordinate end up in one trailing group.
pub fn group_by_distance(
    files: &[(PathBuf, Option<GpsCoordinate>)],
    max_km: f64,
) -> Vec<LocationGroup> {
    let located: Vec<(&PathBuf, GpsCoordinate)> = files
        .iter()
        .filter_map(|(path, gps)| gps.map(|c| (path, c)))
        .collect();
    let mut assigned = vec![false; located.len()];
    let mut groups = Vec::new();

    for i in 0..located.len() {
        if assigned[i] {
            continue;
        }
        assigned[i] = true;
        let (path, anchor) = located[i];
        let mut members = vec![path.clone()];

        for j in (i + 1)..located.len() {
            if !assigned[j] && distance_km(anchor, located[j].1) <= max_km {
                assigned[j] = true;
                members.push(located[j].0.clone());
            }
        }
        groups.push(LocationGroup {
            anchor: Some(anchor),
            files: members,
        });
    }

    let without_gps: Vec<PathBuf> = files
        .iter()
        .filter(|(_, gps)| gps.is_none())
        .map(|(path, _)| path.clone())
        .collect();
    if !without_gps.is_empty() {
        groups.push(LocationGroup {
            anchor: None,
            files: without_gps,
        });
    }

    log::debug!("Built {} location groups from {} files", groups.len(), files.len());
    groups
}
