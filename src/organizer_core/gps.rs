use crate::organizer_core::exif::GPS_INFO_KEY;
use crate::organizer_core::extract::MetadataExtractor;
use crate::organizer_core::metadata::{MetadataMap, MetadataValue, decode_bytes, parse_literal};
use serde::Serialize;
use std::path::Path;

/// Numeric tag of the GPS IFD pointer, used as a key by some readers.
const GPS_IFD_KEY: &str = "34853";

/// A (latitude, longitude) pair in decimal degrees. Always within range.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GpsCoordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl GpsCoordinate {
    /// Out-of-range or non-finite values yield `None`, never a clamped pair.
    pub fn new(latitude: f64, longitude: f64) -> Option<Self> {
        let valid = latitude.is_finite()
            && longitude.is_finite()
            && (-90.0..=90.0).contains(&latitude)
            && (-180.0..=180.0).contains(&longitude);
        valid.then_some(Self {
            latitude,
            longitude,
        })
    }
}

impl std::fmt::Display for GpsCoordinate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.6}, {:.6}", self.latitude, self.longitude)
    }
}

/// Locate the GPS structure in `metadata` and convert it to decimal degrees.
///
/// The structure is looked up as a `GPSInfo` entry (a map, or a serialized
/// map literal), then under the GPS IFD tag number, then as GPS tags
/// flattened into the top level. The first shape present is used.
pub fn resolve_gps(metadata: &MetadataMap) -> Option<GpsCoordinate> {
    if let Some(info) = metadata.get(GPS_INFO_KEY) {
        return coordinates_from_value(info);
    }
    if let Some(info) = metadata.get(GPS_IFD_KEY) {
        return coordinates_from_value(info);
    }
    coordinates_from_map(metadata)
}

/// Whether the file at `path` carries usable GPS coordinates.
pub fn has_gps(extractor: &MetadataExtractor, path: &Path) -> bool {
    path.is_file() && resolve_gps(&extractor.extract(path)).is_some()
}

pub fn google_maps_link(latitude: f64, longitude: f64, zoom: u8) -> String {
    format!("https://www.google.com/maps?q={},{}&z={}", latitude, longitude, zoom)
}

fn coordinates_from_value(value: &MetadataValue) -> Option<GpsCoordinate> {
    match value {
        MetadataValue::Map(map) => coordinates_from_map(map),
        MetadataValue::Text(text) => match parse_literal(text) {
            Some(MetadataValue::Map(map)) => coordinates_from_map(&map),
            _ => {
                log::debug!("GPS structure is not a map literal: {}", text);
                None
            }
        },
        _ => None,
    }
}

fn lookup<'a>(map: &'a MetadataMap, name: &str, number: &str) -> Option<&'a MetadataValue> {
    map.get(name).or_else(|| map.get(number))
}

fn coordinates_from_map(map: &MetadataMap) -> Option<GpsCoordinate> {
    let latitude = signed_degrees(
        lookup(map, "GPSLatitude", "2")?,
        lookup(map, "GPSLatitudeRef", "1"),
        'S',
    )?;
    let longitude = signed_degrees(
        lookup(map, "GPSLongitude", "4")?,
        lookup(map, "GPSLongitudeRef", "3"),
        'W',
    )?;
    GpsCoordinate::new(latitude, longitude)
}

/// Apply the hemisphere reference. A direction embedded in the value itself
/// takes precedence over the separate reference tag.
fn signed_degrees(value: &MetadataValue, reference: Option<&MetadataValue>, negative: char) -> Option<f64> {
    let (degrees, embedded) = to_degrees(value)?;
    let direction = embedded.or_else(|| reference.and_then(reference_letter));
    Some(if direction == Some(negative) {
        -degrees.abs()
    } else {
        degrees
    })
}

fn reference_letter(value: &MetadataValue) -> Option<char> {
    let text = match value {
        MetadataValue::Bytes(bytes) => decode_bytes(bytes),
        other => other.to_text(),
    };
    text.trim().chars().next().map(|c| c.to_ascii_uppercase())
}

/// Degrees from a (d, m, s) triple, a single number, or a DMS string.
fn to_degrees(value: &MetadataValue) -> Option<(f64, Option<char>)> {
    match value {
        MetadataValue::List(items) if items.len() == 3 => {
            let d = component(&items[0])?;
            let m = component(&items[1])?;
            let s = component(&items[2])?;
            Some((d + m / 60.0 + s / 3600.0, None))
        }
        MetadataValue::List(items) if items.len() == 1 => to_degrees(&items[0]),
        MetadataValue::Integer(_) | MetadataValue::Float(_) => Some((value.as_f64()?, None)),
        MetadataValue::Text(text) => {
            if let Some(number) = value.as_f64() {
                return Some((number, None));
            }
            if let Some(parsed) = parse_dms_string(text) {
                return Some(parsed);
            }
            match parse_literal(text)? {
                MetadataValue::Text(_) => None,
                literal => to_degrees(&literal),
            }
        }
        MetadataValue::Bytes(bytes) => to_degrees(&MetadataValue::Text(decode_bytes(bytes))),
        _ => None,
    }
}

/// One element of a (d, m, s) triple: a number, a fraction string, or a
/// (numerator, denominator) pair.
fn component(value: &MetadataValue) -> Option<f64> {
    match value {
        MetadataValue::List(pair) if pair.len() == 2 => {
            let denominator = pair[1].as_f64()?;
            if denominator == 0.0 {
                return None;
            }
            Some(pair[0].as_f64()? / denominator)
        }
        other => other.as_f64(),
    }
}

/// Parse GPS string like "45 deg 30' 16.91\" N" to unsigned decimal degrees
/// plus the trailing direction letter, if any.
pub fn parse_dms_string(s: &str) -> Option<(f64, Option<char>)> {
    if s.trim().is_empty() {
        return None;
    }

    let parts: Vec<&str> = s.split_whitespace().collect();
    if parts.len() < 4 || parts[1] != "deg" {
        return None;
    }

    let degrees: f64 = parts[0].parse().ok()?;
    let minutes: f64 = parts[2].trim_end_matches('\'').parse().ok()?;
    let seconds: f64 = parts[3]
        .trim_end_matches('"')
        .trim_end_matches('\'')
        .parse()
        .ok()?;
    let direction = parts
        .get(4)
        .and_then(|d| d.chars().next())
        .map(|c| c.to_ascii_uppercase());

    Some((degrees + minutes / 60.0 + seconds / 3600.0, direction))
}
