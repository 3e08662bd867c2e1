//! Reverse geocoding of GPS coordinates into folder-friendly place names.

use crate::organizer_core::config::{Config, GeocodingProvider, GeocodingSettings};
use crate::organizer_core::error::{OrganizerError, Result};
use crate::organizer_core::gps::GpsCoordinate;
use reqwest::blocking::Client;
use serde_json::Value;
use std::time::Duration;

const MAX_LABEL_CHARS: usize = 80;

const COUNTRY_KEYS: &[&str] = &["country"];
const CITY_KEYS: &[&str] = &["city", "town", "village", "locality"];
const DISTRICT_KEYS: &[&str] = &["district", "suburb", "neighbourhood"];

pub trait Geocoder: Send + Sync {
    /// A place name for `coordinate`. Never fails; falls back to the
    /// formatted coordinate.
    fn place_name(&self, coordinate: GpsCoordinate) -> String;
}

/// `Lat_<5dp>_Lon_<5dp>`.
pub fn coordinate_label(coordinate: GpsCoordinate) -> String {
    format!(
        "Lat_{:.5}_Lon_{:.5}",
        coordinate.latitude, coordinate.longitude
    )
}

/// Offline geocoder: every place is its coordinate label.
#[derive(Debug, Default, Clone, Copy)]
pub struct CoordinateGeocoder;

impl Geocoder for CoordinateGeocoder {
    fn place_name(&self, coordinate: GpsCoordinate) -> String {
        coordinate_label(coordinate)
    }
}

pub struct HttpGeocoder {
    client: Client,
    provider: GeocodingProvider,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpGeocoder {
    pub fn new(settings: &GeocodingSettings, api_key: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .user_agent(concat!("photo-organizer/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            provider: settings.provider,
            endpoint: settings
                .endpoint
                .clone()
                .unwrap_or_else(|| settings.provider.default_endpoint().to_string()),
            api_key,
        })
    }

    fn lookup(&self, coordinate: GpsCoordinate) -> Result<String> {
        let request = match self.provider {
            GeocodingProvider::Nominatim => self.client.get(&self.endpoint).query(&[
                ("format", "json".to_string()),
                ("lat", coordinate.latitude.to_string()),
                ("lon", coordinate.longitude.to_string()),
                ("zoom", "16".to_string()),
                ("addressdetails", "1".to_string()),
            ]),
            GeocodingProvider::Positionstack => {
                let key = self.api_key.clone().ok_or_else(|| {
                    OrganizerError::Geocoding("missing positionstack API key".to_string())
                })?;
                self.client.get(&self.endpoint).query(&[
                    ("access_key", key),
                    (
                        "query",
                        format!("{},{}", coordinate.latitude, coordinate.longitude),
                    ),
                    ("limit", "1".to_string()),
                ])
            }
        };

        let response = request.send()?;
        if !response.status().is_success() {
            return Err(OrganizerError::Geocoding(format!(
                "HTTP status: {}",
                response.status()
            )));
        }
        let body: Value = response.json()?;
        place_name_from_response(&body)
            .ok_or_else(|| OrganizerError::Geocoding("no usable address in response".to_string()))
    }
}

impl Geocoder for HttpGeocoder {
    fn place_name(&self, coordinate: GpsCoordinate) -> String {
        if self.provider.requires_key() && self.api_key.is_none() {
            log::debug!("No {} API key, using coordinates", self.provider.as_str());
            return coordinate_label(coordinate);
        }
        match self.lookup(coordinate) {
            Ok(name) => name,
            Err(e) => {
                log::warn!("Reverse geocoding of {} failed: {}", coordinate, e);
                coordinate_label(coordinate)
            }
        }
    }
}

/// The geocoder described by `config`; offline when geocoding is disabled
/// or the HTTP client cannot be built.
pub fn from_config(config: &Config) -> Box<dyn Geocoder> {
    let settings = &config.geocoding;
    if !settings.enabled {
        return Box::new(CoordinateGeocoder);
    }
    let api_key = config.api_key(settings.provider.as_str()).map(str::to_string);
    match HttpGeocoder::new(settings, api_key) {
        Ok(geocoder) => Box::new(geocoder),
        Err(e) => {
            log::warn!("Could not set up reverse geocoding: {}", e);
            Box::new(CoordinateGeocoder)
        }
    }
}

fn first_text(address: &serde_json::Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| {
        address
            .get(*key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    })
}

fn truncate_label(label: &str) -> String {
    if label.chars().count() > MAX_LABEL_CHARS {
        let head: String = label.chars().take(MAX_LABEL_CHARS - 3).collect();
        format!("{}...", head)
    } else {
        label.to_string()
    }
}

/// Build "Country - City - District" from a nominatim-style `address`
/// object or the first positionstack `data` record, falling back to the
/// full label truncated to 80 characters.
pub fn place_name_from_response(body: &Value) -> Option<String> {
    let record = body
        .get("address")
        .and_then(Value::as_object)
        .or_else(|| {
            body.get("data")
                .and_then(Value::as_array)
                .and_then(|data| data.first())
                .and_then(Value::as_object)
        });

    if let Some(record) = record {
        let components: Vec<String> = [COUNTRY_KEYS, CITY_KEYS, DISTRICT_KEYS]
            .iter()
            .filter_map(|keys| first_text(record, keys))
            .collect();
        if !components.is_empty() {
            return Some(components.join(" - "));
        }
    }

    let label = body
        .get("display_name")
        .and_then(Value::as_str)
        .or_else(|| record.and_then(|r| r.get("label")).and_then(Value::as_str))
        .map(str::trim)
        .filter(|s| !s.is_empty())?;
    Some(truncate_label(label))
}
