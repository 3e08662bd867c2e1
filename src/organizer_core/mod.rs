pub mod analysis;
pub mod cache;
pub mod camera;
pub mod cli;
pub mod config;
pub mod date;
pub mod error;
pub mod exif;
pub mod exiftool;
pub mod extract;
pub mod geocode;
pub mod gps;
pub mod journal;
pub mod location;
pub mod media;
pub mod metadata;
pub mod organize;
pub mod platform;
pub mod progress;

#[cfg(test)]
mod test_support;

pub use cli::{CacheAction, Cli, Commands, ConfigAction, OutputFormat};
pub use config::{Config, ConfigStore, FileConfigStore, TransferMode};
pub use date::{DateOrigin, ResolvedDate, resolve_date};
pub use error::{OrganizerError, Result};
pub use extract::MetadataExtractor;
pub use gps::{GpsCoordinate, resolve_gps};
pub use media::{FormatClass, MediaFile, classify, collect_media_files};
pub use metadata::{MetadataMap, MetadataValue};
pub use organize::{
    Criterion, DateLayout, OrganizeMode, OrganizeOptions, OrganizeResult, Organizer,
};
