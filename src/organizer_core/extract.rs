//! Per-format metadata extraction chains.
//!
//! Every format class owns an ordered list of strategies. The first strategy
//! that yields a non-empty map wins; failures are logged and the next one is
//! tried. When the whole chain comes up empty the basic filesystem metadata
//! is returned, so extraction itself never fails.

use crate::organizer_core::cache::{MetadataCache, NoCache, SqliteMetadataCache};
use crate::organizer_core::config::Config;
use crate::organizer_core::date::{date_from_filename, format_exif_date};
use crate::organizer_core::error::Result;
use crate::organizer_core::exif::{self, GPS_INFO_KEY, GpsLayout};
use crate::organizer_core::exiftool::{DEFAULT_TIMEOUT, ExifToolRunner};
use crate::organizer_core::media::{FormatClass, MediaFile};
use crate::organizer_core::metadata::{
    MetadataMap, MetadataValue, basic_metadata, merge_missing, overlay,
};
use crate::organizer_core::platform::{self, PlatformMetadataSource};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

pub trait ExtractionStrategy: Send + Sync {
    fn name(&self) -> &'static str;
    fn try_extract(&self, file: &MediaFile) -> Result<MetadataMap>;
}

/// Lightweight flat tag reader over the file container.
pub struct TagReader {
    /// Fill keys the tags lack with basic filesystem metadata.
    pub merge_basic: bool,
}

impl ExtractionStrategy for TagReader {
    fn name(&self) -> &'static str {
        "tag-reader"
    }

    fn try_extract(&self, file: &MediaFile) -> Result<MetadataMap> {
        let exif = exif::read_container(&file.path)?;
        let mut map = exif::exif_to_map(&exif, GpsLayout::Flat);
        if self.merge_basic && !map.is_empty() {
            merge_missing(&mut map, basic_metadata(file));
        }
        Ok(map)
    }
}

/// EXIF block handed out by the image decoder, GPS nested under `GPSInfo`.
pub struct ImageLibraryReader;

impl ExtractionStrategy for ImageLibraryReader {
    fn name(&self) -> &'static str {
        "image-library"
    }

    fn try_extract(&self, file: &MediaFile) -> Result<MetadataMap> {
        let exif = exif::read_via_decoder(&file.path)?;
        Ok(exif::exif_to_map(&exif, GpsLayout::Nested))
    }
}

/// Embedded EXIF if the decoder has any, image header properties otherwise.
pub struct ImagePropertiesReader;

impl ExtractionStrategy for ImagePropertiesReader {
    fn name(&self) -> &'static str {
        "image-properties"
    }

    fn try_extract(&self, file: &MediaFile) -> Result<MetadataMap> {
        match exif::read_via_decoder(&file.path) {
            Ok(exif) => Ok(exif::exif_to_map(&exif, GpsLayout::Nested)),
            Err(e) => {
                log::debug!("No embedded EXIF in {}: {}", file.path.display(), e);
                exif::image_properties(&file.path)
            }
        }
    }
}

/// HEIF container read; pixel dimensions surface as `ImageWidth`/`ImageHeight`.
pub struct HeifReader;

impl ExtractionStrategy for HeifReader {
    fn name(&self) -> &'static str {
        "heif"
    }

    fn try_extract(&self, file: &MediaFile) -> Result<MetadataMap> {
        let exif = exif::read_container(&file.path)?;
        let mut map = exif::exif_to_map(&exif, GpsLayout::Nested);
        for (source, target) in [
            ("PixelXDimension", "ImageWidth"),
            ("PixelYDimension", "ImageHeight"),
        ] {
            if let Some(value) = map.get(source).cloned() {
                map.entry(target.to_string()).or_insert(value);
            }
        }
        Ok(map)
    }
}

pub struct ExifToolReader {
    pub runner: ExifToolRunner,
    /// Use grouped output (EXIF/GPS/File sections).
    pub grouped: bool,
}

impl ExtractionStrategy for ExifToolReader {
    fn name(&self) -> &'static str {
        if self.grouped {
            "exiftool-grouped"
        } else {
            "exiftool"
        }
    }

    fn try_extract(&self, file: &MediaFile) -> Result<MetadataMap> {
        if self.grouped {
            self.runner.read_grouped(&file.path)
        } else {
            self.runner.read_flat(&file.path)
        }
    }
}

pub struct PlatformReader {
    pub source: Arc<dyn PlatformMetadataSource>,
}

impl ExtractionStrategy for PlatformReader {
    fn name(&self) -> &'static str {
        "platform"
    }

    fn try_extract(&self, file: &MediaFile) -> Result<MetadataMap> {
        Ok(self.source.query(&file.path)?.properties)
    }
}

/// Basic metadata plus a capture date parsed from the file name.
pub struct FilenameDateReader;

impl ExtractionStrategy for FilenameDateReader {
    fn name(&self) -> &'static str {
        "filename-date"
    }

    fn try_extract(&self, file: &MediaFile) -> Result<MetadataMap> {
        let mut map = basic_metadata(file);
        if let Some(date) = date_from_filename(&file.file_name()).and_then(|r| format_exif_date(&r.date)) {
            map.insert("DateTimeOriginal".to_string(), MetadataValue::Text(date));
        }
        Ok(map)
    }
}

/// Videos are never parsed; metadata is assembled from the name and, where
/// the platform offers one, the OS property query.
pub struct VideoReader {
    pub source: Arc<dyn PlatformMetadataSource>,
}

impl ExtractionStrategy for VideoReader {
    fn name(&self) -> &'static str {
        "video"
    }

    fn try_extract(&self, file: &MediaFile) -> Result<MetadataMap> {
        let mut map = basic_metadata(file);
        let name = file.file_name();

        if name.starts_with("PXL_") {
            map.insert("Make".to_string(), MetadataValue::text("Google"));
            map.insert("Model".to_string(), MetadataValue::text("Pixel"));
            map.insert("CameraType".to_string(), MetadataValue::text("Google Pixel"));
        }

        let filename_date = date_from_filename(&name).and_then(|r| format_exif_date(&r.date));
        if let Some(date) = &filename_date {
            map.insert("DateTimeOriginal".to_string(), MetadataValue::text(date.as_str()));
            map.insert("FileSourceFromName".to_string(), MetadataValue::Bool(true));
        }
        map.insert("MediaType".to_string(), MetadataValue::text("Video"));

        match self.source.query(&file.path) {
            Ok(report) => {
                overlay(&mut map, report.properties);
                if filename_date.is_none() {
                    if let Some(date) = report.timestamps.first().and_then(format_exif_date) {
                        map.insert("DateTimeOriginal".to_string(), MetadataValue::Text(date));
                    }
                }
            }
            Err(e) => log::debug!("{} query failed for {}: {}", self.source.name(), file.path.display(), e),
        }
        Ok(map)
    }
}

/// Ordered strategies for one format class.
pub struct ExtractionChain {
    pub format: FormatClass,
    strategies: Vec<Box<dyn ExtractionStrategy>>,
}

impl ExtractionChain {
    pub fn new(format: FormatClass, strategies: Vec<Box<dyn ExtractionStrategy>>) -> Self {
        Self { format, strategies }
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// First non-empty map, or `None` once every strategy has failed.
    pub fn run(&self, file: &MediaFile) -> Option<MetadataMap> {
        for strategy in &self.strategies {
            match strategy.try_extract(file) {
                Ok(map) if !map.is_empty() => {
                    log::debug!(
                        "{} metadata for {} from {}",
                        self.format,
                        file.path.display(),
                        strategy.name()
                    );
                    return Some(map);
                }
                Ok(_) => log::debug!("{} found nothing in {}", strategy.name(), file.path.display()),
                Err(e) => log::debug!("{} failed on {}: {}", strategy.name(), file.path.display(), e),
            }
        }
        log::info!(
            "No {} strategy produced metadata for {}, using basic metadata",
            self.format,
            file.path.display()
        );
        None
    }
}

/// Selects the chain for a file's format class and memoizes results in the
/// injected cache.
pub struct MetadataExtractor {
    jpeg: ExtractionChain,
    heic: ExtractionChain,
    raw: ExtractionChain,
    video: ExtractionChain,
    other: ExtractionChain,
    cache: Box<dyn MetadataCache>,
}

impl Default for MetadataExtractor {
    fn default() -> Self {
        Self::new(
            ExifToolRunner::default(),
            Arc::from(platform::detect(DEFAULT_TIMEOUT)),
            Box::new(NoCache),
        )
    }
}

impl MetadataExtractor {
    pub fn new(
        exiftool: ExifToolRunner,
        platform: Arc<dyn PlatformMetadataSource>,
        cache: Box<dyn MetadataCache>,
    ) -> Self {
        let exiftool_flat = || -> Box<dyn ExtractionStrategy> {
            Box::new(ExifToolReader {
                runner: exiftool.clone(),
                grouped: false,
            })
        };
        let platform_reader = || -> Box<dyn ExtractionStrategy> {
            Box::new(PlatformReader {
                source: Arc::clone(&platform),
            })
        };

        let jpeg = ExtractionChain::new(
            FormatClass::Jpeg,
            vec![
                Box::new(TagReader { merge_basic: true }),
                Box::new(ImageLibraryReader),
                exiftool_flat(),
            ],
        );
        let heic = ExtractionChain::new(
            FormatClass::HeicHeif,
            vec![
                Box::new(HeifReader),
                Box::new(ExifToolReader {
                    runner: exiftool.clone(),
                    grouped: true,
                }),
                Box::new(FilenameDateReader),
            ],
        );
        let raw = ExtractionChain::new(
            FormatClass::Raw,
            vec![
                Box::new(TagReader { merge_basic: false }),
                exiftool_flat(),
                platform_reader(),
            ],
        );
        let video = ExtractionChain::new(
            FormatClass::Video,
            vec![Box::new(VideoReader {
                source: Arc::clone(&platform),
            })],
        );
        let other = ExtractionChain::new(
            FormatClass::Other,
            vec![
                Box::new(ImagePropertiesReader),
                Box::new(TagReader { merge_basic: false }),
                exiftool_flat(),
                platform_reader(),
            ],
        );

        Self {
            jpeg,
            heic,
            raw,
            video,
            other,
            cache,
        }
    }

    /// Extractor configured from user preferences. The metadata cache is
    /// only opened when `use_cache` is set and caching is enabled; failing to
    /// open it disables caching.
    pub fn from_config(config: &Config, use_cache: bool) -> Self {
        let runner = ExifToolRunner::from_settings(&config.exiftool);
        let platform = Arc::from(platform::detect(Duration::from_secs(
            config.exiftool.timeout_secs,
        )));
        Self::new(runner, platform, open_cache(config, use_cache))
    }

    pub fn chain(&self, format: FormatClass) -> &ExtractionChain {
        match format {
            FormatClass::Jpeg => &self.jpeg,
            FormatClass::HeicHeif => &self.heic,
            FormatClass::Raw => &self.raw,
            FormatClass::Video => &self.video,
            FormatClass::Other => &self.other,
        }
    }

    pub fn cache(&self) -> &dyn MetadataCache {
        self.cache.as_ref()
    }

    pub fn extract(&self, path: &Path) -> MetadataMap {
        self.extract_file(&MediaFile::new(path))
    }

    /// Metadata for `file`. Always returns a map.
    pub fn extract_file(&self, file: &MediaFile) -> MetadataMap {
        if let Some(cached) = self.cache.get(&file.path) {
            log::debug!("Metadata cache hit for {}", file.path.display());
            return cached;
        }

        let map = self
            .chain(file.format())
            .run(file)
            .unwrap_or_else(|| basic_metadata(file));

        if file.exists() {
            if let Err(e) = self.cache.put(&file.path, &map) {
                log::warn!("Could not cache metadata for {}: {}", file.path.display(), e);
            }
        }
        map
    }
}

fn open_cache(config: &Config, use_cache: bool) -> Box<dyn MetadataCache> {
    if !use_cache || !config.cache.enabled {
        return Box::new(NoCache);
    }
    let Some(path) = config.cache.database_path() else {
        log::warn!("No cache directory available, metadata cache disabled");
        return Box::new(NoCache);
    };
    match SqliteMetadataCache::new(&path, Duration::from_secs(config.cache.ttl_secs)) {
        Ok(cache) => {
            log::debug!("Using metadata cache at {}", path.display());
            Box::new(cache)
        }
        Err(e) => {
            log::warn!("Could not open metadata cache {}: {}", path.display(), e);
            Box::new(NoCache)
        }
    }
}

/// Whether the metadata carries any GPS structure at all.
pub fn has_gps_structure(metadata: &MetadataMap) -> bool {
    metadata.contains_key(GPS_INFO_KEY)
        || metadata.contains_key("GPSLatitude")
        || metadata.contains_key("34853")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::organizer_core::error::OrganizerError;
    use crate::organizer_core::gps::resolve_gps;
    use crate::organizer_core::platform::PlatformReport;
    use crate::organizer_core::test_support::{
        encoded_jpeg_with_exif, jpeg_with_exif, offline_extractor,
    };
    use assert_fs::TempDir;
    use assert_fs::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use time::macros::datetime;

    struct Failing;

    impl ExtractionStrategy for Failing {
        fn name(&self) -> &'static str {
            "failing"
        }
        fn try_extract(&self, _file: &MediaFile) -> Result<MetadataMap> {
            Err(OrganizerError::Other("boom".into()))
        }
    }

    struct Empty;

    impl ExtractionStrategy for Empty {
        fn name(&self) -> &'static str {
            "empty"
        }
        fn try_extract(&self, _file: &MediaFile) -> Result<MetadataMap> {
            Ok(MetadataMap::new())
        }
    }

    struct Fixed(&'static str);

    impl ExtractionStrategy for Fixed {
        fn name(&self) -> &'static str {
            self.0
        }
        fn try_extract(&self, _file: &MediaFile) -> Result<MetadataMap> {
            let mut map = MetadataMap::new();
            map.insert("Source".into(), MetadataValue::text(self.0));
            Ok(map)
        }
    }

    #[test]
    fn test_chain_skips_failures_and_empty_maps() {
        let chain = ExtractionChain::new(
            FormatClass::Other,
            vec![Box::new(Failing), Box::new(Empty), Box::new(Fixed("third")), Box::new(Fixed("fourth"))],
        );
        let map = chain.run(&MediaFile::new(Path::new("x.png"))).unwrap();
        assert_eq!(map.get("Source"), Some(&MetadataValue::text("third")));
    }

    #[test]
    fn test_chain_exhaustion() {
        let chain = ExtractionChain::new(FormatClass::Other, vec![Box::new(Failing), Box::new(Empty)]);
        assert!(chain.run(&MediaFile::new(Path::new("x.png"))).is_none());
    }

    #[test]
    fn test_chain_order() {
        let extractor = offline_extractor();
        assert_eq!(
            extractor.chain(FormatClass::Jpeg).strategy_names(),
            vec!["tag-reader", "image-library", "exiftool"]
        );
        assert_eq!(
            extractor.chain(FormatClass::HeicHeif).strategy_names(),
            vec!["heif", "exiftool-grouped", "filename-date"]
        );
        assert_eq!(
            extractor.chain(FormatClass::Raw).strategy_names(),
            vec!["tag-reader", "exiftool", "platform"]
        );
    }

    #[test]
    fn test_image_library_reads_exif_when_tag_reader_fails() {
        let temp = TempDir::new().unwrap();
        let file = temp.child("decoded.jpg");
        file.write_binary(&encoded_jpeg_with_exif(
            Some("2023:06:01 10:00:00"),
            Some(("Canon", "EOS R5")),
            Some((48.8584, 2.2945)),
        ))
        .unwrap();

        let chain = ExtractionChain::new(
            FormatClass::Jpeg,
            vec![Box::new(Failing), Box::new(ImageLibraryReader), Box::new(Fixed("exiftool"))],
        );
        let map = chain.run(&MediaFile::new(file.path())).unwrap();
        assert!(!map.contains_key("Source"));
        assert_eq!(map.get("Make"), Some(&MetadataValue::text("Canon")));
        assert_eq!(
            map.get("DateTimeOriginal"),
            Some(&MetadataValue::text("2023:06:01 10:00:00"))
        );
        assert!(map.get(GPS_INFO_KEY).and_then(|v| v.as_map()).is_some());
        let position = resolve_gps(&map).unwrap();
        assert!((position.latitude - 48.8584).abs() < 1e-3);
    }

    /// Reports one property and two timestamps, counting every query.
    #[derive(Default)]
    struct CountingSource {
        queries: AtomicUsize,
    }

    impl PlatformMetadataSource for CountingSource {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn query(&self, _path: &Path) -> Result<PlatformReport> {
            self.queries.fetch_add(1, Ordering::SeqCst);
            let mut properties = MetadataMap::new();
            properties.insert("Manufacturer".into(), MetadataValue::text("Sony"));
            Ok(PlatformReport {
                properties,
                timestamps: vec![datetime!(2021-05-06 07:08:09), datetime!(2022-01-01 00:00:00)],
            })
        }
    }

    #[test]
    fn test_video_queries_platform_once() {
        let temp = TempDir::new().unwrap();
        let file = temp.child("holiday.mov");
        file.write_binary(b"\0\0\0\x14ftypqt  ").unwrap();

        let source = Arc::new(CountingSource::default());
        let reader = VideoReader {
            source: source.clone(),
        };
        let map = reader.try_extract(&MediaFile::new(file.path())).unwrap();

        assert_eq!(source.queries.load(Ordering::SeqCst), 1);
        assert_eq!(map.get("Manufacturer"), Some(&MetadataValue::text("Sony")));
        assert_eq!(
            map.get("DateTimeOriginal"),
            Some(&MetadataValue::text("2021:05:06 07:08:09"))
        );
        assert_eq!(map.get("MediaType"), Some(&MetadataValue::text("Video")));
    }

    #[test]
    fn test_jpeg_tags_merged_with_basic_metadata() {
        let temp = TempDir::new().unwrap();
        let file = temp.child("A.jpg");
        file.write_binary(&jpeg_with_exif(
            Some("2023:06:01 10:00:00"),
            Some(("Canon", "EOS R5")),
            Some((48.8584, 2.2945)),
        ))
        .unwrap();

        let map = offline_extractor().extract(file.path());
        assert_eq!(map.get("Make"), Some(&MetadataValue::text("Canon")));
        assert_eq!(map.get("FileName"), Some(&MetadataValue::text("A.jpg")));
        assert!(has_gps_structure(&map));
    }

    #[test]
    fn test_extraction_never_fails() {
        let temp = TempDir::new().unwrap();
        let file = temp.child("broken.jpg");
        file.write_binary(b"garbage").unwrap();

        let map = offline_extractor().extract(file.path());
        assert_eq!(map.get("FileName"), Some(&MetadataValue::text("broken.jpg")));
        assert!(map.contains_key("FileModifyDate"));

        let missing = offline_extractor().extract(Path::new("/no/such/file.cr2"));
        assert_eq!(missing.get("FileName"), Some(&MetadataValue::text("file.cr2")));
    }

    #[test]
    fn test_from_config_uses_cache() {
        let temp = TempDir::new().unwrap();
        let file = temp.child("A.jpg");
        file.write_binary(&jpeg_with_exif(Some("2023:06:01 10:00:00"), None, None))
            .unwrap();
        let db = temp.child("cache.db");

        let mut config = Config::default();
        config.exiftool.program = "definitely-not-a-real-exiftool".to_string();
        config.cache.path = Some(db.to_path_buf());

        let uncached = MetadataExtractor::from_config(&config, false);
        uncached.extract(file.path());
        db.assert(predicates::path::missing());

        let cached = MetadataExtractor::from_config(&config, true);
        let first = cached.extract(file.path());
        let second = cached.extract(file.path());
        assert_eq!(second.get("DateTimeOriginal"), first.get("DateTimeOriginal"));
        assert_eq!(second.get("FileName"), first.get("FileName"));

        let stats = SqliteMetadataCache::new(db.path(), Duration::from_secs(60))
            .unwrap()
            .stats()
            .unwrap();
        assert_eq!(stats.entries, 1);
    }

    #[test]
    fn test_pixel_video() {
        let temp = TempDir::new().unwrap();
        let file = temp.child("PXL_20230602_120000123.mp4");
        file.write_binary(b"\0\0\0\x18ftypmp42").unwrap();

        let map = offline_extractor().extract(file.path());
        assert_eq!(map.get("Make"), Some(&MetadataValue::text("Google")));
        assert_eq!(map.get("CameraType"), Some(&MetadataValue::text("Google Pixel")));
        assert_eq!(
            map.get("DateTimeOriginal"),
            Some(&MetadataValue::text("2023:06:02 12:00:00"))
        );
        assert_eq!(map.get("FileSourceFromName"), Some(&MetadataValue::Bool(true)));
        assert_eq!(map.get("MediaType"), Some(&MetadataValue::text("Video")));
    }

    #[test]
    fn test_heic_falls_back_to_filename_date() {
        let temp = TempDir::new().unwrap();
        let file = temp.child("20220304_050607.heic");
        file.write_binary(b"not a heif container").unwrap();

        let map = offline_extractor().extract(file.path());
        assert_eq!(
            map.get("DateTimeOriginal"),
            Some(&MetadataValue::text("2022:03:04 05:06:07"))
        );
    }
}
