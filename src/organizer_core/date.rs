//! Capture-date inference: EXIF fields, then filename conventions, then
//! filesystem timestamps.

use crate::organizer_core::extract::MetadataExtractor;
use crate::organizer_core::media::MediaFile;
use crate::organizer_core::metadata::MetadataMap;
use regex::{Captures, Regex};
use std::fmt;
use std::path::Path;
use std::sync::{LazyLock, OnceLock};
use std::time::SystemTime;
use time::format_description::FormatItem;
use time::macros::format_description;
use time::{Date, Month, OffsetDateTime, PrimitiveDateTime, Time, UtcOffset};

/// Date format used in EXIF data.
pub const EXIF_DATE_FORMAT: &[FormatItem<'static>] =
    format_description!("[year]:[month]:[day] [hour]:[minute]:[second]");

/// Accepted EXIF date-time layouts, tried in order.
const EXIF_DATE_FORMATS: &[&[FormatItem<'static>]] = &[
    EXIF_DATE_FORMAT,
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second]"),
    format_description!("[year]/[month]/[day] [hour]:[minute]:[second]"),
    format_description!("[year]:[month]:[day] [hour]:[minute]:[second].[subsecond]"),
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second].[subsecond]"),
    format_description!("[year]/[month]/[day] [hour]:[minute]:[second].[subsecond]"),
];

/// EXIF fields holding a capture date, highest priority first.
pub const EXIF_DATE_FIELDS: &[&str] = &[
    "DateTimeOriginal",
    "DateTime",
    "CreateDate",
    "DateTimeDigitized",
    "ModifyDate",
    "TrackCreateDate",
    "MediaCreateDate",
];

/// Where a resolved date came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateOrigin {
    Exif(&'static str),
    Filename(&'static str),
    FileCreation,
    FileModification,
}

impl fmt::Display for DateOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DateOrigin::Exif(field) => write!(f, "exif:{}", field),
            DateOrigin::Filename(class) => write!(f, "filename:{}", class),
            DateOrigin::FileCreation => write!(f, "file:creation"),
            DateOrigin::FileModification => write!(f, "file:modification"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedDate {
    pub date: PrimitiveDateTime,
    pub origin: DateOrigin,
}

impl ResolvedDate {
    fn new(date: PrimitiveDateTime, origin: DateOrigin) -> Self {
        Self { date, origin }
    }
}

/// Origin label for reports, `none` when nothing was resolved.
pub fn origin_label(resolved: Option<&ResolvedDate>) -> String {
    resolved
        .map(|r| r.origin.to_string())
        .unwrap_or_else(|| "none".to_string())
}

static LOCAL_OFFSET: OnceLock<UtcOffset> = OnceLock::new();

/// Local timezone offset, falling back to UTC if unavailable. The first call
/// should happen before any thread is spawned.
pub fn local_offset() -> UtcOffset {
    *LOCAL_OFFSET.get_or_init(|| UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC))
}

pub fn system_time_to_local(time: SystemTime) -> PrimitiveDateTime {
    let dt = OffsetDateTime::from(time).to_offset(local_offset());
    PrimitiveDateTime::new(dt.date(), dt.time())
}

pub fn format_exif_date(date: &PrimitiveDateTime) -> Option<String> {
    date.format(EXIF_DATE_FORMAT).ok()
}

/// Parse an EXIF-style date string against every accepted layout.
pub fn parse_exif_datetime(value: &str) -> Option<PrimitiveDateTime> {
    let value = value.trim_matches(|c: char| c.is_whitespace() || c == '\0');
    EXIF_DATE_FORMATS
        .iter()
        .find_map(|format| PrimitiveDateTime::parse(value, format).ok())
}

/// Resolve the capture date of `path`.
///
/// A bare filename (no directory component) is matched against the filename
/// conventions before the file is ever opened, so callers can probe names
/// without touching disk.
pub fn resolve_date(
    extractor: &MetadataExtractor,
    path: &Path,
    fallback_to_file_date: bool,
) -> Option<ResolvedDate> {
    let file = MediaFile::new(path);
    let bare = path.parent().is_none_or(|p| p.as_os_str().is_empty());

    if bare {
        if let Some(resolved) = date_from_filename(&file.file_name()) {
            return Some(resolved);
        }
    }

    let metadata = if file.exists() {
        extractor.extract_file(&file)
    } else {
        log::debug!("{} does not exist, skipping EXIF dates", path.display());
        MetadataMap::new()
    };
    resolve(&file, &metadata, !bare, fallback_to_file_date)
}

/// Resolve the capture date from an already-extracted metadata map.
pub fn resolve_date_with(
    file: &MediaFile,
    metadata: &MetadataMap,
    fallback_to_file_date: bool,
) -> Option<ResolvedDate> {
    resolve(file, metadata, true, fallback_to_file_date)
}

fn resolve(
    file: &MediaFile,
    metadata: &MetadataMap,
    try_filename: bool,
    fallback_to_file_date: bool,
) -> Option<ResolvedDate> {
    if let Some(resolved) = date_from_metadata(metadata) {
        return Some(resolved);
    }
    if try_filename {
        if let Some(resolved) = date_from_filename(&file.file_name()) {
            return Some(resolved);
        }
    }
    if fallback_to_file_date {
        return date_from_filesystem(file);
    }
    log::debug!("No date found for {}", file.path.display());
    None
}

/// First EXIF date field, in priority order, whose text value parses.
pub fn date_from_metadata(metadata: &MetadataMap) -> Option<ResolvedDate> {
    EXIF_DATE_FIELDS.iter().find_map(|field| {
        let text = metadata.get(*field)?.as_text()?;
        let date = parse_exif_datetime(text);
        if date.is_none() {
            log::debug!("Unparseable {} value: {:?}", field, text);
        }
        date.map(|d| ResolvedDate::new(d, DateOrigin::Exif(field)))
    })
}

/// Match a file name against vendor conventions, then generic date layouts.
pub fn date_from_filename(name: &str) -> Option<ResolvedDate> {
    for (vendor, patterns) in VENDOR_PATTERNS.iter() {
        if let Some(date) = patterns.iter().find_map(|p| p.apply(name)) {
            return Some(ResolvedDate::new(date, DateOrigin::Filename(vendor)));
        }
    }
    GENERIC_PATTERNS
        .iter()
        .find_map(|p| p.apply(name))
        .map(|date| ResolvedDate::new(date, DateOrigin::Filename("generic")))
}

/// Creation time when the platform records it, modification time otherwise.
pub fn date_from_filesystem(file: &MediaFile) -> Option<ResolvedDate> {
    if let Some(created) = file.created {
        return Some(ResolvedDate::new(
            system_time_to_local(created),
            DateOrigin::FileCreation,
        ));
    }
    file.modified.map(|modified| {
        ResolvedDate::new(
            system_time_to_local(modified),
            DateOrigin::FileModification,
        )
    })
}

type ParseFn = fn(&Captures<'_>) -> Option<PrimitiveDateTime>;

struct FilenamePattern {
    regex: Regex,
    parse: ParseFn,
}

impl FilenamePattern {
    fn new(pattern: &str, parse: ParseFn) -> Self {
        Self {
            regex: Regex::new(pattern).expect("filename date pattern must compile"),
            parse,
        }
    }

    /// Only the first match of each pattern is considered.
    fn apply(&self, name: &str) -> Option<PrimitiveDateTime> {
        let captures = self.regex.captures(name)?;
        (self.parse)(&captures)
    }
}

static VENDOR_PATTERNS: LazyLock<Vec<(&'static str, Vec<FilenamePattern>)>> =
    LazyLock::new(|| {
        vec![
            (
                "samsung",
                vec![
                    FilenamePattern::new(
                        r"(\d{8})_(\d{6})(?:_\d+)?\.(?:heic|heif|jpg|jpeg|mp4)$",
                        |c| compact_datetime(&c[1], &c[2]),
                    ),
                    FilenamePattern::new(r"^(\d{8})_(\d{6})(?:_\d+)?$", |c| {
                        compact_datetime(&c[1], &c[2])
                    }),
                ],
            ),
            (
                "iphone",
                vec![
                    FilenamePattern::new(r"^IMG_(\d{8})_(\d{6})\.", |c| {
                        compact_datetime(&c[1], &c[2])
                    }),
                    // IMG_YMDD: two-digit year, then single-digit month and day.
                    FilenamePattern::new(r"^IMG_(\d{4})$", |c| {
                        let d = &c[1];
                        datetime(2000 + number::<i32>(&d[..2])?, number(&d[2..3])?, number(&d[3..4])?, 0, 0, 0)
                    }),
                ],
            ),
            (
                "pixel",
                vec![FilenamePattern::new(
                    r"PXL_(\d{8})_(\d{9})_?(?:MP|TS)?",
                    |c| compact_datetime(&c[1], &c[2][..6]),
                )],
            ),
            (
                "whatsapp",
                vec![
                    FilenamePattern::new(r"IMG-(\d{8})-WA", |c| compact_date(&c[1])),
                    FilenamePattern::new(r"VID-(\d{8})-WA\d{4}", |c| compact_date(&c[1])),
                ],
            ),
            (
                "gopro",
                vec![FilenamePattern::new(
                    r"GoPro(\d{2})(\d{2})(\d{2})_(\d{2})(\d{2})(\d{2})",
                    |c| {
                        datetime(
                            2000 + number::<i32>(&c[1])?,
                            number(&c[2])?,
                            number(&c[3])?,
                            number(&c[4])?,
                            number(&c[5])?,
                            number(&c[6])?,
                        )
                    },
                )],
            ),
            (
                "dji",
                vec![FilenamePattern::new(r"DJI_(\d{8})_(\d{6})(_\d+)?", |c| {
                    compact_datetime(&c[1], &c[2])
                })],
            ),
        ]
    });

static GENERIC_PATTERNS: LazyLock<Vec<FilenamePattern>> = LazyLock::new(|| {
    vec![
        FilenamePattern::new(r"(?:^|[^0-9])(\d{8})_(\d{6})(?:[^0-9]|$)", |c| {
            compact_datetime(&c[1], &c[2])
        }),
        FilenamePattern::new(
            r"(\d{4})-(\d{2})-(\d{2})[\s_-](\d{2})[-_](\d{2})[-_](\d{2})",
            |c| {
                datetime(
                    number(&c[1])?,
                    number(&c[2])?,
                    number(&c[3])?,
                    number(&c[4])?,
                    number(&c[5])?,
                    number(&c[6])?,
                )
            },
        ),
        // Day-first is tried before month-first; there is no way to tell them apart.
        FilenamePattern::new(r"(\d{2})[.-](\d{2})[.-](\d{4})", |c| {
            let (first, second, year) = (number(&c[1])?, number(&c[2])?, number(&c[3])?);
            datetime(year, second, first, 0, 0, 0).or_else(|| datetime(year, first, second, 0, 0, 0))
        }),
        FilenamePattern::new(r"(\d{2})[-_]([A-Za-z]{3})[-_](\d{4})", |c| {
            datetime(number(&c[3])?, month_from_abbreviation(&c[2])?, number(&c[1])?, 0, 0, 0)
        }),
        FilenamePattern::new(r"(?:^|[^0-9])(\d{4})(\d{2})(\d{2})(?:[^0-9]|$)", |c| {
            let (year, month, day) = (number::<i32>(&c[1])?, number::<u8>(&c[2])?, number::<u8>(&c[3])?);
            if !(1900..=2100).contains(&year) || !(1..=12).contains(&month) || !(1..=31).contains(&day) {
                return None;
            }
            datetime(year, month, day, 0, 0, 0)
        }),
    ]
});

fn number<T: std::str::FromStr>(digits: &str) -> Option<T> {
    digits.parse().ok()
}

fn datetime(
    year: i32,
    month: u8,
    day: u8,
    hour: u8,
    minute: u8,
    second: u8,
) -> Option<PrimitiveDateTime> {
    let month = Month::try_from(month).ok()?;
    let date = Date::from_calendar_date(year, month, day).ok()?;
    let time = Time::from_hms(hour, minute, second).ok()?;
    Some(PrimitiveDateTime::new(date, time))
}

/// `YYYYMMDD` + `HHMMSS`.
fn compact_datetime(date: &str, time: &str) -> Option<PrimitiveDateTime> {
    if date.len() != 8 || time.len() != 6 {
        return None;
    }
    datetime(
        number(&date[..4])?,
        number(&date[4..6])?,
        number(&date[6..8])?,
        number(&time[..2])?,
        number(&time[2..4])?,
        number(&time[4..6])?,
    )
}

fn compact_date(date: &str) -> Option<PrimitiveDateTime> {
    compact_datetime(date, "000000")
}

fn month_from_abbreviation(name: &str) -> Option<u8> {
    const MONTHS: [&str; 12] = [
        "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
    ];
    let name = name.to_ascii_lowercase();
    MONTHS
        .iter()
        .position(|m| *m == name)
        .map(|i| i as u8 + 1)
}

/// Parse a WMIC timestamp such as `20230817080632.333836+120`. The zone
/// suffix is ignored.
pub fn parse_wmic_datetime(value: &str) -> Option<PrimitiveDateTime> {
    static WMIC_DATE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"^(\d{4})(\d{2})(\d{2})(\d{2})(\d{2})(\d{2})\.(\d+)(?:\+\d+)?")
            .expect("WMIC date pattern must compile")
    });
    let c = WMIC_DATE.captures(value.trim())?;
    let base = datetime(
        number(&c[1])?,
        number(&c[2])?,
        number(&c[3])?,
        number(&c[4])?,
        number(&c[5])?,
        number(&c[6])?,
    )?;
    let fraction = &c[7];
    let micros: u32 = format!("{:0<6}", &fraction[..fraction.len().min(6)])
        .parse()
        .ok()?;
    base.replace_microsecond(micros).ok()
}
