use crate::organizer_core::extract::MetadataExtractor;
use crate::organizer_core::media::MediaFile;
use crate::organizer_core::metadata::MetadataMap;
use regex::Regex;
use serde::Serialize;
use std::path::Path;
use std::sync::LazyLock;

pub const UNKNOWN: &str = "Unknown";

/// Camera make and model, each independently defaulting to "Unknown".
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CameraIdentity {
    pub make: String,
    pub model: String,
}

impl Default for CameraIdentity {
    fn default() -> Self {
        Self {
            make: UNKNOWN.to_string(),
            model: UNKNOWN.to_string(),
        }
    }
}

impl CameraIdentity {
    pub fn new(make: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            make: make.into(),
            model: model.into(),
        }
    }

    pub fn is_unknown(&self) -> bool {
        self.make == UNKNOWN && self.model == UNKNOWN
    }

    /// "Make Model", used as a folder name.
    pub fn label(&self) -> String {
        format!("{} {}", self.make, self.model)
    }
}

impl std::fmt::Display for CameraIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

const MAKE_ALIASES: &[(&str, &str)] = &[
    ("Google Inc", "Google"),
    ("Google Inc.", "Google"),
    ("Samsung Electronics", "Samsung"),
    ("Samsung Electronics Co., Ltd.", "Samsung"),
    ("Samsung Electronics Co.,Ltd.", "Samsung"),
    ("Samsung Electronics Co., Ltd", "Samsung"),
    ("Samsung Electronics Co.,Ltd", "Samsung"),
];

const MODEL_ALIASES: &[(&str, &str)] = &[
    ("SM-S911B", "Galaxy S23"),
    ("SM-S911U", "Galaxy S23"),
    ("SM-S911W", "Galaxy S23"),
    ("SM-S911N", "Galaxy S23"),
    ("SM-S9110", "Galaxy S23"),
    ("SM-S911B/DS", "Galaxy S23"),
    ("SM-S911U1", "Galaxy S23"),
    ("SM-S911W/DS", "Galaxy S23"),
    ("SM-S911N/DS", "Galaxy S23"),
    ("SM-S9110/DS", "Galaxy S23"),
    ("Pixel 6", "Pixel"),
    ("Pixel 6 Pro", "Pixel"),
    ("Pixel 7", "Pixel"),
    ("Pixel 7 Pro", "Pixel"),
    ("Pixel 8", "Pixel"),
    ("Pixel 8 Pro", "Pixel"),
];

static SAMSUNG_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{4})(\d{2})(\d{2})_\d{6}(?:_\d+)?(?:\.\w+)?$").expect("pattern must compile")
});

static PIXEL_VIDEO_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^PXL_\d{8}_\d{6}\.mp4$").expect("pattern must compile")
});

/// Camera identity from `Make`/`Model`, completed from the file name.
///
/// The name is taken from `file_name` or, failing that, the `FileName`
/// entry of the map. Canonical display names are produced when
/// `format_output` is set.
pub fn resolve_camera(metadata: &MetadataMap, file_name: Option<&str>, format_output: bool) -> CameraIdentity {
    let field = |key: &str| {
        metadata
            .get(key)
            .map(|v| v.to_text().trim().replace('_', " "))
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| UNKNOWN.to_string())
    };
    let mut identity = CameraIdentity::new(field("Make"), field("Model"));

    let name = file_name
        .map(str::to_string)
        .or_else(|| metadata.get("FileName").map(|v| v.to_text()));
    if let Some(name) = name {
        identity = deduce_from_filename(&name, identity);
    }

    if format_output {
        identity = canonicalize(&identity.make, &identity.model);
    }
    identity
}

/// Extract metadata for `path` and resolve its camera.
pub fn resolve_camera_for_path(extractor: &MetadataExtractor, path: &Path, format_output: bool) -> CameraIdentity {
    let file = MediaFile::new(path);
    let metadata = extractor.extract_file(&file);
    resolve_camera(&metadata, Some(&file.file_name()), format_output)
}

/// Fill fields that are still "Unknown" from well-known phone file names.
/// Populated fields are never overwritten.
pub fn deduce_from_filename(name: &str, identity: CameraIdentity) -> CameraIdentity {
    if identity.make != UNKNOWN && identity.model != UNKNOWN {
        return identity;
    }
    let model_unknown = identity.model == UNKNOWN;
    let fill = |current: String, guess: &str| {
        if current == UNKNOWN {
            guess.to_string()
        } else {
            current
        }
    };

    if name.starts_with("IMG_") && (name.ends_with(".HEIC") || name.ends_with(".heic")) {
        return CameraIdentity::new(fill(identity.make, "Apple"), fill(identity.model, "iPhone"));
    }

    if let Some(c) = SAMSUNG_NAME.captures(name) {
        let year: i32 = c[1].parse().unwrap_or(0);
        let month: u8 = c[2].parse().unwrap_or(0);
        let day: u8 = c[3].parse().unwrap_or(0);
        let valid = (2000..=2100).contains(&year)
            && time::Month::try_from(month)
                .ok()
                .and_then(|m| time::Date::from_calendar_date(year, m, day).ok())
                .is_some();
        if valid {
            return CameraIdentity::new(fill(identity.make, "Samsung"), fill(identity.model, "Galaxy S23"));
        }
        return identity;
    }

    if name.starts_with("PXL_") {
        let model = if model_unknown && PIXEL_VIDEO_NAME.is_match(name) {
            "Pixel Video".to_string()
        } else {
            fill(identity.model, "Pixel")
        };
        return CameraIdentity::new(fill(identity.make, "Google"), model);
    }

    identity
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn alias(value: &str, table: &[(&str, &'static str)]) -> Option<&'static str> {
    table
        .iter()
        .find(|(raw, _)| raw.eq_ignore_ascii_case(value))
        .map(|(_, canonical)| *canonical)
}

/// Map known vendor strings and model codes to display names, then apply
/// word casing. Idempotent.
pub fn canonicalize(make: &str, model: &str) -> CameraIdentity {
    let normalize = |value: &str, table: &[(&str, &'static str)]| {
        let value = collapse_whitespace(value);
        if value.is_empty() {
            return UNKNOWN.to_string();
        }
        let value = alias(&value, table).map(str::to_string).unwrap_or(value);
        word_case(&value)
    };
    CameraIdentity::new(normalize(make, MAKE_ALIASES), normalize(model, MODEL_ALIASES))
}

/// Case each ASCII alphanumeric run of every word: runs of up to four
/// characters are upper-cased, longer all-digit runs are kept, anything else
/// is capitalized. Other characters are kept as separators.
pub fn word_case(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut run = String::new();
    for c in value.chars() {
        if c.is_ascii_alphanumeric() {
            run.push(c);
        } else {
            flush_run(&mut run, &mut out);
            out.push(c);
        }
    }
    flush_run(&mut run, &mut out);
    out
}

fn flush_run(run: &mut String, out: &mut String) {
    if run.is_empty() {
        return;
    }
    if run.len() <= 4 {
        out.push_str(&run.to_ascii_uppercase());
    } else if run.chars().all(|c| c.is_ascii_digit()) {
        out.push_str(run);
    } else {
        let lower = run.to_ascii_lowercase();
        let mut chars = lower.chars();
        if let Some(first) = chars.next() {
            out.push(first.to_ascii_uppercase());
            out.push_str(chars.as_str());
        }
    }
    run.clear();
}
