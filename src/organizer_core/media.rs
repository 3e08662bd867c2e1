use crate::organizer_core::error::{OrganizerError, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use walkdir::WalkDir;

/// Format class of a media file, which selects the extraction chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FormatClass {
    Jpeg,
    HeicHeif,
    Raw,
    Video,
    Other,
}

impl FormatClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            FormatClass::Jpeg => "jpeg",
            FormatClass::HeicHeif => "heic_heif",
            FormatClass::Raw => "raw",
            FormatClass::Video => "video",
            FormatClass::Other => "other",
        }
    }
}

impl std::fmt::Display for FormatClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// JPEG extensions (lowercase).
const JPEG_EXTENSIONS: &[&str] = &["jpg", "jpeg", "jfif", "jpe"];

const HEIC_EXTENSIONS: &[&str] = &["heic", "heif"];

/// RAW formats (lowercase).
const RAW_EXTENSIONS: &[&str] = &[
    "raw", "arw", "cr2", "cr3", "nef", "orf", "rw2", "dng", "3fr", "raf", "pef", "srw", "sr2",
    "x3f", "mef", "iiq", "rwl",
];

const VIDEO_EXTENSIONS: &[&str] = &[
    "mp4", "mov", "avi", "mkv", "wmv", "flv", "webm", "3gp", "m4v", "mpg", "mpeg", "mts", "ts",
    "vob",
];

/// Other still-image formats picked up when scanning directories.
const STANDARD_IMAGE_EXTENSIONS: &[&str] = &[
    "png", "gif", "bmp", "tiff", "tif", "webp", "svg", "psd", "jp2", "avif",
];

/// Lower-cased extension of a path without the leading dot, or an empty string.
pub fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default()
}

/// Classify a path by its extension. Never touches the filesystem.
pub fn classify(path: &Path) -> FormatClass {
    classify_extension(&extension_of(path))
}

pub fn classify_extension(ext: &str) -> FormatClass {
    let ext = ext.trim_start_matches('.').to_lowercase();
    let ext = ext.as_str();
    if JPEG_EXTENSIONS.contains(&ext) {
        FormatClass::Jpeg
    } else if HEIC_EXTENSIONS.contains(&ext) {
        FormatClass::HeicHeif
    } else if RAW_EXTENSIONS.contains(&ext) {
        FormatClass::Raw
    } else if VIDEO_EXTENSIONS.contains(&ext) {
        FormatClass::Video
    } else {
        FormatClass::Other
    }
}

/// Whether a directory scan should pick up this file.
pub fn is_supported_media(path: &Path) -> bool {
    let ext = extension_of(path);
    match classify_extension(&ext) {
        FormatClass::Other => STANDARD_IMAGE_EXTENSIONS.contains(&ext.as_str()),
        _ => true,
    }
}

/// Expand `sources` into media files. Directories are walked recursively and
/// filtered to supported extensions; files named explicitly are kept as is.
pub fn collect_media_files(sources: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for source in sources {
        if source.is_file() {
            files.push(source.clone());
        } else if source.is_dir() {
            let found: Vec<PathBuf> = WalkDir::new(source)
                .sort_by_file_name()
                .into_iter()
                .filter_map(|entry| match entry {
                    Ok(entry) => Some(entry),
                    Err(e) => {
                        log::warn!("Skipping unreadable entry: {}", e);
                        None
                    }
                })
                .filter(|entry| entry.file_type().is_file())
                .map(|entry| entry.into_path())
                .filter(|path| is_supported_media(path))
                .collect();
            log::info!("Found {} media files in {}", found.len(), source.display());
            files.extend(found);
        } else {
            return Err(OrganizerError::PathNotFound(source.clone()));
        }
    }
    Ok(files)
}

/// A media file on disk. Re-read on every extraction pass.
#[derive(Debug, Clone)]
pub struct MediaFile {
    pub path: PathBuf,
    pub extension: String,
    pub size: Option<u64>,
    pub modified: Option<SystemTime>,
    pub created: Option<SystemTime>,
}

impl MediaFile {
    /// Describe a path without requiring it to exist; filesystem attributes
    /// are filled in when available.
    pub fn new(path: &Path) -> Self {
        let meta = fs::metadata(path).ok();
        MediaFile {
            path: path.to_path_buf(),
            extension: extension_of(path),
            size: meta.as_ref().map(|m| m.len()),
            modified: meta.as_ref().and_then(|m| m.modified().ok()),
            created: meta.as_ref().and_then(|m| m.created().ok()),
        }
    }

    /// Like `new`, but fails if the path is not an existing file.
    pub fn open(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(OrganizerError::PathNotFound(path.to_path_buf()));
        }
        Ok(Self::new(path))
    }

    pub fn format(&self) -> FormatClass {
        classify_extension(&self.extension)
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .to_string()
    }

    pub fn exists(&self) -> bool {
        self.size.is_some()
    }
}
