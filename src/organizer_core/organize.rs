//! Batch organization: resolve each file's attributes, build its destination
//! directory and copy or move it there.
//!
//! A batch never fails as a whole once started. Per-file problems are
//! recorded in the returned [`OrganizeResult`]; only an unusable destination
//! root aborts the batch, and then every input file is reported as an error.

use crate::organizer_core::camera::resolve_camera;
use crate::organizer_core::config::{OrganizeSettings, TransferMode};
use crate::organizer_core::date::{ResolvedDate, format_exif_date, origin_label, resolve_date_with};
use crate::organizer_core::error::{OrganizerError, Result, TransferFailures};
use crate::organizer_core::extract::MetadataExtractor;
use crate::organizer_core::geocode::Geocoder;
use crate::organizer_core::gps::resolve_gps;
use crate::organizer_core::journal::{JournalEntry, NullJournal, OperationJournal};
use crate::organizer_core::location::group_by_distance;
use crate::organizer_core::media::MediaFile;
use crate::organizer_core::progress::{CancellationToken, ProgressSink, ProgressUpdate, percent_of};
use clap::ValueEnum;
use crossbeam_channel::{Receiver, unbounded};
use filetime::FileTime;
use regex::Regex;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::thread::JoinHandle;
use time::PrimitiveDateTime;

const WRITE_TEST_FILE: &str = ".write_test";
const MAX_FOLDER_CHARS: usize = 80;

/// Folder for files without a usable GPS position.
pub const NO_GPS_FOLDER: &str = "No GPS";

static ILLEGAL_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[<>:"/\\|?*]"#).expect("pattern must compile"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Criterion {
    Date,
    Camera,
    Location,
}

impl Criterion {
    /// Highest priority first; used when only one criterion may apply.
    pub const PRIORITY: [Criterion; 3] = [Criterion::Date, Criterion::Camera, Criterion::Location];
}

impl fmt::Display for Criterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Criterion::Date => write!(f, "date"),
            Criterion::Camera => write!(f, "camera"),
            Criterion::Location => write!(f, "location"),
        }
    }
}

/// Directory layout of the date segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum DateLayout {
    /// `YYYY/MM/YYYY_MM_DD`
    #[default]
    YearMonthDayTree,
    /// `YYYY/YYYY_MM`
    YearMonthTree,
    Year,
    YearMonth,
    YearMonthDay,
    DayMonthYear,
    MonthYear,
}

impl DateLayout {
    pub const ALL: [DateLayout; 7] = [
        DateLayout::YearMonthDayTree,
        DateLayout::YearMonthTree,
        DateLayout::Year,
        DateLayout::YearMonth,
        DateLayout::YearMonthDay,
        DateLayout::DayMonthYear,
        DateLayout::MonthYear,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DateLayout::YearMonthDayTree => "year/month/day",
            DateLayout::YearMonthTree => "year/month",
            DateLayout::Year => "year",
            DateLayout::YearMonth => "year_month",
            DateLayout::YearMonthDay => "year_month_day",
            DateLayout::DayMonthYear => "day_month_year",
            DateLayout::MonthYear => "month_year",
        }
    }

    /// Unknown names fall back to the default layout.
    pub fn parse(value: &str) -> Self {
        let value = value.trim();
        Self::ALL
            .iter()
            .copied()
            .find(|layout| layout.as_str().eq_ignore_ascii_case(value))
            .unwrap_or_else(|| {
                log::warn!("Unknown date format '{}', using {}", value, Self::default().as_str());
                Self::default()
            })
    }

    /// Directory components for `date`, outermost first.
    pub fn segments(&self, date: &PrimitiveDateTime) -> Vec<String> {
        let year = format!("{:04}", date.year());
        let month = format!("{:02}", u8::from(date.month()));
        let day = format!("{:02}", date.day());
        match self {
            DateLayout::YearMonthDayTree => {
                let leaf = format!("{}_{}_{}", year, month, day);
                vec![year, month, leaf]
            }
            DateLayout::YearMonthTree => {
                let leaf = format!("{}_{}", year, month);
                vec![year, leaf]
            }
            DateLayout::Year => vec![year],
            DateLayout::YearMonth => vec![format!("{}_{}", year, month)],
            DateLayout::YearMonthDay => vec![format!("{}_{}_{}", year, month, day)],
            DateLayout::DayMonthYear => vec![format!("{}_{}_{}", day, month, year)],
            DateLayout::MonthYear => vec![format!("{}_{}", month, year)],
        }
    }
}

impl fmt::Display for DateLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum OrganizeMode {
    /// One criterion only.
    Single(Criterion),
    /// Nested segments in the given order.
    Multilayer(Vec<Criterion>),
    /// One folder per proximity group, named after the group's anchor.
    LocationGroups { max_distance_km: f64 },
}

impl OrganizeMode {
    /// Pick the mode for a set of enabled criteria. Without `multilayer`
    /// the highest-priority criterion wins; with it the given order is kept.
    pub fn select(enabled: &[Criterion], multilayer: bool) -> Option<Self> {
        let mut seen = HashSet::new();
        let ordered: Vec<Criterion> = enabled.iter().copied().filter(|c| seen.insert(*c)).collect();
        if ordered.is_empty() {
            return None;
        }
        if multilayer {
            return Some(OrganizeMode::Multilayer(ordered));
        }
        let chosen = Criterion::PRIORITY.into_iter().find(|c| ordered.contains(c))?;
        if ordered.len() > 1 {
            log::warn!("Several criteria given without multilayer mode, organizing by {} only", chosen);
        }
        Some(OrganizeMode::Single(chosen))
    }

    pub fn criteria(&self) -> &[Criterion] {
        match self {
            OrganizeMode::Single(criterion) => std::slice::from_ref(criterion),
            OrganizeMode::Multilayer(criteria) => criteria,
            OrganizeMode::LocationGroups { .. } => &[],
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrganizeOptions {
    pub destination: PathBuf,
    pub mode: OrganizeMode,
    pub date_layout: DateLayout,
    pub transfer: TransferMode,
    /// Plan destinations without touching the filesystem.
    pub dry_run: bool,
}

impl OrganizeOptions {
    pub fn new(destination: impl Into<PathBuf>, mode: OrganizeMode) -> Self {
        Self {
            destination: destination.into(),
            mode,
            date_layout: DateLayout::default(),
            transfer: TransferMode::Copy,
            dry_run: false,
        }
    }

    pub fn from_settings(destination: impl Into<PathBuf>, mode: OrganizeMode, settings: &OrganizeSettings) -> Self {
        Self {
            date_layout: DateLayout::parse(&settings.date_format),
            transfer: settings.transfer,
            ..Self::new(destination, mode)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Processed,
    Skipped,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileOutcome {
    pub source: PathBuf,
    pub destination: Option<PathBuf>,
    pub status: FileStatus,
    pub date: Option<String>,
    pub date_origin: String,
    pub message: Option<String>,
}

impl FileOutcome {
    fn new(source: &Path, status: FileStatus, date: Option<&ResolvedDate>) -> Self {
        Self {
            source: source.to_path_buf(),
            destination: None,
            status,
            date: date.and_then(|d| format_exif_date(&d.date)),
            date_origin: origin_label(date),
            message: None,
        }
    }

    fn error(source: &Path, date: Option<&ResolvedDate>, message: impl ToString) -> Self {
        Self {
            message: Some(message.to_string()),
            ..Self::new(source, FileStatus::Error, date)
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OrganizeResult {
    pub total: usize,
    pub processed: usize,
    pub skipped: usize,
    pub errors: usize,
    pub cancelled: bool,
    pub dry_run: bool,
    /// Batch-level messages, such as an unusable destination.
    pub messages: Vec<String>,
    pub details: Vec<FileOutcome>,
}

impl OrganizeResult {
    fn new(total: usize, dry_run: bool) -> Self {
        Self {
            total,
            dry_run,
            ..Self::default()
        }
    }

    fn push(&mut self, outcome: FileOutcome) {
        match outcome.status {
            FileStatus::Processed => self.processed += 1,
            FileStatus::Skipped => self.skipped += 1,
            FileStatus::Error => self.errors += 1,
        }
        self.details.push(outcome);
    }

    /// Files that could not be placed.
    pub fn failures(&self) -> TransferFailures {
        let mut failures = TransferFailures::new();
        for outcome in self.details.iter().filter(|o| o.status == FileStatus::Error) {
            failures.add(
                outcome.source.clone(),
                outcome.destination.clone().unwrap_or_default(),
                outcome.message.as_deref().unwrap_or("unknown error"),
            );
        }
        failures
    }

    pub fn is_success(&self) -> bool {
        self.errors == 0 && !self.cancelled
    }
}

/// Replace characters that are illegal in folder names and cap the length.
pub fn sanitize_folder_name(name: &str) -> String {
    let cleaned = ILLEGAL_CHARS.replace_all(name.trim(), "_");
    let truncated: String = cleaned.chars().take(MAX_FOLDER_CHARS).collect();
    let truncated = truncated.trim();
    if truncated.is_empty() {
        "Unknown".to_string()
    } else if truncated.chars().all(|c| c == '.') {
        // "." and ".." would not stay below the destination root
        "_".to_string()
    } else {
        truncated.to_string()
    }
}

/// `candidate`, or `<stem>_<n><.ext>` with the smallest n >= 1 not taken.
pub fn unique_destination(candidate: &Path, taken: impl Fn(&Path) -> bool) -> PathBuf {
    if !taken(candidate) {
        return candidate.to_path_buf();
    }
    let parent = candidate.parent().unwrap_or_else(|| Path::new(""));
    let stem = candidate
        .file_stem()
        .unwrap_or_default()
        .to_string_lossy()
        .to_string();
    let ext = candidate
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    let mut counter = 1u32;
    loop {
        let next = parent.join(format!("{}_{}{}", stem, counter, ext));
        if !taken(&next) {
            return next;
        }
        counter += 1;
    }
}

/// Create `root` if needed and prove it is writable.
pub fn ensure_writable_destination(root: &Path) -> Result<()> {
    let unavailable = |e: std::io::Error| OrganizerError::DestinationUnavailable {
        path: root.to_path_buf(),
        reason: e.to_string(),
    };
    fs::create_dir_all(root).map_err(unavailable)?;
    let probe = root.join(WRITE_TEST_FILE);
    fs::write(&probe, b"test").map_err(unavailable)?;
    fs::remove_file(&probe).map_err(unavailable)?;
    Ok(())
}

fn copy_preserving_times(source: &Path, destination: &Path) -> Result<()> {
    let meta = fs::metadata(source)?;
    let mut reader = File::open(source)?;
    let mut writer = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(destination)?;
    if let Err(e) = io::copy(&mut reader, &mut writer) {
        drop(writer);
        let _ = fs::remove_file(destination);
        return Err(e.into());
    }
    drop(writer);
    filetime::set_file_times(
        destination,
        FileTime::from_last_access_time(&meta),
        FileTime::from_last_modification_time(&meta),
    )?;
    fs::set_permissions(destination, meta.permissions())?;
    Ok(())
}

/// Copy (keeping permissions and timestamps) or move `source` to
/// `destination`, creating parent directories. An existing `destination` is
/// never replaced; that case fails with `ErrorKind::AlreadyExists`.
pub fn transfer_file(source: &Path, destination: &Path, mode: TransferMode) -> Result<()> {
    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent)?;
    }
    match mode {
        TransferMode::Copy => copy_preserving_times(source, destination),
        TransferMode::Move => match fs::hard_link(source, destination) {
            Ok(()) => {
                fs::remove_file(source)?;
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Err(e.into()),
            Err(e) => {
                log::debug!(
                    "Linking {} failed ({}), copying then removing",
                    source.display(),
                    e
                );
                copy_preserving_times(source, destination)?;
                fs::remove_file(source)?;
                Ok(())
            }
        },
    }
}

fn is_already_exists(error: &OrganizerError) -> bool {
    matches!(error, OrganizerError::Io(e) if e.kind() == ErrorKind::AlreadyExists)
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Runs organize batches. Collaborators are injected at construction.
pub struct Organizer {
    extractor: MetadataExtractor,
    geocoder: Box<dyn Geocoder>,
    journal: Box<dyn OperationJournal>,
    options: OrganizeOptions,
}

impl Organizer {
    pub fn new(extractor: MetadataExtractor, geocoder: Box<dyn Geocoder>, options: OrganizeOptions) -> Self {
        Self {
            extractor,
            geocoder,
            journal: Box::new(NullJournal),
            options,
        }
    }

    pub fn with_journal(mut self, journal: Box<dyn OperationJournal>) -> Self {
        self.journal = journal;
        self
    }

    /// Run a batch on a worker thread.
    pub fn spawn(mut self, files: Vec<PathBuf>) -> OrganizeHandle {
        let (tx, rx) = unbounded::<ProgressUpdate>();
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let thread = std::thread::spawn(move || self.run(&files, &tx, &token));
        OrganizeHandle {
            progress: rx,
            cancel,
            thread,
        }
    }

    /// Organize `files` on the current thread. Progress is reported after
    /// each file; cancellation is checked before each file.
    pub fn run(
        &mut self,
        files: &[PathBuf],
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> OrganizeResult {
        let mut result = OrganizeResult::new(files.len(), self.options.dry_run);
        log::info!(
            "Organizing {} files into {} ({:?}, {}{})",
            files.len(),
            self.options.destination.display(),
            self.options.mode,
            self.options.transfer,
            if self.options.dry_run { ", dry run" } else { "" }
        );

        if files.is_empty() {
            result.messages.push("No files to process".to_string());
            progress.update(100, "Nothing to do");
            return result;
        }
        if cancel.is_cancelled() {
            log::info!("Cancelled before start");
            result.cancelled = true;
            return result;
        }
        if !self.options.dry_run {
            if let Err(e) = ensure_writable_destination(&self.options.destination) {
                log::error!("{}", e);
                result.messages.push(e.to_string());
                for path in files {
                    result.push(FileOutcome::error(path, None, &e));
                }
                return result;
            }
        }

        match self.options.mode.clone() {
            OrganizeMode::LocationGroups { max_distance_km } => {
                self.run_location_groups(files, max_distance_km, progress, cancel, &mut result)
            }
            _ => self.run_criteria(files, progress, cancel, &mut result),
        }

        log::info!(
            "Done: {} processed, {} skipped, {} errors out of {}{}",
            result.processed,
            result.skipped,
            result.errors,
            result.total,
            if result.cancelled { " (cancelled)" } else { "" }
        );
        result
    }

    fn run_criteria(
        &mut self,
        files: &[PathBuf],
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
        result: &mut OrganizeResult,
    ) {
        let mut planned = HashSet::new();
        for (i, path) in files.iter().enumerate() {
            if cancel.is_cancelled() {
                log::info!("Cancelled after {} of {} files", i, files.len());
                result.cancelled = true;
                return;
            }
            log::debug!("[{}/{}] {}", i + 1, files.len(), path.display());

            let outcome = match self.directory_for(path) {
                Ok((dir, date)) => self.place(path, &dir, date.as_ref(), &mut planned),
                Err(e) => {
                    log::error!("Failed to process {}: {}", path.display(), e);
                    FileOutcome::error(path, None, e)
                }
            };
            result.push(outcome);
            progress.update(percent_of(i + 1, files.len()), &format!("Processed {}", path.display()));
        }
    }

    /// Destination directory of one file under the enabled criteria.
    fn directory_for(&self, path: &Path) -> Result<(PathBuf, Option<ResolvedDate>)> {
        let file = MediaFile::open(path)?;
        let metadata = self.extractor.extract_file(&file);
        let date = resolve_date_with(&file, &metadata, true);
        let mut dir = self.options.destination.clone();

        for criterion in self.options.mode.criteria() {
            match criterion {
                Criterion::Date => match &date {
                    Some(resolved) => dir.extend(self.options.date_layout.segments(&resolved.date)),
                    None => log::warn!("No date found for {}", path.display()),
                },
                Criterion::Camera => {
                    let camera = resolve_camera(&metadata, Some(&file.file_name()), true);
                    dir.push(sanitize_folder_name(&camera.label()));
                }
                Criterion::Location => match resolve_gps(&metadata) {
                    Some(coordinate) => {
                        dir.push(sanitize_folder_name(&self.geocoder.place_name(coordinate)))
                    }
                    None => log::warn!("No GPS position for {}", path.display()),
                },
            }
        }
        Ok((dir, date))
    }

    fn run_location_groups(
        &mut self,
        files: &[PathBuf],
        max_distance_km: f64,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
        result: &mut OrganizeResult,
    ) {
        let mut located = Vec::with_capacity(files.len());
        let mut dates = HashMap::new();
        for (i, path) in files.iter().enumerate() {
            if cancel.is_cancelled() {
                result.cancelled = true;
                return;
            }
            let file = MediaFile::new(path);
            let gps = if file.exists() {
                let metadata = self.extractor.extract_file(&file);
                if let Some(date) = resolve_date_with(&file, &metadata, true) {
                    dates.insert(path.clone(), date);
                }
                resolve_gps(&metadata)
            } else {
                None
            };
            located.push((path.clone(), gps));
            progress.update(percent_of(i + 1, files.len()) / 2, &format!("Located {}", path.display()));
        }

        let mut planned = HashSet::new();
        let mut done = 0;
        for group in group_by_distance(&located, max_distance_km) {
            let folder = match group.anchor {
                Some(anchor) => sanitize_folder_name(&self.geocoder.place_name(anchor)),
                None => NO_GPS_FOLDER.to_string(),
            };
            let dir = self.options.destination.join(folder);
            for path in &group.files {
                if cancel.is_cancelled() {
                    log::info!("Cancelled after {} of {} files", done, files.len());
                    result.cancelled = true;
                    return;
                }
                let outcome = self.place(path, &dir, dates.get(path), &mut planned);
                result.push(outcome);
                done += 1;
                progress.update(
                    50 + percent_of(done, files.len()) / 2,
                    &format!("Processed {}", path.display()),
                );
            }
        }
    }

    /// Resolve collisions and transfer one file into `dir`.
    fn place(
        &mut self,
        source: &Path,
        dir: &Path,
        date: Option<&ResolvedDate>,
        planned: &mut HashSet<PathBuf>,
    ) -> FileOutcome {
        if !source.is_file() {
            return FileOutcome::error(source, date, format!("File does not exist: {}", source.display()));
        }
        let Some(name) = source.file_name() else {
            return FileOutcome::error(source, date, "Path has no file name");
        };

        let natural = dir.join(name);
        if same_file(source, &natural) {
            log::info!("{} is already in place", source.display());
            return FileOutcome {
                destination: Some(natural),
                message: Some("already in place".to_string()),
                ..FileOutcome::new(source, FileStatus::Skipped, date)
            };
        }

        let mut destination = unique_destination(&natural, |p| p.exists() || planned.contains(p));
        planned.insert(destination.clone());
        if destination != natural {
            log::info!("{} exists, using {}", natural.display(), destination.display());
        }

        let mut transferred = Ok(());
        if !self.options.dry_run {
            transferred = transfer_file(source, &destination, self.options.transfer);
            // Another process claimed the name after it was chosen
            while matches!(&transferred, Err(e) if is_already_exists(e)) {
                destination = unique_destination(&natural, |p| p.exists() || planned.contains(p));
                planned.insert(destination.clone());
                log::info!("{} appeared meanwhile, using {}", natural.display(), destination.display());
                transferred = transfer_file(source, &destination, self.options.transfer);
            }
        }

        if self.options.dry_run {
            log::info!("[dry run] {} -> {}", source.display(), destination.display());
        } else if let Err(e) = transferred {
            log::error!(
                "Failed to {} {} to {}: {}",
                self.options.transfer,
                source.display(),
                destination.display(),
                e
            );
            return FileOutcome {
                destination: Some(destination),
                ..FileOutcome::error(source, date, e)
            };
        } else {
            log::info!("{} -> {}", source.display(), destination.display());
            let entry = JournalEntry::now(source, &destination, self.options.transfer);
            if let Err(e) = self.journal.record(&entry) {
                log::warn!("Could not journal {}: {}", source.display(), e);
            }
        }

        FileOutcome {
            destination: Some(destination),
            ..FileOutcome::new(source, FileStatus::Processed, date)
        }
    }
}

/// A batch running on a worker thread.
pub struct OrganizeHandle {
    progress: Receiver<ProgressUpdate>,
    cancel: CancellationToken,
    thread: JoinHandle<OrganizeResult>,
}

impl OrganizeHandle {
    pub fn progress(&self) -> &Receiver<ProgressUpdate> {
        &self.progress
    }

    /// Stop before the next file. The file in flight is finished.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn join(self) -> Result<OrganizeResult> {
        self.thread
            .join()
            .map_err(|_| OrganizerError::Other("organizer thread panicked".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::organizer_core::geocode::CoordinateGeocoder;
    use crate::organizer_core::gps::GpsCoordinate;
    use crate::organizer_core::journal::JsonLinesJournal;
    use crate::organizer_core::progress::{NoProgress, SharedProgress};
    use crate::organizer_core::test_support::{jpeg_with_exif, offline_extractor};
    use assert_fs::TempDir;
    use assert_fs::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use time::macros::datetime;

    fn organizer(destination: &Path, mode: OrganizeMode) -> Organizer {
        Organizer::new(
            offline_extractor(),
            Box::new(CoordinateGeocoder),
            OrganizeOptions::new(destination, mode),
        )
    }

    fn by_date() -> OrganizeMode {
        OrganizeMode::Single(Criterion::Date)
    }

    /// Cancels the token once `after` files have reported progress.
    struct CancelAfter {
        token: CancellationToken,
        after: usize,
        seen: AtomicUsize,
    }

    impl ProgressSink for CancelAfter {
        fn update(&self, _percent: u8, _message: &str) {
            if self.seen.fetch_add(1, Ordering::SeqCst) + 1 >= self.after {
                self.token.cancel();
            }
        }
    }

    #[test]
    fn test_date_layouts() {
        let date = datetime!(2024-03-05 10:00:00);
        let cases = [
            ("year/month/day", vec!["2024", "03", "2024_03_05"]),
            ("year/month", vec!["2024", "2024_03"]),
            ("year", vec!["2024"]),
            ("year_month", vec!["2024_03"]),
            ("year_month_day", vec!["2024_03_05"]),
            ("day_month_year", vec!["05_03_2024"]),
            ("month_year", vec!["03_2024"]),
            ("decade", vec!["2024", "03", "2024_03_05"]),
        ];
        for (name, expected) in cases {
            assert_eq!(DateLayout::parse(name).segments(&date), expected, "{name}");
        }
    }

    #[test]
    fn test_mode_selection() {
        assert_eq!(OrganizeMode::select(&[], false), None);
        assert_eq!(
            OrganizeMode::select(&[Criterion::Location, Criterion::Camera], false),
            Some(OrganizeMode::Single(Criterion::Camera))
        );
        assert_eq!(
            OrganizeMode::select(&[Criterion::Location, Criterion::Date, Criterion::Location], true),
            Some(OrganizeMode::Multilayer(vec![Criterion::Location, Criterion::Date]))
        );
    }

    #[test]
    fn test_sanitize_folder_name() {
        assert_eq!(sanitize_folder_name("France - Paris"), "France - Paris");
        assert_eq!(sanitize_folder_name(r#"a<b>c:d"e/f\g|h?i*j"#), "a_b_c_d_e_f_g_h_i_j");
        assert_eq!(sanitize_folder_name(&"é".repeat(100)).chars().count(), 80);
        assert_eq!(sanitize_folder_name("   "), "Unknown");
        assert_eq!(sanitize_folder_name(".."), "_");
        assert_eq!(sanitize_folder_name(" . "), "_");
        assert_eq!(sanitize_folder_name("St. Louis"), "St. Louis");
        assert_eq!(sanitize_folder_name("../etc"), ".._etc");
    }

    #[test]
    fn test_unique_destination() {
        let taken: HashSet<PathBuf> = ["out/a.jpg", "out/a_1.jpg"].iter().map(PathBuf::from).collect();
        let next = unique_destination(Path::new("out/a.jpg"), |p| taken.contains(p));
        assert_eq!(next, PathBuf::from("out/a_2.jpg"));
        let free = unique_destination(Path::new("out/b.jpg"), |p| taken.contains(p));
        assert_eq!(free, PathBuf::from("out/b.jpg"));
        let bare = unique_destination(Path::new("out/README"), |p| p == Path::new("out/README"));
        assert_eq!(bare, PathBuf::from("out/README_1"));
    }

    #[test]
    fn test_organize_by_date_end_to_end() {
        let temp = TempDir::new().unwrap();
        let a = temp.child("in/A.jpg");
        a.write_binary(&jpeg_with_exif(Some("2023:06:01 10:00:00"), None, None)).unwrap();
        let b = temp.child("in/PXL_20230602_120000.jpg");
        b.write_binary(b"no exif here").unwrap();
        let out = temp.child("out");

        let mut organizer = organizer(out.path(), by_date());
        let files = vec![a.to_path_buf(), b.to_path_buf()];
        let result = organizer.run(&files, &NoProgress, &CancellationToken::new());

        assert_eq!((result.total, result.processed, result.errors), (2, 2, 0));
        out.child("2023/06/2023_06_01/A.jpg").assert(predicates::path::is_file());
        out.child("2023/06/2023_06_02/PXL_20230602_120000.jpg").assert(predicates::path::is_file());
        assert_eq!(result.details[0].date_origin, "exif:DateTimeOriginal");
        assert!(result.details[1].date_origin.starts_with("filename:"));
        // copies leave the sources alone
        a.assert(predicates::path::is_file());
    }

    #[test]
    fn test_collisions_get_numeric_suffix() {
        let temp = TempDir::new().unwrap();
        let bytes = jpeg_with_exif(Some("2022:01:02 03:04:05"), None, None);
        let first = temp.child("one/photo.jpg");
        let second = temp.child("two/photo.jpg");
        first.write_binary(&bytes).unwrap();
        second.write_binary(&bytes).unwrap();
        let out = temp.child("out");

        let mut organizer = organizer(out.path(), by_date());
        let result = organizer.run(
            &[first.to_path_buf(), second.to_path_buf()],
            &NoProgress,
            &CancellationToken::new(),
        );

        assert_eq!(result.processed, 2);
        let leaf = out.child("2022/01/2022_01_02");
        leaf.child("photo.jpg").assert(predicates::path::is_file());
        leaf.child("photo_1.jpg").assert(predicates::path::is_file());
    }

    #[test]
    fn test_dry_run_touches_nothing() {
        let temp = TempDir::new().unwrap();
        let bytes = jpeg_with_exif(Some("2022:01:02 03:04:05"), None, None);
        let first = temp.child("one/photo.jpg");
        let second = temp.child("two/photo.jpg");
        first.write_binary(&bytes).unwrap();
        second.write_binary(&bytes).unwrap();
        let out = temp.child("out");

        let mut organizer = Organizer::new(
            offline_extractor(),
            Box::new(CoordinateGeocoder),
            OrganizeOptions {
                dry_run: true,
                transfer: TransferMode::Move,
                ..OrganizeOptions::new(out.path(), by_date())
            },
        );
        let result = organizer.run(
            &[first.to_path_buf(), second.to_path_buf()],
            &NoProgress,
            &CancellationToken::new(),
        );

        assert!(result.dry_run);
        assert_eq!(result.processed, 2);
        out.assert(predicates::path::missing());
        first.assert(predicates::path::is_file());
        let planned: Vec<_> = result.details.iter().map(|d| d.destination.clone().unwrap()).collect();
        assert_ne!(planned[0], planned[1]);
        assert!(planned[1].ends_with("2022_01_02/photo_1.jpg"));
    }

    #[test]
    fn test_move_and_journal() {
        let temp = TempDir::new().unwrap();
        let source = temp.child("in/photo.jpg");
        source.write_binary(&jpeg_with_exif(Some("2021:12:31 23:59:59"), None, None)).unwrap();
        let out = temp.child("out");
        let journal_path = temp.child("journal.jsonl");

        let mut organizer = Organizer::new(
            offline_extractor(),
            Box::new(CoordinateGeocoder),
            OrganizeOptions {
                transfer: TransferMode::Move,
                ..OrganizeOptions::new(out.path(), by_date())
            },
        )
        .with_journal(Box::new(JsonLinesJournal::open(journal_path.path()).unwrap()));
        let result = organizer.run(&[source.to_path_buf()], &NoProgress, &CancellationToken::new());

        assert_eq!(result.processed, 1);
        source.assert(predicates::path::missing());
        out.child("2021/12/2021_12_31/photo.jpg").assert(predicates::path::is_file());
        let entries = JsonLinesJournal::read_entries(journal_path.path()).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].operation, TransferMode::Move);
    }

    #[test]
    fn test_copy_preserves_modification_time() {
        let temp = TempDir::new().unwrap();
        let source = temp.child("photo.jpg");
        source.write_binary(b"data").unwrap();
        let old = FileTime::from_unix_time(1_000_000_000, 0);
        filetime::set_file_mtime(source.path(), old).unwrap();

        let destination = temp.child("copy/photo.jpg");
        transfer_file(source.path(), destination.path(), TransferMode::Copy).unwrap();
        let meta = fs::metadata(destination.path()).unwrap();
        assert_eq!(FileTime::from_last_modification_time(&meta), old);
    }

    #[test]
    fn test_transfer_never_replaces_existing_file() {
        let temp = TempDir::new().unwrap();
        let source = temp.child("photo.jpg");
        source.write_str("new").unwrap();
        let taken = temp.child("out/photo.jpg");
        taken.write_str("old").unwrap();

        for mode in [TransferMode::Copy, TransferMode::Move] {
            let err = transfer_file(source.path(), taken.path(), mode).unwrap_err();
            assert!(is_already_exists(&err), "{mode}: {err}");
            taken.assert("old");
            source.assert(predicates::path::is_file());
        }
    }

    #[test]
    fn test_move_removes_source() {
        let temp = TempDir::new().unwrap();
        let source = temp.child("photo.jpg");
        source.write_str("data").unwrap();
        let destination = temp.child("out/nested/photo.jpg");

        transfer_file(source.path(), destination.path(), TransferMode::Move).unwrap();
        source.assert(predicates::path::missing());
        destination.assert("data");
    }

    struct FixedPlace(&'static str);

    impl Geocoder for FixedPlace {
        fn place_name(&self, _coordinate: GpsCoordinate) -> String {
            self.0.to_string()
        }
    }

    #[test]
    fn test_dot_place_names_stay_inside_destination() {
        let temp = TempDir::new().unwrap();
        let source = temp.child("in/a.jpg");
        source.write_binary(&jpeg_with_exif(None, None, Some((48.8584, 2.2945)))).unwrap();
        let out = temp.child("out/root");

        for mode in [
            OrganizeMode::Single(Criterion::Location),
            OrganizeMode::LocationGroups { max_distance_km: 1.0 },
        ] {
            let mut organizer = Organizer::new(
                offline_extractor(),
                Box::new(FixedPlace("..")),
                OrganizeOptions {
                    dry_run: true,
                    ..OrganizeOptions::new(out.path(), mode)
                },
            );
            let result = organizer.run(&[source.to_path_buf()], &NoProgress, &CancellationToken::new());
            let destination = result.details[0].destination.clone().unwrap();
            assert_eq!(destination, out.path().join("_").join("a.jpg"));
        }
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let temp = TempDir::new().unwrap();
        let out = temp.child("out");
        let mut organizer = organizer(out.path(), by_date());
        let result = organizer.run(
            &[temp.path().join("ghost.jpg")],
            &NoProgress,
            &CancellationToken::new(),
        );
        assert_eq!((result.processed, result.errors), (0, 1));
        assert_eq!(result.failures().len(), 1);
        assert!(!result.is_success());
    }

    #[test]
    fn test_unwritable_destination_fails_every_file() {
        let temp = TempDir::new().unwrap();
        let blocker = temp.child("out");
        blocker.write_str("a file, not a directory").unwrap();
        let source = temp.child("photo.jpg");
        source.write_binary(b"data").unwrap();

        let mut organizer = organizer(blocker.path(), by_date());
        let result = organizer.run(
            &[source.to_path_buf(), source.to_path_buf()],
            &NoProgress,
            &CancellationToken::new(),
        );
        assert_eq!((result.total, result.processed, result.errors), (2, 0, 2));
        assert_eq!(result.messages.len(), 1);
    }

    #[test]
    fn test_file_already_in_place_is_skipped() {
        let temp = TempDir::new().unwrap();
        let placed = temp.child("2020/05/2020_05_04/photo.jpg");
        placed.write_binary(&jpeg_with_exif(Some("2020:05:04 12:00:00"), None, None)).unwrap();

        let mut organizer = organizer(temp.path(), by_date());
        let result = organizer.run(&[placed.to_path_buf()], &NoProgress, &CancellationToken::new());
        assert_eq!((result.processed, result.skipped), (0, 1));
        temp.child("2020/05/2020_05_04/photo_1.jpg").assert(predicates::path::missing());
    }

    #[test]
    fn test_cancellation_stops_between_files() {
        let temp = TempDir::new().unwrap();
        let files: Vec<PathBuf> = (0..5)
            .map(|i| {
                let child = temp.child(format!("in/IMG_2020010{}_120000.jpg", i + 1));
                child.write_binary(b"data").unwrap();
                child.to_path_buf()
            })
            .collect();
        let out = temp.child("out");

        let token = CancellationToken::new();
        let sink = CancelAfter {
            token: token.clone(),
            after: 2,
            seen: AtomicUsize::new(0),
        };
        let mut organizer = organizer(out.path(), by_date());
        let result = organizer.run(&files, &sink, &token);

        assert!(result.cancelled);
        assert_eq!(result.processed, 2);
        assert_eq!(result.details.len(), 2);
        out.child("2020/01/2020_01_03").assert(predicates::path::missing());
    }

    #[test]
    fn test_cancelled_before_start() {
        let temp = TempDir::new().unwrap();
        let source = temp.child("photo.jpg");
        source.write_binary(b"data").unwrap();
        let out = temp.child("out");

        let token = CancellationToken::new();
        token.cancel();
        let result = organizer(out.path(), by_date()).run(&[source.to_path_buf()], &NoProgress, &token);
        assert!(result.cancelled);
        assert_eq!(result.processed, 0);
        out.assert(predicates::path::missing());
    }

    #[test]
    fn test_spawned_batch_reports_progress() {
        let temp = TempDir::new().unwrap();
        let source = temp.child("in/photo.jpg");
        source.write_binary(&jpeg_with_exif(Some("2019:07:04 08:00:00"), None, None)).unwrap();
        let out = temp.child("out");

        let handle = organizer(out.path(), by_date()).spawn(vec![source.to_path_buf()]);
        let progress = handle.progress().clone();
        let result = handle.join().unwrap();
        let updates: Vec<ProgressUpdate> = progress.try_iter().collect();

        assert_eq!(result.processed, 1);
        assert_eq!(updates.last().map(|u| u.percent), Some(100));
    }

    #[test]
    fn test_multilayer_camera_then_date() {
        let temp = TempDir::new().unwrap();
        let source = temp.child("in/photo.jpg");
        source
            .write_binary(&jpeg_with_exif(Some("2018:02:03 04:05:06"), Some(("Canon", "EOS")), None))
            .unwrap();
        let out = temp.child("out");

        let mode = OrganizeMode::Multilayer(vec![Criterion::Camera, Criterion::Date]);
        let mut organizer = Organizer::new(
            offline_extractor(),
            Box::new(CoordinateGeocoder),
            OrganizeOptions {
                date_layout: DateLayout::Year,
                ..OrganizeOptions::new(out.path(), mode)
            },
        );
        let result = organizer.run(&[source.to_path_buf()], &NoProgress, &CancellationToken::new());
        assert_eq!(result.processed, 1);
        out.child("Canon EOS/2018/photo.jpg").assert(predicates::path::is_file());
    }

    #[test]
    fn test_location_groups() {
        let temp = TempDir::new().unwrap();
        let near_a = temp.child("in/a.jpg");
        let near_b = temp.child("in/b.jpg");
        let far = temp.child("in/c.jpg");
        let none = temp.child("in/d.jpg");
        near_a.write_binary(&jpeg_with_exif(None, None, Some((48.8584, 2.2945)))).unwrap();
        near_b.write_binary(&jpeg_with_exif(None, None, Some((48.8590, 2.2950)))).unwrap();
        far.write_binary(&jpeg_with_exif(None, None, Some((-33.8568, 151.2153)))).unwrap();
        none.write_binary(b"no gps").unwrap();
        let out = temp.child("out");

        let shared = SharedProgress::new();
        let mut organizer = organizer(out.path(), OrganizeMode::LocationGroups { max_distance_km: 1.0 });
        let files = vec![
            near_a.to_path_buf(),
            near_b.to_path_buf(),
            far.to_path_buf(),
            none.to_path_buf(),
        ];
        let result = organizer.run(&files, &shared, &CancellationToken::new());

        assert_eq!((result.processed, result.errors), (4, 0));
        assert_eq!(shared.snapshot().percent, 100);
        let folder = |path: &Path| {
            result
                .details
                .iter()
                .find(|d| d.source == path)
                .and_then(|d| d.destination.clone())
                .and_then(|d| d.parent().map(Path::to_path_buf))
                .unwrap()
        };
        assert_eq!(folder(near_a.path()), folder(near_b.path()));
        assert_ne!(folder(near_a.path()), folder(far.path()));
        assert!(folder(near_a.path()).ends_with("Lat_48.85840_Lon_2.29450"));
        assert!(folder(none.path()).ends_with(NO_GPS_FOLDER));
    }
}
