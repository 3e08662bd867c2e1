//! Per-file attribute reports and collection-wide statistics.

use crate::organizer_core::camera::resolve_camera;
use crate::organizer_core::date::{format_exif_date, origin_label, resolve_date_with};
use crate::organizer_core::extract::{MetadataExtractor, has_gps_structure};
use crate::organizer_core::gps::{GpsCoordinate, google_maps_link, resolve_gps};
use crate::organizer_core::media::MediaFile;
use crate::organizer_core::metadata::MetadataMap;
use crate::organizer_core::progress::{CancellationToken, ProgressSink, percent_of};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write;
use std::path::{Path, PathBuf};

const MAPS_ZOOM: u8 = 15;
const UNKNOWN_YEAR: &str = "unknown";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileReport {
    pub path: PathBuf,
    pub format: String,
    pub date: Option<String>,
    pub date_origin: String,
    pub camera: String,
    pub gps: Option<GpsCoordinate>,
    pub maps_link: Option<String>,
    /// GPS tags are present but do not form a valid position.
    pub gps_unreadable: bool,
}

impl FileReport {
    /// Extract and resolve everything about one file. Also returns the raw
    /// metadata map.
    pub fn build(extractor: &MetadataExtractor, path: &Path) -> (Self, MetadataMap) {
        let file = MediaFile::new(path);
        let metadata = extractor.extract_file(&file);
        let date = resolve_date_with(&file, &metadata, true);
        let camera = resolve_camera(&metadata, Some(&file.file_name()), true);
        let gps = resolve_gps(&metadata);

        let report = FileReport {
            path: path.to_path_buf(),
            format: file.format().to_string(),
            date: date.as_ref().and_then(|d| format_exif_date(&d.date)),
            date_origin: origin_label(date.as_ref()),
            camera: camera.label(),
            gps,
            maps_link: gps.map(|c| google_maps_link(c.latitude, c.longitude, MAPS_ZOOM)),
            gps_unreadable: gps.is_none() && has_gps_structure(&metadata),
        };
        (report, metadata)
    }

    fn year(&self) -> String {
        self.date
            .as_deref()
            .and_then(|d| d.get(..4))
            .unwrap_or(UNKNOWN_YEAR)
            .to_string()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AnalysisReport {
    pub total: usize,
    pub with_gps: usize,
    pub without_gps: usize,
    pub gps_unreadable: usize,
    pub by_year: BTreeMap<String, usize>,
    pub by_camera: BTreeMap<String, usize>,
    pub by_date_origin: BTreeMap<String, usize>,
    pub cancelled: bool,
    pub files: Vec<FileReport>,
}

impl AnalysisReport {
    fn add(&mut self, report: FileReport) {
        self.total += 1;
        if report.gps.is_some() {
            self.with_gps += 1;
        } else {
            self.without_gps += 1;
        }
        if report.gps_unreadable {
            self.gps_unreadable += 1;
        }
        *self.by_year.entry(report.year()).or_default() += 1;
        *self.by_camera.entry(report.camera.clone()).or_default() += 1;
        *self.by_date_origin.entry(report.date_origin.clone()).or_default() += 1;
        self.files.push(report);
    }

    /// Plain-text summary for terminals.
    pub fn render_table(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{:<60} {:<20} {:<24} {:<28} GPS", "File", "Date", "Origin", "Camera");
        for file in &self.files {
            let gps = file
                .gps
                .map(|c| c.to_string())
                .unwrap_or_else(|| "-".to_string());
            let _ = writeln!(
                out,
                "{:<60} {:<20} {:<24} {:<28} {}",
                file.path.display(),
                file.date.as_deref().unwrap_or("-"),
                file.date_origin,
                file.camera,
                gps
            );
        }

        let _ = writeln!(out);
        let _ = writeln!(
            out,
            "{} files, {} with GPS, {} without ({} with unreadable GPS tags)",
            self.total, self.with_gps, self.without_gps, self.gps_unreadable
        );
        for (title, counts) in [
            ("Per year", &self.by_year),
            ("Per camera", &self.by_camera),
            ("Per date origin", &self.by_date_origin),
        ] {
            let _ = writeln!(out, "{}:", title);
            for (key, count) in counts {
                let _ = writeln!(out, "  {:<40} {}", key, count);
            }
        }
        if self.cancelled {
            let _ = writeln!(out, "(cancelled before all files were analyzed)");
        }
        out
    }
}

/// Build the report for `files`, in order.
pub fn analyze(
    extractor: &MetadataExtractor,
    files: &[PathBuf],
    progress: &dyn ProgressSink,
    cancel: &CancellationToken,
) -> AnalysisReport {
    let mut report = AnalysisReport::default();
    for (i, path) in files.iter().enumerate() {
        if cancel.is_cancelled() {
            report.cancelled = true;
            break;
        }
        let (file, _) = FileReport::build(extractor, path);
        report.add(file);
        progress.update(percent_of(i + 1, files.len()), &format!("Analyzed {}", path.display()));
    }
    log::info!(
        "Analyzed {} files: {} with GPS, {} distinct cameras",
        report.total,
        report.with_gps,
        report.by_camera.len()
    );
    report
}
