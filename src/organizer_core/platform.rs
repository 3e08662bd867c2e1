//! OS bulk property queries. Only Windows has one (WMIC); every other
//! platform gets a no-op source.

use crate::organizer_core::date::{format_exif_date, parse_wmic_datetime};
use crate::organizer_core::error::Result;
use crate::organizer_core::metadata::{MetadataMap, MetadataValue};
use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;
use time::PrimitiveDateTime;

/// What one OS query reported about a file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlatformReport {
    /// Every file property, as a flat map.
    pub properties: MetadataMap,
    /// Every timestamp found in the raw output, sorted ascending.
    pub timestamps: Vec<PrimitiveDateTime>,
}

impl PlatformReport {
    pub fn parse(output: &str) -> Self {
        Self {
            properties: parse_wmic_properties(output),
            timestamps: parse_wmic_timestamps(output),
        }
    }
}

pub trait PlatformMetadataSource: Send + Sync {
    fn name(&self) -> &'static str;

    /// Query the OS once for `path`.
    fn query(&self, path: &Path) -> Result<PlatformReport>;
}

/// Used where the platform has no bulk property query.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPlatformSource;

impl PlatformMetadataSource for NoPlatformSource {
    fn name(&self) -> &'static str {
        "none"
    }

    fn query(&self, _path: &Path) -> Result<PlatformReport> {
        Ok(PlatformReport::default())
    }
}

/// `wmic datafile ... list full` through `cmd.exe`.
#[cfg(windows)]
#[derive(Debug, Clone)]
pub struct WmicSource {
    timeout: Duration,
}

#[cfg(windows)]
impl WmicSource {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn run(&self, path: &Path) -> Result<String> {
        use crate::organizer_core::exiftool::run_with_timeout;
        use std::process::Command;

        let escaped = path.to_string_lossy().replace('/', "\\").replace('\\', "\\\\");
        let mut command = Command::new("cmd.exe");
        command.args(["/c", "wmic", "datafile", &format!("\"{}\"", escaped), "list", "full"]);
        let output = run_with_timeout(command, self.timeout)?;
        Ok(String::from_utf8_lossy(&output).to_string())
    }
}

#[cfg(windows)]
impl PlatformMetadataSource for WmicSource {
    fn name(&self) -> &'static str {
        "wmic"
    }

    fn query(&self, path: &Path) -> Result<PlatformReport> {
        Ok(PlatformReport::parse(&self.run(path)?))
    }
}

/// The property source for the running platform.
#[cfg(windows)]
pub fn detect(timeout: Duration) -> Box<dyn PlatformMetadataSource> {
    Box::new(WmicSource::new(timeout))
}

/// The property source for the running platform.
#[cfg(not(windows))]
pub fn detect(_timeout: Duration) -> Box<dyn PlatformMetadataSource> {
    Box::new(NoPlatformSource)
}

/// Parse `key=value` lines. `CreationDate` and `LastModified` also get an
/// EXIF-formatted `CreationDateTime` / `LastModifiedDateTime`.
pub fn parse_wmic_properties(output: &str) -> MetadataMap {
    let mut map = MetadataMap::new();
    for line in output.lines() {
        if let Some((key, value)) = line.split_once('=') {
            map.insert(key.trim().to_string(), MetadataValue::text(value.trim()));
        }
    }

    for (source, target) in [
        ("CreationDate", "CreationDateTime"),
        ("LastModified", "LastModifiedDateTime"),
    ] {
        let parsed = map
            .get(source)
            .and_then(|v| v.as_text())
            .and_then(parse_wmic_datetime)
            .and_then(|d| format_exif_date(&d));
        if let Some(date) = parsed {
            map.insert(target.to_string(), MetadataValue::Text(date));
        }
    }
    map
}

/// Every `20YYMMDDhhmmss.ffffff` substring, parsed and sorted.
pub fn parse_wmic_timestamps(output: &str) -> Vec<PrimitiveDateTime> {
    static TIMESTAMP: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(20\d\d)(\d\d)(\d\d)(\d\d)(\d\d)(\d\d)\.(\d*)")
            .expect("WMIC timestamp pattern must compile")
    });
    let mut dates: Vec<PrimitiveDateTime> = TIMESTAMP
        .find_iter(output)
        .filter_map(|m| {
            let text = m.as_str();
            // A bare trailing dot carries no fraction.
            if text.ends_with('.') {
                parse_wmic_datetime(&format!("{}0", text))
            } else {
                parse_wmic_datetime(text)
            }
        })
        .collect();
    dates.sort();
    dates
}
