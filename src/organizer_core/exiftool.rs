//! External `exiftool` invocation with a hard timeout.

use crate::organizer_core::config::ExifToolSettings;
use crate::organizer_core::error::{OrganizerError, Result};
use crate::organizer_core::exif::GPS_INFO_KEY;
use crate::organizer_core::metadata::{MetadataMap, MetadataValue};
use crossbeam_channel::{RecvTimeoutError, bounded};
use serde_json::Value;
use std::io::Read;
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Run `command`, returning its stdout. The child is killed if it has not
/// finished within `timeout`; a non-zero exit status is an error.
pub fn run_with_timeout(mut command: Command, timeout: Duration) -> Result<Vec<u8>> {
    let program = command.get_program().to_string_lossy().to_string();
    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| OrganizerError::ExternalTool(format!("{}: {}", program, e)))?;

    let mut stdout = child
        .stdout
        .take()
        .ok_or_else(|| OrganizerError::ExternalTool(format!("{}: no stdout", program)))?;
    let (tx, rx) = bounded(1);
    thread::spawn(move || {
        let mut buf = Vec::new();
        let result = stdout.read_to_end(&mut buf).map(|_| buf);
        let _ = tx.send(result);
    });

    match rx.recv_timeout(timeout) {
        Ok(output) => {
            let output = output?;
            let status = child.wait()?;
            if !status.success() {
                return Err(OrganizerError::ExternalTool(format!(
                    "{} exited with {}",
                    program, status
                )));
            }
            Ok(output)
        }
        Err(RecvTimeoutError::Timeout) => {
            log::warn!("{} did not finish within {:?}, killing it", program, timeout);
            let _ = child.kill();
            let _ = child.wait();
            Err(OrganizerError::ToolTimeout {
                program,
                seconds: timeout.as_secs(),
            })
        }
        Err(RecvTimeoutError::Disconnected) => {
            let _ = child.kill();
            let _ = child.wait();
            Err(OrganizerError::ExternalTool(format!(
                "{}: output reader exited unexpectedly",
                program
            )))
        }
    }
}

/// Invokes the `exiftool` command line program and converts its JSON output.
#[derive(Debug, Clone)]
pub struct ExifToolRunner {
    program: String,
    timeout: Duration,
}

impl Default for ExifToolRunner {
    fn default() -> Self {
        Self::new("exiftool", DEFAULT_TIMEOUT)
    }
}

impl ExifToolRunner {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    pub fn from_settings(settings: &ExifToolSettings) -> Self {
        Self::new(
            settings.program.clone(),
            Duration::from_secs(settings.timeout_secs),
        )
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Check if the program is available on the system.
    pub fn available(&self) -> bool {
        let mut command = Command::new(&self.program);
        command.arg("-ver");
        run_with_timeout(command, self.timeout).is_ok()
    }

    fn run_json(&self, path: &Path, args: &[&str]) -> Result<serde_json::Map<String, Value>> {
        let mut command = Command::new(&self.program);
        command.args(args).arg(path);
        let output = run_with_timeout(command, self.timeout)?;

        let records: Vec<Value> = serde_json::from_slice(&output)?;
        match records.into_iter().next() {
            Some(Value::Object(record)) => Ok(record),
            _ => Err(OrganizerError::MetadataExtraction {
                path: path.to_path_buf(),
                reason: format!("{} returned no metadata record", self.program),
            }),
        }
    }

    /// Flat tag names (`-j -charset UTF8`), spaces removed from keys.
    pub fn read_flat(&self, path: &Path) -> Result<MetadataMap> {
        let record = self.run_json(path, &["-j", "-charset", "UTF8"])?;
        Ok(record
            .into_iter()
            .filter(|(key, _)| key != "SourceFile")
            .filter_map(|(key, value)| {
                MetadataValue::from_json(value).map(|v| (key.replace(' ', ""), v))
            })
            .collect())
    }

    /// Grouped output (`-j -g`): the EXIF group at top level, the GPS group
    /// under `GPSInfo`, and image dimensions from the File group.
    pub fn read_grouped(&self, path: &Path) -> Result<MetadataMap> {
        let mut record = self.run_json(path, &["-j", "-g"])?;
        let mut map = MetadataMap::new();

        if let Some(MetadataValue::Map(exif)) =
            record.remove("EXIF").and_then(MetadataValue::from_json)
        {
            map.extend(exif);
        }
        if let Some(gps) = record.remove("GPS").and_then(MetadataValue::from_json) {
            map.insert(GPS_INFO_KEY.to_string(), gps);
        }
        if let Some(Value::Object(file)) = record.remove("File") {
            for key in ["ImageWidth", "ImageHeight"] {
                if let Some(value) = file.get(key).cloned().and_then(MetadataValue::from_json) {
                    map.insert(key.to_string(), value);
                }
            }
        }
        Ok(map)
    }
}
