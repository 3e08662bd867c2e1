//! Embedded EXIF readers backed by `kamadak-exif` and the `image` decoders.

use crate::organizer_core::error::{OrganizerError, Result};
use crate::organizer_core::metadata::{MetadataMap, MetadataValue, decode_bytes};
use exif::{Context, Exif, In, Reader, Value};
use image::{ImageDecoder, ImageFormat, ImageReader};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Key under which the nested GPS structure is stored.
pub const GPS_INFO_KEY: &str = "GPSInfo";

/// Layout of GPS tags in the produced map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpsLayout {
    /// GPS tags next to every other tag (`GPSLatitude`, `GPSLatitudeRef`, ...).
    Flat,
    /// GPS tags in a sub-map under `GPSInfo`.
    Nested,
}

/// Read EXIF from any container kamadak understands (JPEG, TIFF/RAW, HEIF, PNG, WebP).
pub fn read_container(path: &Path) -> Result<Exif> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    Ok(Reader::new().read_from_container(&mut reader)?)
}

/// Read the EXIF block surfaced by the `image` crate's decoder for `path`.
pub fn read_via_decoder(path: &Path) -> Result<Exif> {
    let mut decoder = ImageReader::open(path)?
        .with_guessed_format()?
        .into_decoder()?;
    let raw = decoder
        .exif_metadata()?
        .ok_or_else(|| OrganizerError::MetadataExtraction {
            path: path.to_path_buf(),
            reason: "no embedded EXIF block".to_string(),
        })?;
    let raw = raw.strip_prefix(b"Exif\0\0").map(<[u8]>::to_vec).unwrap_or(raw);
    Ok(Reader::new().read_raw(raw)?)
}

/// Dimensions, format and colour model from the image header, plus the
/// text entries of PNG files.
pub fn image_properties(path: &Path) -> Result<MetadataMap> {
    let reader = ImageReader::open(path)?.with_guessed_format()?;
    let format = reader.format();
    let decoder = reader.into_decoder()?;
    let (width, height) = decoder.dimensions();

    let mut map = MetadataMap::new();
    map.insert("ImageWidth".to_string(), MetadataValue::Integer(width.into()));
    map.insert("ImageHeight".to_string(), MetadataValue::Integer(height.into()));
    if let Some(format) = format {
        map.insert("Format".to_string(), MetadataValue::text(format!("{:?}", format)));
    }
    map.insert(
        "ColorType".to_string(),
        MetadataValue::text(format!("{:?}", decoder.color_type())),
    );

    if format == Some(ImageFormat::Png) {
        match png_text_entries(path) {
            Ok(entries) => {
                for (key, value) in entries {
                    map.entry(key).or_insert(MetadataValue::Text(value));
                }
            }
            Err(e) => log::debug!("Could not read PNG text of {}: {}", path.display(), e),
        }
    }
    Ok(map)
}

/// `tEXt`, `zTXt` and `iTXt` entries stored before the image data.
pub fn png_text_entries(path: &Path) -> Result<Vec<(String, String)>> {
    let decoder = png::Decoder::new(BufReader::new(File::open(path)?));
    let reader = decoder.read_info()?;
    let info = reader.info();

    let mut entries: Vec<(String, String)> = info
        .uncompressed_latin1_text
        .iter()
        .map(|chunk| (chunk.keyword.clone(), chunk.text.clone()))
        .collect();
    for chunk in &info.compressed_latin1_text {
        match chunk.get_text() {
            Ok(text) => entries.push((chunk.keyword.clone(), text)),
            Err(e) => log::debug!("Skipping zTXt {}: {}", chunk.keyword, e),
        }
    }
    for chunk in &info.utf8_text {
        match chunk.get_text() {
            Ok(text) => entries.push((chunk.keyword.clone(), text)),
            Err(e) => log::debug!("Skipping iTXt {}: {}", chunk.keyword, e),
        }
    }
    Ok(entries)
}

/// Convert primary-image EXIF fields to a metadata map. Thumbnail fields
/// are ignored.
pub fn exif_to_map(exif: &Exif, gps: GpsLayout) -> MetadataMap {
    let mut map = MetadataMap::new();
    let mut gps_map = MetadataMap::new();

    for field in exif.fields().filter(|f| f.ifd_num == In::PRIMARY) {
        let Some(value) = convert_value(&field.value) else {
            continue;
        };
        let name = tag_name(field.tag);
        if gps == GpsLayout::Nested && field.tag.context() == Context::Gps {
            gps_map.insert(name, value);
        } else {
            map.insert(name, value);
        }
    }

    if !gps_map.is_empty() {
        map.insert(GPS_INFO_KEY.to_string(), MetadataValue::Map(gps_map));
    }
    map
}

/// Known tags by name, unknown ones by number.
fn tag_name(tag: exif::Tag) -> String {
    match tag.description() {
        Some(_) => tag.to_string(),
        None => tag.number().to_string(),
    }
}

fn collapse(mut items: Vec<MetadataValue>) -> Option<MetadataValue> {
    match items.len() {
        0 => None,
        1 => items.pop(),
        _ => Some(MetadataValue::List(items)),
    }
}

fn integers<T: Copy + Into<i64>>(values: &[T]) -> Option<MetadataValue> {
    collapse(values.iter().map(|v| MetadataValue::Integer((*v).into())).collect())
}

fn floats(values: impl Iterator<Item = f64>) -> Option<MetadataValue> {
    collapse(values.map(MetadataValue::Float).collect())
}

fn convert_value(value: &Value) -> Option<MetadataValue> {
    match value {
        Value::Ascii(parts) => {
            let text = parts
                .iter()
                .map(|p| decode_bytes(p))
                .collect::<Vec<_>>()
                .join(" ");
            Some(MetadataValue::Text(text.trim().to_string()))
        }
        Value::Byte(v) => integers(v),
        Value::Short(v) => integers(v),
        Value::Long(v) => integers(v),
        Value::SByte(v) => integers(v),
        Value::SShort(v) => integers(v),
        Value::SLong(v) => integers(v),
        Value::Rational(v) => floats(v.iter().map(|r| r.to_f64())),
        Value::SRational(v) => floats(v.iter().map(|r| r.to_f64())),
        Value::Float(v) => floats(v.iter().map(|f| f64::from(*f))),
        Value::Double(v) => floats(v.iter().copied()),
        Value::Undefined(bytes, _) => Some(MetadataValue::Bytes(bytes.clone())),
        _ => None,
    }
}
