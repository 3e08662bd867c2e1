//! Fixture builders shared by unit tests.

use crate::organizer_core::cache::NoCache;
use crate::organizer_core::exiftool::ExifToolRunner;
use crate::organizer_core::extract::MetadataExtractor;
use crate::organizer_core::platform::NoPlatformSource;
use exif::experimental::Writer;
use exif::{Field, In, Rational, Tag, Value};
use image::ExtendedColorType;
use image::codecs::jpeg::JpegEncoder;
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

/// Route `log` output through the test harness. Set `RUST_LOG=debug` to see it.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Extractor that never reaches an external tool or OS query.
pub fn offline_extractor() -> MetadataExtractor {
    init_logging();
    MetadataExtractor::new(
        ExifToolRunner::new("definitely-not-a-real-exiftool", Duration::from_secs(1)),
        Arc::new(NoPlatformSource),
        Box::new(NoCache),
    )
}

fn ascii(tag: Tag, text: &str) -> Field {
    Field {
        tag,
        ifd_num: In::PRIMARY,
        value: Value::Ascii(vec![text.as_bytes().to_vec()]),
    }
}

fn dms(value: f64) -> Value {
    let value = value.abs();
    let degrees = value.trunc();
    let minutes = ((value - degrees) * 60.0).trunc();
    let seconds = ((value - degrees) * 60.0 - minutes) * 60.0;
    Value::Rational(vec![
        Rational { num: degrees as u32, denom: 1 },
        Rational { num: minutes as u32, denom: 1 },
        Rational { num: (seconds * 10_000.0).round() as u32, denom: 10_000 },
    ])
}

/// Raw TIFF-structured EXIF block.
pub fn exif_tiff(date: Option<&str>, camera: Option<(&str, &str)>, gps: Option<(f64, f64)>) -> Vec<u8> {
    let mut fields = vec![ascii(Tag::Software, "fixture")];
    if let Some((make, model)) = camera {
        fields.push(ascii(Tag::Make, make));
        fields.push(ascii(Tag::Model, model));
    }
    if let Some(date) = date {
        fields.push(ascii(Tag::DateTimeOriginal, date));
    }
    if let Some((lat, lon)) = gps {
        fields.push(ascii(Tag::GPSLatitudeRef, if lat < 0.0 { "S" } else { "N" }));
        fields.push(Field { tag: Tag::GPSLatitude, ifd_num: In::PRIMARY, value: dms(lat) });
        fields.push(ascii(Tag::GPSLongitudeRef, if lon < 0.0 { "W" } else { "E" }));
        fields.push(Field { tag: Tag::GPSLongitude, ifd_num: In::PRIMARY, value: dms(lon) });
    }

    let mut writer = Writer::new();
    for field in &fields {
        writer.push_field(field);
    }
    let mut buf = Cursor::new(Vec::new());
    writer.write(&mut buf, false).unwrap();
    buf.into_inner()
}

/// Minimal JPEG: SOI, an APP1 Exif segment, EOI. No image data.
pub fn jpeg_with_exif(date: Option<&str>, camera: Option<(&str, &str)>, gps: Option<(f64, f64)>) -> Vec<u8> {
    let tiff = exif_tiff(date, camera, gps);
    let mut jpeg = vec![0xFF, 0xD8, 0xFF, 0xE1];
    jpeg.extend_from_slice(&((tiff.len() + 8) as u16).to_be_bytes());
    jpeg.extend_from_slice(b"Exif\0\0");
    jpeg.extend_from_slice(&tiff);
    jpeg.extend_from_slice(&[0xFF, 0xD9]);
    jpeg
}

/// Decodable 8x8 grey JPEG with an APP1 Exif segment right after SOI.
pub fn encoded_jpeg_with_exif(
    date: Option<&str>,
    camera: Option<(&str, &str)>,
    gps: Option<(f64, f64)>,
) -> Vec<u8> {
    let mut encoded = Vec::new();
    JpegEncoder::new(&mut encoded)
        .encode(&[128u8; 64], 8, 8, ExtendedColorType::L8)
        .unwrap();

    let tiff = exif_tiff(date, camera, gps);
    let mut jpeg = encoded[..2].to_vec();
    jpeg.extend_from_slice(&[0xFF, 0xE1]);
    jpeg.extend_from_slice(&((tiff.len() + 8) as u16).to_be_bytes());
    jpeg.extend_from_slice(b"Exif\0\0");
    jpeg.extend_from_slice(&tiff);
    jpeg.extend_from_slice(&encoded[2..]);
    jpeg
}

/// 1x1 RGB PNG carrying `tEXt` entries ahead of the image data.
pub fn png_with_text(entries: &[(&str, &str)]) -> Vec<u8> {
    let mut out = Vec::new();
    {
        let mut encoder = png::Encoder::new(&mut out, 1, 1);
        encoder.set_color(png::ColorType::Rgb);
        encoder.set_depth(png::BitDepth::Eight);
        for (keyword, text) in entries {
            encoder
                .add_text_chunk(keyword.to_string(), text.to_string())
                .unwrap();
        }
        let mut writer = encoder.write_header().unwrap();
        writer.write_image_data(&[200, 120, 40]).unwrap();
        writer.finish().unwrap();
    }
    out
}
