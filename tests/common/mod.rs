use assert_cmd::Command;
use assert_fs::TempDir;
use assert_fs::fixture::ChildPath;
use assert_fs::prelude::*;
use exif::experimental::Writer;
use exif::{Field, In, Tag, Value};
use std::io::Cursor;

/// A config file that keeps every run offline and away from the user cache.
pub fn setup_config(temp_dir: &TempDir) -> ChildPath {
    let config = temp_dir.child("config.toml");
    config
        .write_str(
            "[exiftool]\nprogram = \"definitely-not-a-real-exiftool\"\ntimeout_secs = 1\n\n\
             [cache]\nenabled = false\n\n[geocoding]\nenabled = false\n",
        )
        .unwrap();
    config
}

/// `photo-organizer --config <config>` ready for a subcommand.
pub fn organizer_cmd(config: &ChildPath) -> Command {
    let mut cmd = Command::cargo_bin("photo-organizer").unwrap();
    cmd.arg("--config").arg(config.path());
    cmd
}

fn ascii(tag: Tag, text: &str) -> Field {
    Field {
        tag,
        ifd_num: In::PRIMARY,
        value: Value::Ascii(vec![text.as_bytes().to_vec()]),
    }
}

/// Minimal JPEG carrying a DateTimeOriginal and camera Make/Model.
pub fn jpeg_with_date(date: &str, make: &str, model: &str) -> Vec<u8> {
    let fields = [
        ascii(Tag::Make, make),
        ascii(Tag::Model, model),
        ascii(Tag::DateTimeOriginal, date),
    ];
    let mut writer = Writer::new();
    for field in &fields {
        writer.push_field(field);
    }
    let mut tiff = Cursor::new(Vec::new());
    writer.write(&mut tiff, false).unwrap();
    let tiff = tiff.into_inner();

    let mut jpeg = vec![0xFF, 0xD8, 0xFF, 0xE1];
    jpeg.extend_from_slice(&((tiff.len() + 8) as u16).to_be_bytes());
    jpeg.extend_from_slice(b"Exif\0\0");
    jpeg.extend_from_slice(&tiff);
    jpeg.extend_from_slice(&[0xFF, 0xD9]);
    jpeg
}

/// Source directory with one tagged JPEG (`A.jpg`) and one named by date.
pub fn setup_photos(temp_dir: &TempDir) -> ChildPath {
    let photos = temp_dir.child("photos");
    photos
        .child("A.jpg")
        .write_binary(&jpeg_with_date("2023:06:01 10:00:00", "Canon", "Canon EOS 5D"))
        .unwrap();
    photos
        .child("IMG_20210304_050607.jpg")
        .write_binary(b"not really a jpeg")
        .unwrap();
    photos
}
