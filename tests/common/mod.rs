#![allow(dead_code)]

pub mod config_test_utils;
pub mod mock_server;

use std::io::Write;
use std::path::Path;

use tempfile::TempDir;

pub const MOBILE_ID: &str = "device-0001";

pub fn setup_temp_dir() -> TempDir {
    TempDir::new().expect("Failed to create temp directory")
}

/// Zip archive bytes holding the given entries.
pub fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut zip = zip::ZipWriter::new(&mut cursor);
        for (name, data) in entries {
            zip.start_file(*name, zip::write::SimpleFileOptions::default())
                .expect("start zip entry");
            zip.write_all(data).expect("write zip entry");
        }
        zip.finish().expect("finish zip");
    }
    cursor.into_inner()
}

pub fn write_file(path: &Path, contents: &[u8]) {
    std::fs::write(path, contents).expect("write fixture file");
}
