//! Shared fixtures: a throwaway game install and user directory.

#![allow(dead_code)]

use camino::{Utf8Path, Utf8PathBuf};
use gda_formats::{ErfType, ErfVersion, ErfWriter, StringTable};
use gda_resman::{GameLayout, ResmanConfig};
use std::io::{Cursor, Write};
use tempfile::TempDir;

/// Install logging for a test run when `RUST_LOG` is set.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub struct Fixture {
    _dir: TempDir,
    pub root: Utf8PathBuf,
}

impl Fixture {
    pub fn new() -> Self {
        init_logging();
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        std::fs::create_dir_all(root.join("install/Data")).unwrap();
        std::fs::create_dir_all(root.join("user")).unwrap();
        std::fs::create_dir_all(root.join("workshop")).unwrap();
        Self { _dir: dir, root }
    }

    pub fn install(&self) -> Utf8PathBuf {
        self.root.join("install")
    }

    pub fn user(&self) -> Utf8PathBuf {
        self.root.join("user")
    }

    pub fn workshop(&self) -> Utf8PathBuf {
        self.root.join("workshop")
    }

    pub fn layout(&self) -> GameLayout {
        GameLayout::new(self.install(), self.user()).with_workshop_root(self.workshop())
    }

    pub fn config(&self) -> ResmanConfig {
        ResmanConfig {
            snapshot_dir: Some(self.root.join("snapshots")),
            retry_backoff_ms: 1,
            ..ResmanConfig::default()
        }
    }

    pub fn write(&self, rel: &str, data: &[u8]) -> Utf8PathBuf {
        let path = self.root.join(rel);
        write_file(&path, data);
        path
    }

    pub fn write_zip(&self, rel: &str, files: &[(&str, Vec<u8>)]) -> Utf8PathBuf {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for (name, data) in files {
            writer
                .start_file(*name, zip::write::SimpleFileOptions::default())
                .unwrap();
            writer.write_all(data).unwrap();
        }
        let bytes = writer.finish().unwrap().into_inner();
        self.write(rel, &bytes)
    }

    pub fn write_erf(&self, rel: &str, erf_type: ErfType, files: &[(&str, Vec<u8>)]) -> Utf8PathBuf {
        let mut writer = ErfWriter::new(erf_type, ErfVersion::V1_0);
        for (name, data) in files {
            writer.add(name, data.clone()).unwrap();
        }
        self.write(rel, &writer.to_bytes().unwrap())
    }

    pub fn write_tlk(&self, rel: &str, strings: &[&str]) -> Utf8PathBuf {
        let table = StringTable::new(0, strings.iter().map(|s| s.to_string()).collect());
        self.write(rel, &table.to_bytes().unwrap())
    }

    pub fn remove(&self, rel: &str) {
        let path = self.root.join(rel);
        if path.is_dir() {
            std::fs::remove_dir_all(&path).unwrap();
        } else {
            std::fs::remove_file(&path).unwrap();
        }
    }
}

pub fn write_file(path: &Utf8Path, data: &[u8]) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, data).unwrap();
}

/// A `classes` table with `rows` rows, each labelled with `tag`.
pub fn classes(rows: usize, tag: &str) -> Vec<u8> {
    let mut text = String::from("2DA V2.0\n\n\tLabel\tHitDie\n");
    for row in 0..rows {
        text.push_str(&format!("{row}\t{tag}{row}\t{}\n", 6 + row));
    }
    text.into_bytes()
}
