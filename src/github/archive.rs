//! Content-addressed archive of raw HTTP exchanges.
//!
//! Paths are fully determined by `(tag, request_fingerprint, attempt)`, so a
//! re-run with identical parameters produces identical paths and rewrites are
//! byte-identical no-ops. Writers stage to `path.tmp` and atomically rename.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::error::PrismResult;
use crate::http::client::{ExchangeSink, RawRecord};

pub struct RawArchive {
    root: PathBuf,
}

impl RawArchive {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `{root}/raw_http/{tag}/{fingerprint}_a{attempt}.json`
    pub fn record_path(&self, tag: &str, fingerprint: &str, attempt: u32) -> PathBuf {
        self.root
            .join("raw_http")
            .join(tag)
            .join(format!("{fingerprint}_a{attempt}.json"))
    }

    /// Write an arbitrary JSON document relative to the archive root
    /// (run manifests, discovery indexes).
    pub fn write_json(&self, relative: &str, value: &impl Serialize) -> PrismResult<()> {
        let path = self.root.join(relative);
        write_json_atomic(&path, value)
    }

    /// Iterate every archived record file under `raw_http/`.
    pub fn iter_record_paths(&self) -> PrismResult<Vec<PathBuf>> {
        let mut paths = Vec::new();
        let raw_root = self.root.join("raw_http");
        if !raw_root.is_dir() {
            return Ok(paths);
        }
        collect_json_files(&raw_root, &mut paths)?;
        paths.sort();
        Ok(paths)
    }

    pub fn read_record(path: &Path) -> PrismResult<RawRecord> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }
}

impl ExchangeSink for RawArchive {
    fn record(&self, record: &RawRecord) -> PrismResult<()> {
        let path = self.record_path(
            &record.meta.tag,
            &record.meta.request_fingerprint,
            record.meta.attempt,
        );
        debug!(path = %path.display(), "archiving exchange");
        write_json_atomic(&path, record)
    }
}

fn collect_json_files(dir: &Path, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            collect_json_files(&path, out)?;
        } else if path.extension().is_some_and(|ext| ext == "json") {
            out.push(path);
        }
    }
    Ok(())
}

fn write_json_atomic(path: &Path, value: &impl Serialize) -> PrismResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut payload = serde_json::to_string_pretty(value)?;
    payload.push('\n');
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, payload)?;
    fs::rename(&tmp, path)?;
    Ok(())
}
