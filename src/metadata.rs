//! File-backed key=value metadata store (spec.md §4.4, §6).
//!
//! One file per session under `<project>/sessions/<id>`. Lines are
//! `key=value`; only the first `=` on a line splits key from value, so
//! values may themselves contain `=`. Lines starting with `#` are comments
//! and are dropped on read (not preserved verbatim — the store's contract is
//! about keys, not comment round-tripping). Unknown keys are preserved.
//!
//! Writes are atomic: write to `<id>.tmp.<rand>` in the same directory, then
//! rename over the target. `update` merges a patch into the existing record,
//! deleting any key whose new value is the empty string.

use crate::{OrchestratorError, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// A single session's metadata record: an ordered key=value bag.
///
/// `BTreeMap` gives deterministic write order, which keeps diffs of the
/// on-disk file stable across rewrites.
pub type Record = BTreeMap<String, String>;

/// Directory-backed metadata store rooted at `<project>/sessions`.
pub struct MetadataStore {
    root: PathBuf,
}

impl MetadataStore {
    /// Opens (creating if necessary) a metadata store rooted at `root`.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        std::fs::create_dir_all(root.join("archive"))?;
        Ok(Self { root })
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.root.join(id)
    }

    /// Reads and parses a record. Returns `Ok(None)` if the file doesn't exist.
    pub fn read(&self, id: &str) -> Result<Option<Record>> {
        let path = self.path_for(id);
        match std::fs::read_to_string(&path) {
            Ok(contents) => Ok(Some(parse_record(&contents))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Writes a full record atomically, overwriting any existing file.
    pub fn write(&self, id: &str, record: &Record) -> Result<()> {
        atomic_write(&self.root, &self.path_for(id), &serialize_record(record))
    }

    /// Merges `patch` into the existing record (creating one if absent).
    /// A patch value of `""` deletes the corresponding key. Writes atomically.
    pub fn update(&self, id: &str, patch: &Record) -> Result<Record> {
        let mut record = self.read(id)?.unwrap_or_default();
        for (k, v) in patch {
            if v.is_empty() {
                record.remove(k);
            } else {
                record.insert(k.clone(), v.clone());
            }
        }
        self.write(id, &record)?;
        Ok(record)
    }

    /// Deletes a record, optionally archiving it first under
    /// `archive/<id>_<ISO8601 with ':' -> '-'>`.
    pub fn delete(&self, id: &str, archive: bool) -> Result<()> {
        let path = self.path_for(id);
        if !path.exists() {
            return Ok(());
        }

        if archive {
            let timestamp = chrono::Utc::now().to_rfc3339().replace(':', "-");
            let archive_path = self.root.join("archive").join(format!("{id}_{timestamp}"));
            std::fs::rename(&path, &archive_path)?;
        } else {
            std::fs::remove_file(&path)?;
        }
        Ok(())
    }

    /// Lists all live (non-archived) session ids in the store.
    pub fn list_ids(&self) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                ids.push(name.to_string());
            }
        }
        Ok(ids)
    }

    /// Returns the newest archived record for `id`, correctly distinguishing
    /// `app` from `app_v2` by requiring the archive suffix to be `_` followed
    /// by a digit (a timestamp), per spec.md §4.4 and §8.
    pub fn read_archived_raw(&self, id: &str) -> Result<Option<Record>> {
        let archive_dir = self.root.join("archive");
        let prefix = format!("{id}_");

        let mut best: Option<(String, Record)> = None;
        for entry in std::fs::read_dir(&archive_dir)? {
            let entry = entry?;
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if !name.starts_with(&prefix) {
                continue;
            }
            let suffix = &name[prefix.len()..];
            if !suffix.chars().next().map(|c| c.is_ascii_digit()).unwrap_or(false) {
                continue;
            }

            let contents = std::fs::read_to_string(entry.path())?;
            let record = parse_record(&contents);
            match &best {
                Some((best_name, _)) if best_name >= &name => {}
                _ => best = Some((name, record)),
            }
        }

        Ok(best.map(|(_, record)| record))
    }
}

fn parse_record(contents: &str) -> Record {
    let mut record = Record::new();
    for line in contents.lines() {
        let trimmed = line.trim_start();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        if let Some(idx) = line.find('=') {
            let key = line[..idx].to_string();
            let value = line[idx + 1..].to_string();
            record.insert(key, value);
        }
    }
    record
}

fn serialize_record(record: &Record) -> String {
    let mut out = String::new();
    for (k, v) in record {
        out.push_str(k);
        out.push('=');
        out.push_str(v);
        out.push('\n');
    }
    out
}

/// Writes `contents` to `target` by first writing to a sibling temp file in
/// `dir` and renaming it over `target`, so readers never observe a partial
/// write.
fn atomic_write(dir: &Path, target: &Path, contents: &str) -> Result<()> {
    let rand_suffix: u64 = rand::random();
    let tmp_name = format!(
        "{}.tmp.{:x}",
        target
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| OrchestratorError::MetadataError("invalid target file name".into()))?,
        rand_suffix
    );
    let tmp_path = dir.join(tmp_name);
    std::fs::write(&tmp_path, contents)?;
    std::fs::rename(&tmp_path, target)?;
    Ok(())
}
