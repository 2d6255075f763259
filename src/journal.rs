//! Append-only state journal and latest-wins snapshot files.
//!
//! Records append to `<prefix>.jsonlist`, one JSON object per line with
//! sorted keys, flushed record by record; the file is never rewritten and
//! is the canonical replay source. The snapshot and overlay files are
//! replaced atomically (write to a `~` temp path, then rename) so a reader
//! never observes a partial write and the previous copy survives a crash.

use std::ffi::OsString;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::error::{Error, Result};

/// Snapshot filename within the log directory.
pub const SNAPSHOT_FILE: &str = "last.jsonlist";
/// Latest rendered overlay filename within the log directory.
pub const OVERLAY_FILE: &str = "last.svg";

/// Stamp a record object with its `_type` tag and client time.
pub fn tag_record(value: Value, kind: &str, cli_time: f64) -> Result<Value> {
    match value {
        Value::Object(mut map) => {
            map.insert("_type".to_string(), Value::from(kind));
            map.insert("cli_time".to_string(), Value::from(cli_time));
            Ok(Value::Object(map))
        }
        _ => Err(Error::Serialization(
            "record is not a JSON object".to_string(),
        )),
    }
}

/// Journal files for one run.
pub struct Journal {
    records: File,
    records_path: PathBuf,
    snapshot_path: PathBuf,
    overlay_path: PathBuf,
}

impl Journal {
    /// Create `<prefix>.jsonlist` and derive the snapshot and overlay paths
    /// in the prefix directory. Truncates an existing journal at the same
    /// prefix, which normal operation never produces (the prefix carries a
    /// timestamp).
    pub fn create(prefix: &Path) -> Result<Self> {
        let mut records_name = OsString::from(prefix.as_os_str());
        records_name.push(".jsonlist");
        let records_path = PathBuf::from(records_name);

        let dir = match prefix.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let records = File::create(&records_path)?;

        Ok(Self {
            records,
            records_path,
            snapshot_path: dir.join(SNAPSHOT_FILE),
            overlay_path: dir.join(OVERLAY_FILE),
        })
    }

    pub fn records_path(&self) -> &Path {
        &self.records_path
    }

    pub fn snapshot_path(&self) -> &Path {
        &self.snapshot_path
    }

    pub fn overlay_path(&self) -> &Path {
        &self.overlay_path
    }

    /// Append one serialized record line, flushed before returning.
    pub fn append_line(&mut self, line: &str) -> Result<()> {
        let mut buf = String::with_capacity(line.len() + 1);
        buf.push_str(line);
        buf.push('\n');
        self.records.write_all(buf.as_bytes())?;
        self.records.flush()?;
        Ok(())
    }

    /// Atomically replace the preference snapshot with this record line.
    pub fn snapshot(&self, line: &str) -> Result<()> {
        let mut contents = String::with_capacity(line.len() + 1);
        contents.push_str(line);
        contents.push('\n');
        write_atomic(&self.snapshot_path, &contents)
    }

    /// Atomically replace the latest rendered overlay.
    pub fn export_overlay(&self, svg: &str) -> Result<()> {
        write_atomic(&self.overlay_path, svg)
    }
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let mut temp_name = OsString::from(path.as_os_str());
    temp_name.push("~");
    let temp = PathBuf::from(temp_name);
    std::fs::write(&temp, contents)?;
    std::fs::rename(&temp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(kind: &str, seq: u64) -> String {
        let value = tag_record(serde_json::json!({ "seq": seq }), kind, 100.5).unwrap();
        serde_json::to_string(&value).unwrap()
    }

    #[test]
    fn test_tag_record_sorts_keys() {
        let value = tag_record(
            serde_json::json!({ "zeta": 1, "alpha": 2 }),
            "ui-state",
            50.0,
        )
        .unwrap();
        let line = serde_json::to_string(&value).unwrap();
        assert_eq!(
            line,
            r#"{"_type":"ui-state","alpha":2,"cli_time":50.0,"zeta":1}"#
        );
    }

    #[test]
    fn test_tag_record_rejects_non_object() {
        let err = tag_record(Value::from(3), "ui-state", 0.0).unwrap_err();
        assert!(matches!(err, Error::Serialization(_)));
    }

    #[test]
    fn test_append_is_line_per_record() {
        let dir = TempDir::new().unwrap();
        let mut journal = Journal::create(&dir.path().join("run-1")).unwrap();
        journal.append_line(&record("control-dict", 1)).unwrap();
        journal.append_line(&record("control-dict", 2)).unwrap();

        let contents = std::fs::read_to_string(journal.records_path()).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["_type"], "control-dict");
        assert_eq!(first["seq"], 1);
        let second: Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second["seq"], 2);
    }

    #[test]
    fn test_snapshot_replaces_atomically() {
        let dir = TempDir::new().unwrap();
        let journal = Journal::create(&dir.path().join("run-1")).unwrap();

        journal.snapshot(r#"{"a":1}"#).unwrap();
        assert_eq!(
            std::fs::read_to_string(journal.snapshot_path()).unwrap(),
            "{\"a\":1}\n"
        );

        journal.snapshot(r#"{"a":2}"#).unwrap();
        assert_eq!(
            std::fs::read_to_string(journal.snapshot_path()).unwrap(),
            "{\"a\":2}\n"
        );
        // The temp file never survives a completed snapshot.
        let temp = dir.path().join(format!("{}~", SNAPSHOT_FILE));
        assert!(!temp.exists());
    }

    #[test]
    fn test_snapshot_survives_crash_before_rename() {
        let dir = TempDir::new().unwrap();
        let journal = Journal::create(&dir.path().join("run-1")).unwrap();
        journal.snapshot(r#"{"a":1}"#).unwrap();

        // A crash between temp-write and rename leaves the temp file behind;
        // the installed snapshot must still hold the previous content.
        let temp = dir.path().join(format!("{}~", SNAPSHOT_FILE));
        std::fs::write(&temp, "{\"a\":").unwrap();
        assert_eq!(
            std::fs::read_to_string(journal.snapshot_path()).unwrap(),
            "{\"a\":1}\n"
        );

        // The next completed snapshot installs over both.
        journal.snapshot(r#"{"a":3}"#).unwrap();
        assert_eq!(
            std::fs::read_to_string(journal.snapshot_path()).unwrap(),
            "{\"a\":3}\n"
        );
        assert!(!temp.exists());
    }

    #[test]
    fn test_overlay_export() {
        let dir = TempDir::new().unwrap();
        let journal = Journal::create(&dir.path().join("run-1")).unwrap();
        journal.export_overlay("<svg></svg>").unwrap();
        assert_eq!(
            std::fs::read_to_string(dir.path().join(OVERLAY_FILE)).unwrap(),
            "<svg></svg>"
        );
    }
}
