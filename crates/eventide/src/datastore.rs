//! Datastore sink boundary.
//!
//! The hub's only obligations toward persistence are the four [`EventSink`]
//! operations; the store's internal format stays behind the trait. The
//! shipped [`JsonlStore`] appends one JSON record per line, which is
//! grep-able during piloting and trivially importable afterwards.

use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde_json::Value;
use tideconf::StoreConfig;
use tideproto::Event;

/// Append-only event store the pipeline writes into.
pub trait EventSink: Send + Sync {
    fn write_event(&mut self, event: &Event) -> io::Result<()>;
    fn write_session_metadata(&mut self, meta: &Value) -> io::Result<()>;
    fn flush(&mut self) -> io::Result<()>;
    /// Flush and release the underlying file. Writes after close fail.
    fn close(&mut self) -> io::Result<()>;
}

/// JSON-lines file store.
pub struct JsonlStore {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
}

impl JsonlStore {
    /// Open (appending) the store file described by config, resolving a
    /// relative `parent_dir` against the hub's work dir.
    pub fn create(work_dir: &Path, config: &StoreConfig) -> io::Result<Self> {
        let parent = if Path::new(&config.parent_dir).is_absolute() {
            PathBuf::from(&config.parent_dir)
        } else {
            work_dir.join(&config.parent_dir)
        };
        std::fs::create_dir_all(&parent)?;

        let path = parent.join(format!("{}.jsonl", config.filename));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        Ok(Self {
            path,
            writer: Some(BufWriter::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_record(&mut self, record: Value) -> io::Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "store is closed"))?;
        serde_json::to_writer(&mut *writer, &record)?;
        writer.write_all(b"\n")
    }
}

impl EventSink for JsonlStore {
    fn write_event(&mut self, event: &Event) -> io::Result<()> {
        self.write_record(serde_json::json!({
            "record": "event",
            "event": event,
        }))
    }

    fn write_session_metadata(&mut self, meta: &Value) -> io::Result<()> {
        self.write_record(serde_json::json!({
            "record": "session",
            "written_at": chrono::Utc::now().to_rfc3339(),
            "meta": meta,
        }))
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.writer.as_mut() {
            Some(writer) => writer.flush(),
            None => Ok(()),
        }
    }

    fn close(&mut self) -> io::Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tideproto::{EventData, EventKind};

    fn sample_event() -> Event {
        Event {
            event_id: 1,
            device: "pulse".into(),
            kind: EventKind::Pulse,
            device_time: 0.5,
            logged_time: 0.5,
            time: 0.5,
            confidence_interval: 0.01,
            delay: 0.005,
            data: EventData::Pulse { count: 0 },
        }
    }

    #[test]
    fn writes_event_and_session_records() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig::default();
        let mut store = JsonlStore::create(dir.path(), &config).unwrap();

        store
            .write_session_metadata(&serde_json::json!({"code": "S001"}))
            .unwrap();
        store.write_event(&sample_event()).unwrap();
        store.flush().unwrap();

        let contents = std::fs::read_to_string(store.path()).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);

        let session: Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(session["record"], "session");
        assert_eq!(session["meta"]["code"], "S001");

        let event: Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(event["record"], "event");
        assert_eq!(event["event"]["device"], "pulse");
        assert_eq!(event["event"]["event_id"], 1);
    }

    #[test]
    fn relative_parent_resolves_against_work_dir() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig {
            enable: true,
            filename: "run1".into(),
            parent_dir: "data".into(),
        };
        let store = JsonlStore::create(dir.path(), &config).unwrap();
        assert_eq!(store.path(), dir.path().join("data/run1.jsonl"));
        assert!(store.path().exists());
    }

    #[test]
    fn write_after_close_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = JsonlStore::create(dir.path(), &StoreConfig::default()).unwrap();
        store.close().unwrap();
        let err = store.write_event(&sample_event()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
        // flush and close stay idempotent.
        store.flush().unwrap();
        store.close().unwrap();
    }

    #[test]
    fn append_mode_preserves_existing_records() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig::default();
        {
            let mut store = JsonlStore::create(dir.path(), &config).unwrap();
            store.write_event(&sample_event()).unwrap();
            store.close().unwrap();
        }
        {
            let mut store = JsonlStore::create(dir.path(), &config).unwrap();
            store.write_event(&sample_event()).unwrap();
            store.close().unwrap();
        }
        let contents = std::fs::read_to_string(dir.path().join("events.jsonl")).unwrap();
        assert_eq!(contents.lines().count(), 2);
    }
}
