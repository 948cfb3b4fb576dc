//! Append-only audit trail of dispatched sends.
//!
//! One JSON object per line. Every send produces a `before` record when its
//! task starts and an `after` record carrying the outcome, regardless of how
//! many reconnects happened in between.
//!
//! UTF-8 bodies are written as strings. Anything else is written as an array
//! of byte values with `"bodyEncoding": "bytes"`.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{self, LineWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use serde_json::{Map, Value};

/// Which side of the send a record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditAction {
    Before,
    After,
}

/// A single audit entry.
#[derive(Debug)]
pub struct AuditRecord<'a> {
    pub action: AuditAction,
    pub identifier: &'a str,
    pub destination_type: &'a str,
    pub destination_name: &'a str,
    pub body: &'a [u8],
    /// `None` on `before`; `"ok"` or the error text on `after`.
    pub outcome: Option<&'a str>,
    pub fields: &'a BTreeMap<String, String>,
}

impl AuditRecord<'_> {
    fn to_json(&self) -> Value {
        let mut map = Map::new();
        // caller fields go first so they can never shadow the core keys
        for (key, value) in self.fields {
            map.insert(key.clone(), Value::String(value.clone()));
        }
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        map.insert("ts".into(), ts.into());
        map.insert(
            "action".into(),
            serde_json::to_value(self.action).unwrap_or(Value::Null),
        );
        map.insert("identifier".into(), self.identifier.into());
        map.insert("destinationType".into(), self.destination_type.into());
        map.insert("destinationName".into(), self.destination_name.into());
        match std::str::from_utf8(self.body) {
            Ok(text) => {
                map.insert("body".into(), text.into());
            }
            Err(_) => {
                // raw bytes, so binary payloads survive the round trip
                map.insert("bodyEncoding".into(), "bytes".into());
                map.insert(
                    "body".into(),
                    Value::Array(self.body.iter().map(|&b| Value::from(b)).collect()),
                );
            }
        }
        if let Some(outcome) = self.outcome {
            map.insert("outcome".into(), outcome.into());
        }
        Value::Object(map)
    }
}

/// JSON-lines file sink shared by all workers.
#[derive(Debug)]
pub struct AuditSink {
    path: PathBuf,
    writer: Mutex<LineWriter<File>>,
}

impl AuditSink {
    /// Open (or create) `path` for appending.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: Mutex::new(LineWriter::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a record. Failures are logged and otherwise ignored so the
    /// audit trail can never fail a send.
    pub fn write(&self, record: &AuditRecord<'_>) {
        if let Err(e) = self.try_write(record) {
            tracing::error!(
                path = %self.path.display(),
                identifier = record.identifier,
                error = %e,
                "Failed to write audit record"
            );
        }
    }

    fn try_write(&self, record: &AuditRecord<'_>) -> io::Result<()> {
        let mut line = serde_json::to_vec(&record.to_json())?;
        line.push(b'\n');
        let mut writer = self.writer.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        writer.write_all(&line)
    }
}
