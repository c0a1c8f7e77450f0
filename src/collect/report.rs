//! JSON Lines collection report
//!
//! One record per requested file, written as soon as the file is done.

use crate::error::{ErrorKind, RawGrabError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::io::{self, Write};

use super::source::Method;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Collected,
    Failed,
}

/// Outcome of collecting one file
#[derive(Debug, Clone, Serialize)]
pub struct FileRecord {
    pub volume: String,
    pub path: String,
    pub output: Option<String>,
    pub method: Option<Method>,
    pub status: Status,
    pub bytes: u64,
    /// Size the resolver declared, when known
    pub expected: Option<u64>,
    pub error_kind: Option<ErrorKind>,
    pub error: Option<String>,
    /// Raw-access problem that caused an API fallback
    pub fallback_reason: Option<String>,
    pub collected_at: DateTime<Utc>,
}

impl FileRecord {
    pub fn collected(volume: &str, path: &str, output: String, method: Method, bytes: u64) -> Self {
        Self {
            volume: volume.to_string(),
            path: path.to_string(),
            output: Some(output),
            method: Some(method),
            status: Status::Collected,
            bytes,
            expected: None,
            error_kind: None,
            error: None,
            fallback_reason: None,
            collected_at: Utc::now(),
        }
    }

    pub fn failed(volume: &str, path: &str, error: &RawGrabError) -> Self {
        Self {
            volume: volume.to_string(),
            path: path.to_string(),
            output: None,
            method: None,
            status: Status::Failed,
            bytes: 0,
            expected: None,
            error_kind: Some(error.kind()),
            error: Some(error.to_string()),
            fallback_reason: None,
            collected_at: Utc::now(),
        }
    }
}

/// Streaming JSON Lines writer: one object per line, no enclosing array
pub struct JsonlWriter<W: Write> {
    inner: W,
}

impl<W: Write> JsonlWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub fn write<T: Serialize>(&mut self, value: &T) -> io::Result<()> {
        serde_json::to_writer(&mut self.inner, value)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        self.inner.write_all(b"\n")?;
        Ok(())
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_one_object_per_line() {
        let mut writer = JsonlWriter::new(Vec::new());
        writer
            .write(&FileRecord::collected("c", r"C:\a", "out/c/a".into(), Method::Raw, 10))
            .unwrap();
        writer
            .write(&FileRecord::failed("c", r"C:\b", &RawGrabError::MissingMftLocation))
            .unwrap();

        let text = String::from_utf8(writer.into_inner()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["method"], "raw");
        assert_eq!(first["status"], "collected");
        assert_eq!(first["bytes"], 10);

        let second: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second["status"], "failed");
        assert_eq!(second["error_kind"], "metadata");
    }
}
