//! Reader strategies
//!
//! A file is read either raw, by stitching its extents off the volume, or
//! through the normal filesystem API. Both present the same `io::Read`
//! contract: chunks of bytes, then `Ok(0)` at end of file, or an error.

use crate::error::Result;
use crate::ntfs::{BlockDevice, ExtentReader, RawVolume};
use serde::Serialize;
use std::fs::File;
use std::io::{self, Read};

use super::resolve::ResolvedFile;
use super::CollectConfig;

/// Which strategy produced a file's bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    Raw,
    Api,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Raw => "raw",
            Method::Api => "api",
        }
    }
}

/// The strategy chosen for one file, before anything is opened
#[derive(Debug)]
pub enum Strategy {
    Raw(ResolvedFile),
    Api {
        /// Why raw access was not used, if it was attempted
        reason: Option<String>,
    },
}

/// Decide how to read a file.
///
/// `raw_attempt` is `None` when raw access was never tried and otherwise the
/// resolver's answer. A resolution failure falls back to the API only when
/// the config allows it.
pub fn choose_strategy(
    config: &CollectConfig,
    raw_attempt: Option<Result<ResolvedFile>>,
) -> Result<Strategy> {
    match raw_attempt {
        Some(Ok(file)) if config.use_raw => Ok(Strategy::Raw(file)),
        Some(Ok(_)) => Ok(Strategy::Api { reason: None }),
        Some(Err(e)) if config.allow_api_fallback => Ok(Strategy::Api {
            reason: Some(e.to_string()),
        }),
        Some(Err(e)) => Err(e),
        None => Ok(Strategy::Api { reason: None }),
    }
}

/// A file's bytes on demand, from whichever strategy was chosen
pub enum FileSource<'a, D: BlockDevice> {
    Raw(ExtentReader<'a, D>),
    Api(File),
}

impl<'a, D: BlockDevice> FileSource<'a, D> {
    /// Open the raw reader over `file`'s extents
    pub fn raw(volume: &'a mut RawVolume<D>, file: &'a ResolvedFile) -> Self {
        FileSource::Raw(ExtentReader::new(volume, &file.extents, file.path.clone(), file.size))
    }

    /// Open `path` through the filesystem
    pub fn api(path: &str) -> Result<Self> {
        Ok(FileSource::Api(File::open(path)?))
    }

    pub fn method(&self) -> Method {
        match self {
            FileSource::Raw(_) => Method::Raw,
            FileSource::Api(_) => Method::Api,
        }
    }
}

impl<D: BlockDevice> Read for FileSource<'_, D> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            FileSource::Raw(reader) => reader.read(buf),
            FileSource::Api(file) => file.read(buf),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RawGrabError;
    use crate::ntfs::ExtentList;
    use std::io::{Cursor, Write};

    fn resolved() -> ResolvedFile {
        ResolvedFile {
            path: "C:\\x".into(),
            extents: ExtentList::default(),
            size: None,
        }
    }

    #[test]
    fn resolved_file_goes_raw() {
        let config = CollectConfig::default();
        assert!(matches!(
            choose_strategy(&config, Some(Ok(resolved()))).unwrap(),
            Strategy::Raw(_)
        ));
    }

    #[test]
    fn resolution_failure_falls_back_when_allowed() {
        let config = CollectConfig::default();
        let failure = Err(RawGrabError::UnresolvedFile("x".into(), "gone".into()));
        match choose_strategy(&config, Some(failure)).unwrap() {
            Strategy::Api { reason } => assert!(reason.unwrap().contains("gone")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn resolution_failure_is_fatal_without_fallback() {
        let config = CollectConfig {
            allow_api_fallback: false,
            ..Default::default()
        };
        let failure = Err(RawGrabError::UnresolvedFile("x".into(), "gone".into()));
        assert!(choose_strategy(&config, Some(failure)).is_err());
    }

    #[test]
    fn raw_disabled_uses_api() {
        let config = CollectConfig {
            use_raw: false,
            ..Default::default()
        };
        assert!(matches!(
            choose_strategy(&config, None).unwrap(),
            Strategy::Api { reason: None }
        ));
    }

    #[test]
    fn api_source_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"fallback bytes").unwrap();

        let mut source =
            FileSource::<Cursor<Vec<u8>>>::api(file.path().to_str().unwrap()).unwrap();
        assert_eq!(source.method(), Method::Api);
        assert_eq!(source.method().as_str(), "api");
        let mut out = String::new();
        source.read_to_string(&mut out).unwrap();
        assert_eq!(out, "fallback bytes");
    }

    #[test]
    fn missing_api_file_is_device_error() {
        let result = FileSource::<Cursor<Vec<u8>>>::api("/nonexistent/rawgrab/file");
        assert!(matches!(result, Err(RawGrabError::Io(_))));
    }
}
