//! Error types for rawgrab
//!
//! Covers boot-sector metadata, extent bookkeeping, raw device I/O and the
//! collection glue around them.

use thiserror::Error;

/// Main error type for rawgrab operations
#[derive(Error, Debug)]
pub enum RawGrabError {
    #[error("Boot sector truncated: got {len} bytes, need 512")]
    TruncatedMetadata { len: usize },

    #[error("Boot sector does not carry the 'NTFS' magic number")]
    InvalidMagicNumber,

    #[error("Unsupported MFT record size encoding 0x{0:02X} (only negative power-of-two exponents are supported)")]
    UnsupportedRecordSizeEncoding(u8),

    #[error("Boot sector has a zero MFT cluster offset")]
    MissingMftLocation,

    #[error("No extents to read for '{0}'")]
    NoExtents(String),

    #[error("Extent list for '{file}' exhausted after {extent_count} extents: delivered {delivered} of {declared_size} declared bytes")]
    ExtentListExhausted {
        file: String,
        extent_count: usize,
        declared_size: u64,
        delivered: u64,
    },

    #[error("Stream for '{0}' already failed and cannot be read again")]
    StreamFailed(String),

    #[error("Invalid extent list for '{0}': {1}")]
    InvalidExtentList(String, String),

    #[error("Failed to open volume '{0}': {1}")]
    VolumeOpen(String, std::io::Error),

    #[error("Invalid volume identifier: {0}")]
    InvalidVolume(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Could not resolve extents for '{0}': {1}")]
    UnresolvedFile(String, String),

    #[error("Manifest error: {0}")]
    Manifest(String),

    #[error("Windows API error: {0}")]
    Windows(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for rawgrab operations
pub type Result<T> = std::result::Result<T, RawGrabError>;

/// Coarse classification used when reporting a failed file
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Boot sector could not be decoded
    Metadata,
    /// Extent list missing or inconsistent with the declared size
    Extent,
    /// Open, seek or read failed on the underlying device
    Device,
    /// Reader was pulled after failing
    Stream,
    /// Bad request, manifest or resolution input
    Input,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Metadata => "metadata",
            ErrorKind::Extent => "extent",
            ErrorKind::Device => "device",
            ErrorKind::Stream => "stream",
            ErrorKind::Input => "input",
        }
    }
}

impl RawGrabError {
    /// Create a Windows API error from a raw error code
    pub fn from_win32(code: u32, context: &str) -> Self {
        RawGrabError::Windows(format!("{}: Win32 error code {}", context, code))
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            RawGrabError::TruncatedMetadata { .. }
            | RawGrabError::InvalidMagicNumber
            | RawGrabError::UnsupportedRecordSizeEncoding(_)
            | RawGrabError::MissingMftLocation => ErrorKind::Metadata,
            RawGrabError::NoExtents(_)
            | RawGrabError::ExtentListExhausted { .. }
            | RawGrabError::InvalidExtentList(_, _) => ErrorKind::Extent,
            RawGrabError::StreamFailed(_) => ErrorKind::Stream,
            RawGrabError::VolumeOpen(_, _) | RawGrabError::Windows(_) | RawGrabError::Io(_) => {
                ErrorKind::Device
            }
            RawGrabError::InvalidVolume(_)
            | RawGrabError::InvalidPath(_)
            | RawGrabError::UnresolvedFile(_, _)
            | RawGrabError::Manifest(_) => ErrorKind::Input,
        }
    }

    /// Whether a collection session should skip the affected file and carry on
    pub fn is_recoverable(&self) -> bool {
        !matches!(self.kind(), ErrorKind::Metadata)
    }

    /// Recover a crate error that travelled through `std::io::Read` as an `io::Error`.
    pub fn from_io(err: std::io::Error) -> Self {
        if !err.get_ref().is_some_and(|inner| inner.is::<RawGrabError>()) {
            return RawGrabError::Io(err);
        }
        match err.into_inner().map(|inner| inner.downcast::<RawGrabError>()) {
            Some(Ok(own)) => *own,
            _ => RawGrabError::Io(std::io::Error::other("lost error payload")),
        }
    }
}

impl From<RawGrabError> for std::io::Error {
    fn from(err: RawGrabError) -> Self {
        match err {
            RawGrabError::Io(io) => io,
            other => std::io::Error::other(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_errors_are_classified() {
        assert_eq!(RawGrabError::InvalidMagicNumber.kind(), ErrorKind::Metadata);
        assert_eq!(RawGrabError::MissingMftLocation.kind(), ErrorKind::Metadata);
        assert!(!RawGrabError::TruncatedMetadata { len: 10 }.is_recoverable());
        assert_eq!(RawGrabError::InvalidMagicNumber.kind().as_str(), "metadata");
    }

    #[test]
    fn crate_error_survives_io_round_trip() {
        let io: std::io::Error = RawGrabError::NoExtents("a.txt".into()).into();
        match RawGrabError::from_io(io) {
            RawGrabError::NoExtents(name) => assert_eq!(name, "a.txt"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn plain_io_error_stays_device_kind() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err = RawGrabError::from_io(io);
        assert_eq!(err.kind(), ErrorKind::Device);
    }
}
