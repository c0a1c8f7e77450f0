//! RawGrab - forensic raw file extraction from NTFS volumes
//!
//! Reads files straight off a volume by their on-disk extents, bypassing
//! filesystem locks held by the running system (registry hives, event logs,
//! the page file and friends).
//!
//! # Features
//!
//! - **Boot sector decoding**: volume geometry from the NTFS VBR
//! - **Raw volume access**: share-mode open of `\\.\X:` or any image file
//! - **Extent streaming**: a file's clusters stitched into one byte stream
//! - **Filesystem fallback**: files that cannot be read raw are copied normally
//! - **Collection reports**: one JSON line per requested file
//!
//! # Example
//!
//! ```no_run
//! use rawgrab::{ExtentReader, Pull, RawVolume};
//! use rawgrab::ntfs::{Extent, ExtentList};
//!
//! fn main() -> rawgrab::Result<()> {
//!     let mut volume = RawVolume::acquire("c")?;
//!     println!("Cluster size: {}", volume.geometry().bytes_per_cluster());
//!
//!     let extents = ExtentList::new(vec![Extent::new(1_000_000, 4096)]);
//!     let mut reader = ExtentReader::new(&mut volume, &extents, "SAM", Some(4096));
//!     let mut buf = vec![0u8; 1024];
//!     loop {
//!         let pull = reader.pull(&mut buf)?;
//!         // consume &buf[..pull.len()]
//!         if pull.is_end_of_stream() {
//!             break;
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod collect;
pub mod error;
pub mod logging;
pub mod ntfs;

// Re-export main types
pub use collect::{
    CollectConfig, CollectSummary, Collector, ExtentResolver, FileRecord, FileRequest,
    ManifestResolver, Method, ResolvedFile,
};
pub use error::{ErrorKind, RawGrabError, Result};

// Re-export NTFS types that users might need
pub use ntfs::{BlockDevice, ExtentList, ExtentReader, Pull, RawVolume, VolumeGeometry};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Format bytes as human-readable string
pub fn format_size(bytes: u64) -> String {
    humansize::format_size(bytes, humansize::BINARY)
}
