//! NTFS raw access
//!
//! - Boot sector decoding into volume geometry
//! - Raw volume handles over any seekable block device
//! - Extent lists and the stream reader that stitches them together

pub mod extents;
pub mod reader;
pub mod structs;
pub mod volume;
#[cfg(windows)]
pub mod winapi;

// Re-export commonly used types
pub use extents::{ClusterRun, Extent, ExtentList};
pub use reader::{ExtentReader, Pull, ReaderState};
pub use structs::{mft_record_size_from_exponent, VolumeGeometry, BOOT_SECTOR_SIZE};
pub use volume::{BlockDevice, PlatformDevice, RawVolume};
