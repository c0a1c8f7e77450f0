//! Raw volume access
//!
//! A [`RawVolume`] owns one read channel onto a block device plus the
//! geometry decoded from its boot sector. Extent readers borrow it mutably,
//! so only one of them can move the device cursor at a time.

use crate::error::{RawGrabError, Result};
use crate::logging;
use crate::ntfs::structs::{VolumeGeometry, BOOT_SECTOR_SIZE};
use std::fs::File;
use std::io::{Cursor, Read, Seek, SeekFrom};

/// Anything a volume can be read from.
///
/// `configure` runs once, right after the boot sector has been parsed, for
/// devices that need the sector size (raw Windows volumes do).
pub trait BlockDevice: Read + Seek {
    fn configure(&mut self, _geometry: &VolumeGeometry) {}
}

impl BlockDevice for File {}

impl<T: AsRef<[u8]>> BlockDevice for Cursor<T> {}

impl<D: BlockDevice + ?Sized> BlockDevice for Box<D> {
    fn configure(&mut self, geometry: &VolumeGeometry) {
        (**self).configure(geometry)
    }
}

/// Device type returned by [`RawVolume::acquire`] on this platform
#[cfg(windows)]
pub type PlatformDevice = crate::ntfs::winapi::VolumeDevice;

/// Device type returned by [`RawVolume::acquire`] on this platform
#[cfg(not(windows))]
pub type PlatformDevice = File;

/// An open NTFS volume with its parsed geometry
pub struct RawVolume<D: BlockDevice = PlatformDevice> {
    device: D,
    identifier: String,
    geometry: VolumeGeometry,
    /// Absolute offset of the next byte the device will return
    tracked_cursor: u64,
}

impl RawVolume<PlatformDevice> {
    /// Open the device behind `identifier` and parse its boot sector.
    ///
    /// On Windows the identifier is a drive letter (`C`, `C:`) or a `\\.\`
    /// device path, opened with a share mode that tolerates the volume being
    /// mounted and busy. Elsewhere it is a block device or image path.
    pub fn acquire(identifier: &str) -> Result<Self> {
        #[cfg(windows)]
        let device = crate::ntfs::winapi::open_volume(identifier)?;

        #[cfg(not(windows))]
        let device = File::open(identifier)
            .map_err(|e| RawGrabError::VolumeOpen(identifier.to_string(), e))?;

        Self::open(identifier, device)
    }
}

impl<D: BlockDevice> RawVolume<D> {
    /// Read the boot sector from `device` and build a handle around it.
    ///
    /// Any failure consumes the device; there is no partially usable handle.
    pub fn open(identifier: impl Into<String>, mut device: D) -> Result<Self> {
        let identifier = identifier.into();

        device.seek(SeekFrom::Start(0))?;
        let mut boot_sector = [0u8; BOOT_SECTOR_SIZE];
        let bytes_read = read_up_to(&mut device, &mut boot_sector)?;
        if bytes_read < BOOT_SECTOR_SIZE {
            logging::warn(
                "VOLUME",
                &format!("Short boot sector read on {}: {} bytes", identifier, bytes_read),
            );
            return Err(RawGrabError::TruncatedMetadata { len: bytes_read });
        }

        let geometry = VolumeGeometry::parse(&boot_sector).inspect_err(|e| {
            logging::warn("VOLUME", &format!("Boot sector of {} rejected: {}", identifier, e));
        })?;
        device.configure(&geometry);

        logging::info(
            "VOLUME",
            &format!(
                "Acquired {}: bytes_per_sector={}, sectors_per_cluster={}, bytes_per_cluster={}, \
                 mft_offset={}, mft_record_size={}",
                identifier,
                geometry.bytes_per_sector(),
                geometry.sectors_per_cluster(),
                geometry.bytes_per_cluster(),
                geometry.mft_offset(),
                geometry.mft_record_size(),
            ),
        );

        Ok(Self {
            device,
            identifier,
            geometry,
            tracked_cursor: BOOT_SECTOR_SIZE as u64,
        })
    }

    /// Position the device at `absolute_offset` and record it as the cursor
    pub fn seek_to(&mut self, absolute_offset: u64) -> Result<()> {
        self.device.seek(SeekFrom::Start(absolute_offset))?;
        self.tracked_cursor = absolute_offset;
        Ok(())
    }

    /// Fill `buffer` from the current device position.
    ///
    /// A short read is an error. The tracked cursor is left alone; whoever
    /// drives the read is responsible for advancing it.
    pub fn read_into(&mut self, buffer: &mut [u8]) -> Result<()> {
        self.device.read_exact(buffer)?;
        Ok(())
    }

    pub fn tracked_cursor(&self) -> u64 {
        self.tracked_cursor
    }

    pub fn set_tracked_cursor(&mut self, value: u64) {
        self.tracked_cursor = value;
    }

    pub fn geometry(&self) -> &VolumeGeometry {
        &self.geometry
    }

    pub fn volume_identifier(&self) -> &str {
        &self.identifier
    }

    /// Release the device
    pub fn close(self) {
        logging::debug("VOLUME", &format!("Closing {}", self.identifier));
    }
}

/// Read until `buffer` is full or the device reports end of data
fn read_up_to<R: Read>(reader: &mut R, buffer: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buffer.len() {
        match reader.read(&mut buffer[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn image(len: usize) -> Vec<u8> {
        let mut data = vec![0u8; len];
        data[3..11].copy_from_slice(b"NTFS    ");
        data[0x0B..0x0D].copy_from_slice(&512u16.to_le_bytes());
        data[0x0D] = 8;
        data[0x30..0x38].copy_from_slice(&4u64.to_le_bytes());
        data[0x40] = 0xF6;
        data[0x44] = 1;
        data
    }

    #[test]
    fn open_parses_geometry() {
        let volume = RawVolume::open("img", Cursor::new(image(8192))).unwrap();
        assert_eq!(volume.geometry().bytes_per_cluster(), 4096);
        assert_eq!(volume.volume_identifier(), "img");
        assert_eq!(volume.tracked_cursor(), 512);
    }

    #[test]
    fn short_device_fails_as_truncated() {
        let result = RawVolume::open("tiny", Cursor::new(image(512)[..300].to_vec()));
        assert!(matches!(result, Err(RawGrabError::TruncatedMetadata { len: 300 })));
    }

    #[test]
    fn foreign_device_fails_acquisition() {
        let mut data = image(1024);
        data[3..7].copy_from_slice(b"FAT3");
        assert!(matches!(
            RawVolume::open("fat", Cursor::new(data)),
            Err(RawGrabError::InvalidMagicNumber)
        ));
    }

    #[test]
    fn seek_updates_cursor_and_read_does_not() {
        let mut data = image(8192);
        data[4096..4100].copy_from_slice(b"DATA");
        let mut volume = RawVolume::open("img", Cursor::new(data)).unwrap();

        volume.seek_to(4096).unwrap();
        assert_eq!(volume.tracked_cursor(), 4096);

        let mut buf = [0u8; 4];
        volume.read_into(&mut buf).unwrap();
        assert_eq!(&buf, b"DATA");
        assert_eq!(volume.tracked_cursor(), 4096);

        volume.set_tracked_cursor(4100);
        assert_eq!(volume.tracked_cursor(), 4100);
    }

    #[test]
    fn read_past_end_is_an_io_error() {
        let mut volume = RawVolume::open("img", Cursor::new(image(1024))).unwrap();
        volume.seek_to(1000).unwrap();
        let mut buf = [0u8; 100];
        assert!(matches!(volume.read_into(&mut buf), Err(RawGrabError::Io(_))));
    }

    #[test]
    fn image_file_can_be_opened_as_device() {
        let mut file = tempfile::tempfile().unwrap();
        file.write_all(&image(4096)).unwrap();
        let volume = RawVolume::open("file", file).unwrap();
        assert_eq!(volume.geometry().mft_offset(), 16384);
    }

    #[cfg(not(windows))]
    #[test]
    fn acquire_missing_device_fails() {
        assert!(matches!(
            RawVolume::acquire("/nonexistent/rawgrab-device"),
            Err(RawGrabError::VolumeOpen(_, _))
        ));
    }
}
