//! NTFS on-disk structures
//!
//! Only the volume boot record is decoded here. Everything else about a
//! file's layout arrives pre-resolved as an extent list.

use crate::error::{RawGrabError, Result};
use byteorder::{ByteOrder, LittleEndian};
use serde::ser::{Serialize, SerializeStruct, Serializer};

// ============================================================================
// Volume Boot Record layout
// ============================================================================

/// Size of the volume boot record read at acquisition time
pub const BOOT_SECTOR_SIZE: usize = 512;

/// Magic number at offset 0x03 (first four bytes of the OEM ID)
pub const NTFS_MAGIC: &[u8; 4] = b"NTFS";

pub const OFFSET_MAGIC: usize = 0x03;
pub const OFFSET_BYTES_PER_SECTOR: usize = 0x0B;
pub const OFFSET_SECTORS_PER_CLUSTER: usize = 0x0D;
pub const OFFSET_MFT_CLUSTER: usize = 0x30;
pub const OFFSET_MFT_RECORD_SIZE: usize = 0x40;
pub const OFFSET_CLUSTERS_PER_INDEX_RECORD: usize = 0x44;

// ============================================================================
// Volume Geometry
// ============================================================================

/// Per-volume constants decoded from the boot sector.
///
/// Fields are private so the derived values (`mft_offset`,
/// `mft_record_size`) can only come out of [`VolumeGeometry::parse`],
/// computed from the raw fields it validated. `bytes_per_cluster` is not
/// stored at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumeGeometry {
    bytes_per_sector: u16,
    sectors_per_cluster: u8,
    mft_record_size: u32,
    mft_cluster_offset: u64,
    mft_offset: u64,
    clusters_per_index_record: u8,
}

impl VolumeGeometry {
    /// Parse the first 512 bytes of a volume.
    ///
    /// Fails with [`RawGrabError::TruncatedMetadata`] for short input,
    /// [`RawGrabError::InvalidMagicNumber`] when offset 0x03 is not `NTFS`,
    /// [`RawGrabError::UnsupportedRecordSizeEncoding`] when the MFT record
    /// size byte is a cluster count rather than a negative exponent, and
    /// [`RawGrabError::MissingMftLocation`] when the MFT cluster is zero.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < BOOT_SECTOR_SIZE {
            return Err(RawGrabError::TruncatedMetadata { len: data.len() });
        }

        if &data[OFFSET_MAGIC..OFFSET_MAGIC + NTFS_MAGIC.len()] != NTFS_MAGIC {
            return Err(RawGrabError::InvalidMagicNumber);
        }

        let bytes_per_sector = LittleEndian::read_u16(&data[OFFSET_BYTES_PER_SECTOR..]);
        let sectors_per_cluster = data[OFFSET_SECTORS_PER_CLUSTER];
        let mft_record_size = mft_record_size_from_exponent(data[OFFSET_MFT_RECORD_SIZE])?;
        let bytes_per_cluster = cluster_size(bytes_per_sector, sectors_per_cluster);

        let mft_cluster_offset = LittleEndian::read_u64(&data[OFFSET_MFT_CLUSTER..]);
        if mft_cluster_offset == 0 {
            return Err(RawGrabError::MissingMftLocation);
        }
        // A cluster number that overflows a byte offset cannot locate anything either
        let mft_offset = mft_cluster_offset
            .checked_mul(bytes_per_cluster as u64)
            .ok_or(RawGrabError::MissingMftLocation)?;

        Ok(Self {
            bytes_per_sector,
            sectors_per_cluster,
            mft_record_size,
            mft_cluster_offset,
            mft_offset,
            clusters_per_index_record: data[OFFSET_CLUSTERS_PER_INDEX_RECORD],
        })
    }

    pub fn bytes_per_sector(&self) -> u16 {
        self.bytes_per_sector
    }

    pub fn sectors_per_cluster(&self) -> u8 {
        self.sectors_per_cluster
    }

    /// `sectors_per_cluster * bytes_per_sector`
    pub fn bytes_per_cluster(&self) -> u32 {
        cluster_size(self.bytes_per_sector, self.sectors_per_cluster)
    }

    /// Size of one MFT record in bytes
    pub fn mft_record_size(&self) -> u32 {
        self.mft_record_size
    }

    /// MFT location as stored in the boot sector, in clusters
    pub fn mft_cluster_offset(&self) -> u64 {
        self.mft_cluster_offset
    }

    /// MFT location as a byte offset from the start of the volume
    pub fn mft_offset(&self) -> u64 {
        self.mft_offset
    }

    pub fn clusters_per_index_record(&self) -> u8 {
        self.clusters_per_index_record
    }
}

fn cluster_size(bytes_per_sector: u16, sectors_per_cluster: u8) -> u32 {
    sectors_per_cluster as u32 * bytes_per_sector as u32
}

impl Serialize for VolumeGeometry {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("VolumeGeometry", 7)?;
        state.serialize_field("bytes_per_sector", &self.bytes_per_sector)?;
        state.serialize_field("sectors_per_cluster", &self.sectors_per_cluster)?;
        state.serialize_field("bytes_per_cluster", &self.bytes_per_cluster())?;
        state.serialize_field("mft_record_size", &self.mft_record_size)?;
        state.serialize_field("mft_cluster_offset", &self.mft_cluster_offset)?;
        state.serialize_field("mft_offset", &self.mft_offset)?;
        state.serialize_field("clusters_per_index_record", &self.clusters_per_index_record)?;
        state.end()
    }
}

/// Decode the "clusters per MFT record" byte at offset 0x40.
///
/// Only the negative form is accepted: the byte is read as an `i8`, negated,
/// and used as a power-of-two exponent. Valid domain is `0xE1..=0xFF`
/// (record sizes 2 bytes to 2 GiB). Positive values, which NTFS uses for a
/// cluster multiple, and exponents that do not fit a `u32` are rejected.
pub fn mft_record_size_from_exponent(raw: u8) -> Result<u32> {
    let signed = raw as i8;
    if signed >= 0 {
        return Err(RawGrabError::UnsupportedRecordSizeEncoding(raw));
    }

    let exponent = -(signed as i32) as u32;
    1u32.checked_shl(exponent)
        .ok_or(RawGrabError::UnsupportedRecordSizeEncoding(raw))
}
