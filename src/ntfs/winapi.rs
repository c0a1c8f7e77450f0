//! Windows API bindings for raw volume access
//!
//! Safe wrappers around the Win32 calls the collector needs: a lock-tolerant
//! volume open, sector-aligned reads, and file extent lookups.

use crate::error::{RawGrabError, Result};
use crate::ntfs::extents::ClusterRun;
use crate::ntfs::structs::VolumeGeometry;
use crate::ntfs::volume::BlockDevice;
use std::ffi::OsStr;
use std::io::{self, Read, Seek, SeekFrom};
use std::os::windows::ffi::OsStrExt;

use windows::core::PCWSTR;
use windows::Win32::Foundation::{CloseHandle, HANDLE};
use windows::Win32::Storage::FileSystem::{
    CreateFileW, ReadFile, SetFilePointerEx, FILE_BEGIN, FILE_FLAGS_AND_ATTRIBUTES,
    FILE_SHARE_MODE, OPEN_EXISTING,
};
use windows::Win32::System::IO::DeviceIoControl;

// ============================================================================
// Control codes and access flags (from winioctl.h / winnt.h)
// ============================================================================

pub const FSCTL_GET_RETRIEVAL_POINTERS: u32 = 0x00090073;

pub const GENERIC_READ: u32 = 0x80000000;
pub const FILE_READ_ATTRIBUTES: u32 = 0x00000080;
pub const FILE_SHARE_READ: u32 = 0x00000001;
pub const FILE_SHARE_WRITE: u32 = 0x00000002;
pub const FILE_SHARE_DELETE: u32 = 0x00000004;
pub const FILE_FLAG_BACKUP_SEMANTICS: u32 = 0x02000000;

pub const INVALID_HANDLE_VALUE: isize = -1;

const ERROR_HANDLE_EOF: i32 = 38;
const ERROR_MORE_DATA: i32 = 234;

/// LCN reported for clusters that have no backing storage
const SPARSE_LCN: i64 = -1;

// ============================================================================
// Safe Handle Wrapper
// ============================================================================

/// RAII wrapper for Windows HANDLE
pub struct SafeHandle {
    handle: isize,
}

impl SafeHandle {
    /// Create from raw handle
    pub fn new(handle: isize) -> Option<Self> {
        if handle == INVALID_HANDLE_VALUE || handle == 0 {
            None
        } else {
            Some(Self { handle })
        }
    }

    fn raw(&self) -> HANDLE {
        HANDLE(self.handle as *mut std::ffi::c_void)
    }
}

impl Drop for SafeHandle {
    fn drop(&mut self) {
        unsafe {
            let _ = CloseHandle(self.raw());
        }
    }
}

// ============================================================================
// Opening volumes and files
// ============================================================================

/// Map a volume identifier (`C`, `c:`, or a full `\\.\` path) to its device path
pub fn volume_device_path(identifier: &str) -> Result<String> {
    if identifier.starts_with(r"\\") {
        return Ok(identifier.to_string());
    }

    let letter = identifier.strip_suffix(':').unwrap_or(identifier);
    let mut chars = letter.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) if c.is_ascii_alphabetic() => {
            Ok(format!("\\\\.\\{}:", c.to_ascii_uppercase()))
        }
        _ => Err(RawGrabError::InvalidVolume(identifier.to_string())),
    }
}

fn create_file(path: &str, access: u32, share: u32, flags: u32) -> io::Result<SafeHandle> {
    let wide_path: Vec<u16> = OsStr::new(path)
        .encode_wide()
        .chain(std::iter::once(0))
        .collect();

    let handle = unsafe {
        CreateFileW(
            PCWSTR::from_raw(wide_path.as_ptr()),
            access,
            FILE_SHARE_MODE(share),
            None,
            OPEN_EXISTING,
            FILE_FLAGS_AND_ATTRIBUTES(flags),
            None,
        )
    }
    .map_err(io::Error::from)?;

    SafeHandle::new(handle.0 as isize).ok_or_else(io::Error::last_os_error)
}

/// Open a volume for raw read access while it stays mounted and in use.
///
/// Other readers and writers are not excluded, so this works on the system
/// volume. Buffering is left on; [`VolumeDevice`] aligns reads itself.
pub fn open_volume(identifier: &str) -> Result<VolumeDevice> {
    let path = volume_device_path(identifier)?;
    let handle = create_file(&path, GENERIC_READ, FILE_SHARE_READ | FILE_SHARE_WRITE, 0)
        .map_err(|e| RawGrabError::VolumeOpen(path.clone(), e))?;

    Ok(VolumeDevice::new(handle))
}

/// Open a file for metadata queries only.
///
/// `FILE_READ_ATTRIBUTES` does not conflict with share modes, so this
/// succeeds on files another process holds open exclusively.
pub fn open_file_attributes(path: &str) -> Result<SafeHandle> {
    create_file(
        path,
        FILE_READ_ATTRIBUTES,
        FILE_SHARE_READ | FILE_SHARE_WRITE | FILE_SHARE_DELETE,
        FILE_FLAG_BACKUP_SEMANTICS,
    )
    .map_err(RawGrabError::Io)
}

// ============================================================================
// Raw volume device
// ============================================================================

/// Raw volume handle exposed as `Read + Seek`.
///
/// Raw volume reads must start and end on sector boundaries. Unaligned
/// requests are widened to whole sectors and the requested slice is copied
/// out, so callers can read any length at any offset.
pub struct VolumeDevice {
    handle: SafeHandle,
    position: u64,
    sector_size: u64,
}

impl VolumeDevice {
    fn new(handle: SafeHandle) -> Self {
        Self {
            handle,
            position: 0,
            sector_size: 512,
        }
    }

    fn read_at(&self, offset: u64, buffer: &mut [u8]) -> io::Result<usize> {
        let offset = i64::try_from(offset)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "offset out of range"))?;

        unsafe { SetFilePointerEx(self.handle.raw(), offset, None, FILE_BEGIN) }
            .map_err(io::Error::from)?;

        let mut bytes_read: u32 = 0;
        unsafe { ReadFile(self.handle.raw(), Some(buffer), Some(&mut bytes_read), None) }
            .map_err(io::Error::from)?;

        Ok(bytes_read as usize)
    }
}

impl Read for VolumeDevice {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        let sector = self.sector_size;
        let start = self.position - self.position % sector;
        let skip = (self.position - start) as usize;

        if skip == 0 && buf.len() as u64 % sector == 0 {
            let n = self.read_at(start, buf)?;
            self.position += n as u64;
            return Ok(n);
        }

        let span = (skip + buf.len()).div_ceil(sector as usize) * sector as usize;
        let mut scratch = vec![0u8; span];
        let got = self.read_at(start, &mut scratch)?;
        let available = got.saturating_sub(skip).min(buf.len());
        buf[..available].copy_from_slice(&scratch[skip..skip + available]);
        self.position += available as u64;
        Ok(available)
    }
}

impl Seek for VolumeDevice {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::Current(delta) => self.position.checked_add_signed(delta),
            SeekFrom::End(_) => {
                return Err(io::Error::new(
                    io::ErrorKind::Unsupported,
                    "raw volume devices cannot seek from the end",
                ))
            }
        };

        self.position = target
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "seek before start"))?;
        Ok(self.position)
    }
}

impl BlockDevice for VolumeDevice {
    fn configure(&mut self, geometry: &VolumeGeometry) {
        if geometry.bytes_per_sector() >= 512 {
            self.sector_size = geometry.bytes_per_sector() as u64;
        }
    }
}

// ============================================================================
// Retrieval Pointers
// ============================================================================

fn device_io_control(
    handle: &SafeHandle,
    control_code: u32,
    in_buffer: &[u8],
    out_buffer: &mut [u8],
) -> (std::result::Result<(), io::Error>, u32) {
    let mut bytes_returned: u32 = 0;

    let result = unsafe {
        DeviceIoControl(
            handle.raw(),
            control_code,
            Some(in_buffer.as_ptr() as *const std::ffi::c_void),
            in_buffer.len() as u32,
            Some(out_buffer.as_mut_ptr() as *mut std::ffi::c_void),
            out_buffer.len() as u32,
            Some(&mut bytes_returned),
            None,
        )
    };

    (result.map_err(io::Error::from), bytes_returned)
}

/// Cluster runs for a file handle, in VCN order.
///
/// Loops while the kernel reports `ERROR_MORE_DATA`. A resident file (data
/// stored inside its MFT record) has no runs and yields an empty list.
pub fn get_retrieval_pointers(handle: &SafeHandle) -> Result<Vec<ClusterRun>> {
    let mut buffer = vec![0u8; 64 * 1024];
    let mut runs = Vec::new();
    let mut start_vcn: u64 = 0;

    loop {
        let input = start_vcn.to_le_bytes();
        let (result, bytes_returned) =
            device_io_control(handle, FSCTL_GET_RETRIEVAL_POINTERS, &input, &mut buffer);

        let more_data = match result {
            Ok(()) => false,
            Err(e) if e.raw_os_error() == Some(ERROR_MORE_DATA) => true,
            Err(e) if e.raw_os_error() == Some(ERROR_HANDLE_EOF) => return Ok(runs),
            Err(e) => {
                return Err(RawGrabError::Windows(format!(
                    "DeviceIoControl(0x{:08X}) failed: {}",
                    FSCTL_GET_RETRIEVAL_POINTERS, e
                )))
            }
        };

        let bytes_returned = bytes_returned as usize;
        if bytes_returned < 16 {
            return Ok(runs);
        }

        // RETRIEVAL_POINTERS_BUFFER: ExtentCount, pad, StartingVcn, then (NextVcn, Lcn) pairs
        let extent_count = u32::from_le_bytes([buffer[0], buffer[1], buffer[2], buffer[3]]) as usize;
        let mut prev_vcn = read_u64(&buffer, 8);
        let mut pos = 16;

        for _ in 0..extent_count {
            if pos + 16 > bytes_returned {
                break;
            }

            let next_vcn = read_u64(&buffer, pos);
            let lcn = read_u64(&buffer, pos + 8) as i64;

            runs.push(ClusterRun {
                vcn: prev_vcn,
                lcn: if lcn == SPARSE_LCN { None } else { Some(lcn as u64) },
                cluster_count: next_vcn.saturating_sub(prev_vcn),
            });

            prev_vcn = next_vcn;
            pos += 16;
        }

        if !more_data || prev_vcn == start_vcn {
            return Ok(runs);
        }
        start_vcn = prev_vcn;
    }
}

fn read_u64(buffer: &[u8], at: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buffer[at..at + 8]);
    u64::from_le_bytes(bytes)
}
