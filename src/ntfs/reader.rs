//! Extent stream reader
//!
//! Turns an ordered extent list into one sequential byte stream, pulled a
//! buffer at a time through a borrowed [`RawVolume`].

use crate::error::{RawGrabError, Result};
use crate::logging;
use crate::ntfs::extents::ExtentList;
use crate::ntfs::volume::{BlockDevice, RawVolume};
use std::io;

/// Outcome of one pull
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pull {
    /// `n` bytes were written to the front of the buffer, more may follow
    Chunk(usize),
    /// `n` bytes were written and they complete the file
    Last(usize),
    /// The file was already complete; nothing was written
    End,
}

impl Pull {
    /// Bytes written to the destination by this pull
    pub fn len(&self) -> usize {
        match self {
            Pull::Chunk(n) | Pull::Last(n) => *n,
            Pull::End => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_end_of_stream(&self) -> bool {
        !matches!(self, Pull::Chunk(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderState {
    Uninitialized,
    Streaming,
    Exhausted,
    Failed,
}

/// Pull-based reader over a file's extents.
///
/// Holding `&mut RawVolume` for its whole life, the reader is the only thing
/// touching the device cursor while it exists. Each pull returns bytes from
/// a single extent; crossing into the next extent always takes a new pull.
pub struct ExtentReader<'a, D: BlockDevice> {
    volume: &'a mut RawVolume<D>,
    extents: &'a ExtentList,
    file_name: String,
    extent_index: usize,
    extent_remaining: u64,
    total_size: Option<u64>,
    delivered: u64,
    state: ReaderState,
}

impl<'a, D: BlockDevice> ExtentReader<'a, D> {
    /// Create a reader. Nothing touches the device until the first pull.
    ///
    /// When `declared_size` is `None` the file size is taken to be the sum
    /// of the extent lengths.
    pub fn new(
        volume: &'a mut RawVolume<D>,
        extents: &'a ExtentList,
        file_name: impl Into<String>,
        declared_size: Option<u64>,
    ) -> Self {
        Self {
            volume,
            extents,
            file_name: file_name.into(),
            extent_index: 0,
            extent_remaining: 0,
            total_size: declared_size,
            delivered: 0,
            state: ReaderState::Uninitialized,
        }
    }

    pub fn state(&self) -> ReaderState {
        self.state
    }

    /// Declared size, or the computed one once the reader has started
    pub fn total_size(&self) -> Option<u64> {
        self.total_size
    }

    /// Produce up to `buf.len()` bytes of the file into `buf`.
    ///
    /// Only the first [`Pull::len`] bytes of `buf` are meaningful. The pull
    /// that completes the file reports its true count as [`Pull::Last`];
    /// any pull after that returns [`Pull::End`] without touching the device.
    /// After an error the reader is failed and every further pull errors.
    pub fn pull(&mut self, buf: &mut [u8]) -> Result<Pull> {
        match self.state {
            ReaderState::Exhausted => return Ok(Pull::End),
            ReaderState::Failed => return Err(RawGrabError::StreamFailed(self.file_name.clone())),
            ReaderState::Uninitialized => {
                if let Err(e) = self.start() {
                    self.state = ReaderState::Failed;
                    return Err(e);
                }
            }
            ReaderState::Streaming => {}
        }

        self.step(buf).inspect_err(|e| {
            self.state = ReaderState::Failed;
            logging::warn("READER", &format!("Reading '{}' failed: {}", self.file_name, e));
        })
    }

    fn start(&mut self) -> Result<()> {
        let first = *self
            .extents
            .get(0)
            .ok_or_else(|| RawGrabError::NoExtents(self.file_name.clone()))?;

        let total_size = *self
            .total_size
            .get_or_insert_with(|| self.extents.total_length());

        if logging::debug_enabled() {
            let mut run_sum = 0u64;
            for (i, extent) in self.extents.iter().enumerate() {
                run_sum = run_sum.saturating_add(extent.length);
                logging::debug(
                    "READER",
                    &format!(
                        "'{}' extent {}: offset={} length={} run_sum={}",
                        self.file_name, i, extent.absolute_offset, extent.length, run_sum
                    ),
                );
            }
        }

        self.extent_index = 0;
        self.extent_remaining = first.length;
        self.volume.seek_to(first.absolute_offset)?;
        self.state = ReaderState::Streaming;

        logging::debug(
            "READER",
            &format!(
                "Reading extent 1 of {} for '{}' ({} bytes total) at absolute offset {}",
                self.extents.len(),
                self.file_name,
                total_size,
                first.absolute_offset
            ),
        );
        Ok(())
    }

    fn step(&mut self, buf: &mut [u8]) -> Result<Pull> {
        let total_size = self.total_size.unwrap_or(0);
        let want = (buf.len() as u64)
            .min(self.extent_remaining)
            .min(total_size - self.delivered) as usize;

        self.volume.read_into(&mut buf[..want])?;
        let cursor = self.volume.tracked_cursor() + want as u64;
        self.volume.set_tracked_cursor(cursor);
        self.delivered += want as u64;
        self.extent_remaining -= want as u64;

        if self.delivered == total_size {
            self.state = ReaderState::Exhausted;
            logging::debug(
                "READER",
                &format!("Finished '{}' after {} bytes", self.file_name, self.delivered),
            );
            return Ok(Pull::Last(want));
        }

        if self.extent_remaining == 0 {
            self.extent_index += 1;
            let next = *self.extents.get(self.extent_index).ok_or_else(|| {
                RawGrabError::ExtentListExhausted {
                    file: self.file_name.clone(),
                    extent_count: self.extents.len(),
                    declared_size: total_size,
                    delivered: self.delivered,
                }
            })?;

            self.extent_remaining = next.length;
            self.volume.seek_to(next.absolute_offset)?;

            logging::debug(
                "READER",
                &format!(
                    "Reading extent {} of {} for '{}' ({} bytes) at absolute offset {}",
                    self.extent_index + 1,
                    self.extents.len(),
                    self.file_name,
                    next.length,
                    next.absolute_offset
                ),
            );
        }

        Ok(Pull::Chunk(want))
    }
}

impl<D: BlockDevice> io::Read for ExtentReader<'_, D> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let pull = self.pull(buf)?;
            // An empty chunk only means an extent boundary was crossed
            if pull.is_empty() && !pull.is_end_of_stream() && !buf.is_empty() {
                continue;
            }
            return Ok(pull.len());
        }
    }
}
