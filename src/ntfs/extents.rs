//! Extent lists
//!
//! A file's content as an ordered list of absolute byte ranges on the
//! volume. Concatenating the ranges in order gives the file's bytes.

use crate::error::{RawGrabError, Result};
use serde::{Deserialize, Serialize};

/// One contiguous run of file content on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extent {
    /// Byte offset from the start of the volume
    #[serde(rename = "offset")]
    pub absolute_offset: u64,
    /// Number of bytes in this run
    pub length: u64,
}

impl Extent {
    pub fn new(absolute_offset: u64, length: u64) -> Self {
        Self {
            absolute_offset,
            length,
        }
    }

    /// First byte offset past the end of this extent
    pub fn end(&self) -> u64 {
        self.absolute_offset.saturating_add(self.length)
    }
}

/// One run of a file's virtual-to-logical cluster mapping
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterRun {
    pub vcn: u64,
    /// `None` for sparse runs with no clusters on disk
    pub lcn: Option<u64>,
    pub cluster_count: u64,
}

/// Ordered extents describing one file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExtentList {
    extents: Vec<Extent>,
}

impl ExtentList {
    pub fn new(extents: Vec<Extent>) -> Self {
        Self { extents }
    }

    pub fn len(&self) -> usize {
        self.extents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.extents.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Extent> {
        self.extents.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Extent> {
        self.extents.iter()
    }

    pub fn as_slice(&self) -> &[Extent] {
        &self.extents
    }

    /// Sum of all extent lengths
    pub fn total_length(&self) -> u64 {
        self.extents.iter().map(|e| e.length).sum()
    }

    /// Check that every extent is non-empty and that no two extents overlap.
    ///
    /// The stream reader itself trusts its input; resolvers call this on
    /// anything they did not compute themselves.
    pub fn validate(&self, file: &str) -> Result<()> {
        if let Some(index) = self.extents.iter().position(|e| e.length == 0) {
            return Err(RawGrabError::InvalidExtentList(
                file.to_string(),
                format!("extent {} has zero length", index),
            ));
        }

        if let Some(index) = self
            .extents
            .iter()
            .position(|e| e.absolute_offset.checked_add(e.length).is_none())
        {
            return Err(RawGrabError::InvalidExtentList(
                file.to_string(),
                format!("extent {} runs past the end of the address space", index),
            ));
        }

        let mut sorted: Vec<&Extent> = self.extents.iter().collect();
        sorted.sort_by_key(|e| e.absolute_offset);
        for pair in sorted.windows(2) {
            if pair[0].end() > pair[1].absolute_offset {
                return Err(RawGrabError::InvalidExtentList(
                    file.to_string(),
                    format!(
                        "extent at {} (+{}) overlaps extent at {}",
                        pair[0].absolute_offset, pair[0].length, pair[1].absolute_offset
                    ),
                ));
            }
        }

        Ok(())
    }
}

impl From<Vec<Extent>> for ExtentList {
    fn from(extents: Vec<Extent>) -> Self {
        Self::new(extents)
    }
}

impl<'a> IntoIterator for &'a ExtentList {
    type Item = &'a Extent;
    type IntoIter = std::slice::Iter<'a, Extent>;

    fn into_iter(self) -> Self::IntoIter {
        self.extents.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_length_sums_runs() {
        let list = ExtentList::new(vec![Extent::new(1_000_000, 4096), Extent::new(2_000_000, 2048)]);
        assert_eq!(list.total_length(), 6144);
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn single_extent_is_valid() {
        let list = ExtentList::new(vec![Extent::new(8192, 100)]);
        assert!(list.validate("one.bin").is_ok());
    }

    #[test]
    fn zero_length_extent_is_rejected() {
        let list = ExtentList::new(vec![Extent::new(0, 512), Extent::new(4096, 0)]);
        assert!(matches!(
            list.validate("f"),
            Err(RawGrabError::InvalidExtentList(_, _))
        ));
    }

    #[test]
    fn overlap_is_rejected_regardless_of_order() {
        let list = ExtentList::new(vec![Extent::new(10_000, 4096), Extent::new(8192, 4096)]);
        assert!(list.validate("f").is_err());

        let adjacent = ExtentList::new(vec![Extent::new(8192, 4096), Extent::new(12288, 4096)]);
        assert!(adjacent.validate("f").is_ok());
    }

    #[test]
    fn deserializes_manifest_shape() {
        let list: ExtentList =
            serde_json::from_str(r#"[{"offset": 4096, "length": 10}]"#).unwrap();
        assert_eq!(list.get(0), Some(&Extent::new(4096, 10)));
    }
}
