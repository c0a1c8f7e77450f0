//! Extent resolution
//!
//! Turning "this path on this volume" into an extent list is somebody else's
//! job; [`ExtentResolver`] is the seam. Two resolvers ship here: a JSON
//! manifest of pre-computed extents, and on Windows a live lookup through
//! `FSCTL_GET_RETRIEVAL_POINTERS`.

use crate::error::{RawGrabError, Result};
use crate::logging;
use crate::ntfs::{ClusterRun, Extent, ExtentList, VolumeGeometry};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

/// Where a file's bytes live
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedFile {
    pub path: String,
    pub extents: ExtentList,
    /// Logical size; `None` means the extents cover the file exactly
    pub size: Option<u64>,
}

pub trait ExtentResolver {
    fn resolve(&mut self, volume: &str, geometry: &VolumeGeometry, path: &str)
        -> Result<ResolvedFile>;
}

// ============================================================================
// Manifest resolver
// ============================================================================

/// One entry of an extent manifest
#[derive(Debug, Clone, Deserialize)]
pub struct ManifestEntry {
    pub volume: String,
    pub path: String,
    #[serde(default)]
    pub size: Option<u64>,
    pub extents: ExtentList,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Manifest {
    pub files: Vec<ManifestEntry>,
}

/// Serves extents from a manifest produced by an MFT parser.
///
/// Lookups ignore ASCII case in both volume and path, matching how NTFS
/// paths behave on Windows.
#[derive(Debug, Default)]
pub struct ManifestResolver {
    entries: HashMap<(String, String), ManifestEntry>,
    order: Vec<(String, String)>,
}

impl ManifestResolver {
    pub fn from_manifest(manifest: Manifest) -> Result<Self> {
        let mut resolver = Self::default();
        for entry in manifest.files {
            entry.extents.validate(&entry.path)?;
            if let Some(size) = entry.size {
                let covered = entry.extents.total_length();
                if size > covered {
                    logging::warn(
                        "MANIFEST",
                        &format!(
                            "'{}' declares {} bytes but its extents cover {}",
                            entry.path, size, covered
                        ),
                    );
                }
            }

            let key = manifest_key(&entry.volume, &entry.path);
            if resolver.entries.insert(key.clone(), entry).is_none() {
                resolver.order.push(key);
            }
        }
        Ok(resolver)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let manifest: Manifest =
            serde_json::from_str(text).map_err(|e| RawGrabError::Manifest(e.to_string()))?;
        Self::from_manifest(manifest)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| RawGrabError::Manifest(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&text)
    }

    /// Every (volume, path) pair in manifest order
    pub fn requests(&self) -> Vec<super::FileRequest> {
        self.order
            .iter()
            .filter_map(|key| self.entries.get(key))
            .map(|entry| super::FileRequest {
                volume: entry.volume.clone(),
                path: entry.path.clone(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn manifest_key(volume: &str, path: &str) -> (String, String) {
    (volume.to_ascii_lowercase(), path.to_ascii_lowercase())
}

impl ExtentResolver for ManifestResolver {
    fn resolve(
        &mut self,
        volume: &str,
        _geometry: &VolumeGeometry,
        path: &str,
    ) -> Result<ResolvedFile> {
        let entry = self.entries.get(&manifest_key(volume, path)).ok_or_else(|| {
            RawGrabError::UnresolvedFile(path.to_string(), "not listed in manifest".to_string())
        })?;

        Ok(ResolvedFile {
            path: entry.path.clone(),
            extents: entry.extents.clone(),
            size: entry.size,
        })
    }
}

// ============================================================================
// Cluster runs
// ============================================================================

/// Convert cluster runs into byte extents covering `file_size` bytes.
///
/// Runs past the end of the file are dropped and the last kept extent is
/// trimmed to the file size. Sparse runs are refused.
pub fn extents_from_cluster_runs(
    path: &str,
    runs: &[ClusterRun],
    bytes_per_cluster: u32,
    file_size: u64,
) -> Result<ExtentList> {
    let bytes_per_cluster = bytes_per_cluster as u64;
    let mut extents = Vec::with_capacity(runs.len());
    let mut covered: u64 = 0;

    for run in runs {
        if covered >= file_size {
            break;
        }

        let lcn = run.lcn.ok_or_else(|| {
            RawGrabError::UnresolvedFile(
                path.to_string(),
                format!("sparse run at vcn {} is not supported", run.vcn),
            )
        })?;

        let overflow = || {
            RawGrabError::UnresolvedFile(
                path.to_string(),
                format!("run at vcn {} overflows a byte offset", run.vcn),
            )
        };
        let run_bytes = run
            .cluster_count
            .checked_mul(bytes_per_cluster)
            .ok_or_else(overflow)?;
        let length = run_bytes.min(file_size - covered);
        if length == 0 {
            continue;
        }
        let offset = lcn.checked_mul(bytes_per_cluster).ok_or_else(overflow)?;
        extents.push(Extent::new(offset, length));
        covered += length;
    }

    if extents.is_empty() {
        return Err(RawGrabError::UnresolvedFile(
            path.to_string(),
            "no clusters allocated (resident or empty file)".to_string(),
        ));
    }

    Ok(ExtentList::new(extents))
}

// ============================================================================
// Retrieval pointer resolver
// ============================================================================

/// Asks NTFS where a live file's clusters are.
///
/// Opening for attributes only works on files other processes hold locked,
/// which is the reason to go raw in the first place.
#[cfg(windows)]
#[derive(Debug, Default)]
pub struct RetrievalPointerResolver;

#[cfg(windows)]
impl ExtentResolver for RetrievalPointerResolver {
    fn resolve(
        &mut self,
        _volume: &str,
        geometry: &VolumeGeometry,
        path: &str,
    ) -> Result<ResolvedFile> {
        use crate::ntfs::winapi::{get_retrieval_pointers, open_file_attributes};

        let file_size = std::fs::metadata(path)?.len();
        let handle = open_file_attributes(path)?;
        let runs = get_retrieval_pointers(&handle)?;
        let extents =
            extents_from_cluster_runs(path, &runs, geometry.bytes_per_cluster(), file_size)?;

        logging::debug(
            "RESOLVE",
            &format!("'{}': {} bytes in {} extents", path, file_size, extents.len()),
        );

        Ok(ResolvedFile {
            path: path.to_string(),
            extents,
            size: Some(file_size),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geometry() -> VolumeGeometry {
        let mut data = vec![0u8; 512];
        data[3..7].copy_from_slice(b"NTFS");
        data[0x0B..0x0D].copy_from_slice(&512u16.to_le_bytes());
        data[0x0D] = 8;
        data[0x30] = 4;
        data[0x40] = 0xF6;
        VolumeGeometry::parse(&data).unwrap()
    }

    const MANIFEST: &str = r#"{
        "files": [
            {"volume": "C", "path": "C:\\Windows\\System32\\config\\SAM", "size": 6000,
             "extents": [{"offset": 1000000, "length": 4096}, {"offset": 2000000, "length": 2048}]},
            {"volume": "c", "path": "C:\\pagefile.sys",
             "extents": [{"offset": 8192, "length": 4096}]}
        ]
    }"#;

    #[test]
    fn manifest_lookup_ignores_case() {
        let mut resolver = ManifestResolver::from_json(MANIFEST).unwrap();
        assert_eq!(resolver.len(), 2);

        let file = resolver
            .resolve("c", &geometry(), r"c:\windows\system32\CONFIG\sam")
            .unwrap();
        assert_eq!(file.size, Some(6000));
        assert_eq!(file.extents.len(), 2);
        assert_eq!(file.path, r"C:\Windows\System32\config\SAM");
    }

    #[test]
    fn manifest_requests_keep_order() {
        let resolver = ManifestResolver::from_json(MANIFEST).unwrap();
        let requests = resolver.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].path, r"C:\pagefile.sys");
        assert_eq!(requests[1].volume, "c");
    }

    #[test]
    fn unknown_path_is_unresolved() {
        let mut resolver = ManifestResolver::from_json(MANIFEST).unwrap();
        assert!(matches!(
            resolver.resolve("c", &geometry(), r"C:\nope"),
            Err(RawGrabError::UnresolvedFile(_, _))
        ));
        assert!(resolver.resolve("d", &geometry(), r"C:\pagefile.sys").is_err());
    }

    #[test]
    fn manifest_with_overlapping_extents_is_rejected() {
        let text = r#"{"files": [{"volume": "c", "path": "x",
            "extents": [{"offset": 0, "length": 4096}, {"offset": 2048, "length": 4096}]}]}"#;
        assert!(matches!(
            ManifestResolver::from_json(text),
            Err(RawGrabError::InvalidExtentList(_, _))
        ));
    }

    #[test]
    fn malformed_manifest_is_reported() {
        assert!(matches!(
            ManifestResolver::from_json("{ not json"),
            Err(RawGrabError::Manifest(_))
        ));
    }

    #[test]
    fn cluster_runs_become_trimmed_byte_extents() {
        let runs = vec![
            ClusterRun { vcn: 0, lcn: Some(100), cluster_count: 2 },
            ClusterRun { vcn: 2, lcn: Some(500), cluster_count: 3 },
            ClusterRun { vcn: 5, lcn: Some(900), cluster_count: 1 },
        ];
        let extents = extents_from_cluster_runs("f", &runs, 4096, 10_000).unwrap();
        assert_eq!(
            extents.as_slice(),
            &[Extent::new(409_600, 8192), Extent::new(2_048_000, 1808)]
        );
    }

    #[test]
    fn sparse_runs_are_refused() {
        let runs = vec![
            ClusterRun { vcn: 0, lcn: Some(100), cluster_count: 1 },
            ClusterRun { vcn: 1, lcn: None, cluster_count: 4 },
        ];
        assert!(extents_from_cluster_runs("f", &runs, 4096, 20_000).is_err());
    }

    #[test]
    fn oversized_runs_are_refused() {
        let huge_lcn = vec![ClusterRun { vcn: 0, lcn: Some(u64::MAX / 2), cluster_count: 1 }];
        assert!(matches!(
            extents_from_cluster_runs("f", &huge_lcn, 4096, 4096),
            Err(RawGrabError::UnresolvedFile(_, _))
        ));

        let huge_count = vec![ClusterRun { vcn: 0, lcn: Some(1), cluster_count: u64::MAX }];
        assert!(matches!(
            extents_from_cluster_runs("f", &huge_count, 4096, 4096),
            Err(RawGrabError::UnresolvedFile(_, _))
        ));
    }

    #[test]
    fn resident_file_has_no_extents() {
        assert!(matches!(
            extents_from_cluster_runs("f", &[], 4096, 300),
            Err(RawGrabError::UnresolvedFile(_, _))
        ));
    }
}
