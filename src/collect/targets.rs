//! Working out which volumes a set of requested paths lives on

use crate::error::{RawGrabError, Result};
use regex::Regex;
use serde::Deserialize;
use std::sync::OnceLock;

const SYSTEM_DRIVE_TOKEN: &str = "%systemdrive%";

/// One file to collect
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FileRequest {
    /// Volume identifier handed to [`crate::ntfs::RawVolume::acquire`]
    pub volume: String,
    /// Full path of the file as the operating system sees it
    pub path: String,
}

fn volume_prefix() -> &'static Regex {
    static PREFIX: OnceLock<Regex> = OnceLock::new();
    PREFIX.get_or_init(|| Regex::new(r"^[^:]+").expect("static regex"))
}

/// Build requests from Windows-style full paths (`C:\...` or `%SystemDrive%\...`).
///
/// `%systemdrive%` is expanded from the `SYSTEMDRIVE` environment variable.
pub fn requests_from_paths<S: AsRef<str>>(paths: &[S]) -> Result<Vec<FileRequest>> {
    let system_drive = std::env::var("SYSTEMDRIVE").ok();
    requests_from_paths_with(paths, system_drive.as_deref())
}

/// Same as [`requests_from_paths`] with an explicit system drive (`"C:"`)
pub fn requests_from_paths_with<S: AsRef<str>>(
    paths: &[S],
    system_drive: Option<&str>,
) -> Result<Vec<FileRequest>> {
    paths
        .iter()
        .map(|p| {
            let path = p.as_ref();

            if let Some(rest) = strip_system_drive(path) {
                let drive = system_drive
                    .and_then(|d| volume_prefix().find(d))
                    .map(|m| m.as_str().to_lowercase())
                    .ok_or_else(|| {
                        RawGrabError::InvalidPath(format!("{} (SYSTEMDRIVE is not set)", path))
                    })?;
                let drive = single_letter(&drive, path)?;
                return Ok(FileRequest {
                    volume: drive.to_string(),
                    path: format!("{}:{}", drive, rest),
                });
            }

            let prefix = volume_prefix()
                .find(path)
                .ok_or_else(|| RawGrabError::InvalidPath(path.to_string()))?;

            if !path[prefix.end()..].starts_with(':') {
                return Err(RawGrabError::InvalidPath(format!(
                    "{} does not start with a drive letter",
                    path
                )));
            }

            let letter = single_letter(&prefix.as_str().to_lowercase(), path)?;
            Ok(FileRequest {
                volume: letter.to_string(),
                path: path.to_string(),
            })
        })
        .collect()
}

/// Remainder of `path` after a leading `%systemdrive%` (and optional `:`)
fn strip_system_drive(path: &str) -> Option<&str> {
    let token = path.get(..SYSTEM_DRIVE_TOKEN.len())?;
    if !token.eq_ignore_ascii_case(SYSTEM_DRIVE_TOKEN) {
        return None;
    }
    let rest = &path[SYSTEM_DRIVE_TOKEN.len()..];
    Some(rest.strip_prefix(':').unwrap_or(rest))
}

fn single_letter(prefix: &str, path: &str) -> Result<char> {
    let mut chars = prefix.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) if c.is_alphabetic() => Ok(c),
        _ => Err(RawGrabError::InvalidPath(format!(
            "{} does not start with a single drive letter",
            path
        ))),
    }
}

/// Distinct volumes in the order they are first requested
pub fn volumes_of_interest(requests: &[FileRequest]) -> Vec<String> {
    let mut volumes: Vec<String> = Vec::new();
    for request in requests {
        if !volumes.iter().any(|v| v.eq_ignore_ascii_case(&request.volume)) {
            volumes.push(request.volume.clone());
        }
    }
    volumes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drive_letter_paths_map_to_lowercase_volumes() {
        let requests =
            requests_from_paths_with(&[r"C:\Windows\System32\config\SAM", r"d:\data\x.bin"], None)
                .unwrap();
        assert_eq!(requests[0].volume, "c");
        assert_eq!(requests[0].path, r"C:\Windows\System32\config\SAM");
        assert_eq!(requests[1].volume, "d");
    }

    #[test]
    fn system_drive_is_expanded() {
        let requests =
            requests_from_paths_with(&[r"%SystemDrive%\$MFT"], Some("C:")).unwrap();
        assert_eq!(requests[0].volume, "c");
        assert_eq!(requests[0].path, r"c:\$MFT");
    }

    #[test]
    fn system_drive_requires_environment() {
        assert!(requests_from_paths_with(&[r"%systemdrive%\x"], None).is_err());
    }

    #[test]
    fn rejects_paths_without_a_single_letter_volume() {
        assert!(requests_from_paths_with(&[r"CD:\x"], None).is_err());
        assert!(requests_from_paths_with(&[r"1:\x"], None).is_err());
        assert!(requests_from_paths_with(&[""], None).is_err());
        assert!(requests_from_paths_with(&[r"\\server\share\x"], None).is_err());
        assert!(requests_from_paths_with(&["relative"], None).is_err());
    }

    #[test]
    fn volumes_are_deduplicated_in_order() {
        let requests = requests_from_paths_with(
            &[r"d:\a", r"C:\b", r"D:\c", r"%systemdrive%\d"],
            Some("c:"),
        )
        .unwrap();
        assert_eq!(volumes_of_interest(&requests), vec!["d", "c"]);
    }
}
