// Extent stream tests against synthetic NTFS volumes held in memory

use rawgrab::ntfs::{Extent, ExtentList, ReaderState};
use rawgrab::{ExtentReader, Pull, RawGrabError, RawVolume};
use std::io::{Cursor, Read};

const CLUSTER: usize = 4096;

/// A zeroed volume of `len` bytes with a valid boot sector (512-byte sectors,
/// 8 sectors per cluster, MFT at cluster 4, 1 KiB records).
fn volume_image(len: usize) -> Vec<u8> {
    let mut image = vec![0u8; len];
    image[3..7].copy_from_slice(b"NTFS");
    image[0x0B..0x0D].copy_from_slice(&512u16.to_le_bytes());
    image[0x0D] = 8;
    image[0x30..0x38].copy_from_slice(&4u64.to_le_bytes());
    image[0x40] = 0xF6;
    image[0x44] = 1;
    image
}

/// Fill `len` bytes at `offset` with a pattern that differs per position
fn stamp(image: &mut [u8], offset: usize, len: usize, seed: u8) {
    for (i, byte) in image[offset..offset + len].iter_mut().enumerate() {
        *byte = seed.wrapping_add((i % 251) as u8);
    }
}

fn fragmented_volume() -> (RawVolume<Cursor<Vec<u8>>>, ExtentList, Vec<u8>) {
    let mut image = volume_image(64 * CLUSTER);
    let extents = vec![
        Extent::new(10 * CLUSTER as u64, 4096),
        Extent::new(40 * CLUSTER as u64, 2048),
        Extent::new(20 * CLUSTER as u64, 8192),
    ];

    let mut expected = Vec::new();
    for (seed, extent) in extents.iter().enumerate() {
        let start = extent.absolute_offset as usize;
        let len = extent.length as usize;
        stamp(&mut image, start, len, seed as u8 * 60 + 1);
        expected.extend_from_slice(&image[start..start + len]);
    }

    let volume = RawVolume::open("img", Cursor::new(image)).unwrap();
    (volume, ExtentList::new(extents), expected)
}

#[test]
fn geometry_is_derived_from_boot_sector() {
    let volume = RawVolume::open("img", Cursor::new(volume_image(8 * CLUSTER))).unwrap();
    let geometry = volume.geometry();
    assert_eq!(geometry.bytes_per_cluster(), 4096);
    assert_eq!(geometry.mft_offset(), 4 * 4096);
    assert_eq!(geometry.mft_record_size(), 1024);
    assert_eq!(volume.tracked_cursor(), 512);
}

#[test]
fn every_request_size_delivers_the_declared_size() {
    let (mut volume, extents, expected) = fragmented_volume();
    let declared = 13_000u64;
    let boundaries = [4096u64, 6144, 14336];

    for request in [1usize, 7, 511, 512, 1000, 2048, 3000, 4096, 5000, 16384] {
        let mut reader = ExtentReader::new(&mut volume, &extents, "frag.bin", Some(declared));
        let mut buf = vec![0u8; request];
        let mut out = Vec::new();

        loop {
            let pull = reader.pull(&mut buf).unwrap();
            let start = out.len() as u64;
            let end = start + pull.len() as u64;
            assert!(pull.len() <= request);
            for boundary in boundaries {
                assert!(
                    !(start < boundary && end > boundary),
                    "request {} chunk {}..{} crosses extent boundary {}",
                    request,
                    start,
                    end,
                    boundary
                );
            }
            out.extend_from_slice(&buf[..pull.len()]);
            if pull.is_end_of_stream() {
                assert!(matches!(pull, Pull::Last(_)));
                break;
            }
        }

        assert_eq!(out.len() as u64, declared, "request size {}", request);
        assert_eq!(out, expected[..declared as usize]);
        assert_eq!(reader.state(), ReaderState::Exhausted);
        assert_eq!(reader.pull(&mut buf).unwrap(), Pull::End);
    }
}

#[test]
fn io_read_matches_pull_stream() {
    let (mut volume, extents, expected) = fragmented_volume();
    let mut reader = ExtentReader::new(&mut volume, &extents, "frag.bin", None);

    let mut out = Vec::new();
    reader.read_to_end(&mut out).unwrap();
    assert_eq!(out, expected);
    assert_eq!(reader.total_size(), Some(14336));
}

#[test]
fn cursor_follows_the_last_extent_read() {
    let (mut volume, extents, _) = fragmented_volume();
    {
        let mut reader = ExtentReader::new(&mut volume, &extents, "frag.bin", Some(5000));
        let mut buf = vec![0u8; 8192];
        assert_eq!(reader.pull(&mut buf).unwrap(), Pull::Chunk(4096));
        assert_eq!(reader.pull(&mut buf).unwrap(), Pull::Last(904));
    }
    assert_eq!(volume.tracked_cursor(), 40 * CLUSTER as u64 + 904);
}

#[test]
fn short_extent_list_is_reported_with_progress() {
    let (mut volume, extents, _) = fragmented_volume();
    let mut reader = ExtentReader::new(&mut volume, &extents, "frag.bin", Some(20_000));
    let mut buf = vec![0u8; 16384];

    let err = loop {
        match reader.pull(&mut buf) {
            Ok(pull) => assert!(!pull.is_end_of_stream()),
            Err(e) => break e,
        }
    };

    match err {
        RawGrabError::ExtentListExhausted {
            extent_count,
            declared_size,
            delivered,
            ..
        } => {
            assert_eq!(extent_count, 3);
            assert_eq!(declared_size, 20_000);
            assert_eq!(delivered, 14336);
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(reader.state(), ReaderState::Failed);
    assert!(matches!(reader.pull(&mut buf), Err(RawGrabError::StreamFailed(_))));
}

#[test]
fn extent_past_end_of_device_fails() {
    let mut volume = RawVolume::open("img", Cursor::new(volume_image(8 * CLUSTER))).unwrap();
    let extents = ExtentList::new(vec![Extent::new(7 * CLUSTER as u64, 2 * CLUSTER as u64)]);
    let mut reader = ExtentReader::new(&mut volume, &extents, "beyond.bin", None);

    let mut buf = vec![0u8; 2 * CLUSTER];
    assert!(matches!(reader.pull(&mut buf), Err(RawGrabError::Io(_))));
    assert_eq!(reader.state(), ReaderState::Failed);
}
