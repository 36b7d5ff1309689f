// SPDX-License-Identifier: LGPL-3.0-or-later

//! Single- and chain-mode hashing: every payload record is followed by a
//! detectable trailing hash record, and chain-mode digests depend on the
//! record that came before.

use bdio::{Bdio, Format, Mode};
use tempfile::NamedTempFile;

const STR: &str = "Far out in the uncharted backwaters of the unfashionable end \
of the western spiral arm of the Galaxy lies a small, unregarded yellow sun.";

#[test]
fn single_mode_hash_records_interleave_with_payload_records() {
    let path = NamedTempFile::new().unwrap().into_temp_path();

    let mut fh = Bdio::open(&path, Mode::Write, Some("Test file with hashes in s-mode")).unwrap();
    fh.hash_auto();
    for _ in 0..2 {
        fh.start_record(Format::AscGeneric, 1).unwrap();
        let n = fh.write(STR.as_bytes());
        assert_eq!(n, STR.len());
    }
    fh.close().unwrap();

    let mut fh = Bdio::open(&path, Mode::Read, None).unwrap();
    for _ in 0..2 {
        assert!(fh.seek_record().unwrap());
        assert!(fh.is_hash_record().unwrap().is_none());
        let mut buf = vec![0u8; STR.len()];
        fh.read(&mut buf);
        assert_eq!(buf, STR.as_bytes());

        assert!(fh.seek_record().unwrap());
        let digest = fh.is_hash_record().unwrap();
        assert!(digest.is_some());
    }
    assert!(!fh.seek_record().unwrap());
}

#[test]
fn chain_mode_digests_differ_across_identical_payloads() {
    let path = NamedTempFile::new().unwrap().into_temp_path();

    let mut fh = Bdio::open(&path, Mode::Write, Some("Test file with hashes in c-mode")).unwrap();
    fh.hash_auto();
    fh.hash_chain();
    for _ in 0..2 {
        fh.start_record(Format::AscGeneric, 1).unwrap();
        fh.write(STR.as_bytes());
    }
    fh.close().unwrap();

    let mut fh = Bdio::open(&path, Mode::Read, None).unwrap();
    let mut digests = Vec::new();
    for _ in 0..2 {
        assert!(fh.seek_record().unwrap());
        let mut buf = vec![0u8; STR.len()];
        fh.read(&mut buf);

        assert!(fh.seek_record().unwrap());
        digests.push(fh.is_hash_record().unwrap().unwrap());
    }
    assert_ne!(digests[0], digests[1]);
}

#[test]
fn hashing_is_off_by_default() {
    let path = NamedTempFile::new().unwrap().into_temp_path();

    let mut fh = Bdio::open(&path, Mode::Write, Some("no hashing")).unwrap();
    fh.start_record(Format::BinGeneric, 0).unwrap();
    fh.write(b"plain");
    fh.close().unwrap();

    let mut fh = Bdio::open(&path, Mode::Read, None).unwrap();
    assert!(fh.seek_record().unwrap());
    assert!(!fh.seek_record().unwrap());
}
