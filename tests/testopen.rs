// SPDX-License-Identifier: LGPL-3.0-or-later

//! Open/close behavior across all three modes, and the failure modes
//! `bdio_open` is expected to reject.

use bdio::{Bdio, Format, Mode};
use tempfile::NamedTempFile;

#[test]
fn write_then_close_then_reopen_for_read() {
    let path = NamedTempFile::new().unwrap().into_temp_path();

    Bdio::open(&path, Mode::Write, Some("this is a test file"))
        .unwrap()
        .close()
        .unwrap();

    let fh = Bdio::open(&path, Mode::Read, Some("this is a test file")).unwrap();
    assert_eq!(fh.hpinfo(), "this is a test file");
}

#[test]
fn append_to_a_file_that_does_not_exist_yet_creates_it() {
    let path = NamedTempFile::new().unwrap().into_temp_path();
    std::fs::remove_file(&path).unwrap();

    Bdio::open(&path, Mode::Append, Some("this is a test file"))
        .unwrap()
        .close()
        .unwrap();

    let fh = Bdio::open(&path, Mode::Read, None).unwrap();
    assert_eq!(fh.hpinfo(), "this is a test file");
}

#[test]
fn append_without_protocol_info_reuses_the_file_on_disk() {
    let path = NamedTempFile::new().unwrap().into_temp_path();
    Bdio::open(&path, Mode::Write, Some("this is a test file"))
        .unwrap()
        .close()
        .unwrap();

    let fh = Bdio::open(&path, Mode::Append, None).unwrap();
    assert_eq!(fh.hpinfo(), "this is a test file");
}

#[test]
fn opening_a_missing_file_for_read_fails() {
    let err = Bdio::open("/nonexistent/a_file_that_isnt.bin", Mode::Read, Some("")).unwrap_err();
    assert!(matches!(err, bdio::BdioError::Io(_)));
}

#[test]
fn read_with_wrong_protocol_info_fails() {
    let path = NamedTempFile::new().unwrap().into_temp_path();
    Bdio::open(&path, Mode::Write, Some("this is a test file"))
        .unwrap()
        .close()
        .unwrap();

    let err = Bdio::open(&path, Mode::Read, Some("wrong p-info")).unwrap_err();
    assert!(matches!(err, bdio::BdioError::ProtocolMismatch { .. }));
}

#[test]
fn append_with_wrong_protocol_info_fails() {
    let path = NamedTempFile::new().unwrap().into_temp_path();
    Bdio::open(&path, Mode::Write, Some("this is a test file"))
        .unwrap()
        .close()
        .unwrap();

    let err = Bdio::open(&path, Mode::Append, Some("wrong p-info")).unwrap_err();
    assert!(matches!(err, bdio::BdioError::ProtocolMismatch { .. }));
}

#[test]
fn write_without_protocol_info_fails() {
    let path = NamedTempFile::new().unwrap().into_temp_path();
    std::fs::remove_file(&path).unwrap();
    let err = Bdio::open(&path, Mode::Write, None).unwrap_err();
    assert!(matches!(err, bdio::BdioError::InvalidArgument(_)));
}

#[test]
fn append_to_empty_new_file_without_protocol_info_fails() {
    let path = NamedTempFile::new().unwrap().into_temp_path();
    std::fs::remove_file(&path).unwrap();
    let err = Bdio::open(&path, Mode::Append, None).unwrap_err();
    assert!(matches!(err, bdio::BdioError::InvalidArgument(_)));
}

#[test]
fn reopening_for_append_after_a_record_positions_past_it() {
    let path = NamedTempFile::new().unwrap().into_temp_path();
    let mut fh = Bdio::open(&path, Mode::Write, Some("p")).unwrap();
    fh.start_record(Format::BinGeneric, 0).unwrap();
    fh.write(b"hello");
    fh.close().unwrap();

    let mut fh = Bdio::open(&path, Mode::Append, Some("p")).unwrap();
    assert!(!fh.is_in_record());
    fh.start_record(Format::BinGeneric, 0).unwrap();
    fh.write(b"world");
    fh.close().unwrap();

    let mut fh = Bdio::open(&path, Mode::Read, Some("p")).unwrap();
    assert!(fh.seek_record().unwrap());
    assert!(fh.seek_record().unwrap());
    assert!(!fh.seek_record().unwrap());
}
