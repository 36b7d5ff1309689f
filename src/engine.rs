//! The record engine: state-machine transitions, the three-case
//! short-to-long record promotion algorithm, the byte-swap pipeline for
//! typed I/O, and hash-record emission.
//!
//! This is the largest and most delicate part of the crate. Every function
//! here mutates a `&mut Bdio` directly rather than living on `impl Bdio`,
//! simply to keep the state machine's guts in one file instead of spread
//! across `impl` blocks.

use std::io::{ErrorKind, Read, SeekFrom, Write};

use crate::bitpack;
use crate::buffered::BUF_SIZE;
use crate::byteorder::{self, Endian};
use crate::error::{BdioError, Result};
use crate::format::Format;
use crate::header;
use crate::{Bdio, Mode, State};

/// Largest record length (header included) representable in a short
/// (4-byte) header: 2^20 - 1 + 4.
pub const MAX_SHORT_RECORD_LEN: u64 = (1 << 20) - 1 + 4;
/// Largest record length (header included) representable in a long
/// (8-byte) header: 2^28 - 1 + 8.
pub const MAX_LONG_RECORD_LEN: u64 = (1 << 28) - 1 + 8;

/// Hash records are always tagged `BinGeneric` with user-info 7, a value
/// no payload record is expected to use, matching the original reserved
/// convention.
const HASH_RECORD_UINFO: u8 = 7;

fn rswap_for(fmt: Format, native: Endian) -> bool {
    matches!(fmt.endian(), Some(e) if e != native)
}

pub(crate) fn start_record(fh: &mut Bdio, fmt: Format, uinfo: u8) -> Result<()> {
    if uinfo > 0xF {
        return Err(BdioError::InvalidArgument(
            "user info must fit in 4 bits (0..=15)".into(),
        ));
    }
    if fh.mode != Mode::Write && fh.mode != Mode::Append {
        return Err(BdioError::State("start_record requires write or append mode".into()));
    }

    flush_record(fh)?;

    let resolved = fmt.resolve(fh.endian);
    let wire_tag = resolved
        .wire_tag()
        .expect("start_record always resolves to a concrete format");

    fh.rlongrec = false;
    fh.rfmt = Some(resolved);
    fh.ruinfo = uinfo;
    fh.rstart += fh.rlen;
    fh.state = State::Record;
    fh.rcnt += 1;
    fh.rlen = 4;
    fh.ridx = 4;
    fh.rswap = rswap_for(resolved, fh.endian);
    fh.rdsize = resolved.item_size();

    let hdr = bitpack::encode_short(wire_tag, uinfo, 4, fh.endian);
    fh.stream.overwrite_head(&hdr);
    fh.bufstart = 0;
    fh.stream.set_bufidx(4);

    fh.hash.begin_record();
    log::trace!("start_record: fmt={:?} uinfo={} at rstart={}", resolved, uinfo, fh.rstart);
    Ok(())
}

pub(crate) fn append_record(fh: &mut Bdio, fmt: Format, uinfo: u8) -> Result<()> {
    if fh.mode != Mode::Write && fh.mode != Mode::Append {
        return Err(BdioError::State("append_record requires write or append mode".into()));
    }
    if fh.state != State::Neutral {
        return Err(BdioError::State("append_record requires the stream to be at rest".into()));
    }
    if fh.rstart == fh.hstart {
        return Err(BdioError::State(
            "the most recent item is a header, not a record".into(),
        ));
    }
    if fh.ruinfo != uinfo {
        return Err(BdioError::State(
            "user info does not match the previous record's".into(),
        ));
    }
    let last = fh
        .rfmt
        .expect("rstart != hstart implies a record format is already known");
    if fmt != last && !fmt.agnostic_matches(last) {
        return Err(BdioError::State(
            "format does not match the previous record's".into(),
        ));
    }

    fh.state = State::Record;
    fh.bufstart = fh.rlen;
    fh.stream.set_bufidx(0);
    fh.hash.begin_record();
    Ok(())
}

/// Finalize whatever record or header is open, writing its definitive
/// header and flushing the buffer. A no-op if nothing is open.
pub(crate) fn flush_record(fh: &mut Bdio) -> Result<()> {
    match fh.state {
        State::Record => {
            let fmt = fh
                .rfmt
                .expect("State::Record implies a format was set by start_record");
            let tag = fmt.wire_tag().expect("record format is always concrete");

            if fh.rlongrec {
                let lhdr = bitpack::encode_long(tag, fh.ruinfo, fh.rlen, fh.endian);
                if fh.bufstart == 0 {
                    fh.stream.overwrite_head(&lhdr);
                } else {
                    fh.stream.seek(SeekFrom::Current(-(fh.bufstart as i64)))?;
                    fh.stream.file_mut().write_all(&lhdr)?;
                    fh.stream.seek(SeekFrom::Current(fh.bufstart as i64 - 8))?;
                }
            } else {
                let hdr = bitpack::encode_short(tag, fh.ruinfo, fh.rlen as u32, fh.endian);
                if fh.bufstart == 0 {
                    fh.stream.overwrite_head(&hdr);
                } else {
                    fh.stream.seek(SeekFrom::Current(-(fh.bufstart as i64)))?;
                    fh.stream.file_mut().write_all(&hdr)?;
                    fh.stream.seek(SeekFrom::Current(fh.bufstart as i64 - 4))?;
                }
            }
            fh.stream.flush()?;
            fh.bufstart = 0;
            fh.state = State::Neutral;
            log::trace!("flush_record: rstart={} rlen={} long={}", fh.rstart, fh.rlen, fh.rlongrec);

            if fh.hash.is_auto() {
                if let Some(payload) = fh.hash.finish_record() {
                    fh.hash.set_auto(false);
                    let result = (|| -> Result<()> {
                        start_record(fh, Format::BinGeneric, HASH_RECORD_UINFO)?;
                        write_raw(fh, &payload);
                        if fh.state == State::Error {
                            return Err(BdioError::State("failed to emit hash record".into()));
                        }
                        flush_record(fh)?;
                        Ok(())
                    })();
                    fh.hash.set_auto(true);
                    result?;
                    log::debug!("emitted hash record after rstart={}", fh.rstart);
                }
            }
            Ok(())
        }
        State::Header => {
            fh.state = State::Neutral;
            Ok(())
        }
        State::Neutral => Ok(()),
        State::Error => Err(BdioError::State("stream is in an error state".into())),
    }
}

/// Read the next record or header. Returns `Ok(true)` when a record was
/// found (the stream is positioned `InRecord`), `Ok(false)` on a clean
/// end-of-file (the stream is positioned `None`/neutral).
pub(crate) fn seek_record(fh: &mut Bdio) -> Result<bool> {
    if fh.mode != Mode::Read {
        return Err(BdioError::State("seek_record requires read mode".into()));
    }

    if matches!(fh.state, State::Record | State::Header) {
        let skip = fh.rlen.saturating_sub(fh.ridx);
        fh.stream.seek(SeekFrom::Current(skip as i64))?;
        fh.ridx = fh.rlen;
    }

    loop {
        let mut hdr4 = [0u8; 4];
        match fh.stream.file_mut().read_exact(&mut hdr4) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                fh.state = State::Neutral;
                return Ok(false);
            }
            Err(e) => {
                fh.state = State::Error;
                return Err(e.into());
            }
        }

        fh.rstart += fh.rlen;
        fh.ridx = 4;
        let word = bitpack::decode_word32(hdr4, fh.endian);

        if !bitpack::has_record_magic(word) {
            header::read_header(fh, hdr4)?;
            continue;
        }

        fh.rcnt += 1;
        let long = (word & 0x8) != 0;
        let fields = if long {
            let mut rest4 = [0u8; 4];
            if let Err(e) = fh.stream.file_mut().read_exact(&mut rest4) {
                fh.state = State::Error;
                return Err(e.into());
            }
            let mut full = [0u8; 8];
            full[..4].copy_from_slice(&hdr4);
            full[4..].copy_from_slice(&rest4);
            bitpack::unpack_long(bitpack::decode_word64(full, fh.endian))
        } else {
            bitpack::unpack_short(word)
        };

        fh.rlongrec = fields.long;
        fh.ruinfo = fields.user_info;
        fh.rlen = fields.total_len;
        let fmt = Format::from_tag(fields.format_tag).unwrap_or(Format::BinGeneric);
        fh.rfmt = Some(fmt);
        fh.rswap = rswap_for(fmt, fh.endian);
        fh.rdsize = fmt.item_size();
        fh.bufstart = 0;
        fh.state = State::Record;
        return Ok(true);
    }
}

fn promote_case1(fh: &mut Bdio) -> Result<()> {
    fh.rlongrec = true;
    fh.ridx += 4;
    fh.rlen += 4;
    if fh.bufstart == 0 {
        fh.stream.set_bufidx(fh.stream.bufidx() + 4);
    } else {
        fh.stream.seek(SeekFrom::Current(-4))?;
        fh.bufstart = 0;
        fh.stream.set_bufidx(8);
    }
    log::trace!("promotion case 1 (empty record) at rstart={}", fh.rstart);
    Ok(())
}

fn promote_case2_shift(fh: &mut Bdio) -> Result<()> {
    fh.stream.shift_right(4, 4);
    fh.rlongrec = true;
    fh.rlen += 4;
    fh.ridx += 4;
    log::trace!("promotion case 2 (in-buffer shift) at rstart={}", fh.rstart);
    Ok(())
}

fn promote_case2_spill(fh: &mut Bdio, incoming_nb: u64) -> Result<()> {
    let old_bufidx = fh.stream.bufidx() as u64;
    let tag = fh
        .rfmt
        .expect("promotion only runs mid-record")
        .wire_tag()
        .expect("record format is always concrete");
    let total_len_after = fh.ridx + incoming_nb + 4;
    let lhdr = bitpack::encode_long(tag, fh.ruinfo, total_len_after, fh.endian);
    fh.stream.spill_with_header(&lhdr)?;
    fh.rlongrec = true;
    fh.bufstart = old_bufidx + 4;
    fh.ridx += 4;
    fh.rlen += 4;
    log::trace!("promotion case 2 (spill flush) at rstart={}", fh.rstart);
    Ok(())
}

fn promote_case3(fh: &mut Bdio, incoming_nb: u64) -> Result<()> {
    // The seek math below walks backward over everything already on disk
    // for this record, shifting it forward by 4 bytes to make room for the
    // extra long-header bytes. `prev_window` is the size of the chunk just
    // written in the previous step (the dummy+buffer write counts as the
    // first one), needed to compute how far back to seek for the next one.
    let prev_write_len = fh.stream.bufidx() as u64;
    fh.stream.spill_with_hole()?;

    let buf_size = BUF_SIZE as u64;
    let mut remaining = fh.bufstart;
    let mut prev_window = prev_write_len;

    while remaining > buf_size {
        let mut nr = buf_size;
        if (remaining - nr) < 4 {
            nr -= 4;
        }
        let nr_usize = nr as usize;
        fh.stream
            .seek(SeekFrom::Current(-((nr + 4 + prev_window) as i64)))?;
        fh.stream.read_window(nr_usize)?;
        fh.stream.seek(SeekFrom::Current(-(nr as i64) + 4))?;
        fh.stream.write_window(nr_usize)?;
        remaining -= nr;
        prev_window = nr;
    }

    let nr = (remaining - 4) as usize;
    fh.stream.seek(SeekFrom::Start(fh.rstart + 4))?;
    fh.stream.read_window(nr)?;
    fh.stream.seek(SeekFrom::Start(fh.rstart))?;
    let tag = fh
        .rfmt
        .expect("promotion only runs mid-record")
        .wire_tag()
        .expect("record format is always concrete");
    let total_len_after = fh.ridx + incoming_nb + 4;
    let lhdr = bitpack::encode_long(tag, fh.ruinfo, total_len_after, fh.endian);
    fh.stream.file_mut().write_all(&lhdr)?;
    fh.stream.write_window(nr)?;
    fh.stream.seek(SeekFrom::End(0))?;

    fh.rlongrec = true;
    fh.ridx += 4;
    fh.rlen += 4;
    fh.stream.set_bufidx(0);
    fh.bufstart = fh.ridx;
    log::trace!("promotion case 3 (on-disk shift) at rstart={}", fh.rstart);
    Ok(())
}

fn promote_to_long(fh: &mut Bdio, incoming_nb: u64) -> Result<()> {
    if fh.ridx == 4 {
        return promote_case1(fh);
    }
    if fh.bufstart == 0 {
        if fh.stream.bufidx() < fh.stream.capacity() - 4 {
            promote_case2_shift(fh)
        } else {
            promote_case2_spill(fh, incoming_nb)
        }
    } else {
        promote_case3(fh, incoming_nb)
    }
}

fn buf_write(fh: &mut Bdio, mut data: &[u8]) -> std::io::Result<usize> {
    let mut total = 0usize;
    while !data.is_empty() {
        let space = fh.stream.capacity() - fh.stream.bufidx();
        let n = data.len().min(space);
        fh.stream.copy_into(&data[..n]);
        fh.ridx += n as u64;
        fh.rlen += n as u64;
        total += n;
        data = &data[n..];
        if !data.is_empty() {
            fh.bufstart += fh.stream.bufidx() as u64;
            fh.stream.flush()?;
        }
    }
    Ok(total)
}

/// Untyped write: `bdio_write`. No format check, no swap; used directly
/// by the public `write` method and internally for hash-record emission.
pub(crate) fn write_raw(fh: &mut Bdio, data: &[u8]) -> usize {
    if fh.state != State::Record {
        fh.record_error(BdioError::State("no record is open for writing".into()));
        return 0;
    }
    if fh.mode != Mode::Write && fh.mode != Mode::Append {
        fh.record_error(BdioError::State("write requires write or append mode".into()));
        return 0;
    }
    if fh.rdsize != 0 && data.len() % fh.rdsize != 0 {
        fh.record_error(BdioError::InvalidArgument(
            "data length is not a multiple of the record's item size".into(),
        ));
        return 0;
    }

    if fh.hash.is_auto() {
        fh.hash.update(data);
    }

    let nb = data.len() as u64;
    if !fh.rlongrec && (fh.ridx + nb) > MAX_SHORT_RECORD_LEN {
        if let Err(e) = promote_to_long(fh, nb) {
            fh.record_error(e);
            return 0;
        }
    }

    match buf_write(fh, data) {
        Ok(n) => n,
        Err(e) => {
            fh.record_error(BdioError::Io(e));
            0
        }
    }
}

/// Typed write: validates the record's format is one of `allowed` (or
/// generic), swaps `data` in place around the actual write so the caller
/// always gets its own native byte order back.
pub(crate) fn write_typed(fh: &mut Bdio, data: &mut [u8], allowed: &[Format]) -> usize {
    let fmt = match fh.rfmt {
        Some(f) => f,
        None => {
            fh.record_error(BdioError::State("no record is open for writing".into()));
            return 0;
        }
    };
    if fmt != Format::BinGeneric && !allowed.contains(&fmt) {
        fh.record_error(BdioError::State(
            "record format is incompatible with this typed write".into(),
        ));
        return 0;
    }

    if fh.rswap {
        byteorder::swap_by_item_size(data, fh.rdsize);
    }
    let n = write_raw(fh, data);
    if fh.rswap {
        byteorder::swap_by_item_size(data, fh.rdsize);
    }
    n
}

/// Untyped read: `bdio_read`. No format check, no swap.
pub(crate) fn read_raw(fh: &mut Bdio, buf: &mut [u8]) -> usize {
    if fh.state != State::Record {
        fh.record_error(BdioError::State("no record is open for reading".into()));
        return 0;
    }
    if fh.mode != Mode::Read {
        fh.record_error(BdioError::State("read requires read mode".into()));
        return 0;
    }
    if fh.rdsize != 0 && buf.len() % fh.rdsize != 0 {
        fh.record_error(BdioError::InvalidArgument(
            "buffer length is not a multiple of the record's item size".into(),
        ));
        return 0;
    }
    let remaining = fh.rlen.saturating_sub(fh.ridx);
    if buf.len() as u64 > remaining {
        fh.record_error(BdioError::InvalidArgument(
            "read requested more bytes than remain in the record".into(),
        ));
        return 0;
    }

    match fh.stream.file_mut().read(buf) {
        Ok(n) => {
            fh.ridx += n as u64;
            if n < buf.len() {
                fh.record_error(BdioError::UnexpectedEof);
            }
            n
        }
        Err(e) => {
            fh.record_error(BdioError::Io(e));
            0
        }
    }
}

pub(crate) fn read_typed(fh: &mut Bdio, buf: &mut [u8], allowed: &[Format]) -> usize {
    let fmt = match fh.rfmt {
        Some(f) => f,
        None => {
            fh.record_error(BdioError::State("no record is open for reading".into()));
            return 0;
        }
    };
    if fmt != Format::BinGeneric && !allowed.contains(&fmt) {
        fh.record_error(BdioError::State(
            "record format is incompatible with this typed read".into(),
        ));
        return 0;
    }
    let n = read_raw(fh, buf);
    if fh.rswap && n > 0 {
        byteorder::swap_by_item_size(&mut buf[..n], fh.rdsize);
    }
    n
}

pub(crate) fn payload_len(fh: &Bdio) -> u64 {
    if fh.state != State::Record {
        return 0;
    }
    if fh.rlongrec {
        fh.rlen - 8
    } else {
        fh.rlen - 4
    }
}

/// Peek whether the current record is a hash record, without consuming
/// its read cursor. Returns the 16-byte digest if so.
pub(crate) fn is_hash_record(fh: &mut Bdio) -> Result<Option<[u8; 16]>> {
    if payload_len(fh) != 20 {
        return Ok(None);
    }
    let pos = fh.stream.seek(SeekFrom::Current(0))?;
    let mut buf = [0u8; 20];
    let n = fh.stream.file_mut().read(&mut buf)?;
    fh.stream.seek(SeekFrom::Start(pos))?;
    if n < 4 {
        return Ok(None);
    }
    if !crate::hash::magic_matches(buf[0..4].try_into().unwrap()) {
        return Ok(None);
    }
    if n < 20 {
        return Ok(None);
    }
    let mut digest = [0u8; 16];
    digest.copy_from_slice(&buf[4..20]);
    Ok(Some(digest))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provenance::{FixedClock, FixedProvenance};
    use crate::Bdio;
    use tempfile::tempfile;

    fn provenance() -> FixedProvenance {
        FixedProvenance {
            user: "alice".into(),
            host: "build01".into(),
        }
    }

    fn writer() -> Bdio {
        let mut fh = Bdio::for_test(tempfile().unwrap(), Mode::Write);
        header::write_header(&mut fh, "test/1", &FixedClock(1000), &provenance()).unwrap();
        fh
    }

    #[test]
    fn start_and_flush_small_record() {
        let mut fh = writer();
        start_record(&mut fh, Format::BinGeneric, 0).unwrap();
        let n = write_raw(&mut fh, b"hello");
        assert_eq!(n, 5);
        flush_record(&mut fh).unwrap();
        assert_eq!(fh.rlen, 9); // 4-byte header + 5 bytes payload
        assert!(!fh.rlongrec);
    }

    #[test]
    fn promotion_triggers_past_short_limit() {
        let mut fh = writer();
        start_record(&mut fh, Format::BinGeneric, 0).unwrap();
        let big = vec![0xABu8; (MAX_SHORT_RECORD_LEN as usize) + 16];
        let n = write_raw(&mut fh, &big);
        assert_eq!(n, big.len());
        assert!(fh.rlongrec);
        flush_record(&mut fh).unwrap();
    }

    #[test]
    fn append_record_rejects_format_mismatch() {
        let mut fh = writer();
        start_record(&mut fh, Format::BinInt32Le, 1).unwrap();
        write_raw(&mut fh, &[0u8; 4]);
        flush_record(&mut fh).unwrap();

        let err = append_record(&mut fh, Format::AscGeneric, 1).unwrap_err();
        assert!(matches!(err, BdioError::State(_)));
    }

    #[test]
    fn append_record_accepts_agnostic_request() {
        let mut fh = writer();
        start_record(&mut fh, Format::BinInt32, 2).unwrap();
        write_raw(&mut fh, &[0u8; 4]);
        flush_record(&mut fh).unwrap();
        append_record(&mut fh, Format::BinInt32, 2).unwrap();
        write_raw(&mut fh, &[0u8; 4]);
        flush_record(&mut fh).unwrap();
    }
}
