//! File-header emission and parsing: the provenance block that precedes
//! every sequence of records (and may recur, once per `append` open, later
//! in the same file).

use std::io::{Read, Write};

use crate::bitpack::FILE_MAGIC;
use crate::byteorder::{self, Endian};
use crate::error::{BdioError, Result};
use crate::provenance::{Clock, ProvenanceSource};
use crate::{Bdio, State};

/// Format-revision number stamped into every file header.
pub const BDIO_VERSION: u16 = 1;

/// Including the terminating NUL.
const MAX_USER_LEN: usize = 33;
const MAX_HOST_LEN: usize = 256;
const MAX_PINFO_LEN: usize = 3505;

fn truncate_cstr(s: &str, max_incl_nul: usize) -> String {
    let max_bytes = max_incl_nul.saturating_sub(1);
    if s.len() <= max_bytes {
        s.to_string()
    } else {
        String::from_utf8_lossy(&s.as_bytes()[..max_bytes]).into_owned()
    }
}

/// Build and emit a fresh header at the file's current write position,
/// then record its fields on `fh`. Shared by `write_header` and
/// `update_header`.
#[allow(clippy::too_many_arguments)]
fn emit(
    fh: &mut Bdio,
    cuser: String,
    muser: String,
    chost: String,
    mhost: String,
    pinfo: String,
    ctime: u32,
    mtime: u32,
) -> Result<()> {
    let cuser = truncate_cstr(&cuser, MAX_USER_LEN);
    let muser = truncate_cstr(&muser, MAX_USER_LEN);
    let chost = truncate_cstr(&chost, MAX_HOST_LEN);
    let mhost = truncate_cstr(&mhost, MAX_HOST_LEN);
    let pinfo = truncate_cstr(&pinfo, MAX_PINFO_LEN);

    let mut strings = Vec::new();
    for s in [&cuser, &muser, &chost, &mhost, &pinfo] {
        strings.extend_from_slice(s.as_bytes());
        strings.push(0);
    }

    let unpadded = 12 + strings.len();
    let padding = (4 - (unpadded % 4)) % 4;
    let rest_len = unpadded + padding;
    if rest_len > 0x0FFF {
        return Err(BdioError::ResourceExhausted(
            "file header provenance block too large".into(),
        ));
    }

    let mut prefix8 = [0u8; 8];
    prefix8[0..4].copy_from_slice(&FILE_MAGIC.to_ne_bytes());
    let w1: u32 = ((BDIO_VERSION as u32) << 16) | (rest_len as u32 & 0x0FFF);
    prefix8[4..8].copy_from_slice(&w1.to_ne_bytes());
    if fh.endian == Endian::Big {
        byteorder::swap32(&mut prefix8);
    }

    let mut rest = vec![0u8; rest_len];
    rest[0..4].copy_from_slice(&0u32.to_ne_bytes()); // dir1/dir2: unused, always zero
    rest[4..8].copy_from_slice(&ctime.to_ne_bytes());
    rest[8..12].copy_from_slice(&mtime.to_ne_bytes());
    if fh.endian == Endian::Big {
        byteorder::swap32(&mut rest[0..12]);
    }
    rest[12..12 + strings.len()].copy_from_slice(&strings);

    fh.stream.file_mut().write_all(&prefix8)?;
    fh.stream.file_mut().write_all(&rest)?;

    fh.hmagic = FILE_MAGIC;
    fh.hversion = BDIO_VERSION;
    fh.hdirinfo1 = 0;
    fh.hdirinfo2 = 0;
    fh.hcdate = ctime;
    fh.hmdate = mtime;
    fh.hcuser = cuser;
    fh.hmuser = muser;
    fh.hchost = chost;
    fh.hmhost = mhost;
    fh.hpinfo = pinfo;
    fh.hcnt += 1;
    fh.state = State::Header;
    fh.ridx = (8 + rest_len) as u64;
    fh.rlen = fh.ridx;
    fh.rlongrec = false;
    fh.bufstart = 0;
    fh.stream.set_bufidx(0);
    log::debug!("wrote file header #{} ({} bytes)", fh.hcnt, fh.rlen);
    Ok(())
}

/// Write a brand-new header: creation and modification identity are the
/// same, stamped with `clock.now_unix()` for both dates.
pub(crate) fn write_header(
    fh: &mut Bdio,
    protocol_info: &str,
    clock: &dyn Clock,
    provenance: &dyn ProvenanceSource,
) -> Result<()> {
    let user = provenance.current_user();
    let host = provenance.current_host();
    let now = clock.now_unix();
    emit(
        fh,
        user.clone(),
        user,
        host.clone(),
        host,
        protocol_info.to_string(),
        now,
        now,
    )
}

/// Rewrite the header at the stream's current position (the caller has
/// already seeked to `fh.hstart`), preserving the original creation
/// identity and date, refreshing only the modification identity and date.
/// Used when an append-mode open determines the file ended at a header.
pub(crate) fn update_header(
    fh: &mut Bdio,
    clock: &dyn Clock,
    provenance: &dyn ProvenanceSource,
) -> Result<()> {
    let cuser = fh.hcuser.clone();
    let chost = fh.hchost.clone();
    let pinfo = fh.hpinfo.clone();
    let ctime = fh.hcdate;
    let muser = provenance.current_user();
    let mhost = provenance.current_host();
    let mtime = clock.now_unix();
    emit(fh, cuser, muser, chost, mhost, pinfo, ctime, mtime)
}

fn read_cstr(buf: &[u8], start: usize) -> Result<(String, usize)> {
    let nul = buf[start..]
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| BdioError::CorruptedHeader("unterminated string in header".into()))?;
    let s = String::from_utf8_lossy(&buf[start..start + nul]).into_owned();
    Ok((s, start + nul + 1))
}

/// Parse a file header. `first4` is the already-consumed first 4 bytes of
/// the header (the caller peeked them to distinguish a file header from a
/// record header via the magic bit).
pub(crate) fn read_header(fh: &mut Bdio, first4: [u8; 4]) -> Result<()> {
    let mut rest4 = [0u8; 4];
    fh.stream.file_mut().read_exact(&mut rest4)?;

    let mut prefix8 = [0u8; 8];
    prefix8[0..4].copy_from_slice(&first4);
    prefix8[4..8].copy_from_slice(&rest4);
    if fh.endian == Endian::Big {
        byteorder::swap32(&mut prefix8);
    }
    let w0 = u32::from_ne_bytes(prefix8[0..4].try_into().unwrap());
    let w1 = u32::from_ne_bytes(prefix8[4..8].try_into().unwrap());
    if w0 != FILE_MAGIC {
        fh.state = State::Error;
        return Err(BdioError::CorruptedHeader(format!(
            "bad file header magic: {w0:#010x}"
        )));
    }
    let version = ((w1 & 0xFFFF_0000) >> 16) as u16;
    let rest_len = (w1 & 0x0FFF) as usize;
    if rest_len < 12 {
        fh.state = State::Error;
        return Err(BdioError::CorruptedHeader(
            "file header provenance block shorter than its fixed fields".into(),
        ));
    }

    let mut rest = vec![0u8; rest_len];
    fh.stream.file_mut().read_exact(&mut rest)?;
    if fh.endian == Endian::Big {
        byteorder::swap32(&mut rest[0..12]);
    }
    let dir_word = u32::from_ne_bytes(rest[0..4].try_into().unwrap());
    let ctime = u32::from_ne_bytes(rest[4..8].try_into().unwrap());
    let mtime = u32::from_ne_bytes(rest[8..12].try_into().unwrap());
    let dir1 = ((dir_word & 0xFFC0_0000) >> 22) as u16;
    let dir2 = dir_word & 0x003F_FFFF;

    let strings = &rest[12..];
    let (cuser, off) = read_cstr(strings, 0)?;
    let (muser, off) = read_cstr(strings, off)?;
    let (chost, off) = read_cstr(strings, off)?;
    let (mhost, off) = read_cstr(strings, off)?;
    let (pinfo, _off) = read_cstr(strings, off)?;

    fh.hmagic = w0;
    fh.hversion = version;
    fh.hdirinfo1 = dir1;
    fh.hdirinfo2 = dir2;
    fh.hcdate = ctime;
    fh.hmdate = mtime;
    fh.hcuser = cuser;
    fh.hmuser = muser;
    fh.hchost = chost;
    fh.hmhost = mhost;
    fh.hpinfo = pinfo;
    fh.hcnt += 1;
    fh.hstart = fh.rstart;
    fh.rlen = (rest_len + 8) as u64;
    fh.ridx = fh.rlen;
    fh.rlongrec = false;
    fh.bufstart = 0;
    fh.state = State::Header;
    log::debug!("read file header #{} ({} bytes)", fh.hcnt, fh.rlen);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provenance::{FixedClock, FixedProvenance};
    use crate::Mode;
    use std::io::SeekFrom;
    use tempfile::tempfile;

    fn provenance() -> FixedProvenance {
        FixedProvenance {
            user: "alice".into(),
            host: "build01".into(),
        }
    }

    #[test]
    fn write_then_read_round_trips_identity() {
        let file = tempfile().unwrap();
        let mut fh = Bdio::for_test(file, Mode::Write);
        write_header(&mut fh, "test/1", &FixedClock(1000), &provenance()).unwrap();
        assert_eq!(fh.hcuser, "alice");
        assert_eq!(fh.hmuser, "alice");
        assert_eq!(fh.hpinfo, "test/1");
        assert_eq!(fh.hcdate, 1000);
        assert_eq!(fh.hmdate, 1000);

        fh.stream.seek(SeekFrom::Start(0)).unwrap();
        let mut first4 = [0u8; 4];
        fh.stream.file_mut().read_exact(&mut first4).unwrap();
        let mut fh2 = Bdio::for_test(fh.stream.file().try_clone().unwrap(), Mode::Read);
        fh2.stream.seek(SeekFrom::Start(4)).unwrap();
        read_header(&mut fh2, first4).unwrap();
        assert_eq!(fh2.hcuser, "alice");
        assert_eq!(fh2.hpinfo, "test/1");
    }

    #[test]
    fn update_header_preserves_creation_identity() {
        let file = tempfile().unwrap();
        let mut fh = Bdio::for_test(file, Mode::Write);
        write_header(&mut fh, "test/1", &FixedClock(1000), &provenance()).unwrap();

        fh.stream.seek(SeekFrom::Start(0)).unwrap();
        let later = FixedProvenance {
            user: "bob".into(),
            host: "build02".into(),
        };
        update_header(&mut fh, &FixedClock(2000), &later).unwrap();

        assert_eq!(fh.hcuser, "alice");
        assert_eq!(fh.hchost, "build01");
        assert_eq!(fh.hcdate, 1000);
        assert_eq!(fh.hmuser, "bob");
        assert_eq!(fh.hmhost, "build02");
        assert_eq!(fh.hmdate, 2000);
    }

    #[test]
    fn rejects_bad_magic() {
        let file = tempfile().unwrap();
        let mut fh = Bdio::for_test(file, Mode::Read);
        let err = read_header(&mut fh, [0, 0, 0, 0]).unwrap_err();
        assert!(matches!(err, BdioError::CorruptedHeader(_)));
    }
}
