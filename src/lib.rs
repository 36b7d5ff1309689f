//! BDIO: a binary container format for self-describing records.
//!
//! A BDIO file is a file header (creation/modification provenance plus a
//! caller-supplied protocol-info string) followed by a sequence of
//! records. Each record carries a packed 4- or 8-byte header (data
//! format, a 4-bit user tag, and length) ahead of its payload; records
//! that outgrow the 4-byte header's ~1 MiB limit are transparently
//! promoted to the 8-byte long form. Numeric record payloads declare an
//! endianness and are byte-swapped on the fly when the reading machine
//! disagrees with it. Records may optionally be MD5-hashed, singly or
//! chained, with the digest appended as a trailing hash record.
//!
//! ```no_run
//! use bdio::{Bdio, Format, Mode};
//!
//! let mut w = Bdio::open("out.bdio", Mode::Write, Some("demo/1")).unwrap();
//! w.start_record(Format::BinInt32, 0).unwrap();
//! w.write_i32(&mut 42i32.to_ne_bytes());
//! w.close().unwrap();
//!
//! let mut r = Bdio::open("out.bdio", Mode::Read, Some("demo/1")).unwrap();
//! while r.seek_record().unwrap() {
//!     let mut buf = [0u8; 4];
//!     r.read_i32(&mut buf);
//! }
//! ```

mod bitpack;
mod buffered;
mod byteorder;
mod engine;
mod error;
mod format;
mod hash;
mod header;
mod provenance;

pub use error::{BdioError, Result};
pub use format::Format;
pub use hash::HashMode;
pub use provenance::{Clock, EnvProvenance, FixedClock, FixedProvenance, ProvenanceSource, SystemClock};

use std::fs::{File, OpenOptions};
use std::io::{Read, SeekFrom, Write};
use std::path::Path;
use std::sync::{Mutex, OnceLock};

use buffered::BufferedStream;
use byteorder::Endian;
use hash::HashState;

/// How a stream was opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Read,
    Write,
    Append,
}

/// Lifecycle state of a stream. Not exposed directly; query it through
/// [`Bdio::is_in_record`]/[`Bdio::is_in_header`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum State {
    /// Positioned on a file header.
    Header,
    /// Positioned inside a record.
    Record,
    /// At rest: the last item (header or record) is fully finalized.
    Neutral,
    /// A fatal error occurred; the stream accepts no further operations
    /// except inspecting its error log.
    Error,
}

#[derive(Debug, Default)]
struct ErrorLog {
    first: Option<String>,
    latest: Option<String>,
    count: u32,
}

/// Where a stream's diagnostic messages go by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageSink {
    Stderr,
    Null,
}

impl MessageSink {
    fn writer(self) -> Box<dyn Write + Send> {
        match self {
            MessageSink::Stderr => Box::new(std::io::stderr()),
            MessageSink::Null => Box::new(std::io::sink()),
        }
    }
}

struct Defaults {
    verbose: bool,
    msg: MessageSink,
    user: Option<String>,
    host: Option<String>,
}

impl Default for Defaults {
    fn default() -> Self {
        Defaults {
            verbose: false,
            msg: MessageSink::Stderr,
            user: None,
            host: None,
        }
    }
}

static DEFAULTS: OnceLock<Mutex<Defaults>> = OnceLock::new();

fn defaults() -> &'static Mutex<Defaults> {
    DEFAULTS.get_or_init(|| Mutex::new(Defaults::default()))
}

/// Set the process-wide default verbosity for newly opened streams.
pub fn set_dflt_verbose(verbose: bool) {
    defaults().lock().unwrap().verbose = verbose;
}

/// Set the process-wide default message sink for newly opened streams.
pub fn set_dflt_msg(sink: MessageSink) {
    defaults().lock().unwrap().msg = sink;
}

/// Override the user name recorded in newly written file headers. Pass
/// `None` to go back to resolving it from the environment.
pub fn set_user(user: Option<String>) {
    defaults().lock().unwrap().user = user;
}

/// Override the host name recorded in newly written file headers. Pass
/// `None` to go back to resolving it from the environment.
pub fn set_host(host: Option<String>) {
    defaults().lock().unwrap().host = host;
}

struct DefaultsProvenance;

impl ProvenanceSource for DefaultsProvenance {
    fn current_user(&self) -> String {
        let override_user = defaults().lock().unwrap().user.clone();
        override_user.unwrap_or_else(|| EnvProvenance.current_user())
    }

    fn current_host(&self) -> String {
        let override_host = defaults().lock().unwrap().host.clone();
        override_host.unwrap_or_else(|| EnvProvenance.current_host())
    }
}

/// A BDIO file opened for reading, writing, or appending.
pub struct Bdio {
    stream: BufferedStream,
    mode: Mode,
    endian: Endian,
    state: State,

    msg: Box<dyn Write + Send>,
    verbose: bool,
    error_log: ErrorLog,

    hcnt: u32,
    rcnt: u32,

    hmagic: u32,
    hversion: u16,
    hdirinfo1: u16,
    hdirinfo2: u32,
    hcdate: u32,
    hmdate: u32,
    hcuser: String,
    hmuser: String,
    hchost: String,
    hmhost: String,
    hpinfo: String,
    hstart: u64,

    rstart: u64,
    rlen: u64,
    ridx: u64,
    rlongrec: bool,
    rfmt: Option<Format>,
    ruinfo: u8,
    rdsize: usize,
    rswap: bool,
    bufstart: u64,

    hash: HashState,
}

impl Bdio {
    fn blank(file: File, mode: Mode) -> Bdio {
        let d = defaults().lock().unwrap();
        let verbose = d.verbose;
        let msg = d.msg.writer();
        drop(d);
        Bdio {
            stream: BufferedStream::new(file),
            mode,
            endian: Endian::native(),
            state: State::Neutral,
            msg,
            verbose,
            error_log: ErrorLog::default(),
            hcnt: 0,
            rcnt: 0,
            hmagic: 0,
            hversion: 0,
            hdirinfo1: 0,
            hdirinfo2: 0,
            hcdate: 0,
            hmdate: 0,
            hcuser: String::new(),
            hmuser: String::new(),
            hchost: String::new(),
            hmhost: String::new(),
            hpinfo: String::new(),
            hstart: 0,
            rstart: 0,
            rlen: 0,
            ridx: 0,
            rlongrec: false,
            rfmt: None,
            ruinfo: 0,
            rdsize: 0,
            rswap: false,
            bufstart: 0,
            hash: HashState::default(),
        }
    }

    #[cfg(test)]
    pub(crate) fn for_test(file: File, mode: Mode) -> Bdio {
        Bdio::blank(file, mode)
    }

    /// Open a BDIO file using process-wide defaults for provenance and the
    /// system clock. `protocol_info` is required in write mode (and when
    /// creating a fresh file in append mode); in read mode, if given, it
    /// is checked against the file's recorded protocol info.
    pub fn open<P: AsRef<Path>>(path: P, mode: Mode, protocol_info: Option<&str>) -> Result<Bdio> {
        Bdio::open_with(path, mode, protocol_info, &DefaultsProvenance, &SystemClock)
    }

    /// Like [`Bdio::open`], but with explicit provenance/clock sources —
    /// primarily for tests that need deterministic header contents.
    pub fn open_with<P: AsRef<Path>>(
        path: P,
        mode: Mode,
        protocol_info: Option<&str>,
        provenance: &dyn ProvenanceSource,
        clock: &dyn Clock,
    ) -> Result<Bdio> {
        match mode {
            Mode::Write => {
                let protocol_info = protocol_info.ok_or_else(|| {
                    BdioError::InvalidArgument("protocol info is required in write mode".into())
                })?;
                let file = File::create(path.as_ref())?;
                let mut fh = Bdio::blank(file, Mode::Write);
                header::write_header(&mut fh, protocol_info, clock, provenance)?;
                Ok(fh)
            }
            Mode::Read => {
                let file = File::open(path.as_ref())?;
                let mut fh = Bdio::blank(file, Mode::Read);
                let mut first4 = [0u8; 4];
                fh.stream.file_mut().read_exact(&mut first4)?;
                fh.rstart = 0;
                fh.ridx = 4;
                header::read_header(&mut fh, first4)?;
                if let Some(expected) = protocol_info {
                    if expected != fh.hpinfo {
                        return Err(BdioError::ProtocolMismatch {
                            expected: fh.hpinfo.clone(),
                            given: expected.to_string(),
                        });
                    }
                }
                Ok(fh)
            }
            Mode::Append => Bdio::open_append(path, protocol_info, provenance, clock),
        }
    }

    fn open_append<P: AsRef<Path>>(
        path: P,
        protocol_info: Option<&str>,
        provenance: &dyn ProvenanceSource,
        clock: &dyn Clock,
    ) -> Result<Bdio> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.as_ref())?;
        let mut fh = Bdio::blank(file, Mode::Read);

        let mut first4 = [0u8; 4];
        let n = fh.stream.file_mut().read(&mut first4)?;
        if n == 0 {
            let protocol_info = protocol_info.ok_or_else(|| {
                BdioError::InvalidArgument("protocol info is required for a new file".into())
            })?;
            fh.mode = Mode::Write;
            header::write_header(&mut fh, protocol_info, clock, provenance)?;
            fh.mode = Mode::Append;
            return Ok(fh);
        }
        if n != 4 {
            return Err(BdioError::UnexpectedEof);
        }

        fh.rstart = 0;
        fh.ridx = 4;
        header::read_header(&mut fh, first4)?;

        let mut last_hcnt;
        loop {
            last_hcnt = fh.hcnt;
            if !engine::seek_record(&mut fh)? {
                break;
            }
        }

        if let Some(expected) = protocol_info {
            if expected != fh.hpinfo {
                return Err(BdioError::ProtocolMismatch {
                    expected: fh.hpinfo.clone(),
                    given: expected.to_string(),
                });
            }
        }

        fh.state = if last_hcnt < fh.hcnt { State::Header } else { State::Neutral };
        let eof_pos = fh.rstart + fh.rlen;
        fh.stream.seek(SeekFrom::Start(fh.hstart))?;
        header::update_header(&mut fh, clock, provenance)?;
        fh.stream.seek(SeekFrom::Start(eof_pos))?;
        fh.mode = Mode::Append;
        Ok(fh)
    }

    /// Finalize any open record/header and flush buffered bytes. The
    /// underlying file is released when `self` drops either way.
    pub fn close(mut self) -> Result<()> {
        if matches!(self.mode, Mode::Write | Mode::Append) {
            engine::flush_record(&mut self)?;
        }
        Ok(())
    }

    pub fn start_record(&mut self, fmt: Format, uinfo: u8) -> Result<()> {
        engine::start_record(self, fmt, uinfo)
    }

    pub fn append_record(&mut self, fmt: Format, uinfo: u8) -> Result<()> {
        engine::append_record(self, fmt, uinfo)
    }

    pub fn flush_record(&mut self) -> Result<()> {
        engine::flush_record(self)
    }

    /// Advance to the next record or header (read mode only). Returns
    /// `Ok(false)` on a clean end of file.
    pub fn seek_record(&mut self) -> Result<bool> {
        engine::seek_record(self)
    }

    /// Untyped write: no format check, no byte swap.
    pub fn write(&mut self, data: &[u8]) -> usize {
        engine::write_raw(self, data)
    }

    /// Untyped read: no format check, no byte swap.
    pub fn read(&mut self, buf: &mut [u8]) -> usize {
        engine::read_raw(self, buf)
    }

    pub fn write_i32(&mut self, data: &mut [u8]) -> usize {
        engine::write_typed(self, data, &[Format::BinInt32Be, Format::BinInt32Le])
    }

    pub fn write_i64(&mut self, data: &mut [u8]) -> usize {
        engine::write_typed(self, data, &[Format::BinInt64Be, Format::BinInt64Le])
    }

    pub fn write_f32(&mut self, data: &mut [u8]) -> usize {
        engine::write_typed(self, data, &[Format::BinF32Be, Format::BinF32Le])
    }

    pub fn write_f64(&mut self, data: &mut [u8]) -> usize {
        engine::write_typed(self, data, &[Format::BinF64Be, Format::BinF64Le])
    }

    pub fn read_i32(&mut self, buf: &mut [u8]) -> usize {
        engine::read_typed(self, buf, &[Format::BinInt32Be, Format::BinInt32Le])
    }

    pub fn read_i64(&mut self, buf: &mut [u8]) -> usize {
        engine::read_typed(self, buf, &[Format::BinInt64Be, Format::BinInt64Le])
    }

    pub fn read_f32(&mut self, buf: &mut [u8]) -> usize {
        engine::read_typed(self, buf, &[Format::BinF32Be, Format::BinF32Le])
    }

    pub fn read_f64(&mut self, buf: &mut [u8]) -> usize {
        engine::read_typed(self, buf, &[Format::BinF64Be, Format::BinF64Le])
    }

    /// Enable single-mode MD5 hashing: each subsequent record gets a
    /// fresh digest, emitted as a trailing hash record.
    pub fn hash_auto(&mut self) {
        self.hash.enable_auto();
    }

    /// Switch an already-`hash_auto`-enabled stream to chain mode: each
    /// digest is seeded with the previous record's digest.
    pub fn hash_chain(&mut self) {
        self.hash.enable_chain();
    }

    /// If the current record is a hash record, return its 16-byte digest
    /// without consuming the record's read cursor.
    pub fn is_hash_record(&mut self) -> Result<Option<[u8; 16]>> {
        engine::is_hash_record(self)
    }

    pub fn is_in_record(&self) -> bool {
        self.state == State::Record
    }

    pub fn is_in_header(&self) -> bool {
        self.state == State::Header
    }

    pub fn hcuser(&self) -> &str {
        &self.hcuser
    }

    pub fn hmuser(&self) -> &str {
        &self.hmuser
    }

    pub fn hchost(&self) -> &str {
        &self.hchost
    }

    pub fn hmhost(&self) -> &str {
        &self.hmhost
    }

    pub fn hpinfo(&self) -> &str {
        &self.hpinfo
    }

    pub fn hcdate(&self) -> u32 {
        self.hcdate
    }

    pub fn hmdate(&self) -> u32 {
        self.hmdate
    }

    pub fn hversion(&self) -> u16 {
        self.hversion
    }

    pub fn hcnt(&self) -> u32 {
        self.hcnt
    }

    pub fn rcnt(&self) -> u32 {
        self.rcnt
    }

    pub fn ruinfo(&self) -> u8 {
        self.ruinfo
    }

    pub fn rfmt(&self) -> Option<Format> {
        self.rfmt
    }

    /// Length, in bytes, of the current record's payload (header
    /// excluded).
    pub fn rlen(&self) -> u64 {
        engine::payload_len(self)
    }

    pub fn set_verbose(&mut self, verbose: bool) {
        self.verbose = verbose;
    }

    pub fn set_msg(&mut self, sink: MessageSink) {
        self.msg = sink.writer();
    }

    pub fn error_count(&self) -> u32 {
        self.error_log.count
    }

    pub fn last_error(&self) -> Option<&str> {
        self.error_log.latest.as_deref()
    }

    pub fn first_error(&self) -> Option<&str> {
        self.error_log.first.as_deref()
    }

    pub fn eprint_last_error(&mut self) {
        if let Some(msg) = self.error_log.latest.clone() {
            let _ = writeln!(self.msg, "{msg}");
        }
    }

    pub fn eprint_first_error(&mut self) {
        if let Some(msg) = self.error_log.first.clone() {
            let _ = writeln!(self.msg, "{msg}");
        }
    }

    pub(crate) fn record_error(&mut self, err: BdioError) {
        let msg = err.to_string();
        if self.error_log.first.is_none() {
            self.error_log.first = Some(msg.clone());
        }
        self.error_log.latest = Some(msg.clone());
        self.error_log.count += 1;
        if self.verbose {
            let _ = writeln!(self.msg, "{msg}");
        }
        log::warn!("{msg}");
        if matches!(err, BdioError::Io(_)) {
            self.state = State::Error;
        }
    }
}
