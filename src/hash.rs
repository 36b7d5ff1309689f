//! Optional MD5 hashing of record payloads: single mode (a fresh digest
//! per record) or chain mode (each digest seeded with the previous
//! record's digest), emitted as a trailing `BinGeneric` hash record.

use md5::{Digest, Md5};

/// Magic value for a single-mode hash record's 20-byte payload.
pub const HASH_MAGIC_SINGLE: u32 = 0x5A5A_5A4D;
/// Magic value for a chain-mode hash record's 20-byte payload.
pub const HASH_MAGIC_CHAIN: u32 = 0x5A5A_5A4E;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashMode {
    Single,
    Chain,
}

pub struct HashState {
    auto: bool,
    mode: HashMode,
    prev_digest: [u8; 16],
    ctx: Option<Md5>,
}

impl Default for HashState {
    fn default() -> Self {
        HashState {
            auto: false,
            mode: HashMode::Single,
            prev_digest: [0u8; 16],
            ctx: None,
        }
    }
}

impl HashState {
    pub fn is_auto(&self) -> bool {
        self.auto
    }

    pub fn mode(&self) -> HashMode {
        self.mode
    }

    /// Enable hashing in single mode (the C API's `bdio_hash_auto`).
    pub fn enable_auto(&mut self) {
        self.auto = true;
        self.mode = HashMode::Single;
        self.ctx = None;
        self.prev_digest = [0u8; 16];
    }

    /// Switch an already-enabled stream to chain mode (`bdio_hash_chain`).
    /// A no-op if auto-hashing was never enabled.
    pub fn enable_chain(&mut self) {
        if self.auto {
            self.mode = HashMode::Chain;
        }
    }

    /// Toggle the `auto` flag without disturbing `mode`/`prev_digest`,
    /// used to suppress hashing while emitting the hash record itself.
    pub(crate) fn set_auto(&mut self, on: bool) {
        self.auto = on;
    }

    /// Seed a fresh context at `start_record` time; in chain mode the
    /// context is primed with the previous record's digest first.
    pub fn begin_record(&mut self) {
        if !self.auto {
            return;
        }
        let mut hasher = Md5::new();
        if self.mode == HashMode::Chain {
            hasher.update(self.prev_digest);
        }
        self.ctx = Some(hasher);
    }

    pub fn update(&mut self, data: &[u8]) {
        if let Some(ctx) = self.ctx.as_mut() {
            ctx.update(data);
        }
    }

    /// Finalize the current record's digest, remembering it for the next
    /// record in chain mode, and return the 20-byte hash-record payload
    /// (4-byte little-endian magic followed by the 16-byte digest).
    pub fn finish_record(&mut self) -> Option<[u8; 20]> {
        let ctx = self.ctx.take()?;
        let digest: [u8; 16] = ctx.finalize().into();
        self.prev_digest = digest;
        let magic = match self.mode {
            HashMode::Single => HASH_MAGIC_SINGLE,
            HashMode::Chain => HASH_MAGIC_CHAIN,
        };
        let mut payload = [0u8; 20];
        payload[0..4].copy_from_slice(&magic.to_le_bytes());
        payload[4..20].copy_from_slice(&digest);
        Some(payload)
    }
}

/// Classify a candidate hash record's first 4 payload bytes.
pub fn magic_matches(bytes: [u8; 4]) -> bool {
    let magic = u32::from_le_bytes(bytes);
    magic == HASH_MAGIC_SINGLE || magic == HASH_MAGIC_CHAIN
}
