//! Identity and wall-clock sources used when emitting file-header
//! provenance fields.
//!
//! Both are pluggable collaborators rather than baked into `header.rs`, so
//! tests can supply deterministic values instead of depending on the host
//! environment or the system clock.

use std::time::{SystemTime, UNIX_EPOCH};

/// Resolves which user and host to record in a file header. Both methods
/// fall back to `"unknown"` on failure, matching the contract that a file
/// header is always produced even when identity discovery fails.
pub trait ProvenanceSource {
    fn current_user(&self) -> String;
    fn current_host(&self) -> String;
}

/// Default provenance source: reads the environment the way a POSIX shell
/// session would. Platforms without a POSIX identity call fall back to
/// `"unknown"`.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvProvenance;

impl ProvenanceSource for EnvProvenance {
    fn current_user(&self) -> String {
        std::env::var("USER")
            .or_else(|_| std::env::var("USERNAME"))
            .unwrap_or_else(|_| "unknown".to_string())
    }

    fn current_host(&self) -> String {
        std::env::var("HOSTNAME")
            .ok()
            .or_else(|| {
                std::fs::read_to_string("/etc/hostname")
                    .ok()
                    .map(|s| s.trim().to_string())
            })
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "unknown".to_string())
    }
}

/// A fixed user/host pair, useful for tests that need deterministic
/// header provenance.
#[derive(Debug, Clone)]
pub struct FixedProvenance {
    pub user: String,
    pub host: String,
}

impl ProvenanceSource for FixedProvenance {
    fn current_user(&self) -> String {
        self.user.clone()
    }

    fn current_host(&self) -> String {
        self.host.clone()
    }
}

/// A source of wall-clock time, in whole seconds since the Unix epoch.
pub trait Clock {
    fn now_unix(&self) -> u32;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_unix(&self) -> u32 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as u32)
            .unwrap_or(0)
    }
}

/// A clock that always reports the same instant, for reproducible tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub u32);

impl Clock for FixedClock {
    fn now_unix(&self) -> u32 {
        self.0
    }
}
