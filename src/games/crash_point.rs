//! Deterministic crash point generation
//!
//! The crash point of a round is a pure function of the server seed and the
//! round id, so any past round can be recomputed from those two values.

use sha2::{Digest, Sha256};

/// Upper bound on any crash point
pub const MAX_CRASH_POINT: f64 = 120.0;

/// Number of hash bits used for the draw (13 hex digits)
const PREFIX_BITS: u32 = 52;

/// Maps `(seed, round_id)` to a crash multiplier in `[1.00, cap]`
#[derive(Debug, Clone)]
pub struct CrashPointGenerator {
    cap: f64,
}

impl Default for CrashPointGenerator {
    fn default() -> Self {
        Self::new(MAX_CRASH_POINT)
    }
}

impl CrashPointGenerator {
    pub fn new(cap: f64) -> Self {
        Self { cap: cap.max(1.0) }
    }

    /// Crash point for a round
    pub fn generate(&self, seed: &str, round_id: u64) -> f64 {
        self.from_hash_prefix(hash_prefix(seed, round_id))
    }

    /// Crash point for a 52-bit hash prefix `h`.
    ///
    /// `h == 0` yields exactly 1.00; the division below is never by zero
    /// because `h < 2^52`.
    pub fn from_hash_prefix(&self, h: u64) -> f64 {
        if h == 0 {
            return 1.0;
        }

        let e: u64 = 1 << PREFIX_BITS;
        let h = h & (e - 1);
        let hundredths = (e * 100) / (e - h);
        let result = hundredths as f64 / 100.0;

        result.min(self.cap)
    }
}

/// First 52 bits of `SHA-256(seed ‖ round_id)`
pub fn hash_prefix(seed: &str, round_id: u64) -> u64 {
    let digest = round_digest(seed, round_id);

    let mut head = [0u8; 8];
    head[1..8].copy_from_slice(&digest[..7]);
    // 7 bytes = 56 bits; drop the low nibble to keep 13 hex digits
    u64::from_be_bytes(head) >> 4
}

/// Hex digest of `SHA-256(seed ‖ round_id)`, handy for logs
pub fn round_hash_hex(seed: &str, round_id: u64) -> String {
    hex::encode(round_digest(seed, round_id))
}

fn round_digest(seed: &str, round_id: u64) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(seed.as_bytes());
    hasher.update(round_id.to_string().as_bytes());
    hasher.finalize().into()
}
