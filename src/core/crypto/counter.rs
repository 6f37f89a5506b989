// src/core/crypto/counter.rs

use super::cipher::{hmac_sha256, random_bytes};

pub const CTR_DATA_LENGTH: usize = 16;

/// Hash-based counter used by protocol v3 signatures. The server keeps the
/// last matched value; each advance is one application of
/// `HMAC-SHA256(ctr, 0x00)` truncated to 16 bytes.
pub struct HashBasedCounter;

impl HashBasedCounter {
    /// Fresh random counter seed for a new activation.
    pub fn init() -> Vec<u8> {
        random_bytes(CTR_DATA_LENGTH)
    }

    pub fn next(ctr_data: &[u8]) -> Vec<u8> {
        let mut digest = hmac_sha256(ctr_data, &[0x00]);
        digest.truncate(CTR_DATA_LENGTH);
        digest
    }

    /// Counter values at offsets `1..=window` ahead of `ctr_data`, in
    /// order. The client advances its counter before signing, so the
    /// stored value itself is never a valid candidate; this also keeps a
    /// replayed signature from verifying twice.
    pub fn lookahead(ctr_data: &[u8], window: u64) -> Vec<Vec<u8>> {
        let mut candidates = Vec::with_capacity(window as usize);
        let mut current = ctr_data.to_vec();
        for _ in 0..window {
            current = Self::next(&current);
            candidates.push(current.clone());
        }
        candidates
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_random_and_sized() {
        let a = HashBasedCounter::init();
        let b = HashBasedCounter::init();
        assert_eq!(a.len(), CTR_DATA_LENGTH);
        assert_ne!(a, b);
    }

    #[test]
    fn test_next_is_deterministic() {
        let seed = HashBasedCounter::init();
        assert_eq!(HashBasedCounter::next(&seed), HashBasedCounter::next(&seed));
        assert_ne!(HashBasedCounter::next(&seed), seed);
    }

    #[test]
    fn test_lookahead_matches_iterated_next() {
        let seed = HashBasedCounter::init();
        let candidates = HashBasedCounter::lookahead(&seed, 5);
        assert_eq!(candidates.len(), 5);

        let mut current = seed;
        for candidate in &candidates {
            current = HashBasedCounter::next(&current);
            assert_eq!(&current, candidate);
        }
    }

    #[test]
    fn test_lookahead_excludes_current_value() {
        let seed = HashBasedCounter::init();
        let candidates = HashBasedCounter::lookahead(&seed, 10);
        assert!(!candidates.contains(&seed));
    }
}
