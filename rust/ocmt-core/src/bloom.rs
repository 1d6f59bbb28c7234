//! The advisory Bloom filter that fronts the revocation table.
//!
//! A negative answer is definitive and lets the hot path skip storage
//! entirely; a positive answer only means "consult the authoritative table".
//! Bits are never cleared individually — after the expiry sweep the filter is
//! rebuilt from the surviving table rows.

use sha2::{Digest, Sha256};

/// Default expected number of revoked capabilities
pub const DEFAULT_CAPACITY: usize = 100_000;

/// Default target false-positive rate
pub const DEFAULT_FALSE_POSITIVE_RATE: f64 = 0.001;

/// Number of probe positions per item, derived by double hashing
pub const HASH_COUNT: usize = 10;

/// A fixed-geometry Bloom filter over capability ids. Probe positions are
/// `h1 + i * h2 mod m` for `i` in `0..HASH_COUNT`, where `h1` and `h2` are
/// the first two 64-bit words of SHA-256 over the id bytes.
#[derive(Clone, Debug)]
pub struct RevocationBloom {
    bits: Vec<u8>,
    bit_count: u64,
    item_count: u64,
}

impl Default for RevocationBloom {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, DEFAULT_FALSE_POSITIVE_RATE)
    }
}

impl RevocationBloom {
    /// A filter sized for `capacity` items at the target false-positive
    /// rate: `m = -n * ln(p) / (ln 2)^2` bits
    pub fn new(capacity: usize, false_positive_rate: f64) -> Self {
        let ln2 = std::f64::consts::LN_2;
        let bit_count =
            (-(capacity as f64) * false_positive_rate.ln() / (ln2 * ln2)).ceil() as u64;
        let bit_count = bit_count.max(8);

        RevocationBloom {
            bits: vec![0u8; bit_count.div_ceil(8) as usize],
            bit_count,
            item_count: 0,
        }
    }

    /// Record a capability id in the filter
    pub fn insert(&mut self, capability_id: &str) {
        for position in self.probe_positions(capability_id) {
            self.bits[(position / 8) as usize] |= 1 << (position % 8);
        }
        self.item_count += 1;
    }

    /// `false` means the id was definitely never inserted; `true` means it
    /// may have been
    pub fn contains(&self, capability_id: &str) -> bool {
        self.probe_positions(capability_id)
            .into_iter()
            .all(|position| self.bits[(position / 8) as usize] & (1 << (position % 8)) != 0)
    }

    /// Number of inserts since construction
    pub fn item_count(&self) -> u64 {
        self.item_count
    }

    /// Size of the bit array
    pub fn bit_count(&self) -> u64 {
        self.bit_count
    }

    fn probe_positions(&self, capability_id: &str) -> [u64; HASH_COUNT] {
        let digest = Sha256::digest(capability_id.as_bytes());
        let h1 = u64::from_be_bytes(digest[0..8].try_into().expect("digest is 32 bytes"));
        let h2 = u64::from_be_bytes(digest[8..16].try_into().expect("digest is 32 bytes"));

        let mut positions = [0u64; HASH_COUNT];
        for (index, position) in positions.iter_mut().enumerate() {
            *position = h1.wrapping_add((index as u64).wrapping_mul(h2)) % self.bit_count;
        }
        positions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_finds_inserted_ids_and_no_phantom_hits_in_a_small_sample() {
        let mut bloom = RevocationBloom::default();
        for index in 0..1_000 {
            bloom.insert(&format!("revoked-{index}"));
        }
        for index in 0..1_000 {
            assert!(bloom.contains(&format!("revoked-{index}")));
        }

        // With n far below capacity the false positive rate is effectively
        // zero; a phantom hit here would indicate broken probe math
        let phantom = (0..1_000)
            .filter(|index| bloom.contains(&format!("live-{index}")))
            .count();
        assert_eq!(phantom, 0);
    }

    #[test]
    fn it_sizes_the_bit_array_from_the_formula() {
        let bloom = RevocationBloom::new(100_000, 0.001);
        // -100000 * ln(0.001) / ln(2)^2 ≈ 1.44 Mbit
        assert!(bloom.bit_count() > 1_400_000 && bloom.bit_count() < 1_500_000);
    }

    #[test]
    fn a_rebuilt_filter_forgets_pruned_ids() {
        let mut bloom = RevocationBloom::default();
        bloom.insert("expired-1");
        bloom.insert("kept-1");

        let mut rebuilt = RevocationBloom::default();
        rebuilt.insert("kept-1");

        assert!(rebuilt.contains("kept-1"));
        assert!(!rebuilt.contains("expired-1"));
    }
}
