use std::{f64::consts::LN_2, hash::Hasher};

use bitvec::prelude::*;
use siphasher::sip::SipHasher13;

use crate::{
    DecodingResult,
    storage::encdec::{Decode, Encode, EncodeBuilder, decode::malformed_input},
};

// fixed keys so that filters built by different processes agree
const KEY_0: u64 = 0x7379_6d70_686f_6e79;
const KEY_1: u64 = 0x7761_6c6c_6574_7321;

/// Bloom filter over address bytes.
///
/// `contains` never returns false for an inserted element but may return true for an element
/// which was never inserted, so a positive answer must be confirmed with a lookup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AddressFilter {
    bits: BitVec<u8, Lsb0>,
    /// number of hash functions
    k: u32,
    /// number of inserted elements
    n: u32,
}

impl AddressFilter {
    pub fn new(m: usize, k: u32) -> Self {
        Self {
            bits: bitvec![u8, Lsb0; 0; m.max(8)],
            k: k.max(1),
            n: 0,
        }
    }

    /// Size the filter for `expected` elements at the target false positive rate
    pub fn with_rate(expected: usize, fpr: f64) -> Self {
        let n = expected.max(1) as f64;

        let m = (-n * fpr.ln() / (LN_2 * LN_2)).ceil() as usize;
        let k = ((m as f64 / n) * LN_2).round() as u32;

        Self::new(m, k.clamp(1, 32))
    }

    /// Filter sized for a single wallet
    pub fn for_wallet() -> Self {
        Self::with_rate(10_000, 0.001)
    }

    pub fn insert(&mut self, element: &[u8]) {
        for pos in self.positions(element) {
            self.bits.set(pos, true);
        }

        self.n = self.n.saturating_add(1);
    }

    pub fn contains(&self, element: &[u8]) -> bool {
        self.positions(element).all(|pos| self.bits[pos])
    }

    pub fn len(&self) -> u32 {
        self.n
    }

    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    // double hashing: h1 + i * h2
    fn positions(&self, element: &[u8]) -> impl Iterator<Item = usize> + use<> {
        let h1 = sip(element, 0);
        let h2 = sip(element, 1);
        let m = self.bits.len() as u64;

        (0..self.k as u64).map(move |i| (h1.wrapping_add(i.wrapping_mul(h2)) % m) as usize)
    }
}

fn sip(element: &[u8], seed: u8) -> u64 {
    let mut hasher = SipHasher13::new_with_keys(KEY_0, KEY_1);
    hasher.write_u8(seed);
    hasher.write(element);
    hasher.finish()
}

// m(4) ‖ k(4) ‖ n(4) ‖ raw bits (length prefixed)
impl Encode for AddressFilter {
    fn encode(&self) -> Vec<u8> {
        EncodeBuilder::new()
            .append(&(self.bits.len() as u32))
            .append(&self.k)
            .append(&self.n)
            .append(&self.bits.as_raw_slice().to_vec())
            .build()
    }
}

impl Decode for AddressFilter {
    fn decode(bytes: &[u8]) -> DecodingResult<'_, Self> {
        let (m, rest) = u32::decode(bytes)?;
        let (k, rest) = u32::decode(rest)?;
        let (n, rest) = u32::decode(rest)?;
        let (raw, rest) = Vec::<u8>::decode(rest)?;

        if raw.len() * 8 < m as usize || m == 0 || k == 0 {
            return Err(malformed_input("inconsistent filter parameters", bytes));
        }

        let mut bits = BitVec::<u8, Lsb0>::from_vec(raw);
        bits.truncate(m as usize);

        Ok((Self { bits, k, n }, rest))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inserted_elements_are_always_found() {
        let mut filter = AddressFilter::with_rate(1_000, 0.01);

        for i in 0u32..1_000 {
            filter.insert(&i.to_be_bytes());
        }

        assert!((0u32..1_000).all(|i| filter.contains(&i.to_be_bytes())));
        assert_eq!(filter.len(), 1_000);
    }

    #[test]
    fn false_positive_rate_is_bounded() {
        let mut filter = AddressFilter::with_rate(1_000, 0.01);

        for i in 0u32..1_000 {
            filter.insert(&i.to_be_bytes());
        }

        let false_positives = (1_000_000u32..1_010_000)
            .filter(|i| filter.contains(&i.to_be_bytes()))
            .count();

        // expected ~100, allow generous slack
        assert!(false_positives < 400, "{false_positives} false positives");
    }

    #[test]
    fn persisted_filter_answers_the_same() {
        let mut filter = AddressFilter::for_wallet();
        filter.insert(b"address one");
        filter.insert(b"address two");

        let decoded = AddressFilter::decode_exact(&filter.encode()).unwrap();

        assert_eq!(decoded, filter);
        assert!(decoded.contains(b"address two"));
    }
}
