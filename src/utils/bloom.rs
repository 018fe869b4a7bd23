//! Bloom filter over index terms.
//!
//! The disk segment keeps one of these for its committed key set so that
//! lookups for terms the segment has never seen skip the store entirely.

use ahash::RandomState;

/// A space-efficient probabilistic set of terms.
#[derive(Clone, Debug)]
pub struct TermFilter {
    /// Bit array stored as u64 words
    bits: Vec<u64>,
    num_bits: usize,
    num_hashes: u8,
    h1: RandomState,
    h2: RandomState,
}

impl TermFilter {
    /// Create a filter sized for `expected_terms` at the given false positive rate.
    pub fn new(expected_terms: usize, false_positive_rate: f64) -> Self {
        // m = -n * ln(p) / (ln(2)^2)
        let n = expected_terms.max(1) as f64;
        let p = false_positive_rate.clamp(0.0001, 0.5);
        let ln2_sq = std::f64::consts::LN_2 * std::f64::consts::LN_2;

        let num_bits = (((-n * p.ln()) / ln2_sq).ceil() as usize).max(64);
        let num_words = num_bits.div_ceil(64);
        let num_bits = num_words * 64;

        // k = (m/n) * ln(2)
        let num_hashes = ((num_bits as f64 / n) * std::f64::consts::LN_2).round() as u8;

        Self {
            bits: vec![0u64; num_words],
            num_bits,
            num_hashes: num_hashes.clamp(1, 16),
            h1: RandomState::with_seeds(0, 0, 0, 0),
            h2: RandomState::with_seeds(
                0x517cc1b727220a95,
                0x9e3779b97f4a7c15,
                0xbf58476d1ce4e5b9,
                0x94d049bb133111eb,
            ),
        }
    }

    /// Build a filter holding every term of `terms`
    pub fn from_terms<'a, I>(terms: I, expected_terms: usize) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut filter = Self::new(expected_terms, 0.01);
        for term in terms {
            filter.insert(term);
        }
        filter
    }

    pub fn insert(&mut self, term: &str) {
        let (h1, h2) = self.hash_pair(term);
        for i in 0..self.num_hashes as u64 {
            let bit = (h1.wrapping_add(i.wrapping_mul(h2)) as usize) % self.num_bits;
            self.bits[bit / 64] |= 1u64 << (bit % 64);
        }
    }

    /// False means the term is definitely absent.
    pub fn might_contain(&self, term: &str) -> bool {
        let (h1, h2) = self.hash_pair(term);
        (0..self.num_hashes as u64).all(|i| {
            let bit = (h1.wrapping_add(i.wrapping_mul(h2)) as usize) % self.num_bits;
            self.bits[bit / 64] & (1u64 << (bit % 64)) != 0
        })
    }

    #[inline]
    fn hash_pair(&self, term: &str) -> (u64, u64) {
        (self.h1.hash_one(term), self.h2.hash_one(term))
    }
}

impl Default for TermFilter {
    fn default() -> Self {
        Self::new(10000, 0.01)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inserted_terms_are_found() {
        let terms: Vec<String> = (0..500).map(|i| format!("term{}", i)).collect();
        let filter = TermFilter::from_terms(terms.iter().map(String::as_str), terms.len());

        for term in &terms {
            assert!(filter.might_contain(term), "{} should be found", term);
        }
    }

    #[test]
    fn test_false_positive_rate() {
        let mut filter = TermFilter::new(1000, 0.01);
        for i in 0..1000 {
            filter.insert(&format!("present{}", i));
        }

        let false_positives = (0..10000)
            .filter(|i| filter.might_contain(&format!("absent{}", i)))
            .count();

        // 3x tolerance over the 1% target
        assert!(false_positives < 300, "too many false positives: {}", false_positives);
    }

    #[test]
    fn test_empty_filter_rejects() {
        let filter = TermFilter::from_terms(std::iter::empty(), 0);
        assert!(!filter.might_contain("donut"));
    }
}
