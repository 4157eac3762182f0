use bit_vec::BitVec;
use seahash::hash;

/// Negative-lookup guard for identifier point queries.
pub struct IdentifierFilter {
    bits: BitVec,
    num_hashes: u32,
}

impl IdentifierFilter {
    /// Size the filter for `expected_items` identifiers at the given false positive rate.
    pub fn new(expected_items: usize, false_positive_rate: f64) -> Self {
        let n = expected_items.max(1) as f64;
        let ln2 = 2.0f64.ln();

        // m = -(n * ln(p)) / (ln(2)^2), k = (m / n) * ln(2)
        let m = (-(n * false_positive_rate.ln()) / (ln2 * ln2)).ceil().max(8.0);
        let k = ((m / n) * ln2).ceil().max(1.0);

        Self {
            bits: BitVec::from_elem(m as usize, false),
            num_hashes: k as u32,
        }
    }

    pub fn insert(&mut self, identifier: &str) {
        let m = self.bits.len() as u64;
        for idx in self.positions(identifier) {
            self.bits.set((idx % m) as usize, true);
        }
    }

    /// False means definitely absent; true means possibly present.
    pub fn might_contain(&self, identifier: &str) -> bool {
        let m = self.bits.len() as u64;
        self.positions(identifier)
            .all(|idx| self.bits.get((idx % m) as usize).unwrap_or(false))
    }

    pub fn clear(&mut self) {
        self.bits.clear();
    }

    // Double hashing: g_i(x) = h1(x) + i * h2(x)
    fn positions(&self, identifier: &str) -> impl Iterator<Item = u64> {
        let h1 = hash(identifier.as_bytes());
        let h2 = h1.wrapping_add(0x9E3779B97F4A7C15);
        (0..self.num_hashes as u64).map(move |i| h1.wrapping_add(i.wrapping_mul(h2)))
    }
}
