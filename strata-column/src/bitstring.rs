/// A set of query/predicate slots as a 64-bit pattern: bit `i` set means the
/// tuple satisfies query `i`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Bitstring(u64);

impl Bitstring {
    /// A bitstring from a raw pattern.
    pub fn new(pattern: u64) -> Self {
        Bitstring(pattern)
    }

    /// The empty set.
    pub fn empty() -> Self {
        Bitstring(0)
    }

    /// A bitstring with only query slot `slot` set.
    pub fn of_slot(slot: u32) -> Self {
        Bitstring(1u64 << slot)
    }

    /// The raw pattern.
    pub fn as_u64(self) -> u64 {
        self.0
    }

    /// Whether no slot is set.
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Set every slot.
    pub fn set_all(&mut self) {
        self.0 = u64::MAX;
    }

    /// Whether any slot is shared with `other`.
    pub fn overlaps(self, other: Bitstring) -> bool {
        self.0 & other.0 != 0
    }

    /// Add every slot of `other`.
    pub fn union_with(&mut self, other: Bitstring) {
        self.0 |= other.0;
    }

    /// Keep only slots shared with `other`.
    pub fn intersect_with(&mut self, other: Bitstring) {
        self.0 &= other.0;
    }

    /// Remove every slot of `other`.
    pub fn difference_with(&mut self, other: Bitstring) {
        self.0 &= !other.0;
    }

    /// Extract and clear the lowest set slot; the returned bitstring has
    /// exactly that slot set. Draining pattern:
    ///
    /// ```
    /// # use strata_column::Bitstring;
    /// let mut set = Bitstring::new(0b1010);
    /// let mut members = Vec::new();
    /// while !set.is_empty() {
    ///     members.push(set.take_first());
    /// }
    /// assert_eq!(members, [Bitstring::new(0b10), Bitstring::new(0b1000)]);
    /// ```
    pub fn take_first(&mut self) -> Bitstring {
        let first = self.0 & self.0.wrapping_neg();
        self.0 &= !first;
        Bitstring(first)
    }
}

impl std::fmt::Display for Bitstring {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}
