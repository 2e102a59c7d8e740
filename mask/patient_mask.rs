// ========================================================================================
//
//                     THE PATIENT-PRESENCE MASK: SPARSE OR DENSE
//
// ========================================================================================
//
// A `PatientMask` answers one question for one genotype class of one variant: which
// positions of the partition's patient universe carry it. Rare calls are kept as an
// explicit position set; anything above the crossover threshold becomes a fixed-width
// bit string.
//
// ### The dense layout ###
//
// A dense mask over `n` patients is a bit string of `n + 4` bits. Reading from the left
// (most-significant) end: two guard bits set to 1, `n` data bits where index `i + 2` is
// patient `i`, then two more guard bits set to 1. Bit string index `k` lives at word
// `k / 64`, bit `k % 64`. The guards pin the bit length so concatenating two masks never
// loses leading or trailing zero patients, and every mask renders to the same text
// form (`"11011011"` is four patients with patients 1 and 2 present).

use crate::empty_cache::empty_mask;
use crate::error::{MaskError, Result};
use crate::types::{PatientId, PatientUniverse};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::collections::btree_set;
use std::fmt;
use std::str::FromStr;

/// Cardinality above which a presence set is stored as a dense bit string.
pub const DEFAULT_SPARSE_THRESHOLD: usize = 5;

/// Number of guard bits on each end of a dense mask.
pub const GUARD_BITS: usize = 2;

const WORD_BITS: usize = u64::BITS as usize;

// ========================================================================================
//                                   Dense storage
// ========================================================================================

/// A fixed-width, guard-wrapped bit string over a patient universe.
///
/// Invariant: bits `0`, `1`, `bit_len - 2` and `bit_len - 1` are always set and no bit at or
/// beyond `bit_len` is set. Checked by a debug assertion on every construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "DenseWire", into = "DenseWire")]
pub struct DenseMask {
    bit_len: usize,
    words: Vec<u64>,
}

#[derive(Serialize, Deserialize)]
struct DenseWire {
    patients: usize,
    words: Vec<u64>,
}

impl From<DenseMask> for DenseWire {
    fn from(mask: DenseMask) -> Self {
        Self {
            patients: mask.patients(),
            words: mask.words,
        }
    }
}

impl TryFrom<DenseWire> for DenseMask {
    type Error = MaskError;

    fn try_from(wire: DenseWire) -> Result<Self> {
        let bit_len = wire.patients.checked_add(2 * GUARD_BITS).ok_or_else(|| {
            MaskError::InvalidBitString(format!(
                "stored dense mask claims {} patients",
                wire.patients
            ))
        })?;
        let mask = Self {
            bit_len,
            words: wire.words,
        };
        if !mask.guards_intact() {
            return Err(MaskError::InvalidBitString(format!(
                "stored dense mask over {} patients has damaged guard bits",
                wire.patients
            )));
        }
        Ok(mask)
    }
}

impl DenseMask {
    /// An all-zero mask over `patients` positions, guards set.
    pub fn zeroed(patients: usize) -> Self {
        let bit_len = patients + 2 * GUARD_BITS;
        let mut mask = Self {
            bit_len,
            words: vec![0u64; bit_len.div_ceil(WORD_BITS)],
        };
        for k in [0, 1, bit_len - 2, bit_len - 1] {
            mask.set_index(k);
        }
        mask.debug_check_guards();
        mask
    }

    /// Positions at or beyond `patients` are ignored.
    pub fn from_positions(patients: usize, positions: impl IntoIterator<Item = u32>) -> Self {
        let mut mask = Self::zeroed(patients);
        for pos in positions {
            let pos = pos as usize;
            if pos < patients {
                mask.set_index(pos + GUARD_BITS);
            }
        }
        mask.debug_check_guards();
        mask
    }

    #[inline]
    pub fn patients(&self) -> usize {
        self.bit_len - 2 * GUARD_BITS
    }

    /// Length of the bit string including guards.
    #[inline]
    pub fn bit_len(&self) -> usize {
        self.bit_len
    }

    #[inline]
    pub fn test(&self, position: usize) -> bool {
        position < self.patients() && self.index(position + GUARD_BITS)
    }

    pub fn count(&self) -> usize {
        let total: usize = self.words.iter().map(|w| w.count_ones() as usize).sum();
        total - 2 * GUARD_BITS
    }

    pub fn positions(&self) -> DensePositions<'_> {
        DensePositions {
            words: &self.words,
            word_idx: 0,
            current: self.words[0],
            lo: GUARD_BITS,
            hi: self.bit_len - GUARD_BITS,
        }
    }

    #[inline]
    fn index(&self, k: usize) -> bool {
        (self.words[k / WORD_BITS] >> (k % WORD_BITS)) & 1 == 1
    }

    #[inline]
    fn set_index(&mut self, k: usize) {
        self.words[k / WORD_BITS] |= 1u64 << (k % WORD_BITS);
    }

    #[inline]
    fn set_position(&mut self, position: usize) {
        debug_assert!(position < self.patients());
        self.set_index(position + GUARD_BITS);
    }

    fn or_assign(&mut self, other: &Self) {
        debug_assert_eq!(self.bit_len, other.bit_len);
        for (dst, src) in self.words.iter_mut().zip(&other.words) {
            *dst |= *src;
        }
        self.debug_check_guards();
    }

    fn and_assign(&mut self, other: &Self) {
        debug_assert_eq!(self.bit_len, other.bit_len);
        for (dst, src) in self.words.iter_mut().zip(&other.words) {
            *dst &= *src;
        }
        self.debug_check_guards();
    }

    fn guards_intact(&self) -> bool {
        if self.bit_len < 2 * GUARD_BITS || self.words.len() != self.bit_len.div_ceil(WORD_BITS) {
            return false;
        }
        let guards_set = [0, 1, self.bit_len - 2, self.bit_len - 1]
            .into_iter()
            .all(|k| self.index(k));
        let tail = self.bit_len % WORD_BITS;
        let no_stray_bits = tail == 0 || self.words[self.words.len() - 1] >> tail == 0;
        guards_set && no_stray_bits
    }

    #[inline]
    fn debug_check_guards(&self) {
        debug_assert!(
            self.guards_intact(),
            "dense mask over {} patients lost its guard bits",
            self.patients()
        );
    }
}

/// Iterates the present patient positions of a dense mask in ascending order.
pub struct DensePositions<'a> {
    words: &'a [u64],
    word_idx: usize,
    current: u64,
    lo: usize,
    hi: usize,
}

impl Iterator for DensePositions<'_> {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        loop {
            if self.current != 0 {
                let tz = self.current.trailing_zeros() as usize;
                self.current &= self.current - 1;
                let k = self.word_idx * WORD_BITS + tz;
                if k < self.lo {
                    continue;
                }
                if k >= self.hi {
                    // Only trailing guards remain.
                    self.current = 0;
                    self.word_idx = self.words.len();
                    return None;
                }
                return Some((k - self.lo) as u32);
            }
            self.word_idx += 1;
            if self.word_idx >= self.words.len() {
                return None;
            }
            self.current = self.words[self.word_idx];
        }
    }
}

// ========================================================================================
//                                   Sparse storage
// ========================================================================================

/// An explicit set of present positions over a universe of `patients` (no guard bits).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "SparseWire", into = "SparseWire")]
pub struct SparseMask {
    patients: usize,
    positions: BTreeSet<u32>,
}

#[derive(Serialize, Deserialize)]
struct SparseWire {
    patients: usize,
    positions: Vec<u32>,
}

impl From<SparseMask> for SparseWire {
    fn from(mask: SparseMask) -> Self {
        Self {
            patients: mask.patients,
            positions: mask.positions.into_iter().collect(),
        }
    }
}

impl TryFrom<SparseWire> for SparseMask {
    type Error = MaskError;

    fn try_from(wire: SparseWire) -> Result<Self> {
        if let Some(&bad) = wire.positions.iter().find(|&&p| p as usize >= wire.patients) {
            return Err(MaskError::InvalidBitString(format!(
                "stored sparse mask over {} patients lists position {bad}",
                wire.patients
            )));
        }
        Ok(Self {
            patients: wire.patients,
            positions: wire.positions.into_iter().collect(),
        })
    }
}

impl SparseMask {
    /// Positions at or beyond `patients` are ignored.
    pub fn new(patients: usize, positions: impl IntoIterator<Item = u32>) -> Self {
        Self {
            patients,
            positions: positions
                .into_iter()
                .filter(|&p| (p as usize) < patients)
                .collect(),
        }
    }

    #[inline]
    pub fn patients(&self) -> usize {
        self.patients
    }

    pub fn positions(&self) -> &BTreeSet<u32> {
        &self.positions
    }
}

// ========================================================================================
//                                   The mask itself
// ========================================================================================

/// A presence set over a partition's patient universe, in one of two representations.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PatientMask {
    Sparse(SparseMask),
    Dense(DenseMask),
}

/// Present positions of either representation, ascending.
pub enum MaskPositions<'a> {
    Sparse(btree_set::Iter<'a, u32>),
    Dense(DensePositions<'a>),
}

impl Iterator for MaskPositions<'_> {
    type Item = u32;

    #[inline]
    fn next(&mut self) -> Option<u32> {
        match self {
            MaskPositions::Sparse(iter) => iter.next().copied(),
            MaskPositions::Dense(iter) => iter.next(),
        }
    }
}

#[inline]
fn ensure_same_len(left: usize, right: usize) -> Result<()> {
    if left == right {
        Ok(())
    } else {
        Err(MaskError::LengthMismatch { left, right })
    }
}

impl PatientMask {
    /// Applies the crossover rule to a sparse candidate: more than `threshold` present
    /// positions materializes a dense mask.
    pub fn from_positions(
        patients: usize,
        positions: impl IntoIterator<Item = u32>,
        threshold: usize,
    ) -> Self {
        Self::from_sparse(SparseMask::new(patients, positions), threshold)
    }

    fn from_sparse(sparse: SparseMask, threshold: usize) -> Self {
        if sparse.positions.len() > threshold {
            PatientMask::Dense(DenseMask::from_positions(
                sparse.patients,
                sparse.positions,
            ))
        } else {
            PatientMask::Sparse(sparse)
        }
    }

    pub fn empty_sparse(patients: usize) -> Self {
        PatientMask::Sparse(SparseMask::new(patients, std::iter::empty()))
    }

    /// Size of the patient universe this mask covers.
    #[inline]
    pub fn len(&self) -> usize {
        match self {
            PatientMask::Sparse(s) => s.patients,
            PatientMask::Dense(d) => d.patients(),
        }
    }

    /// True when no patient is present, whatever the representation.
    pub fn is_empty(&self) -> bool {
        self.bit_count() == 0
    }

    #[inline]
    pub fn is_dense(&self) -> bool {
        matches!(self, PatientMask::Dense(_))
    }

    pub fn test_bit(&self, position: usize) -> bool {
        match self {
            PatientMask::Sparse(s) => {
                u32::try_from(position).is_ok_and(|p| s.positions.contains(&p))
            }
            PatientMask::Dense(d) => d.test(position),
        }
    }

    pub fn bit_count(&self) -> usize {
        match self {
            PatientMask::Sparse(s) => s.positions.len(),
            PatientMask::Dense(d) => d.count(),
        }
    }

    pub fn positions(&self) -> MaskPositions<'_> {
        match self {
            PatientMask::Sparse(s) => MaskPositions::Sparse(s.positions.iter()),
            PatientMask::Dense(d) => MaskPositions::Dense(d.positions()),
        }
    }

    pub fn to_dense(&self) -> DenseMask {
        match self {
            PatientMask::Sparse(s) => {
                DenseMask::from_positions(s.patients, s.positions.iter().copied())
            }
            PatientMask::Dense(d) => d.clone(),
        }
    }

    pub fn to_sparse(&self) -> SparseMask {
        match self {
            PatientMask::Sparse(s) => s.clone(),
            PatientMask::Dense(d) => SparseMask::new(d.patients(), d.positions()),
        }
    }

    /// Same universe and same present patients, regardless of representation.
    pub fn same_members(&self, other: &Self) -> bool {
        self.len() == other.len() && self.positions().eq(other.positions())
    }

    /// Union using the default crossover threshold.
    pub fn union(&self, other: &Self) -> Result<Self> {
        self.union_with_threshold(other, DEFAULT_SPARSE_THRESHOLD)
    }

    /// A patient is present in the result if it is present in either operand.
    ///
    /// Sparse ∪ Sparse stays sparse unless the result exceeds `threshold`. Any dense operand
    /// makes the result dense: the sparse side is set into a copy of the dense side, which
    /// is the same as materializing it and OR-ing the word arrays.
    pub fn union_with_threshold(&self, other: &Self, threshold: usize) -> Result<Self> {
        ensure_same_len(self.len(), other.len())?;
        let merged = match (self, other) {
            (PatientMask::Sparse(a), PatientMask::Sparse(b)) => {
                let positions = a.positions.union(&b.positions).copied().collect();
                Self::from_sparse(
                    SparseMask {
                        patients: a.patients,
                        positions,
                    },
                    threshold,
                )
            }
            (PatientMask::Dense(a), PatientMask::Dense(b)) => {
                let mut out = a.clone();
                out.or_assign(b);
                PatientMask::Dense(out)
            }
            (PatientMask::Sparse(s), PatientMask::Dense(d))
            | (PatientMask::Dense(d), PatientMask::Sparse(s)) => {
                let mut out = d.clone();
                for &pos in &s.positions {
                    out.set_position(pos as usize);
                }
                PatientMask::Dense(out)
            }
        };
        Ok(merged)
    }

    /// A patient is present in the result if it is present in both operands.
    ///
    /// Dense ∧ Dense keeps the guards (both operands carry them). A sparse operand keeps
    /// the result sparse, since it can never hold more than the sparse side did.
    pub fn intersection(&self, other: &Self) -> Result<Self> {
        ensure_same_len(self.len(), other.len())?;
        let common = match (self, other) {
            (PatientMask::Sparse(a), PatientMask::Sparse(b)) => PatientMask::Sparse(SparseMask {
                patients: a.patients,
                positions: a.positions.intersection(&b.positions).copied().collect(),
            }),
            (PatientMask::Dense(a), PatientMask::Dense(b)) => {
                let mut out = a.clone();
                out.and_assign(b);
                PatientMask::Dense(out)
            }
            (PatientMask::Sparse(s), PatientMask::Dense(d))
            | (PatientMask::Dense(d), PatientMask::Sparse(s)) => PatientMask::Sparse(SparseMask {
                patients: s.patients,
                positions: s
                    .positions
                    .iter()
                    .copied()
                    .filter(|&p| d.test(p as usize))
                    .collect(),
            }),
        };
        Ok(common)
    }

    /// Concatenates masks over two successive, disjoint patient ranges: the data bits of `a`
    /// followed by the data bits of `b`, wrapped in a single pair of guards.
    ///
    /// An absent operand counts as an all-zero mask of its stated length. Two sparse (or
    /// absent) operands stay sparse with `b` shifted by `len_a`; a dense operand makes the
    /// result dense over `len_a + len_b`.
    pub fn append(a: Option<&Self>, len_a: usize, b: Option<&Self>, len_b: usize) -> Result<Self> {
        for (mask, stated) in [(a, len_a), (b, len_b)] {
            if let Some(mask) = mask {
                ensure_same_len(mask.len(), stated)?;
            }
        }
        let offset = u32::try_from(len_a).map_err(|_| MaskError::LengthMismatch {
            left: len_a,
            right: u32::MAX as usize,
        })?;

        let any_dense = a.is_some_and(Self::is_dense) || b.is_some_and(Self::is_dense);
        if !any_dense {
            let mut positions: BTreeSet<u32> =
                a.map(|m| m.positions().collect()).unwrap_or_default();
            if let Some(b) = b {
                positions.extend(b.positions().map(|p| p + offset));
            }
            return Ok(PatientMask::Sparse(SparseMask {
                patients: len_a + len_b,
                positions,
            }));
        }

        let empty_a;
        let a = match a {
            Some(mask) => mask,
            None => {
                empty_a = empty_mask(len_a);
                &*empty_a
            }
        };
        let empty_b;
        let b = match b {
            Some(mask) => mask,
            None => {
                empty_b = empty_mask(len_b);
                &*empty_b
            }
        };

        let mut out = DenseMask::zeroed(len_a + len_b);
        for pos in a.positions() {
            out.set_position(pos as usize);
        }
        for pos in b.positions() {
            out.set_position((pos + offset) as usize);
        }
        out.debug_check_guards();
        Ok(PatientMask::Dense(out))
    }

    /// Maps present positions back through the universe the mask was built over.
    pub fn to_patient_id_set(&self, universe: &PatientUniverse) -> Result<BTreeSet<PatientId>> {
        ensure_same_len(self.len(), universe.len())?;
        Ok(self
            .positions()
            .filter_map(|pos| universe.id_at(pos as usize))
            .collect())
    }
}

impl fmt::Display for PatientMask {
    /// Renders the guard-wrapped bit string, whatever the representation.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dense;
        let d = match self {
            PatientMask::Dense(d) => d,
            PatientMask::Sparse(_) => {
                dense = self.to_dense();
                &dense
            }
        };
        let text: String = (0..d.bit_len)
            .map(|k| if d.index(k) { '1' } else { '0' })
            .collect();
        f.write_str(&text)
    }
}

impl FromStr for PatientMask {
    type Err = MaskError;

    /// Parses a guard-wrapped bit string such as `"11011011"` into a dense mask.
    fn from_str(s: &str) -> Result<Self> {
        let bytes = s.trim().as_bytes();
        let well_formed = bytes.len() >= 2 * GUARD_BITS
            && bytes.iter().all(|b| *b == b'0' || *b == b'1')
            && bytes[..GUARD_BITS] == *b"11"
            && bytes[bytes.len() - GUARD_BITS..] == *b"11";
        if !well_formed {
            return Err(MaskError::InvalidBitString(s.to_string()));
        }
        let patients = bytes.len() - 2 * GUARD_BITS;
        let positions = bytes[GUARD_BITS..GUARD_BITS + patients]
            .iter()
            .enumerate()
            .filter(|(_, b)| **b == b'1')
            .map(|(pos, _)| pos as u32);
        Ok(PatientMask::Dense(DenseMask::from_positions(patients, positions)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dense(bits: &str) -> PatientMask {
        bits.parse().unwrap()
    }

    fn sparse(patients: usize, positions: &[u32]) -> PatientMask {
        PatientMask::Sparse(SparseMask::new(patients, positions.iter().copied()))
    }

    #[test]
    fn bit_string_round_trips_through_display() {
        let mask = dense("11011011");
        assert_eq!(mask.len(), 4);
        assert_eq!(mask.positions().collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(mask.to_string(), "11011011");
        assert_eq!(sparse(4, &[1, 2]).to_string(), "11011011");
    }

    #[test]
    fn malformed_bit_strings_are_rejected() {
        for bad in ["", "111", "01011011", "11011010", "11012011"] {
            assert!(bad.parse::<PatientMask>().is_err(), "accepted {bad:?}");
        }
        assert_eq!("1111".parse::<PatientMask>().unwrap().len(), 0);
    }

    #[test]
    fn crossover_threshold_picks_representation() {
        let few = PatientMask::from_positions(100, [1, 2, 3, 4, 5], DEFAULT_SPARSE_THRESHOLD);
        assert!(!few.is_dense());
        let many = PatientMask::from_positions(100, [1, 2, 3, 4, 5, 6], DEFAULT_SPARSE_THRESHOLD);
        assert!(many.is_dense());
        assert!(few.same_members(&PatientMask::from_positions(100, [1, 2, 3, 4, 5], 0)));
    }

    #[test]
    fn dense_masks_span_word_boundaries() {
        let positions = [0u32, 59, 60, 61, 62, 63, 64, 127, 129];
        let dense = DenseMask::from_positions(130, positions);
        assert_eq!(dense.bit_len(), 134);
        assert_eq!(dense.patients(), 130);
        let mask = PatientMask::Dense(dense);
        assert_eq!(mask.bit_count(), positions.len());
        assert_eq!(mask.positions().collect::<Vec<_>>(), positions.to_vec());
        assert!(mask.test_bit(129));
        assert!(!mask.test_bit(128));
        assert!(!mask.test_bit(130));
        assert!(!mask.test_bit(10_000));
    }

    #[test]
    fn dense_union_is_bitwise_or() {
        let merged = dense("110110000011")
            .union(&dense("110001100011"))
            .unwrap()
            .union(&dense("110000000111"))
            .unwrap();
        assert_eq!(merged.to_string(), "110111100111");
    }

    #[test]
    fn sparse_union_promotes_past_threshold() {
        let a = sparse(20, &[0, 1, 2]);
        let b = sparse(20, &[2, 3, 4]);
        let small = a.union(&b).unwrap();
        assert!(!small.is_dense());
        assert_eq!(small.bit_count(), 5);

        let c = sparse(20, &[10]);
        let big = small.union(&c).unwrap();
        assert!(big.is_dense());
        assert_eq!(big.positions().collect::<Vec<_>>(), vec![0, 1, 2, 3, 4, 10]);
    }

    #[test]
    fn mixed_union_is_dense_and_commutative() {
        let s = sparse(4, &[0]);
        let d = dense("11011011");
        let left = s.union(&d).unwrap();
        let right = d.union(&s).unwrap();
        assert!(left.is_dense());
        assert_eq!(left, right);
        assert_eq!(left.to_string(), "11111011");
    }

    #[test]
    fn union_rejects_different_universes() {
        let err = dense("11011011").union(&dense("1101101111")).unwrap_err();
        assert!(matches!(err, MaskError::LengthMismatch { left: 4, right: 6 }));
    }

    #[test]
    fn intersection_keeps_guards_and_prefers_sparse() {
        let both = dense("11011011").intersection(&dense("11010011")).unwrap();
        assert_eq!(both.to_string(), "11010011");

        let s = sparse(4, &[0, 1, 3]);
        let filtered = s.intersection(&dense("11011011")).unwrap();
        assert!(!filtered.is_dense());
        assert_eq!(filtered.positions().collect::<Vec<_>>(), vec![1]);

        let disjoint = sparse(4, &[0]).intersection(&sparse(4, &[3])).unwrap();
        assert!(disjoint.is_empty());
    }

    #[test]
    fn append_concatenates_data_bits() {
        let ab = PatientMask::append(
            Some(&dense("11011011")),
            4,
            Some(&dense("110001100011")),
            8,
        )
        .unwrap();
        let abc = PatientMask::append(Some(&ab), 12, Some(&dense("11000111")), 4).unwrap();
        assert_eq!(abc.to_string(), "11011000011000000111");
    }

    #[test]
    fn sparse_append_shifts_second_operand() {
        let merged =
            PatientMask::append(Some(&sparse(3, &[0, 2])), 3, Some(&sparse(2, &[1])), 2).unwrap();
        assert!(!merged.is_dense());
        assert_eq!(merged.len(), 5);
        assert_eq!(merged.positions().collect::<Vec<_>>(), vec![0, 2, 4]);
    }

    #[test]
    fn append_substitutes_empty_for_absent_operands() {
        let right_only = PatientMask::append(None, 3, Some(&dense("111011")), 2).unwrap();
        assert_eq!(right_only.to_string(), "110001011");

        let left_only = PatientMask::append(Some(&sparse(2, &[0])), 2, None, 3).unwrap();
        assert!(!left_only.is_dense());
        assert_eq!(left_only.to_string(), "111000011");

        let neither = PatientMask::append(None, 2, None, 2).unwrap();
        assert!(neither.is_empty());
        assert_eq!(neither.len(), 4);
    }

    #[test]
    fn append_checks_stated_lengths() {
        let err = PatientMask::append(Some(&dense("11011011")), 5, None, 1).unwrap_err();
        assert!(matches!(err, MaskError::LengthMismatch { left: 4, right: 5 }));
    }

    #[test]
    fn patient_ids_follow_universe_order() {
        let universe = PatientUniverse::from_ids([197506, 197508, 197509]);
        let mask = dense("1110111");
        let ids = mask.to_patient_id_set(&universe).unwrap();
        assert_eq!(ids.into_iter().collect::<Vec<_>>(), vec![197506, 197509]);

        let short = PatientUniverse::from_ids([1]);
        assert!(mask.to_patient_id_set(&short).is_err());
    }

    #[test]
    fn wire_format_preserves_representation() {
        let d = dense("110110000011");
        let text = serde_json::to_string(&d).unwrap();
        assert!(text.contains("Dense"));
        let back: PatientMask = serde_json::from_str(&text).unwrap();
        assert_eq!(back, d);

        let s = sparse(9, &[3, 8]);
        let text = serde_json::to_string(&s).unwrap();
        assert!(text.contains("Sparse") && text.contains("[3,8]"));
        let back: PatientMask = serde_json::from_str(&text).unwrap();
        assert_eq!(back, s);
    }

    #[test]
    fn wire_format_rejects_broken_guards() {
        let broken = r#"{"Dense":{"patients":4,"words":[0]}}"#;
        assert!(serde_json::from_str::<PatientMask>(broken).is_err());
        let out_of_range = r#"{"Sparse":{"patients":2,"positions":[5]}}"#;
        assert!(serde_json::from_str::<PatientMask>(out_of_range).is_err());
    }

    #[test]
    fn wire_format_rejects_overflowing_lengths() {
        for patients in [usize::MAX, usize::MAX - 3] {
            let text = format!(r#"{{"Dense":{{"patients":{patients},"words":[15]}}}}"#);
            let err = serde_json::from_str::<PatientMask>(&text).unwrap_err();
            assert!(err.to_string().contains("patients"), "{err}");
        }
    }
}
