// ========================================================================================
//
//                     GENOTYPE COLUMN -> FOUR PATIENT MASKS
//
// ========================================================================================
//
// One VCF row carries a genotype token per patient. The codec classifies every token in
// constant time and keeps, for each stored genotype class, the positions of the patients
// that carry it. A class nobody carries is left unset rather than stored as an all-zero
// mask; readers treat the two identically.
//
// ### The classifier ###
//
// A genotype is exactly three significant characters: allele, separator, allele. Summing
// their ASCII codes modulo 7 separates the six classes without any string comparison:
//
//   residue 1  ./0 0/.   heterozygous no-call, ref side   (not stored)
//   residue 2  ./1 1/.   heterozygous no-call             -> heterozygous_no_call
//   residue 3  0/0       homozygous ref                   (not stored)
//   residue 4  0/1 1/0   heterozygous                     -> heterozygous
//   residue 5  1/1       homozygous                       -> homozygous
//   residue 6  ./.       homozygous no-call               -> homozygous_no_call
//
// `/` and `|` differ by 77 = 11 * 7, so phasing never moves a token to another residue.

use crate::config::MaskConfig;
use crate::error::Result;
use crate::patient_mask::PatientMask;
use log::debug;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// The six mutually exclusive outcomes of classifying one genotype token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GenotypeClass {
    Heterozygous,
    Homozygous,
    HeterozygousNoCallRef,
    HeterozygousNoCallVariant,
    HomozygousRef,
    HomozygousNoCall,
}

const CLASS_BY_RESIDUE: [Option<GenotypeClass>; 7] = [
    None,
    Some(GenotypeClass::HeterozygousNoCallRef),
    Some(GenotypeClass::HeterozygousNoCallVariant),
    Some(GenotypeClass::HomozygousRef),
    Some(GenotypeClass::Heterozygous),
    Some(GenotypeClass::Homozygous),
    Some(GenotypeClass::HomozygousNoCall),
];

#[inline]
fn is_allele(byte: u8) -> bool {
    matches!(byte, b'0' | b'1' | b'.')
}

impl GenotypeClass {
    /// Classifies a genotype token. Anything after the first `:` (other FORMAT fields) is
    /// ignored. Tokens that are not allele-separator-allele return `None`.
    #[inline]
    pub fn classify(token: &str) -> Option<Self> {
        let genotype = token.split(':').next().unwrap_or(token).trim();
        let bytes = genotype.as_bytes();
        if bytes.len() != 3
            || !is_allele(bytes[0])
            || !matches!(bytes[1], b'/' | b'|')
            || !is_allele(bytes[2])
        {
            return None;
        }
        let sum: u32 = bytes.iter().map(|&b| u32::from(b)).sum();
        CLASS_BY_RESIDUE[(sum % 7) as usize]
    }

    /// The stored mask this class contributes to, if any.
    #[inline]
    pub fn mask_class(self) -> Option<MaskClass> {
        match self {
            GenotypeClass::Heterozygous => Some(MaskClass::Heterozygous),
            GenotypeClass::Homozygous => Some(MaskClass::Homozygous),
            GenotypeClass::HeterozygousNoCallVariant => Some(MaskClass::HeterozygousNoCall),
            GenotypeClass::HomozygousNoCall => Some(MaskClass::HomozygousNoCall),
            GenotypeClass::HeterozygousNoCallRef | GenotypeClass::HomozygousRef => None,
        }
    }
}

/// The four genotype classes that are persisted per variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MaskClass {
    Heterozygous,
    Homozygous,
    HeterozygousNoCall,
    HomozygousNoCall,
}

impl MaskClass {
    pub const ALL: [MaskClass; 4] = [
        MaskClass::Heterozygous,
        MaskClass::Homozygous,
        MaskClass::HeterozygousNoCall,
        MaskClass::HomozygousNoCall,
    ];

    #[inline]
    fn slot(self) -> usize {
        self as usize
    }
}

/// The mask family of one variant: one optional mask per stored genotype class.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantMasks {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heterozygous: Option<PatientMask>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub homozygous: Option<PatientMask>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heterozygous_no_call: Option<PatientMask>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub homozygous_no_call: Option<PatientMask>,
}

impl VariantMasks {
    pub fn get(&self, class: MaskClass) -> Option<&PatientMask> {
        match class {
            MaskClass::Heterozygous => self.heterozygous.as_ref(),
            MaskClass::Homozygous => self.homozygous.as_ref(),
            MaskClass::HeterozygousNoCall => self.heterozygous_no_call.as_ref(),
            MaskClass::HomozygousNoCall => self.homozygous_no_call.as_ref(),
        }
    }

    /// Consumes the family, keeping only the mask for `class`.
    pub fn into_class(self, class: MaskClass) -> Option<PatientMask> {
        match class {
            MaskClass::Heterozygous => self.heterozygous,
            MaskClass::Homozygous => self.homozygous,
            MaskClass::HeterozygousNoCall => self.heterozygous_no_call,
            MaskClass::HomozygousNoCall => self.homozygous_no_call,
        }
    }

    fn slot_mut(&mut self, class: MaskClass) -> &mut Option<PatientMask> {
        match class {
            MaskClass::Heterozygous => &mut self.heterozygous,
            MaskClass::Homozygous => &mut self.homozygous,
            MaskClass::HeterozygousNoCall => &mut self.heterozygous_no_call,
            MaskClass::HomozygousNoCall => &mut self.homozygous_no_call,
        }
    }

    /// True when no class has a mask.
    pub fn is_empty(&self) -> bool {
        MaskClass::ALL.iter().all(|&class| self.get(class).is_none())
    }

    /// Patients with any called alternate allele: heterozygous ∪ homozygous.
    pub fn called(&self, threshold: usize) -> Result<Option<PatientMask>> {
        match (&self.heterozygous, &self.homozygous) {
            (Some(het), Some(hom)) => het.union_with_threshold(hom, threshold).map(Some),
            (Some(only), None) | (None, Some(only)) => Ok(Some(only.clone())),
            (None, None) => Ok(None),
        }
    }

    /// Class-by-class union of two families over the same universe.
    pub fn union(&self, other: &Self, threshold: usize) -> Result<Self> {
        let mut merged = Self::default();
        for class in MaskClass::ALL {
            *merged.slot_mut(class) = match (self.get(class), other.get(class)) {
                (Some(a), Some(b)) => Some(a.union_with_threshold(b, threshold)?),
                (Some(only), None) | (None, Some(only)) => Some(only.clone()),
                (None, None) => None,
            };
        }
        Ok(merged)
    }

    /// Class-by-class append of two load batches covering successive patient ranges.
    /// A class absent from both batches stays unset.
    pub fn append(a: Option<&Self>, len_a: usize, b: Option<&Self>, len_b: usize) -> Result<Self> {
        let mut merged = Self::default();
        for class in MaskClass::ALL {
            let left = a.and_then(|m| m.get(class));
            let right = b.and_then(|m| m.get(class));
            if left.is_none() && right.is_none() {
                continue;
            }
            *merged.slot_mut(class) = Some(PatientMask::append(left, len_a, right, len_b)?);
        }
        Ok(merged)
    }
}

/// Running totals shared by every encoder built from one codec.
#[derive(Debug, Default)]
pub struct CodecMetrics {
    rows_encoded: AtomicU64,
    tokens_seen: AtomicU64,
    absent_tokens: AtomicU64,
    unrecognized_tokens: AtomicU64,
}

/// A point-in-time copy of [`CodecMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CodecCounts {
    pub rows_encoded: u64,
    pub tokens_seen: u64,
    pub absent_tokens: u64,
    pub unrecognized_tokens: u64,
}

impl CodecMetrics {
    pub fn snapshot(&self) -> CodecCounts {
        CodecCounts {
            rows_encoded: self.rows_encoded.load(Ordering::Relaxed),
            tokens_seen: self.tokens_seen.load(Ordering::Relaxed),
            absent_tokens: self.absent_tokens.load(Ordering::Relaxed),
            unrecognized_tokens: self.unrecognized_tokens.load(Ordering::Relaxed),
        }
    }

    fn record_row(&self, tokens: usize, absent: u64, unrecognized: u64) {
        self.rows_encoded.fetch_add(1, Ordering::Relaxed);
        self.tokens_seen.fetch_add(tokens as u64, Ordering::Relaxed);
        if absent > 0 {
            self.absent_tokens.fetch_add(absent, Ordering::Relaxed);
        }
        if unrecognized > 0 {
            self.unrecognized_tokens
                .fetch_add(unrecognized, Ordering::Relaxed);
        }
    }
}

/// Turns genotype columns into [`VariantMasks`].
#[derive(Debug)]
pub struct GenotypeMaskCodec {
    sparse_threshold: usize,
    metrics: CodecMetrics,
}

impl GenotypeMaskCodec {
    pub fn new(sparse_threshold: usize) -> Self {
        Self {
            sparse_threshold,
            metrics: CodecMetrics::default(),
        }
    }

    pub fn from_config(config: &MaskConfig) -> Self {
        Self::new(config.sparse_threshold)
    }

    pub fn metrics(&self) -> &CodecMetrics {
        &self.metrics
    }

    /// Encodes one variant's genotype column, one token per patient in universe order.
    pub fn encode_row(&self, tokens: &[Option<&str>]) -> VariantMasks {
        let mut carriers: [Vec<u32>; 4] = Default::default();
        let mut absent = 0u64;
        let mut unrecognized = 0u64;

        for (pos, token) in tokens.iter().enumerate() {
            let Some(token) = token else {
                absent += 1;
                continue;
            };
            match GenotypeClass::classify(token) {
                Some(class) => {
                    if let Some(mask_class) = class.mask_class() {
                        carriers[mask_class.slot()].push(pos as u32);
                    }
                }
                None => unrecognized += 1,
            }
        }

        if unrecognized > 0 {
            debug!("{unrecognized} of {} genotype tokens were not recognized", tokens.len());
        }
        self.metrics.record_row(tokens.len(), absent, unrecognized);

        let mut masks = VariantMasks::default();
        for class in MaskClass::ALL {
            let positions = std::mem::take(&mut carriers[class.slot()]);
            if !positions.is_empty() {
                *masks.slot_mut(class) = Some(PatientMask::from_positions(
                    tokens.len(),
                    positions,
                    self.sparse_threshold,
                ));
            }
        }
        masks
    }

    /// Encodes many rows in parallel; output order matches input order.
    pub fn encode_batch(&self, rows: &[Vec<Option<&str>>]) -> Vec<VariantMasks> {
        rows.par_iter().map(|row| self.encode_row(row)).collect()
    }
}
