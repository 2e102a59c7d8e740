// ========================================================================================
//                             High-Level Data Contracts
// ========================================================================================

// This file is ONLY for types that are SHARED BETWEEN FILES, not types that only are used in one file.

use crate::error::{MaskError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The integer form of a patient identifier as handed back to the query engine.
pub type PatientId = i32;

/// Number of bucket slots reserved for each contig.
pub const BUCKET_CONTIG_STRIDE: u32 = 1_000_000;
/// Width of one spatial bucket in base pairs.
pub const BUCKET_WIDTH_BP: u32 = 1_000;

/// Maps a contig label to its ordinal: `1..=22` as-is, `X` = 23, `Y` = 24, `MT`/`M` = 25.
/// A leading `chr` is ignored. Returns `None` for labels outside that vocabulary.
pub fn contig_ordinal(label: &str) -> Option<u8> {
    let mut trimmed = label.trim();

    if trimmed.get(..3).is_some_and(|p| p.eq_ignore_ascii_case("chr")) {
        trimmed = &trimmed[3..];
    }

    if trimmed.eq_ignore_ascii_case("X") {
        return Some(23);
    }
    if trimmed.eq_ignore_ascii_case("Y") {
        return Some(24);
    }
    if trimmed.eq_ignore_ascii_case("MT") || trimmed.eq_ignore_ascii_case("M") {
        return Some(25);
    }

    match trimmed.parse::<u8>() {
        Ok(n) if (1..=25).contains(&n) => Some(n),
        _ => None,
    }
}

/// A coarse genomic interval: `contigOrdinal * 1_000_000 + floor(position / 1000)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct BucketId(pub u32);

impl BucketId {
    #[inline]
    pub fn for_locus(contig_ordinal: u8, position: u32) -> Self {
        Self(u32::from(contig_ordinal) * BUCKET_CONTIG_STRIDE + position / BUCKET_WIDTH_BP)
    }
}

impl fmt::Display for BucketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The identity of one variant: where it is, what it changes, and what it does.
///
/// Its canonical text form `contig,position,ref,alt,gene,consequence` is also the key under
/// which the variant's masks are stored.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VariantSpec {
    pub contig: String,
    pub position: u32,
    pub ref_allele: String,
    pub alt_allele: String,
    pub gene: String,
    pub consequence: String,
}

impl VariantSpec {
    pub fn new(
        contig: impl Into<String>,
        position: u32,
        ref_allele: impl Into<String>,
        alt_allele: impl Into<String>,
        gene: impl Into<String>,
        consequence: impl Into<String>,
    ) -> Self {
        Self {
            contig: contig.into(),
            position,
            ref_allele: ref_allele.into(),
            alt_allele: alt_allele.into(),
            gene: gene.into(),
            consequence: consequence.into(),
        }
    }

    /// The spatial bucket this variant falls in, or `None` when the contig has no ordinal.
    pub fn bucket(&self) -> Option<BucketId> {
        contig_ordinal(&self.contig).map(|ordinal| BucketId::for_locus(ordinal, self.position))
    }

    /// The store key for this variant's mask record.
    pub fn key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for VariantSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{},{},{},{},{}",
            self.contig,
            self.position,
            self.ref_allele,
            self.alt_allele,
            self.gene,
            self.consequence
        )
    }
}

impl FromStr for VariantSpec {
    type Err = MaskError;

    /// Accepts the six-field canonical form, or the four-field `contig,position,ref,alt`
    /// form with empty gene and consequence.
    fn from_str(s: &str) -> Result<Self> {
        let fields: Vec<&str> = s.trim().split(',').collect();
        if fields.len() != 6 && fields.len() != 4 {
            return Err(MaskError::InvalidVariantSpec(
                s.to_string(),
                format!("expected 4 or 6 comma-separated fields, found {}", fields.len()),
            ));
        }
        if fields[0].is_empty() {
            return Err(MaskError::InvalidVariantSpec(
                s.to_string(),
                "contig is empty".into(),
            ));
        }
        let position = fields[1].parse::<u32>().map_err(|e| {
            MaskError::InvalidVariantSpec(s.to_string(), format!("bad position: {e}"))
        })?;
        let (gene, consequence) = if fields.len() == 6 {
            (fields[4], fields[5])
        } else {
            ("", "")
        };
        Ok(Self::new(
            fields[0], position, fields[2], fields[3], gene, consequence,
        ))
    }
}

/// The ordered, immutable list of patients one partition covers.
///
/// A patient's 0-based position in this list is the only identity masks know about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatientUniverse {
    labels: Vec<String>,
    ids: Vec<PatientId>,
}

impl PatientUniverse {
    /// Builds a universe from the textual ids a partition reports. Every id must parse as an
    /// integer; an unparseable id is a configuration error.
    pub fn new(labels: Vec<String>) -> Result<Self> {
        let ids = labels
            .iter()
            .map(|label| {
                label
                    .trim()
                    .parse::<PatientId>()
                    .map_err(|_| MaskError::InvalidPatientId(label.clone()))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { labels, ids })
    }

    pub fn from_ids(ids: impl IntoIterator<Item = PatientId>) -> Self {
        let ids: Vec<PatientId> = ids.into_iter().collect();
        let labels = ids.iter().map(|id| id.to_string()).collect();
        Self { labels, ids }
    }

    /// Concatenates universes in order, as patient-sharded partitions do.
    pub fn concat<'a>(parts: impl IntoIterator<Item = &'a PatientUniverse>) -> Self {
        let mut labels = Vec::new();
        let mut ids = Vec::new();
        for part in parts {
            labels.extend(part.labels.iter().cloned());
            ids.extend_from_slice(&part.ids);
        }
        Self { labels, ids }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn ids(&self) -> &[PatientId] {
        &self.ids
    }

    #[inline]
    pub fn id_at(&self, position: usize) -> Option<PatientId> {
        self.ids.get(position).copied()
    }
}
