// ========================================================================================
//
//                         PER-PATIENT COARSE GENOMIC BUCKET INDEX
//
// ========================================================================================
//
// For each patient, the set of 1 kb buckets in which the patient has any heterozygous or
// homozygous call. Before touching masks, a query can drop every candidate variant whose
// bucket is not shared by all requested patients. The index over-approximates: a bucket is
// never missing where the patient carries a variant, so pruning has no false negatives.

use crate::config::MaskConfig;
use crate::error::{MaskError, Result};
use crate::patient_mask::PatientMask;
use crate::store::{BucketSetStore, MaskStore};
use crate::types::{BucketId, PatientId, PatientUniverse, VariantSpec};
use ahash::AHashMap;
use dashmap::DashMap;
use log::{debug, info, warn};
use rayon::prelude::*;
use std::collections::BTreeSet;
use std::sync::Arc;

pub struct BucketSpatialIndex {
    store: BucketSetStore,
    cache: DashMap<PatientId, Arc<BTreeSet<BucketId>>>,
    cache_capacity: usize,
}

/// Bucket of a variant given in text form, or `None` when it cannot be placed.
fn variant_bucket(variant: &str) -> Option<BucketId> {
    variant.parse::<VariantSpec>().ok()?.bucket()
}

impl BucketSpatialIndex {
    /// Wraps an already-built bucket store.
    pub fn new(store: BucketSetStore, cache_capacity: usize) -> Self {
        Self {
            store,
            cache: DashMap::new(),
            cache_capacity,
        }
    }

    /// Builds the index from every variant in `masks` and persists one bucket set per
    /// patient of `universe` into `out`, which is then completed.
    pub fn build(
        masks: &MaskStore,
        universe: &PatientUniverse,
        out: BucketSetStore,
        config: &MaskConfig,
    ) -> Result<Self> {
        let specs = masks.variant_specs()?;
        let total_variants = specs.len();

        let mut groups: AHashMap<BucketId, Vec<VariantSpec>> = AHashMap::new();
        let mut skipped = 0usize;
        for spec in specs {
            match spec.bucket() {
                Some(bucket) => groups.entry(bucket).or_default().push(spec),
                None => {
                    debug!("No bucket for contig '{}' of {spec}", spec.contig);
                    skipped += 1;
                }
            }
        }
        if skipped > 0 {
            warn!(
                "Skipped {skipped} of {total_variants} variants with unrecognized contigs while building the bucket index"
            );
        }

        let threshold = config.sparse_threshold;
        let groups: Vec<(BucketId, Vec<VariantSpec>)> = groups.into_iter().collect();
        let bucket_masks: Vec<(BucketId, Option<PatientMask>)> = groups
            .into_par_iter()
            .map(|(bucket, specs)| -> Result<(BucketId, Option<PatientMask>)> {
                let mut called: Option<PatientMask> = None;
                for spec in &specs {
                    let Some(family) = masks.get_masks(spec)? else {
                        continue;
                    };
                    let Some(mask) = family.called(threshold)? else {
                        continue;
                    };
                    called = Some(match called {
                        Some(acc) => acc.union_with_threshold(&mask, threshold)?,
                        None => mask,
                    });
                }
                Ok((bucket, called))
            })
            .collect::<Result<_>>()?;

        let mut per_patient: Vec<BTreeSet<BucketId>> = vec![BTreeSet::new(); universe.len()];
        for (bucket, mask) in &bucket_masks {
            let Some(mask) = mask else { continue };
            if mask.len() != universe.len() {
                return Err(MaskError::LengthMismatch {
                    left: mask.len(),
                    right: universe.len(),
                });
            }
            for pos in mask.positions() {
                per_patient[pos as usize].insert(*bucket);
            }
        }

        for (pos, buckets) in per_patient.iter().enumerate() {
            if let Some(patient) = universe.id_at(pos) {
                out.put_bucket_set(patient, buckets)?;
            }
        }
        out.complete()?;
        info!(
            "Built bucket index: {} buckets over {} patients",
            bucket_masks.len(),
            universe.len()
        );

        Ok(Self::new(out, config.bucket_cache_capacity))
    }

    /// The buckets a patient has calls in. An unknown patient has none.
    pub fn bucket_set(&self, patient: PatientId) -> Result<Arc<BTreeSet<BucketId>>> {
        if let Some(cached) = self.cache.get(&patient) {
            return Ok(Arc::clone(cached.value()));
        }
        let buckets = Arc::new(self.store.get_bucket_set(patient)?.unwrap_or_default());
        if self.cache.len() < self.cache_capacity {
            self.cache.insert(patient, Arc::clone(&buckets));
        }
        Ok(buckets)
    }

    /// Keeps the variants whose bucket every patient in `patients` has calls in.
    ///
    /// Variants that cannot be placed in a bucket are kept. An empty patient or variant
    /// list yields the empty set.
    pub fn filter_variant_set_for_patient_set(
        &self,
        variants: &[String],
        patients: &[PatientId],
    ) -> Result<BTreeSet<String>> {
        if variants.is_empty() || patients.is_empty() {
            return Ok(BTreeSet::new());
        }

        let mut shared: Option<BTreeSet<BucketId>> = None;
        for &patient in patients {
            let buckets = self.bucket_set(patient)?;
            let next = match shared {
                None => (*buckets).clone(),
                Some(acc) => acc.intersection(&buckets).copied().collect(),
            };
            if next.is_empty() {
                shared = Some(next);
                break;
            }
            shared = Some(next);
        }
        let shared = shared.unwrap_or_default();

        let kept: BTreeSet<String> = variants
            .iter()
            .filter(|variant| match variant_bucket(variant) {
                Some(bucket) => shared.contains(&bucket),
                None => true,
            })
            .cloned()
            .collect();
        debug!(
            "Bucket pruning kept {} of {} variants for {} patients",
            kept.len(),
            variants.len(),
            patients.len()
        );
        Ok(kept)
    }

    pub fn cached_patients(&self) -> usize {
        self.cache.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::GenotypeMaskCodec;

    fn build_index() -> BucketSpatialIndex {
        let _ = env_logger::builder().is_test(true).try_init();
        let codec = GenotypeMaskCodec::new(5);
        let masks = MaskStore::in_memory();
        let rows: [(&str, [Option<&str>; 3]); 4] = [
            ("1,1500,A,G,G1,missense", [Some("0/1"), Some("0/0"), Some("1/1")]),
            ("1,1999,C,T,G1,missense", [Some("0/0"), Some("0/1"), Some("0/0")]),
            ("2,5000,G,A,G2,synonymous", [Some("./1"), Some("0/1"), Some("0/0")]),
            ("GL000220.1,10,T,C,,", [Some("1/1"), Some("1/1"), Some("1/1")]),
        ];
        for (spec, row) in rows {
            masks
                .put_masks(&spec.parse().unwrap(), &codec.encode_row(&row))
                .unwrap();
        }
        let universe = PatientUniverse::from_ids([10, 11, 12]);
        BucketSpatialIndex::build(
            &masks,
            &universe,
            BucketSetStore::in_memory(),
            &MaskConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn build_excludes_no_calls_and_unknown_contigs() {
        let index = build_index();
        let p10: Vec<_> = index.bucket_set(10).unwrap().iter().copied().collect();
        assert_eq!(p10, vec![BucketId(1_000_001)]);
        let p11: Vec<_> = index.bucket_set(11).unwrap().iter().copied().collect();
        assert_eq!(p11, vec![BucketId(1_000_001), BucketId(2_000_005)]);
        assert!(index.bucket_set(99).unwrap().is_empty());
    }

    #[test]
    fn filter_keeps_only_shared_buckets() {
        let index = build_index();
        let variants = vec![
            "1,1234,A,T".to_string(),
            "2,5999,G,C".to_string(),
            "3,1,A,C".to_string(),
            "not a variant".to_string(),
        ];
        let kept = index
            .filter_variant_set_for_patient_set(&variants, &[10, 11])
            .unwrap();
        assert!(kept.contains("1,1234,A,T"));
        assert!(!kept.contains("2,5999,G,C"));
        assert!(!kept.contains("3,1,A,C"));
        assert!(kept.contains("not a variant"));
    }

    #[test]
    fn non_ascii_contigs_are_kept_unpruned() {
        let index = build_index();
        let variants = vec![
            "a€,100,A,C".to_string(),
            "€,100,A,C".to_string(),
            "chr€,100,A,C".to_string(),
            "2,5999,G,C".to_string(),
        ];
        let kept = index
            .filter_variant_set_for_patient_set(&variants, &[10, 11])
            .unwrap();
        assert_eq!(
            kept.into_iter().collect::<Vec<_>>(),
            vec!["a€,100,A,C", "chr€,100,A,C", "€,100,A,C"]
        );
    }

    #[test]
    fn empty_inputs_yield_empty_result() {
        let index = build_index();
        let variants = vec!["1,1234,A,T".to_string()];
        assert!(index.filter_variant_set_for_patient_set(&variants, &[]).unwrap().is_empty());
        assert!(index.filter_variant_set_for_patient_set(&[], &[10]).unwrap().is_empty());
    }

    #[test]
    fn patient_without_calls_collapses_the_intersection() {
        let index = build_index();
        let variants = vec!["1,1234,A,T".to_string(), "2,5000,G,A".to_string()];
        let kept = index
            .filter_variant_set_for_patient_set(&variants, &[11, 404])
            .unwrap();
        assert!(kept.is_empty());
        assert!(index.cached_patients() >= 2);
    }
}
