// ========================================================================================
//
//                           RECONCILING MASKS ACROSS PARTITIONS
//
// ========================================================================================
//
// A dataset is split either by variant range (every partition holds the full cohort) or
// by patient range (every partition holds the full catalog for a slice of the cohort).
// Each split has its own merge: masks from variant shards are unioned, masks from patient
// shards are concatenated in shard order.
//
// Both merges query every shard concurrently and wait for all of them. The first shard
// failure fails the query; the remaining shard futures are dropped with the merge future,
// and nothing received so far is combined.

use crate::codec::MaskClass;
use crate::config::MaskConfig;
use crate::error::{MaskError, Result};
use crate::patient_mask::PatientMask;
use crate::runtime::get_shared_runtime;
use crate::store::MaskStore;
use crate::types::{PatientId, PatientUniverse, VariantSpec};
use futures::future::{BoxFuture, FutureExt, TryFutureExt, try_join_all};
use itertools::Itertools;
use log::{debug, warn};
use std::collections::BTreeSet;
use std::sync::Arc;

/// One child partition of a merge.
///
/// `patient_mask` returns `None` when nothing in the partition matches the query at all,
/// which merges treat exactly like an all-zero mask.
pub trait Shard<Q>: Send + Sync {
    /// The ordered patient ids this partition covers.
    fn patient_ids(&self) -> &[String];

    fn patient_mask<'a>(&'a self, query: &'a Q) -> BoxFuture<'a, Result<Option<PatientMask>>>;
}

/// A shard built from other shards.
pub trait PartitionMerge<Q: Sync>: Shard<Q> {
    /// The logical patient universe of the merged partitions.
    fn universe(&self) -> &PatientUniverse;

    fn shard_count(&self) -> usize;

    /// Runs the query and decodes the merged mask to patient ids.
    fn patient_ids_for_query<'a>(
        &'a self,
        query: &'a Q,
    ) -> BoxFuture<'a, Result<BTreeSet<PatientId>>> {
        async move {
            match self.patient_mask(query).await? {
                Some(mask) => mask.to_patient_id_set(self.universe()),
                None => Ok(BTreeSet::new()),
            }
        }
        .boxed()
    }

    /// Runs the query on the shared runtime for callers outside async code. Must not be
    /// called from within a tokio runtime.
    fn patient_mask_blocking(&self, query: &Q) -> Result<Option<PatientMask>> {
        get_shared_runtime()?.block_on(self.patient_mask(query))
    }
}

async fn fan_out<Q: Sync + 'static>(
    shards: &[Arc<dyn Shard<Q>>],
    query: &Q,
) -> Result<Vec<Option<PatientMask>>> {
    let pending: Vec<_> = shards
        .iter()
        .enumerate()
        .map(|(idx, shard)| {
            shard
                .patient_mask(query)
                .map_err(move |e| MaskError::shard(idx, e))
        })
        .collect();
    try_join_all(pending).await
}

// ========================================================================================
//                                  Variant-sharded
// ========================================================================================

/// Partitions that share one cohort and split the variant catalog.
pub struct VariantShardMerge<Q> {
    shards: Vec<Arc<dyn Shard<Q>>>,
    universe: PatientUniverse,
    sparse_threshold: usize,
}

impl<Q: Sync + 'static> VariantShardMerge<Q> {
    /// Every shard must report the same ordered patient list; anything else is a
    /// configuration error.
    pub fn new(shards: Vec<Arc<dyn Shard<Q>>>, config: &MaskConfig) -> Result<Self> {
        let first = shards.first().ok_or(MaskError::NoShards)?;
        let expected = first.patient_ids();
        for (idx, shard) in shards.iter().enumerate().skip(1) {
            let found = shard.patient_ids();
            if found != expected {
                return Err(MaskError::UniverseMismatch {
                    shard: idx,
                    expected: expected.len(),
                    found: found.len(),
                });
            }
        }
        let universe = PatientUniverse::new(expected.to_vec())?;
        debug!(
            "Variant-sharded merge over {} shards, {} patients",
            shards.len(),
            universe.len()
        );
        Ok(Self {
            shards,
            universe,
            sparse_threshold: config.sparse_threshold,
        })
    }

    async fn union_shards(&self, query: &Q) -> Result<Option<PatientMask>> {
        let masks = fan_out(&self.shards, query).await?;
        let mut merged: Option<PatientMask> = None;
        for mask in masks.into_iter().flatten() {
            merged = Some(match merged {
                Some(acc) => acc.union_with_threshold(&mask, self.sparse_threshold)?,
                None => mask,
            });
        }
        Ok(merged)
    }
}

impl<Q: Sync + 'static> Shard<Q> for VariantShardMerge<Q> {
    fn patient_ids(&self) -> &[String] {
        self.universe.labels()
    }

    fn patient_mask<'a>(&'a self, query: &'a Q) -> BoxFuture<'a, Result<Option<PatientMask>>> {
        self.union_shards(query).boxed()
    }
}

impl<Q: Sync + 'static> PartitionMerge<Q> for VariantShardMerge<Q> {
    fn universe(&self) -> &PatientUniverse {
        &self.universe
    }

    fn shard_count(&self) -> usize {
        self.shards.len()
    }
}

// ========================================================================================
//                                  Patient-sharded
// ========================================================================================

/// Partitions that split the cohort and share the variant catalog.
pub struct PatientShardMerge<Q> {
    shards: Vec<Arc<dyn Shard<Q>>>,
    shard_lens: Vec<usize>,
    universe: PatientUniverse,
}

impl<Q: Sync + 'static> PatientShardMerge<Q> {
    /// The merged universe is the shards' patient lists concatenated in shard order.
    /// A patient listed by more than one shard is a data-quality problem, not an error.
    pub fn new(shards: Vec<Arc<dyn Shard<Q>>>) -> Result<Self> {
        if shards.is_empty() {
            return Err(MaskError::NoShards);
        }
        let parts = shards
            .iter()
            .map(|shard| PatientUniverse::new(shard.patient_ids().to_vec()))
            .collect::<Result<Vec<_>>>()?;
        let shard_lens = parts.iter().map(PatientUniverse::len).collect();
        let universe = PatientUniverse::concat(&parts);

        let distinct = universe.ids().iter().unique().count();
        let duplicates = universe.len() - distinct;
        if duplicates > 0 {
            warn!(
                "{duplicates} patient ids appear in more than one of {} patient shards",
                shards.len()
            );
        }
        debug!(
            "Patient-sharded merge over {} shards, {} patients",
            shards.len(),
            universe.len()
        );
        Ok(Self {
            shards,
            shard_lens,
            universe,
        })
    }

    /// Each shard's mask lands at its own offset; a shard with no mask contributes zeros.
    async fn append_shards(&self, query: &Q) -> Result<Option<PatientMask>> {
        let masks = fan_out(&self.shards, query).await?;
        if masks.iter().all(Option::is_none) {
            return Ok(None);
        }
        let mut merged: Option<PatientMask> = None;
        let mut merged_len = 0usize;
        for (idx, (mask, &len)) in masks.iter().zip(&self.shard_lens).enumerate() {
            let next = PatientMask::append(merged.as_ref(), merged_len, mask.as_ref(), len)
                .map_err(|e| MaskError::shard(idx, e))?;
            merged = Some(next);
            merged_len += len;
        }
        Ok(merged)
    }
}

impl<Q: Sync + 'static> Shard<Q> for PatientShardMerge<Q> {
    fn patient_ids(&self) -> &[String] {
        self.universe.labels()
    }

    fn patient_mask<'a>(&'a self, query: &'a Q) -> BoxFuture<'a, Result<Option<PatientMask>>> {
        self.append_shards(query).boxed()
    }
}

impl<Q: Sync + 'static> PartitionMerge<Q> for PatientShardMerge<Q> {
    fn universe(&self) -> &PatientUniverse {
        &self.universe
    }

    fn shard_count(&self) -> usize {
        self.shards.len()
    }
}

// ========================================================================================
//                                 A single partition
// ========================================================================================

/// Union of one genotype class over a list of variants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaskQuery {
    pub variants: Vec<VariantSpec>,
    pub class: MaskClass,
}

impl MaskQuery {
    pub fn heterozygous(variants: Vec<VariantSpec>) -> Self {
        Self {
            variants,
            class: MaskClass::Heterozygous,
        }
    }
}

/// A partition served from a local [`MaskStore`]. Store reads run on tokio's blocking
/// pool; unlike the join handler, a failed read fails the whole shard.
pub struct LocalShard {
    universe: PatientUniverse,
    masks: MaskStore,
    sparse_threshold: usize,
}

impl LocalShard {
    pub fn new(universe: PatientUniverse, masks: MaskStore, config: &MaskConfig) -> Self {
        Self {
            universe,
            masks,
            sparse_threshold: config.sparse_threshold,
        }
    }
}

fn union_from_store(
    masks: &MaskStore,
    query: &MaskQuery,
    patients: usize,
    threshold: usize,
) -> Result<Option<PatientMask>> {
    let mut merged: Option<PatientMask> = None;
    for spec in &query.variants {
        let Some(family) = masks.get_masks(spec)? else {
            continue;
        };
        let Some(mask) = family.into_class(query.class) else {
            continue;
        };
        if mask.len() != patients {
            return Err(MaskError::LengthMismatch {
                left: mask.len(),
                right: patients,
            });
        }
        merged = Some(match merged {
            Some(acc) => acc.union_with_threshold(&mask, threshold)?,
            None => mask,
        });
    }
    Ok(merged)
}

impl Shard<MaskQuery> for LocalShard {
    fn patient_ids(&self) -> &[String] {
        self.universe.labels()
    }

    fn patient_mask<'a>(
        &'a self,
        query: &'a MaskQuery,
    ) -> BoxFuture<'a, Result<Option<PatientMask>>> {
        let masks = self.masks.clone();
        let query = query.clone();
        let patients = self.universe.len();
        let threshold = self.sparse_threshold;
        async move {
            tokio::task::spawn_blocking(move || {
                union_from_store(&masks, &query, patients, threshold)
            })
            .await
            .map_err(|e| MaskError::Runtime(format!("Local shard task failed: {e}")))?
        }
        .boxed()
    }
}
