use crate::catalog::VariantCatalog;
use crate::codec::MaskClass;
use crate::config::MaskConfig;
use crate::error::{MaskError, Result};
use crate::patient_mask::PatientMask;
use crate::store::MaskStore;
use crate::types::{PatientId, PatientUniverse, VariantSpec};
use crate::variant_index::VariantIndex;
use ahash::AHashSet;
use log::{debug, warn};
use rayon::prelude::*;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Answers "which patients carry any of these variants" for one partition.
///
/// Per-variant masks are fetched on a dedicated rayon pool sized by
/// `MaskConfig::fetch_parallelism`. A variant without a stored mask, or whose fetch fails,
/// contributes nothing; the failure is logged and the query goes on.
pub struct PatientVariantJoinHandler {
    catalog: Arc<dyn VariantCatalog>,
    masks: MaskStore,
    universe: PatientUniverse,
    pool: rayon::ThreadPool,
    sparse_threshold: usize,
}

impl PatientVariantJoinHandler {
    pub fn new(
        catalog: Arc<dyn VariantCatalog>,
        masks: MaskStore,
        universe: PatientUniverse,
        config: &MaskConfig,
    ) -> Result<Self> {
        config.validate()?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.fetch_parallelism)
            .thread_name(|i| format!("mask-fetch-{i}"))
            .build()
            .map_err(|e| MaskError::Runtime(format!("Failed to build mask fetch pool: {e}")))?;
        Ok(Self {
            catalog,
            masks,
            universe,
            pool,
            sparse_threshold: config.sparse_threshold,
        })
    }

    pub fn universe(&self) -> &PatientUniverse {
        &self.universe
    }

    /// Patients carrying at least one variant of `variant_index` as a heterozygous call,
    /// restricted to `patient_subset` when that is non-empty.
    pub fn get_patient_ids_for_intersection_of_variant_sets(
        &self,
        patient_subset: &BTreeSet<PatientId>,
        variant_index: &VariantIndex,
    ) -> Result<BTreeSet<PatientId>> {
        if variant_index.is_empty() {
            return Ok(BTreeSet::new());
        }
        let specs = variant_index
            .ids()
            .map(|id| {
                self.catalog
                    .variant_spec_at(id)
                    .ok_or(MaskError::UnknownVariantId(id))
            })
            .collect::<Result<Vec<&VariantSpec>>>()?;
        self.patient_ids_for_specs(patient_subset, &specs)
    }

    /// Same as [`Self::get_patient_ids_for_intersection_of_variant_sets`] for an explicit
    /// list of variants. A variant listed twice is rejected.
    pub fn get_patient_ids_for_variant_specs(
        &self,
        patient_subset: &BTreeSet<PatientId>,
        specs: &[VariantSpec],
    ) -> Result<BTreeSet<PatientId>> {
        let mut seen = AHashSet::with_capacity(specs.len());
        for spec in specs {
            if !seen.insert(spec) {
                return Err(MaskError::DuplicateVariantSpec(spec.to_string()));
            }
        }
        let specs: Vec<&VariantSpec> = specs.iter().collect();
        self.patient_ids_for_specs(patient_subset, &specs)
    }

    fn patient_ids_for_specs(
        &self,
        patient_subset: &BTreeSet<PatientId>,
        specs: &[&VariantSpec],
    ) -> Result<BTreeSet<PatientId>> {
        if specs.is_empty() {
            return Ok(BTreeSet::new());
        }
        let mask = self.patient_mask_for_variants(specs, MaskClass::Heterozygous)?;
        let ids = self.patient_mask_to_patient_id_set(&mask)?;
        if patient_subset.is_empty() {
            Ok(ids)
        } else {
            Ok(ids.intersection(patient_subset).copied().collect())
        }
    }

    /// Union of the `class` masks of `specs` over this partition's universe.
    pub fn patient_mask_for_variants(
        &self,
        specs: &[&VariantSpec],
        class: MaskClass,
    ) -> Result<PatientMask> {
        let patients = self.universe.len();
        let threshold = self.sparse_threshold;
        let skipped = AtomicUsize::new(0);

        let merged = self.pool.install(|| {
            specs
                .par_iter()
                .filter_map(|spec| {
                    let mask = self.fetch(spec, class);
                    if mask.is_none() {
                        skipped.fetch_add(1, Ordering::Relaxed);
                    }
                    mask
                })
                .map(Ok)
                .try_reduce(
                    || PatientMask::empty_sparse(patients),
                    |a, b| a.union_with_threshold(&b, threshold),
                )
        })?;

        debug!(
            "Unioned {:?} masks of {} variants ({} contributed nothing): {} patients",
            class,
            specs.len(),
            skipped.load(Ordering::Relaxed),
            merged.bit_count()
        );
        Ok(merged)
    }

    fn fetch(&self, spec: &VariantSpec, class: MaskClass) -> Option<PatientMask> {
        let family = match self.masks.get_masks(spec) {
            Ok(Some(family)) => family,
            Ok(None) => {
                debug!("No stored masks for {spec}");
                return None;
            }
            Err(e) => {
                warn!("Skipping {spec}: mask fetch failed: {e}");
                return None;
            }
        };
        let mask = family.into_class(class)?;
        if mask.len() != self.universe.len() {
            warn!(
                "Skipping {spec}: stored mask covers {} patients, partition has {}",
                mask.len(),
                self.universe.len()
            );
            return None;
        }
        Some(mask)
    }

    pub fn patient_mask_to_patient_id_set(&self, mask: &PatientMask) -> Result<BTreeSet<PatientId>> {
        mask.to_patient_id_set(&self.universe)
    }
}
