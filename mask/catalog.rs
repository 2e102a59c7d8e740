use crate::error::{MaskError, Result};
use crate::types::VariantSpec;
use crate::variant_index::VariantIndex;
use ahash::{AHashMap, AHashSet};
use log::debug;

/// Resolves catalog positions to variants and answers annotation filters.
pub trait VariantCatalog: Send + Sync {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn variant_spec_at(&self, id: u32) -> Option<&VariantSpec>;

    /// Variants whose annotation `key` equals any of `values`.
    fn ids_matching_category_filter(&self, key: &str, values: &[&str]) -> VariantIndex;

    /// Variants whose numeric annotation `key` lies in `[min, max]`.
    fn ids_matching_range_filter(&self, key: &str, min: f64, max: f64) -> VariantIndex;
}

#[derive(Debug, Clone)]
struct CatalogEntry {
    spec: VariantSpec,
    annotations: AHashMap<String, String>,
}

/// A catalog held entirely in memory, built once with [`CatalogBuilder`].
#[derive(Debug, Clone)]
pub struct InMemoryCatalog {
    entries: Vec<CatalogEntry>,
    by_spec: AHashMap<VariantSpec, u32>,
    dense_divisor: usize,
}

impl InMemoryCatalog {
    pub fn position_of(&self, spec: &VariantSpec) -> Option<u32> {
        self.by_spec.get(spec).copied()
    }

    fn index_where(&self, mut keep: impl FnMut(&CatalogEntry) -> bool) -> VariantIndex {
        let ids = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| keep(entry))
            .map(|(id, _)| id as u32);
        VariantIndex::from_ids(ids, self.entries.len(), self.dense_divisor)
    }
}

impl VariantCatalog for InMemoryCatalog {
    fn len(&self) -> usize {
        self.entries.len()
    }

    fn variant_spec_at(&self, id: u32) -> Option<&VariantSpec> {
        self.entries.get(id as usize).map(|entry| &entry.spec)
    }

    fn ids_matching_category_filter(&self, key: &str, values: &[&str]) -> VariantIndex {
        let wanted: AHashSet<&str> = values.iter().copied().collect();
        self.index_where(|entry| {
            annotation(entry, key).is_some_and(|value| wanted.contains(value))
        })
    }

    fn ids_matching_range_filter(&self, key: &str, min: f64, max: f64) -> VariantIndex {
        self.index_where(|entry| {
            annotation(entry, key)
                .and_then(|value| value.parse::<f64>().ok())
                .is_some_and(|value| value >= min && value <= max)
        })
    }
}

/// `gene` and `consequence` are always filterable; everything else comes from the
/// annotations supplied at build time.
fn annotation<'a>(entry: &'a CatalogEntry, key: &str) -> Option<&'a str> {
    match key {
        "gene" => Some(entry.spec.gene.as_str()),
        "consequence" => Some(entry.spec.consequence.as_str()),
        _ => entry.annotations.get(key).map(String::as_str),
    }
}

/// Assigns catalog positions in insertion order.
#[derive(Debug)]
pub struct CatalogBuilder {
    entries: Vec<CatalogEntry>,
    by_spec: AHashMap<VariantSpec, u32>,
    dense_divisor: usize,
}

impl CatalogBuilder {
    pub fn new(dense_divisor: usize) -> Self {
        Self {
            entries: Vec::new(),
            by_spec: AHashMap::new(),
            dense_divisor,
        }
    }

    /// Adds a variant with its annotations and returns its catalog position. A variant
    /// that is already present is a `DuplicateVariantSpec` error.
    pub fn push<K, V>(
        &mut self,
        spec: VariantSpec,
        annotations: impl IntoIterator<Item = (K, V)>,
    ) -> Result<u32>
    where
        K: Into<String>,
        V: Into<String>,
    {
        if self.by_spec.contains_key(&spec) {
            return Err(MaskError::DuplicateVariantSpec(spec.to_string()));
        }
        let id = u32::try_from(self.entries.len())
            .map_err(|_| MaskError::InvalidConfig("catalog exceeds u32::MAX variants".into()))?;
        self.by_spec.insert(spec.clone(), id);
        self.entries.push(CatalogEntry {
            spec,
            annotations: annotations
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        });
        Ok(id)
    }

    pub fn build(self) -> InMemoryCatalog {
        debug!("Built variant catalog with {} variants", self.entries.len());
        InMemoryCatalog {
            entries: self.entries,
            by_spec: self.by_spec,
            dense_divisor: self.dense_divisor,
        }
    }
}
