use std::collections::BTreeSet;

/// A presence set over variant-catalog positions.
///
/// Short candidate lists stay `Sparse`; broad category filters that hit a large share of
/// the catalog are `Dense`, one flag per catalog position. Values are transient and never
/// persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VariantIndex {
    Sparse(BTreeSet<u32>),
    Dense(Vec<bool>),
}

impl Default for VariantIndex {
    fn default() -> Self {
        Self::empty()
    }
}

impl VariantIndex {
    /// The identity for union.
    pub fn empty() -> Self {
        VariantIndex::Sparse(BTreeSet::new())
    }

    /// Builds an index over a catalog of `catalog_len` variants, choosing `Dense` once the
    /// ids cover more than `catalog_len / dense_divisor` positions. Ids outside the catalog
    /// are dropped.
    pub fn from_ids(
        ids: impl IntoIterator<Item = u32>,
        catalog_len: usize,
        dense_divisor: usize,
    ) -> Self {
        let ids: BTreeSet<u32> = ids
            .into_iter()
            .filter(|&id| (id as usize) < catalog_len)
            .collect();
        let cutoff = catalog_len / dense_divisor.max(1);
        if !ids.is_empty() && ids.len() > cutoff {
            let mut flags = vec![false; catalog_len];
            for &id in &ids {
                flags[id as usize] = true;
            }
            VariantIndex::Dense(flags)
        } else {
            VariantIndex::Sparse(ids)
        }
    }

    pub fn contains(&self, id: u32) -> bool {
        match self {
            VariantIndex::Sparse(ids) => ids.contains(&id),
            VariantIndex::Dense(flags) => flags.get(id as usize).copied().unwrap_or(false),
        }
    }

    pub fn cardinality(&self) -> usize {
        match self {
            VariantIndex::Sparse(ids) => ids.len(),
            VariantIndex::Dense(flags) => flags.iter().filter(|f| **f).count(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            VariantIndex::Sparse(ids) => ids.is_empty(),
            VariantIndex::Dense(flags) => !flags.iter().any(|f| *f),
        }
    }

    /// Member ids in ascending order.
    pub fn ids(&self) -> Box<dyn Iterator<Item = u32> + '_> {
        match self {
            VariantIndex::Sparse(ids) => Box::new(ids.iter().copied()),
            VariantIndex::Dense(flags) => Box::new(
                flags
                    .iter()
                    .enumerate()
                    .filter(|(_, present)| **present)
                    .map(|(id, _)| id as u32),
            ),
        }
    }

    /// Any dense operand makes the result dense over the longer of the two vectors.
    pub fn union(&self, other: &Self) -> Self {
        match (self, other) {
            (VariantIndex::Sparse(a), VariantIndex::Sparse(b)) => {
                VariantIndex::Sparse(a.union(b).copied().collect())
            }
            (VariantIndex::Dense(a), VariantIndex::Dense(b)) => {
                let (long, short) = if a.len() >= b.len() { (a, b) } else { (b, a) };
                let mut flags = long.clone();
                for (dst, src) in flags.iter_mut().zip(short) {
                    *dst |= *src;
                }
                VariantIndex::Dense(flags)
            }
            (VariantIndex::Sparse(s), VariantIndex::Dense(d))
            | (VariantIndex::Dense(d), VariantIndex::Sparse(s)) => {
                let len = s
                    .last()
                    .map_or(d.len(), |&max| d.len().max(max as usize + 1));
                let mut flags = d.clone();
                flags.resize(len, false);
                for &id in s {
                    flags[id as usize] = true;
                }
                VariantIndex::Dense(flags)
            }
        }
    }

    /// Intersection with a sparse operand stays sparse; Dense ∩ Dense is positional AND.
    pub fn intersection(&self, other: &Self) -> Self {
        match (self, other) {
            (VariantIndex::Sparse(a), VariantIndex::Sparse(b)) => {
                VariantIndex::Sparse(a.intersection(b).copied().collect())
            }
            (VariantIndex::Dense(a), VariantIndex::Dense(b)) => VariantIndex::Dense(
                a.iter().zip(b).map(|(x, y)| *x && *y).collect(),
            ),
            (VariantIndex::Sparse(s), VariantIndex::Dense(d))
            | (VariantIndex::Dense(d), VariantIndex::Sparse(s)) => VariantIndex::Sparse(
                s.iter()
                    .copied()
                    .filter(|&id| d.get(id as usize).copied().unwrap_or(false))
                    .collect(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sparse(ids: &[u32]) -> VariantIndex {
        VariantIndex::Sparse(ids.iter().copied().collect())
    }

    fn dense(len: usize, ids: &[u32]) -> VariantIndex {
        let mut flags = vec![false; len];
        for &id in ids {
            flags[id as usize] = true;
        }
        VariantIndex::Dense(flags)
    }

    #[test]
    fn from_ids_switches_to_dense_for_broad_selections() {
        let narrow = VariantIndex::from_ids([1, 5], 64, 32);
        assert!(matches!(narrow, VariantIndex::Sparse(_)));
        let broad = VariantIndex::from_ids([1, 5, 9], 64, 32);
        assert!(matches!(broad, VariantIndex::Dense(ref f) if f.len() == 64));
        assert_eq!(broad.ids().collect::<Vec<_>>(), vec![1, 5, 9]);

        let clipped = VariantIndex::from_ids([3, 100], 10, 32);
        assert_eq!(clipped.ids().collect::<Vec<_>>(), vec![3]);
    }

    #[test]
    fn empty_is_union_identity() {
        let a = dense(8, &[2, 7]);
        assert_eq!(VariantIndex::empty().union(&a).ids().collect::<Vec<_>>(), vec![2, 7]);
        assert_eq!(sparse(&[4]).union(&VariantIndex::empty()), sparse(&[4]));
        assert!(VariantIndex::empty().is_empty());
        assert!(dense(4, &[]).is_empty());
    }

    #[test]
    fn union_promotes_to_dense() {
        let merged = sparse(&[1, 9]).union(&dense(8, &[0, 1]));
        assert!(matches!(merged, VariantIndex::Dense(ref f) if f.len() == 10));
        assert_eq!(merged.ids().collect::<Vec<_>>(), vec![0, 1, 9]);
        assert_eq!(merged.cardinality(), 3);
        assert!(merged.contains(9) && !merged.contains(2) && !merged.contains(50));
    }

    #[test]
    fn intersection_keeps_the_smaller_representation() {
        let common = sparse(&[1, 3, 5]).intersection(&dense(6, &[3, 4, 5]));
        assert_eq!(common, sparse(&[3, 5]));

        let both_dense = dense(6, &[0, 3]).intersection(&dense(6, &[3, 4]));
        assert!(matches!(both_dense, VariantIndex::Dense(_)));
        assert_eq!(both_dense.ids().collect::<Vec<_>>(), vec![3]);

        assert_eq!(sparse(&[1, 2]).intersection(&sparse(&[2, 3])), sparse(&[2]));
    }
}
