#![deny(unused_variables)]
#![deny(clippy::no_effect_underscore_binding)]
pub mod catalog;
pub mod codec;
pub mod config;
pub mod empty_cache;
pub mod error;
pub mod join;
pub mod merge;
pub mod patient_mask;
pub mod runtime;
pub mod spatial;
pub mod store;
pub mod types;
pub mod variant_index;

pub use codec::{GenotypeClass, GenotypeMaskCodec, MaskClass, VariantMasks};
pub use config::MaskConfig;
pub use error::{MaskError, Result};
pub use merge::{PartitionMerge, PatientShardMerge, Shard, VariantShardMerge};
pub use patient_mask::PatientMask;
pub use types::{BucketId, PatientId, PatientUniverse, VariantSpec};
pub use variant_index::VariantIndex;
