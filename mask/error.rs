// ========================================================================================
//                                 Crate-wide error type
// ========================================================================================

use thiserror::Error;

/// Every failure the mask engine can surface to a caller.
///
/// Configuration errors (`UniverseMismatch`, `DuplicateVariantSpec`, `InvalidPatientId`,
/// `InvalidConfig`) are fatal and never retried. Data-quality anomalies such as missing
/// masks or unrecognized genotype tokens never reach this type; they are logged or
/// counted where they occur and contribute nothing to the answer.
#[derive(Error, Debug)]
pub enum MaskError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Failed to parse TOML configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Failed to serialize configuration to TOML format: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Masks cover different patient universes: {left} vs {right} patients.")]
    LengthMismatch { left: usize, right: usize },

    #[error(
        "Shard {shard} reports a patient list that differs from shard 0 ({found} vs {expected} patients); variant-sharded partitions must share one cohort."
    )]
    UniverseMismatch {
        shard: usize,
        expected: usize,
        found: usize,
    },

    #[error("A partition merge needs at least one shard.")]
    NoShards,

    #[error("Shard {shard} failed: {source}")]
    Shard {
        shard: usize,
        #[source]
        source: Box<MaskError>,
    },

    #[error("Variant spec '{0}' appears more than once in the request.")]
    DuplicateVariantSpec(String),

    #[error("Variant spec '{0}' is malformed: {1}")]
    InvalidVariantSpec(String, String),

    #[error("Patient id '{0}' is not an integer.")]
    InvalidPatientId(String),

    #[error("Bit string '{0}' is not a guard-wrapped patient mask.")]
    InvalidBitString(String),

    #[error("Variant catalog has no entry at position {0}.")]
    UnknownVariantId(u32),

    #[error("Store is complete and read-only; refusing to write key '{0}'.")]
    StoreComplete(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Runtime error: {0}")]
    Runtime(String),
}

pub type Result<T> = std::result::Result<T, MaskError>;

impl MaskError {
    /// Wraps a child partition's failure with the index of the shard that produced it.
    pub fn shard(shard: usize, source: MaskError) -> Self {
        Self::Shard {
            shard,
            source: Box::new(source),
        }
    }

    pub fn store(message: impl Into<String>) -> Self {
        Self::Store(message.into())
    }
}
