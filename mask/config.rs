use crate::error::{MaskError, Result};
use crate::patient_mask::DEFAULT_SPARSE_THRESHOLD;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Tuning knobs for the mask engine. Every field has a default, so an empty TOML file is a
/// valid configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaskConfig {
    /// Presence count above which a patient mask is stored dense.
    pub sparse_threshold: usize,
    /// A variant index holding more than `catalog_len / variant_index_dense_divisor` ids is
    /// built as a dense boolean vector.
    pub variant_index_dense_divisor: usize,
    /// Worker threads used to fetch per-variant masks in the join handler.
    pub fetch_parallelism: usize,
    /// Patients whose bucket sets are kept in memory by the spatial index.
    pub bucket_cache_capacity: usize,
}

impl Default for MaskConfig {
    fn default() -> Self {
        Self {
            sparse_threshold: DEFAULT_SPARSE_THRESHOLD,
            variant_index_dense_divisor: 32,
            fetch_parallelism: num_cpus::get().max(1),
            bucket_cache_capacity: 65_536,
        }
    }
}

impl MaskConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Saves the configuration in a human-readable TOML format.
    pub fn save(&self, path: &Path) -> Result<()> {
        let text = toml::to_string_pretty(self)?;
        let mut file = BufWriter::new(fs::File::create(path)?);
        file.write_all(text.as_bytes())?;
        file.flush()?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.fetch_parallelism == 0 {
            return Err(MaskError::InvalidConfig(
                "fetch_parallelism must be at least 1".into(),
            ));
        }
        if self.variant_index_dense_divisor == 0 {
            return Err(MaskError::InvalidConfig(
                "variant_index_dense_divisor must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
