use crate::error::{MaskError, Result};
use log::debug;
use std::sync::{Arc, OnceLock};
use tokio::runtime::Runtime;

static RUNTIME_MANAGER: OnceLock<Arc<Runtime>> = OnceLock::new();

/// The process-wide tokio runtime used by the blocking merge entry points. Created on first
/// use; later callers share it.
pub fn get_shared_runtime() -> Result<Arc<Runtime>> {
    if let Some(runtime) = RUNTIME_MANAGER.get() {
        return Ok(Arc::clone(runtime));
    }

    let runtime = Arc::new(
        Runtime::new()
            .map_err(|e| MaskError::Runtime(format!("Failed to initialize Tokio runtime: {e}")))?,
    );

    match RUNTIME_MANAGER.set(Arc::clone(&runtime)) {
        Ok(()) => {
            debug!("Initialized shared Tokio runtime");
            Ok(runtime)
        }
        // Lost the race; the runtime built here is dropped in favour of the winner's.
        Err(_) => RUNTIME_MANAGER
            .get()
            .cloned()
            .ok_or_else(|| MaskError::Runtime("shared Tokio runtime vanished".into())),
    }
}
