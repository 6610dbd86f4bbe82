use nbcache_notebook::Notebook;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};
use std::time::Duration;

/// A cell-level execution failure inside a driver.
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    /// A cell raised and `allow_errors` was false.
    #[error("cell {cell_index} raised during execution")]
    CellError {
        cell_index: usize,
        /// Formatted traceback, recorded on the project record.
        traceback: String,
    },

    /// A cell produced no output within the timeout.
    #[error("cell execution timed out after {timeout:?}")]
    Timeout { timeout: Duration },
}

impl ExecutionError {
    /// The text stored as the project record's traceback.
    pub fn traceback(&self) -> String {
        match self {
            ExecutionError::CellError { traceback, .. } => traceback.clone(),
            ExecutionError::Timeout { .. } => self.to_string(),
        }
    }
}

/// The cell-execution collaborator: runs a notebook's cells in a working
/// directory, mutating the tree in place, and raises on cell error or
/// timeout.
pub trait CellExecutor: Send + Sync {
    fn execute(
        &self,
        nb: &mut Notebook,
        cwd: &Path,
        timeout: Option<Duration>,
        allow_errors: bool,
        record_timing: bool,
    ) -> Result<(), ExecutionError>;
}

fn registry() -> &'static RwLock<BTreeMap<String, Arc<dyn CellExecutor>>> {
    static DRIVERS: OnceLock<RwLock<BTreeMap<String, Arc<dyn CellExecutor>>>> = OnceLock::new();
    DRIVERS.get_or_init(|| RwLock::new(BTreeMap::new()))
}

/// Register a cell-execution driver under `name`, replacing any existing
/// one. No drivers are built in; embedding applications provide their own.
pub fn register_driver(name: impl Into<String>, driver: Arc<dyn CellExecutor>) {
    registry()
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(name.into(), driver);
}

pub fn get_driver(name: &str) -> Option<Arc<dyn CellExecutor>> {
    registry()
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(name)
        .cloned()
}

pub fn list_drivers() -> Vec<String> {
    registry()
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .keys()
        .cloned()
        .collect()
}
