use crate::driver::CellExecutor;
use crate::worker::{self, Outcome};
use nbcache::{CacheError, NotebookCache};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};
use std::time::Duration;

/// Default per-cell execution timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Where a worker executes its notebook.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkingDir {
    /// In the parent folder of the notebook URI.
    InPlace,
    /// In a fresh temporary directory, with assets copied in first and the
    /// directory deleted on worker exit.
    Sandboxed,
}

/// How workers are scheduled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Scheduling {
    /// One at a time, on the calling thread.
    Serial,
    /// A worker pool sized to the number of logical CPUs.
    Parallel,
}

/// A named combination of working-directory and scheduling policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExecutorSpec {
    pub working_dir: WorkingDir,
    pub scheduling: Scheduling,
}

fn registry() -> &'static RwLock<BTreeMap<String, ExecutorSpec>> {
    static EXECUTORS: OnceLock<RwLock<BTreeMap<String, ExecutorSpec>>> = OnceLock::new();
    EXECUTORS.get_or_init(|| {
        let mut map = BTreeMap::new();
        map.insert(
            "inplace-serial".to_string(),
            ExecutorSpec {
                working_dir: WorkingDir::InPlace,
                scheduling: Scheduling::Serial,
            },
        );
        map.insert(
            "temp-serial".to_string(),
            ExecutorSpec {
                working_dir: WorkingDir::Sandboxed,
                scheduling: Scheduling::Serial,
            },
        );
        map.insert(
            "inplace-parallel".to_string(),
            ExecutorSpec {
                working_dir: WorkingDir::InPlace,
                scheduling: Scheduling::Parallel,
            },
        );
        map.insert(
            "temp-parallel".to_string(),
            ExecutorSpec {
                working_dir: WorkingDir::Sandboxed,
                scheduling: Scheduling::Parallel,
            },
        );
        RwLock::new(map)
    })
}

/// Register an executor spec under `name`, replacing any existing one.
pub fn register_executor(name: impl Into<String>, spec: ExecutorSpec) {
    registry()
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(name.into(), spec);
}

pub fn get_executor(name: &str) -> Option<ExecutorSpec> {
    registry()
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(name)
        .copied()
}

pub fn list_executors() -> Vec<String> {
    registry()
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .keys()
        .cloned()
        .collect()
}

/// Options for a coordinator run.
#[derive(Clone, Debug)]
pub struct RunOptions {
    pub filter_uris: Option<Vec<String>>,
    pub filter_pks: Option<Vec<i64>>,
    /// Per-cell timeout; a notebook's `metadata.execution.timeout` overrides
    /// it.
    pub timeout: Option<Duration>,
    /// Continue on cell errors; `metadata.execution.allow_errors` overrides
    /// it.
    pub allow_errors: bool,
    /// Execute all selected notebooks, even those already cached.
    pub force: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            filter_uris: None,
            filter_pks: None,
            timeout: Some(DEFAULT_TIMEOUT),
            allow_errors: false,
            force: false,
        }
    }
}

/// Per-notebook outcomes of a coordinator run, as URI lists.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ExecutorRunResult {
    /// Notebooks which were successfully executed and cached.
    pub succeeded: Vec<String>,
    /// Notebooks whose cells excepted during execution.
    pub excepted: Vec<String>,
    /// Notebooks which errored before, or outside of, cell execution.
    pub errored: Vec<String>,
}

impl ExecutorRunResult {
    /// All processed notebook URIs.
    pub fn all(&self) -> Vec<String> {
        let mut uris = self.succeeded.clone();
        uris.extend(self.excepted.iter().cloned());
        uris.extend(self.errored.iter().cloned());
        uris
    }

    pub fn as_json(&self) -> serde_json::Value {
        serde_json::json!({
            "succeeded": self.succeeded,
            "excepted": self.excepted,
            "errored": self.errored,
        })
    }

    fn push(&mut self, uri: String, outcome: Outcome) {
        match outcome {
            Outcome::Succeeded => self.succeeded.push(uri),
            Outcome::Excepted => self.excepted.push(uri),
            Outcome::Errored => self.errored.push(uri),
        }
    }
}

/// An immutable per-notebook descriptor handed to a worker.
#[derive(Clone, Debug)]
struct Job {
    pk: i64,
    uri: String,
}

/// The executor coordinator.
pub struct Executor {
    cache: NotebookCache,
    driver: Arc<dyn CellExecutor>,
    spec: ExecutorSpec,
}

impl Executor {
    pub fn new(cache: NotebookCache, driver: Arc<dyn CellExecutor>, spec: ExecutorSpec) -> Self {
        Self {
            cache,
            driver,
            spec,
        }
    }

    /// Execute the selected project notebooks and cache the successes.
    ///
    /// Per-notebook failures are downgraded to an outcome category; a single
    /// failing notebook never aborts the batch.
    pub fn run(&self, options: &RunOptions) -> Result<ExecutorRunResult, CacheError> {
        let filter_uris = options.filter_uris.as_deref();
        let filter_pks = options.filter_pks.as_deref();
        let records = if options.force {
            self.cache.project_records(filter_uris, filter_pks)?
        } else {
            self.cache.list_unexecuted(filter_uris, filter_pks)?
        };
        let pks: Vec<i64> = records.iter().map(|record| record.pk).collect();
        self.cache.clear_tracebacks(&pks)?;

        let jobs: Vec<Job> = records
            .into_iter()
            .map(|record| Job {
                pk: record.pk,
                uri: record.uri,
            })
            .collect();

        let mut result = ExecutorRunResult::default();
        match self.spec.scheduling {
            Scheduling::Serial => {
                tracing::info!(
                    target = "nbcache.executor",
                    count = jobs.len(),
                    "executing notebooks in serial"
                );
                for job in jobs {
                    let outcome = worker::execute_single(
                        &self.cache,
                        self.driver.as_ref(),
                        job.pk,
                        &job.uri,
                        self.spec.working_dir,
                        options.timeout,
                        options.allow_errors,
                    );
                    result.push(job.uri, outcome);
                }
            }
            Scheduling::Parallel => {
                let workers = std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(1);
                tracing::info!(
                    target = "nbcache.executor",
                    count = jobs.len(),
                    workers,
                    "executing notebooks over a worker pool"
                );
                result = self.run_parallel(jobs, workers, options);
            }
        }
        Ok(result)
    }

    fn run_parallel(
        &self,
        jobs: Vec<Job>,
        workers: usize,
        options: &RunOptions,
    ) -> ExecutorRunResult {
        let (job_tx, job_rx) = crossbeam_channel::unbounded::<Job>();
        let (outcome_tx, outcome_rx) = crossbeam_channel::unbounded::<(String, Outcome)>();
        for job in jobs {
            // Send on an unbounded channel only fails if the receiver is
            // gone, and we still hold it.
            let _ = job_tx.send(job);
        }
        drop(job_tx);

        std::thread::scope(|scope| {
            for _ in 0..workers {
                let job_rx = job_rx.clone();
                let outcome_tx = outcome_tx.clone();
                // A cloned cache handle carries no open connection; the
                // worker reopens the database itself.
                let cache = self.cache.clone();
                let driver = Arc::clone(&self.driver);
                let working_dir = self.spec.working_dir;
                let timeout = options.timeout;
                let allow_errors = options.allow_errors;
                scope.spawn(move || {
                    for job in job_rx.iter() {
                        let outcome = worker::execute_single(
                            &cache,
                            driver.as_ref(),
                            job.pk,
                            &job.uri,
                            working_dir,
                            timeout,
                            allow_errors,
                        );
                        let _ = outcome_tx.send((job.uri, outcome));
                    }
                });
            }
            drop(outcome_tx);

            let mut result = ExecutorRunResult::default();
            for (uri, outcome) in outcome_rx.iter() {
                result.push(uri, outcome);
            }
            result
        })
    }
}
