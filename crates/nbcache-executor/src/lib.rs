//! Executor coordinator: drives registered notebooks through execution and
//! feeds the results back into the cache.
//!
//! The coordinator is parameterized by two orthogonal policies instead of an
//! executor-per-combination hierarchy:
//! - [`WorkingDir`]: execute beside the notebook, or in a sandbox directory
//!   with assets copied in
//! - [`Scheduling`]: one worker at a time on the calling thread, or a worker
//!   pool sized to the machine's logical CPUs
//!
//! The in-kernel cell execution itself is an external collaborator behind
//! the [`CellExecutor`] trait; implementations are looked up by name in a
//! process-wide driver registry.

mod coordinator;
mod driver;
mod worker;

pub use coordinator::{
    get_executor, list_executors, register_executor, Executor, ExecutorRunResult, ExecutorSpec,
    RunOptions, Scheduling, WorkingDir, DEFAULT_TIMEOUT,
};
pub use driver::{
    get_driver, list_drivers, register_driver, CellExecutor, ExecutionError,
};
