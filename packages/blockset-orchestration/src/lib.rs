/*
 * Blockset Orchestration - Multi-process combo precompute
 *
 * Drives the exhaustive search of blockset-core across worker processes
 * and accumulates results in a crash-safe store.
 *
 * Architecture:
 * - Batch planning (prefix partitioning per length)
 * - Worker processes (own process group, logs per job)
 * - Signal trap (workers never outlive the orchestrator)
 * - Checkpoint store (flock + atomic replace per length)
 */

// Public modules
pub mod checkpoint;
pub mod config;
pub mod error;
pub mod job;
pub mod orchestrator;
pub mod signals;
pub mod worker;

// Re-exports
pub use checkpoint::{load_snapshot, CheckpointStore, ExtendReport, LengthReport, StoreSnapshot};
pub use config::{ConfigError, PipelineConfig};
pub use error::{ErrorKind, OrchestratorError, Result, WorkerFailure};
pub use job::{plan_batch, BatchPlan, JobSpec};
pub use orchestrator::{BatchOrchestrator, BatchOutcome};
pub use signals::SignalTrap;
pub use worker::{run_worker, BatchContext, JobFiles, WorkerBinary, WorkerLauncher};
