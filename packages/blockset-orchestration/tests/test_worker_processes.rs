//! Integration tests for batches run across real worker processes
//!
//! Tests:
//! - Partition completeness: per-job results through `blockset-combo worker`
//!   equal the single-pass enumeration
//! - Failure injection: a failing worker leaves the store untouched
//! - Extend idempotence: a second run launches nothing
//! - Re-resolved targets: a consistency violation leaves the store untouched

mod common;

use blockset_core::persist::atomic_write_bincode;
use blockset_core::{enumerate, Decomposition, ResolvedSet};
use blockset_orchestration::checkpoint::load_snapshot;
use blockset_orchestration::worker::WorkerArtifact;
use blockset_orchestration::{
    BatchOrchestrator, CheckpointStore, JobFiles, JobSpec, OrchestratorError, Result,
    WorkerLauncher,
};
use common::*;
use pretty_assertions::assert_eq;
use std::path::Path;
use std::process::{Child, Command};
use std::sync::Arc;
use tempfile::TempDir;

/// Writes a well-formed artifact that claims target 1, then exits cleanly
struct ResolvedTargetLauncher;

impl WorkerLauncher for ResolvedTargetLauncher {
    fn launch(&self, _context: &Path, job: &JobSpec, files: &JobFiles) -> Result<Child> {
        let artifact = WorkerArtifact {
            length: job.length,
            prefix: job.prefix.clone(),
            found: [(1, Decomposition::new(vec![1]))].into_iter().collect(),
        };
        atomic_write_bincode(&files.artifact, &artifact)?;
        Ok(Command::new("sh").arg("-c").arg("exit 0").spawn()?)
    }
}

#[test]
fn test_partition_completeness_through_workers() {
    let dir = TempDir::new().unwrap();
    let alphabet = ten_weights();

    let mut resolved = ResolvedSet::new();
    for r in 1..=2 {
        for t in enumerate(r, &[], alphabet.weights(), &resolved).unwrap().keys() {
            resolved.insert(*t);
        }
    }
    let expected = enumerate(3, &[], alphabet.weights(), &resolved).unwrap();

    let orch = process_orchestrator(dir.path(), 3);
    let outcome = orch.run_batch(&alphabet, 3, &resolved).unwrap();
    println!(
        "r=3: {} targets from {} workers in {}ms",
        outcome.found.len(),
        outcome.workers_spawned,
        outcome.duration_ms
    );

    assert_eq!(outcome.found, expected);
    // prefix size 1, prefixes 1..=8 are feasible
    assert_eq!(outcome.workers_spawned, 8);
    assert_eq!(outcome.jobs_run, 8);
    assert!(outcome.found.keys().all(|t| !resolved.contains(*t)));
    // batch directory cleaned up
    assert!(list_dir(dir.path()).is_empty());
}

#[test]
fn test_failed_worker_leaves_store_untouched() {
    let dir = TempDir::new().unwrap();
    let store_path = dir.path().join("combo.bin");
    let alphabet = ten_weights();

    let mut store = CheckpointStore::open(&store_path, &alphabet).unwrap();
    store.extend(&inline_orchestrator(&dir.path().join("work")), 2).unwrap();
    let committed = std::fs::read(&store_path).unwrap();
    let before = store.snapshot().clone();

    let err = store
        .extend(&failing_orchestrator(&dir.path().join("work")), 4)
        .unwrap_err();
    let OrchestratorError::WorkerFailure(failure) = err else {
        panic!("expected a worker failure, got {:?}", err);
    };
    println!("{}", failure);
    assert_eq!(failure.length, 3);
    assert_eq!(failure.status.and_then(|s| s.code()), Some(3));
    assert!(std::fs::read_to_string(&failure.stderr)
        .unwrap()
        .contains("injected failure"));

    // nothing merged, nothing written
    assert_eq!(std::fs::read(&store_path).unwrap(), committed);
    assert_eq!(*store.snapshot(), before);
    store.close();
    assert_eq!(load_snapshot(&store_path).unwrap().unwrap(), before);
}

#[test]
fn test_extend_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let store_path = dir.path().join("combo.bin");
    let alphabet = ten_weights();
    let orch = process_orchestrator(&dir.path().join("work"), 2);

    let mut store = CheckpointStore::open(&store_path, &alphabet).unwrap();
    let first = store.extend(&orch, 4).unwrap();
    assert_eq!(first.to_len, 4);
    assert!(first.jobs_launched > 0);
    let bytes = std::fs::read(&store_path).unwrap();
    let modified = std::fs::metadata(&store_path).unwrap().modified().unwrap();

    let again = store.extend(&orch, 4).unwrap();
    assert_eq!(again.jobs_launched, 0);
    assert!(again.lengths.is_empty());
    store.close();

    let mut reopened = CheckpointStore::open(&store_path, &alphabet).unwrap();
    let third = reopened.extend(&orch, 3).unwrap();
    assert_eq!(third.jobs_launched, 0);
    reopened.close();

    assert_eq!(std::fs::read(&store_path).unwrap(), bytes);
    assert_eq!(std::fs::metadata(&store_path).unwrap().modified().unwrap(), modified);
}

#[test]
fn test_worker_and_inline_stores_agree() {
    let dir = TempDir::new().unwrap();
    let alphabet = ten_weights();

    let mut by_workers = CheckpointStore::open(dir.path().join("a.bin"), &alphabet).unwrap();
    by_workers
        .extend(&process_orchestrator(&dir.path().join("wa"), 4), 5)
        .unwrap();
    let mut inline = CheckpointStore::open(dir.path().join("b.bin"), &alphabet).unwrap();
    inline.extend(&inline_orchestrator(&dir.path().join("wb")), 5).unwrap();

    assert_eq!(by_workers.entries(), inline.entries());
    assert!(blockset_core::validate_map(inline.entries(), &alphabet).is_empty());
}

#[test]
fn test_reresolved_target_is_a_consistency_violation() {
    let dir = TempDir::new().unwrap();
    let store_path = dir.path().join("combo.bin");
    let work = dir.path().join("work");
    let alphabet = ten_weights();

    let mut store = CheckpointStore::open(&store_path, &alphabet).unwrap();
    store.extend(&inline_orchestrator(&work), 2).unwrap();
    let committed = std::fs::read(&store_path).unwrap();
    let before = store.snapshot().clone();
    assert_eq!(before.max_len, 2);

    let orch = BatchOrchestrator::new(config(&work, 2), Arc::new(ResolvedTargetLauncher));
    let err = store.extend(&orch, 3).unwrap_err();
    println!("{}", err);
    match &err {
        OrchestratorError::ConsistencyViolation { length, targets } => {
            assert_eq!(*length, 3);
            assert_eq!(targets, &vec![1]);
        }
        other => panic!("expected a consistency violation, got {:?}", other),
    }
    assert_eq!(err.kind().exit_code(), 65);

    assert_eq!(std::fs::read(&store_path).unwrap(), committed);
    assert_eq!(store.snapshot().max_len, 2);
    assert_eq!(*store.snapshot(), before);
    store.close();
}
