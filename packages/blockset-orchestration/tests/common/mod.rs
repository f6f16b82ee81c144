//! Common test utilities for blockset-orchestration
//!
//! Fixtures for alphabets and orchestrators, and process helpers for tests
//! that run the real `blockset-combo` binary.

#![allow(dead_code)]

use blockset_core::Alphabet;
use blockset_orchestration::{
    BatchOrchestrator, JobFiles, JobSpec, PipelineConfig, Result, WorkerBinary, WorkerLauncher,
};
use std::path::{Path, PathBuf};
use std::process::{Child, Command};
use std::sync::Arc;

pub const COMBO_BIN: &str = env!("CARGO_BIN_EXE_blockset-combo");

pub fn ten_weights() -> Alphabet {
    Alphabet::new([1, 2, 4, 7, 11, 16, 22, 29, 37, 46], 1).unwrap()
}

/// Partition every batch (cutoff 0) across real worker processes.
pub fn config(work_dir: &Path, parallelism: usize) -> PipelineConfig {
    PipelineConfig {
        parallelism,
        parallel_cutoff: 0,
        work_dir: work_dir.to_path_buf(),
        poll_interval_ms: 5,
        trap_signals: false,
        compression_level: 9,
    }
}

pub fn process_orchestrator(work_dir: &Path, parallelism: usize) -> BatchOrchestrator {
    BatchOrchestrator::new(
        config(work_dir, parallelism),
        Arc::new(WorkerBinary::new(COMBO_BIN)),
    )
}

/// Everything runs in the orchestrator process.
pub fn inline_orchestrator(work_dir: &Path) -> BatchOrchestrator {
    BatchOrchestrator::new(config(work_dir, 1), Arc::new(WorkerBinary::new(COMBO_BIN)))
}

/// Spawns `sh -c <script>` for every job
pub struct ShellLauncher(pub &'static str);

impl WorkerLauncher for ShellLauncher {
    fn launch(&self, _context: &Path, _job: &JobSpec, files: &JobFiles) -> Result<Child> {
        Ok(Command::new("sh")
            .arg("-c")
            .arg(self.0)
            .stdout(std::fs::File::create(&files.stdout)?)
            .stderr(std::fs::File::create(&files.stderr)?)
            .spawn()?)
    }
}

pub fn failing_orchestrator(work_dir: &Path) -> BatchOrchestrator {
    BatchOrchestrator::new(
        config(work_dir, 2),
        Arc::new(ShellLauncher("echo 'injected failure' >&2; exit 3")),
    )
}

/// Files directly inside `dir`, sorted
pub fn list_dir(dir: &Path) -> Vec<PathBuf> {
    let mut out: Vec<PathBuf> = std::fs::read_dir(dir)
        .map(|it| it.filter_map(|e| e.ok()).map(|e| e.path()).collect())
        .unwrap_or_default();
    out.sort();
    out
}

/// Pids of live processes whose command line contains every needle
#[cfg(target_os = "linux")]
pub fn processes_matching(needles: &[&str]) -> Vec<u32> {
    let mut pids = Vec::new();
    let Ok(entries) = std::fs::read_dir("/proc") else {
        return pids;
    };
    for entry in entries.filter_map(|e| e.ok()) {
        let Some(pid) = entry.file_name().to_str().and_then(|s| s.parse::<u32>().ok()) else {
            continue;
        };
        let Ok(raw) = std::fs::read(entry.path().join("cmdline")) else {
            continue;
        };
        let cmdline = String::from_utf8_lossy(&raw).replace('\0', " ");
        if !cmdline.is_empty() && needles.iter().all(|n| cmdline.contains(n)) {
            pids.push(pid);
        }
    }
    pids
}
