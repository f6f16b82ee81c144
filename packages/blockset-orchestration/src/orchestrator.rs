use crate::config::PipelineConfig;
use crate::error::{OrchestratorError, Result, WorkerFailure};
use crate::job::{plan_batch, BatchPlan, JobSpec};
use crate::signals::SignalTrap;
use crate::worker::{BatchContext, JobFiles, WorkerArtifact, WorkerLauncher};
use blockset_core::enumerator::resolved_overlap;
use blockset_core::stats::merge_into;
use blockset_core::{enumerate, Alphabet, BestKnownMap, ResolvedSet};
use std::path::{Path, PathBuf};
use std::process::{Child, ExitStatus};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Result of one length
#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    pub length: usize,
    /// Best decomposition of every newly resolved target
    pub found: BestKnownMap,
    /// Jobs executed (1 for an inline batch)
    pub jobs_run: usize,
    /// Worker processes spawned
    pub workers_spawned: usize,
    pub duration_ms: u64,
}

/// Runs one length at a time, inline or across worker processes
pub struct BatchOrchestrator {
    config: PipelineConfig,
    launcher: Arc<dyn WorkerLauncher>,
}

/// A spawned worker that has not been reaped yet
struct Running {
    job: JobSpec,
    files: JobFiles,
    child: Child,
}

/// Workers in flight. Dropping it kills and reaps whatever is left, so an
/// early return never leaves children behind.
struct InFlight<'t> {
    workers: Vec<Running>,
    trap: Option<&'t SignalTrap>,
}

impl InFlight<'_> {
    /// Poll worker `i`. A reaped pid leaves the signal registry in the same
    /// blocked section, so the handler never sees a pid that may be reused.
    fn try_reap(&mut self, i: usize) -> Result<Option<ExitStatus>> {
        let child = &mut self.workers[i].child;
        match self.trap {
            Some(trap) => trap.with_signals_blocked(|| {
                let status = child.try_wait()?;
                if status.is_some() {
                    trap.unregister(child.id());
                }
                Ok::<_, OrchestratorError>(status)
            })?,
            None => Ok(child.try_wait()?),
        }
    }

    fn kill_all(&mut self) {
        for mut w in self.workers.drain(..) {
            let pid = w.child.id();
            let _ = w.child.kill();
            match self.trap {
                Some(trap) => {
                    let reaped = trap.with_signals_blocked(|| {
                        let _ = w.child.wait();
                        trap.unregister(pid);
                    });
                    if reaped.is_err() {
                        let _ = w.child.wait();
                        trap.unregister(pid);
                    }
                }
                None => {
                    let _ = w.child.wait();
                }
            }
            w.files.remove_all();
            debug!("Killed worker {} ({})", pid, w.job);
        }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.kill_all();
    }
}

impl BatchOrchestrator {
    pub fn new(config: PipelineConfig, launcher: Arc<dyn WorkerLauncher>) -> Self {
        Self { config, launcher }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Best decomposition of length `r` for every target not in `resolved`.
    ///
    /// Any worker failure aborts the whole batch: other workers are killed
    /// and nothing is returned.
    pub fn run_batch(
        &self,
        alphabet: &Alphabet,
        r: usize,
        resolved: &ResolvedSet,
    ) -> Result<BatchOutcome> {
        let start = Instant::now();
        let parallelism = self.config.effective_parallelism();
        let plan = plan_batch(alphabet, r, parallelism, self.config.parallel_cutoff);

        let mut outcome = match plan {
            BatchPlan::Inline(job) => {
                info!("Length {}: inline ({} weights)", r, job.suffix.len());
                let found = enumerate(r, &job.prefix, &job.suffix, resolved)?;
                BatchOutcome {
                    length: r,
                    found,
                    jobs_run: 1,
                    ..BatchOutcome::default()
                }
            }
            BatchPlan::Partitioned { prefix_len, jobs } => {
                info!(
                    "Length {}: {} jobs with prefix size {} on {} workers",
                    r,
                    jobs.len(),
                    prefix_len,
                    parallelism
                );
                self.run_partitioned(alphabet, r, resolved, jobs, parallelism)?
            }
        };

        let overlap = resolved_overlap(&outcome.found, resolved);
        if !overlap.is_empty() {
            error!(
                "Length {} re-resolved {} targets, first {}",
                r,
                overlap.len(),
                overlap[0]
            );
            return Err(OrchestratorError::ConsistencyViolation {
                length: r,
                targets: overlap,
            });
        }

        outcome.duration_ms = start.elapsed().as_millis() as u64;
        info!(
            "Length {}: {} new targets from {} jobs in {}ms",
            r,
            outcome.found.len(),
            outcome.jobs_run,
            outcome.duration_ms
        );
        Ok(outcome)
    }

    fn run_partitioned(
        &self,
        alphabet: &Alphabet,
        r: usize,
        resolved: &ResolvedSet,
        jobs: Vec<JobSpec>,
        parallelism: usize,
    ) -> Result<BatchOutcome> {
        let batch_id = format!(
            "{}-{}",
            chrono::Utc::now().format("%Y%m%dT%H%M%S"),
            &Uuid::new_v4().simple().to_string()[..8]
        );
        let batch_dir = self.config.work_dir.join(format!("batch-{}", batch_id));
        std::fs::create_dir_all(&batch_dir)?;
        let context_path = batch_dir.join("context.bin");
        BatchContext {
            alphabet: alphabet.clone(),
            length: r,
            resolved: resolved.clone(),
        }
        .write_to(&context_path)?;

        let trap = if self.config.trap_signals {
            Some(SignalTrap::install()?)
        } else {
            None
        };
        let result = self.drive(
            &batch_dir,
            &context_path,
            &batch_id,
            r,
            jobs,
            parallelism,
            trap.as_ref(),
        );
        drop(trap);

        let _ = std::fs::remove_file(&context_path);
        match &result {
            // failed job logs stay for inspection
            Err(OrchestratorError::WorkerFailure(_)) => {}
            _ => {
                let _ = std::fs::remove_dir(&batch_dir);
            }
        }
        result
    }

    #[allow(clippy::too_many_arguments)]
    fn drive(
        &self,
        batch_dir: &Path,
        context_path: &Path,
        batch_id: &str,
        r: usize,
        jobs: Vec<JobSpec>,
        parallelism: usize,
        trap: Option<&SignalTrap>,
    ) -> Result<BatchOutcome> {
        let mut outcome = BatchOutcome {
            length: r,
            ..BatchOutcome::default()
        };
        let mut in_flight = InFlight {
            workers: Vec::with_capacity(parallelism),
            trap,
        };
        let mut pending = jobs.into_iter();

        loop {
            while in_flight.workers.len() < parallelism {
                let Some(job) = pending.next() else { break };
                let files = JobFiles::new(batch_dir, &job.file_stem(batch_id));
                let child = self.spawn(context_path, &job, &files, trap)?;
                debug!("Spawned worker {} for {}", child.id(), job);
                outcome.workers_spawned += 1;
                in_flight.workers.push(Running { job, files, child });
            }
            if in_flight.workers.is_empty() {
                break;
            }

            let mut reaped = false;
            let mut i = 0;
            while i < in_flight.workers.len() {
                let Some(status) = in_flight.try_reap(i)? else {
                    i += 1;
                    continue;
                };
                reaped = true;
                let done = in_flight.workers.swap_remove(i);
                let pid = done.child.id();
                match self.collect(r, &done, status) {
                    Ok(found) => {
                        let kept = merge_into(&mut outcome.found, found);
                        outcome.jobs_run += 1;
                        debug!("Worker {} done: {} kept ({})", pid, kept, done.job);
                        done.files.remove_all();
                    }
                    Err(failure) => {
                        error!("{}", failure);
                        warn!(
                            "Aborting length {}: killing {} other workers",
                            r,
                            in_flight.workers.len()
                        );
                        done.files.remove_artifact();
                        in_flight.kill_all();
                        return Err(OrchestratorError::worker_failure(failure));
                    }
                }
            }
            if !reaped {
                std::thread::sleep(self.config.poll_interval());
            }
        }
        Ok(outcome)
    }

    fn spawn(
        &self,
        context_path: &Path,
        job: &JobSpec,
        files: &JobFiles,
        trap: Option<&SignalTrap>,
    ) -> Result<Child> {
        match trap {
            Some(trap) => trap.with_signals_blocked(|| {
                let child = self.launcher.launch(context_path, job, files)?;
                if let Err(e) = trap.register(child.id()) {
                    let mut child = child;
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(e);
                }
                Ok(child)
            })?,
            None => self.launcher.launch(context_path, job, files),
        }
    }

    /// Artifact of a reaped worker, or the failure to report
    fn collect(
        &self,
        r: usize,
        done: &Running,
        status: ExitStatus,
    ) -> std::result::Result<BestKnownMap, WorkerFailure> {
        let failure = |status: Option<ExitStatus>| WorkerFailure {
            length: r,
            job: done.job.to_string(),
            pid: done.child.id(),
            status,
            stdout: done.files.stdout.clone(),
            stderr: done.files.stderr.clone(),
        };
        if !status.success() {
            return Err(failure(Some(status)));
        }
        match WorkerArtifact::read_from(&done.files.artifact) {
            Ok(artifact) if artifact.length == r && artifact.prefix == done.job.prefix => {
                Ok(artifact.found)
            }
            Ok(_) => Err(failure(None)),
            Err(e) => {
                warn!("Unreadable artifact {}: {}", done.files.artifact.display(), e);
                Err(failure(None))
            }
        }
    }
}

/// Batch directories left behind by failed runs
pub fn stale_batch_dirs(work_dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(work_dir) else {
        return Vec::new();
    };
    let mut dirs: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.is_dir()
                && p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with("batch-"))
        })
        .collect();
    dirs.sort();
    dirs
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;
    use tempfile::TempDir;

    /// Runs `sh -c <script>` instead of a real worker
    struct ShellLauncher(&'static str);

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

    fn config(dir: &Path, cutoff: usize) -> PipelineConfig {
        PipelineConfig {
            parallelism: 2,
            parallel_cutoff: cutoff,
            work_dir: dir.to_path_buf(),
            poll_interval_ms: 5,
            trap_signals: false,
            compression_level: 9,
        }
    }

    fn running(dir: &Path, script: &str, trap: &SignalTrap) -> Running {
        let child = trap
            .with_signals_blocked(|| {
                let child = Command::new("sh").arg("-c").arg(script).spawn().unwrap();
                trap.register(child.id()).unwrap();
                child
            })
            .unwrap();
        Running {
            job: JobSpec {
                index: 0,
                length: 1,
                prefix: Vec::new(),
                suffix: vec![1],
            },
            files: JobFiles::new(dir, &format!("r1-{}", child.id())),
            child,
        }
    }

    #[test]
    fn test_reaped_workers_leave_the_signal_registry() {
        let _guard = crate::signals::serial_guard();
        let dir = TempDir::new().unwrap();
        let trap = SignalTrap::install().unwrap();
        let mut in_flight = InFlight {
            workers: vec![running(dir.path(), "exit 0", &trap), running(dir.path(), "exec sleep 30", &trap)],
            trap: Some(&trap),
        };
        let sleeper = in_flight.workers[1].child.id();
        assert_eq!(trap.registered().len(), 2);

        let status = loop {
            if let Some(status) = in_flight.try_reap(0).unwrap() {
                break status;
            }
            std::thread::sleep(std::time::Duration::from_millis(5));
        };
        assert!(status.success());
        assert_eq!(trap.registered(), vec![sleeper]);
        assert!(in_flight.try_reap(1).unwrap().is_none());

        in_flight.workers.swap_remove(0);
        in_flight.kill_all();
        assert!(in_flight.workers.is_empty());
        assert!(trap.registered().is_empty());
    }

    #[test]
    fn test_inline_batch_needs_no_launcher() {
        let dir = TempDir::new().unwrap();
        let orch = BatchOrchestrator::new(config(dir.path(), 6), Arc::new(ShellLauncher("exit 9")));
        let a = Alphabet::new([1, 2, 3, 5, 8, 13], 1).unwrap();
        let resolved = ResolvedSet::from_targets([1, 2, 3, 5, 8, 13]);
        let outcome = orch.run_batch(&a, 2, &resolved).unwrap();
        assert_eq!(outcome.jobs_run, 1);
        assert_eq!(outcome.workers_spawned, 0);
        assert_eq!(outcome.found[&4].weights(), &[3, 1]);
    }

    #[test]
    fn test_failing_worker_aborts_batch() {
        let dir = TempDir::new().unwrap();
        let orch = BatchOrchestrator::new(config(dir.path(), 0), Arc::new(ShellLauncher("echo boom >&2; exit 3")));
        let a = Alphabet::new(1..=10, 1).unwrap();
        let err = orch.run_batch(&a, 3, &ResolvedSet::new()).unwrap_err();
        let OrchestratorError::WorkerFailure(failure) = err else {
            panic!("expected a worker failure, got {:?}", err);
        };
        assert_eq!(failure.length, 3);
        assert_eq!(failure.status.and_then(|s| s.code()), Some(3));
        assert_eq!(std::fs::read_to_string(&failure.stderr).unwrap().trim(), "boom");
        // only the failed job's logs remain
        let batch = stale_batch_dirs(dir.path());
        assert_eq!(batch.len(), 1);
        let left: Vec<_> = std::fs::read_dir(&batch[0]).unwrap().collect();
        assert_eq!(left.len(), 2);
    }

    #[test]
    fn test_clean_exit_without_artifact_is_a_failure() {
        let dir = TempDir::new().unwrap();
        let orch = BatchOrchestrator::new(config(dir.path(), 0), Arc::new(ShellLauncher("exit 0")));
        let a = Alphabet::new(1..=10, 1).unwrap();
        let err = orch.run_batch(&a, 3, &ResolvedSet::new()).unwrap_err();
        match err {
            OrchestratorError::WorkerFailure(failure) => assert!(failure.status.is_none()),
            other => panic!("unexpected {:?}", other),
        }
    }
}
