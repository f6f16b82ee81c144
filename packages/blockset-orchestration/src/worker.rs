//! Worker processes
//!
//! The orchestrator writes a [`BatchContext`] once per batch, then launches
//! one worker per job through a [`WorkerLauncher`]. A worker reads the
//! context, enumerates its job and atomically writes a [`WorkerArtifact`].
//! Anything else it prints goes to the job's log files.

use crate::error::{OrchestratorError, Result};
use crate::job::JobSpec;
use blockset_core::persist::{atomic_write_bincode, read_bincode};
use blockset_core::{enumerate, Alphabet, BestKnownMap, ResolvedSet, Weight};
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fs::File;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::Instant;
use tracing::{debug, info};

/// Shared, read-only input of every job in one batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchContext {
    pub alphabet: Alphabet,
    pub length: usize,
    pub resolved: ResolvedSet,
}

impl BatchContext {
    pub fn write_to(&self, path: &Path) -> Result<()> {
        Ok(atomic_write_bincode(path, self)?)
    }

    pub fn read_from(path: &Path) -> Result<Self> {
        Ok(read_bincode(path)?)
    }
}

/// Output of one job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerArtifact {
    pub length: usize,
    pub prefix: Vec<Weight>,
    pub found: BestKnownMap,
}

impl WorkerArtifact {
    pub fn read_from(path: &Path) -> Result<Self> {
        Ok(read_bincode(path)?)
    }
}

/// Work files of one job inside the batch directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobFiles {
    pub artifact: PathBuf,
    pub stdout: PathBuf,
    pub stderr: PathBuf,
}

impl JobFiles {
    pub fn new(dir: &Path, stem: &str) -> Self {
        Self {
            artifact: dir.join(format!("{}.bin", stem)),
            stdout: dir.join(format!("{}.out", stem)),
            stderr: dir.join(format!("{}.err", stem)),
        }
    }

    pub fn remove_artifact(&self) {
        let _ = std::fs::remove_file(&self.artifact);
    }

    pub fn remove_logs(&self) {
        let _ = std::fs::remove_file(&self.stdout);
        let _ = std::fs::remove_file(&self.stderr);
    }

    pub fn remove_all(&self) {
        self.remove_artifact();
        self.remove_logs();
    }
}

/// How a job becomes a running child process
pub trait WorkerLauncher: Send + Sync {
    fn launch(&self, context: &Path, job: &JobSpec, files: &JobFiles) -> Result<Child>;
}

/// Launches `<program> [base args] worker ...` as a separate process group
/// with stdin closed and stdout/stderr sent to the job's log files.
#[derive(Debug, Clone)]
pub struct WorkerBinary {
    program: PathBuf,
    base_args: Vec<OsString>,
}

impl WorkerBinary {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            base_args: Vec::new(),
        }
    }

    /// The running executable; used by `blockset-combo` to spawn itself.
    pub fn current_exe() -> Result<Self> {
        Ok(Self::new(std::env::current_exe()?))
    }

    pub fn with_base_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.base_args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn command(&self, context: &Path, job: &JobSpec, artifact: &Path) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.base_args)
            .arg("worker")
            .arg("--context")
            .arg(context)
            .arg("--length")
            .arg(job.length.to_string())
            .arg("--out")
            .arg(artifact);
        if !job.prefix.is_empty() {
            cmd.arg("--prefix").arg(csv(&job.prefix));
        }
        if !job.suffix.is_empty() {
            cmd.arg("--suffix").arg(csv(&job.suffix));
        }
        cmd
    }
}

impl WorkerLauncher for WorkerBinary {
    fn launch(&self, context: &Path, job: &JobSpec, files: &JobFiles) -> Result<Child> {
        let mut cmd = self.command(context, job, &files.artifact);
        cmd.stdin(Stdio::null())
            .stdout(File::create(&files.stdout)?)
            .stderr(File::create(&files.stderr)?)
            .process_group(0);
        Ok(cmd.spawn()?)
    }
}

fn csv(weights: &[Weight]) -> String {
    weights
        .iter()
        .map(|w| w.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// Worker entry point: enumerate one job and write its artifact.
///
/// Returns the number of sums found.
pub fn run_worker(
    context_path: &Path,
    length: usize,
    prefix: &[Weight],
    suffix: &[Weight],
    out: &Path,
) -> Result<usize> {
    let start = Instant::now();
    let context = BatchContext::read_from(context_path)?;
    if context.length != length {
        return Err(OrchestratorError::invalid(format!(
            "context is for length {}, worker asked for {}",
            context.length, length
        )));
    }
    if let Some(&w) = prefix
        .iter()
        .chain(suffix)
        .find(|&&w| !context.alphabet.contains(w))
    {
        return Err(OrchestratorError::invalid(format!(
            "weight {} is not in the batch alphabet",
            w
        )));
    }
    debug!(
        "Worker r={} prefix={:?} pool={} resolved={}",
        length,
        prefix,
        suffix.len(),
        context.resolved.len()
    );

    let found = enumerate(length, prefix, suffix, &context.resolved)?;
    let count = found.len();
    let artifact = WorkerArtifact {
        length,
        prefix: prefix.to_vec(),
        found,
    };
    atomic_write_bincode(out, &artifact)?;

    info!(
        "Worker r={} prefix={:?}: {} sums in {}ms",
        length,
        prefix,
        count,
        start.elapsed().as_millis()
    );
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn fib_context(length: usize) -> BatchContext {
        BatchContext {
            alphabet: Alphabet::new([1, 2, 3, 5, 8, 13], 1).unwrap(),
            length,
            resolved: ResolvedSet::from_targets([1, 2, 3, 5, 8, 13]),
        }
    }

    #[test]
    fn test_run_worker_writes_artifact() {
        let dir = TempDir::new().unwrap();
        let ctx_path = dir.path().join("ctx.bin");
        fib_context(2).write_to(&ctx_path).unwrap();

        let out = dir.path().join("job.bin");
        let count = run_worker(&ctx_path, 2, &[3], &[5, 8, 13], &out).unwrap();
        let artifact = WorkerArtifact::read_from(&out).unwrap();
        assert_eq!(artifact.found.len(), count);
        // 3+5 = 8 is already resolved
        assert!(!artifact.found.contains_key(&8));
        assert_eq!(artifact.found[&11].weights(), &[8, 3]);
        assert_eq!(artifact.found[&16].weights(), &[13, 3]);
    }

    #[test]
    fn test_run_worker_rejects_mismatched_length() {
        let dir = TempDir::new().unwrap();
        let ctx_path = dir.path().join("ctx.bin");
        fib_context(2).write_to(&ctx_path).unwrap();
        let out = dir.path().join("job.bin");

        let err = run_worker(&ctx_path, 3, &[], &[1, 2, 3], &out).unwrap_err();
        assert!(matches!(err, OrchestratorError::Invalid(_)));
        let err = run_worker(&ctx_path, 2, &[4], &[5], &out).unwrap_err();
        assert!(matches!(err, OrchestratorError::Invalid(_)));
        assert!(!out.exists());
    }

    #[test]
    fn test_worker_command_line() {
        let job = JobSpec {
            index: 0,
            length: 4,
            prefix: vec![1, 2],
            suffix: vec![5, 8],
        };
        let cmd = WorkerBinary::new("/bin/blockset-combo")
            .with_base_args(["-q"])
            .command(Path::new("ctx.bin"), &job, Path::new("out.bin"));
        let args: Vec<String> = cmd
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            args,
            vec![
                "-q", "worker", "--context", "ctx.bin", "--length", "4", "--out", "out.bin",
                "--prefix", "1,2", "--suffix", "5,8"
            ]
        );
    }

    #[test]
    fn test_job_files_layout() {
        let files = JobFiles::new(Path::new("/w/batch"), "r3-1-9-x");
        assert_eq!(files.artifact, PathBuf::from("/w/batch/r3-1-9-x.bin"));
        assert_eq!(files.stderr, PathBuf::from("/w/batch/r3-1-9-x.err"));
    }
}
