use crate::config::ConfigError;
use blockset_core::{CoreError, Target};
use std::path::PathBuf;
use std::process::ExitStatus;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, OrchestratorError>;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Store {} is locked by another process", .path.display())]
    LockContention { path: PathBuf },

    #[error("{0}")]
    WorkerFailure(Box<WorkerFailure>),

    #[error("Consistency violation at length {length}: {} target(s) resolved twice, first {}", .targets.len(), .targets.first().copied().unwrap_or_default())]
    ConsistencyViolation { length: usize, targets: Vec<Target> },

    #[error("Store {} was built for a different alphabet", .path.display())]
    AlphabetMismatch { path: PathBuf },

    #[error("Corrupt store {}: {reason}", .path.display())]
    CorruptStore { path: PathBuf, reason: String },

    #[error("Signal trap: {0}")]
    Signal(String),

    #[error("Invalid argument: {0}")]
    Invalid(String),

    #[error("Core error: {0}")]
    Core(#[from] CoreError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Bincode error: {0}")]
    Bincode(#[from] Box<bincode::ErrorKind>),
}

/// Everything known about a worker that did not produce its artifact
#[derive(Debug, Clone)]
pub struct WorkerFailure {
    pub length: usize,
    pub job: String,
    pub pid: u32,
    /// `None` when the worker exited cleanly but left no artifact
    pub status: Option<ExitStatus>,
    pub stdout: PathBuf,
    pub stderr: PathBuf,
}

impl std::fmt::Display for WorkerFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Worker {} for length {} job {} ", self.pid, self.length, self.job)?;
        match self.status {
            Some(status) => write!(f, "failed ({})", status)?,
            None => write!(f, "exited without an artifact")?,
        }
        write!(
            f,
            "; logs: {} {}",
            self.stdout.display(),
            self.stderr.display()
        )
    }
}

impl OrchestratorError {
    pub fn invalid<E: std::fmt::Display>(e: E) -> Self {
        Self::Invalid(e.to_string())
    }

    pub fn signal<E: std::fmt::Display>(e: E) -> Self {
        Self::Signal(e.to_string())
    }

    pub fn corrupt_store<E: std::fmt::Display>(path: impl Into<PathBuf>, e: E) -> Self {
        Self::CorruptStore {
            path: path.into(),
            reason: e.to_string(),
        }
    }

    pub fn worker_failure(failure: WorkerFailure) -> Self {
        Self::WorkerFailure(Box::new(failure))
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::LockContention { .. } => ErrorKind::LockContention,
            Self::WorkerFailure(_) => ErrorKind::WorkerFailure,
            Self::ConsistencyViolation { .. } => ErrorKind::ConsistencyViolation,
            Self::Signal(_) => ErrorKind::Signal,
            Self::Io(_) => ErrorKind::IoFailure,
            Self::Core(CoreError::Io(_)) => ErrorKind::IoFailure,
            Self::AlphabetMismatch { .. }
            | Self::CorruptStore { .. }
            | Self::Invalid(_)
            | Self::Core(_)
            | Self::Config(_)
            | Self::Bincode(_) => ErrorKind::Invalid,
        }
    }
}

/// Error classification, used by the binary to pick an exit status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Another process holds the store lock
    LockContention,
    /// A worker died or produced nothing; nothing was committed
    WorkerFailure,
    /// Resolved sets overlap; the store is left at its last commit
    ConsistencyViolation,
    /// The signal trap could not be installed
    Signal,
    IoFailure,
    /// Bad input, configuration or on-disk data
    Invalid,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::LockContention => "lock_contention",
            ErrorKind::WorkerFailure => "worker_failure",
            ErrorKind::ConsistencyViolation => "consistency_violation",
            ErrorKind::Signal => "signal",
            ErrorKind::IoFailure => "io_failure",
            ErrorKind::Invalid => "invalid",
        }
    }

    /// sysexits-style process exit status
    pub fn exit_code(&self) -> i32 {
        match self {
            ErrorKind::LockContention => 75,
            ErrorKind::WorkerFailure => 70,
            ErrorKind::ConsistencyViolation => 65,
            ErrorKind::Signal => 71,
            ErrorKind::IoFailure => 74,
            ErrorKind::Invalid => 64,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
