//! Incremental checkpoint store
//!
//! One bincode file holding every best decomposition found so far, grown one
//! length at a time. The store is replaced atomically after each length, so
//! the file on disk always equals the last committed length. An exclusive
//! `flock` on `<path>.lck` is held from `open` to `close`.

use crate::error::{OrchestratorError, Result};
use crate::orchestrator::BatchOrchestrator;
use blockset_core::persist::atomic_write_bincode;
use blockset_core::stats::merge_into;
use blockset_core::{Alphabet, BestKnownMap, ResolvedSet};
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const STORE_FORMAT_VERSION: u32 = 1;

/// On-disk content of a store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub format_version: u32,
    pub alphabet: Alphabet,
    /// Every length up to this one has been searched
    pub max_len: usize,
    pub entries: BestKnownMap,
}

impl StoreSnapshot {
    pub fn empty(alphabet: Alphabet) -> Self {
        Self {
            format_version: STORE_FORMAT_VERSION,
            alphabet,
            max_len: 0,
            entries: BestKnownMap::new(),
        }
    }

    /// Longest searched length: the recorded one, or the longest stored
    /// decomposition if that is larger.
    pub fn prev_max_len(&self) -> usize {
        let longest = self.entries.values().map(|d| d.len()).max().unwrap_or(0);
        self.max_len.max(longest)
    }

    pub fn resolved(&self) -> ResolvedSet {
        self.entries.keys().copied().collect()
    }
}

/// Read a store without taking its lock; `None` when the file is missing.
pub fn load_snapshot(path: &Path) -> Result<Option<StoreSnapshot>> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let snapshot: StoreSnapshot = bincode::deserialize_from(BufReader::new(file))
        .map_err(|e| OrchestratorError::corrupt_store(path, e))?;
    if snapshot.format_version != STORE_FORMAT_VERSION {
        return Err(OrchestratorError::corrupt_store(
            path,
            format!("unsupported format version {}", snapshot.format_version),
        ));
    }
    Ok(Some(snapshot))
}

/// Write a snapshot atomically (used by `merge` tooling; stores use
/// [`CheckpointStore::extend`]).
pub fn write_snapshot(path: &Path, snapshot: &StoreSnapshot) -> Result<()> {
    Ok(atomic_write_bincode(path, snapshot)?)
}

pub fn lock_path(path: &Path) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(".lck");
    PathBuf::from(name)
}

/// Exclusive advisory lock, released on drop
#[derive(Debug)]
struct StoreLock {
    file: File,
}

impl StoreLock {
    fn acquire(store: &Path) -> Result<Self> {
        let path = lock_path(store);
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)?;
        // SAFETY: flock on a descriptor we own.
        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if rc != 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::WouldBlock {
                return Err(OrchestratorError::LockContention {
                    path: store.to_path_buf(),
                });
            }
            return Err(err.into());
        }
        Ok(Self { file })
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        // SAFETY: see `acquire`; closing the file would release it as well.
        unsafe { libc::flock(self.file.as_raw_fd(), libc::LOCK_UN) };
    }
}

/// Per-length line of an [`ExtendReport`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LengthReport {
    pub length: usize,
    pub new_targets: usize,
    pub jobs_run: usize,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtendReport {
    pub from_len: usize,
    pub to_len: usize,
    pub lengths: Vec<LengthReport>,
    /// Jobs run over all lengths (0 when nothing was left to do)
    pub jobs_launched: usize,
    pub total_targets: usize,
}

/// Locked, incrementally extended store
#[derive(Debug)]
pub struct CheckpointStore {
    path: PathBuf,
    snapshot: StoreSnapshot,
    _lock: StoreLock,
}

impl CheckpointStore {
    /// Lock and load the store at `path`.
    ///
    /// A missing file is an empty store. The store must have been built for
    /// `alphabet`.
    pub fn open(path: impl Into<PathBuf>, alphabet: &Alphabet) -> Result<Self> {
        let path = path.into();
        let lock = StoreLock::acquire(&path)?;
        let snapshot = match load_snapshot(&path)? {
            Some(s) if s.alphabet != *alphabet => {
                return Err(OrchestratorError::AlphabetMismatch { path });
            }
            Some(s) => s,
            None => StoreSnapshot::empty(alphabet.clone()),
        };
        info!(
            "Opened store {} ({} targets, searched up to length {})",
            path.display(),
            snapshot.entries.len(),
            snapshot.prev_max_len()
        );
        Ok(Self {
            path,
            snapshot,
            _lock: lock,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn snapshot(&self) -> &StoreSnapshot {
        &self.snapshot
    }

    pub fn entries(&self) -> &BestKnownMap {
        &self.snapshot.entries
    }

    pub fn prev_max_len(&self) -> usize {
        self.snapshot.prev_max_len()
    }

    /// Search every length in `prev_max_len + 1 ..= max_len`, committing
    /// after each one. On error the store keeps its last committed state.
    pub fn extend(&mut self, orchestrator: &BatchOrchestrator, max_len: usize) -> Result<ExtendReport> {
        let from_len = self.prev_max_len();
        let mut report = ExtendReport {
            from_len,
            to_len: from_len,
            ..ExtendReport::default()
        };
        if max_len <= from_len {
            info!(
                "Store {} already searched up to length {}",
                self.path.display(),
                from_len
            );
            report.total_targets = self.snapshot.entries.len();
            return Ok(report);
        }

        for r in from_len + 1..=max_len {
            let resolved = self.snapshot.resolved();
            let outcome = orchestrator.run_batch(&self.snapshot.alphabet, r, &resolved)?;

            let mut next = self.snapshot.clone();
            let new_targets = outcome.found.len();
            merge_into(&mut next.entries, outcome.found);
            next.max_len = r;
            atomic_write_bincode(&self.path, &next)?;
            self.snapshot = next;

            if new_targets == 0 {
                warn!("Length {}: no new targets", r);
            }
            info!(
                "Committed length {}: +{} targets, {} total",
                r,
                new_targets,
                self.snapshot.entries.len()
            );
            report.lengths.push(LengthReport {
                length: r,
                new_targets,
                jobs_run: outcome.jobs_run,
                duration_ms: outcome.duration_ms,
            });
            report.jobs_launched += outcome.jobs_run;
            report.to_len = r;
        }
        report.total_targets = self.snapshot.entries.len();
        Ok(report)
    }

    /// Release the lock.
    pub fn close(self) {
        drop(self);
    }
}
