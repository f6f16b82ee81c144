//! Process-wide signal trap for batch runs
//!
//! While a [`SignalTrap`] is alive, SIGINT, SIGTERM, SIGABRT, SIGBUS and
//! SIGSEGV run a handler that SIGKILLs and reaps every registered worker,
//! restores the previous dispositions and exits with `128 + signal`. Only
//! async-signal-safe calls (`kill`, `waitpid`, `sigaction`, `_exit`) and
//! atomics are used inside the handler.
//!
//! At most one trap exists per process; dropping it restores the previous
//! dispositions.

use crate::error::{OrchestratorError, Result};
use libc::c_int;
use std::cell::UnsafeCell;
use std::io;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering};

/// Signals that tear down the batch
pub const TRAPPED_SIGNALS: [c_int; 5] = [
    libc::SIGINT,
    libc::SIGTERM,
    libc::SIGABRT,
    libc::SIGBUS,
    libc::SIGSEGV,
];

/// Upper bound on simultaneously registered workers
pub const MAX_WORKERS: usize = 1024;

static TRAP_HELD: AtomicBool = AtomicBool::new(false);

/// Leading entries of [`TRAPPED_SIGNALS`] whose disposition is saved
static INSTALLED: AtomicUsize = AtomicUsize::new(0);

#[allow(clippy::declare_interior_mutable_const)]
const EMPTY_SLOT: AtomicI32 = AtomicI32::new(0);
static WORKERS: [AtomicI32; MAX_WORKERS] = [EMPTY_SLOT; MAX_WORKERS];

/// Dispositions replaced by the trap, one per entry of [`TRAPPED_SIGNALS`]
struct SavedActions(UnsafeCell<[MaybeUninit<libc::sigaction>; TRAPPED_SIGNALS.len()]>);

// Written only by the trap holder before the handler is installed, read by
// the handler and by `Drop` after that.
unsafe impl Sync for SavedActions {}

static PREVIOUS: SavedActions =
    SavedActions(UnsafeCell::new([MaybeUninit::uninit(); TRAPPED_SIGNALS.len()]));

/// Installed signal handler; see the module docs.
pub struct SignalTrap {
    _private: (),
}

impl SignalTrap {
    pub fn install() -> Result<Self> {
        if TRAP_HELD
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(OrchestratorError::signal("a signal trap is already installed"));
        }
        for slot in WORKERS.iter() {
            slot.store(0, Ordering::Relaxed);
        }

        INSTALLED.store(0, Ordering::Release);
        let trap = SignalTrap { _private: () };
        // SAFETY: zeroed sigaction is a valid "default, empty mask" value;
        // PREVIOUS is only written here while TRAP_HELD is ours.
        let failed = unsafe {
            let mut action: libc::sigaction = std::mem::zeroed();
            action.sa_sigaction = handle_signal as extern "C" fn(c_int) as libc::sighandler_t;
            action.sa_flags = libc::SA_ONSTACK;
            libc::sigemptyset(&mut action.sa_mask);
            for &sig in TRAPPED_SIGNALS.iter() {
                libc::sigaddset(&mut action.sa_mask, sig);
            }

            let saved = PREVIOUS.0.get().cast::<libc::sigaction>();
            let mut failed = None;
            for (i, &sig) in TRAPPED_SIGNALS.iter().enumerate() {
                if libc::sigaction(sig, &action, saved.add(i)) != 0 {
                    failed = Some((sig, io::Error::last_os_error()));
                    break;
                }
                INSTALLED.store(i + 1, Ordering::Release);
            }
            failed
        };
        if let Some((sig, err)) = failed {
            // Drop restores the signals already replaced
            drop(trap);
            return Err(OrchestratorError::signal(format!(
                "sigaction({}) failed: {}",
                sig, err
            )));
        }
        Ok(trap)
    }

    /// Record a worker pid for teardown on signal.
    pub fn register(&self, pid: u32) -> Result<()> {
        let pid = i32::try_from(pid).map_err(OrchestratorError::invalid)?;
        for slot in WORKERS.iter() {
            if slot
                .compare_exchange(0, pid, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                return Ok(());
            }
        }
        Err(OrchestratorError::invalid(format!(
            "more than {} workers registered",
            MAX_WORKERS
        )))
    }

    /// Forget a worker that has been reaped.
    pub fn unregister(&self, pid: u32) {
        let Ok(pid) = i32::try_from(pid) else {
            return;
        };
        for slot in WORKERS.iter() {
            if slot
                .compare_exchange(pid, 0, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                return;
            }
        }
    }

    pub fn registered(&self) -> Vec<u32> {
        WORKERS
            .iter()
            .map(|slot| slot.load(Ordering::Acquire))
            .filter(|&pid| pid > 0)
            .map(|pid| pid as u32)
            .collect()
    }

    /// Run `f` with the trapped signals blocked on this thread, so a spawn
    /// and its registration are not split by the handler.
    pub fn with_signals_blocked<T>(&self, f: impl FnOnce() -> T) -> Result<T> {
        // SAFETY: plain sigset manipulation on locals.
        unsafe {
            let mut block: libc::sigset_t = std::mem::zeroed();
            let mut old: libc::sigset_t = std::mem::zeroed();
            libc::sigemptyset(&mut block);
            for &sig in TRAPPED_SIGNALS.iter() {
                libc::sigaddset(&mut block, sig);
            }
            if libc::pthread_sigmask(libc::SIG_BLOCK, &block, &mut old) != 0 {
                return Err(OrchestratorError::signal("pthread_sigmask failed"));
            }
            let out = f();
            libc::pthread_sigmask(libc::SIG_SETMASK, &old, std::ptr::null_mut());
            Ok(out)
        }
    }
}

impl Drop for SignalTrap {
    fn drop(&mut self) {
        // SAFETY: restores exactly the dispositions saved by `install`.
        unsafe { restore_previous() };
        for slot in WORKERS.iter() {
            slot.store(0, Ordering::Relaxed);
        }
        TRAP_HELD.store(false, Ordering::Release);
    }
}

unsafe fn restore_previous() {
    let count = INSTALLED.swap(0, Ordering::AcqRel);
    let saved = PREVIOUS.0.get().cast::<libc::sigaction>();
    for (i, &sig) in TRAPPED_SIGNALS.iter().enumerate().take(count) {
        libc::sigaction(sig, saved.add(i), std::ptr::null_mut());
    }
}

extern "C" fn handle_signal(sig: c_int) {
    for slot in WORKERS.iter() {
        let pid = slot.swap(0, Ordering::AcqRel);
        if pid > 0 {
            // SAFETY: kill and waitpid are async-signal-safe; pid is our child.
            unsafe {
                libc::kill(pid, libc::SIGKILL);
                libc::waitpid(pid, std::ptr::null_mut(), 0);
            }
        }
    }
    // SAFETY: sigaction and _exit are async-signal-safe.
    unsafe {
        restore_previous();
        libc::_exit(128 + sig);
    }
}

/// The trap is process-wide; tests that install it take this lock.
#[cfg(test)]
pub(crate) fn serial_guard() -> std::sync::MutexGuard<'static, ()> {
    static SERIAL: std::sync::Mutex<()> = std::sync::Mutex::new(());
    SERIAL.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_trap_per_process() {
        let _guard = serial_guard();
        let trap = SignalTrap::install().unwrap();
        assert!(matches!(SignalTrap::install(), Err(OrchestratorError::Signal(_))));
        drop(trap);
        let again = SignalTrap::install().unwrap();
        drop(again);
    }

    #[test]
    fn test_register_and_unregister() {
        let _guard = serial_guard();
        let trap = SignalTrap::install().unwrap();
        trap.register(1234).unwrap();
        trap.register(5678).unwrap();
        let mut pids = trap.registered();
        pids.sort_unstable();
        assert_eq!(pids, vec![1234, 5678]);
        trap.unregister(1234);
        assert_eq!(trap.registered(), vec![5678]);
        drop(trap);

        let trap = SignalTrap::install().unwrap();
        assert!(trap.registered().is_empty());
    }

    #[test]
    fn test_drop_restores_previous_disposition() {
        let _guard = serial_guard();
        let current = || unsafe {
            let mut action: libc::sigaction = std::mem::zeroed();
            libc::sigaction(libc::SIGTERM, std::ptr::null(), &mut action);
            action.sa_sigaction
        };
        let before = current();
        let trap = SignalTrap::install().unwrap();
        assert_eq!(current(), handle_signal as extern "C" fn(c_int) as libc::sighandler_t);
        drop(trap);
        assert_eq!(current(), before);
    }

    #[test]
    fn test_blocked_section_runs() {
        let _guard = serial_guard();
        let trap = SignalTrap::install().unwrap();
        assert_eq!(trap.with_signals_blocked(|| 7).unwrap(), 7);
    }
}
