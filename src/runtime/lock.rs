//! Sentinel-file lock protocol.
//!
//! A writer and one or more readers of the same group coordinate through
//! zero-content marker files next to the target: `<target>.writing`, one
//! `<target>.reading-<peer>` per expected reader, and `<target>.done`
//! written once at writer finalize. Only rank 0 of a session touches the
//! files; a collective barrier distributes the outcome to the other ranks.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::trace;

use crate::error::CoupleError;
use crate::runtime::transport::{Mode, Timeout};
use crate::runtime::Collective;

pub const WRITING_SUFFIX: &str = ".writing";
pub const READING_SUFFIX: &str = ".reading";
pub const DONE_SUFFIX: &str = ".done";

fn touch(path: &Path) -> io::Result<()> {
    fs::File::create(path).map(|_| ())
}

fn remove_quiet(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => trace!(path = %path.display(), error = %e, "sentinel removal failed"),
    }
}

/// Sentinel file names derived from a group target.
#[derive(Debug, Clone)]
pub struct LockPaths {
    pub target: PathBuf,
    pub writing: PathBuf,
    pub my_reading: PathBuf,
    pub all_reading: Vec<PathBuf>,
    pub done: PathBuf,
}

impl LockPaths {
    pub fn new(target: &str, codename: &str, peers: &[String]) -> LockPaths {
        let my_reading = PathBuf::from(format!("{target}{READING_SUFFIX}-{codename}"));
        let all_reading = if peers.is_empty() {
            vec![my_reading.clone()]
        } else {
            peers
                .iter()
                .map(|p| PathBuf::from(format!("{target}{READING_SUFFIX}-{p}")))
                .collect()
        };
        LockPaths {
            target: PathBuf::from(target),
            writing: PathBuf::from(format!("{target}{WRITING_SUFFIX}")),
            my_reading,
            all_reading,
            done: PathBuf::from(format!("{target}{DONE_SUFFIX}")),
        }
    }
}

/// One group's lock protocol instance.
#[derive(Clone)]
pub struct LockProtocol {
    group: String,
    paths: LockPaths,
    poll: Duration,
    confirm_rounds: u32,
    collective: Arc<dyn Collective>,
}

impl LockProtocol {
    pub fn new(
        group: &str,
        target: &str,
        codename: &str,
        peers: &[String],
        poll: Duration,
        collective: Arc<dyn Collective>,
    ) -> LockProtocol {
        LockProtocol {
            group: group.to_string(),
            paths: LockPaths::new(target, codename, peers),
            poll,
            confirm_rounds: 3,
            collective,
        }
    }

    pub fn paths(&self) -> &LockPaths {
        &self.paths
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll
    }

    pub fn done_exists(&self) -> bool {
        self.paths.done.exists()
    }

    /// Touch the done sentinel, exactly once per writer finalize.
    pub fn mark_done(&self) -> io::Result<()> {
        if self.collective.rank() == 0 {
            touch(&self.paths.done)?;
        }
        Ok(())
    }

    /// Inner polling interval: a fraction of the configured step-retry
    /// interval, bounded below so the loop never degenerates to a spin.
    fn inner_poll(&self) -> Duration {
        (self.poll / 10).max(Duration::from_millis(1))
    }

    /// Acquire the lock for `mode`. On success the returned guard owns the
    /// sentinel this rank created and removes it on every exit path.
    pub fn acquire(&self, mode: Mode, timeout: Timeout) -> Result<SentinelGuard, CoupleError> {
        if self.collective.rank() == 0 {
            match mode {
                Mode::Write => self.wait_for_write(timeout)?,
                Mode::Read => self.wait_for_read(timeout)?,
            }
        }
        self.collective.barrier();
        let sentinel = match mode {
            Mode::Write => self.paths.writing.clone(),
            Mode::Read => self.paths.my_reading.clone(),
        };
        trace!(group = %self.group, ?mode, "lock acquired");
        Ok(SentinelGuard {
            sentinel,
            collective: self.collective.clone(),
            released: false,
        })
    }

    /// Declare write intent, then wait until every expected reader sentinel
    /// is absent. One optimistic re-scan catches a reader that showed up
    /// mid-wait.
    fn wait_for_write(&self, timeout: Timeout) -> Result<(), CoupleError> {
        let started = Instant::now();
        let deadline = timeout.deadline();
        touch(&self.paths.writing).map_err(CoupleError::Io)?;

        let result = (|| loop {
            for reader in &self.paths.all_reading {
                self.wait_while(deadline, started, || reader.exists())?;
            }
            if !self.paths.all_reading.iter().any(|r| r.exists()) {
                return Ok(());
            }
        })();

        if result.is_err() {
            remove_quiet(&self.paths.writing);
        }
        result
    }

    /// Wait for the target to exist and the writer to be quiet, then
    /// declare read intent and confirm the writer stayed quiet. If the
    /// writer reappears during confirmation the declaration is withdrawn
    /// and the wait restarts.
    fn wait_for_read(&self, timeout: Timeout) -> Result<(), CoupleError> {
        let started = Instant::now();
        let deadline = timeout.deadline();

        self.wait_while(deadline, started, || !self.paths.target.exists())?;

        loop {
            self.wait_while(deadline, started, || self.paths.writing.exists())?;
            touch(&self.paths.my_reading).map_err(CoupleError::Io)?;

            let mut redo = false;
            for _ in 0..self.confirm_rounds {
                if self.paths.writing.exists() {
                    redo = true;
                    break;
                }
                std::thread::sleep(Duration::from_millis(1));
            }
            if !redo {
                return Ok(());
            }
            remove_quiet(&self.paths.my_reading);
        }
    }

    fn wait_while(
        &self,
        deadline: Option<Instant>,
        started: Instant,
        condition: impl Fn() -> bool,
    ) -> Result<(), CoupleError> {
        loop {
            if !condition() {
                return Ok(());
            }
            if let Some(d) = deadline {
                if Instant::now() >= d {
                    return Err(CoupleError::SyncTimeout {
                        group: self.group.clone(),
                        waited: started.elapsed(),
                    });
                }
            }
            std::thread::sleep(self.inner_poll());
        }
    }
}

/// Owns the sentinel created during acquisition. Release runs on drop too,
/// so no exit path leaves a stale lock behind; the collective barrier keeps
/// peers from racing past a rank that has not released yet.
pub struct SentinelGuard {
    sentinel: PathBuf,
    collective: Arc<dyn Collective>,
    released: bool,
}

impl std::fmt::Debug for SentinelGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SentinelGuard")
            .field("sentinel", &self.sentinel)
            .field("released", &self.released)
            .finish_non_exhaustive()
    }
}

impl SentinelGuard {
    pub fn release(mut self) {
        self.release_now();
    }

    fn release_now(&mut self) {
        if self.released {
            return;
        }
        self.collective.barrier();
        if self.collective.rank() == 0 {
            remove_quiet(&self.sentinel);
        }
        self.released = true;
    }
}

impl Drop for SentinelGuard {
    fn drop(&mut self) {
        self.release_now();
    }
}
