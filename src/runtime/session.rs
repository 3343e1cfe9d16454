//! Per-group coupling session: Unopened -> Opened(mode) -> Closed.

use std::fs;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, trace};

use crate::error::CoupleError;
use crate::runtime::lock::{LockProtocol, DONE_SUFFIX};
use crate::runtime::transport::{
    EngineId, IoId, Mode, StepPolicy, StepStatus, Timeout, Transport,
};
use crate::runtime::{Collective, RegistryConfig};

pub struct CouplingSession {
    group: String,
    io: IoId,
    engine: Option<EngineId>,
    mode: Option<Mode>,
    target: Option<String>,
    opened: bool,
    closed: bool,
    current_step: i64,
    lock: Option<LockProtocol>,
}

impl CouplingSession {
    pub fn new(group: &str, io: IoId) -> CouplingSession {
        CouplingSession {
            group: group.to_string(),
            io,
            engine: None,
            mode: None,
            target: None,
            opened: false,
            closed: false,
            current_step: -1,
            lock: None,
        }
    }

    pub fn io(&self) -> IoId {
        self.io
    }

    pub fn engine(&self) -> Option<EngineId> {
        self.engine
    }

    pub fn mode(&self) -> Option<Mode> {
        self.mode
    }

    /// Step counter of the last successfully entered step, -1 before any.
    pub fn current_step(&self) -> i64 {
        self.current_step
    }

    /// Open the session. The mode and target are fixed by the first call;
    /// later calls only reopen the engine if a step cycle closed it.
    pub fn open<T: Transport>(
        &mut self,
        transport: &mut T,
        config: &RegistryConfig,
        collective: &Arc<dyn Collective>,
        target: &str,
        mode: Mode,
    ) -> Result<EngineId, CoupleError> {
        if self.closed {
            return Err(CoupleError::Closed(self.group.clone()));
        }
        if self.mode.is_none() {
            self.mode = Some(mode);
            self.target = Some(target.to_string());
            if transport.file_based() {
                self.lock = Some(LockProtocol::new(
                    &self.group,
                    target,
                    &config.codename,
                    &config.peers,
                    config.poll_interval,
                    collective.clone(),
                ));
            }
            debug!(group = %self.group, ?mode, target, "session initialized");
        }
        if !self.opened {
            self.couple_open(transport)?;
        }
        Ok(self.engine.expect("opened session has an engine"))
    }

    fn couple_open<T: Transport>(&mut self, transport: &mut T) -> Result<(), CoupleError> {
        let mode = self.mode.ok_or_else(|| CoupleError::NotOpen(self.group.clone()))?;
        let target = self.target.clone().expect("mode implies target");
        let engine = if let Some(lock) = self.lock.clone() {
            let guard = lock.acquire(mode, Timeout::Block)?;
            let engine = transport.open(self.io, &target, mode)?;
            guard.release();
            engine
        } else {
            transport.open(self.io, &target, mode)?
        };
        self.engine = Some(engine);
        self.opened = true;
        Ok(())
    }

    /// Enter the next step (or a specific one). See the timeout policy on
    /// [`Timeout`]: blocking retries poll at the configured interval.
    pub fn begin_step<T: Transport>(
        &mut self,
        transport: &mut T,
        step: Option<i64>,
        timeout: Timeout,
    ) -> Result<StepStatus, CoupleError> {
        if self.closed {
            return Err(CoupleError::Closed(self.group.clone()));
        }
        let mode = self.mode.ok_or_else(|| CoupleError::NotOpen(self.group.clone()))?;

        match mode {
            Mode::Write => {
                if !self.opened {
                    self.couple_open(transport)?;
                }
                let engine = self.engine.expect("opened");
                transport.begin_step(engine, StepPolicy::Append, timeout)?;
                self.current_step += 1;
                Ok(StepStatus::Ok)
            }
            Mode::Read => {
                let target_step = step.unwrap_or(self.current_step + 1);
                let status = if self.lock.is_some() {
                    self.read_step_locked(transport, target_step, timeout)?
                } else {
                    if !self.opened {
                        self.couple_open(transport)?;
                    }
                    let engine = self.engine.expect("opened");
                    let status =
                        transport.begin_step(engine, StepPolicy::NextAvailable, timeout)?;
                    if status == StepStatus::Ok {
                        self.current_step += 1;
                    }
                    status
                };
                Ok(status)
            }
        }
    }

    /// Blocking-retry wrapper around [`Self::file_seek`] for file stores:
    /// each attempt runs the full lock cycle, so the writer is never starved
    /// while a reader waits for data.
    fn read_step_locked<T: Transport>(
        &mut self,
        transport: &mut T,
        target_step: i64,
        timeout: Timeout,
    ) -> Result<StepStatus, CoupleError> {
        let poll = self
            .lock
            .as_ref()
            .expect("locked read implies a lock")
            .poll_interval();
        let deadline = timeout.deadline();
        let started = Instant::now();
        loop {
            let status = self.file_seek(transport, target_step, timeout)?;
            if status != StepStatus::NotReady {
                return Ok(status);
            }
            match deadline {
                None => std::thread::sleep(poll),
                Some(d) => {
                    let now = Instant::now();
                    if now >= d {
                        trace!(
                            group = %self.group,
                            waited = ?started.elapsed(),
                            "step not ready within timeout"
                        );
                        return Ok(StepStatus::NotReady);
                    }
                    std::thread::sleep(poll.min(d - now));
                }
            }
        }
    }

    /// One locked pass over the stream looking for `target_step`: open,
    /// walk steps from the beginning, stop when the counter matches. A miss
    /// closes the engine again and distinguishes end-of-stream (done
    /// sentinel present) from not-yet-available.
    fn file_seek<T: Transport>(
        &mut self,
        transport: &mut T,
        target_step: i64,
        timeout: Timeout,
    ) -> Result<StepStatus, CoupleError> {
        let lock = self.lock.clone().expect("file seek requires a lock");
        let guard = lock.acquire(Mode::Read, timeout)?;

        if !self.opened {
            let target = self.target.clone().expect("initialized session");
            self.engine = Some(transport.open(self.io, &target, Mode::Read)?);
            self.opened = true;
        }
        let engine = self.engine.expect("opened");

        let mut local = -1i64;
        let mut found = false;
        let mut status;
        loop {
            status = transport.begin_step(engine, StepPolicy::NextAvailable, timeout)?;
            if status == StepStatus::Ok {
                local += 1;
            } else {
                break;
            }
            if local == target_step {
                found = true;
                self.current_step += 1;
                break;
            }
            transport.end_step(engine)?;
        }
        guard.release();

        if !found {
            transport.close(engine)?;
            self.opened = false;
            self.engine = None;
            status = if lock.done_exists() {
                StepStatus::EndOfStream
            } else {
                StepStatus::NotReady
            };
        }
        Ok(status)
    }

    pub fn end_step<T: Transport>(&mut self, transport: &mut T) -> Result<(), CoupleError> {
        if self.closed {
            return Err(CoupleError::Closed(self.group.clone()));
        }
        let engine = self
            .engine
            .ok_or_else(|| CoupleError::NotOpen(self.group.clone()))?;

        if let Some(lock) = self.lock.clone() {
            let mode = self.mode.expect("engine implies mode");
            let guard = lock.acquire(mode, Timeout::Block)?;
            transport.end_step(engine)?;
            guard.release();
            if mode == Mode::Read {
                // A reader leaves the stream between steps so the writer
                // can replace the target underneath.
                transport.close(engine)?;
                self.opened = false;
                self.engine = None;
            }
        } else {
            transport.end_step(engine)?;
        }
        Ok(())
    }

    /// Close the session. Idempotent; the state is terminal.
    pub fn close<T: Transport>(&mut self, transport: &mut T) -> Result<(), CoupleError> {
        if self.closed {
            return Ok(());
        }
        if self.opened {
            let engine = self.engine.expect("opened");
            match (self.mode, self.lock.clone()) {
                (Some(Mode::Write), Some(lock)) => {
                    let guard = lock.acquire(Mode::Write, Timeout::Block)?;
                    transport.close(engine)?;
                    guard.release();
                }
                _ => transport.close(engine)?,
            }
            self.opened = false;
            self.engine = None;
        }
        self.closed = true;
        debug!(group = %self.group, "session closed");
        Ok(())
    }

    /// Touch the done sentinel; called at writer finalize.
    pub fn mark_done(&self, collective: &Arc<dyn Collective>) -> Result<(), CoupleError> {
        if let Some(lock) = &self.lock {
            lock.mark_done()?;
        } else if let Some(target) = &self.target {
            if collective.rank() == 0 {
                fs::File::create(format!("{target}{DONE_SUFFIX}"))?;
            }
        }
        Ok(())
    }
}
