//! Step-coupler runtime: one session per group, synchronized over the
//! transport with the sentinel-file lock protocol when the transport is a
//! plain file store.

pub mod lock;
pub mod session;
pub mod transport;

use std::collections::{BTreeMap, HashMap};
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::error::CoupleError;
use crate::rewrite::manifest::Manifest;
use session::CouplingSession;
use transport::{ArrayData, EngineId, IoId, Mode, StepStatus, Timeout, Transport, VariableDescriptor};

/// Process-group coordination seam. Host programs plug their own collective
/// in (typically rank 0 doing the sentinel I/O and a barrier distributing
/// the outcome); single-process programs use [`Solo`].
pub trait Collective: Send + Sync {
    fn rank(&self) -> usize;
    fn size(&self) -> usize;
    fn barrier(&self);
}

/// No-op collective for single-process sessions.
pub struct Solo;

impl Collective for Solo {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn barrier(&self) {}
}

/// Runtime configuration: peer identity and expectations plus tuning knobs.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// This program's identity, used in its reader sentinel name.
    pub codename: String,
    /// Identities of every expected reader of the groups this program
    /// writes. Empty means this program's own identity is the only one.
    pub peers: Vec<String>,
    /// Retry interval for blocking waits. Deliberately a parameter: fast
    /// shared filesystems favor short intervals, congested ones longer.
    pub poll_interval: Duration,
    /// Group names known ahead of time, used to size the session table.
    pub groups: Vec<String>,
    /// Per-group engine parameters forwarded to the transport at declare.
    pub group_params: BTreeMap<String, BTreeMap<String, String>>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        RegistryConfig {
            codename: "reader".to_string(),
            peers: Vec::new(),
            poll_interval: Duration::from_secs(1),
            groups: Vec::new(),
            group_params: BTreeMap::new(),
        }
    }
}

impl RegistryConfig {
    /// Build a config from a rewriter manifest, adopting its group list.
    pub fn from_manifest(path: &Path, codename: impl Into<String>) -> io::Result<RegistryConfig> {
        let manifest = Manifest::load(path)?;
        Ok(RegistryConfig {
            codename: codename.into(),
            groups: manifest.groups,
            ..RegistryConfig::default()
        })
    }
}

/// Explicit session registry: owns the transport and one
/// [`CouplingSession`] per group name for the life of the process.
pub struct Registry<T: Transport> {
    transport: T,
    config: RegistryConfig,
    collective: Arc<dyn Collective>,
    sessions: HashMap<String, CouplingSession>,
}

impl<T: Transport> Registry<T> {
    pub fn new(transport: T, config: RegistryConfig) -> Registry<T> {
        Registry::with_collective(transport, config, Arc::new(Solo))
    }

    pub fn with_collective(
        transport: T,
        config: RegistryConfig,
        collective: Arc<dyn Collective>,
    ) -> Registry<T> {
        let sessions = HashMap::with_capacity(config.groups.len());
        Registry {
            transport,
            config,
            collective,
            sessions,
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Declare a group, creating its session. Declaring an existing group
    /// returns the handle it already has.
    pub fn declare_io(&mut self, group: &str) -> Result<IoId, CoupleError> {
        if let Some(session) = self.sessions.get(group) {
            return Ok(session.io());
        }
        let io = self.transport.declare_group(group)?;
        if let Some(params) = self.config.group_params.get(group) {
            for (key, value) in params {
                self.transport.set_parameter(io, key, value);
            }
        }
        self.sessions
            .insert(group.to_string(), CouplingSession::new(group, io));
        Ok(io)
    }

    /// Open a group for reading or writing. Groups not yet declared are
    /// declared implicitly.
    pub fn open(&mut self, group: &str, target: &str, mode: Mode) -> Result<EngineId, CoupleError> {
        if !self.sessions.contains_key(group) {
            self.declare_io(group)?;
        }
        let session = self.sessions.get_mut(group).expect("just ensured");
        session.open(
            &mut self.transport,
            &self.config,
            &self.collective,
            target,
            mode,
        )
    }

    /// Enter the next step of a group.
    pub fn begin_step(&mut self, group: &str, timeout: Timeout) -> Result<StepStatus, CoupleError> {
        self.session_mut(group)?;
        let session = self.sessions.get_mut(group).expect("checked");
        session.begin_step(&mut self.transport, None, timeout)
    }

    /// Enter a specific step instead of the next available one.
    pub fn begin_step_at(
        &mut self,
        group: &str,
        step: u64,
        timeout: Timeout,
    ) -> Result<StepStatus, CoupleError> {
        self.session_mut(group)?;
        let session = self.sessions.get_mut(group).expect("checked");
        session.begin_step(&mut self.transport, Some(step as i64), timeout)
    }

    pub fn put(&mut self, group: &str, name: &str, data: &ArrayData) -> Result<(), CoupleError> {
        let engine = self.open_engine(group)?;
        Ok(self.transport.put(engine, name, data)?)
    }

    pub fn get(&mut self, group: &str, name: &str) -> Result<ArrayData, CoupleError> {
        let engine = self.open_engine(group)?;
        Ok(self.transport.get(engine, name)?)
    }

    pub fn inquire_variable(&self, group: &str, name: &str) -> Option<VariableDescriptor> {
        let session = self.sessions.get(group)?;
        self.transport.inquire_variable(session.io(), name)
    }

    pub fn end_step(&mut self, group: &str) -> Result<(), CoupleError> {
        self.session_mut(group)?;
        let session = self.sessions.get_mut(group).expect("checked");
        session.end_step(&mut self.transport)
    }

    pub fn close(&mut self, group: &str) -> Result<(), CoupleError> {
        self.session_mut(group)?;
        let session = self.sessions.get_mut(group).expect("checked");
        session.close(&mut self.transport)
    }

    /// Step counter of the last step entered for a group, -1 before any.
    pub fn current_step(&self, group: &str) -> Option<i64> {
        self.sessions.get(group).map(|s| s.current_step())
    }

    /// Close every session; write-mode groups get their done sentinel so
    /// readers can tell a finished stream from a stalled one.
    pub fn finalize(mut self) -> Result<(), CoupleError> {
        let groups: Vec<String> = self.sessions.keys().cloned().collect();
        for group in groups {
            let session = self.sessions.get_mut(&group).expect("known group");
            let was_writer = session.mode() == Some(Mode::Write);
            session.close(&mut self.transport)?;
            if was_writer {
                session.mark_done(&self.collective)?;
            }
        }
        info!(codename = %self.config.codename, "coupler finalized");
        Ok(())
    }

    fn session_mut(&mut self, group: &str) -> Result<(), CoupleError> {
        if self.sessions.contains_key(group) {
            Ok(())
        } else {
            Err(CoupleError::UnknownGroup(group.to_string()))
        }
    }

    fn open_engine(&mut self, group: &str) -> Result<EngineId, CoupleError> {
        let session = self
            .sessions
            .get(group)
            .ok_or_else(|| CoupleError::UnknownGroup(group.to_string()))?;
        session
            .engine()
            .ok_or_else(|| CoupleError::NotOpen(group.to_string()))
    }
}
