//! The abstract transport the step coupler drives.
//!
//! The engine behind this trait owns the actual data movement; the coupler
//! only layers step synchronization on top and passes array payloads
//! through untransformed.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::TransportError;

/// Opaque handle for a declared group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IoId(pub u32);

/// Opaque handle for an opened engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EngineId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Read,
    Write,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepPolicy {
    /// Writer side: append a new step.
    Append,
    /// Reader side: enter the next step not yet consumed.
    NextAvailable,
}

/// Outcome of a begin-step attempt. Stream end is a status, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    Ok,
    NotReady,
    EndOfStream,
}

/// Caller-supplied wait policy for blocking operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    /// Block indefinitely, retrying at the configured poll interval.
    Block,
    /// A single non-blocking probe.
    Probe,
    /// Bound the total wait.
    Bounded(Duration),
}

impl Timeout {
    /// Conventional encoding: negative blocks, zero probes, positive bounds.
    pub fn from_secs_f64(seconds: f64) -> Timeout {
        if seconds < 0.0 {
            Timeout::Block
        } else if seconds == 0.0 {
            Timeout::Probe
        } else {
            Timeout::Bounded(Duration::from_secs_f64(seconds))
        }
    }

    /// Wait deadline measured from now; `None` means no bound.
    pub fn deadline(&self) -> Option<std::time::Instant> {
        match self {
            Timeout::Block => None,
            Timeout::Probe => Some(std::time::Instant::now()),
            Timeout::Bounded(d) => Some(std::time::Instant::now() + *d),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ElementKind {
    Int64,
    Float64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Values {
    Int64(Vec<i64>),
    Float64(Vec<f64>),
}

/// An n-dimensional array payload, passed through without transformation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrayData {
    pub shape: Vec<u64>,
    pub values: Values,
}

impl ArrayData {
    pub fn from_i64(values: &[i64]) -> ArrayData {
        ArrayData {
            shape: vec![values.len() as u64],
            values: Values::Int64(values.to_vec()),
        }
    }

    pub fn from_f64(values: &[f64]) -> ArrayData {
        ArrayData {
            shape: vec![values.len() as u64],
            values: Values::Float64(values.to_vec()),
        }
    }

    pub fn kind(&self) -> ElementKind {
        match self.values {
            Values::Int64(_) => ElementKind::Int64,
            Values::Float64(_) => ElementKind::Float64,
        }
    }

    pub fn descriptor(&self) -> VariableDescriptor {
        VariableDescriptor {
            shape: self.shape.clone(),
            kind: self.kind(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableDescriptor {
    pub shape: Vec<u64>,
    pub kind: ElementKind,
}

/// Capability contract of the underlying data-transport engine.
pub trait Transport {
    fn declare_group(&mut self, name: &str) -> Result<IoId, TransportError>;

    /// Engine tuning knob forwarded from per-group configuration. Engines
    /// without parameters may ignore it.
    fn set_parameter(&mut self, _io: IoId, _key: &str, _value: &str) {}

    fn open(&mut self, io: IoId, target: &str, mode: Mode) -> Result<EngineId, TransportError>;

    fn begin_step(
        &mut self,
        engine: EngineId,
        policy: StepPolicy,
        timeout: Timeout,
    ) -> Result<StepStatus, TransportError>;

    fn put(&mut self, engine: EngineId, name: &str, data: &ArrayData)
        -> Result<(), TransportError>;

    fn get(&mut self, engine: EngineId, name: &str) -> Result<ArrayData, TransportError>;

    fn end_step(&mut self, engine: EngineId) -> Result<(), TransportError>;

    fn close(&mut self, engine: EngineId) -> Result<(), TransportError>;

    fn inquire_variable(&self, io: IoId, name: &str) -> Option<VariableDescriptor>;

    /// Whether this engine is a plain directory/file store with no
    /// synchronization of its own. True means the coupler must run the
    /// lock-file protocol around every step.
    fn file_based(&self) -> bool;
}
