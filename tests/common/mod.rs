//! Directory-backed test transport: each step of a group is one JSON file
//! under the target directory. Step files are written non-atomically (in
//! two halves, with an optional pause in between) so that any reader which
//! slips past the lock protocol sees a torn file and fails to parse it.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use lockstep::error::TransportError;
use lockstep::runtime::transport::{
    ArrayData, EngineId, IoId, Mode, StepPolicy, StepStatus, Timeout, Transport,
    VariableDescriptor,
};

fn step_path(dir: &Path, step: u64) -> PathBuf {
    dir.join(format!("step.{step}.json"))
}

fn io_err(e: std::io::Error) -> TransportError {
    TransportError(e.to_string())
}

struct EngineState {
    io: IoId,
    dir: PathBuf,
    mode: Mode,
    cursor: u64,
    next_write: u64,
    current: Option<BTreeMap<String, ArrayData>>,
}

pub struct DirTransport {
    groups: Vec<String>,
    engines: Vec<EngineState>,
    /// Widen the torn-write window to make lock violations observable.
    pub torn_write_window: Option<Duration>,
}

impl DirTransport {
    pub fn new() -> DirTransport {
        DirTransport {
            groups: Vec::new(),
            engines: Vec::new(),
            torn_write_window: Some(Duration::from_millis(1)),
        }
    }

    fn engine_mut(&mut self, id: EngineId) -> Result<&mut EngineState, TransportError> {
        self.engines
            .get_mut(id.0 as usize)
            .ok_or_else(|| TransportError(format!("unknown engine {}", id.0)))
    }
}

impl Transport for DirTransport {
    fn declare_group(&mut self, name: &str) -> Result<IoId, TransportError> {
        self.groups.push(name.to_string());
        Ok(IoId(self.groups.len() as u32 - 1))
    }

    fn open(&mut self, io: IoId, target: &str, mode: Mode) -> Result<EngineId, TransportError> {
        let dir = PathBuf::from(target);
        if mode == Mode::Write {
            fs::create_dir_all(&dir).map_err(io_err)?;
        }
        let mut next_write = 0;
        while step_path(&dir, next_write).exists() {
            next_write += 1;
        }
        self.engines.push(EngineState {
            io,
            dir,
            mode,
            cursor: 0,
            next_write,
            current: None,
        });
        Ok(EngineId(self.engines.len() as u32 - 1))
    }

    fn begin_step(
        &mut self,
        engine: EngineId,
        _policy: StepPolicy,
        _timeout: Timeout,
    ) -> Result<StepStatus, TransportError> {
        let state = self.engine_mut(engine)?;
        match state.mode {
            Mode::Write => {
                state.current = Some(BTreeMap::new());
                Ok(StepStatus::Ok)
            }
            Mode::Read => {
                let path = step_path(&state.dir, state.cursor);
                if !path.exists() {
                    return Ok(StepStatus::NotReady);
                }
                let text = fs::read_to_string(&path).map_err(io_err)?;
                let vars: BTreeMap<String, ArrayData> = serde_json::from_str(&text)
                    .map_err(|e| TransportError(format!("torn step file {}: {e}", path.display())))?;
                state.current = Some(vars);
                Ok(StepStatus::Ok)
            }
        }
    }

    fn put(
        &mut self,
        engine: EngineId,
        name: &str,
        data: &ArrayData,
    ) -> Result<(), TransportError> {
        let state = self.engine_mut(engine)?;
        let vars = state
            .current
            .as_mut()
            .ok_or_else(|| TransportError("put outside a step".into()))?;
        vars.insert(name.to_string(), data.clone());
        Ok(())
    }

    fn get(&mut self, engine: EngineId, name: &str) -> Result<ArrayData, TransportError> {
        let state = self.engine_mut(engine)?;
        state
            .current
            .as_ref()
            .and_then(|vars| vars.get(name))
            .cloned()
            .ok_or_else(|| TransportError(format!("no variable `{name}` in current step")))
    }

    fn end_step(&mut self, engine: EngineId) -> Result<(), TransportError> {
        let window = self.torn_write_window;
        let state = self.engine_mut(engine)?;
        match state.mode {
            Mode::Write => {
                let vars = state
                    .current
                    .take()
                    .ok_or_else(|| TransportError("end_step outside a step".into()))?;
                let text = serde_json::to_string(&vars)
                    .map_err(|e| TransportError(e.to_string()))?;
                let path = step_path(&state.dir, state.next_write);
                let bytes = text.as_bytes();
                let mid = bytes.len() / 2;
                let mut file = fs::File::create(&path).map_err(io_err)?;
                file.write_all(&bytes[..mid]).map_err(io_err)?;
                file.flush().map_err(io_err)?;
                if let Some(window) = window {
                    std::thread::sleep(window);
                }
                file.write_all(&bytes[mid..]).map_err(io_err)?;
                state.next_write += 1;
            }
            Mode::Read => {
                state.current = None;
                state.cursor += 1;
            }
        }
        Ok(())
    }

    fn close(&mut self, engine: EngineId) -> Result<(), TransportError> {
        let state = self.engine_mut(engine)?;
        state.current = None;
        Ok(())
    }

    fn inquire_variable(&self, io: IoId, name: &str) -> Option<VariableDescriptor> {
        self.engines
            .iter()
            .filter(|e| e.io == io)
            .find_map(|e| e.current.as_ref()?.get(name).map(ArrayData::descriptor))
    }

    fn file_based(&self) -> bool {
        true
    }
}
