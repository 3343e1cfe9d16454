//! Repo-mode manifest: group names discovered across a source tree, read
//! back by the runtime to size its session table at process start.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub const MANIFEST_NAME: &str = ".lockstep-groups.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub ngroups: usize,
    pub groups: Vec<String>,
}

impl Manifest {
    pub fn new(groups: Vec<String>) -> Manifest {
        Manifest {
            ngroups: groups.len(),
            groups,
        }
    }

    /// Write the manifest into `dir`, returning the path written.
    pub fn write(&self, dir: &Path) -> io::Result<PathBuf> {
        let path = dir.join(MANIFEST_NAME);
        let text = serde_json::to_string_pretty(self).expect("manifest serializes");
        fs::write(&path, text)?;
        Ok(path)
    }

    pub fn load(path: &Path) -> io::Result<Manifest> {
        let text = fs::read_to_string(path)?;
        serde_json::from_str(&text).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}
