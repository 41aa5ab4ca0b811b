//! Configuration Fingerprint
//!
//! A digest of the parts of the configuration that change what completed
//! tasks produced. The engine stores it next to the ledger so a rerun with
//! different model or data paths does not silently reuse stale results.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use sha2::{Digest, Sha256};

use super::{Configuration, PathSet};
use crate::error::{Result, WorkflowError};

/// Hex-encoded SHA-256 digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Sidecar file holding the fingerprint of the given ledger.
    pub fn sidecar_for(state_file: &Path) -> PathBuf {
        let mut name = state_file
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".fingerprint");
        state_file.with_file_name(name)
    }

    /// Reads a previously recorded fingerprint, if any.
    pub fn read(sidecar: &Path) -> Result<Option<Self>> {
        if !sidecar.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(sidecar).map_err(|e| WorkflowError::io(sidecar, e))?;
        let value = content.trim();
        if value.is_empty() {
            return Ok(None);
        }
        Ok(Some(Self(value.to_string())))
    }

    pub fn write(&self, sidecar: &Path) -> Result<()> {
        fs::write(sidecar, format!("{}\n", self.0)).map_err(|e| WorkflowError::io(sidecar, e))
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Serialize)]
struct Fingerprinted<'a> {
    paths: &'a PathSet,
    generate_data: bool,
}

/// Computes the fingerprint of a configuration.
///
/// Only paths and `generate_data` take part; `stop_after` and the export
/// flags do not change results.
pub fn fingerprint(config: &Configuration) -> Result<Fingerprint> {
    let view = Fingerprinted {
        paths: config.paths(),
        generate_data: config.generate_data(),
    };
    let canonical = serde_json::to_vec(&view)?;

    let digest = Sha256::digest(&canonical);
    let hex = digest.iter().map(|b| format!("{:02x}", b)).collect();
    Ok(Fingerprint(hex))
}
