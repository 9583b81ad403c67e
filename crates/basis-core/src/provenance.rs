//! Provenance and schema descriptors attached to persisted spectra.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Semantic version describing the schema of serialized payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SchemaVersion {
    /// Major version incremented for breaking changes.
    pub major: u32,
    /// Minor version incremented for additive changes.
    pub minor: u32,
    /// Patch version incremented for bug fixes and documentation updates.
    pub patch: u32,
}

impl SchemaVersion {
    /// Creates a new schema version descriptor.
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl Default for SchemaVersion {
    fn default() -> Self {
        Self::new(1, 0, 0)
    }
}

/// Provenance information attached to every persisted spectrum table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct RunProvenance {
    /// Hash of the run configuration that produced the data.
    pub config_hash: String,
    /// Labels of the inputs (paths or synthetic generator descriptions).
    pub inputs: BTreeMap<String, String>,
    /// Number of workers the run was decomposed across.
    pub workers: usize,
    /// Master seed for synthetic inputs, zero when inputs were read from disk.
    pub seed: u64,
    /// Version map for all tools involved in the run.
    pub tool_versions: BTreeMap<String, String>,
}

impl RunProvenance {
    /// Records the version of the calling crate under `tool`.
    pub fn with_tool(mut self, tool: &str, version: &str) -> Self {
        self.tool_versions.insert(tool.to_string(), version.to_string());
        self
    }
}
