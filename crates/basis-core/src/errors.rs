//! Structured error types shared across basis crates.

use std::collections::BTreeMap;
use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Structured payload attached to every [`BasisError`] variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Stable machine readable error code.
    pub code: String,
    /// Human readable diagnostic message.
    pub message: String,
    /// Contextual key value pairs (stage names, sizes, ranks, etc.).
    #[serde(default)]
    pub context: BTreeMap<String, String>,
    /// Optional hint that may help the caller resolve the issue.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl ErrorInfo {
    /// Creates a new error payload with the provided code and message.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            context: BTreeMap::new(),
            hint: None,
        }
    }

    /// Adds a context entry to the payload.
    pub fn with_context(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.context.insert(key.into(), value.to_string());
        self
    }

    /// Sets a human readable hint for remediation.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

/// Canonical error type for the basis spectra pipeline.
///
/// Apart from empty k-bins (which degrade to "no data" rows) every variant is
/// fatal for the whole worker group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(tag = "family", content = "detail")]
pub enum BasisError {
    /// Invalid resolution, worker layout or binning detected before any work.
    #[error("configuration error: {0}")]
    Configuration(ErrorInfo),
    /// Input arrays whose length or resolution disagree with the run.
    #[error("data shape error: {0}")]
    DataShape(ErrorInfo),
    /// Non-finite values or otherwise unusable numerics.
    #[error("numeric divergence: {0}")]
    NumericDivergence(ErrorInfo),
    /// Allocation failures for grid-sized buffers.
    #[error("resource exhaustion: {0}")]
    ResourceExhaustion(ErrorInfo),
    /// Collective desynchronisation or a group-wide abort.
    #[error("protocol error: {0}")]
    Protocol(ErrorInfo),
    /// Filesystem failures while reading inputs or persisting outputs.
    #[error("io error: {0}")]
    Io(ErrorInfo),
    /// Serialization and schema errors.
    #[error("serde error: {0}")]
    Serde(ErrorInfo),
}

impl Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code: {})", self.message, self.code)?;
        if !self.context.is_empty() {
            write!(f, " | context: [")?;
            for (idx, (key, value)) in self.context.iter().enumerate() {
                if idx > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{key}={value}")?;
            }
            write!(f, "]")?;
        }
        if let Some(hint) = &self.hint {
            write!(f, " | hint: {hint}")?;
        }
        Ok(())
    }
}

impl BasisError {
    /// Returns a reference to the payload describing the error.
    pub fn info(&self) -> &ErrorInfo {
        match self {
            BasisError::Configuration(info)
            | BasisError::DataShape(info)
            | BasisError::NumericDivergence(info)
            | BasisError::ResourceExhaustion(info)
            | BasisError::Protocol(info)
            | BasisError::Io(info)
            | BasisError::Serde(info) => info,
        }
    }

    /// Shorthand for a [`BasisError::Configuration`] error.
    pub fn configuration(code: &str, message: impl Into<String>) -> Self {
        BasisError::Configuration(ErrorInfo::new(code, message))
    }

    /// Shorthand for a [`BasisError::DataShape`] error.
    pub fn data_shape(code: &str, message: impl Into<String>) -> Self {
        BasisError::DataShape(ErrorInfo::new(code, message))
    }

    /// Shorthand for a [`BasisError::Protocol`] error.
    pub fn protocol(code: &str, message: impl Into<String>) -> Self {
        BasisError::Protocol(ErrorInfo::new(code, message))
    }

    /// Wraps an I/O failure, recording the offending path.
    pub fn io(code: &str, err: impl ToString, path: &std::path::Path) -> Self {
        BasisError::Io(ErrorInfo::new(code, err.to_string()).with_context("path", path.display()))
    }

    /// Returns true when the error originates from another worker aborting the group.
    pub fn is_group_abort(&self) -> bool {
        matches!(self, BasisError::Protocol(info) if info.code == "group-aborted")
    }
}

/// Allocates a zero-initialised buffer, surfacing allocation failure as
/// [`BasisError::ResourceExhaustion`] tagged with the requesting stage.
pub fn try_alloc<T: Clone + Default>(len: usize, stage: &str) -> Result<Vec<T>, BasisError> {
    let mut buffer = Vec::new();
    buffer.try_reserve_exact(len).map_err(|err| {
        BasisError::ResourceExhaustion(
            ErrorInfo::new("grid-allocation", err.to_string())
                .with_context("stage", stage)
                .with_context("elements", len)
                .with_context("bytes", len.saturating_mul(std::mem::size_of::<T>()))
                .with_hint("reduce nmesh or increase the number of workers"),
        )
    })?;
    buffer.resize(len, T::default());
    Ok(buffer)
}
