//! Error kinds surfaced by the engine.
//!
//! Modeled as a single enum with `thiserror` because the surface has eight
//! named kinds with structured payloads; see DESIGN.md for the rationale.

use thiserror::Error;

/// Stable, matchable error-kind tag independent of payload.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Configuration,
    Capability,
    Validation,
    Resource,
    Compilation,
    Runtime,
    Numerical,
}

/// Engine-wide error type. A device-lost error (`Runtime` kind, `DeviceLost` variant)
/// is terminal for the device and every model built on it.
#[derive(Error, Debug)]
pub enum DopplerError {
    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("required capability `{capability}` is not available on this device{fallback}",
        fallback = .fallback_variant.as_deref().map(|v| format!(" (no fallback; nearest variant `{v}` also requires it)")).unwrap_or_default())]
    Capability {
        capability: &'static str,
        fallback_variant: Option<String>,
    },

    #[error("validation failed: {message} (dims={dims:?}, offsets={offsets:?})")]
    Validation {
        message: String,
        dims: Vec<usize>,
        offsets: Vec<u64>,
    },

    #[error("buffer too small: required {required} bytes, actual {actual} bytes")]
    BufferTooSmall { required: u64, actual: u64 },

    #[error("pool exhausted: bucket for size {size} has no free or evictable entries")]
    PoolExhausted { size: u64 },

    #[error("dispatch exceeds limit: requested {requested} workgroups, device max {max}")]
    DispatchExceedsLimit { requested: u32, max: u32 },

    #[error("shader `{label}` failed to compile: {source_message}")]
    PipelineCompilation {
        label: String,
        source_message: String,
    },

    #[error("device lost: {reason}")]
    DeviceLost { reason: String },

    #[error("operation timed out")]
    Timeout,

    #[error("dependency violation in task scheduler: {0}")]
    DependencyViolation(String),

    #[error("numerical error: {0}")]
    Numerical(String),
}

impl DopplerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DopplerError::Configuration(_) => ErrorKind::Configuration,
            DopplerError::Capability { .. } => ErrorKind::Capability,
            DopplerError::Validation { .. } => ErrorKind::Validation,
            DopplerError::BufferTooSmall { .. } | DopplerError::PoolExhausted { .. } => {
                ErrorKind::Resource
            }
            DopplerError::DispatchExceedsLimit { .. } => ErrorKind::Validation,
            DopplerError::PipelineCompilation { .. } => ErrorKind::Compilation,
            DopplerError::DeviceLost { .. } | DopplerError::Timeout => ErrorKind::Runtime,
            DopplerError::DependencyViolation(_) => ErrorKind::Runtime,
            DopplerError::Numerical(_) => ErrorKind::Numerical,
        }
    }

    pub fn validation(message: impl Into<String>, dims: &[usize], offsets: &[u64]) -> Self {
        DopplerError::Validation {
            message: message.into(),
            dims: dims.to_vec(),
            offsets: offsets.to_vec(),
        }
    }
}

pub type Result<T> = std::result::Result<T, DopplerError>;
