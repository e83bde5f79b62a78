use crate::pass::PassKind;
use crate::types::{ProgramId, UniformLocation};
use crate::uniform::UniformType;

/// Failures reported by a [`RenderBackend`](crate::backend::RenderBackend).
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("graphics context lost")]
    ContextLost,
    #[error("failed to allocate {label} ({width}x{height}): {reason}")]
    Allocation {
        label: String,
        width: u32,
        height: u32,
        reason: String,
    },
    #[error("failed to build program '{label}': {reason}")]
    Program { label: String, reason: String },
    #[error("unknown {kind} handle {id}")]
    UnknownHandle { kind: &'static str, id: u32 },
    #[error("no program bound")]
    NoProgram,
    #[error("uniform {location:?} of {program} expects {expected:?}, got {actual:?}")]
    UniformMismatch {
        program: ProgramId,
        location: UniformLocation,
        expected: UniformType,
        actual: UniformType,
    },
    #[error("texture unit {unit} sampled by the program has nothing bound")]
    UnboundTexture { unit: u32 },
    #[error("display readback failed: {0}")]
    Readback(String),
}

/// Failures while decoding a lookup table.
#[derive(Debug, thiserror::Error)]
pub enum LookupError {
    #[error("failed to decode {table} table from {path}: {source}")]
    Decode {
        table: &'static str,
        path: String,
        #[source]
        source: image::ImageError,
    },
    #[error("{table} table image is malformed ({width}x{height}, {bytes} bytes)")]
    Malformed {
        table: &'static str,
        width: u32,
        height: u32,
        bytes: usize,
    },
    #[error("{table} table loader disconnected before completing")]
    Disconnected { table: &'static str },
}

/// Errors surfaced by surfaces, passes, the AA pipeline and the frame orchestrator.
///
/// Transient conditions (tables not loaded yet, surfaces not allocated) are not errors;
/// those calls return `Ok` without drawing.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("graphics context lost")]
    ContextLost,
    #[error("{pass} program has no usable '{attribute}' attribute")]
    InvalidAttribute {
        pass: PassKind,
        attribute: &'static str,
    },
    #[error("invalid dimensions {width}x{height}; both must be positive")]
    InvalidDimensions { width: u32, height: u32 },
    #[error("pipeline used before initialize()")]
    Uninitialized,
    #[error("pipeline already initialized")]
    AlreadyInitialized,
    #[error("{pass} pass has no uniform named '{name}'")]
    UnknownUniform { pass: PassKind, name: String },
    #[error("{pass} uniform '{name}' is {expected:?}, cannot assign {actual:?}")]
    UniformType {
        pass: PassKind,
        name: String,
        expected: UniformType,
        actual: UniformType,
    },
    #[error(transparent)]
    Lookup(#[from] LookupError),
    #[error(transparent)]
    Backend(BackendError),
}

impl From<BackendError> for PipelineError {
    fn from(value: BackendError) -> Self {
        match value {
            BackendError::ContextLost => PipelineError::ContextLost,
            other => PipelineError::Backend(other),
        }
    }
}

impl PipelineError {
    /// Fatal errors require the owner to rebuild the pipeline.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PipelineError::ContextLost | PipelineError::InvalidAttribute { .. }
        )
    }
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_context_loss_maps_to_pipeline_context_loss() {
        let err: PipelineError = BackendError::ContextLost.into();
        assert!(matches!(err, PipelineError::ContextLost));
        assert!(err.is_fatal());

        let err: PipelineError = BackendError::NoProgram.into();
        assert!(matches!(err, PipelineError::Backend(BackendError::NoProgram)));
        assert!(!err.is_fatal());
    }
}
