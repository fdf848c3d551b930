use feishu_core::{ApiEnvelope, ApiRequest, ApiResponse, FeishuError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("invalid selection: {0}")]
    Validation(String),
    #[error("{step} failed: {source}")]
    Request {
        step: String,
        #[source]
        source: FeishuError,
    },
    #[error("{step} failed with status {}: {}", .response.status, .response.body)]
    Transport {
        step: String,
        request: Box<ApiRequest>,
        response: Box<ApiResponse>,
    },
    #[error("copy verification failed: expected {expected}, found {actual}")]
    Integrity { expected: usize, actual: usize },
    #[error("wiki node creation stalled with {} unresolved folder(s): {}", .pending.len(), .pending.join(", "))]
    Plan { pending: Vec<String> },
    #[error("migration cancelled by user")]
    Cancelled,
}

impl MigrationError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn request(step: impl Into<String>, source: FeishuError) -> Self {
        Self::Request {
            step: step.into(),
            source,
        }
    }

    pub fn transport(step: impl Into<String>, envelope: ApiEnvelope) -> Self {
        Self::Transport {
            step: step.into(),
            request: Box::new(envelope.request),
            response: Box::new(envelope.response),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Turns a raw call result into a usable envelope, failing the step on a
/// missing response or a non-success envelope.
pub(crate) fn ensure_ok(
    step: &str,
    result: Result<ApiEnvelope, FeishuError>,
) -> Result<ApiEnvelope, MigrationError> {
    let envelope = result.map_err(|source| MigrationError::request(step, source))?;
    if envelope.ok {
        Ok(envelope)
    } else {
        Err(MigrationError::transport(step, envelope))
    }
}
