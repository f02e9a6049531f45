//! The abstract streaming generation source.

use std::error::Error as StdError;
use std::fmt;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use tokio_util::sync::CancellationToken;

use crate::api::GenerateRequest;

/// One update from a streaming backend.
///
/// `text_so_far` is a cumulative snapshot of the whole answer, never an
/// increment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamDelta {
    pub text_so_far: Option<String>,
    pub origin_model: Option<String>,
    pub typing: Option<bool>,
}

impl StreamDelta {
    pub fn text(text_so_far: impl Into<String>) -> Self {
        Self {
            text_so_far: Some(text_so_far.into()),
            ..Self::default()
        }
    }
}

/// Who is asking for the generation, for backend-side attribution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamContext {
    pub label: &'static str,
    pub reference: String,
}

impl StreamContext {
    pub fn conversation(reference: impl Into<String>) -> Self {
        Self {
            label: "conversation",
            reference: reference.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GenerationCall {
    pub model_id: String,
    pub request: GenerateRequest,
    pub context: StreamContext,
}

#[derive(Debug)]
pub enum BackendError {
    /// The transport observed the abort signal.
    Aborted,
    /// The provider answered with an error, already formatted for display.
    Api(String),
    /// Connecting or reading from the provider failed.
    Transport(reqwest::Error),
    /// A provider payload could not be understood.
    Decode(String),
    Other(String),
}

impl BackendError {
    pub fn is_abort(&self) -> bool {
        matches!(self, BackendError::Aborted)
    }
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendError::Aborted => write!(f, "Request aborted"),
            BackendError::Api(message) => write!(f, "{message}"),
            BackendError::Transport(err) => write!(f, "Connection error: {err}"),
            BackendError::Decode(message) => write!(f, "Invalid provider response: {message}"),
            BackendError::Other(message) => write!(f, "{message}"),
        }
    }
}

impl StdError for BackendError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            BackendError::Transport(err) => Some(err),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        BackendError::Transport(err)
    }
}

pub type DeltaStream = BoxStream<'static, Result<StreamDelta, BackendError>>;

#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Starts a generation. Failures before the first delta may surface either
    /// here or as the first stream item.
    ///
    /// Work spawned for the stream must stop once `cancel_token` fires; the
    /// consumer cancels it on abort and whenever it stops reading.
    async fn open_stream(
        &self,
        call: GenerationCall,
        cancel_token: CancellationToken,
    ) -> Result<DeltaStream, BackendError>;
}
