//! Drives one generation call and folds its deltas into an evolving message.

use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::core::backend::{BackendError, GenerationBackend, GenerationCall, StreamDelta};
use crate::core::message::{replace_last_content_text, Fragment};
use crate::core::throttle::ThrottleGate;

/// The message being generated, as accumulated so far.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamState {
    pub fragments: Vec<Fragment>,
    pub origin_model: Option<String>,
    /// Provider-reported typing flag; `None` when the provider is silent.
    pub pending_incomplete: Option<bool>,
}

impl StreamState {
    /// Merges one delta. Text is a cumulative snapshot and replaces the last
    /// text fragment.
    pub fn apply(&mut self, delta: StreamDelta) {
        if let Some(text) = delta.text_so_far.filter(|text| !text.is_empty()) {
            replace_last_content_text(&mut self.fragments, &text, false);
        }
        if let Some(origin) = delta.origin_model {
            self.origin_model = Some(origin);
        }
        if let Some(typing) = delta.typing {
            self.pending_incomplete = typing.then_some(true);
        }
    }

    /// First content text fragment, which is what speech and titles read.
    pub fn first_text(&self) -> Option<&str> {
        self.fragments.first().and_then(Fragment::content_text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
    Success,
    Aborted,
    Errored,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamStatus {
    pub outcome: StreamOutcome,
    pub error_message: Option<String>,
}

impl StreamStatus {
    pub fn is_success(&self) -> bool {
        self.outcome == StreamOutcome::Success
    }
}

/// Runs `call` to completion, cancellation or failure.
///
/// `on_update(state, false)` fires for deltas the throttle lets through and
/// `on_update(state, true)` fires exactly once at the end, whatever the
/// outcome, with the pending flag cleared.
pub async fn run_stream<F>(
    backend: &dyn GenerationBackend,
    call: GenerationCall,
    parallel_view_count: u32,
    cancel_token: &CancellationToken,
    mut on_update: F,
) -> StreamStatus
where
    F: FnMut(&StreamState, bool),
{
    let mut gate = ThrottleGate::new(parallel_view_count);
    let mut state = StreamState::default();

    let result = consume(backend, call, cancel_token, &mut state, &mut gate, &mut on_update).await;

    let status = match result {
        Ok(()) => StreamStatus {
            outcome: StreamOutcome::Success,
            error_message: None,
        },
        Err(err) if err.is_abort() => {
            debug!("Generation stream aborted");
            StreamStatus {
                outcome: StreamOutcome::Aborted,
                error_message: None,
            }
        }
        Err(err) => {
            let message = err.to_string();
            warn!(error = %message, "Generation stream failed");
            replace_last_content_text(&mut state.fragments, &format!(" [Issue: {message}]"), true);
            StreamStatus {
                outcome: StreamOutcome::Errored,
                error_message: Some(message),
            }
        }
    };

    state.pending_incomplete = None;
    gate.finalize(|| on_update(&state, true));
    status
}

async fn consume<F>(
    backend: &dyn GenerationBackend,
    call: GenerationCall,
    cancel_token: &CancellationToken,
    state: &mut StreamState,
    gate: &mut ThrottleGate,
    on_update: &mut F,
) -> Result<(), BackendError>
where
    F: FnMut(&StreamState, bool),
{
    // Stops the backend's transport whenever this consumer returns.
    let transport_token = cancel_token.child_token();
    let _transport_guard = transport_token.clone().drop_guard();

    let mut stream = tokio::select! {
        biased;
        _ = cancel_token.cancelled() => return Err(BackendError::Aborted),
        opened = backend.open_stream(call, transport_token) => opened?,
    };

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel_token.cancelled() => return Err(BackendError::Aborted),
            next = stream.next() => next,
        };
        let Some(delta) = next else {
            return Ok(());
        };

        state.apply(delta?);
        gate.handle_update(|| on_update(state, false));
    }
}
