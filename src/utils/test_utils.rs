use std::future;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures_util::{stream, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::core::backend::{
    BackendError, DeltaStream, GenerationBackend, GenerationCall, StreamDelta,
};
use crate::core::chat_stream::StreamState;
use crate::core::conversation::{
    AbortHandle, ConversationId, ConversationStore, InMemoryStore, PlaceholderSeed, StoreError,
};
use crate::core::message::{Message, MessageId};

/// One scripted event replayed by [`ScriptedBackend`].
#[derive(Clone)]
pub enum ScriptStep {
    Delta(StreamDelta),
    /// Ends the stream with `BackendError::Other`.
    Fail(String),
    /// Ends the stream as if the transport observed the abort signal.
    Aborted,
    /// Cancels the token, then never yields again.
    Cancel(CancellationToken),
    /// Runs the closure and moves on to the next step.
    Hook(Arc<dyn Fn() + Send + Sync>),
    /// Never yields again; only cancellation ends the stream.
    Stall,
}

impl ScriptStep {
    pub fn text(text_so_far: &str) -> Self {
        ScriptStep::Delta(StreamDelta::text(text_so_far))
    }

    pub fn hook(f: impl Fn() + Send + Sync + 'static) -> Self {
        ScriptStep::Hook(Arc::new(f))
    }
}

/// Backend that replays the same script for every stream it opens and
/// remembers each call it received.
pub struct ScriptedBackend {
    steps: Vec<ScriptStep>,
    open_error: Option<String>,
    calls: Mutex<Vec<GenerationCall>>,
    transport_tokens: Mutex<Vec<CancellationToken>>,
}

impl ScriptedBackend {
    pub fn new(steps: Vec<ScriptStep>) -> Self {
        Self {
            steps,
            open_error: None,
            calls: Mutex::new(Vec::new()),
            transport_tokens: Mutex::new(Vec::new()),
        }
    }

    /// Rejects every `open_stream` with `BackendError::Api(message)`.
    pub fn failing_open(message: &str) -> Self {
        Self {
            steps: Vec::new(),
            open_error: Some(message.to_string()),
            calls: Mutex::new(Vec::new()),
            transport_tokens: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<GenerationCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Tokens handed to `open_stream`, one per opened stream.
    pub fn transport_tokens(&self) -> Vec<CancellationToken> {
        self.transport_tokens.lock().unwrap().clone()
    }
}

#[async_trait]
impl GenerationBackend for ScriptedBackend {
    async fn open_stream(
        &self,
        call: GenerationCall,
        cancel_token: CancellationToken,
    ) -> Result<DeltaStream, BackendError> {
        self.calls.lock().unwrap().push(call);
        self.transport_tokens.lock().unwrap().push(cancel_token);
        if let Some(message) = &self.open_error {
            return Err(BackendError::Api(message.clone()));
        }

        let steps = self.steps.clone().into_iter();
        Ok(stream::unfold(steps, |mut steps| async move {
            loop {
                match steps.next()? {
                    ScriptStep::Delta(delta) => return Some((Ok(delta), steps)),
                    ScriptStep::Fail(message) => {
                        return Some((Err(BackendError::Other(message)), steps))
                    }
                    ScriptStep::Aborted => return Some((Err(BackendError::Aborted), steps)),
                    ScriptStep::Cancel(token) => {
                        token.cancel();
                        future::pending::<()>().await;
                    }
                    ScriptStep::Hook(f) => f(),
                    ScriptStep::Stall => future::pending::<()>().await,
                }
            }
        })
        .boxed())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EditRecord {
    pub message_id: MessageId,
    pub state: StreamState,
    pub complete: bool,
}

/// Store wrapper that records edits and abort registrations before
/// delegating to an [`InMemoryStore`].
pub struct RecordingStore {
    pub inner: Arc<InMemoryStore>,
    edits: Mutex<Vec<EditRecord>>,
    abort_registrations: Mutex<Vec<Option<u64>>>,
}

impl RecordingStore {
    pub fn new(inner: Arc<InMemoryStore>) -> Self {
        Self {
            inner,
            edits: Mutex::new(Vec::new()),
            abort_registrations: Mutex::new(Vec::new()),
        }
    }

    pub fn edits(&self) -> Vec<EditRecord> {
        self.edits.lock().unwrap().clone()
    }

    /// Turn ids passed to `set_abort_controller`, `None` for clears.
    pub fn abort_registrations(&self) -> Vec<Option<u64>> {
        self.abort_registrations.lock().unwrap().clone()
    }
}

impl ConversationStore for RecordingStore {
    fn history_view_head(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Vec<Message>, StoreError> {
        self.inner.history_view_head(conversation_id)
    }

    fn append_assistant_placeholder(
        &self,
        conversation_id: &ConversationId,
        text: &str,
        seed: PlaceholderSeed,
    ) -> Result<MessageId, StoreError> {
        self.inner
            .append_assistant_placeholder(conversation_id, text, seed)
    }

    fn edit_message(
        &self,
        conversation_id: &ConversationId,
        message_id: &MessageId,
        update: &StreamState,
        complete: bool,
    ) -> Result<(), StoreError> {
        self.edits.lock().unwrap().push(EditRecord {
            message_id: message_id.clone(),
            state: update.clone(),
            complete,
        });
        self.inner
            .edit_message(conversation_id, message_id, update, complete)
    }

    fn set_abort_controller(
        &self,
        conversation_id: &ConversationId,
        handle: Option<AbortHandle>,
    ) -> Result<(), StoreError> {
        self.abort_registrations
            .lock()
            .unwrap()
            .push(handle.as_ref().map(|handle| handle.turn_id));
        self.inner.set_abort_controller(conversation_id, handle)
    }

    fn clear_abort_controller(
        &self,
        conversation_id: &ConversationId,
        turn_id: u64,
    ) -> Result<bool, StoreError> {
        self.inner.clear_abort_controller(conversation_id, turn_id)
    }

    fn title(&self, conversation_id: &ConversationId) -> Result<Option<String>, StoreError> {
        self.inner.title(conversation_id)
    }

    fn set_auto_title_if_unset(
        &self,
        conversation_id: &ConversationId,
        title: &str,
    ) -> Result<bool, StoreError> {
        self.inner.set_auto_title_if_unset(conversation_id, title)
    }
}

/// A conversation pre-filled with `messages`.
pub fn conversation_with(store: &InMemoryStore, messages: Vec<Message>) -> ConversationId {
    let conversation = store.create_conversation(None);
    for message in messages {
        store.append_message(&conversation, message).unwrap();
    }
    conversation
}
