//! Conversation state shared by every in-flight turn.
//!
//! The store is the only mutable resource the orchestrator touches. Each
//! operation is atomic: callers recompute full state before an edit instead
//! of patching earlier reads.

use std::collections::HashMap;
use std::error::Error as StdError;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::core::chat_stream::StreamState;
use crate::core::message::{Fragment, Generator, Message, MessageId, Role};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConversationId(String);

static CONVERSATION_COUNTER: AtomicU64 = AtomicU64::new(1);

impl ConversationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn generate() -> Self {
        let seq = CONVERSATION_COUNTER.fetch_add(1, Ordering::Relaxed);
        Self(format!("conv-{:x}-{seq}", Utc::now().timestamp_millis()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Cancellation handle for one turn. The UI cancels `token`; the turn that
/// registered it is identified by `turn_id`.
#[derive(Debug, Clone)]
pub struct AbortHandle {
    pub turn_id: u64,
    pub token: CancellationToken,
}

/// Metadata stamped onto a fresh assistant placeholder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaceholderSeed {
    pub origin_model: String,
    pub purpose_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    UnknownConversation(ConversationId),
    UnknownMessage {
        conversation_id: ConversationId,
        message_id: MessageId,
    },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::UnknownConversation(id) => write!(f, "Unknown conversation: {id}"),
            StoreError::UnknownMessage {
                conversation_id,
                message_id,
            } => write!(
                f,
                "Unknown message {message_id} in conversation {conversation_id}"
            ),
        }
    }
}

impl StdError for StoreError {}

pub trait ConversationStore: Send + Sync {
    /// The messages currently shown for the conversation, oldest first.
    fn history_view_head(&self, conversation_id: &ConversationId)
        -> Result<Vec<Message>, StoreError>;

    fn append_assistant_placeholder(
        &self,
        conversation_id: &ConversationId,
        text: &str,
        seed: PlaceholderSeed,
    ) -> Result<MessageId, StoreError>;

    /// Overwrites the message content with `update`. Non-final edits keep the
    /// message marked as still generating.
    fn edit_message(
        &self,
        conversation_id: &ConversationId,
        message_id: &MessageId,
        update: &StreamState,
        complete: bool,
    ) -> Result<(), StoreError>;

    fn set_abort_controller(
        &self,
        conversation_id: &ConversationId,
        handle: Option<AbortHandle>,
    ) -> Result<(), StoreError>;

    /// Clears the registered handle only if it still belongs to `turn_id`.
    /// Returns whether a handle was removed.
    fn clear_abort_controller(
        &self,
        conversation_id: &ConversationId,
        turn_id: u64,
    ) -> Result<bool, StoreError>;

    /// User title if set, else the generated one.
    fn title(&self, conversation_id: &ConversationId) -> Result<Option<String>, StoreError>;

    /// Stores a generated title unless any title is already present.
    fn set_auto_title_if_unset(
        &self,
        conversation_id: &ConversationId,
        title: &str,
    ) -> Result<bool, StoreError>;
}

#[derive(Debug, Clone)]
pub struct Conversation {
    pub id: ConversationId,
    pub messages: Vec<Message>,
    pub user_title: Option<String>,
    pub auto_title: Option<String>,
    pub system_purpose_id: Option<String>,
    pub created: DateTime<Utc>,
    pub updated: Option<DateTime<Utc>>,
    pub abort_controller: Option<AbortHandle>,
}

impl Conversation {
    fn new(id: ConversationId, system_purpose_id: Option<String>) -> Self {
        Self {
            id,
            messages: Vec::new(),
            user_title: None,
            auto_title: None,
            system_purpose_id,
            created: Utc::now(),
            updated: None,
            abort_controller: None,
        }
    }
}

#[derive(Default)]
pub struct InMemoryStore {
    conversations: Mutex<HashMap<ConversationId, Conversation>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ConversationId, Conversation>> {
        self.conversations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn with_conversation<T>(
        &self,
        conversation_id: &ConversationId,
        f: impl FnOnce(&mut Conversation) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut conversations = self.lock();
        let conversation = conversations
            .get_mut(conversation_id)
            .ok_or_else(|| StoreError::UnknownConversation(conversation_id.clone()))?;
        f(conversation)
    }

    pub fn create_conversation(&self, system_purpose_id: Option<String>) -> ConversationId {
        let id = ConversationId::generate();
        self.lock()
            .insert(id.clone(), Conversation::new(id.clone(), system_purpose_id));
        id
    }

    pub fn append_message(
        &self,
        conversation_id: &ConversationId,
        message: Message,
    ) -> Result<MessageId, StoreError> {
        self.with_conversation(conversation_id, |conversation| {
            let id = message.id.clone();
            conversation.messages.push(message);
            conversation.updated = Some(Utc::now());
            Ok(id)
        })
    }

    pub fn message(
        &self,
        conversation_id: &ConversationId,
        message_id: &MessageId,
    ) -> Result<Message, StoreError> {
        self.with_conversation(conversation_id, |conversation| {
            conversation
                .messages
                .iter()
                .find(|message| &message.id == message_id)
                .cloned()
                .ok_or_else(|| StoreError::UnknownMessage {
                    conversation_id: conversation_id.clone(),
                    message_id: message_id.clone(),
                })
        })
    }

    pub fn abort_controller(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Option<AbortHandle>, StoreError> {
        self.with_conversation(conversation_id, |conversation| {
            Ok(conversation.abort_controller.clone())
        })
    }

    /// Signals the registered turn to stop. Returns false when nothing is
    /// generating.
    pub fn cancel_generation(&self, conversation_id: &ConversationId) -> Result<bool, StoreError> {
        self.with_conversation(conversation_id, |conversation| {
            match &conversation.abort_controller {
                Some(handle) => {
                    handle.token.cancel();
                    Ok(true)
                }
                None => Ok(false),
            }
        })
    }

    pub fn set_user_title(
        &self,
        conversation_id: &ConversationId,
        title: impl Into<String>,
    ) -> Result<(), StoreError> {
        let title = title.into();
        self.with_conversation(conversation_id, |conversation| {
            conversation.user_title = Some(title);
            Ok(())
        })
    }
}

impl ConversationStore for InMemoryStore {
    fn history_view_head(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Vec<Message>, StoreError> {
        self.with_conversation(conversation_id, |conversation| {
            Ok(conversation.messages.clone())
        })
    }

    fn append_assistant_placeholder(
        &self,
        conversation_id: &ConversationId,
        text: &str,
        seed: PlaceholderSeed,
    ) -> Result<MessageId, StoreError> {
        let mut message = Message::new(Role::Assistant, vec![Fragment::placeholder(text)]);
        message.generator = Some(Generator {
            model_id: seed.origin_model,
        });
        message.purpose_id = seed.purpose_id;
        message.pending_incomplete = true;
        self.append_message(conversation_id, message)
    }

    fn edit_message(
        &self,
        conversation_id: &ConversationId,
        message_id: &MessageId,
        update: &StreamState,
        complete: bool,
    ) -> Result<(), StoreError> {
        self.with_conversation(conversation_id, |conversation| {
            let message = conversation
                .messages
                .iter_mut()
                .find(|message| &message.id == message_id)
                .ok_or_else(|| StoreError::UnknownMessage {
                    conversation_id: conversation_id.clone(),
                    message_id: message_id.clone(),
                })?;

            message.fragments = update.fragments.clone();
            if let Some(origin) = &update.origin_model {
                message.generator = Some(Generator {
                    model_id: origin.clone(),
                });
            }
            message.pending_incomplete = !complete && update.pending_incomplete.unwrap_or(true);
            if complete {
                let now = Utc::now();
                message.updated = Some(now);
                conversation.updated = Some(now);
            }
            Ok(())
        })
    }

    fn set_abort_controller(
        &self,
        conversation_id: &ConversationId,
        handle: Option<AbortHandle>,
    ) -> Result<(), StoreError> {
        self.with_conversation(conversation_id, |conversation| {
            conversation.abort_controller = handle;
            Ok(())
        })
    }

    fn clear_abort_controller(
        &self,
        conversation_id: &ConversationId,
        turn_id: u64,
    ) -> Result<bool, StoreError> {
        self.with_conversation(conversation_id, |conversation| {
            let owned = conversation
                .abort_controller
                .as_ref()
                .is_some_and(|handle| handle.turn_id == turn_id);
            if owned {
                conversation.abort_controller = None;
            }
            Ok(owned)
        })
    }

    fn title(&self, conversation_id: &ConversationId) -> Result<Option<String>, StoreError> {
        self.with_conversation(conversation_id, |conversation| {
            Ok(conversation
                .user_title
                .clone()
                .or_else(|| conversation.auto_title.clone()))
        })
    }

    fn set_auto_title_if_unset(
        &self,
        conversation_id: &ConversationId,
        title: &str,
    ) -> Result<bool, StoreError> {
        self.with_conversation(conversation_id, |conversation| {
            if conversation.user_title.is_some() || conversation.auto_title.is_some() {
                return Ok(false);
            }
            conversation.auto_title = Some(title.to_string());
            Ok(true)
        })
    }
}
