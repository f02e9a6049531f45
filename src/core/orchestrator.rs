//! Runs one assistant turn against a conversation.
//!
//! A turn appends a placeholder reply, streams the model's answer into it and
//! then kicks off the follow-up work configured in [`ChatAutoAi`]: a title for
//! the conversation and suggestions for the new message. Follow-ups run as
//! detached tasks and never change the turn's result.

use std::error::Error as StdError;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::core::autotitle::auto_conversation_title;
use crate::core::backend::{GenerationBackend, GenerationCall, StreamContext};
use crate::core::chat_stream::{run_stream, StreamOutcome, StreamState};
use crate::core::config::{AutoSpeak, ChatAutoAi, SettingsProvider};
use crate::core::conversation::{
    AbortHandle, ConversationId, ConversationStore, PlaceholderSeed, StoreError,
};
use crate::core::message::{replace_last_content_text, MessageId};
use crate::core::panes::PaneRegistry;
use crate::core::projector::{project_history, ImageAssetStore, ProjectionError};
use crate::core::speech::{PersonaSpeaker, SpeechEngine};

const PLACEHOLDER_TEXT: &str = "...";

/// Which follow-ups to generate for a finished reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SuggestionKinds {
    pub diagrams: bool,
    pub html_ui: bool,
    pub questions: bool,
}

impl From<&ChatAutoAi> for SuggestionKinds {
    fn from(auto_ai: &ChatAutoAi) -> Self {
        Self {
            diagrams: auto_ai.auto_suggest_diagrams,
            html_ui: auto_ai.auto_suggest_html_ui,
            questions: auto_ai.auto_suggest_questions,
        }
    }
}

/// Generates follow-up suggestions (diagrams, UI mockups, next questions)
/// for an assistant message.
#[async_trait]
pub trait FollowUpSuggester: Send + Sync {
    async fn suggest(
        &self,
        conversation_id: ConversationId,
        message_id: MessageId,
        kinds: SuggestionKinds,
    ) -> Result<(), Box<dyn StdError + Send + Sync>>;
}

#[derive(Debug)]
pub enum TurnError {
    Store(StoreError),
    /// The history could not be turned into a request; nothing was sent.
    Projection(ProjectionError),
}

impl fmt::Display for TurnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TurnError::Store(err) => write!(f, "{err}"),
            TurnError::Projection(err) => write!(f, "Could not prepare the request: {err}"),
        }
    }
}

impl StdError for TurnError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            TurnError::Store(err) => Some(err),
            TurnError::Projection(err) => Some(err),
        }
    }
}

impl From<StoreError> for TurnError {
    fn from(err: StoreError) -> Self {
        TurnError::Store(err)
    }
}

impl From<ProjectionError> for TurnError {
    fn from(err: ProjectionError) -> Self {
        TurnError::Projection(err)
    }
}

pub struct ChatOrchestrator {
    store: Arc<dyn ConversationStore>,
    assets: Arc<dyn ImageAssetStore>,
    backend: Arc<dyn GenerationBackend>,
    settings: Arc<dyn SettingsProvider>,
    panes: Arc<PaneRegistry>,
    speech: Option<Arc<dyn SpeechEngine>>,
    suggester: Option<Arc<dyn FollowUpSuggester>>,
    next_turn_id: AtomicU64,
}

impl ChatOrchestrator {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        assets: Arc<dyn ImageAssetStore>,
        backend: Arc<dyn GenerationBackend>,
        settings: Arc<dyn SettingsProvider>,
    ) -> Self {
        Self {
            store,
            assets,
            backend,
            settings,
            panes: Arc::new(PaneRegistry::new()),
            speech: None,
            suggester: None,
            next_turn_id: AtomicU64::new(1),
        }
    }

    pub fn with_panes(mut self, panes: Arc<PaneRegistry>) -> Self {
        self.panes = panes;
        self
    }

    pub fn with_speech(mut self, engine: Arc<dyn SpeechEngine>) -> Self {
        self.speech = Some(engine);
        self
    }

    pub fn with_suggester(mut self, suggester: Arc<dyn FollowUpSuggester>) -> Self {
        self.suggester = Some(suggester);
        self
    }

    /// Panes that would repaint on every update; 0 turns throttling off.
    /// The pane driving the turn always counts, even when none is registered.
    fn parallel_view_count(&self) -> u32 {
        if self.settings.high_performance() {
            return 0;
        }
        u32::try_from(self.panes.visible_count().max(1)).unwrap_or(u32::MAX)
    }

    /// Generates the next assistant message for `conversation_id`.
    ///
    /// Returns `Ok(true)` when the reply streamed to completion and
    /// `Ok(false)` when it was aborted or the backend failed; in the failure
    /// case the reply text ends with an ` [Issue: ...]` note. `Err` means
    /// the turn could not start: the conversation is unknown or its history
    /// could not be projected.
    pub async fn run_turn(
        &self,
        model_id: &str,
        conversation_id: &ConversationId,
    ) -> Result<bool, TurnError> {
        let history = self.store.history_view_head(conversation_id)?;
        let parallel_view_count = self.parallel_view_count();
        let auto_ai = self.settings.chat_auto_ai();

        let seed = PlaceholderSeed {
            origin_model: model_id.to_string(),
            purpose_id: history.first().and_then(|message| message.purpose_id.clone()),
        };
        let message_id =
            self.store
                .append_assistant_placeholder(conversation_id, PLACEHOLDER_TEXT, seed)?;

        let speaker = match (&self.speech, auto_ai.auto_speak) {
            (Some(engine), mode) if mode != AutoSpeak::Off => {
                Some(PersonaSpeaker::new(Arc::clone(engine), mode))
            }
            _ => None,
        };

        let turn_id = self.next_turn_id.fetch_add(1, Ordering::Relaxed);
        let cancel_token = CancellationToken::new();
        self.store.set_abort_controller(
            conversation_id,
            Some(AbortHandle {
                turn_id,
                token: cancel_token.clone(),
            }),
        )?;

        let request = match project_history(&history, self.assets.as_ref()).await {
            Ok(request) => request,
            Err(err) => {
                warn!(conversation_id = %conversation_id, error = %err, "Failed to project history");
                let mut failed = StreamState::default();
                replace_last_content_text(&mut failed.fragments, &format!(" [Issue: {err}]"), true);
                if let Err(edit_err) =
                    self.store
                        .edit_message(conversation_id, &message_id, &failed, true)
                {
                    warn!(conversation_id = %conversation_id, error = %edit_err, "Failed to mark reply as failed");
                }
                self.release_abort_controller(conversation_id, turn_id);
                return Err(err.into());
            }
        };

        let call = GenerationCall {
            model_id: model_id.to_string(),
            request,
            context: StreamContext::conversation(conversation_id.as_str()),
        };
        debug!(
            conversation_id = %conversation_id,
            message_id = %message_id,
            model_id,
            parallel_view_count,
            "Starting turn"
        );

        let mut writer = ReplyWriter {
            store: self.store.as_ref(),
            conversation_id,
            message_id: &message_id,
            cancel_token: &cancel_token,
            speaker,
        };
        let status = run_stream(
            self.backend.as_ref(),
            call,
            parallel_view_count,
            &cancel_token,
            |state, complete| writer.on_update(state, complete),
        )
        .await;

        self.release_abort_controller(conversation_id, turn_id);

        if auto_ai.auto_title_chat {
            self.spawn_auto_title(model_id, conversation_id);
        }
        if status.outcome != StreamOutcome::Aborted && auto_ai.any_suggestions() {
            self.spawn_suggestions(conversation_id, &message_id, SuggestionKinds::from(&auto_ai));
        }

        debug!(conversation_id = %conversation_id, outcome = ?status.outcome, "Turn finished");
        Ok(status.is_success())
    }

    /// Drops this turn's abort handle unless a newer turn has replaced it.
    fn release_abort_controller(&self, conversation_id: &ConversationId, turn_id: u64) {
        match self.store.clear_abort_controller(conversation_id, turn_id) {
            Ok(true) => {}
            Ok(false) => debug!(
                conversation_id = %conversation_id,
                turn_id,
                "Abort controller already belongs to another turn"
            ),
            Err(err) => warn!(conversation_id = %conversation_id, error = %err, "Failed to clear abort controller"),
        }
    }

    fn spawn_auto_title(&self, model_id: &str, conversation_id: &ConversationId) {
        let store = Arc::clone(&self.store);
        let backend = Arc::clone(&self.backend);
        let model_id = self
            .settings
            .title_model()
            .unwrap_or_else(|| model_id.to_string());
        let conversation_id = conversation_id.clone();

        tokio::spawn(async move {
            if let Err(err) = auto_conversation_title(
                store.as_ref(),
                backend.as_ref(),
                &model_id,
                &conversation_id,
                false,
            )
            .await
            {
                warn!(conversation_id = %conversation_id, error = %err, "Auto title failed");
            }
        });
    }

    fn spawn_suggestions(
        &self,
        conversation_id: &ConversationId,
        message_id: &MessageId,
        kinds: SuggestionKinds,
    ) {
        let Some(suggester) = self.suggester.clone() else {
            debug!("No suggester configured; skipping follow-up suggestions");
            return;
        };
        let conversation_id = conversation_id.clone();
        let message_id = message_id.clone();

        tokio::spawn(async move {
            let log_conversation = conversation_id.clone();
            if let Err(err) = suggester.suggest(conversation_id, message_id, kinds).await {
                warn!(conversation_id = %log_conversation, error = %err, "Follow-up suggestions failed");
            }
        });
    }
}

/// Applies stream updates to the reply message and feeds speech.
struct ReplyWriter<'a> {
    store: &'a dyn ConversationStore,
    conversation_id: &'a ConversationId,
    message_id: &'a MessageId,
    cancel_token: &'a CancellationToken,
    speaker: Option<PersonaSpeaker>,
}

impl ReplyWriter<'_> {
    fn on_update(&mut self, state: &StreamState, complete: bool) {
        let aborted = self.cancel_token.is_cancelled();
        // A straggler after abort must not mark the reply as generating again.
        if aborted && !complete {
            return;
        }
        if let Err(err) =
            self.store
                .edit_message(self.conversation_id, self.message_id, state, complete)
        {
            warn!(conversation_id = %self.conversation_id, error = %err, "Failed to update reply");
        }
        if aborted {
            return;
        }
        if let (Some(speaker), Some(text)) = (self.speaker.as_mut(), state.first_text()) {
            if complete {
                speaker.finalize_text(text);
            } else {
                speaker.handle_text_so_far(text);
            }
        }
    }
}
