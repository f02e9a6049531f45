//! Conversation titles generated by the model itself.

use std::error::Error as StdError;
use std::fmt;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::api::{ChatEntry, GenerateRequest, Part, SystemInstruction};
use crate::core::backend::{GenerationBackend, GenerationCall, StreamContext};
use crate::core::chat_stream::{run_stream, StreamOutcome, StreamState};
use crate::core::conversation::{ConversationId, ConversationStore, StoreError};
use crate::core::message::{Message, Role};

const TITLE_HISTORY_MESSAGES: usize = 5;
const TITLE_EXCERPT_CHARS: usize = 300;
const TITLE_MAX_CHARS: usize = 64;

#[derive(Debug)]
pub enum AutoTitleError {
    Store(StoreError),
    Generation(String),
    EmptyTitle,
}

impl fmt::Display for AutoTitleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AutoTitleError::Store(err) => write!(f, "{err}"),
            AutoTitleError::Generation(message) => write!(f, "Title generation failed: {message}"),
            AutoTitleError::EmptyTitle => write!(f, "Model returned an empty title"),
        }
    }
}

impl StdError for AutoTitleError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            AutoTitleError::Store(err) => Some(err),
            _ => None,
        }
    }
}

impl From<StoreError> for AutoTitleError {
    fn from(err: StoreError) -> Self {
        AutoTitleError::Store(err)
    }
}

/// Generates and stores a title for the conversation.
///
/// Does nothing when a title already exists, unless `force` is set. The
/// title is stored only if none appeared while generating. Returns whether a
/// title was stored.
pub async fn auto_conversation_title(
    store: &dyn ConversationStore,
    backend: &dyn GenerationBackend,
    model_id: &str,
    conversation_id: &ConversationId,
    force: bool,
) -> Result<bool, AutoTitleError> {
    if !force && store.title(conversation_id)?.is_some() {
        return Ok(false);
    }

    let history = store.history_view_head(conversation_id)?;
    let Some(request) = title_request(&history) else {
        debug!(conversation_id = %conversation_id, "No text to title yet");
        return Ok(false);
    };

    let call = GenerationCall {
        model_id: model_id.to_string(),
        request,
        context: StreamContext {
            label: "conversation-title",
            reference: conversation_id.to_string(),
        },
    };
    let mut answer = StreamState::default();
    let status = run_stream(
        backend,
        call,
        0,
        &CancellationToken::new(),
        |state, complete| {
            if complete {
                answer = state.clone();
            }
        },
    )
    .await;

    if status.outcome != StreamOutcome::Success {
        return Err(AutoTitleError::Generation(
            status
                .error_message
                .unwrap_or_else(|| "generation did not complete".to_string()),
        ));
    }

    let title = clean_title(answer.first_text().unwrap_or_default());
    if title.is_empty() {
        return Err(AutoTitleError::EmptyTitle);
    }

    let stored = store.set_auto_title_if_unset(conversation_id, &title)?;
    debug!(conversation_id = %conversation_id, title = %title, stored, "Auto title generated");
    Ok(stored)
}

fn title_request(history: &[Message]) -> Option<GenerateRequest> {
    let excerpt = history
        .iter()
        .filter(|message| message.role != Role::System)
        .filter_map(|message| {
            let text = message.text();
            let text = text.trim();
            (!text.is_empty()).then(|| {
                let speaker = if message.is_user() { "User" } else { "Assistant" };
                format!("{speaker}: {}", clip(text, TITLE_EXCERPT_CHARS))
            })
        })
        .collect::<Vec<_>>();
    if excerpt.is_empty() {
        return None;
    }
    let start = excerpt.len().saturating_sub(TITLE_HISTORY_MESSAGES);

    Some(GenerateRequest {
        system_message: Some(SystemInstruction {
            parts: vec![Part::text(
                "You are an AI assistant that writes short, descriptive titles for conversations.",
            )],
        }),
        chat: vec![ChatEntry::user(vec![Part::text(format!(
            "Analyze the conversation below and reply with a 2 to 4 word title, nothing else.\n\n{}",
            excerpt[start..].join("\n")
        ))])],
    })
}

fn clip(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

fn clean_title(raw: &str) -> String {
    let line = raw
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or_default();
    let line = line
        .strip_prefix("Title:")
        .or_else(|| line.strip_prefix("title:"))
        .unwrap_or(line)
        .trim();
    let line = line
        .trim_matches(|c| matches!(c, '"' | '\'' | '`' | '*'))
        .trim_end_matches('.')
        .trim();
    line.chars().take(TITLE_MAX_CHARS).collect()
}
