//! One-shot "say" command

use std::env;
use std::error::Error;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::debug;

use crate::core::chat_stream::StreamState;
use crate::core::config::Config;
use crate::core::conversation::{
    AbortHandle, ConversationId, ConversationStore, InMemoryStore, PlaceholderSeed, StoreError,
};
use crate::core::message::{DataRef, Fragment, Message, MessageId, Role};
use crate::core::openai_backend::{OpenAiCompatibleBackend, DEFAULT_BASE_URL};
use crate::core::orchestrator::ChatOrchestrator;
use crate::core::panes::PaneRegistry;
use crate::core::projector::{ImageAsset, InMemoryAssetStore};

pub struct SayOptions {
    pub prompt: Vec<String>,
    pub system: Option<String>,
    pub images: Vec<PathBuf>,
    pub model: Option<String>,
    pub base_url: Option<String>,
}

pub async fn run_say(options: SayOptions) -> Result<(), Box<dyn Error>> {
    let prompt = options.prompt.join(" ");
    if prompt.trim().is_empty() {
        eprintln!("Usage: lumina say <prompt>");
        std::process::exit(1);
    }

    let mut config = Config::load()?;
    let Some(model) = options.model.or_else(|| config.default_model.clone()) else {
        eprintln!("❌ No model selected. Pass -m <MODEL> or set default_model in the config file.");
        std::process::exit(1);
    };
    let Ok(api_key) = env::var("OPENAI_API_KEY") else {
        eprintln!("❌ OPENAI_API_KEY is not set.");
        std::process::exit(1);
    };
    let base_url = options
        .base_url
        .or_else(|| env::var("OPENAI_BASE_URL").ok())
        .or_else(|| config.base_url.clone())
        .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

    // One-shot conversations are discarded on exit.
    config.chat_auto_ai.auto_title_chat = false;
    config.chat_auto_ai.auto_suggest_diagrams = false;
    config.chat_auto_ai.auto_suggest_html_ui = false;
    config.chat_auto_ai.auto_suggest_questions = false;

    let store = Arc::new(InMemoryStore::new());
    let assets = Arc::new(InMemoryAssetStore::new());
    let conversation = store.create_conversation(None);
    if let Some(system) = options.system.filter(|text| !text.trim().is_empty()) {
        store.append_message(&conversation, Message::system(system))?;
    }

    let mut fragments = vec![Fragment::text(prompt)];
    for (index, path) in options.images.iter().enumerate() {
        let bytes = fs::read(path)
            .map_err(|err| format!("Failed to read image {}: {err}", path.display()))?;
        let asset_id = format!("cli-image-{index}");
        let mime_type = image_mime_type(path);
        assets.insert(
            asset_id.clone(),
            ImageAsset::from_bytes(mime_type.clone(), &bytes),
        );
        fragments.push(Fragment::image(DataRef::Blob {
            asset_id,
            mime_type,
        }));
    }
    store.append_message(&conversation, Message::new(Role::User, fragments))?;

    debug!(model = %model, base_url = %base_url, "Running one-shot turn");
    let panes = Arc::new(PaneRegistry::new());
    let pane = panes.open_pane(conversation.clone());
    let orchestrator = ChatOrchestrator::new(
        Arc::new(EchoStore::new(Arc::clone(&store))),
        assets,
        Arc::new(OpenAiCompatibleBackend::new(base_url, api_key)),
        Arc::new(config),
    )
    .with_panes(Arc::clone(&panes));

    let outcome = orchestrator.run_turn(&model, &conversation).await;
    panes.close_pane(pane);
    match outcome {
        Ok(true) => Ok(()),
        Ok(false) => {
            eprintln!("\n❌ Generation did not complete.");
            std::process::exit(1);
        }
        Err(err) => {
            eprintln!("❌ Error: {err}");
            std::process::exit(1);
        }
    }
}

fn image_mime_type(path: &Path) -> Option<String> {
    let extension = path.extension()?.to_str()?.to_ascii_lowercase();
    let mime = match extension.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        _ => return None,
    };
    Some(mime.to_string())
}

/// Store that prints reply text to stdout as edits land.
struct EchoStore {
    inner: Arc<InMemoryStore>,
    printed: Mutex<String>,
}

impl EchoStore {
    fn new(inner: Arc<InMemoryStore>) -> Self {
        Self {
            inner,
            printed: Mutex::new(String::new()),
        }
    }

    fn echo(&self, update: &StreamState, complete: bool) {
        let mut printed = self.printed.lock().unwrap_or_else(PoisonError::into_inner);
        let text = update.first_text().unwrap_or_default();
        let mut stdout = io::stdout().lock();
        if let Some(suffix) = unprinted_suffix(&printed, text) {
            let _ = stdout.write_all(suffix.as_bytes());
            *printed = text.to_string();
        }
        if complete {
            let _ = stdout.write_all(b"\n");
        }
        let _ = stdout.flush();
    }
}

/// The part of `text` not yet on screen. `None` when the model rewrote text
/// that was already printed.
fn unprinted_suffix<'a>(printed: &str, text: &'a str) -> Option<&'a str> {
    text.strip_prefix(printed).filter(|suffix| !suffix.is_empty())
}

impl ConversationStore for EchoStore {
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
        self.inner
            .edit_message(conversation_id, message_id, update, complete)?;
        self.echo(update, complete);
        Ok(())
    }

    fn set_abort_controller(
        &self,
        conversation_id: &ConversationId,
        handle: Option<AbortHandle>,
    ) -> Result<(), StoreError> {
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
