//! Turns a stored message history into a [`GenerateRequest`].

use std::collections::HashMap;
use std::error::Error as StdError;
use std::fmt;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use base64::Engine as _;
use tracing::warn;

use crate::api::{ChatEntry, GenerateRequest, Part, SystemInstruction};
use crate::core::message::{DataRef, FragmentPart, Message, Role};

const DEFAULT_IMAGE_MIME: &str = "image/png";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageAsset {
    pub mime_type: Option<String>,
    pub base64: String,
}

impl ImageAsset {
    pub fn from_bytes(mime_type: Option<String>, bytes: &[u8]) -> Self {
        Self {
            mime_type,
            base64: base64::prelude::BASE64_STANDARD.encode(bytes),
        }
    }
}

#[async_trait]
pub trait ImageAssetStore: Send + Sync {
    async fn resolve(&self, asset_id: &str) -> Option<ImageAsset>;
}

#[derive(Default)]
pub struct InMemoryAssetStore {
    assets: Mutex<HashMap<String, ImageAsset>>,
}

impl InMemoryAssetStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, asset_id: impl Into<String>, asset: ImageAsset) {
        self.assets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(asset_id.into(), asset);
    }
}

#[async_trait]
impl ImageAssetStore for InMemoryAssetStore {
    async fn resolve(&self, asset_id: &str) -> Option<ImageAsset> {
        self.assets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(asset_id)
            .cloned()
    }
}

/// Projection fails as a whole; a request is never returned with images
/// silently missing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProjectionError {
    MissingImageAsset { asset_id: String },
    UnsupportedDataRef { reftype: &'static str },
}

impl fmt::Display for ProjectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProjectionError::MissingImageAsset { asset_id } => {
                write!(f, "Missing image asset: {asset_id}")
            }
            ProjectionError::UnsupportedDataRef { reftype } => {
                write!(f, "Unsupported image reference type: {reftype}")
            }
        }
    }
}

impl StdError for ProjectionError {}

pub async fn project_history(
    history: &[Message],
    assets: &dyn ImageAssetStore,
) -> Result<GenerateRequest, ProjectionError> {
    let mut request = GenerateRequest::default();

    for (index, message) in history.iter().enumerate() {
        if index == 0 && message.role == Role::System {
            request.system_message = Some(project_system(message));
            continue;
        }

        let entry = match message.role {
            Role::Assistant => project_assistant(message),
            Role::User => project_user(message, assets).await?,
            Role::System => {
                warn!(message_id = %message.id, "Skipping system message outside history head");
                continue;
            }
        };
        request.chat.push(entry);
    }

    Ok(request)
}

fn project_system(message: &Message) -> SystemInstruction {
    let mut instruction = SystemInstruction::default();
    for fragment in &message.fragments {
        match fragment.content_text() {
            Some(text) => instruction.parts.push(Part::text(text)),
            None => warn!(
                message_id = %message.id,
                part = fragment.part.type_name(),
                "Unexpected system fragment"
            ),
        }
    }
    instruction
}

fn project_assistant(message: &Message) -> ChatEntry {
    let mut parts = Vec::new();
    for fragment in message
        .fragments
        .iter()
        .filter(|fragment| fragment.is_content_or_attachment())
    {
        match &fragment.part {
            FragmentPart::Text { text } => parts.push(Part::text(text.clone())),
            FragmentPart::ToolCall(call) => parts.push(Part::ToolCall(call.clone())),
            other => warn!(
                message_id = %message.id,
                part = other.type_name(),
                "Unexpected model fragment part type"
            ),
        }
    }
    ChatEntry::model(parts)
}

async fn project_user(
    message: &Message,
    assets: &dyn ImageAssetStore,
) -> Result<ChatEntry, ProjectionError> {
    let mut parts = Vec::new();
    for fragment in message
        .fragments
        .iter()
        .filter(|fragment| fragment.is_content_or_attachment())
    {
        match &fragment.part {
            FragmentPart::Text { text } => parts.push(Part::text(text.clone())),
            FragmentPart::Doc {
                title,
                mime_type,
                text,
            } => parts.push(Part::Doc {
                title: title.clone(),
                mime_type: mime_type.clone(),
                text: text.clone(),
            }),
            FragmentPart::ImageRef { data_ref, .. } => {
                parts.push(resolve_image(data_ref, assets).await?);
            }
            other => warn!(
                message_id = %message.id,
                part = other.type_name(),
                "Unexpected user fragment part type"
            ),
        }
    }
    Ok(ChatEntry::user(parts))
}

async fn resolve_image(
    data_ref: &DataRef,
    assets: &dyn ImageAssetStore,
) -> Result<Part, ProjectionError> {
    let DataRef::Blob {
        asset_id,
        mime_type,
    } = data_ref
    else {
        warn!(reftype = data_ref.kind(), "Unexpected image data reference");
        return Err(ProjectionError::UnsupportedDataRef {
            reftype: data_ref.kind(),
        });
    };

    let Some(asset) = assets.resolve(asset_id).await else {
        warn!(asset_id = %asset_id, "Image asset missing from store");
        return Err(ProjectionError::MissingImageAsset {
            asset_id: asset_id.clone(),
        });
    };

    let mime_type = mime_type
        .clone()
        .or(asset.mime_type)
        .unwrap_or_else(|| DEFAULT_IMAGE_MIME.to_string());
    Ok(Part::InlineImage {
        mime_type,
        base64: asset.base64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ChatRole;
    use crate::core::message::{Fragment, ToolCall};

    fn blob(asset_id: &str) -> DataRef {
        DataRef::Blob {
            asset_id: asset_id.into(),
            mime_type: None,
        }
    }

    #[tokio::test]
    async fn extracts_system_and_preserves_order() {
        let assets = InMemoryAssetStore::new();
        let history = vec![
            Message::system("Be brief."),
            Message::user("2+2?"),
            Message::assistant("4"),
            Message::user("and 3+3?"),
        ];

        let request = project_history(&history, &assets).await.expect("projects");

        assert_eq!(request.system_text().as_deref(), Some("Be brief."));
        let roles: Vec<_> = request.chat.iter().map(|entry| entry.role).collect();
        assert_eq!(roles, vec![ChatRole::User, ChatRole::Model, ChatRole::User]);
        assert_eq!(request.chat[2].parts, vec![Part::text("and 3+3?")]);
    }

    #[tokio::test]
    async fn system_message_after_head_is_skipped() {
        let assets = InMemoryAssetStore::new();
        let history = vec![Message::user("hi"), Message::system("late system")];

        let request = project_history(&history, &assets).await.expect("projects");

        assert!(request.system_message.is_none());
        assert_eq!(request.chat.len(), 1);
    }

    #[tokio::test]
    async fn assistant_keeps_text_and_tool_calls_only() {
        let assets = InMemoryAssetStore::new();
        let mut assistant = Message::assistant("Looking it up");
        assistant.fragments.push(Fragment::tool_call(ToolCall {
            id: "call-1".into(),
            name: "lookup".into(),
            arguments: "{}".into(),
        }));
        assistant.fragments.push(Fragment::doc("a", "text/plain", "dropped"));
        assistant.fragments.push(Fragment::placeholder("..."));

        let request = project_history(&[assistant], &assets)
            .await
            .expect("projects");

        let parts = &request.chat[0].parts;
        assert_eq!(parts.len(), 2);
        assert!(matches!(parts[1], Part::ToolCall(ref call) if call.name == "lookup"));
    }

    #[tokio::test]
    async fn entries_with_no_surviving_parts_are_still_pushed() {
        let assets = InMemoryAssetStore::new();
        let placeholder_only = Message::new(Role::Assistant, vec![Fragment::placeholder("...")]);

        let request = project_history(&[Message::user("q"), placeholder_only], &assets)
            .await
            .expect("projects");

        assert_eq!(request.chat.len(), 2);
        assert!(request.chat[1].parts.is_empty());
    }

    #[tokio::test]
    async fn user_images_are_inlined_with_mime_fallbacks() {
        let assets = InMemoryAssetStore::new();
        assets.insert("jpeg", ImageAsset::from_bytes(Some("image/jpeg".into()), b"abc"));
        assets.insert("bare", ImageAsset::from_bytes(None, b"xyz"));
        let mut user = Message::user("look");
        user.fragments.push(Fragment::image(blob("jpeg")));
        user.fragments.push(Fragment::image(blob("bare")));
        user.fragments.push(Fragment::doc("notes.md", "text/markdown", "# notes"));

        let request = project_history(&[user], &assets).await.expect("projects");

        let parts = &request.chat[0].parts;
        assert_eq!(
            parts[1],
            Part::InlineImage {
                mime_type: "image/jpeg".into(),
                base64: "YWJj".into(),
            }
        );
        assert!(matches!(parts[2], Part::InlineImage { ref mime_type, .. } if mime_type == "image/png"));
        assert!(matches!(parts[3], Part::Doc { ref title, .. } if title == "notes.md"));
    }

    #[tokio::test]
    async fn data_ref_mime_wins_over_asset_mime() {
        let assets = InMemoryAssetStore::new();
        assets.insert("img", ImageAsset::from_bytes(Some("image/jpeg".into()), b"abc"));
        let mut user = Message::user("look");
        user.fragments.push(Fragment::image(DataRef::Blob {
            asset_id: "img".into(),
            mime_type: Some("image/webp".into()),
        }));

        let request = project_history(&[user], &assets).await.expect("projects");

        assert!(matches!(
            request.chat[0].parts[1],
            Part::InlineImage { ref mime_type, .. } if mime_type == "image/webp"
        ));
    }

    #[tokio::test]
    async fn missing_image_fails_whole_projection() {
        let assets = InMemoryAssetStore::new();
        let mut user = Message::user("look");
        user.fragments.push(Fragment::image(blob("gone")));

        let err = project_history(&[Message::user("first"), user], &assets)
            .await
            .expect_err("missing asset must fail");

        assert_eq!(
            err,
            ProjectionError::MissingImageAsset {
                asset_id: "gone".into()
            }
        );
    }

    #[tokio::test]
    async fn url_image_refs_are_rejected() {
        let assets = InMemoryAssetStore::new();
        let mut user = Message::user("look");
        user.fragments.push(Fragment::image(DataRef::Url {
            url: "https://example.com/cat.png".into(),
        }));

        let err = project_history(&[user], &assets)
            .await
            .expect_err("url refs are unsupported");

        assert_eq!(err, ProjectionError::UnsupportedDataRef { reftype: "url" });
    }
}
