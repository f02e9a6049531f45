use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl AsRef<str> for Role {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for Role {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "system" => Ok(Role::System),
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            _ => Err(format!("invalid message role: {value}")),
        }
    }
}

impl TryFrom<String> for Role {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::try_from(value.as_str())
    }
}

impl From<Role> for String {
    fn from(value: Role) -> Self {
        value.as_str().to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

static MESSAGE_COUNTER: AtomicU64 = AtomicU64::new(1);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Allocates a process-unique id: creation time in microseconds plus a
    /// monotonically increasing counter.
    pub fn generate() -> Self {
        let seq = MESSAGE_COUNTER.fetch_add(1, Ordering::Relaxed);
        Self(format!(
            "msg-{:x}-{:04x}",
            Utc::now().timestamp_micros(),
            seq
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where a fragment's payload lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reftype", rename_all = "snake_case")]
pub enum DataRef {
    /// Content-addressed asset held by the local image asset store.
    Blob {
        asset_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
    },
    /// Remote resource; kept for display only.
    Url { url: String },
}

impl DataRef {
    pub fn kind(&self) -> &'static str {
        match self {
            DataRef::Blob { .. } => "blob",
            DataRef::Url { .. } => "url",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// JSON-encoded arguments, as produced by the model.
    pub arguments: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "pt", rename_all = "snake_case")]
pub enum FragmentPart {
    Text {
        text: String,
    },
    ToolCall(ToolCall),
    ImageRef {
        data_ref: DataRef,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        alt_text: Option<String>,
    },
    Doc {
        title: String,
        mime_type: String,
        text: String,
    },
    Placeholder {
        text: String,
    },
}

impl FragmentPart {
    pub fn type_name(&self) -> &'static str {
        match self {
            FragmentPart::Text { .. } => "text",
            FragmentPart::ToolCall(_) => "tool_call",
            FragmentPart::ImageRef { .. } => "image_ref",
            FragmentPart::Doc { .. } => "doc",
            FragmentPart::Placeholder { .. } => "placeholder",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FragmentKind {
    /// Primary message content.
    Content,
    /// User-attached material (images, documents).
    Attachment,
    /// Transient UI-only content such as the generation placeholder.
    Void,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fragment {
    pub kind: FragmentKind,
    pub part: FragmentPart,
}

impl Fragment {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: FragmentKind::Content,
            part: FragmentPart::Text { text: text.into() },
        }
    }

    pub fn tool_call(call: ToolCall) -> Self {
        Self {
            kind: FragmentKind::Content,
            part: FragmentPart::ToolCall(call),
        }
    }

    pub fn image(data_ref: DataRef) -> Self {
        Self {
            kind: FragmentKind::Attachment,
            part: FragmentPart::ImageRef {
                data_ref,
                alt_text: None,
            },
        }
    }

    pub fn doc(
        title: impl Into<String>,
        mime_type: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            kind: FragmentKind::Attachment,
            part: FragmentPart::Doc {
                title: title.into(),
                mime_type: mime_type.into(),
                text: text.into(),
            },
        }
    }

    pub fn placeholder(text: impl Into<String>) -> Self {
        Self {
            kind: FragmentKind::Void,
            part: FragmentPart::Placeholder { text: text.into() },
        }
    }

    pub fn is_content(&self) -> bool {
        self.kind == FragmentKind::Content
    }

    pub fn is_content_or_attachment(&self) -> bool {
        matches!(self.kind, FragmentKind::Content | FragmentKind::Attachment)
    }

    pub fn content_text(&self) -> Option<&str> {
        match (&self.kind, &self.part) {
            (FragmentKind::Content, FragmentPart::Text { text }) => Some(text),
            _ => None,
        }
    }
}

/// Replaces the text of the last content text fragment, or appends to it when
/// `append` is set. A new content text fragment is pushed when none exists.
pub fn replace_last_content_text(fragments: &mut Vec<Fragment>, text: &str, append: bool) {
    let last_text = fragments.iter_mut().rev().find_map(|fragment| {
        match (&fragment.kind, &mut fragment.part) {
            (FragmentKind::Content, FragmentPart::Text { text }) => Some(text),
            _ => None,
        }
    });

    match last_text {
        Some(existing) if append => existing.push_str(text),
        Some(existing) => {
            existing.clear();
            existing.push_str(text);
        }
        None => fragments.push(Fragment::text(text)),
    }
}

/// The model that produced an assistant message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Generator {
    pub model_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub role: Role,
    pub fragments: Vec<Fragment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generator: Option<Generator>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purpose_id: Option<String>,
    #[serde(default)]
    pub pending_incomplete: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<DateTime<Utc>>,
}

impl Message {
    pub fn new(role: Role, fragments: Vec<Fragment>) -> Self {
        Self {
            id: MessageId::generate(),
            role,
            fragments,
            generator: None,
            purpose_id: None,
            pending_incomplete: false,
            updated: None,
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, vec![Fragment::text(text)])
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, vec![Fragment::text(text)])
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, vec![Fragment::text(text)])
    }

    pub fn with_purpose(mut self, purpose_id: impl Into<String>) -> Self {
        self.purpose_id = Some(purpose_id.into());
        self
    }

    pub fn is_user(&self) -> bool {
        self.role == Role::User
    }

    /// All content text parts joined by blank lines.
    pub fn text(&self) -> String {
        self.fragments
            .iter()
            .filter_map(Fragment::content_text)
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}
