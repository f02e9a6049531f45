//! Provider-agnostic generation request shapes.
//!
//! A [`GenerateRequest`] is what the history projector produces and what every
//! [`crate::core::backend::GenerationBackend`] consumes. Vendor wire formats
//! live in submodules.

use serde::{Deserialize, Serialize};

use crate::core::message::ToolCall;

pub mod openai;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "pt", rename_all = "snake_case")]
pub enum Part {
    Text {
        text: String,
    },
    ToolCall(ToolCall),
    Doc {
        title: String,
        mime_type: String,
        text: String,
    },
    InlineImage {
        mime_type: String,
        base64: String,
    },
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Part::Text { text: text.into() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    User,
    Model,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatEntry {
    pub role: ChatRole,
    pub parts: Vec<Part>,
}

impl ChatEntry {
    pub fn user(parts: Vec<Part>) -> Self {
        Self {
            role: ChatRole::User,
            parts,
        }
    }

    pub fn model(parts: Vec<Part>) -> Self {
        Self {
            role: ChatRole::Model,
            parts,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemInstruction {
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerateRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_message: Option<SystemInstruction>,
    pub chat: Vec<ChatEntry>,
}

impl GenerateRequest {
    /// Text of every system instruction part, in order.
    pub fn system_text(&self) -> Option<String> {
        let parts = &self.system_message.as_ref()?.parts;
        let text = parts
            .iter()
            .filter_map(|part| match part {
                Part::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n\n");
        Some(text)
    }
}
