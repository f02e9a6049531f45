use serde::{Deserialize, Serialize};

/// When assistant replies are read aloud.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutoSpeak {
    #[default]
    Off,
    FirstLine,
    All,
}

/// Follow-up behaviors run after each assistant turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatAutoAi {
    pub auto_speak: AutoSpeak,
    pub auto_title_chat: bool,
    pub auto_suggest_diagrams: bool,
    pub auto_suggest_html_ui: bool,
    pub auto_suggest_questions: bool,
}

impl Default for ChatAutoAi {
    fn default() -> Self {
        Self {
            auto_speak: AutoSpeak::Off,
            auto_title_chat: true,
            auto_suggest_diagrams: false,
            auto_suggest_html_ui: false,
            auto_suggest_questions: false,
        }
    }
}

impl ChatAutoAi {
    pub fn any_suggestions(&self) -> bool {
        self.auto_suggest_diagrams || self.auto_suggest_html_ui || self.auto_suggest_questions
    }
}

#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq)]
pub struct Config {
    /// OpenAI-compatible API root, e.g. "https://api.openai.com/v1"
    pub base_url: Option<String>,
    pub default_model: Option<String>,
    /// Model used for conversation titles; falls back to the turn's model
    pub title_model: Option<String>,
    /// Skip multi-pane throttling awareness
    pub high_performance: Option<bool>,
    #[serde(default)]
    pub chat_auto_ai: ChatAutoAi,
}

/// Read-only view of the settings a turn consults.
pub trait SettingsProvider: Send + Sync {
    fn chat_auto_ai(&self) -> ChatAutoAi;
    fn high_performance(&self) -> bool;
    fn title_model(&self) -> Option<String>;
}

impl SettingsProvider for Config {
    fn chat_auto_ai(&self) -> ChatAutoAi {
        self.chat_auto_ai
    }

    fn high_performance(&self) -> bool {
        self.high_performance.unwrap_or(false)
    }

    fn title_model(&self) -> Option<String> {
        self.title_model.clone()
    }
}
