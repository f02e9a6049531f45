//! `set` / `unset` handling for config keys.

use std::error::Error;
use std::fmt;

use crate::core::config::{AutoSpeak, ChatAutoAi, Config, ConfigError};

pub const SETTING_KEYS: &[&str] = &[
    "base-url",
    "default-model",
    "title-model",
    "high-performance",
    "auto-speak",
    "auto-title",
    "suggest-diagrams",
    "suggest-html-ui",
    "suggest-questions",
];

#[derive(Debug)]
pub enum SettingError {
    UnknownKey(String),
    MissingValue(String),
    InvalidBoolean(String),
    InvalidAutoSpeak(String),
    Config(ConfigError),
}

impl fmt::Display for SettingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingError::UnknownKey(key) => write!(
                f,
                "Unknown config key: {key} (known keys: {})",
                SETTING_KEYS.join(", ")
            ),
            SettingError::MissingValue(key) => write!(f, "Missing value for {key}"),
            SettingError::InvalidBoolean(input) => write!(
                f,
                "Invalid boolean value: {input} (use on/off, true/false or yes/no)"
            ),
            SettingError::InvalidAutoSpeak(input) => write!(
                f,
                "Invalid auto-speak mode: {input} (use off, first_line or all)"
            ),
            SettingError::Config(err) => write!(f, "{err}"),
        }
    }
}

impl Error for SettingError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            SettingError::Config(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ConfigError> for SettingError {
    fn from(err: ConfigError) -> Self {
        SettingError::Config(err)
    }
}

pub fn run_set(key: &str, value: &[String]) -> Result<(), SettingError> {
    let mut config = Config::load()?;
    let message = apply_set(&mut config, key, &value.join(" "))?;
    config.save()?;
    println!("{message}");
    Ok(())
}

pub fn run_unset(key: &str) -> Result<(), SettingError> {
    let mut config = Config::load()?;
    let message = apply_unset(&mut config, key)?;
    config.save()?;
    println!("{message}");
    Ok(())
}

fn string_field<'a>(config: &'a mut Config, key: &str) -> Option<&'a mut Option<String>> {
    match key {
        "base-url" => Some(&mut config.base_url),
        "default-model" => Some(&mut config.default_model),
        "title-model" => Some(&mut config.title_model),
        _ => None,
    }
}

fn auto_ai_flag<'a>(auto_ai: &'a mut ChatAutoAi, key: &str) -> Option<&'a mut bool> {
    match key {
        "auto-title" => Some(&mut auto_ai.auto_title_chat),
        "suggest-diagrams" => Some(&mut auto_ai.auto_suggest_diagrams),
        "suggest-html-ui" => Some(&mut auto_ai.auto_suggest_html_ui),
        "suggest-questions" => Some(&mut auto_ai.auto_suggest_questions),
        _ => None,
    }
}

fn parse_bool(input: &str) -> Result<bool, SettingError> {
    match input.to_ascii_lowercase().as_str() {
        "on" | "true" | "yes" | "1" => Ok(true),
        "off" | "false" | "no" | "0" => Ok(false),
        _ => Err(SettingError::InvalidBoolean(input.to_string())),
    }
}

fn parse_auto_speak(input: &str) -> Result<AutoSpeak, SettingError> {
    match input.to_ascii_lowercase().replace('-', "_").as_str() {
        "off" => Ok(AutoSpeak::Off),
        "first_line" => Ok(AutoSpeak::FirstLine),
        "all" => Ok(AutoSpeak::All),
        _ => Err(SettingError::InvalidAutoSpeak(input.to_string())),
    }
}

pub fn apply_set(config: &mut Config, key: &str, value: &str) -> Result<String, SettingError> {
    let value = value.trim();
    if !SETTING_KEYS.contains(&key) {
        return Err(SettingError::UnknownKey(key.to_string()));
    }
    if value.is_empty() {
        return Err(SettingError::MissingValue(key.to_string()));
    }

    if let Some(field) = string_field(config, key) {
        *field = Some(value.to_string());
    } else if key == "high-performance" {
        config.high_performance = Some(parse_bool(value)?);
    } else if key == "auto-speak" {
        config.chat_auto_ai.auto_speak = parse_auto_speak(value)?;
    } else if let Some(flag) = auto_ai_flag(&mut config.chat_auto_ai, key) {
        *flag = parse_bool(value)?;
    }
    Ok(format!("✅ Set {key} to: {value}"))
}

pub fn apply_unset(config: &mut Config, key: &str) -> Result<String, SettingError> {
    if !SETTING_KEYS.contains(&key) {
        return Err(SettingError::UnknownKey(key.to_string()));
    }

    if let Some(field) = string_field(config, key) {
        *field = None;
    } else if key == "high-performance" {
        config.high_performance = None;
    } else if key == "auto-speak" {
        config.chat_auto_ai.auto_speak = AutoSpeak::default();
    } else {
        let mut defaults = ChatAutoAi::default();
        let default = auto_ai_flag(&mut defaults, key).map(|flag| *flag);
        if let (Some(flag), Some(default)) = (auto_ai_flag(&mut config.chat_auto_ai, key), default)
        {
            *flag = default;
        }
    }
    Ok(format!("✅ Unset {key}"))
}
