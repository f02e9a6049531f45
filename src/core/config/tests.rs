use super::data::{AutoSpeak, ChatAutoAi, Config, SettingsProvider};
use super::io::ConfigError;
use tempfile::TempDir;

#[test]
fn test_load_nonexistent_config() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let config_path = temp_dir.path().join("nonexistent_config.toml");

    let config = Config::load_from_path(&config_path).expect("Failed to load config");

    assert_eq!(config, Config::default());
    assert!(config.chat_auto_ai.auto_title_chat);
    assert_eq!(config.chat_auto_ai.auto_speak, AutoSpeak::Off);
}

#[test]
fn test_config_persistence_lifecycle() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let config_path = temp_dir.path().join("nested").join("config.toml");

    let config = Config {
        base_url: Some("http://localhost:11434/v1".to_string()),
        default_model: Some("llama3".to_string()),
        title_model: Some("llama3-mini".to_string()),
        high_performance: Some(true),
        chat_auto_ai: ChatAutoAi {
            auto_speak: AutoSpeak::FirstLine,
            auto_suggest_questions: true,
            ..ChatAutoAi::default()
        },
    };
    config.save_to_path(&config_path).expect("save failed");

    let loaded = Config::load_from_path(&config_path).expect("load failed");
    assert_eq!(loaded, config);
    assert!(loaded.high_performance());
    assert_eq!(loaded.title_model().as_deref(), Some("llama3-mini"));
    assert!(loaded.chat_auto_ai().any_suggestions());
}

#[test]
fn partial_auto_ai_table_keeps_defaults() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let config_path = temp_dir.path().join("config.toml");
    std::fs::write(
        &config_path,
        "default_model = \"gpt-4o\"\n\n[chat_auto_ai]\nauto_speak = \"all\"\n",
    )
    .expect("write");

    let config = Config::load_from_path(&config_path).expect("load failed");

    assert_eq!(config.default_model.as_deref(), Some("gpt-4o"));
    assert_eq!(config.chat_auto_ai.auto_speak, AutoSpeak::All);
    assert!(config.chat_auto_ai.auto_title_chat);
    assert!(!config.chat_auto_ai.any_suggestions());
    assert!(!config.high_performance());
}

#[test]
fn invalid_toml_reports_parse_error_with_path() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let config_path = temp_dir.path().join("config.toml");
    std::fs::write(&config_path, "default_model = [").expect("write");

    let err = Config::load_from_path(&config_path).expect_err("should fail");

    assert!(matches!(err, ConfigError::Parse { .. }));
    assert!(err.to_string().contains("config.toml"));
}
