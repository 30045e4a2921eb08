use super::*;
use std::fs;
use tempfile::TempDir;

#[test]
fn explicit_override_wins() {
    let temp_dir = TempDir::new().expect("should create TempDir successfully");
    let dir = get_config_dir(Some(temp_dir.path())).expect("should resolve override");
    assert_eq!(dir, temp_dir.path());
}

#[test]
fn config_file_persistence() {
    let temp_dir = TempDir::new().expect("should create TempDir successfully");
    let config_path = temp_dir.path().join("config.toml");

    let original_config = Config {
        ollama: OllamaConfig {
            protocol: "https".to_string(),
            host: "test-host".to_string(),
            port: 8080,
            embedding_model: "test-embed".to_string(),
            summary_model: "test-summary".to_string(),
            embedding_dimension: 384,
            request_timeout_seconds: 30,
            retry_attempts: 2,
        },
        ..Config::default()
    };

    let toml_content = toml::to_string_pretty(&original_config)
        .expect("config should convert to toml string successfully");
    fs::write(&config_path, toml_content).expect("should write to config_path successfully");

    let loaded_config = Config::load(temp_dir.path()).expect("should load config");
    assert_eq!(loaded_config.ollama, original_config.ollama);
    assert_eq!(loaded_config.get_base_dir(), temp_dir.path());
}

#[test]
fn invalid_toml_handling() {
    let invalid_toml = r#"
        [ollama
        host = "localhost"
        port = "invalid_port"
    "#;

    let result: Result<Config, toml::de::Error> = toml::from_str(invalid_toml);
    assert!(result.is_err());
}

#[test]
fn wrongly_typed_field_is_rejected() {
    let result: Result<Config, toml::de::Error> = toml::from_str(
        r#"
        [ollama]
        port = "not-a-number"
        "#,
    );
    assert!(result.is_err());
}

#[test]
fn complete_valid_config() {
    let valid_toml = r#"
        [ollama]
        protocol = "http"
        host = "localhost"
        port = 11434
        embedding_model = "nomic-embed-text:latest"
        summary_model = "llama3.2:latest"
        embedding_dimension = 768
        request_timeout_seconds = 60
        retry_attempts = 3

        [processor]
        poll_interval_ms = 500
        pipeline_timeout_seconds = 90
        embed_token_budget = 4000
        stuck_after_seconds = 300

        [queue]
        retention_days = 14

        [search]
        default_limit = 5
        similarity_threshold = 0.4
        query_timeout_seconds = 5
    "#;

    let config: Config = toml::from_str(valid_toml).expect("should parse toml successfully");
    assert!(config.validate().is_ok());
    assert_eq!(config.processor.poll_interval_ms, 500);
    assert_eq!(config.queue_config().retention_days, 14);
    assert_eq!(config.search.default_limit, 5);
}

#[test]
fn error_display_messages() {
    let errors = vec![
        ConfigError::InvalidProtocol("ftp".to_string()),
        ConfigError::InvalidPort(0),
        ConfigError::InvalidModel(" x ".to_string()),
        ConfigError::InvalidUrl("invalid-url".to_string()),
        ConfigError::InvalidPollInterval(5),
        ConfigError::InvalidSimilarityThreshold(2.0),
    ];

    for error in errors {
        let message = format!("{error}");
        assert!(message.len() > 10);
    }
}
