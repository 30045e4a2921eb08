use super::*;
use serial_test::serial;
use tempfile::TempDir;

#[test]
fn default_config() {
    let config = Config::default();
    assert_eq!(config.ollama.protocol, "http");
    assert_eq!(config.ollama.host, "localhost");
    assert_eq!(config.ollama.port, 11434);
    assert_eq!(config.ollama.embedding_model, "nomic-embed-text:latest");
    assert_eq!(config.processor.embed_token_budget, 6000);
    assert_eq!(config.queue.retention_days, 7);
    assert_eq!(config.search.default_limit, 10);
    assert!(config.validate().is_ok());
}

#[test]
fn config_validation() {
    let config = Config::default();

    let mut invalid_config = config.clone();
    invalid_config.ollama.protocol = "ftp".to_string();
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.ollama.port = 0;
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.ollama.embedding_dimension = 32;
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.processor.poll_interval_ms = 50;
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.processor.pipeline_timeout_seconds = 0;
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.queue.retention_days = 0;
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.search.similarity_threshold = 1.5;
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config;
    invalid_config.ollama.host = String::new();
    assert!(invalid_config.validate().is_err());
}

#[test]
fn empty_model_is_valid_but_unconfigured() {
    let mut config = Config::default();
    assert!(config.ollama.is_configured());

    config.ollama.summary_model = String::new();
    assert!(config.validate().is_ok());
    assert!(!config.ollama.is_configured());

    config.ollama.summary_model = " llama3 ".to_string();
    assert!(config.validate().is_err());
}

#[test]
fn ollama_url_generation() {
    let mut config = Config::default();
    let url = config
        .ollama_url()
        .expect("should generate ollama_url successfully");
    assert_eq!(url.as_str(), "http://localhost:11434/");

    config.ollama.protocol = "https".to_string();
    config.ollama.host = "secure.example.com".to_string();
    config.ollama.port = 443;
    let url = config
        .ollama_url()
        .expect("should generate https url successfully");
    assert_eq!(url.as_str(), "https://secure.example.com/");
}

#[test]
fn toml_serialization() {
    let config = Config::default();
    let toml_str = toml::to_string(&config).expect("should serialize toml correctly");
    let parsed_config: Config = toml::from_str(&toml_str).expect("should parse toml correctly");
    assert_eq!(config, parsed_config);
}

#[test]
fn partial_toml_uses_defaults() {
    let parsed: Config = toml::from_str(
        r#"
        [ollama]
        host = "gpu-box"

        [search]
        default_limit = 25
        "#,
    )
    .expect("should parse partial toml");

    assert_eq!(parsed.ollama.host, "gpu-box");
    assert_eq!(parsed.ollama.port, 11434);
    assert_eq!(parsed.search.default_limit, 25);
    assert_eq!(parsed.processor, ProcessorConfig::default());
}

#[test]
fn setter_validation() {
    let mut config = OllamaConfig::default();

    assert!(config.set_protocol("https".to_string()).is_ok());
    assert!(config.set_host("example.com".to_string()).is_ok());
    assert!(config.set_port(8080).is_ok());
    assert!(config.set_embedding_model("mxbai-embed-large".to_string()).is_ok());
    assert!(config.set_summary_model("mistral".to_string()).is_ok());
    assert!(config.set_embedding_dimension(1024).is_ok());

    assert!(config.set_protocol("HTTP".to_string()).is_err());
    assert!(config.set_port(0).is_err());
    assert!(config.set_embedding_model("   ".to_string()).is_err());
    assert!(config.set_summary_model(String::new()).is_err());
    assert!(config.set_embedding_dimension(8192).is_err());
}

#[test]
fn load_missing_config_uses_defaults() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let config = Config::load(temp_dir.path()).expect("should load defaults");

    assert_eq!(config.get_base_dir(), temp_dir.path());
    assert_eq!(config.ollama, OllamaConfig::default());
    assert_eq!(config.database_path(), temp_dir.path().join("recipes.db"));
    assert_eq!(config.vector_database_path(), temp_dir.path().join("vectors"));
}

#[test]
fn save_then_load() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let mut config = Config {
        base_dir: temp_dir.path().join("nested"),
        ..Config::default()
    };
    config.search.similarity_threshold = 0.5;
    config.queue.retention_days = 30;

    config.save().expect("should save config");
    let loaded = Config::load(temp_dir.path().join("nested")).expect("should load config");
    assert_eq!(loaded, config);
}

#[test]
fn load_rejects_invalid_file() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    fs::write(
        temp_dir.path().join("config.toml"),
        "[processor]\npoll_interval_ms = 5\n",
    )
    .expect("should write config");

    assert!(Config::load(temp_dir.path()).is_err());
}

#[test]
#[serial]
fn config_dir_honours_env_override() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    // SAFETY: serialised with the other environment-touching tests.
    unsafe { std::env::set_var(BASE_DIR_ENV, temp_dir.path()) };
    let dir = Config::config_dir().expect("should resolve config dir");
    // SAFETY: as above.
    unsafe { std::env::remove_var(BASE_DIR_ENV) };

    assert_eq!(dir, temp_dir.path());
}

#[test]
#[serial]
fn config_dir_defaults_to_home() {
    // SAFETY: serialised with the other environment-touching tests.
    unsafe { std::env::remove_var(BASE_DIR_ENV) };
    if let Some(home) = dirs::home_dir() {
        let dir = Config::config_dir().expect("should resolve config dir");
        assert_eq!(dir, home.join(".recipe-vault"));
    }
}
