
use std::path::Path;

use anyhow::{Context, Result};
use console::style;
use dialoguer::{Confirm, Input, Select};

use super::{Config, OllamaConfig};

#[inline]
pub fn run_interactive_config(base_dir: &Path) -> Result<()> {
    eprintln!("{}", style("🔧 Recipe Vault Configuration Setup").bold().cyan());
    eprintln!();

    let mut config = load_existing_config(base_dir);

    eprintln!("{}", style("Ollama Configuration").bold().yellow());
    eprintln!("Configure the Ollama instance used for recipe summaries and embeddings.");
    eprintln!();

    configure_ollama(&mut config.ollama)?;

    eprintln!();
    eprintln!("{}", style("Processor Configuration").bold().yellow());
    configure_processor(&mut config)?;

    eprintln!();
    eprintln!("{}", style("Testing configuration...").yellow());

    if test_ollama_connection(&config.ollama) {
        eprintln!("{}", style("✓ Ollama connection successful!").green());
    } else {
        eprintln!(
            "{}",
            style("⚠ Warning: Could not connect to Ollama").yellow()
        );
        eprintln!("You can continue, but enrichment will fail until Ollama is reachable.");
    }

    eprintln!();
    if Confirm::new()
        .with_prompt("Save configuration?")
        .default(true)
        .interact()?
    {
        config.save().context("Failed to save configuration")?;
        eprintln!("{}", style("✓ Configuration saved successfully!").green());
        eprintln!(
            "Configuration saved to: {}",
            style(config.config_file_path().display()).cyan()
        );
    } else {
        eprintln!("Configuration not saved.");
    }

    Ok(())
}

#[inline]
pub fn show_config(base_dir: &Path) -> Result<()> {
    let config = Config::load(base_dir).context("Failed to load configuration")?;

    eprintln!("{}", style("📋 Current Configuration").bold().cyan());
    eprintln!();

    eprintln!("{}", style("Ollama Settings:").bold().yellow());
    eprintln!("  Host: {}", style(&config.ollama.host).cyan());
    eprintln!("  Port: {}", style(config.ollama.port).cyan());
    eprintln!(
        "  Embedding Model: {}",
        style(display_model(&config.ollama.embedding_model)).cyan()
    );
    eprintln!(
        "  Summary Model: {}",
        style(display_model(&config.ollama.summary_model)).cyan()
    );
    eprintln!(
        "  Embedding Dimension: {}",
        style(config.ollama.embedding_dimension).cyan()
    );
    match config.ollama_url() {
        Ok(url) => eprintln!("  Ollama URL: {}", style(url).cyan()),
        Err(e) => eprintln!("  Ollama URL: {} ({})", style("Invalid").red(), e),
    }

    eprintln!();
    eprintln!("{}", style("Processor:").bold().yellow());
    eprintln!(
        "  Poll Interval: {}ms",
        style(config.processor.poll_interval_ms).cyan()
    );
    eprintln!(
        "  Pipeline Timeout: {}s",
        style(config.processor.pipeline_timeout_seconds).cyan()
    );
    eprintln!(
        "  Embedding Token Budget: {}",
        style(config.processor.embed_token_budget).cyan()
    );

    eprintln!();
    eprintln!("{}", style("Queue & Search:").bold().yellow());
    eprintln!(
        "  Queue Retention: {} days",
        style(config.queue.retention_days).cyan()
    );
    eprintln!(
        "  Default Result Limit: {}",
        style(config.search.default_limit).cyan()
    );
    eprintln!(
        "  Similarity Threshold: {}",
        style(config.search.similarity_threshold).cyan()
    );

    eprintln!();
    eprintln!(
        "Config file: {}",
        style(config.config_file_path().display()).dim()
    );

    Ok(())
}

fn display_model(model: &str) -> &str {
    if model.is_empty() {
        "(not configured)"
    } else {
        model
    }
}

fn load_existing_config(base_dir: &Path) -> Config {
    Config::load(base_dir).map_or_else(
        |_| {
            eprintln!(
                "{}",
                style("No valid configuration found. Using defaults.").yellow()
            );
            Config {
                base_dir: base_dir.to_path_buf(),
                ..Config::default()
            }
        },
        |config| {
            eprintln!("{}", style("Found existing configuration.").green());
            config
        },
    )
}

fn configure_ollama(ollama: &mut OllamaConfig) -> Result<()> {
    let protocols = &["http", "https"];
    let default_index = protocols
        .iter()
        .position(|&p| p == ollama.protocol)
        .unwrap_or(0);

    let protocol_index = Select::new()
        .with_prompt("Ollama protocol")
        .default(default_index)
        .items(protocols)
        .interact()?;

    let protocol = protocols[protocol_index].to_string();

    let host: String = Input::new()
        .with_prompt("Ollama host")
        .default(ollama.host.clone())
        .validate_with(|input: &String| -> Result<(), String> {
            let candidate = OllamaConfig {
                protocol: protocol.clone(),
                host: input.clone(),
                ..OllamaConfig::default()
            };
            candidate.ollama_url().map(|_| ()).map_err(|e| e.to_string())
        })
        .interact_text()?;

    let port: u16 = Input::new()
        .with_prompt("Ollama port")
        .default(ollama.port)
        .validate_with(|input: &u16| -> Result<(), &str> {
            if *input == 0 {
                Err("Port must be greater than 0")
            } else {
                Ok(())
            }
        })
        .interact_text()?;

    let embedding_model = prompt_model("Embedding model", &ollama.embedding_model)?;
    let summary_model = prompt_model("Summary model", &ollama.summary_model)?;

    let embedding_dimension: u32 = Input::new()
        .with_prompt("Embedding dimension")
        .default(ollama.embedding_dimension)
        .validate_with(|input: &u32| -> Result<(), &str> {
            if (64..=4096).contains(input) {
                Ok(())
            } else {
                Err("Dimension must be between 64 and 4096")
            }
        })
        .interact_text()?;

    ollama.set_protocol(protocol)?;
    ollama.set_host(host)?;
    ollama.set_port(port)?;
    ollama.set_embedding_model(embedding_model)?;
    ollama.set_summary_model(summary_model)?;
    ollama.set_embedding_dimension(embedding_dimension)?;

    Ok(())
}

fn prompt_model(prompt: &str, current: &str) -> Result<String> {
    let model: String = Input::new()
        .with_prompt(prompt)
        .default(current.to_string())
        .validate_with(|input: &String| -> Result<(), &str> {
            if input.trim().is_empty() {
                Err("Model name cannot be empty")
            } else {
                Ok(())
            }
        })
        .interact_text()?;
    Ok(model.trim().to_string())
}

fn configure_processor(config: &mut Config) -> Result<()> {
    let poll_interval_ms: u64 = Input::new()
        .with_prompt("Queue poll interval (ms)")
        .default(config.processor.poll_interval_ms)
        .validate_with(|input: &u64| -> Result<(), &str> {
            if *input < 100 {
                Err("Poll interval must be at least 100ms")
            } else {
                Ok(())
            }
        })
        .interact_text()?;

    let pipeline_timeout_seconds: u64 = Input::new()
        .with_prompt("Enrichment timeout per recipe (seconds)")
        .default(config.processor.pipeline_timeout_seconds)
        .validate_with(|input: &u64| -> Result<(), &str> {
            if (1..=3600).contains(input) {
                Ok(())
            } else {
                Err("Timeout must be between 1 and 3600 seconds")
            }
        })
        .interact_text()?;

    config.processor.poll_interval_ms = poll_interval_ms;
    config.processor.pipeline_timeout_seconds = pipeline_timeout_seconds;
    Ok(())
}

fn test_ollama_connection(ollama: &OllamaConfig) -> bool {
    let url = format!(
        "{}://{}:{}/api/version",
        ollama.protocol, ollama.host, ollama.port
    );

    let agent: ureq::Agent = ureq::Agent::config_builder()
        .timeout_global(Some(std::time::Duration::from_secs(5)))
        .build()
        .into();

    match agent.get(&url).call() {
        Ok(_) => true,
        Err(ureq::Error::StatusCode(code)) => (400..500).contains(&code),
        Err(_) => false,
    }
}
