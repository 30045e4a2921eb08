// Configuration management module
// TOML settings under the base directory plus the interactive setup flow

pub mod interactive;
pub mod settings;

#[cfg(test)]
mod tests;

pub use interactive::{run_interactive_config, show_config};
pub use settings::{
    BASE_DIR_ENV, Config, ConfigError, OllamaConfig, ProcessorConfig, QueueSettings, SearchConfig,
};

/// Resolve the base directory: an explicit override wins, then the environment, then `~/.recipe-vault`.
#[inline]
pub fn get_config_dir(
    override_dir: Option<&std::path::Path>,
) -> Result<std::path::PathBuf, ConfigError> {
    match override_dir {
        Some(dir) => Ok(dir.to_path_buf()),
        None => Config::config_dir(),
    }
}
