// Configuration management module
// TOML settings in the config directory plus secrets from the environment

pub mod interactive;
pub mod settings;


pub use interactive::{run_interactive_config, show_config};
pub use settings::{
    Backend, Config, ConfigError, Credentials, IngestConfig, IngestSource, OnEmbedError,
    OpenAiConfig, RetrievalConfig, VectorStoreConfig,
};

/// Get the configuration directory path
#[inline]
pub fn get_config_dir() -> Result<std::path::PathBuf, ConfigError> {
    Config::config_dir()
}
