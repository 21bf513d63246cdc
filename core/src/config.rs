//! Compiler configuration
//!
//! Settings come from, lowest precedence first:
//! 1. built-in defaults,
//! 2. `streetrace-dsl.toml` in the working directory, or the file named by
//!    `--config` / `STREETRACE_DSL_CONFIG`,
//! 3. `STREETRACE_DSL_*` environment variables (`STREETRACE_DSL_REQUIRE_VERSION=true`).

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::executor::DEFAULT_MAX_RETRY_ATTEMPTS;

const ENV_PREFIX: &str = "STREETRACE_DSL";
const CONFIG_PATH_VAR: &str = "STREETRACE_DSL_CONFIG";
const DEFAULT_FILE: &str = "streetrace-dsl";

/// How undefined-name diagnostics propose alternatives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuggestionMode {
    /// Closest defined name sharing a prefix
    #[default]
    Prefix,
    Off,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerConfig {
    /// Reject sources without a `streetrace v1` line
    pub require_version: bool,
    pub suggestions: SuggestionMode,
    /// `retry step` budget per protected region in the executor
    pub max_retry_attempts: u32,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            require_version: false,
            suggestions: SuggestionMode::Prefix,
            max_retry_attempts: DEFAULT_MAX_RETRY_ATTEMPTS,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    NotFound(PathBuf),

    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
}

impl CompilerConfig {
    pub fn builder() -> ConfigLoader {
        ConfigLoader::default()
    }

    /// Load with the default search
    pub fn load() -> Result<Self, ConfigError> {
        Self::builder().build()
    }
}

/// Where to look for configuration
#[derive(Debug, Default)]
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
}

impl ConfigLoader {
    /// Explicit file; it must exist
    pub fn config_path(mut self, path: Option<PathBuf>) -> Self {
        self.config_path = path;
        self
    }

    pub fn build(self) -> Result<CompilerConfig, ConfigError> {
        let explicit = self
            .config_path
            .or_else(|| std::env::var_os(CONFIG_PATH_VAR).map(PathBuf::from));

        let mut builder = config::Config::builder();
        builder = match explicit {
            Some(path) => {
                if !path.is_file() {
                    return Err(ConfigError::NotFound(path));
                }
                tracing::debug!(path = %path.display(), "loading config file");
                builder.add_source(config::File::from(path).required(true))
            }
            None => builder.add_source(config::File::with_name(DEFAULT_FILE).required(false)),
        };
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .try_parsing(true)
                .ignore_empty(true),
        );

        let config: CompilerConfig = builder.build()?.try_deserialize()?;
        Ok(config)
    }
}
