use serde::{Deserialize, Serialize};

/// Highest argument slot a data source can configure (`arg1..argN`).
pub const MAX_ARGUMENTS: usize = 8;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("too many arguments: {0} (at most {MAX_ARGUMENTS})")]
    TooManyArguments(usize),
    #[error("cannot read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Settings a host data source hands to every program instance it creates.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DataSourceConfig {
    /// Integer parameters exposed to scripts as `arg1..argN`.
    pub arguments: Vec<i64>,
    /// Length of the per-frame output buffer `rboutput` writes into.
    pub output_size: usize,
}

impl DataSourceConfig {
    pub fn with_arguments(mut self, arguments: Vec<i64>) -> Self {
        self.arguments = arguments;
        self
    }

    pub fn with_output_size(mut self, output_size: usize) -> Self {
        self.output_size = output_size;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.arguments.len() > MAX_ARGUMENTS {
            return Err(ConfigError::TooManyArguments(self.arguments.len()));
        }
        Ok(())
    }

    /// Value of `arg<k>` (1-based); unset slots read as 0.
    pub fn argument(&self, k: usize) -> i64 {
        k.checked_sub(1).and_then(|i| self.arguments.get(i)).copied().unwrap_or(0)
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: DataSourceConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &std::path::Path) -> Result<Self, ConfigError> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }
}
