//! Binding configuration: which native library to bind and how to hand out
//! object handles.

use std::env;
use std::path::PathBuf;

use crate::error::ConfigError;
use crate::pointers::PointerStrategy;

pub const LIBRARY_NAME_VAR: &str = "WIRECALL_LIBRARY_NAME";
pub const LIBRARY_DIR_VAR: &str = "WIRECALL_LIBRARY_DIR";
pub const POINTER_STRATEGY_VAR: &str = "WIRECALL_POINTER_STRATEGY";

pub const DEFAULT_LIBRARY_NAME: &str = "wirecall";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingConfig {
    /// Bare library name, without platform prefix or extension.
    pub library_name: String,
    pub library_dir: PathBuf,
    pub pointer_strategy: PointerStrategy,
}

impl Default for BindingConfig {
    fn default() -> Self {
        Self {
            library_name: DEFAULT_LIBRARY_NAME.to_string(),
            library_dir: default_library_dir(),
            pointer_strategy: PointerStrategy::default(),
        }
    }
}

impl BindingConfig {
    /// Defaults overridden by the `WIRECALL_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each variable.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(name) = lookup(LIBRARY_NAME_VAR) {
            let name = name.trim();
            if name.is_empty() {
                return Err(ConfigError::Empty {
                    key: LIBRARY_NAME_VAR,
                });
            }
            config.library_name = name.to_string();
        }
        if let Some(dir) = lookup(LIBRARY_DIR_VAR) {
            if dir.trim().is_empty() {
                return Err(ConfigError::Empty {
                    key: LIBRARY_DIR_VAR,
                });
            }
            config.library_dir = PathBuf::from(dir);
        }
        if let Some(strategy) = lookup(POINTER_STRATEGY_VAR) {
            config.pointer_strategy = strategy.parse()?;
        }
        log::debug!(target: "wirecall::config", "binding config: {config:?}");
        Ok(config)
    }

    pub fn with_library_name(mut self, name: impl Into<String>) -> Self {
        self.library_name = name.into();
        self
    }

    pub fn with_library_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.library_dir = dir.into();
        self
    }

    pub fn with_pointer_strategy(mut self, strategy: PointerStrategy) -> Self {
        self.pointer_strategy = strategy;
        self
    }
}

fn default_library_dir() -> PathBuf {
    env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("."))
}
