//! Settings loading for Ravyn.
//!
//! Settings are assembled in layers, later layers winning:
//!
//! 1. [`Settings::default`] (or a base passed to [`SettingsLoader::base`])
//! 2. the TOML or JSON file named by `RAVYN_SETTINGS_MODULE`
//! 3. `RAVYN_*` variables from a `.env` file
//! 4. `RAVYN_*` variables from the process environment
//!
//! ```no_run
//! use ravyn_config::SettingsLoader;
//!
//! let settings = SettingsLoader::new().install()?;
//! println!("serving {}", settings.title);
//! # Ok::<(), ravyn_config::ConfigError>(())
//! ```

pub mod env;
pub mod error;
pub mod loader;

pub use env::{EnvLoader, SETTINGS_MODULE_VAR};
pub use error::{ConfigError, Result};
pub use loader::{FileFormat, FileLoader, apply_override, merge};

use ravyn_core::Settings;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Clone)]
enum DotEnv {
    /// Look for `.env` in the working directory and its parents
    Search,
    Path(PathBuf),
    Disabled,
}

/// Layered settings builder.
#[derive(Clone)]
pub struct SettingsLoader {
    env: EnvLoader,
    base: Option<Settings>,
    module: Option<PathBuf>,
    dotenv: DotEnv,
    process_env: bool,
    vars: Vec<(String, String)>,
}

impl SettingsLoader {
    pub fn new() -> Self {
        Self {
            env: EnvLoader::default(),
            base: None,
            module: None,
            dotenv: DotEnv::Search,
            process_env: true,
            vars: Vec::new(),
        }
    }

    /// Variable prefix, `RAVYN` by default.
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env = EnvLoader::new(prefix);
        self
    }

    /// Starting point instead of the defaults. Its runtime components
    /// (middleware, encoders, hooks) are carried into the result.
    pub fn base(mut self, settings: Settings) -> Self {
        self.base = Some(settings);
        self
    }

    /// Settings file to use, taking precedence over `RAVYN_SETTINGS_MODULE`.
    pub fn module(mut self, path: impl Into<PathBuf>) -> Self {
        self.module = Some(path.into());
        self
    }

    pub fn dotenv_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.dotenv = DotEnv::Path(path.into());
        self
    }

    pub fn without_dotenv(mut self) -> Self {
        self.dotenv = DotEnv::Disabled;
        self
    }

    /// Ignore the process environment; only explicit [`var`](Self::var)s apply.
    pub fn without_process_env(mut self) -> Self {
        self.process_env = false;
        self
    }

    /// Add a variable as if it were set in the environment.
    pub fn var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.push((key.into(), value.into()));
        self
    }

    /// Build and validate the settings.
    pub fn load(&self) -> Result<Settings> {
        let vars = self.variables()?;
        let base = self.base.clone().unwrap_or_default();
        let mut tree = serde_json::to_value(&base)
            .map_err(|e| ConfigError::LoadError(format!("cannot serialize base settings: {}", e)))?;

        let module_var = format!("{}_SETTINGS_MODULE", self.env.prefix());
        let module = self.module.clone().or_else(|| {
            vars.iter()
                .rev()
                .find(|(key, _)| key.eq_ignore_ascii_case(&module_var))
                .map(|(_, value)| PathBuf::from(value))
        });
        if let Some(path) = module {
            let file = FileLoader::auto(&path)?.load_file(&path)?;
            merge(&mut tree, file);
            tracing::debug!(module = %path.display(), "Merged settings module");
        }

        let overrides = self.env.collect(
            vars.iter()
                .filter(|(key, _)| !key.eq_ignore_ascii_case(&module_var))
                .map(|(key, value)| (key.as_str(), value.clone())),
        );
        for (path, raw) in &overrides {
            apply_override(&mut tree, path, raw)?;
            tracing::trace!(key = %path.join("."), "Applied settings override");
        }

        let mut settings: Settings = serde_json::from_value(tree)
            .map_err(|e| ConfigError::ValidationError(e.to_string()))?;
        settings.components = base.components;
        settings
            .validate()
            .map_err(|e| ConfigError::ValidationError(e.to_string()))?;

        tracing::debug!(
            title = %settings.title,
            environment = %settings.environment,
            overrides = overrides.len(),
            "Loaded settings"
        );
        Ok(settings)
    }

    /// [`load`](Self::load) and make the result the process-wide settings.
    pub fn install(&self) -> Result<Arc<Settings>> {
        let settings = self.load()?;
        ravyn_core::settings::install(settings)
            .map_err(|e| ConfigError::ValidationError(e.to_string()))
    }

    /// `.env` entries, then the process environment, then explicit vars.
    fn variables(&self) -> Result<Vec<(String, String)>> {
        let mut vars = Vec::new();

        let entries = match &self.dotenv {
            DotEnv::Disabled => None,
            DotEnv::Search => match dotenvy::dotenv_iter() {
                Ok(iter) => Some(iter),
                Err(e) if e.not_found() => None,
                Err(e) => return Err(ConfigError::LoadError(e.to_string())),
            },
            DotEnv::Path(path) => match dotenvy::from_path_iter(path) {
                Ok(iter) => Some(iter),
                Err(e) if e.not_found() => {
                    return Err(ConfigError::NotFound(path.display().to_string()));
                }
                Err(e) => return Err(ConfigError::LoadError(e.to_string())),
            },
        };
        if let Some(entries) = entries {
            for entry in entries {
                let (key, value) = entry.map_err(|e| ConfigError::ParseError(e.to_string()))?;
                vars.push((key, value));
            }
            tracing::debug!(count = vars.len(), "Read .env file");
        }

        if self.process_env {
            vars.extend(std::env::vars());
        }
        vars.extend(self.vars.iter().cloned());
        Ok(vars)
    }
}

impl Default for SettingsLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Load settings from `RAVYN_SETTINGS_MODULE`, `.env` and the environment.
pub fn load() -> Result<Settings> {
    SettingsLoader::new().load()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ravyn_core::{LogLevel, ResponseClass};

    fn isolated() -> SettingsLoader {
        SettingsLoader::new().without_dotenv().without_process_env()
    }

    #[test]
    fn test_defaults_without_sources() {
        let settings = isolated().load().unwrap();
        assert_eq!(settings.title, "Ravyn");
        assert!(settings.redirect_slashes);
        assert_eq!(settings.sync_handler_limit, 40);
    }

    #[test]
    fn test_variable_overrides() {
        let settings = isolated()
            .var("RAVYN_TITLE", "Shop")
            .var("RAVYN_DEBUG", "true")
            .var("RAVYN_LOGGING__LEVEL", "debug")
            .var("RAVYN_DEFAULT_RESPONSE_CLASS", "plain_text")
            .var("RAVYN_ALLOWED_HOSTS", r#"["shop.example.com"]"#)
            .load()
            .unwrap();

        assert_eq!(settings.title, "Shop");
        assert!(settings.debug);
        assert_eq!(settings.logging.level, LogLevel::Debug);
        assert_eq!(settings.default_response_class, ResponseClass::PlainText);
        assert_eq!(settings.allowed_hosts, vec!["shop.example.com".to_string()]);
    }

    #[test]
    fn test_later_variables_win() {
        let settings = isolated()
            .var("RAVYN_TITLE", "First")
            .var("RAVYN_TITLE", "Second")
            .load()
            .unwrap();
        assert_eq!(settings.title, "Second");
    }

    #[test]
    fn test_custom_prefix() {
        let settings = isolated()
            .prefix("SHOP")
            .var("SHOP_TITLE", "Shop")
            .var("RAVYN_TITLE", "Ignored")
            .load()
            .unwrap();
        assert_eq!(settings.title, "Shop");
    }

    #[test]
    fn test_invalid_settings_are_rejected() {
        let result = isolated().var("RAVYN_ENABLE_CSRF", "true").load();
        assert!(matches!(result, Err(ConfigError::ValidationError(ref msg)) if msg.contains("secret_key")));

        let result = isolated().var("RAVYN_SYNC_HANDLER_LIMIT", "0").load();
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_base_components_survive() {
        let base = Settings::new().title("Base").encoder(ravyn_core::SerdeEncoder);
        let settings = isolated().base(base).var("RAVYN_DEBUG", "true").load().unwrap();
        assert_eq!(settings.title, "Base");
        assert!(settings.debug);
        assert_eq!(settings.components.encoders.len(), 1);
    }
}
