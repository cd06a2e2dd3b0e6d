//! Application settings and the process-wide settings handle.
//!
//! Every component reads its defaults from [`Settings`]; explicit builder
//! arguments override them. A process-wide value lives behind [`install`] /
//! [`current`], and each application publishes its own settings for the
//! duration of a request (see [`crate::middleware::SettingsMiddleware`]) so
//! that mounted child applications observe theirs.

use crate::encoders::Encoder;
use crate::extension::Extension;
use crate::lifespan::LifespanHook;
use crate::logging::{LoggingSettings, debug};
use crate::options::LevelOptions;
use crate::response::ResponseClass;
use crate::Error;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Runtime pieces of the settings that cannot be (de)serialized.
#[derive(Clone, Default)]
pub struct SettingsComponents {
    /// Global middleware, permissions, interceptors, dependencies,
    /// exception handlers and hooks
    pub options: LevelOptions,
    pub encoders: Vec<Arc<dyn Encoder>>,
    pub extensions: Vec<Arc<dyn Extension>>,
    pub on_startup: Vec<LifespanHook>,
    pub on_shutdown: Vec<LifespanHook>,
}

impl fmt::Debug for SettingsComponents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SettingsComponents")
            .field("options", &self.options)
            .field("encoders", &self.encoders.iter().map(|e| e.name()).collect::<Vec<_>>())
            .field(
                "extensions",
                &self.extensions.iter().map(|e| e.name().to_string()).collect::<Vec<_>>(),
            )
            .field("on_startup", &self.on_startup.len())
            .field("on_shutdown", &self.on_shutdown.len())
            .finish()
    }
}

/// Application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub title: String,
    pub version: String,
    pub description: Option<String>,
    pub debug: bool,
    pub environment: String,
    /// Prefix the application is served under
    pub root_path: String,
    /// Redirect `/a/` to `/a` (and back) when only the other form matches
    pub redirect_slashes: bool,
    pub allowed_hosts: Vec<String>,
    pub enable_cors: bool,
    pub enable_csrf: bool,
    pub enable_sessions: bool,
    /// Required when CSRF or sessions are enabled
    pub secret_key: Option<String>,
    pub logging: LoggingSettings,
    pub default_media_type: String,
    pub default_response_class: ResponseClass,
    pub include_in_schema: bool,
    /// Upper bound of sync handlers and providers running at once
    pub sync_handler_limit: usize,
    /// Largest request body read into memory, in bytes
    pub max_body_size: usize,
    #[serde(skip)]
    pub components: SettingsComponents,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            title: "Ravyn".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            description: None,
            debug: false,
            environment: "production".to_string(),
            root_path: String::new(),
            redirect_slashes: true,
            allowed_hosts: vec!["*".to_string()],
            enable_cors: false,
            enable_csrf: false,
            enable_sessions: false,
            secret_key: None,
            logging: LoggingSettings::default(),
            default_media_type: "application/json".to_string(),
            default_response_class: ResponseClass::Json,
            include_in_schema: true,
            sync_handler_limit: 40,
            max_body_size: 10 * 1024 * 1024,
            components: SettingsComponents::default(),
        }
    }
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check structural requirements.
    pub fn validate(&self) -> Result<(), Error> {
        if self.secret_key.as_deref().is_none_or(str::is_empty) {
            if self.enable_csrf {
                return Err(Error::ImproperlyConfigured(
                    "enable_csrf requires a secret_key".to_string(),
                ));
            }
            if self.enable_sessions {
                return Err(Error::ImproperlyConfigured(
                    "enable_sessions requires a secret_key".to_string(),
                ));
            }
        }
        if self.sync_handler_limit == 0 {
            return Err(Error::ImproperlyConfigured(
                "sync_handler_limit must be greater than zero".to_string(),
            ));
        }
        if self.max_body_size == 0 {
            return Err(Error::ImproperlyConfigured(
                "max_body_size must be greater than zero".to_string(),
            ));
        }
        if self.default_media_type.trim().is_empty() {
            return Err(Error::ImproperlyConfigured(
                "default_media_type cannot be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn redirect_slashes(mut self, enabled: bool) -> Self {
        self.redirect_slashes = enabled;
        self
    }

    pub fn max_body_size(mut self, bytes: usize) -> Self {
        self.max_body_size = bytes;
        self
    }

    pub fn secret_key(mut self, key: impl Into<String>) -> Self {
        self.secret_key = Some(key.into());
        self
    }

    /// Global options applied at the application level.
    pub fn with_options(mut self, options: LevelOptions) -> Self {
        self.components.options = options;
        self
    }

    pub fn encoder<E: Encoder + 'static>(mut self, encoder: E) -> Self {
        self.components.encoders.push(Arc::new(encoder));
        self
    }

    pub fn extension<E: Extension + 'static>(mut self, extension: E) -> Self {
        self.components.extensions.push(Arc::new(extension));
        self
    }

    pub fn on_startup(mut self, hook: LifespanHook) -> Self {
        self.components.on_startup.push(hook);
        self
    }

    pub fn on_shutdown(mut self, hook: LifespanHook) -> Self {
        self.components.on_shutdown.push(hook);
        self
    }
}

static SETTINGS: Lazy<RwLock<Arc<Settings>>> =
    Lazy::new(|| RwLock::new(Arc::new(Settings::default())));

tokio::task_local! {
    static ACTIVE: Arc<Settings>;
}

/// Validate `settings` and make them the process-wide settings.
pub fn install(settings: Settings) -> Result<Arc<Settings>, Error> {
    settings.validate()?;
    let settings = Arc::new(settings);
    *SETTINGS.write() = settings.clone();
    debug!(title = %settings.title, "Installed process-wide settings");
    Ok(settings)
}

/// The process-wide settings, ignoring any request-scoped override.
pub fn global() -> Arc<Settings> {
    SETTINGS.read().clone()
}

/// The active settings: the ones published for the current task, else the
/// process-wide ones.
pub fn current() -> Arc<Settings> {
    ACTIVE
        .try_with(Arc::clone)
        .unwrap_or_else(|_| global())
}

/// Run `fut` with `settings` published as the active settings.
pub async fn scoped<F: Future>(settings: Arc<Settings>, fut: F) -> F::Output {
    ACTIVE.scope(settings, fut).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert!(settings.redirect_slashes);
        assert_eq!(settings.default_media_type, "application/json");
    }

    #[test]
    fn test_sessions_require_secret() {
        let settings = Settings {
            enable_sessions: true,
            ..Settings::default()
        };
        assert!(matches!(
            settings.validate(),
            Err(Error::ImproperlyConfigured(_))
        ));
        assert!(settings.secret_key("s3cr3t").validate().is_ok());
    }

    #[test]
    fn test_deserialize_partial() {
        let settings: Settings =
            serde_json::from_str(r#"{"title": "Shop", "debug": true}"#).unwrap();
        assert_eq!(settings.title, "Shop");
        assert!(settings.debug);
        assert_eq!(settings.sync_handler_limit, 40);
    }

    #[tokio::test]
    async fn test_scoped_settings() {
        let local = Arc::new(Settings::default().title("child"));
        let seen = scoped(local, async { current().title.clone() }).await;
        assert_eq!(seen, "child");
        assert_ne!(current().title, "child");
    }
}
