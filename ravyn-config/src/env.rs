// Environment variable loading

use std::collections::BTreeMap;
use std::env;

/// Variable naming the settings file. Never treated as an override.
pub const SETTINGS_MODULE_VAR: &str = "RAVYN_SETTINGS_MODULE";

/// Collects `PREFIX_*` variables as settings overrides.
///
/// `RAVYN_DEBUG=true` becomes the key path `["debug"]`; a double underscore
/// descends into nested tables, so `RAVYN_LOGGING__LEVEL` becomes
/// `["logging", "level"]`.
#[derive(Debug, Clone)]
pub struct EnvLoader {
    prefix: String,
}

impl EnvLoader {
    pub fn new(prefix: impl Into<String>) -> Self {
        let prefix = prefix.into().trim_end_matches('_').to_uppercase();
        Self { prefix }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Overrides from the process environment.
    pub fn load(&self) -> BTreeMap<Vec<String>, String> {
        self.collect(env::vars())
    }

    /// Overrides from an explicit set of variables.
    pub fn collect<I, K, V>(&self, vars: I) -> BTreeMap<Vec<String>, String>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut overrides = BTreeMap::new();
        for (key, value) in vars {
            if let Some(path) = self.key_path(key.as_ref()) {
                overrides.insert(path, value.into());
            }
        }
        overrides
    }

    /// Split a variable name into a settings key path, or `None` when the
    /// variable does not belong to this loader.
    pub fn key_path(&self, key: &str) -> Option<Vec<String>> {
        let upper = key.to_uppercase();
        if upper == SETTINGS_MODULE_VAR {
            return None;
        }
        let rest = upper.strip_prefix(&self.prefix)?.strip_prefix('_')?;
        if rest.is_empty() {
            return None;
        }
        let path: Vec<String> = rest.split("__").map(str::to_lowercase).collect();
        if path.iter().any(String::is_empty) {
            return None;
        }
        Some(path)
    }

    /// Read a single variable, e.g. `var("SETTINGS_MODULE")`.
    pub fn var(&self, name: &str) -> Option<String> {
        env::var(format!("{}_{}", self.prefix, name.to_uppercase())).ok()
    }
}

impl Default for EnvLoader {
    fn default() -> Self {
        Self::new("RAVYN")
    }
}
