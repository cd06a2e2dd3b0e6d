// Settings file loading and merging

use crate::{ConfigError, Result};
use serde_json::{Map, Value};
use std::fs;
use std::path::Path;

/// Supported settings file formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Json,
    Toml,
}

impl FileFormat {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "json" => Some(FileFormat::Json),
            "toml" => Some(FileFormat::Toml),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .ok_or_else(|| {
                ConfigError::LoadError(format!("{} has no file extension", path.display()))
            })?;
        Self::from_extension(ext)
            .ok_or_else(|| ConfigError::LoadError(format!("Unsupported format: {}", ext)))
    }
}

/// Reads a settings file into a JSON tree.
pub struct FileLoader {
    format: FileFormat,
}

impl FileLoader {
    pub fn new(format: FileFormat) -> Self {
        Self { format }
    }

    /// Pick the format from the file extension.
    pub fn auto(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(FileFormat::from_path(path.as_ref())?))
    }

    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<Value> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        let content = fs::read_to_string(path)?;
        tracing::debug!(path = %path.display(), format = ?self.format, "Read settings file");
        self.parse(&content)
    }

    /// Parse a settings document. The top level must be a table.
    pub fn parse(&self, content: &str) -> Result<Value> {
        let value = match self.format {
            FileFormat::Json => serde_json::from_str(content)
                .map_err(|e| ConfigError::ParseError(format!("JSON parse error: {}", e)))?,
            FileFormat::Toml => {
                let table: toml::Table = toml::from_str(content)
                    .map_err(|e| ConfigError::ParseError(format!("TOML parse error: {}", e)))?;
                serde_json::to_value(table).map_err(|e| {
                    ConfigError::ParseError(format!("TOML to JSON conversion error: {}", e))
                })?
            }
        };
        if !value.is_object() {
            return Err(ConfigError::ParseError(
                "settings document must be a table".to_string(),
            ));
        }
        Ok(value)
    }
}

/// Merge `overlay` into `base`. Tables merge key by key; anything else replaces.
pub fn merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

/// Set `path` in `tree` from a raw string.
///
/// Fields that currently hold a string (or nothing) take the raw text; other
/// fields parse it as JSON, so `true`, `8`, `["a.com"]` and `null` work.
/// A key that is not already a settings field is rejected.
pub fn apply_override(tree: &mut Value, path: &[String], raw: &str) -> Result<()> {
    let key = path.join(".");
    let (last, parents) = path
        .split_last()
        .ok_or_else(|| ConfigError::OverrideError {
            key: key.clone(),
            message: "empty key".to_string(),
        })?;

    let mut node = tree;
    for part in parents {
        node = node
            .as_object_mut()
            .and_then(|table| table.get_mut(part))
            .filter(|child| child.is_object())
            .ok_or_else(|| ConfigError::OverrideError {
                key: key.clone(),
                message: format!("'{}' is not a settings table", part),
            })?;
    }

    let table: &mut Map<String, Value> =
        node.as_object_mut().ok_or_else(|| ConfigError::OverrideError {
            key: key.clone(),
            message: "parent is not a table".to_string(),
        })?;
    let current = table.get(last).ok_or_else(|| ConfigError::OverrideError {
        key: key.clone(),
        message: "unknown setting".to_string(),
    })?;

    let value = match current {
        Value::String(_) => Value::String(raw.to_string()),
        Value::Null => serde_json::from_str(raw)
            .ok()
            .filter(|v: &Value| v.is_null() || !v.is_string())
            .unwrap_or_else(|| Value::String(raw.to_string())),
        _ => serde_json::from_str(raw).map_err(|e| ConfigError::OverrideError {
            key: key.clone(),
            message: e.to_string(),
        })?,
    };
    table.insert(last.clone(), value);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn path(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|p| p.to_string()).collect()
    }

    #[test]
    fn test_parse_json() {
        let loader = FileLoader::new(FileFormat::Json);
        let value = loader.parse(r#"{"title": "Shop", "debug": true}"#).unwrap();
        assert_eq!(value, json!({ "title": "Shop", "debug": true }));
    }

    #[test]
    fn test_parse_toml_tables() {
        let loader = FileLoader::new(FileFormat::Toml);
        let value = loader
            .parse("title = \"Shop\"\n\n[logging]\nlevel = \"debug\"\n")
            .unwrap();
        assert_eq!(value["logging"]["level"], "debug");
        assert_eq!(value["title"], "Shop");
    }

    #[test]
    fn test_top_level_must_be_a_table() {
        let loader = FileLoader::new(FileFormat::Json);
        assert!(matches!(loader.parse("[1, 2]"), Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(FileFormat::from_extension("TOML"), Some(FileFormat::Toml));
        assert_eq!(FileFormat::from_extension("json"), Some(FileFormat::Json));
        assert_eq!(FileFormat::from_extension("yaml"), None);
        assert!(FileLoader::auto("settings").is_err());
    }

    #[test]
    fn test_missing_file() {
        let loader = FileLoader::new(FileFormat::Toml);
        let result = loader.load_file("/nonexistent/ravyn/settings.toml");
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn test_merge_is_deep() {
        let mut base = json!({ "title": "Ravyn", "logging": { "level": "info", "format": "pretty" } });
        merge(&mut base, json!({ "logging": { "level": "debug" }, "debug": true }));
        assert_eq!(
            base,
            json!({
                "title": "Ravyn",
                "debug": true,
                "logging": { "level": "debug", "format": "pretty" }
            })
        );
    }

    #[test]
    fn test_override_coerces_by_current_type() {
        let mut tree = json!({
            "title": "Ravyn",
            "debug": false,
            "sync_handler_limit": 40,
            "allowed_hosts": ["*"],
            "secret_key": null,
            "logging": { "level": "info" }
        });

        apply_override(&mut tree, &path(&["title"]), "42").unwrap();
        apply_override(&mut tree, &path(&["debug"]), "true").unwrap();
        apply_override(&mut tree, &path(&["sync_handler_limit"]), "8").unwrap();
        apply_override(&mut tree, &path(&["allowed_hosts"]), r#"["a.com","b.com"]"#).unwrap();
        apply_override(&mut tree, &path(&["secret_key"]), "s3cr3t").unwrap();
        apply_override(&mut tree, &path(&["logging", "level"]), "debug").unwrap();

        assert_eq!(tree["title"], "42");
        assert_eq!(tree["debug"], true);
        assert_eq!(tree["sync_handler_limit"], 8);
        assert_eq!(tree["allowed_hosts"], json!(["a.com", "b.com"]));
        assert_eq!(tree["secret_key"], "s3cr3t");
        assert_eq!(tree["logging"]["level"], "debug");
    }

    #[test]
    fn test_override_rejects_unknown_and_malformed() {
        let mut tree = json!({ "debug": false, "logging": { "level": "info" } });

        let err = apply_override(&mut tree, &path(&["colour"]), "red").unwrap_err();
        assert!(matches!(err, ConfigError::OverrideError { ref key, .. } if key == "colour"));

        let err = apply_override(&mut tree, &path(&["debug"]), "yes please").unwrap_err();
        assert!(matches!(err, ConfigError::OverrideError { .. }));

        let err = apply_override(&mut tree, &path(&["debug", "x"]), "1").unwrap_err();
        assert!(matches!(err, ConfigError::OverrideError { .. }));
    }
}
