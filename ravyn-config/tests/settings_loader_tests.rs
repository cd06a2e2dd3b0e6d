//! Layered settings loading from files, .env and variables.

use ravyn_config::*;
use ravyn_core::{LogFormat, LogLevel};
use std::fs;
use std::path::PathBuf;

fn temp_file(name: &str, content: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("ravyn-config-{}", std::process::id()));
    fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    fs::write(&path, content).unwrap();
    path
}

fn isolated() -> SettingsLoader {
    SettingsLoader::new().without_dotenv().without_process_env()
}

// =============================================================================
// Settings modules
// =============================================================================

#[test]
fn test_toml_module_named_by_variable() {
    let path = temp_file(
        "module.toml",
        r#"
title = "Inventory"
debug = true

[logging]
level = "warn"
"#,
    );

    let settings = isolated()
        .var("RAVYN_SETTINGS_MODULE", path.display().to_string())
        .load()
        .unwrap();

    assert_eq!(settings.title, "Inventory");
    assert!(settings.debug);
    assert_eq!(settings.logging.level, LogLevel::Warn);
    // untouched nested keys keep their defaults
    assert_eq!(settings.logging.format, LogFormat::Json);
}

#[test]
fn test_json_module_and_variable_override() {
    let path = temp_file(
        "module.json",
        r#"{ "title": "From file", "sync_handler_limit": 4 }"#,
    );

    let settings = isolated()
        .module(&path)
        .var("RAVYN_TITLE", "From env")
        .load()
        .unwrap();

    assert_eq!(settings.title, "From env");
    assert_eq!(settings.sync_handler_limit, 4);
}

#[test]
fn test_missing_module_is_not_found() {
    let result = isolated()
        .var("RAVYN_SETTINGS_MODULE", "/nonexistent/ravyn/settings.toml")
        .load();
    assert!(matches!(result, Err(ConfigError::NotFound(_))));
}

#[test]
fn test_unsupported_module_format() {
    let path = temp_file("module.yaml", "title: nope\n");
    let result = isolated().module(&path).load();
    assert!(matches!(result, Err(ConfigError::LoadError(_))));
}

#[test]
fn test_module_with_wrong_field_type_is_invalid() {
    let path = temp_file("wrong.toml", "debug = \"very\"\n");
    let result = isolated().module(&path).load();
    assert!(matches!(result, Err(ConfigError::ValidationError(_))));
}

// =============================================================================
// .env files
// =============================================================================

#[test]
fn test_dotenv_file_applies_below_variables() {
    let dotenv = temp_file(
        "layers.env",
        "RAVYN_TITLE=Dotenv\nRAVYN_ENVIRONMENT=staging\nOTHER=ignored\n",
    );

    let settings = SettingsLoader::new()
        .without_process_env()
        .dotenv_path(&dotenv)
        .var("RAVYN_TITLE", "Explicit")
        .load()
        .unwrap();

    assert_eq!(settings.title, "Explicit");
    assert_eq!(settings.environment, "staging");
}

#[test]
fn test_dotenv_can_name_the_module() {
    let module = temp_file("via-dotenv.toml", "title = \"Named in dotenv\"\n");
    let dotenv = temp_file(
        "module.env",
        &format!("RAVYN_SETTINGS_MODULE={}\n", module.display()),
    );

    let settings = SettingsLoader::new()
        .without_process_env()
        .dotenv_path(&dotenv)
        .load()
        .unwrap();
    assert_eq!(settings.title, "Named in dotenv");
}

#[test]
fn test_missing_explicit_dotenv_is_not_found() {
    let result = SettingsLoader::new()
        .without_process_env()
        .dotenv_path("/nonexistent/ravyn/.env")
        .load();
    assert!(matches!(result, Err(ConfigError::NotFound(_))));
}

// =============================================================================
// Errors
// =============================================================================

#[test]
fn test_unknown_override_is_rejected() {
    let result = isolated().var("RAVYN_COLOUR", "red").load();
    match result {
        Err(ConfigError::OverrideError { key, .. }) => assert_eq!(key, "colour"),
        other => panic!("unexpected result {:?}", other.map(|s| s.title)),
    }
}

#[test]
fn test_config_errors_become_improperly_configured() {
    let err = isolated().var("RAVYN_DEBUG", "perhaps").load().unwrap_err();
    let err: ravyn_core::Error = err.into();
    assert!(matches!(err, ravyn_core::Error::ImproperlyConfigured(_)));
}
