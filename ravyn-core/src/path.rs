// Path templates with typed convertors

use crate::Error;
use regex::Regex;
use serde_json::Value;
use std::collections::{HashMap, HashSet};

/// Typed convertor of a `{name:type}` path token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Convertor {
    Str,
    Int,
    Float,
    Uuid,
    /// Any remaining characters, `/` included
    Path,
    DateTime,
}

impl Convertor {
    pub fn parse(name: &str) -> Result<Self, Error> {
        match name {
            "" | "str" => Ok(Convertor::Str),
            "int" => Ok(Convertor::Int),
            "float" => Ok(Convertor::Float),
            "uuid" => Ok(Convertor::Uuid),
            "path" => Ok(Convertor::Path),
            "datetime" => Ok(Convertor::DateTime),
            other => Err(Error::ImproperlyConfigured(format!(
                "Unknown path convertor '{}'",
                other
            ))),
        }
    }

    fn pattern(&self, host: bool) -> &'static str {
        match self {
            Convertor::Str if host => "[^.]+",
            Convertor::Str => "[^/]+",
            Convertor::Int => "[0-9]+",
            Convertor::Float => r"[0-9]+(?:\.[0-9]+)?",
            Convertor::Uuid => {
                "[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}"
            }
            Convertor::Path => ".*",
            Convertor::DateTime => {
                r"[0-9]{4}-[0-9]{2}-[0-9]{2}T[0-9]{2}:[0-9]{2}:[0-9]{2}(?:\.[0-9]+)?"
            }
        }
    }

    /// Convert a matched segment. `None` rejects the match.
    pub fn convert(&self, raw: &str) -> Option<Value> {
        match self {
            // scope paths arrive percent-decoded already
            Convertor::Str | Convertor::Path => Some(Value::String(raw.to_string())),
            Convertor::Int => raw.parse::<i64>().ok().map(Value::from),
            Convertor::Float => raw.parse::<f64>().ok().map(Value::from),
            Convertor::Uuid => uuid::Uuid::parse_str(raw)
                .ok()
                .map(|id| Value::String(id.to_string())),
            Convertor::DateTime => {
                chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
                    .ok()
                    .map(|_| Value::String(raw.to_string()))
            }
        }
    }
}

/// Percent-decode a request target path into the form `Scope::path` holds.
/// Invalid UTF-8 leaves the path as sent.
pub fn decode_path(raw: &str) -> String {
    urlencoding::decode(raw)
        .map(|p| p.into_owned())
        .unwrap_or_else(|_| raw.to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Full,
    Prefix,
    Host,
}

/// A compiled route template.
///
/// Tokens are written `{name}`, `{name:type}`, `<name>` or `<name:type>`.
#[derive(Debug, Clone)]
pub struct PathPattern {
    template: String,
    regex: Regex,
    params: Vec<(String, Convertor)>,
    mode: Mode,
}

impl PathPattern {
    /// A pattern that must match the whole path.
    pub fn new(template: &str) -> Result<Self, Error> {
        Self::compile(template, Mode::Full)
    }

    /// A mount prefix; matching yields the unconsumed remainder.
    pub fn prefix(template: &str) -> Result<Self, Error> {
        Self::compile(template.trim_end_matches('/'), Mode::Prefix)
    }

    /// A `Host` header pattern, matched case-insensitively.
    pub fn host(template: &str) -> Result<Self, Error> {
        Self::compile(template, Mode::Host)
    }

    fn compile(template: &str, mode: Mode) -> Result<Self, Error> {
        let mut source = String::from("^");
        if mode == Mode::Host {
            source.insert_str(0, "(?i)");
        }
        let mut params: Vec<(String, Convertor)> = Vec::new();
        let mut literal = String::new();
        let mut chars = template.chars();

        while let Some(c) = chars.next() {
            let close = match c {
                '{' => '}',
                '<' => '>',
                _ => {
                    literal.push(c);
                    continue;
                }
            };
            let token: String = chars.by_ref().take_while(|ch| *ch != close).collect();
            let (name, kind) = token.split_once(':').unwrap_or((token.as_str(), ""));
            let name = name.trim();
            if name.is_empty() || !name.chars().all(|ch| ch.is_alphanumeric() || ch == '_') {
                return Err(Error::ImproperlyConfigured(format!(
                    "Invalid path parameter '{}' in '{}'",
                    token, template
                )));
            }
            if params.iter().any(|(existing, _)| existing == name) {
                return Err(Error::ImproperlyConfigured(format!(
                    "Duplicated path parameter '{}' in '{}'",
                    name, template
                )));
            }
            let convertor = Convertor::parse(kind.trim())?;

            source.push_str(&regex::escape(&literal));
            literal.clear();
            source.push('(');
            source.push_str(convertor.pattern(mode == Mode::Host));
            source.push(')');
            params.push((name.to_string(), convertor));
        }
        source.push_str(&regex::escape(&literal));

        match mode {
            Mode::Prefix => source.push_str("(/.*)?$"),
            Mode::Host => source.push_str("(?::[0-9]+)?$"),
            Mode::Full => source.push('$'),
        }

        let regex = Regex::new(&source).map_err(|e| {
            Error::ImproperlyConfigured(format!("Invalid route template '{}': {}", template, e))
        })?;
        Ok(Self {
            template: template.to_string(),
            regex,
            params,
            mode,
        })
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn param_names(&self) -> HashSet<String> {
        self.params.iter().map(|(name, _)| name.clone()).collect()
    }

    pub fn params(&self) -> &[(String, Convertor)] {
        &self.params
    }

    fn captures(&self, input: &str) -> Option<(HashMap<String, Value>, Option<String>)> {
        let caps = self.regex.captures(input)?;
        let mut values = HashMap::with_capacity(self.params.len());
        for (index, (name, convertor)) in self.params.iter().enumerate() {
            let raw = caps.get(index + 1)?.as_str();
            values.insert(name.clone(), convertor.convert(raw)?);
        }
        let rest = match self.mode {
            Mode::Prefix => Some(
                caps.get(self.params.len() + 1)
                    .map(|m| m.as_str().to_string())
                    .unwrap_or_else(|| "/".to_string()),
            ),
            _ => None,
        };
        Some((values, rest))
    }

    /// Match the whole path.
    pub fn match_full(&self, path: &str) -> Option<HashMap<String, Value>> {
        self.captures(path).map(|(values, _)| values)
    }

    /// Match a prefix; returns the captured values and the remaining path.
    pub fn match_prefix(&self, path: &str) -> Option<(HashMap<String, Value>, String)> {
        self.captures(path)
            .map(|(values, rest)| (values, rest.unwrap_or_else(|| "/".to_string())))
    }
}

/// Join two route paths with exactly one `/` between them.
pub fn join_paths(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    match (base.is_empty(), path.is_empty()) {
        (true, true) => "/".to_string(),
        (true, false) => format!("/{}", path),
        (false, true) => base.to_string(),
        (false, false) => format!("{}/{}", base, path),
    }
}

/// The same path with its trailing slash toggled.
pub fn toggle_trailing_slash(path: &str) -> Option<String> {
    if path == "/" || path.is_empty() {
        None
    } else if let Some(stripped) = path.strip_suffix('/') {
        Some(stripped.to_string())
    } else {
        Some(format!("{}/", path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_typed_params() {
        let pattern = PathPattern::new("/users/{user_id:int}/posts/<slug>").unwrap();
        let values = pattern.match_full("/users/42/posts/hello").unwrap();
        assert_eq!(values["user_id"], json!(42));
        assert_eq!(values["slug"], json!("hello"));
        assert!(pattern.match_full("/users/abc/posts/hello").is_none());
        assert!(pattern.match_full("/users/42/posts/hello/extra").is_none());
    }

    #[test]
    fn test_segments_are_decoded_once() {
        assert_eq!(decode_path("/files/a%2525"), "/files/a%25");
        assert_eq!(decode_path("/caf%C3%A9"), "/café");
        assert_eq!(decode_path("/bad%FF"), "/bad%FF");

        let pattern = PathPattern::new("/files/{name}").unwrap();
        let params = pattern.match_full(&decode_path("/files/a%2525")).unwrap();
        assert_eq!(params["name"], json!("a%25"));
    }

    #[test]
    fn test_path_convertor_spans_segments() {
        let pattern = PathPattern::new("/static/{file:path}").unwrap();
        let values = pattern.match_full("/static/css/site.css").unwrap();
        assert_eq!(values["file"], json!("css/site.css"));
    }

    #[test]
    fn test_uuid_and_float() {
        let pattern = PathPattern::new("/items/{id:uuid}/{price:float}").unwrap();
        let values = pattern
            .match_full("/items/A1B2C3D4-0000-4000-8000-000000000000/9.5")
            .unwrap();
        assert_eq!(values["id"], json!("a1b2c3d4-0000-4000-8000-000000000000"));
        assert_eq!(values["price"], json!(9.5));
    }

    #[test]
    fn test_datetime_convertor() {
        let pattern = PathPattern::new("/at/{when:datetime}").unwrap();
        assert!(pattern.match_full("/at/2024-01-02T03:04:05").is_some());
        assert!(pattern.match_full("/at/2024-13-02T03:04:05").is_none());
    }

    #[test]
    fn test_prefix_remainder() {
        let pattern = PathPattern::prefix("/api/{version}/").unwrap();
        let (values, rest) = pattern.match_prefix("/api/v1/users/1").unwrap();
        assert_eq!(values["version"], json!("v1"));
        assert_eq!(rest, "/users/1");
        let (_, rest) = pattern.match_prefix("/api/v1").unwrap();
        assert_eq!(rest, "/");
        assert!(pattern.match_prefix("/apix/v1").is_none());
    }

    #[test]
    fn test_root_prefix_matches_everything() {
        let pattern = PathPattern::prefix("/").unwrap();
        let (_, rest) = pattern.match_prefix("/anything/here").unwrap();
        assert_eq!(rest, "/anything/here");
    }

    #[test]
    fn test_host_pattern() {
        let pattern = PathPattern::host("{tenant}.example.com").unwrap();
        let values = pattern.match_full("ACME.Example.com:8080").unwrap();
        assert_eq!(values["tenant"], json!("ACME"));
        assert!(pattern.match_full("a.b.example.com").is_none());
    }

    #[test]
    fn test_invalid_templates() {
        assert!(PathPattern::new("/{id}/{id}").is_err());
        assert!(PathPattern::new("/{id:bogus}").is_err());
        assert!(PathPattern::new("/{}").is_err());
    }

    #[test]
    fn test_join_and_toggle() {
        assert_eq!(join_paths("/api/", "/users"), "/api/users");
        assert_eq!(join_paths("", "/"), "/");
        assert_eq!(join_paths("/api", "/"), "/api");
        assert_eq!(toggle_trailing_slash("/users/"), Some("/users".to_string()));
        assert_eq!(toggle_trailing_slash("/users"), Some("/users/".to_string()));
        assert_eq!(toggle_trailing_slash("/"), None);
    }
}
