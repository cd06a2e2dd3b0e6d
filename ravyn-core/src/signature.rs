//! Handler signatures and the frozen parameter plan derived from them.
//!
//! A [`Signature`] is what a handler or provider declares: an ordered list of
//! named, annotated parameters, optionally pinned by a [`Param`] marker.
//! [`SignatureModel::build`] classifies every parameter into exactly one
//! [`Source`] once, when the route tree is compiled. Precedence:
//!
//! 1. an explicit marker,
//! 2. reserved names (`request`, `socket`, `headers`, `query`, `cookies`,
//!    `state`, `app`, `data`, `payload`),
//! 3. names appearing in the route path,
//! 4. names of effective dependencies,
//! 5. model-like annotations go to the body, everything else to the query.

use crate::dependencies::Provider;
use crate::form::MultipartLimits;
use crate::params::{Constraints, Param, ParamKind, TypeHint};
use crate::Error;
use serde_json::Value;
use std::collections::HashSet;

/// A declared parameter.
#[derive(Debug, Clone)]
pub struct Parameter {
    pub name: String,
    pub hint: TypeHint,
    pub default: Option<Value>,
    pub marker: Option<Param>,
}

impl Parameter {
    pub fn new(name: impl Into<String>, hint: TypeHint) -> Self {
        Self {
            name: name.into(),
            hint,
            default: None,
            marker: None,
        }
    }
}

/// Ordered parameter declarations of a handler or provider.
#[derive(Debug, Clone, Default)]
pub struct Signature {
    params: Vec<Parameter>,
}

impl Signature {
    pub fn new() -> Self {
        Self::default()
    }

    /// A required parameter.
    pub fn param(mut self, name: impl Into<String>, hint: TypeHint) -> Self {
        self.params.push(Parameter::new(name, hint));
        self
    }

    /// A parameter with a default value.
    pub fn optional(
        mut self,
        name: impl Into<String>,
        hint: TypeHint,
        default: impl Into<Value>,
    ) -> Self {
        let mut param = Parameter::new(name, hint);
        param.default = Some(default.into());
        self.params.push(param);
        self
    }

    /// A parameter pinned by a marker.
    pub fn param_with(mut self, name: impl Into<String>, hint: TypeHint, marker: Param) -> Self {
        let mut param = Parameter::new(name, hint);
        param.marker = Some(marker);
        self.params.push(param);
        self
    }

    pub fn push(&mut self, param: Parameter) {
        self.params.push(param);
    }

    pub fn params(&self) -> &[Parameter] {
        &self.params
    }

    pub fn contains(&self, name: &str) -> bool {
        self.params.iter().any(|p| p.name == name)
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }
}

/// Whole-collection views bound by reserved names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reserved {
    Headers,
    Query,
    Cookies,
}

/// Where a parameter's value comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Path,
    Query,
    Header,
    Cookie,
    Body,
    Form,
    File,
    Dependency,
    Request,
    WebSocket,
    State,
    App,
    Reserved(Reserved),
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Path => "path",
            Source::Query => "query",
            Source::Header => "header",
            Source::Cookie => "cookie",
            Source::Body => "body",
            Source::Form => "form",
            Source::File => "file",
            Source::Dependency => "dependency",
            Source::Request => "request",
            Source::WebSocket => "websocket",
            Source::State => "state",
            Source::App => "app",
            Source::Reserved(_) => "reserved",
        }
    }
}

/// One classified parameter.
#[derive(Debug, Clone)]
pub struct ParamSpec {
    pub name: String,
    pub source: Source,
    /// Lookup key: alias, header name or dependency key
    pub key: String,
    pub hint: TypeHint,
    pub default: Option<Value>,
    pub required: bool,
    pub constraints: Constraints,
    pub min_files: Option<usize>,
    pub max_files: Option<usize>,
    pub max_file_size: Option<usize>,
    /// Provider of an anonymous dependency (`Security`/`Requires`)
    pub provider: Option<Provider>,
    pub scheme: Option<String>,
    pub description: Option<String>,
    pub deprecated: bool,
    pub include_in_schema: bool,
}

/// The frozen parameter plan of a handler or provider.
#[derive(Debug, Clone, Default)]
pub struct SignatureModel {
    specs: Vec<ParamSpec>,
    /// Read each body parameter from its own key of one body object
    embed_body: bool,
    is_websocket: bool,
}

const RESERVED: &[&str] = &[
    "request", "socket", "headers", "query", "cookies", "state", "app", "data", "payload",
];

fn source_for_marker(kind: ParamKind) -> Source {
    match kind {
        ParamKind::Query => Source::Query,
        ParamKind::Header => Source::Header,
        ParamKind::Cookie => Source::Cookie,
        ParamKind::Path => Source::Path,
        ParamKind::Body => Source::Body,
        ParamKind::Form => Source::Form,
        ParamKind::File => Source::File,
        ParamKind::Security | ParamKind::Requires | ParamKind::Injects => Source::Dependency,
    }
}

fn source_for_reserved(name: &str) -> Option<Source> {
    match name {
        "request" => Some(Source::Request),
        "socket" => Some(Source::WebSocket),
        "headers" => Some(Source::Reserved(Reserved::Headers)),
        "query" => Some(Source::Reserved(Reserved::Query)),
        "cookies" => Some(Source::Reserved(Reserved::Cookies)),
        "state" => Some(Source::State),
        "app" => Some(Source::App),
        "data" | "payload" => Some(Source::Body),
        _ => None,
    }
}

impl SignatureModel {
    /// Classify `signature` against the route's path parameters and the
    /// names of the effective dependencies.
    pub fn build(
        signature: &Signature,
        path_params: &HashSet<String>,
        dependencies: &HashSet<String>,
        is_websocket: bool,
    ) -> Result<Self, Error> {
        let mut seen = HashSet::new();
        let mut specs = Vec::with_capacity(signature.params().len());

        for param in signature.params() {
            if !seen.insert(param.name.as_str()) {
                return Err(Error::ImproperlyConfigured(format!(
                    "Parameter '{}' is declared more than once",
                    param.name
                )));
            }

            let source = match &param.marker {
                Some(marker) => source_for_marker(marker.kind),
                None => source_for_reserved(&param.name).unwrap_or_else(|| {
                    if path_params.contains(&param.name) {
                        Source::Path
                    } else if dependencies.contains(&param.name) {
                        Source::Dependency
                    } else if param.hint.is_model_like() {
                        Source::Body
                    } else if param.hint.is_file() {
                        Source::File
                    } else {
                        Source::Query
                    }
                }),
            };

            specs.push(Self::spec_for(param, source, path_params)?);
        }

        if seen.contains("data") && seen.contains("payload") {
            return Err(Error::ImproperlyConfigured(
                "Only one of 'data' or 'payload' may be declared".to_string(),
            ));
        }

        let has_body = specs.iter().any(|s| s.source == Source::Body);
        let has_form = specs
            .iter()
            .any(|s| matches!(s.source, Source::Form | Source::File));
        if has_body && has_form {
            return Err(Error::ImproperlyConfigured(
                "Body parameters cannot be mixed with form or file parameters".to_string(),
            ));
        }

        if is_websocket {
            if !specs.iter().any(|s| s.source == Source::WebSocket) {
                return Err(Error::ImproperlyConfigured(
                    "WebSocket handlers must declare a 'socket' parameter".to_string(),
                ));
            }
            if let Some(spec) = specs.iter().find(|s| {
                matches!(
                    s.source,
                    Source::Body | Source::Form | Source::File | Source::Request
                )
            }) {
                return Err(Error::ImproperlyConfigured(format!(
                    "WebSocket handlers cannot take '{}' from the {}",
                    spec.name,
                    spec.source.as_str()
                )));
            }
        } else if let Some(spec) = specs.iter().find(|s| s.source == Source::WebSocket) {
            return Err(Error::ImproperlyConfigured(format!(
                "'{}' is only available to WebSocket handlers",
                spec.name
            )));
        }

        let body_count = specs.iter().filter(|s| s.source == Source::Body).count();
        let embed_body = body_count > 1
            || signature.params().iter().any(|p| {
                p.marker
                    .as_ref()
                    .is_some_and(|m| m.kind == ParamKind::Body && m.embed)
            });

        Ok(Self {
            specs,
            embed_body,
            is_websocket,
        })
    }

    fn spec_for(
        param: &Parameter,
        source: Source,
        path_params: &HashSet<String>,
    ) -> Result<ParamSpec, Error> {
        let marker = param.marker.clone().unwrap_or_else(|| {
            let kind = match source {
                Source::Header => ParamKind::Header,
                Source::Cookie => ParamKind::Cookie,
                Source::Path => ParamKind::Path,
                Source::Body => ParamKind::Body,
                Source::Form => ParamKind::Form,
                Source::File => ParamKind::File,
                Source::Dependency => ParamKind::Injects,
                _ => ParamKind::Query,
            };
            Param::new(kind)
        });

        let alias = marker.alias.clone();
        if source == Source::Path {
            let key = alias.as_deref().unwrap_or(&param.name);
            if !path_params.contains(key) {
                return Err(Error::ImproperlyConfigured(format!(
                    "Path parameter '{}' does not appear in the route path",
                    key
                )));
            }
        }
        if matches!(marker.kind, ParamKind::Security | ParamKind::Requires)
            && marker.provider.is_none()
        {
            return Err(Error::ImproperlyConfigured(format!(
                "Parameter '{}' needs a provider",
                param.name
            )));
        }

        let key = match (&source, &marker.provider) {
            (Source::Dependency, Some(provider)) => {
                format!("{}@{:x}", param.name, provider.id())
            }
            (Source::Header, _) => alias
                .clone()
                .unwrap_or_else(|| param.name.replace('_', "-"))
                .to_ascii_lowercase(),
            _ => alias.clone().unwrap_or_else(|| param.name.clone()),
        };

        let default = marker.default.clone().or_else(|| param.default.clone());
        let required = marker
            .required
            .unwrap_or(default.is_none() && !param.hint.is_optional());

        let mut constraints = marker.constraints.clone();
        constraints.compile()?;

        Ok(ParamSpec {
            name: param.name.clone(),
            source,
            key,
            hint: param.hint.clone(),
            default,
            required,
            constraints,
            min_files: marker.min_files,
            max_files: marker.max_files,
            max_file_size: marker.max_file_size,
            provider: marker.provider.clone(),
            scheme: marker.scheme.clone(),
            description: marker.description.clone(),
            deprecated: marker.deprecated,
            include_in_schema: marker.include_in_schema,
        })
    }

    pub fn specs(&self) -> &[ParamSpec] {
        &self.specs
    }

    pub fn get(&self, name: &str) -> Option<&ParamSpec> {
        self.specs.iter().find(|s| s.name == name)
    }

    pub fn embed_body(&self) -> bool {
        self.embed_body
    }

    pub fn is_websocket(&self) -> bool {
        self.is_websocket
    }

    /// Parameters resolved through the dependency resolver.
    pub fn dependencies(&self) -> impl Iterator<Item = &ParamSpec> {
        self.specs.iter().filter(|s| s.source == Source::Dependency)
    }

    /// Whether any parameter needs the request body.
    /// Per-field upload limits to enforce while a multipart body streams in.
    pub fn multipart_limits(&self) -> MultipartLimits {
        self.specs
            .iter()
            .filter(|s| s.source == Source::File)
            .filter_map(|s| s.max_file_size.map(|bytes| (s.key.clone(), bytes as u64)))
            .fold(MultipartLimits::default(), |limits, (key, bytes)| limits.field(key, bytes))
    }

    pub fn reads_body(&self) -> bool {
        self.specs
            .iter()
            .any(|s| matches!(s.source, Source::Body | Source::Form | Source::File))
    }

    /// Whether `name` is reserved for a framework-provided value.
    pub fn is_reserved(name: &str) -> bool {
        RESERVED.contains(&name)
    }
}
