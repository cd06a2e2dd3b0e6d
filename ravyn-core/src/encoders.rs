//! Encoder registry.
//!
//! An [`Encoder`] recognizes values and annotations belonging to one schema
//! library, serializes such values to JSON and decodes JSON into typed
//! instances. The registry is ordered and the first match wins. User encoders
//! always come before the built-in ones:
//!
//! 1. encoders registered on the application,
//! 2. encoders registered process-wide with [`register_encoder`],
//! 3. [`SerdeEncoder`], [`ModelEncoder`], [`PrimitiveEncoder`].
//!
//! Each application runs its requests inside [`scoped`], so two mounted
//! applications with different encoders never see each other's.

use crate::error::ErrorDetail;
use crate::extract::Argument;
use crate::logging::{debug, trace};
use crate::params::{ModelInstance, SerdeObject, TypeHint};
use crate::Error;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

/// A detect/serialize/decode strategy for one family of types.
pub trait Encoder: Send + Sync {
    fn name(&self) -> &str;

    /// Whether `value` belongs to this encoder.
    fn is_type(&self, value: &(dyn Any + Send + Sync)) -> bool;

    /// Whether this encoder decodes values declared as `hint`.
    fn is_annotation(&self, hint: &TypeHint) -> bool;

    fn serialize(&self, value: &(dyn Any + Send + Sync)) -> Result<Value, Error>;

    /// Build a typed value. `registry` decodes nested annotations.
    fn decode(
        &self,
        hint: &TypeHint,
        value: Value,
        registry: &EncoderRegistry,
    ) -> Result<Argument, Vec<ErrorDetail>>;
}

/// Values declared with [`TypeHint::serde`] and wrapped in [`SerdeObject`].
pub struct SerdeEncoder;

impl Encoder for SerdeEncoder {
    fn name(&self) -> &str {
        "serde"
    }

    fn is_type(&self, value: &(dyn Any + Send + Sync)) -> bool {
        value.is::<SerdeObject>()
    }

    fn is_annotation(&self, hint: &TypeHint) -> bool {
        matches!(hint, TypeHint::Serde(_))
    }

    fn serialize(&self, value: &(dyn Any + Send + Sync)) -> Result<Value, Error> {
        match value.downcast_ref::<SerdeObject>() {
            Some(object) => object.to_json(),
            None => Err(Error::Serialization("expected a serde object".to_string())),
        }
    }

    fn decode(
        &self,
        hint: &TypeHint,
        value: Value,
        _registry: &EncoderRegistry,
    ) -> Result<Argument, Vec<ErrorDetail>> {
        let TypeHint::Serde(serde_hint) = hint else {
            return Err(vec![ErrorDetail::new(
                "model_type",
                "Input does not match a serde annotation",
            )]);
        };
        let input = value.clone();
        serde_hint
            .decode(value)
            .map(Argument::object)
            .map_err(|e| vec![serde_error_detail(&e, input)])
    }
}

/// Turn a serde_json error into a validation failure, recovering the field
/// name for missing fields.
fn serde_error_detail(error: &serde_json::Error, input: Value) -> ErrorDetail {
    let message = error.to_string();
    if let Some(rest) = message.strip_prefix("missing field `")
        && let Some(field) = rest.split('`').next()
    {
        return ErrorDetail::missing().prefixed(field.to_string()).with_input(input);
    }
    let message = message
        .split(" at line ")
        .next()
        .unwrap_or(&message)
        .to_string();
    ErrorDetail::new("value_error", message).with_input(input)
}

/// Runtime-described models ([`TypeHint::Model`] / [`ModelInstance`]).
pub struct ModelEncoder;

impl Encoder for ModelEncoder {
    fn name(&self) -> &str {
        "model"
    }

    fn is_type(&self, value: &(dyn Any + Send + Sync)) -> bool {
        value.is::<ModelInstance>()
    }

    fn is_annotation(&self, hint: &TypeHint) -> bool {
        matches!(hint, TypeHint::Model(_))
    }

    fn serialize(&self, value: &(dyn Any + Send + Sync)) -> Result<Value, Error> {
        match value.downcast_ref::<ModelInstance>() {
            Some(instance) => Ok(instance.to_value()),
            None => Err(Error::Serialization("expected a model instance".to_string())),
        }
    }

    fn decode(
        &self,
        hint: &TypeHint,
        value: Value,
        registry: &EncoderRegistry,
    ) -> Result<Argument, Vec<ErrorDetail>> {
        let TypeHint::Model(schema) = hint else {
            return Err(vec![ErrorDetail::new("model_type", "Input is not a model")]);
        };
        let Value::Object(mut object) = value else {
            return Err(vec![
                ErrorDetail::new(
                    "model_type",
                    format!(
                        "Input should be a valid dictionary or instance of {}",
                        schema.name
                    ),
                )
                .with_input(value),
            ]);
        };

        let mut values = Map::new();
        let mut errors = Vec::new();
        for field in &schema.fields {
            let key = field.key().to_string();
            match object.remove(&key) {
                None | Some(Value::Null) if field.default.is_some() => {
                    values.insert(field.name.clone(), field.default.clone().unwrap_or_default());
                }
                None if field.required => {
                    errors.push(ErrorDetail::missing().prefixed(key));
                }
                None => {
                    values.insert(field.name.clone(), Value::Null);
                }
                Some(raw) => match registry.decode(&field.hint, raw) {
                    Ok(argument) => {
                        let decoded = registry.encode_argument(&argument).unwrap_or_default();
                        let violations = field.constraints.check(&decoded);
                        if violations.is_empty() {
                            values.insert(field.name.clone(), decoded);
                        } else {
                            errors.extend(violations.into_iter().map(|e| e.prefixed(key.clone())));
                        }
                    }
                    Err(nested) => {
                        errors.extend(nested.into_iter().map(|e| e.prefixed(key.clone())));
                    }
                },
            }
        }

        if errors.is_empty() {
            Ok(Argument::object(ModelInstance::new(schema.clone(), values)))
        } else {
            Err(errors)
        }
    }
}

macro_rules! primitive_types {
    ($mac:ident, $value:expr) => {
        $mac!(
            $value, Value, String, &'static str, bool, i64, i32, i16, i8, u64, u32, u16, u8, f64,
            f32, (), Vec<Value>, Vec<String>, Vec<i64>, Vec<f64>, Vec<bool>, Map<String, Value>,
            HashMap<String, Value>, HashMap<String, String>, Option<String>, Option<i64>,
            Option<Value>
        )
    };
}

macro_rules! is_any_of {
    ($value:expr, $($ty:ty),+) => {
        false $(|| $value.is::<$ty>())+
    };
}

macro_rules! serialize_any_of {
    ($value:expr, $($ty:ty),+) => {
        $(
            if let Some(v) = $value.downcast_ref::<$ty>() {
                return serde_json::to_value(v).map_err(Error::from);
            }
        )+
    };
}

/// JSON values, scalars and standard containers.
pub struct PrimitiveEncoder;

impl Encoder for PrimitiveEncoder {
    fn name(&self) -> &str {
        "primitive"
    }

    fn is_type(&self, value: &(dyn Any + Send + Sync)) -> bool {
        primitive_types!(is_any_of, value)
    }

    fn is_annotation(&self, hint: &TypeHint) -> bool {
        !matches!(
            hint,
            TypeHint::Model(_) | TypeHint::Serde(_) | TypeHint::Custom(_)
        )
    }

    fn serialize(&self, value: &(dyn Any + Send + Sync)) -> Result<Value, Error> {
        primitive_types!(serialize_any_of, value);
        Err(Error::Serialization("unsupported primitive".to_string()))
    }

    fn decode(
        &self,
        hint: &TypeHint,
        value: Value,
        registry: &EncoderRegistry,
    ) -> Result<Argument, Vec<ErrorDetail>> {
        match hint {
            TypeHint::Optional(_) if value.is_null() => Ok(Argument::Value(Value::Null)),
            TypeHint::Optional(inner) => registry.decode(inner, value),
            TypeHint::List(inner) => {
                let Value::Array(items) = value else {
                    return Err(vec![
                        ErrorDetail::new("list_type", "Input should be a valid list")
                            .with_input(value),
                    ]);
                };
                let mut out = Vec::with_capacity(items.len());
                let mut errors = Vec::new();
                for (index, item) in items.into_iter().enumerate() {
                    match registry.decode(inner, item) {
                        Ok(argument) => out.push(registry.encode_argument(&argument).unwrap_or_default()),
                        Err(nested) => errors.extend(nested.into_iter().map(|e| e.prefixed(index))),
                    }
                }
                if errors.is_empty() {
                    Ok(Argument::Value(Value::Array(out)))
                } else {
                    Err(errors)
                }
            }
            TypeHint::Dict(inner) => {
                let Value::Object(entries) = value else {
                    return Err(vec![
                        ErrorDetail::new("dict_type", "Input should be a valid dictionary")
                            .with_input(value),
                    ]);
                };
                let mut out = Map::new();
                let mut errors = Vec::new();
                for (key, item) in entries {
                    match registry.decode(inner, item) {
                        Ok(argument) => {
                            out.insert(key, registry.encode_argument(&argument).unwrap_or_default());
                        }
                        Err(nested) => {
                            errors.extend(nested.into_iter().map(|e| e.prefixed(key.clone())))
                        }
                    }
                }
                if errors.is_empty() {
                    Ok(Argument::Value(Value::Object(out)))
                } else {
                    Err(errors)
                }
            }
            scalar => scalar
                .coerce_scalar(&value)
                .map(Argument::Value)
                .map_err(|e| vec![e]),
        }
    }
}

/// Ordered encoder list. Cloning is cheap.
#[derive(Clone)]
pub struct EncoderRegistry {
    encoders: Arc<Vec<Arc<dyn Encoder>>>,
}

static REGISTERED: Lazy<RwLock<Vec<Arc<dyn Encoder>>>> = Lazy::new(|| RwLock::new(Vec::new()));

tokio::task_local! {
    static ACTIVE: EncoderRegistry;
}

/// Register an encoder process-wide. Applications built afterwards see it.
pub fn register_encoder<E: Encoder + 'static>(encoder: E) {
    debug!(encoder = encoder.name(), "Registering encoder");
    REGISTERED.write().push(Arc::new(encoder));
}

/// The registry of the application handling the current task, else the
/// process-wide one.
pub fn active() -> EncoderRegistry {
    ACTIVE
        .try_with(Clone::clone)
        .unwrap_or_else(|_| EncoderRegistry::global())
}

/// Run `fut` with `registry` as the active registry.
pub async fn scoped<F: Future>(registry: EncoderRegistry, fut: F) -> F::Output {
    ACTIVE.scope(registry, fut).await
}

impl EncoderRegistry {
    /// Only the built-in encoders.
    pub fn builtin() -> Self {
        Self {
            encoders: Arc::new(Self::builtins()),
        }
    }

    fn builtins() -> Vec<Arc<dyn Encoder>> {
        vec![
            Arc::new(SerdeEncoder),
            Arc::new(ModelEncoder),
            Arc::new(PrimitiveEncoder),
        ]
    }

    /// Process-wide registered encoders followed by the built-ins.
    pub fn global() -> Self {
        let mut encoders = REGISTERED.read().clone();
        encoders.extend(Self::builtins());
        Self {
            encoders: Arc::new(encoders),
        }
    }

    /// A registry consulting `first` before everything already here.
    pub fn with_encoders(&self, first: &[Arc<dyn Encoder>]) -> Self {
        let mut encoders = first.to_vec();
        encoders.extend(self.encoders.iter().cloned());
        Self {
            encoders: Arc::new(encoders),
        }
    }

    pub fn encoders(&self) -> &[Arc<dyn Encoder>] {
        &self.encoders
    }

    pub fn names(&self) -> Vec<&str> {
        self.encoders.iter().map(|e| e.name()).collect()
    }

    /// Serialize with the first encoder that recognizes `value`.
    pub fn serialize(&self, value: &(dyn Any + Send + Sync)) -> Result<Value, Error> {
        match self.encoders.iter().find(|e| e.is_type(value)) {
            Some(encoder) => encoder.serialize(value),
            None => Err(Error::Serialization(
                "no registered encoder can serialize the returned value".to_string(),
            )),
        }
    }

    pub fn encode_argument(&self, argument: &Argument) -> Result<Value, Error> {
        match argument {
            Argument::Value(value) => Ok(value.clone()),
            Argument::Object(object) => self.serialize(&**object),
        }
    }

    /// Decode with the first encoder that understands `hint`. Annotations no
    /// encoder claims are passed through untouched.
    pub fn decode(&self, hint: &TypeHint, value: Value) -> Result<Argument, Vec<ErrorDetail>> {
        match self.encoders.iter().find(|e| e.is_annotation(hint)) {
            Some(encoder) => encoder.decode(hint, value, self),
            None => {
                trace!(hint = %hint.name(), "No encoder claims annotation, passing through");
                Ok(Argument::Value(value))
            }
        }
    }
}

impl Default for EncoderRegistry {
    fn default() -> Self {
        Self::global()
    }
}
