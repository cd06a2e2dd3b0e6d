//! Shared, typed state for applications and requests.
//!
//! A [`State`] is a cheaply cloneable handle: clones share the same storage,
//! so a value inserted by a before-request hook is visible to the handler and
//! to the after-request hooks of the same request.
//!
//! Values are stored twice over: typed values keyed by `TypeId`, and named
//! JSON values for data that handlers want to read without knowing the
//! concrete type.
//!
//! ```rust
//! use ravyn_core::State;
//!
//! struct Pool { size: usize }
//!
//! let state = State::new();
//! state.insert(Pool { size: 4 });
//! state.set("tenant", "acme");
//!
//! assert_eq!(state.get::<Pool>().map(|p| p.size), Some(4));
//! assert_eq!(state.value("tenant"), Some(serde_json::json!("acme")));
//! ```

use parking_lot::RwLock;
use serde_json::Value;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

#[derive(Default)]
struct StateInner {
    typed: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
    named: HashMap<String, Value>,
}

/// Cloneable typed map shared between clones.
#[derive(Clone, Default)]
pub struct State {
    inner: Arc<RwLock<StateInner>>,
}

impl State {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a typed value. An existing value of the same type is replaced.
    pub fn insert<T: Send + Sync + 'static>(&self, value: T) {
        self.insert_arc(Arc::new(value));
    }

    /// Insert an `Arc`-wrapped value directly.
    pub fn insert_arc<T: Send + Sync + 'static>(&self, value: Arc<T>) {
        self.inner
            .write()
            .typed
            .insert(TypeId::of::<T>(), value as Arc<dyn Any + Send + Sync>);
    }

    /// Get a typed value.
    pub fn get<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        let arc = self.inner.read().typed.get(&TypeId::of::<T>())?.clone();
        arc.downcast::<T>().ok()
    }

    pub fn contains<T: Send + Sync + 'static>(&self) -> bool {
        self.inner.read().typed.contains_key(&TypeId::of::<T>())
    }

    /// Remove a typed value, returning it.
    pub fn remove<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        let arc = self.inner.write().typed.remove(&TypeId::of::<T>())?;
        arc.downcast::<T>().ok()
    }

    /// Set a named value.
    pub fn set(&self, name: impl Into<String>, value: impl Into<Value>) {
        self.inner.write().named.insert(name.into(), value.into());
    }

    /// Read a named value.
    pub fn value(&self, name: &str) -> Option<Value> {
        self.inner.read().named.get(name).cloned()
    }

    /// All named values as a JSON object.
    pub fn to_json(&self) -> Value {
        let inner = self.inner.read();
        Value::Object(
            inner
                .named
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }

    pub fn len(&self) -> usize {
        let inner = self.inner.read();
        inner.typed.len() + inner.named.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether both handles point at the same storage.
    pub fn ptr_eq(&self, other: &State) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("State")
            .field("typed", &inner.typed.len())
            .field("named", &inner.named)
            .finish()
    }
}
