//! Extensions plug collaborators (databases, caches, schedulers) into an
//! application. They run once at startup, in declared order, except that an
//! extension naming others in [`Extension::ensure`] always runs after them.

use crate::application::App;
use crate::logging::{debug, info};
use crate::Error;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

#[async_trait]
pub trait Extension: Send + Sync {
    /// Unique name inside one application.
    fn name(&self) -> &str;

    /// Extensions that must be extended before this one.
    fn ensure(&self) -> Vec<String> {
        Vec::new()
    }

    async fn extend(&self, app: &App) -> Result<(), Error>;
}

/// Extensions of one application, in execution order.
#[derive(Clone, Default)]
pub struct ExtensionRegistry {
    ordered: Vec<Arc<dyn Extension>>,
}

impl ExtensionRegistry {
    /// Validate names and order `extensions` so every `ensure` runs first.
    pub fn new(extensions: Vec<Arc<dyn Extension>>) -> Result<Self, Error> {
        let mut index: HashMap<String, usize> = HashMap::new();
        for (position, extension) in extensions.iter().enumerate() {
            if index.insert(extension.name().to_string(), position).is_some() {
                return Err(Error::ImproperlyConfigured(format!(
                    "Extension '{}' is registered more than once",
                    extension.name()
                )));
            }
        }

        let requires: Vec<Vec<usize>> = extensions
            .iter()
            .map(|extension| {
                extension
                    .ensure()
                    .iter()
                    .map(|name| {
                        index.get(name).copied().ok_or_else(|| {
                            Error::ImproperlyConfigured(format!(
                                "Extension '{}' requires unknown extension '{}'",
                                extension.name(),
                                name
                            ))
                        })
                    })
                    .collect()
            })
            .collect::<Result<_, _>>()?;

        // Declaration order wins among extensions that are ready
        let mut ordered = Vec::with_capacity(extensions.len());
        let mut placed = HashSet::new();
        while ordered.len() < extensions.len() {
            let next = (0..extensions.len()).find(|i| {
                !placed.contains(i) && requires[*i].iter().all(|dep| placed.contains(dep))
            });
            match next {
                Some(i) => {
                    placed.insert(i);
                    ordered.push(extensions[i].clone());
                }
                None => {
                    let stuck: Vec<&str> = (0..extensions.len())
                        .filter(|i| !placed.contains(i))
                        .map(|i| extensions[i].name())
                        .collect();
                    return Err(Error::ImproperlyConfigured(format!(
                        "Circular extension requirements between: {}",
                        stuck.join(", ")
                    )));
                }
            }
        }

        Ok(Self { ordered })
    }

    pub fn names(&self) -> Vec<&str> {
        self.ordered.iter().map(|e| e.name()).collect()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Extension>> {
        self.ordered.iter().find(|e| e.name() == name).cloned()
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }

    /// Run every extension once, in order.
    pub async fn extend_all(&self, app: &App) -> Result<(), Error> {
        for extension in &self.ordered {
            debug!(extension = extension.name(), "Extending application");
            extension.extend(app).await?;
        }
        if !self.ordered.is_empty() {
            info!(extensions = ?self.names(), "Extensions loaded");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Named {
        name: &'static str,
        ensure: Vec<&'static str>,
    }

    #[async_trait]
    impl Extension for Named {
        fn name(&self) -> &str {
            self.name
        }

        fn ensure(&self) -> Vec<String> {
            self.ensure.iter().map(|s| s.to_string()).collect()
        }

        async fn extend(&self, _app: &App) -> Result<(), Error> {
            Ok(())
        }
    }

    fn ext(name: &'static str, ensure: &[&'static str]) -> Arc<dyn Extension> {
        Arc::new(Named {
            name,
            ensure: ensure.to_vec(),
        })
    }

    #[test]
    fn test_ensure_reorders() {
        let registry = ExtensionRegistry::new(vec![
            ext("admin", &["db"]),
            ext("cache", &[]),
            ext("db", &[]),
        ])
        .unwrap();
        assert_eq!(registry.names(), vec!["cache", "db", "admin"]);
    }

    #[test]
    fn test_duplicate_name_is_fatal() {
        let result = ExtensionRegistry::new(vec![ext("db", &[]), ext("db", &[])]);
        assert!(matches!(result, Err(Error::ImproperlyConfigured(_))));
    }

    #[test]
    fn test_unknown_and_circular_requirements() {
        assert!(ExtensionRegistry::new(vec![ext("a", &["missing"])]).is_err());
        let err = ExtensionRegistry::new(vec![ext("a", &["b"]), ext("b", &["a"])])
            .err()
            .unwrap();
        assert!(err.to_string().contains("Circular"));
    }
}
