use std::collections::HashMap;

use anyhow::{anyhow, Result};

use super::backend::EngineFactory;

/// Registry of detection engine factories, keyed by name.
///
/// Engines are built fresh for every (re)initialization, so the registry holds
/// factories rather than instances.
pub struct EngineRegistry {
    factories: HashMap<String, EngineFactory>,
    default_name: Option<String>,
}

impl EngineRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
            default_name: None,
        }
    }

    /// Register a factory. The first registered factory becomes the default.
    pub fn register(&mut self, name: &str, factory: EngineFactory) {
        if self.default_name.is_none() {
            self.default_name = Some(name.to_string());
        }
        self.factories.insert(name.to_string(), factory);
    }

    /// Set default engine by name.
    pub fn set_default(&mut self, name: &str) -> Result<()> {
        if !self.factories.contains_key(name) {
            return Err(anyhow!("engine '{}' not registered", name));
        }
        self.default_name = Some(name.to_string());
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<EngineFactory> {
        self.factories.get(name).cloned()
    }

    /// Factory for `name`, or the default when `name` is `None`.
    pub fn factory(&self, name: Option<&str>) -> Result<EngineFactory> {
        match name {
            Some(name) => self.get(name).ok_or_else(|| {
                anyhow!(
                    "engine '{}' not registered (available: {})",
                    name,
                    self.list().join(", ")
                )
            }),
            None => self
                .default_name
                .as_deref()
                .and_then(|name| self.get(name))
                .ok_or_else(|| anyhow!("no detection engine registered")),
        }
    }

    /// Registered engine names, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for EngineRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EngineScript, ScriptedEngine};

    #[test]
    fn first_registered_is_default() {
        let mut registry = EngineRegistry::new();
        let (a, _) = ScriptedEngine::factory(EngineScript::default());
        let (b, _) = ScriptedEngine::factory(EngineScript::default());
        registry.register("scripted", a);
        registry.register("other", b);

        assert!(registry.factory(None).is_ok());
        assert_eq!(registry.list(), vec!["other", "scripted"]);
        registry.set_default("other").unwrap();
        assert!(registry.factory(Some("other")).is_ok());
    }

    #[test]
    fn unknown_names_are_errors() {
        let mut registry = EngineRegistry::new();
        assert!(registry.factory(None).is_err());
        assert!(registry.set_default("missing").is_err());

        let (factory, _) = ScriptedEngine::factory(EngineScript::default());
        registry.register("scripted", factory);
        let err = registry.factory(Some("missing")).err().unwrap();
        assert!(err.to_string().contains("available: scripted"));
    }
}
