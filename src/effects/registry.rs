//! Effect registry for managing available effect types
//!
//! The registry maps an effect type name to its definition and is the only
//! place the engine looks when it needs to build a live instance.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use super::traits::{EffectDefinition, FilterEffect};
use super::types::{EffectOptions, ParameterMeta};

/// Id handed to the probe instance built while validating a definition
const PROBE_ID: &str = "__registry_probe__";

/// Registration failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("effect type name is empty")]
    EmptyType,
    #[error("effect type '{0}' is already registered")]
    Duplicate(String),
    /// The definition built an instance that reports another type or id
    #[error("definition '{definition}' produced an instance reporting type '{instance}'")]
    TypeMismatch {
        definition: String,
        instance: String,
    },
    #[error("definition '{0}' produced an instance bound to the wrong id")]
    IdMismatch(String),
}

/// Registry of available effect types
///
/// Effects are registered at startup and can be queried by type or category.
pub struct EffectRegistry {
    /// Effect definitions by type identifier
    effects: HashMap<String, Arc<dyn EffectDefinition>>,
    /// Effect types grouped by category
    categories: HashMap<String, Vec<String>>,
    /// Ordered list of categories for display
    category_order: Vec<String>,
}

impl Default for EffectRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl EffectRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            effects: HashMap::new(),
            categories: HashMap::new(),
            category_order: Vec::new(),
        }
    }

    /// Create a registry holding the built-in effects
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        super::builtin::register_builtin_effects(&mut registry);
        registry
    }

    /// Register an effect definition.
    ///
    /// The definition is validated by building one probe instance from its
    /// default options.
    pub fn register(&mut self, definition: impl EffectDefinition + 'static) -> Result<(), RegistryError> {
        let effect_type = definition.effect_type().to_string();
        if effect_type.trim().is_empty() {
            return Err(RegistryError::EmptyType);
        }
        if self.effects.contains_key(&effect_type) {
            return Err(RegistryError::Duplicate(effect_type));
        }

        let probe = definition.create(&definition.default_options(), PROBE_ID);
        if probe.effect_type() != effect_type {
            return Err(RegistryError::TypeMismatch {
                definition: effect_type,
                instance: probe.effect_type().to_string(),
            });
        }
        if probe.id() != PROBE_ID {
            return Err(RegistryError::IdMismatch(effect_type));
        }

        let category = definition.category().to_string();
        let members = self.categories.entry(category.clone()).or_insert_with(|| {
            self.category_order.push(category);
            Vec::new()
        });
        members.push(effect_type.clone());

        tracing::debug!(effect_type = %effect_type, "Registered effect type");
        self.effects.insert(effect_type, Arc::new(definition));
        Ok(())
    }

    /// Get an effect definition by type
    pub fn resolve(&self, effect_type: &str) -> Option<Arc<dyn EffectDefinition>> {
        self.effects.get(effect_type).cloned()
    }

    /// Check if an effect type is registered
    pub fn contains(&self, effect_type: &str) -> bool {
        self.effects.contains_key(effect_type)
    }

    /// Build a live instance, or `None` when the type is unknown
    pub fn create(&self, effect_type: &str, options: &EffectOptions, id: &str) -> Option<Box<dyn FilterEffect>> {
        self.effects.get(effect_type).map(|def| def.create(options, id))
    }

    /// Get all registered effect types, sorted
    pub fn effect_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.effects.keys().map(|s| s.as_str()).collect();
        types.sort_unstable();
        types
    }

    /// Get the number of registered effects
    pub fn len(&self) -> usize {
        self.effects.len()
    }

    /// Check if the registry is empty
    pub fn is_empty(&self) -> bool {
        self.effects.is_empty()
    }

    /// Get all category names in registration order
    pub fn categories(&self) -> &[String] {
        &self.category_order
    }

    /// Get all effect types in a category
    pub fn effects_in_category(&self, category: &str) -> Option<&[String]> {
        self.categories.get(category).map(|v| v.as_slice())
    }

    /// Get the parameters published by an effect type
    pub fn parameters(&self, effect_type: &str) -> Option<Vec<ParameterMeta>> {
        self.effects.get(effect_type).map(|def| def.parameters())
    }

    /// Get the display name for an effect type
    pub fn display_name(&self, effect_type: &str) -> Option<&'static str> {
        self.effects.get(effect_type).map(|def| def.display_name())
    }

    /// Get all effects matching a query on type, name or category
    pub fn search(&self, query: &str) -> Vec<Arc<dyn EffectDefinition>> {
        let query_lower = query.to_lowercase();
        self.effects
            .values()
            .filter(|def| {
                def.display_name().to_lowercase().contains(&query_lower)
                    || def.effect_type().to_lowercase().contains(&query_lower)
                    || def.category().to_lowercase().contains(&query_lower)
            })
            .cloned()
            .collect()
    }
}
