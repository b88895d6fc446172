//! Unit factory registry for configuration-driven setup.
//!
//! The registry allows receiving unit implementations to be registered by
//! name, so a [`SimConfig`](crate::config::SimConfig) can refer to them by
//! their `type` field.
//!
//! # Example
//!
//! ```
//! use pdes::registry::UnitRegistry;
//! use pdes::units::CounterUnit;
//! use std::collections::HashMap;
//!
//! let mut registry = UnitRegistry::new();
//! registry.register("Counter", |id, _attrs| Ok(Box::new(CounterUnit::new(id))));
//!
//! let unit = registry.create("Counter", 1, &HashMap::new()).unwrap();
//! assert_eq!(unit.id(), 1);
//! ```

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use crate::config::{ConfigError, ConfigResult};
use crate::types::UnitId;
use crate::unit::ReceivingUnit;

/// Type alias for unit factory functions.
pub type UnitFactory =
    Arc<dyn Fn(UnitId, &HashMap<String, String>) -> ConfigResult<Box<dyn ReceivingUnit>> + Send + Sync>;

/// A registry for unit factories.
#[derive(Default)]
pub struct UnitRegistry {
    factories: HashMap<String, UnitFactory>,
}

impl UnitRegistry {
    /// Creates a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a unit factory with the given name.
    ///
    /// The factory receives the unit ID and its configured attributes and
    /// reports missing or malformed attributes as a [`ConfigError`].
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(UnitId, &HashMap<String, String>) -> ConfigResult<Box<dyn ReceivingUnit>>
            + Send
            + Sync
            + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
    }

    /// Creates a unit instance by type name.
    pub fn create(
        &self,
        type_name: &str,
        id: UnitId,
        attrs: &HashMap<String, String>,
    ) -> ConfigResult<Box<dyn ReceivingUnit>> {
        let factory = self.factories.get(type_name).ok_or_else(|| {
            ConfigError::Validation(format!("Unknown unit type '{}' for unit {}", type_name, id))
        })?;
        factory(id, attrs)
    }

    /// Returns true if a type is registered.
    pub fn contains(&self, type_name: &str) -> bool {
        self.factories.contains_key(type_name)
    }

    /// Returns the number of registered types.
    pub fn len(&self) -> usize {
        self.factories.len()
    }

    /// Returns true if no types are registered.
    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    /// Returns an iterator over registered type names.
    pub fn type_names(&self) -> impl Iterator<Item = &String> {
        self.factories.keys()
    }

    /// Unregisters a unit type.
    pub fn unregister(&mut self, type_name: &str) -> bool {
        self.factories.remove(type_name).is_some()
    }
}

impl std::fmt::Debug for UnitRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitRegistry")
            .field("registered_types", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Parses a required attribute.
pub fn required_attr<T: FromStr>(
    attrs: &HashMap<String, String>,
    id: UnitId,
    name: &str,
) -> ConfigResult<T> {
    let raw = attrs.get(name).ok_or_else(|| {
        ConfigError::Validation(format!("Unit {} is missing attribute '{}'", id, name))
    })?;
    raw.trim().parse().map_err(|_| {
        ConfigError::Validation(format!(
            "Unit {} has invalid value '{}' for attribute '{}'",
            id, raw, name
        ))
    })
}

/// Creates a default registry with built-in unit types.
///
/// Includes:
/// - `Link` - LinkUnit, requires a positive `free_flow_time`
/// - `Counter` - CounterUnit
pub fn create_default_registry() -> UnitRegistry {
    use crate::units::{CounterUnit, LinkUnit};

    let mut registry = UnitRegistry::new();

    registry.register("Link", |id, attrs| {
        let free_flow_time: u64 = required_attr(attrs, id, "free_flow_time")?;
        if free_flow_time == 0 {
            return Err(ConfigError::Validation(format!(
                "Link {} must have a positive free_flow_time",
                id
            )));
        }
        Ok(Box::new(LinkUnit::new(id, free_flow_time)))
    });

    registry.register("Counter", |id, _| Ok(Box::new(CounterUnit::new(id))));

    registry
}
