//! Consumer trait and type registry.
//!
//! A consumer mirrors changed notes into some external system. Consumers
//! are declared in config as `[consumers.<name>]` tables carrying a `type`
//! tag; the [`ConsumerRegistry`] maps each tag to a factory that validates
//! the table's options and builds the instance.
//!
//! ```text
//! [consumers.inbox]        ┌──────────────────┐
//! type = "taskwarrior" ──▶ │ ConsumerRegistry │ ──▶ Box<dyn Consumer>
//! marker_tag = "todo"      └──────────────────┘
//! ```
//!
//! Custom consumers register a factory under their own tag:
//!
//! ```rust
//! use capture_relay::consumer::ConsumerRegistry;
//!
//! let registry = ConsumerRegistry::with_builtins();
//! // registry.register("webhook", |def, cfg| Ok(Box::new(Webhook::new(def, cfg)?)));
//! assert!(registry.contains("taskwarrior"));
//! ```

use std::collections::BTreeMap;

use anyhow::Result;
use async_trait::async_trait;

use crate::config::{Config, ConsumerDefinition};
use crate::error::ConfigError;
use crate::ledger::Ledger;
use crate::models::{ChangeState, ConsumerOutcome};
use crate::taskwarrior;

/// A sink that receives pending records.
///
/// The runtime calls [`relevant`](Consumer::relevant) first and only hands
/// relevant records to [`handle`](Consumer::handle). Returning an outcome
/// with status `success` or `skip` settles the record for this consumer;
/// `limit` leaves it pending. Returning `Err` counts as an error for this
/// (consumer, record) pair and leaves it pending as well.
///
/// Consumers never write emission rows themselves; the runtime does that
/// from the returned outcome.
#[async_trait]
pub trait Consumer: Send {
    /// Instance name from the config table (e.g. `"taskwarrior"`).
    fn name(&self) -> &str;

    /// Whether this consumer wants to see the record at all.
    fn relevant(&self, _state: &ChangeState) -> bool {
        true
    }

    async fn handle(&mut self, state: &ChangeState, ledger: &Ledger) -> Result<ConsumerOutcome>;
}

/// Builds a consumer from its definition and the run config.
pub type ConsumerFactory =
    Box<dyn Fn(&ConsumerDefinition, &Config) -> Result<Box<dyn Consumer>> + Send + Sync>;

/// Type tag → factory.
pub struct ConsumerRegistry {
    factories: BTreeMap<String, ConsumerFactory>,
}

impl ConsumerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// Create a registry with every built-in consumer type registered.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        taskwarrior::register(&mut registry);
        registry
    }

    /// Register a factory for `type_name`, replacing any earlier one.
    pub fn register<F>(&mut self, type_name: &str, factory: F)
    where
        F: Fn(&ConsumerDefinition, &Config) -> Result<Box<dyn Consumer>> + Send + Sync + 'static,
    {
        self.factories.insert(type_name.to_string(), Box::new(factory));
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.factories.contains_key(type_name)
    }

    /// Registered type tags in sorted order.
    pub fn types(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    /// Check that every definition names a registered type.
    pub fn validate<'a, I>(&self, definitions: I) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = &'a ConsumerDefinition>,
    {
        for definition in definitions {
            if !self.contains(&definition.type_name) {
                return Err(unknown_type(definition));
            }
        }
        Ok(())
    }

    /// Build one consumer.
    pub fn build(&self, definition: &ConsumerDefinition, config: &Config) -> Result<Box<dyn Consumer>> {
        let factory = self
            .factories
            .get(&definition.type_name)
            .ok_or_else(|| unknown_type(definition))?;
        factory(definition, config)
    }

    /// Build every definition in order, stopping at the first failure.
    pub fn build_all<'a, I>(&self, definitions: I, config: &Config) -> Result<Vec<Box<dyn Consumer>>>
    where
        I: IntoIterator<Item = &'a ConsumerDefinition>,
    {
        definitions
            .into_iter()
            .map(|definition| self.build(definition, config))
            .collect()
    }
}

impl Default for ConsumerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn unknown_type(definition: &ConsumerDefinition) -> ConfigError {
    ConfigError::UnknownConsumerType {
        consumer: definition.name.clone(),
        type_name: definition.type_name.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop(String);

    #[async_trait]
    impl Consumer for Noop {
        fn name(&self) -> &str {
            &self.0
        }

        async fn handle(&mut self, _state: &ChangeState, _ledger: &Ledger) -> Result<ConsumerOutcome> {
            Ok(ConsumerOutcome::skip("noop"))
        }
    }

    fn definition(name: &str, type_name: &str) -> ConsumerDefinition {
        ConsumerDefinition {
            name: name.to_string(),
            type_name: type_name.to_string(),
            enabled: true,
            options: toml::Table::new(),
        }
    }

    #[test]
    fn test_builtins_registered() {
        let registry = ConsumerRegistry::with_builtins();
        assert!(registry.contains("taskwarrior"));
        assert_eq!(registry.types().collect::<Vec<_>>(), vec!["taskwarrior"]);
    }

    #[test]
    fn test_unknown_type_is_config_error() {
        let registry = ConsumerRegistry::with_builtins();
        let defs = [definition("inbox", "carrier-pigeon")];
        let err = registry.validate(&defs).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::UnknownConsumerType { ref consumer, ref type_name }
                if consumer == "inbox" && type_name == "carrier-pigeon"
        ));

        let cfg = Config::from_toml_str("").unwrap();
        let err = registry.build(&defs[0], &cfg).err().unwrap();
        assert!(err.downcast_ref::<ConfigError>().is_some());
    }

    #[test]
    fn test_custom_factory_builds_in_order() {
        let mut registry = ConsumerRegistry::new();
        registry.register("noop", |def, _cfg| {
            Ok(Box::new(Noop(def.name.clone())) as Box<dyn Consumer>)
        });
        let cfg = Config::from_toml_str("").unwrap();
        let defs = [definition("b", "noop"), definition("a", "noop")];
        let built = registry.build_all(&defs, &cfg).unwrap();
        let names: Vec<_> = built.iter().map(|c| c.name().to_string()).collect();
        assert_eq!(names, vec!["b", "a"]);
    }
}
