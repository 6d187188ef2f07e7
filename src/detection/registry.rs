//! Scenario registry
//!
//! Populated once at start-up. External components extend the scenario set
//! by calling [`ScenarioRegistry::register`].

use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use super::scenario::{PageScan, Scenario, UserEnumeration};
use crate::models::is_valid_scenario_name;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Scenario name '{0}' does not conform to the naming convention")]
    InvalidName(String),

    #[error("Scenario '{0}' must have a positive leak speed")]
    InvalidLeakSpeed(String),

    #[error("Scenario '{0}' is already registered")]
    Duplicate(String),
}

/// Name and description pair for display
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ScenarioOption {
    pub name: String,
    pub description: String,
}

#[derive(Default)]
pub struct ScenarioRegistry {
    scenarios: Vec<Arc<dyn Scenario>>,
    by_name: HashMap<String, usize>,
}

impl ScenarioRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in scenarios
    pub fn with_builtin(login_paths: Vec<String>) -> Self {
        let mut registry = Self::new();
        let builtin: [Arc<dyn Scenario>; 2] = [
            Arc::new(PageScan::new()),
            Arc::new(UserEnumeration::new(login_paths)),
        ];
        for scenario in builtin {
            if let Err(e) = registry.register(scenario) {
                log::error!("Failed to register built-in scenario: {}", e);
            }
        }
        registry
    }

    pub fn register(&mut self, scenario: Arc<dyn Scenario>) -> Result<(), RegistryError> {
        let spec = scenario.spec();
        let name = spec.name().to_string();

        if !is_valid_scenario_name(&name) {
            return Err(RegistryError::InvalidName(name));
        }
        if spec.leak_speed() <= 0 {
            return Err(RegistryError::InvalidLeakSpeed(name));
        }
        if self.by_name.contains_key(&name) {
            return Err(RegistryError::Duplicate(name));
        }

        log::debug!("Registered scenario {}", name);
        self.by_name.insert(name, self.scenarios.len());
        self.scenarios.push(scenario);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Scenario>> {
        self.by_name.get(name).map(|&i| Arc::clone(&self.scenarios[i]))
    }

    /// Scenarios in registration order
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Scenario>> {
        self.scenarios.iter()
    }

    pub fn len(&self) -> usize {
        self.scenarios.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scenarios.is_empty()
    }

    /// Display options sorted case-insensitively by description
    pub fn options(&self) -> Vec<ScenarioOption> {
        let mut options: Vec<ScenarioOption> = self
            .scenarios
            .iter()
            .map(|s| ScenarioOption {
                name: s.spec().name().to_string(),
                description: s.spec().description().to_string(),
            })
            .collect();
        options.sort_by_key(|o| o.description.to_lowercase());
        options
    }
}
