//! Circuit table keyed by dependency name.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;

use super::circuit_breaker::{CircuitBreaker, CircuitConfig, CircuitSnapshot, Transition};
use crate::clock::Clock;

/// Creates circuits on demand and evaluates them in bulk.
pub struct CircuitRegistry {
    circuits: DashMap<String, Arc<CircuitBreaker>>,
    default_config: CircuitConfig,
    overrides: HashMap<String, CircuitConfig>,
    clock: Arc<dyn Clock>,
}

impl CircuitRegistry {
    pub fn new(
        default_config: CircuitConfig,
        overrides: HashMap<String, CircuitConfig>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            circuits: DashMap::new(),
            default_config,
            overrides,
            clock,
        }
    }

    /// Circuit for `name`, created with its override or the default config.
    pub fn get_or_create(&self, name: &str) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.circuits.get(name) {
            return Arc::clone(existing.value());
        }
        let config = self
            .overrides
            .get(name)
            .cloned()
            .unwrap_or_else(|| self.default_config.clone());
        let entry = self.circuits.entry(name.to_string()).or_insert_with(|| {
            Arc::new(CircuitBreaker::new(name, config, Arc::clone(&self.clock)))
        });
        Arc::clone(entry.value())
    }

    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.circuits.get(name).map(|c| Arc::clone(c.value()))
    }

    pub fn len(&self) -> usize {
        self.circuits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.circuits.is_empty()
    }

    /// Run the timeout check on every circuit.
    pub fn evaluate_all(&self) -> Vec<(String, Transition)> {
        // Collect first so no shard lock is held while a breaker logs
        let circuits: Vec<Arc<CircuitBreaker>> =
            self.circuits.iter().map(|c| Arc::clone(c.value())).collect();
        circuits
            .into_iter()
            .filter_map(|c| c.evaluate().map(|t| (c.name().to_string(), t)))
            .collect()
    }

    pub fn snapshot(&self) -> Vec<CircuitSnapshot> {
        let mut snapshots: Vec<CircuitSnapshot> =
            self.circuits.iter().map(|c| c.value().snapshot()).collect();
        snapshots.sort_by(|a, b| a.name.cmp(&b.name));
        snapshots
    }
}
