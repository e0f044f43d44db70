//! Component dependency graph.

use std::collections::{BTreeSet, HashMap, VecDeque};

use crate::fault::ImpactScope;

/// Directed "calls" graph: an edge `a -> b` means `a` depends on `b`.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    dependencies: HashMap<String, Vec<String>>,
    dependents: HashMap<String, Vec<String>>,
}

impl DependencyGraph {
    pub fn new(dependencies: HashMap<String, Vec<String>>) -> Self {
        let mut dependents: HashMap<String, Vec<String>> = HashMap::new();
        for (component, deps) in &dependencies {
            for dep in deps {
                dependents
                    .entry(dep.clone())
                    .or_default()
                    .push(component.clone());
            }
        }
        Self {
            dependencies,
            dependents,
        }
    }

    fn walk(edges: &HashMap<String, Vec<String>>, start: &str) -> Vec<String> {
        let mut seen = BTreeSet::new();
        let mut queue: VecDeque<&str> = VecDeque::from([start]);
        while let Some(current) = queue.pop_front() {
            for next in edges.get(current).into_iter().flatten() {
                if next != start && seen.insert(next.clone()) {
                    queue.push_back(next);
                }
            }
        }
        seen.into_iter().collect()
    }

    /// Everything `component` relies on, directly or not.
    pub fn upstream(&self, component: &str) -> Vec<String> {
        Self::walk(&self.dependencies, component)
    }

    /// Everything that relies on `component`, directly or not.
    pub fn downstream(&self, component: &str) -> Vec<String> {
        Self::walk(&self.dependents, component)
    }

    /// COMPONENT with no dependents, SERVICE with one or two, SYSTEM beyond.
    pub fn scope_for(dependent_count: usize) -> ImpactScope {
        match dependent_count {
            0 => ImpactScope::Component,
            1 | 2 => ImpactScope::Service,
            _ => ImpactScope::System,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph() -> DependencyGraph {
        let mut deps = HashMap::new();
        deps.insert(
            "api_server".to_string(),
            vec!["database".to_string(), "redis".to_string()],
        );
        deps.insert(
            "strategy_engine".to_string(),
            vec!["exchange_connector".to_string(), "api_server".to_string()],
        );
        deps.insert("database".to_string(), vec![]);
        DependencyGraph::new(deps)
    }

    #[test]
    fn test_transitive_walks() {
        let g = graph();
        assert_eq!(
            g.upstream("strategy_engine"),
            vec!["api_server", "database", "exchange_connector", "redis"]
        );
        assert_eq!(g.downstream("database"), vec!["api_server", "strategy_engine"]);
        assert!(g.downstream("strategy_engine").is_empty());
        assert!(g.upstream("unknown").is_empty());
    }

    #[test]
    fn test_cycles_terminate() {
        let mut deps = HashMap::new();
        deps.insert("a".to_string(), vec!["b".to_string()]);
        deps.insert("b".to_string(), vec!["a".to_string()]);
        let g = DependencyGraph::new(deps);
        assert_eq!(g.upstream("a"), vec!["b"]);
    }

    #[test]
    fn test_scope_buckets() {
        assert_eq!(DependencyGraph::scope_for(0), ImpactScope::Component);
        assert_eq!(DependencyGraph::scope_for(2), ImpactScope::Service);
        assert_eq!(DependencyGraph::scope_for(3), ImpactScope::System);
    }
}
