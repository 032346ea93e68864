//! Dependency graph validation and ordering

use crate::runtime::registry::ServiceRegistry;
use indexmap::IndexMap;
use std::collections::{HashMap, VecDeque};

/// Validated, acyclic dependency graph of a registry
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    /// Direct dependencies per service, in registration order
    dependencies: IndexMap<String, Vec<String>>,
    /// Services in topological order (dependencies first)
    order: Vec<String>,
}

impl DependencyGraph {
    /// Validate the registry and build its graph.
    ///
    /// Fails on the first dependency that names an unregistered service, then
    /// on the first cycle found (self-dependencies included).
    pub fn validate(registry: &ServiceRegistry) -> Result<Self, DependencyError> {
        let mut dependencies: IndexMap<String, Vec<String>> = IndexMap::new();

        for service in registry.iter() {
            for dep in &service.dependencies {
                if !registry.contains(dep) {
                    return Err(DependencyError::UnknownDependency {
                        service: service.name.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
            dependencies.insert(service.name.clone(), service.dependencies.clone());
        }

        if let Some(cycle) = find_cycle(&dependencies) {
            return Err(DependencyError::CyclicDependency(cycle));
        }

        let order = topological_order(&dependencies);
        Ok(Self {
            dependencies,
            order,
        })
    }

    /// Direct dependencies of a service
    pub fn dependencies(&self, name: &str) -> &[String] {
        self.dependencies
            .get(name)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Services that directly depend on `name`
    pub fn dependents(&self, name: &str) -> Vec<&str> {
        self.dependencies
            .iter()
            .filter(|(_, deps)| deps.iter().any(|dep| dep == name))
            .map(|(service, _)| service.as_str())
            .collect()
    }

    /// One launch order respecting every dependency edge. Services with no
    /// relation between them keep registration order.
    pub fn launch_order(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    InProgress,
    Done,
}

/// Depth-first search returning the first cycle as a closed path, e.g. `a -> b -> a`
fn find_cycle(dependencies: &IndexMap<String, Vec<String>>) -> Option<Vec<String>> {
    let mut marks: HashMap<&str, Mark> = HashMap::new();
    let mut path: Vec<&str> = Vec::new();

    for root in dependencies.keys() {
        if let Some(cycle) = visit(root, dependencies, &mut marks, &mut path) {
            return Some(cycle);
        }
    }
    None
}

fn visit<'a>(
    name: &'a str,
    dependencies: &'a IndexMap<String, Vec<String>>,
    marks: &mut HashMap<&'a str, Mark>,
    path: &mut Vec<&'a str>,
) -> Option<Vec<String>> {
    match marks.get(name) {
        Some(Mark::Done) => return None,
        Some(Mark::InProgress) => {
            let start = path.iter().position(|n| *n == name)?;
            let mut cycle: Vec<String> = path[start..].iter().map(|n| n.to_string()).collect();
            cycle.push(name.to_string());
            return Some(cycle);
        }
        None => {}
    }

    marks.insert(name, Mark::InProgress);
    path.push(name);

    if let Some(deps) = dependencies.get(name) {
        for dep in deps {
            if let Some(cycle) = visit(dep, dependencies, marks, path) {
                return Some(cycle);
            }
        }
    }

    path.pop();
    marks.insert(name, Mark::Done);
    None
}

/// Kahn's algorithm over an acyclic graph
fn topological_order(dependencies: &IndexMap<String, Vec<String>>) -> Vec<String> {
    let mut in_degree: HashMap<&str, usize> = HashMap::new();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();

    for (name, deps) in dependencies {
        in_degree.insert(name, deps.len());
        for dep in deps {
            dependents.entry(dep.as_str()).or_default().push(name);
        }
    }

    // Seed in registration order so unrelated services keep it
    let mut queue: VecDeque<&str> = dependencies
        .keys()
        .map(String::as_str)
        .filter(|name| in_degree.get(name) == Some(&0))
        .collect();

    let mut sorted = Vec::with_capacity(dependencies.len());

    while let Some(name) = queue.pop_front() {
        sorted.push(name.to_string());

        if let Some(deps) = dependents.get(name) {
            for dependent in deps {
                if let Some(degree) = in_degree.get_mut(dependent) {
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push_back(dependent);
                    }
                }
            }
        }
    }

    sorted
}

/// Errors that can occur when validating the dependency graph
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DependencyError {
    #[error("Service '{service}' depends on unknown service '{dependency}'")]
    UnknownDependency { service: String, dependency: String },

    #[error("Cyclic dependency detected: {}", .0.join(" -> "))]
    CyclicDependency(Vec<String>),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(services: &[(&str, &[&str])]) -> ServiceRegistry {
        let mut registry = ServiceRegistry::new();
        for (name, deps) in services {
            registry
                .register(
                    *name,
                    format!("bin/{}", name),
                    vec![],
                    None,
                    deps.iter().map(|d| d.to_string()).collect(),
                )
                .unwrap();
        }
        registry
    }

    #[test]
    fn test_simple_dependency_order() {
        let registry = registry(&[("c", &["b"]), ("b", &["a"]), ("a", &[])]);
        let graph = DependencyGraph::validate(&registry).unwrap();

        let order: Vec<_> = graph.launch_order().collect();
        assert_eq!(order, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_diamond_dependency() {
        let registry = registry(&[
            ("a", &[]),
            ("b", &["a"]),
            ("c", &["a"]),
            ("d", &["b", "c"]),
        ]);
        let graph = DependencyGraph::validate(&registry).unwrap();

        let order: Vec<_> = graph.launch_order().collect();
        assert_eq!(order, vec!["a", "b", "c", "d"]);
        assert_eq!(graph.dependents("a"), vec!["b", "c"]);
        assert_eq!(graph.dependencies("d"), ["b".to_string(), "c".to_string()]);
    }

    #[test]
    fn test_independent_services_keep_registration_order() {
        let registry = registry(&[("x", &[]), ("y", &[]), ("z", &[])]);
        let graph = DependencyGraph::validate(&registry).unwrap();

        let order: Vec<_> = graph.launch_order().collect();
        assert_eq!(order, vec!["x", "y", "z"]);
    }

    #[test]
    fn test_cyclic_dependency_detection() {
        let registry = registry(&[("a", &["c"]), ("b", &["a"]), ("c", &["b"])]);
        let result = DependencyGraph::validate(&registry);

        assert_eq!(
            result.unwrap_err(),
            DependencyError::CyclicDependency(vec![
                "a".to_string(),
                "c".to_string(),
                "b".to_string(),
                "a".to_string()
            ])
        );
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let registry = registry(&[("a", &["a"])]);
        let result = DependencyGraph::validate(&registry);

        assert_eq!(
            result.unwrap_err(),
            DependencyError::CyclicDependency(vec!["a".to_string(), "a".to_string()])
        );
    }

    #[test]
    fn test_cycle_reachable_from_acyclic_prefix() {
        let registry = registry(&[("root", &["x"]), ("x", &["y"]), ("y", &["x"])]);
        let result = DependencyGraph::validate(&registry);

        assert_eq!(
            result.unwrap_err(),
            DependencyError::CyclicDependency(vec![
                "x".to_string(),
                "y".to_string(),
                "x".to_string()
            ])
        );
    }

    #[test]
    fn test_unknown_dependency() {
        let registry = registry(&[("api", &["db"])]);
        let result = DependencyGraph::validate(&registry);

        assert_eq!(
            result.unwrap_err(),
            DependencyError::UnknownDependency {
                service: "api".to_string(),
                dependency: "db".to_string()
            }
        );
    }

    #[test]
    fn test_forward_references_resolve() {
        let registry = registry(&[("api", &["db"]), ("db", &[])]);
        let graph = DependencyGraph::validate(&registry).unwrap();

        let order: Vec<_> = graph.launch_order().collect();
        assert_eq!(order, vec!["db", "api"]);
    }

    #[test]
    fn test_error_messages() {
        let err = DependencyError::CyclicDependency(vec!["a".into(), "b".into(), "a".into()]);
        assert_eq!(err.to_string(), "Cyclic dependency detected: a -> b -> a");
    }
}
