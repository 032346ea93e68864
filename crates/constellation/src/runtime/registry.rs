//! Service definitions and the registry that holds them

use indexmap::IndexMap;
use regex::Regex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

/// Immutable description of one service
#[derive(Debug, Clone)]
pub struct ServiceDefinition {
    /// Unique service name
    pub name: String,
    /// Executable path or name looked up in PATH
    pub executable: String,
    /// Command line arguments
    pub arguments: Vec<String>,
    /// Pattern matched against output lines to detect readiness
    pub readiness_pattern: Option<Regex>,
    /// Names of services that must be ready before this one launches
    pub dependencies: Vec<String>,
    /// Extra environment variables for the process
    pub env: HashMap<String, String>,
    /// Working directory for the process
    pub working_dir: Option<PathBuf>,
}

impl ServiceDefinition {
    /// Build a definition, checking the name, executable and readiness pattern
    pub fn new(
        name: impl Into<String>,
        executable: impl Into<String>,
        arguments: Vec<String>,
        readiness_pattern: Option<&str>,
        dependencies: Vec<String>,
    ) -> Result<Self, RegistryError> {
        let name = name.into();
        let executable = executable.into();

        if name.is_empty() {
            return Err(RegistryError::InvalidDefinition {
                name,
                reason: "name should not be empty".to_string(),
            });
        }
        if executable.is_empty() {
            return Err(RegistryError::InvalidDefinition {
                name,
                reason: "executable should not be empty".to_string(),
            });
        }

        let readiness_pattern = match readiness_pattern {
            Some(pattern) => Some(Regex::new(pattern).map_err(|e| {
                RegistryError::InvalidDefinition {
                    name: name.clone(),
                    reason: format!("failed to compile readiness pattern: {}", e),
                }
            })?),
            None => None,
        };

        Ok(Self {
            name,
            executable,
            arguments,
            readiness_pattern,
            dependencies,
            env: HashMap::new(),
            working_dir: None,
        })
    }

    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }

    pub fn with_working_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.working_dir = dir;
        self
    }

    /// Whether `line` satisfies the readiness pattern. Always false without a pattern.
    pub fn is_ready_line(&self, line: &str) -> bool {
        self.readiness_pattern
            .as_ref()
            .is_some_and(|pattern| pattern.is_match(line))
    }
}

/// Registry of service definitions, in registration order.
///
/// Definitions are reference counted so supervisors can share them without copying.
#[derive(Debug, Clone, Default)]
pub struct ServiceRegistry {
    services: IndexMap<String, Arc<ServiceDefinition>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a service.
    ///
    /// Registering a name twice replaces the earlier definition. Dependencies
    /// are not resolved here: they may name services registered later.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        executable: impl Into<String>,
        arguments: Vec<String>,
        readiness_pattern: Option<&str>,
        dependencies: Vec<String>,
    ) -> Result<&ServiceDefinition, RegistryError> {
        let definition =
            ServiceDefinition::new(name, executable, arguments, readiness_pattern, dependencies)?;
        Ok(self.insert(definition))
    }

    /// Insert an already built definition (last write wins)
    pub fn insert(&mut self, definition: ServiceDefinition) -> &ServiceDefinition {
        let name = definition.name.clone();
        if self.services.contains_key(&name) {
            log::warn!("[{}] Service registered twice, replacing definition", name);
        }
        let (index, _) = self.services.insert_full(name, Arc::new(definition));
        &self.services[index]
    }

    pub fn get(&self, name: &str) -> Option<&ServiceDefinition> {
        self.services.get(name).map(Arc::as_ref)
    }

    /// Shared handle to a definition
    pub fn shared(&self, name: &str) -> Option<Arc<ServiceDefinition>> {
        self.services.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.services.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// Service names in registration order
    pub fn names(&self) -> Vec<String> {
        self.services.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ServiceDefinition> {
        self.services.values().map(Arc::as_ref)
    }
}

/// Errors raised while registering services
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Invalid definition for service '{name}': {reason}")]
    InvalidDefinition { name: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_lookup() {
        let mut registry = ServiceRegistry::new();
        registry
            .register("db", "postgres", vec!["-D".into(), "data".into()], None, vec![])
            .unwrap();
        let db = registry.get("db").unwrap();
        assert_eq!(db.executable, "postgres");
        assert_eq!(db.arguments, vec!["-D", "data"]);
        assert!(db.readiness_pattern.is_none());
    }

    #[test]
    fn test_empty_name_rejected() {
        let mut registry = ServiceRegistry::new();
        let result = registry.register("", "bin/a", vec![], None, vec![]);
        assert!(matches!(result, Err(RegistryError::InvalidDefinition { .. })));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_empty_executable_rejected() {
        let mut registry = ServiceRegistry::new();
        let result = registry.register("a", "", vec![], None, vec![]);
        assert!(matches!(result, Err(RegistryError::InvalidDefinition { .. })));
    }

    #[test]
    fn test_bad_pattern_rejected() {
        let mut registry = ServiceRegistry::new();
        let result = registry.register("a", "bin/a", vec![], Some("listening (on"), vec![]);
        assert!(matches!(result, Err(RegistryError::InvalidDefinition { .. })));
    }

    #[test]
    fn test_duplicate_registration_last_wins() {
        let mut registry = ServiceRegistry::new();
        registry.register("a", "bin/first", vec![], None, vec![]).unwrap();
        registry.register("b", "bin/b", vec![], None, vec![]).unwrap();
        registry.register("a", "bin/second", vec![], None, vec![]).unwrap();

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get("a").unwrap().executable, "bin/second");
        assert_eq!(registry.names(), vec!["a", "b"]);
    }

    #[test]
    fn test_dependencies_not_checked_at_registration() {
        let mut registry = ServiceRegistry::new();
        let result = registry.register("api", "bin/api", vec![], None, vec!["db".into()]);
        assert!(result.is_ok());
    }

    #[test]
    fn test_ready_line_matching() {
        let with_pattern =
            ServiceDefinition::new("api", "bin/api", vec![], Some("listening on"), vec![]).unwrap();
        assert!(with_pattern.is_ready_line("server listening on :8080"));
        assert!(!with_pattern.is_ready_line("starting up"));

        let without_pattern = ServiceDefinition::new("db", "bin/db", vec![], None, vec![]).unwrap();
        assert!(!without_pattern.is_ready_line("listening on"));
    }
}
