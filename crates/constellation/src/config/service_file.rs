//! Service file YAML schema definitions

use crate::runtime::{RegistryError, ServiceDefinition, ServiceRegistry};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Root service file: a mapping from service name to its configuration.
///
/// Entries keep file order, which becomes registration (and display) order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServiceFile {
    pub services: IndexMap<String, Option<ServiceConfig>>,
}

/// Configuration of one service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Executable followed by its arguments
    #[serde(default)]
    pub command: Vec<String>,

    /// Services that must be running before this one starts
    #[serde(default)]
    pub requirements: Vec<String>,

    /// Regular expression marking the service as running once an output line matches.
    /// Without one the service counts as running as soon as it is launched.
    #[serde(default)]
    pub run_template: Option<String>,

    /// Environment variables specific to this service
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Working directory for the process
    #[serde(default)]
    pub working_dir: Option<String>,
}

impl ServiceConfig {
    /// Turn the configuration into a checked definition
    pub fn to_definition(&self, name: &str) -> Result<ServiceDefinition, ConfigError> {
        let Some((executable, arguments)) = self.command.split_first() else {
            return Err(ConfigError::EmptyCommand(name.to_string()));
        };

        let run_template = self.run_template.as_deref().filter(|t| !t.is_empty());

        let definition = ServiceDefinition::new(
            name,
            executable.clone(),
            arguments.to_vec(),
            run_template,
            self.requirements.clone(),
        )
        .map_err(|source| ConfigError::InvalidService {
            name: name.to_string(),
            source,
        })?;

        Ok(definition
            .with_env(self.env.clone())
            .with_working_dir(self.working_dir.as_ref().map(PathBuf::from)))
    }
}

impl ServiceFile {
    /// Load a service file from disk
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_string(),
            source: e,
        })?;
        Self::from_yaml(&content)
    }

    /// Parse a service file from a YAML string
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let service_file: ServiceFile = serde_yaml::from_str(content)?;
        Ok(service_file)
    }

    /// Build the registry, checking every service on the way
    pub fn to_registry(&self) -> Result<ServiceRegistry, ConfigError> {
        let mut registry = ServiceRegistry::new();

        for (name, config) in &self.services {
            let Some(config) = config else {
                return Err(ConfigError::EmptyService(name.clone()));
            };
            let definition = config.to_definition(name)?;
            registry.insert(definition);
        }

        Ok(registry)
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

/// Errors that can occur when loading a service file
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Service '{0}': config is empty")]
    EmptyService(String),

    #[error("Service '{0}': command should contain at least one element")]
    EmptyCommand(String),

    #[error("Failed to parse service config for '{name}': {source}")]
    InvalidService {
        name: String,
        #[source]
        source: RegistryError,
    },
}
