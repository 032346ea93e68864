//! Orchestrator - validates the constellation, spawns one supervisor per
//! service and fans their transitions into a single stream

use crate::runtime::dependency::{DependencyError, DependencyGraph};
use crate::runtime::registry::{RegistryError, ServiceDefinition, ServiceRegistry};
use crate::runtime::state::{ServiceState, StateChangeEvent};
use crate::runtime::supervisor::{
    DependencyPolicy, DependencyWatch, Readiness, Supervisor, SupervisorContext,
};
use indexmap::IndexMap;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Orchestrator configuration
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Grace period between SIGTERM and a forced kill on shutdown
    pub shutdown_timeout: Duration,
    /// Whether a `Finished` dependency releases its dependents
    pub dependency_policy: DependencyPolicy,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            shutdown_timeout: Duration::from_secs(5),
            dependency_policy: DependencyPolicy::default(),
        }
    }
}

/// Ordered stream of every transition of every service.
///
/// Ends once all supervisors have finished.
#[derive(Debug)]
pub struct EventStream {
    rx: mpsc::UnboundedReceiver<StateChangeEvent>,
}

impl EventStream {
    /// Next event, or `None` once every supervisor is done
    pub async fn recv(&mut self) -> Option<StateChangeEvent> {
        self.rx.recv().await
    }

    /// Next event if one is already queued
    pub fn try_recv(&mut self) -> Option<StateChangeEvent> {
        self.rx.try_recv().ok()
    }
}

impl futures::Stream for EventStream {
    type Item = StateChangeEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// Owns the registry, the validated graph and the per-service supervisors
pub struct Orchestrator {
    config: OrchestratorConfig,
    registry: ServiceRegistry,
    graph: Option<DependencyGraph>,
    states: IndexMap<String, watch::Receiver<ServiceState>>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<(String, JoinHandle<ServiceState>)>,
}

impl Orchestrator {
    pub fn new(config: OrchestratorConfig) -> Self {
        Self::with_registry(ServiceRegistry::new(), config)
    }

    /// Create an orchestrator over an already populated registry
    pub fn with_registry(registry: ServiceRegistry, config: OrchestratorConfig) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            config,
            registry,
            graph: None,
            states: IndexMap::new(),
            shutdown_tx,
            tasks: Vec::new(),
        }
    }

    /// Register a service. Not allowed once `initialize` has run.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        executable: impl Into<String>,
        arguments: Vec<String>,
        readiness_pattern: Option<&str>,
        dependencies: Vec<String>,
    ) -> Result<&ServiceDefinition, OrchestratorError> {
        if self.is_initialized() {
            return Err(OrchestratorError::AlreadyInitialized);
        }
        Ok(self
            .registry
            .register(name, executable, arguments, readiness_pattern, dependencies)?)
    }

    pub fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }

    pub fn is_initialized(&self) -> bool {
        self.graph.is_some()
    }

    /// Validate the dependency graph without launching anything
    pub fn validate(&self) -> Result<DependencyGraph, OrchestratorError> {
        if self.registry.is_empty() {
            return Err(OrchestratorError::EmptyConfiguration);
        }
        Ok(DependencyGraph::validate(&self.registry)?)
    }

    /// Validate the constellation and start every supervisor.
    ///
    /// Supervisors run concurrently; each blocks on its own dependencies.
    /// Returns the merged event stream and the service names in registration
    /// order. Must be called from within a tokio runtime.
    pub fn initialize(&mut self) -> Result<(EventStream, Vec<String>), OrchestratorError> {
        if self.is_initialized() {
            return Err(OrchestratorError::AlreadyInitialized);
        }
        let graph = self.validate()?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let ctx = SupervisorContext {
            events: events_tx,
            shutdown: self.shutdown_tx.subscribe(),
            policy: self.config.dependency_policy,
            shutdown_timeout: self.config.shutdown_timeout,
        };

        // Every latch exists before any supervisor runs
        let mut channels = IndexMap::new();
        for name in self.registry.names() {
            let (state_tx, state_rx) = watch::channel(ServiceState::Dead);
            let (readiness_tx, _) = watch::channel(Readiness::Pending);
            self.states.insert(name.clone(), state_rx);
            channels.insert(name, (state_tx, readiness_tx));
        }

        let dependencies: Vec<Vec<DependencyWatch>> = channels
            .keys()
            .map(|name| {
                graph
                    .dependencies(name)
                    .iter()
                    .filter_map(|dep| {
                        channels.get(dep).map(|(_, readiness)| DependencyWatch {
                            name: dep.clone(),
                            readiness: readiness.subscribe(),
                        })
                    })
                    .collect()
            })
            .collect();

        log::info!("Launching {} services...", channels.len());

        for ((name, (state_tx, readiness_tx)), dependencies) in channels.into_iter().zip(dependencies)
        {
            let Some(definition) = self.registry.shared(&name) else {
                continue;
            };
            let supervisor =
                Supervisor::new(definition, state_tx, readiness_tx, dependencies, ctx.clone());
            self.tasks.push((name, tokio::spawn(supervisor.run())));
        }

        self.graph = Some(graph);
        Ok((EventStream { rx: events_rx }, self.registry.names()))
    }

    /// Last known state of a service
    pub fn current_state(&self, name: &str) -> Result<ServiceState, OrchestratorError> {
        if let Some(state) = self.states.get(name) {
            return Ok(*state.borrow());
        }
        if self.registry.contains(name) {
            return Ok(ServiceState::Dead);
        }
        Err(OrchestratorError::UnknownService(name.to_string()))
    }

    /// Current state of every service, in registration order
    pub fn states(&self) -> Vec<(String, ServiceState)> {
        self.registry
            .names()
            .into_iter()
            .map(|name| {
                let state = self.current_state(&name).unwrap_or_default();
                (name, state)
            })
            .collect()
    }

    /// The validated graph, once initialized
    pub fn graph(&self) -> Option<&DependencyGraph> {
        self.graph.as_ref()
    }

    /// Ask every supervisor to stop.
    ///
    /// Services still waiting on dependencies stay `Dead`; running processes
    /// get SIGTERM and are killed after the shutdown timeout.
    pub fn shutdown(&self) {
        log::info!("Shutting down all services...");
        self.shutdown_tx.send_replace(true);
    }

    /// Wait for every supervisor to finish
    pub async fn wait(&mut self) {
        for (name, task) in self.tasks.drain(..) {
            match task.await {
                Ok(state) => log::debug!("[{}] Supervisor done in state {}", name, state),
                Err(e) => log::error!("[{}] Supervisor task failed: {}", name, e),
            }
        }
        log::info!("All services stopped");
    }

    /// Launch plan in dependency order (for dry-run mode)
    pub fn plan(&self) -> Result<LaunchPlan, OrchestratorError> {
        let graph = self.validate()?;
        let services = graph
            .launch_order()
            .filter_map(|name| self.registry.get(name))
            .map(|service| LaunchPlanService {
                name: service.name.clone(),
                executable: service.executable.clone(),
                arguments: service.arguments.clone(),
                readiness_pattern: service
                    .readiness_pattern
                    .as_ref()
                    .map(|p| p.as_str().to_string()),
                dependencies: service.dependencies.clone(),
                working_dir: service
                    .working_dir
                    .as_ref()
                    .map(|d| d.display().to_string()),
            })
            .collect();
        Ok(LaunchPlan { services })
    }
}

/// Launch plan for dry-run mode
#[derive(Debug)]
pub struct LaunchPlan {
    /// Services in a dependency-respecting order
    pub services: Vec<LaunchPlanService>,
}

/// A service in the launch plan
#[derive(Debug)]
pub struct LaunchPlanService {
    pub name: String,
    pub executable: String,
    pub arguments: Vec<String>,
    pub readiness_pattern: Option<String>,
    pub dependencies: Vec<String>,
    pub working_dir: Option<String>,
}

/// Errors that stop the orchestrator from starting
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("No services configured")]
    EmptyConfiguration,

    #[error("Dependency error: {0}")]
    Dependency(#[from] DependencyError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("Unknown service: {0}")]
    UnknownService(String),

    #[error("Orchestrator is already initialized")]
    AlreadyInitialized,
}

impl std::fmt::Display for LaunchPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Launch Plan")?;
        writeln!(f, "===========")?;
        writeln!(f)?;
        writeln!(f, "Services (in launch order):")?;

        for (i, service) in self.services.iter().enumerate() {
            writeln!(f)?;
            writeln!(f, "  {}. {}", i + 1, service.name)?;
            writeln!(
                f,
                "     Command: {} {}",
                service.executable,
                service.arguments.join(" ")
            )?;

            if !service.dependencies.is_empty() {
                writeln!(f, "     Requires: {}", service.dependencies.join(", "))?;
            }

            match &service.readiness_pattern {
                Some(pattern) => writeln!(f, "     Ready when output matches: {}", pattern)?,
                None => writeln!(f, "     Ready when launched")?,
            }

            if let Some(dir) = &service.working_dir {
                writeln!(f, "     Working directory: {}", dir)?;
            }
        }

        Ok(())
    }
}
