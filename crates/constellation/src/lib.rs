//! Constellation
//!
//! Supervises a set of named, interdependent processes.
//!
//! # Overview
//!
//! Each service is declared once with its command line, an optional readiness
//! pattern and the services it requires. The orchestrator:
//! - Rejects unknown requirements and dependency cycles before launching anything
//! - Starts every service as soon as all of its requirements are running
//! - Marks a service running once an output line matches its readiness pattern
//! - Fails dependents of a failed service without launching them
//! - Publishes every state transition on a single ordered stream
//!
//! # Example Config
//!
//! ```yaml
//! db:
//!   command: ["postgres", "-D", "/var/lib/postgres"]
//!
//! api:
//!   command: ["./target/release/api", "--port", "8080"]
//!   requirements:
//!     - db
//!   run_template: "listening on"
//! ```

pub mod cli;
pub mod config;
pub mod display;
pub mod runtime;

pub use cli::SuperviseArgs;
pub use config::{ConfigError, ServiceConfig, ServiceFile};
pub use display::StatusBoard;
pub use runtime::{
    DependencyError, DependencyGraph, DependencyPolicy, EventStream, FailureReason, LaunchPlan,
    Orchestrator, OrchestratorConfig, OrchestratorError, RegistryError, ServiceDefinition,
    ServiceRegistry, ServiceState, StateChangeEvent,
};
