//! Runtime components: registry, dependency graph, supervisors and orchestrator

pub mod dependency;
pub mod orchestrator;
pub mod registry;
pub mod state;
pub mod supervisor;

pub use dependency::*;
pub use orchestrator::*;
pub use registry::*;
pub use state::*;
pub use supervisor::*;
