pub mod agents;
pub mod orchestrator;

pub use orchestrator::{Orchestrator, OrchestratorResult};
