//! Flotilla Orchestrator
//!
//! Lifecycle management for stacks placed across many container hosts.

pub mod orchestrator;

pub use orchestrator::{OrchestratorSettings, StackOrchestrator};
