//! Stack orchestration module.
//!
//! Deploys, stops and removes multi-container stacks across the hosts in a
//! connection pool.

mod dispatch;
pub mod stack;

pub use stack::{OrchestratorSettings, StackOrchestrator};
