//! Dependency-graph migration engine.
//!
//! Tasks with declared dependencies are collected into a [`MigrationGraph`],
//! leveled by the scheduler, and applied or rolled back by the
//! [`ExecutionEngine`] against an append-only history.

pub mod config;
pub mod diagnostics;
pub mod engine;
pub mod environment;
pub mod errors;
pub mod graph;
pub mod lint;
pub mod listener;
pub mod node;
pub mod plugins;
pub mod render;
pub mod rollback;
pub mod scheduler;
pub mod status;
pub mod task;

pub use config::*;
pub use diagnostics::*;
pub use engine::*;
pub use environment::*;
pub use errors::*;
pub use graph::*;
pub use lint::*;
pub use listener::*;
pub use node::{MigrationNode, MigrationNodeBuilder};
pub use plugins::*;
pub use render::*;
pub use rollback::plan_rollback;
pub use scheduler::*;
pub use status::*;
pub use task::*;
