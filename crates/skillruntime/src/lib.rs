//! Skill orchestration runtime
//!
//! The registry of skills, the executor that runs one skill under its
//! timeout/retry/concurrency policy, the composer that builds workflow
//! definitions, the runner that drives workflow runs, and the stores that
//! persist runs and the execution log.

pub mod composer;
mod executor;
mod registry;
mod runner;
mod runtime;
pub mod stats;
pub mod store;

pub use composer::{validate_definition, DependencyGraph, StepOptions, WorkflowComposer};
pub use executor::{ExecuteOptions, ExecutorConfig, SkillExecutor};
pub use registry::{SkillFilter, SkillRegistry};
pub use runner::{OptionalFailurePolicy, RunnerConfig, WorkflowRunner};
pub use runtime::{RuntimeConfig, SkillRuntime};
pub use stats::{SkillStats, WorkflowStats};
pub use store::{ExecutionLog, ExecutionQuery, FileStore, MemoryStore, RunFilter, RunStore};
