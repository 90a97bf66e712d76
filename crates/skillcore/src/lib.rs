//! Core abstractions for the skill orchestration engine
//!
//! Skills, their descriptors and execution records, workflow definitions and
//! runs. Everything that drives execution lives in `skillruntime`.

pub mod descriptor;
mod error;
pub mod events;
pub mod mapper;
pub mod record;
pub mod run;
mod skill;
pub mod workflow;

pub use descriptor::{Backoff, RetryPolicy, SkillDescriptor, SkillInfo, DEFAULT_TIMEOUT_MS};
pub use error::{FlowError, RegistryError, RunError, SkillError, StoreError, WorkflowError};
pub use events::*;
pub use mapper::{Binding, InputMapper};
pub use record::{ErrorInfo, ErrorKind, ExecutionId, ExecutionRecord, ExecutionStatus, TriggerSource};
pub use run::{
    RunContext, RunId, RunStatus, RunUpdate, StepFailure, StepState, WorkflowRun, TRIGGER_KEY,
};
pub use skill::{require_field, require_str, ResourceUsage, Skill, SkillContext, SkillOutput};
pub use workflow::{PauseStep, SkillStep, Stage, StepKind, StepSpec, WorkflowDefinition};

/// Result type for flow operations
pub type Result<T> = std::result::Result<T, FlowError>;
