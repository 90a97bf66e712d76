use crate::record::ErrorKind;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FlowError {
    #[error("Skill error: {0}")]
    Skill(#[from] SkillError),

    #[error("Workflow error: {0}")]
    Workflow(#[from] WorkflowError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Run error: {0}")]
    Run(#[from] RunError),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Failure reported by a skill invocation.
///
/// The variant decides whether the executor may retry: only `Transient`
/// failures are retried unconditionally, `Timeout` only for idempotent skills.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SkillError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Transient failure: {0}")]
    Transient(String),

    #[error("Timed out after {ms}ms")]
    Timeout { ms: u64 },

    #[error("Fatal: {0}")]
    Fatal(String),

    #[error("Cancelled")]
    Cancelled,
}

impl SkillError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    pub fn fatal(msg: impl Into<String>) -> Self {
        Self::Fatal(msg.into())
    }

    pub fn missing_input(field: &str) -> Self {
        Self::Validation(format!("missing required input '{}'", field))
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            SkillError::Validation(_) => ErrorKind::Validation,
            SkillError::Transient(_) => ErrorKind::Transient,
            SkillError::Timeout { .. } => ErrorKind::Timeout,
            SkillError::Fatal(_) => ErrorKind::Fatal,
            SkillError::Cancelled => ErrorKind::Cancelled,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegistryError {
    #[error("Skill not found: {0}")]
    NotFound(String),

    #[error("Skill '{0}' is already registered with a different handler")]
    Conflict(String),

    #[error("Invalid skill descriptor '{id}': {reason}")]
    InvalidDescriptor { id: String, reason: String },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum WorkflowError {
    #[error("Workflow not found: {0}")]
    NotFound(String),

    #[error("Invalid workflow: {0}")]
    Invalid(String),

    #[error("Workflow '{0}' has no steps")]
    Empty(String),

    #[error("Duplicate step key: {0}")]
    DuplicateStep(String),

    #[error("Step key '{0}' is reserved")]
    ReservedKey(String),

    #[error("Step '{step}' references unknown skill '{skill_id}'")]
    UnknownSkill { step: String, skill_id: String },

    #[error("Step '{step}' references inactive skill '{skill_id}'")]
    InactiveSkill { step: String, skill_id: String },

    #[error("Parallel group '{0}' is not contiguous")]
    SplitGroup(String),

    #[error("Pause step '{step}' cannot run inside parallel group '{group}'")]
    PauseInGroup { step: String, group: String },

    #[error("Step '{step}' reads '{key}', produced by a sibling in parallel group '{group}'")]
    SameGroupDependency {
        step: String,
        key: String,
        group: String,
    },

    #[error("Step '{step}' reads '{key}', which is only produced by a later step")]
    ForwardReference { step: String, key: String },

    #[error("Step '{step}' reads unknown context key '{key}'")]
    UnknownReference { step: String, key: String },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RunError {
    #[error("Context key '{0}' has already been written")]
    KeyAlreadyWritten(String),

    #[error("Run {0} is terminal and cannot be modified")]
    Terminal(String),

    #[error("Invalid run transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Run {0} is already being driven")]
    AlreadyActive(String),

    #[error("Run {run_id} was started from '{actual}', not '{expected}'")]
    DefinitionMismatch {
        run_id: String,
        expected: String,
        actual: String,
    },
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Run not found: {0}")]
    RunNotFound(String),

    #[error("Run already exists: {0}")]
    Duplicate(String),

    #[error(transparent)]
    Run(#[from] RunError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
