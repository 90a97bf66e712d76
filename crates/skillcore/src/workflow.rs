use crate::mapper::InputMapper;
use serde::{Deserialize, Serialize};

/// Declarative composition of skills into sequential and parallel steps.
///
/// Built and validated by the composer; the runner only ever sees validated
/// definitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Event name that starts a run of this workflow.
    pub trigger: String,
    pub steps: Vec<StepSpec>,
}

impl WorkflowDefinition {
    pub fn find_step(&self, key: &str) -> Option<&StepSpec> {
        self.steps.iter().find(|s| s.key == key)
    }

    pub fn position(&self, key: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.key == key)
    }

    /// Compile the step list into stages.
    ///
    /// Consecutive steps sharing a parallel group form one `Stage::Group`; the
    /// end of every group stage is its barrier.
    pub fn stages(&self) -> Vec<Stage<'_>> {
        let mut stages: Vec<Stage<'_>> = Vec::new();
        for (index, step) in self.steps.iter().enumerate() {
            match step.parallel_group.as_deref() {
                None => stages.push(Stage::Single { index, step }),
                Some(group) => {
                    let joins_last =
                        matches!(stages.last(), Some(Stage::Group { name, .. }) if *name == group);
                    if !joins_last {
                        stages.push(Stage::Group {
                            name: group,
                            steps: Vec::new(),
                        });
                    }
                    if let Some(Stage::Group { steps, .. }) = stages.last_mut() {
                        steps.push((index, step));
                    }
                }
            }
        }
        stages
    }

    /// Compact description of the stage plan: step keys in stage order, with
    /// parallel groups as `group(a,b)` and pause steps prefixed by `!`.
    ///
    /// Runs record it at creation and are only resumed against a definition
    /// with the same plan, since their cursor indexes stages.
    pub fn plan_signature(&self) -> String {
        self.stages()
            .iter()
            .map(|stage| match stage {
                Stage::Single { step, .. } => match &step.kind {
                    StepKind::Skill(_) => step.key.clone(),
                    StepKind::Pause(_) => format!("!{}", step.key),
                },
                Stage::Group { name, steps } => {
                    let keys: Vec<&str> = steps.iter().map(|(_, s)| s.key.as_str()).collect();
                    format!("{}({})", name, keys.join(","))
                }
            })
            .collect::<Vec<_>>()
            .join(";")
    }

    /// Stage number of every step, by step index.
    pub fn stage_of_steps(&self) -> Vec<usize> {
        let mut out = vec![0; self.steps.len()];
        for (stage_idx, stage) in self.stages().iter().enumerate() {
            for (index, _) in stage.steps() {
                out[index] = stage_idx;
            }
        }
        out
    }
}

/// One step of a workflow definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepSpec {
    /// Context key the step's output is stored under.
    pub key: String,
    #[serde(default = "default_required")]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallel_group: Option<String>,
    #[serde(flatten)]
    pub kind: StepKind,
}

fn default_required() -> bool {
    true
}

impl StepSpec {
    pub fn skill_id(&self) -> Option<&str> {
        match &self.kind {
            StepKind::Skill(step) => Some(&step.skill_id),
            StepKind::Pause(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepKind {
    /// Invoke a registered skill.
    Skill(SkillStep),
    /// Stop the run in `Paused` until it is resumed.
    Pause(PauseStep),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillStep {
    pub skill_id: String,
    #[serde(default)]
    pub input: InputMapper,
    /// Overrides the skill's default timeout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Overrides the skill's default retry count.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PauseStep {
    pub message: String,
}

/// A unit of the compiled execution plan.
#[derive(Debug, Clone, PartialEq)]
pub enum Stage<'a> {
    Single {
        index: usize,
        step: &'a StepSpec,
    },
    Group {
        name: &'a str,
        steps: Vec<(usize, &'a StepSpec)>,
    },
}

impl<'a> Stage<'a> {
    pub fn steps(&self) -> Vec<(usize, &'a StepSpec)> {
        match self {
            Stage::Single { index, step } => vec![(*index, *step)],
            Stage::Group { steps, .. } => steps.clone(),
        }
    }

    pub fn group(&self) -> Option<&'a str> {
        match self {
            Stage::Single { .. } => None,
            Stage::Group { name, .. } => Some(*name),
        }
    }
}
