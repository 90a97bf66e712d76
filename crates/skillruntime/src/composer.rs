//! Builds and validates workflow definitions.

use crate::registry::SkillRegistry;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use skillcore::{
    InputMapper, PauseStep, SkillStep, StepKind, StepSpec, WorkflowDefinition, WorkflowError,
    TRIGGER_KEY,
};
use std::collections::{HashMap, HashSet};

/// Options for a step added through [`WorkflowComposer::add_step`]
#[derive(Debug, Clone)]
pub struct StepOptions {
    /// Context key for the step's output. Defaults to the skill id with dots
    /// replaced by underscores, since keys head context paths.
    pub key: Option<String>,
    pub required: bool,
    pub parallel_group: Option<String>,
    pub input: InputMapper,
    pub timeout_ms: Option<u64>,
    pub max_retries: Option<u32>,
}

impl StepOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.parallel_group = Some(group.into());
        self
    }

    pub fn input(mut self, input: InputMapper) -> Self {
        self.input = input;
        self
    }

    pub fn timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }
}

impl Default for StepOptions {
    fn default() -> Self {
        Self {
            key: None,
            required: true,
            parallel_group: None,
            input: InputMapper::default(),
            timeout_ms: None,
            max_retries: None,
        }
    }
}

/// Fluent builder for [`WorkflowDefinition`]s.
///
/// ```ignore
/// let def = WorkflowComposer::new(&registry, "listing-media", "listing.created")
///     .add_step("listing.validate", StepOptions::new().input(InputMapper::Trigger))
///     .add_step("photo.enhance", StepOptions::new().group("media").optional())
///     .add_step("video.render", StepOptions::new().group("media").optional())
///     .add_step("notify.agent", StepOptions::new())
///     .build()?;
/// ```
pub struct WorkflowComposer<'a> {
    registry: &'a SkillRegistry,
    name: String,
    trigger: String,
    description: Option<String>,
    steps: Vec<StepSpec>,
}

impl<'a> WorkflowComposer<'a> {
    pub fn new(
        registry: &'a SkillRegistry,
        name: impl Into<String>,
        trigger: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            name: name.into(),
            trigger: trigger.into(),
            description: None,
            steps: Vec::new(),
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn add_step(mut self, skill_id: impl Into<String>, options: StepOptions) -> Self {
        let skill_id = skill_id.into();
        self.steps.push(StepSpec {
            key: options.key.unwrap_or_else(|| skill_id.replace('.', "_")),
            required: options.required,
            parallel_group: options.parallel_group,
            kind: StepKind::Skill(SkillStep {
                skill_id,
                input: options.input,
                timeout_ms: options.timeout_ms,
                max_retries: options.max_retries,
            }),
        });
        self
    }

    /// Add a step that pauses the run until it is resumed.
    pub fn add_pause(mut self, key: impl Into<String>, message: impl Into<String>) -> Self {
        self.steps.push(StepSpec {
            key: key.into(),
            required: true,
            parallel_group: None,
            kind: StepKind::Pause(PauseStep {
                message: message.into(),
            }),
        });
        self
    }

    pub fn build(self) -> Result<WorkflowDefinition, WorkflowError> {
        let definition = WorkflowDefinition {
            name: self.name,
            description: self.description,
            trigger: self.trigger,
            steps: self.steps,
        };
        validate_definition(&definition, self.registry)?;
        Ok(definition)
    }
}

/// Check a definition against the registry and the stage plan.
pub fn validate_definition(
    definition: &WorkflowDefinition,
    registry: &SkillRegistry,
) -> Result<(), WorkflowError> {
    if definition.name.trim().is_empty() {
        return Err(WorkflowError::Invalid("workflow name must not be empty".into()));
    }
    if definition.trigger.trim().is_empty() {
        return Err(WorkflowError::Invalid(format!(
            "workflow '{}' has no trigger",
            definition.name
        )));
    }
    if definition.steps.is_empty() {
        return Err(WorkflowError::Empty(definition.name.clone()));
    }

    let mut keys = HashSet::new();
    for step in &definition.steps {
        if step.key.trim().is_empty() {
            return Err(WorkflowError::Invalid("step key must not be empty".into()));
        }
        if step.key.contains('.') {
            return Err(WorkflowError::Invalid(format!(
                "step key '{}' must not contain '.'",
                step.key
            )));
        }
        if step.key == TRIGGER_KEY {
            return Err(WorkflowError::ReservedKey(step.key.clone()));
        }
        if !keys.insert(step.key.as_str()) {
            return Err(WorkflowError::DuplicateStep(step.key.clone()));
        }

        if let StepKind::Skill(skill) = &step.kind {
            let descriptor =
                registry
                    .resolve(&skill.skill_id)
                    .map_err(|_| WorkflowError::UnknownSkill {
                        step: step.key.clone(),
                        skill_id: skill.skill_id.clone(),
                    })?;
            if !descriptor.active {
                return Err(WorkflowError::InactiveSkill {
                    step: step.key.clone(),
                    skill_id: skill.skill_id.clone(),
                });
            }
            if skill.timeout_ms == Some(0) {
                return Err(WorkflowError::Invalid(format!(
                    "step '{}' has a zero timeout",
                    step.key
                )));
            }
        }
    }

    check_groups(definition)?;
    check_references(definition)?;
    Ok(())
}

fn check_groups(definition: &WorkflowDefinition) -> Result<(), WorkflowError> {
    let mut closed: HashSet<&str> = HashSet::new();
    let mut current: Option<&str> = None;

    for step in &definition.steps {
        let group = step.parallel_group.as_deref();
        if let (Some(group), StepKind::Pause(_)) = (group, &step.kind) {
            return Err(WorkflowError::PauseInGroup {
                step: step.key.clone(),
                group: group.to_string(),
            });
        }
        if group != current {
            if let Some(previous) = current {
                closed.insert(previous);
            }
            if let Some(group) = group {
                if closed.contains(group) {
                    return Err(WorkflowError::SplitGroup(group.to_string()));
                }
            }
            current = group;
        }
    }
    Ok(())
}

fn check_references(definition: &WorkflowDefinition) -> Result<(), WorkflowError> {
    let stage_of = definition.stage_of_steps();

    for (consumer, step) in definition.steps.iter().enumerate() {
        let StepKind::Skill(skill) = &step.kind else {
            continue;
        };
        for key in skill.input.reads() {
            if key == TRIGGER_KEY {
                continue;
            }
            let producer = definition
                .position(key)
                .ok_or_else(|| WorkflowError::UnknownReference {
                    step: step.key.clone(),
                    key: key.to_string(),
                })?;
            if stage_of[producer] < stage_of[consumer] {
                continue;
            }
            return Err(match (&step.parallel_group, stage_of[producer] == stage_of[consumer]) {
                (Some(group), true) if producer != consumer => WorkflowError::SameGroupDependency {
                    step: step.key.clone(),
                    key: key.to_string(),
                    group: group.clone(),
                },
                _ => WorkflowError::ForwardReference {
                    step: step.key.clone(),
                    key: key.to_string(),
                },
            });
        }
    }
    Ok(())
}

/// Data dependencies between the steps of a definition.
///
/// An edge `a -> b` means step `b` reads the output of step `a`. Steps that
/// read the whole context depend on every step of every earlier stage.
pub struct DependencyGraph {
    graph: DiGraph<String, ()>,
    index: HashMap<String, NodeIndex>,
}

impl DependencyGraph {
    pub fn build(definition: &WorkflowDefinition) -> Self {
        let mut graph = DiGraph::new();
        let mut index = HashMap::new();
        for step in &definition.steps {
            let idx = graph.add_node(step.key.clone());
            index.insert(step.key.clone(), idx);
        }

        let stage_of = definition.stage_of_steps();
        for (consumer, step) in definition.steps.iter().enumerate() {
            let to = index[&step.key];
            match &step.kind {
                StepKind::Skill(skill) if skill.input != InputMapper::Context => {
                    for key in skill.input.reads() {
                        if let Some(&from) = index.get(key) {
                            graph.add_edge(from, to, ());
                        }
                    }
                }
                // whole-context readers and pauses wait on everything before them
                _ => {
                    for (producer, earlier) in definition.steps.iter().enumerate() {
                        if stage_of[producer] < stage_of[consumer] {
                            graph.add_edge(index[&earlier.key], to, ());
                        }
                    }
                }
            }
        }

        Self { graph, index }
    }

    /// Keys of the steps `key` reads from, in declaration order.
    pub fn dependencies_of(&self, key: &str) -> Vec<&str> {
        let Some(&idx) = self.index.get(key) else {
            return Vec::new();
        };
        let mut deps: Vec<NodeIndex> = self
            .graph
            .neighbors_directed(idx, Direction::Incoming)
            .collect();
        deps.sort();
        deps.dedup();
        deps.into_iter().map(|i| self.graph[i].as_str()).collect()
    }

    /// A topological order of the steps.
    pub fn execution_order(&self) -> Result<Vec<&str>, WorkflowError> {
        toposort(&self.graph, None)
            .map(|order| order.into_iter().map(|i| self.graph[i].as_str()).collect())
            .map_err(|cycle| {
                WorkflowError::Invalid(format!(
                    "dependency cycle through step '{}'",
                    self.graph[cycle.node_id()]
                ))
            })
    }
}
