use skillcore::{RegistryError, SkillDescriptor};
use std::collections::HashMap;

/// Filter for skill discovery listings
#[derive(Debug, Clone, Default)]
pub struct SkillFilter {
    pub category: Option<String>,
    pub active: Option<bool>,
}

impl SkillFilter {
    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn active(mut self, active: bool) -> Self {
        self.active = Some(active);
        self
    }

    fn matches(&self, descriptor: &SkillDescriptor) -> bool {
        self.category
            .as_deref()
            .map_or(true, |c| descriptor.category == c)
            && self.active.map_or(true, |a| descriptor.active == a)
    }
}

/// Registry of available skills.
///
/// Populated once at startup, then shared behind an `Arc` and only read.
pub struct SkillRegistry {
    skills: HashMap<String, SkillDescriptor>,
}

impl SkillRegistry {
    pub fn new() -> Self {
        Self {
            skills: HashMap::new(),
        }
    }

    /// Register a skill.
    ///
    /// Registering the same id again with the same handler is a no-op; a
    /// different handler under an existing id is a configuration error.
    pub fn register(&mut self, descriptor: SkillDescriptor) -> Result<(), RegistryError> {
        if descriptor.id.trim().is_empty() {
            return Err(RegistryError::InvalidDescriptor {
                id: descriptor.id,
                reason: "id must not be empty".to_string(),
            });
        }
        if descriptor.timeout.is_zero() {
            return Err(RegistryError::InvalidDescriptor {
                id: descriptor.id,
                reason: "timeout must be greater than zero".to_string(),
            });
        }
        if descriptor.concurrency_limit == Some(0) {
            return Err(RegistryError::InvalidDescriptor {
                id: descriptor.id,
                reason: "concurrency limit must be at least 1".to_string(),
            });
        }

        if let Some(existing) = self.skills.get(&descriptor.id) {
            if existing.same_handler(&descriptor) {
                tracing::debug!("Skill {} already registered, skipping", descriptor.id);
                return Ok(());
            }
            return Err(RegistryError::Conflict(descriptor.id));
        }

        tracing::info!("Registering skill: {}", descriptor.id);
        self.skills.insert(descriptor.id.clone(), descriptor);
        Ok(())
    }

    pub fn resolve(&self, id: &str) -> Result<&SkillDescriptor, RegistryError> {
        self.skills
            .get(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.skills.contains_key(id)
    }

    /// Descriptors matching `filter`, ordered by id
    pub fn list(&self, filter: &SkillFilter) -> Vec<&SkillDescriptor> {
        let mut skills: Vec<_> = self.skills.values().filter(|d| filter.matches(d)).collect();
        skills.sort_by(|a, b| a.id.cmp(&b.id));
        skills
    }

    pub fn len(&self) -> usize {
        self.skills.len()
    }

    pub fn is_empty(&self) -> bool {
        self.skills.is_empty()
    }
}

impl Default for SkillRegistry {
    fn default() -> Self {
        Self::new()
    }
}
