//! Built-in skill library
//!
//! Generic skills for demos, tests and glue steps. Provider integrations
//! (generative models, messaging, payments, media pipelines) live outside
//! this crate.

mod debug;
mod http;
mod time;
mod transform;

pub use debug::EchoSkill;
pub use http::HttpRequestSkill;
pub use time::DelaySkill;
pub use transform::{JsonParseSkill, JsonStringifySkill};

use skillcore::RegistryError;
use skillruntime::SkillRegistry;

/// Register every built-in skill.
///
/// Built-ins share one handler per process, so registering them again into
/// the same registry is a no-op rather than a conflict.
pub fn register_all(registry: &mut SkillRegistry) -> Result<(), RegistryError> {
    registry.register(debug::descriptor())?;
    registry.register(http::descriptor())?;
    registry.register(transform::json_parse_descriptor())?;
    registry.register(transform::json_stringify_descriptor())?;
    registry.register(time::descriptor())?;
    Ok(())
}
