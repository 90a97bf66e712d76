// crates/skillcore/src/events/mod.rs

mod base;
mod notify;

pub use base::{EventBus, EventEmitter, ExecutionEvent, SkillEvent};
pub use notify::{ChannelNotifier, DomainEvent, NoopNotifier, Notifier};
