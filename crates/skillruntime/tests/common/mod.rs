#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{json, Value};
use skillcore::{Skill, SkillContext, SkillDescriptor, SkillError, SkillOutput};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("debug")
        .try_init();
}

/// Returns scripted results in order, repeating the last one.
pub struct Scripted {
    script: Mutex<VecDeque<Result<Value, SkillError>>>,
    pub calls: AtomicUsize,
}

impl Scripted {
    pub fn new(script: Vec<Result<Value, SkillError>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn ok(value: Value) -> Arc<Self> {
        Self::new(vec![Ok(value)])
    }

    pub fn failing(err: SkillError) -> Arc<Self> {
        Self::new(vec![Err(err)])
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Skill for Scripted {
    async fn invoke(&self, _input: Value, _ctx: SkillContext) -> Result<SkillOutput, SkillError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut script = self.script.lock().unwrap();
        let next = if script.len() > 1 {
            script.pop_front()
        } else {
            script.front().cloned()
        };
        next.unwrap_or(Ok(Value::Null)).map(SkillOutput::from)
    }
}

/// Echoes its input back, counting calls.
#[derive(Default)]
pub struct Echo {
    pub calls: AtomicUsize,
    pub inputs: Mutex<Vec<Value>>,
}

impl Echo {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Skill for Echo {
    async fn invoke(&self, input: Value, _ctx: SkillContext) -> Result<SkillOutput, SkillError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inputs.lock().unwrap().push(input.clone());
        Ok(SkillOutput::new(json!({ "echo": input })))
    }
}

/// Sleeps, then returns `{"slept_ms": ..}`.
///
/// With `honor_cancel` the sleep stops as soon as the attempt is cancelled.
pub struct Sleeper {
    pub delay: Duration,
    pub honor_cancel: bool,
    pub started: AtomicUsize,
    pub finished: AtomicUsize,
    pub running: AtomicUsize,
    pub peak: AtomicUsize,
}

impl Sleeper {
    pub fn new(delay: Duration, honor_cancel: bool) -> Arc<Self> {
        Arc::new(Self {
            delay,
            honor_cancel,
            started: AtomicUsize::new(0),
            finished: AtomicUsize::new(0),
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        })
    }

    pub fn finished(&self) -> usize {
        self.finished.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Skill for Sleeper {
    async fn invoke(&self, _input: Value, ctx: SkillContext) -> Result<SkillOutput, SkillError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        let result = if self.honor_cancel {
            ctx.until_cancelled(tokio::time::sleep(self.delay)).await
        } else {
            tokio::time::sleep(self.delay).await;
            Ok(())
        };

        self.running.fetch_sub(1, Ordering::SeqCst);
        result?;
        self.finished.fetch_add(1, Ordering::SeqCst);
        Ok(SkillOutput::new(json!({ "slept_ms": self.delay.as_millis() as u64 })))
    }
}

pub struct Panicker;

#[async_trait]
impl Skill for Panicker {
    async fn invoke(&self, _input: Value, _ctx: SkillContext) -> Result<SkillOutput, SkillError> {
        panic!("handler bug")
    }
}

pub fn descriptor(id: &str, handler: Arc<dyn Skill>) -> SkillDescriptor {
    SkillDescriptor::new(id, handler).with_retry(skillcore::RetryPolicy {
        max_retries: 0,
        backoff: skillcore::Backoff::fixed(100),
    })
}
