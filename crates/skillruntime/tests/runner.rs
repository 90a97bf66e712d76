mod common;

use common::*;
use serde_json::json;
use skillcore::{
    ChannelNotifier, DomainEvent, ErrorKind, ExecutionStatus, FlowError, InputMapper,
    NoopNotifier, RunError, RunStatus, RunUpdate, SkillError, StepState, TriggerSource,
    WorkflowRun,
};
use skillruntime::{
    ExecutionQuery, ExecutorConfig, MemoryStore, OptionalFailurePolicy, RunFilter, RunStore,
    RunnerConfig, RuntimeConfig, SkillRegistry, SkillRuntime, StepOptions,
};
use std::sync::Arc;
use std::time::Duration;

fn listing() -> serde_json::Value {
    json!({"listing_id": "L-42", "address": "12 Elm St"})
}

#[tokio::test(start_paused = true)]
async fn sequential_run_survives_transient_failures() {
    init_tracing();
    let validate = Echo::new();
    let enrich = Scripted::new(vec![
        Err(SkillError::transient("rate limited")),
        Err(SkillError::transient("rate limited")),
        Ok(json!({"summary": "3 bed craftsman"})),
    ]);
    let notify = Echo::new();

    let mut registry = SkillRegistry::new();
    registry.register(descriptor("listing.validate", validate.clone())).unwrap();
    registry
        .register(descriptor("listing.enrich", enrich.clone()).with_max_retries(3))
        .unwrap();
    registry.register(descriptor("notify.agent", notify.clone())).unwrap();
    let runtime = SkillRuntime::new(Arc::new(registry));

    let def = runtime
        .composer("listing-intake", "listing.created")
        .add_step(
            "listing.validate",
            StepOptions::new().key("validate").input(InputMapper::Trigger),
        )
        .add_step(
            "listing.enrich",
            StepOptions::new()
                .key("enrich")
                .input(InputMapper::fields().bind("listing", "validate.echo.listing_id")),
        )
        .add_step(
            "notify.agent",
            StepOptions::new()
                .key("notify")
                .input(InputMapper::fields().bind("summary", "enrich.summary")),
        )
        .build()
        .unwrap();
    runtime.register_workflow(def).await.unwrap();

    let runs = runtime
        .trigger("listing.created", TriggerSource::Webhook, listing())
        .await
        .unwrap();
    assert_eq!(runs.len(), 1);
    let run = &runs[0];

    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.context.get("enrich"), Some(&json!({"summary": "3 bed craftsman"})));
    assert_eq!(run.context.get("trigger"), Some(&listing()));
    assert_eq!(notify.inputs.lock().unwrap()[0], json!({"summary": "3 bed craftsman"}));

    let enrich_records = runtime
        .executions(&ExecutionQuery::default().correlation(run.id).skill("listing.enrich"))
        .await
        .unwrap();
    assert_eq!(enrich_records.len(), 3);
    assert_eq!(enrich_records[2].attempt, 3);
    assert_eq!(enrich_records[2].status, ExecutionStatus::Succeeded);
    assert_eq!(enrich_records[2].step_key.as_deref(), Some("enrich"));

    let all = runtime
        .executions(&ExecutionQuery::default().correlation(run.id))
        .await
        .unwrap();
    assert!(all.iter().all(|r| r.trigger_source == TriggerSource::Webhook));
    assert_eq!(run.executions.len(), 3);
}

#[tokio::test]
async fn optional_group_failure_does_not_fail_the_run() {
    let photos = Scripted::failing(SkillError::fatal("no photos uploaded"));
    let video = Echo::new();
    let mut registry = SkillRegistry::new();
    registry.register(descriptor("photo.enhance", photos.clone())).unwrap();
    registry.register(descriptor("video.render", video.clone())).unwrap();
    let runtime = SkillRuntime::new(Arc::new(registry));

    let def = runtime
        .composer("media", "listing.created")
        .add_step(
            "photo.enhance",
            StepOptions::new().key("photos").group("media").optional(),
        )
        .add_step(
            "video.render",
            StepOptions::new()
                .key("video")
                .group("media")
                .optional()
                .input(InputMapper::Trigger),
        )
        .build()
        .unwrap();
    runtime.register_workflow(def).await.unwrap();

    let run = runtime
        .run_workflow("media", TriggerSource::Manual, listing())
        .await
        .unwrap();

    assert_eq!(run.status, RunStatus::Completed);
    assert!(run.context.contains_key("video"));
    assert!(!run.context.contains_key("photos"));
    assert_eq!(run.steps.get("photos"), Some(&StepState::OptionalFailed));
    assert_eq!(run.steps.get("video"), Some(&StepState::Succeeded));
    assert!(run.error.is_none());

    let failed = runtime
        .executions(
            &ExecutionQuery::default()
                .skill("photo.enhance")
                .status(ExecutionStatus::Failed),
        )
        .await
        .unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].correlation_id, Some(run.id));
}

#[tokio::test(start_paused = true)]
async fn required_timeout_halts_the_run() {
    let render = Sleeper::new(Duration::from_secs(60), true);
    let notify = Echo::new();
    let mut registry = SkillRegistry::new();
    registry
        .register(descriptor("video.render", render.clone()).with_timeout(Duration::from_millis(5_000)))
        .unwrap();
    registry.register(descriptor("notify.agent", notify.clone())).unwrap();
    let runtime = SkillRuntime::new(Arc::new(registry));

    let def = runtime
        .composer("render", "listing.created")
        .add_step("video.render", StepOptions::new().key("video"))
        .add_step("notify.agent", StepOptions::new().key("notify"))
        .build()
        .unwrap();
    runtime.register_workflow(def).await.unwrap();

    let run = runtime
        .run_workflow("render", TriggerSource::Cron, listing())
        .await
        .unwrap();

    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(notify.calls(), 0);
    assert!(!run.context.contains_key("notify"));

    let error = run.error.as_ref().unwrap();
    assert_eq!(error.kind, ErrorKind::Timeout);
    assert_eq!(error.step_key, "video");
    assert_eq!(error.step_index, 0);
    assert_eq!(error.skill_id.as_deref(), Some("video.render"));
    assert_eq!(error.attempt, 1);

    let records = runtime
        .executions(&ExecutionQuery::default().correlation(run.id))
        .await
        .unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, ExecutionStatus::TimedOut);
}

#[tokio::test(start_paused = true)]
async fn late_results_never_reach_the_context() {
    let render = Sleeper::new(Duration::from_millis(5_500), false);
    let mut registry = SkillRegistry::new();
    registry
        .register(descriptor("video.render", render.clone()).with_timeout(Duration::from_secs(5)))
        .unwrap();
    let config = RuntimeConfig {
        executor: ExecutorConfig {
            cancel_grace_ms: 2_000,
            ..ExecutorConfig::default()
        },
        ..RuntimeConfig::default()
    };
    let runtime = SkillRuntime::with_config(Arc::new(registry), config);
    let def = runtime
        .composer("render", "t")
        .add_step("video.render", StepOptions::new().key("video").optional())
        .build()
        .unwrap();
    runtime.register_workflow(def).await.unwrap();

    let run = runtime
        .run_workflow("render", TriggerSource::Api, json!({}))
        .await
        .unwrap();

    assert_eq!(render.finished(), 1);
    assert_eq!(run.status, RunStatus::Completed);
    assert!(!run.context.contains_key("video"));
}

#[tokio::test(start_paused = true)]
async fn group_members_run_concurrently() {
    let slow = Sleeper::new(Duration::from_secs(1), true);
    let mut registry = SkillRegistry::new();
    registry.register(descriptor("a", slow.clone())).unwrap();
    registry.register(descriptor("b", slow.clone())).unwrap();
    registry.register(descriptor("c", slow.clone())).unwrap();
    let runtime = SkillRuntime::new(Arc::new(registry));
    let def = runtime
        .composer("fanout", "t")
        .add_step("a", StepOptions::new().group("g"))
        .add_step("b", StepOptions::new().group("g"))
        .add_step("c", StepOptions::new().group("g"))
        .build()
        .unwrap();
    runtime.register_workflow(def).await.unwrap();

    let started = tokio::time::Instant::now();
    let run = runtime
        .run_workflow("fanout", TriggerSource::Api, json!({}))
        .await
        .unwrap();

    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(slow.peak(), 3);
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(run.context.len(), 4);
}

#[tokio::test]
async fn pause_waits_for_approval() {
    let validate = Echo::new();
    let notify = Echo::new();
    let mut registry = SkillRegistry::new();
    registry.register(descriptor("listing.validate", validate.clone())).unwrap();
    registry.register(descriptor("notify.agent", notify.clone())).unwrap();
    let runtime = SkillRuntime::new(Arc::new(registry));
    let def = runtime
        .composer("approval", "listing.created")
        .add_step("listing.validate", StepOptions::new().key("validate"))
        .add_pause("approve", "Approve the shot list")
        .add_step(
            "notify.agent",
            StepOptions::new()
                .key("notify")
                .input(InputMapper::fields().bind("note", "approve.note")),
        )
        .build()
        .unwrap();
    runtime.register_workflow(def).await.unwrap();

    let paused = runtime
        .run_workflow("approval", TriggerSource::Manual, listing())
        .await
        .unwrap();
    assert_eq!(paused.status, RunStatus::Paused);
    assert_eq!(paused.cursor, 1);
    assert_eq!(notify.calls(), 0);

    let resumed = runtime
        .resume(paused.id, Some(json!({"note": "looks great"})))
        .await
        .unwrap();
    assert_eq!(resumed.id, paused.id);
    assert_eq!(resumed.status, RunStatus::Completed);
    assert_eq!(resumed.steps.get("approve"), Some(&StepState::Approved));
    assert_eq!(resumed.context.get("approve"), Some(&json!({"note": "looks great"})));
    assert_eq!(notify.inputs.lock().unwrap()[0], json!({"note": "looks great"}));
    assert_eq!(validate.calls(), 1);
}

#[tokio::test]
async fn resuming_a_completed_run_is_a_no_op() {
    let echo = Echo::new();
    let mut registry = SkillRegistry::new();
    registry.register(descriptor("debug.echo", echo.clone())).unwrap();
    let runtime = SkillRuntime::new(Arc::new(registry));
    let def = runtime
        .composer("echo", "t")
        .add_step("debug.echo", StepOptions::new())
        .build()
        .unwrap();
    runtime.register_workflow(def).await.unwrap();

    let run = runtime
        .run_workflow("echo", TriggerSource::Api, json!({"x": 1}))
        .await
        .unwrap();
    let again = runtime.resume(run.id, None).await.unwrap();

    assert_eq!(again, run);
    assert_eq!(echo.calls(), 1);
    assert_eq!(runtime.list_runs(&RunFilter::default()).await.unwrap().len(), 1);
}

#[tokio::test]
async fn resuming_a_failed_run_starts_a_new_one() {
    let validate = Echo::new();
    let enrich = Scripted::new(vec![
        Err(SkillError::fatal("missing credentials")),
        Ok(json!({"summary": "ok"})),
    ]);
    let mut registry = SkillRegistry::new();
    registry.register(descriptor("listing.validate", validate.clone())).unwrap();
    registry.register(descriptor("listing.enrich", enrich.clone())).unwrap();
    let runtime = SkillRuntime::new(Arc::new(registry));
    let def = runtime
        .composer("intake", "t")
        .add_step("listing.validate", StepOptions::new().key("validate"))
        .add_step("listing.enrich", StepOptions::new().key("enrich"))
        .build()
        .unwrap();
    runtime.register_workflow(def).await.unwrap();

    let failed = runtime
        .run_workflow("intake", TriggerSource::Api, listing())
        .await
        .unwrap();
    assert_eq!(failed.status, RunStatus::Failed);
    assert_eq!(failed.steps.get("enrich"), Some(&StepState::Failed));
    assert!(failed.context.contains_key("validate"));

    let resumed = runtime.resume(failed.id, None).await.unwrap();
    assert_ne!(resumed.id, failed.id);
    assert_eq!(resumed.resumed_from, Some(failed.id));
    assert_eq!(resumed.status, RunStatus::Completed);
    assert_eq!(resumed.context.get("enrich"), Some(&json!({"summary": "ok"})));
    assert_eq!(validate.calls(), 1);
    assert_eq!(enrich.calls(), 2);

    // history is untouched
    let original = runtime.get_run(failed.id).await.unwrap();
    assert_eq!(original, failed);
}

async fn failing_intake() -> (SkillRuntime, Arc<Scripted>, Arc<Echo>) {
    let enrich = Scripted::new(vec![
        Err(SkillError::fatal("missing credentials")),
        Ok(json!({"summary": "ok"})),
    ]);
    let notify = Echo::new();
    let mut registry = SkillRegistry::new();
    registry.register(descriptor("listing.validate", Echo::new())).unwrap();
    registry.register(descriptor("listing.enrich", enrich.clone())).unwrap();
    registry.register(descriptor("notify.agent", notify.clone())).unwrap();
    let runtime = SkillRuntime::new(Arc::new(registry));
    let def = runtime
        .composer("intake", "t")
        .add_step("listing.validate", StepOptions::new().key("validate"))
        .add_step("listing.enrich", StepOptions::new().key("enrich"))
        .add_step("notify.agent", StepOptions::new().key("notify"))
        .build()
        .unwrap();
    runtime.register_workflow(def).await.unwrap();
    (runtime, enrich, notify)
}

#[tokio::test]
async fn a_failed_run_is_continued_only_once() {
    let (runtime, enrich, notify) = failing_intake().await;
    let failed = runtime
        .run_workflow("intake", TriggerSource::Api, listing())
        .await
        .unwrap();
    assert_eq!(failed.status, RunStatus::Failed);

    let first = runtime.resume(failed.id, None).await.unwrap();
    let second = runtime.resume(failed.id, None).await.unwrap();

    assert_eq!(first.status, RunStatus::Completed);
    assert_eq!(second.id, first.id);
    assert_eq!(second.status, RunStatus::Completed);
    assert_eq!(enrich.calls(), 2);
    assert_eq!(notify.calls(), 1);
    assert_eq!(runtime.list_runs(&RunFilter::default()).await.unwrap().len(), 2);
}

#[tokio::test]
async fn concurrent_resumes_share_one_continuation() {
    let (runtime, _enrich, notify) = failing_intake().await;
    let failed = runtime
        .run_workflow("intake", TriggerSource::Api, listing())
        .await
        .unwrap();

    let (a, b) = tokio::join!(
        runtime.resume(failed.id, None),
        runtime.resume(failed.id, None)
    );

    let mut ids = Vec::new();
    for result in [a, b] {
        match result {
            Ok(run) => ids.push(run.id),
            Err(FlowError::Run(RunError::AlreadyActive(_))) => {}
            Err(e) => panic!("unexpected error {}", e),
        }
    }
    assert!(!ids.is_empty());
    assert!(ids.iter().all(|id| *id == ids[0]));
    assert_ne!(ids[0], failed.id);
    assert_eq!(notify.calls(), 1);

    let continued = runtime
        .list_runs(&RunFilter::default().resumed_from(failed.id))
        .await
        .unwrap();
    assert_eq!(continued.len(), 1);
    assert_eq!(continued[0].status, RunStatus::Completed);
}

#[tokio::test]
async fn resuming_against_a_changed_plan_is_refused() {
    let notify = Echo::new();
    let mut registry = SkillRegistry::new();
    registry.register(descriptor("listing.validate", Echo::new())).unwrap();
    registry.register(descriptor("listing.enrich", Echo::new())).unwrap();
    registry.register(descriptor("notify.agent", notify.clone())).unwrap();
    let runtime = SkillRuntime::new(Arc::new(registry));
    let def = runtime
        .composer("intake", "t")
        .add_step("listing.validate", StepOptions::new().key("validate"))
        .add_pause("review", "Check the listing")
        .add_step("notify.agent", StepOptions::new().key("notify"))
        .build()
        .unwrap();
    runtime.register_workflow(def).await.unwrap();

    let paused = runtime
        .run_workflow("intake", TriggerSource::Api, listing())
        .await
        .unwrap();
    assert_eq!(paused.status, RunStatus::Paused);

    // redeployed with an extra step ahead of the pause
    let edited = runtime
        .composer("intake", "t")
        .add_step("listing.validate", StepOptions::new().key("validate"))
        .add_step("listing.enrich", StepOptions::new().key("enrich"))
        .add_pause("review", "Check the listing")
        .add_step("notify.agent", StepOptions::new().key("notify"))
        .build()
        .unwrap();
    runtime.register_workflow(edited).await.unwrap();

    let err = runtime.resume(paused.id, Some(json!({"ok": true}))).await.unwrap_err();
    assert!(matches!(
        err,
        FlowError::Run(RunError::DefinitionMismatch { .. })
    ));
    assert_eq!(notify.calls(), 0);
    let run = runtime.get_run(paused.id).await.unwrap();
    assert_eq!(run.status, RunStatus::Paused);
    assert_eq!(run.plan, "validate;!review;notify");
}

#[tokio::test]
async fn recovery_never_replays_succeeded_steps() {
    let photos = Echo::new();
    let video = Echo::new();
    let notify = Echo::new();
    let mut registry = SkillRegistry::new();
    registry.register(descriptor("photo.enhance", photos.clone())).unwrap();
    registry.register(descriptor("video.render", video.clone())).unwrap();
    registry.register(descriptor("notify.agent", notify.clone())).unwrap();

    let store = Arc::new(MemoryStore::new());
    let runtime = SkillRuntime::with_store(
        Arc::new(registry),
        RuntimeConfig::default(),
        store.clone(),
        Arc::new(NoopNotifier),
    );
    let def = runtime
        .composer("media", "listing.created")
        .add_step("photo.enhance", StepOptions::new().key("photos").group("media"))
        .add_step("video.render", StepOptions::new().key("video").group("media"))
        .add_step("notify.agent", StepOptions::new().key("notify"))
        .build()
        .unwrap();
    let plan = def.plan_signature();
    runtime.register_workflow(def).await.unwrap();

    // a previous process died inside the media group after photos resolved
    let crashed = WorkflowRun::new("media", TriggerSource::Webhook, listing()).with_plan(plan);
    store.create_run(&crashed).await.unwrap();
    store
        .update_run(
            crashed.id,
            &RunUpdate::status(RunStatus::Running)
                .with_output("photos", json!({"enhanced": 12}))
                .with_step("photos", StepState::Succeeded),
        )
        .await
        .unwrap();

    let recovered = runtime.recover().await.unwrap();

    assert_eq!(recovered.len(), 1);
    let run = &recovered[0];
    assert_eq!(run.id, crashed.id);
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.context.get("photos"), Some(&json!({"enhanced": 12})));
    assert_eq!(photos.calls(), 0);
    assert_eq!(video.calls(), 1);
    assert_eq!(notify.calls(), 1);
    // a re-run group member sees what it would have seen first time round
    assert_eq!(video.inputs.lock().unwrap()[0], json!({"trigger": listing()}));
}

#[tokio::test]
async fn recovery_skips_runs_from_an_older_plan() {
    let notify = Echo::new();
    let mut registry = SkillRegistry::new();
    registry.register(descriptor("notify.agent", notify.clone())).unwrap();
    let store = Arc::new(MemoryStore::new());
    let runtime = SkillRuntime::with_store(
        Arc::new(registry),
        RuntimeConfig::default(),
        store.clone(),
        Arc::new(NoopNotifier),
    );
    let def = runtime
        .composer("media", "listing.created")
        .add_step("notify.agent", StepOptions::new().key("notify"))
        .build()
        .unwrap();
    runtime.register_workflow(def).await.unwrap();

    let stale = WorkflowRun::new("media", TriggerSource::Webhook, listing())
        .with_plan("photos;notify");
    store.create_run(&stale).await.unwrap();

    let recovered = runtime.recover().await.unwrap();
    assert!(recovered.is_empty());
    assert_eq!(notify.calls(), 0);
    assert_eq!(runtime.get_run(stale.id).await.unwrap().status, RunStatus::Pending);
}

#[tokio::test(start_paused = true)]
async fn cancelling_an_active_run_fails_it() {
    let render = Sleeper::new(Duration::from_secs(600), true);
    let notify = Echo::new();
    let mut registry = SkillRegistry::new();
    registry
        .register(descriptor("video.render", render.clone()).with_timeout(Duration::from_secs(900)))
        .unwrap();
    registry.register(descriptor("notify.agent", notify.clone())).unwrap();
    let runtime = SkillRuntime::new(Arc::new(registry));
    let def = runtime
        .composer("render", "t")
        .add_step("video.render", StepOptions::new().key("video"))
        .add_step("notify.agent", StepOptions::new().key("notify"))
        .build()
        .unwrap();
    runtime.register_workflow(def).await.unwrap();

    let cancel = async {
        tokio::time::sleep(Duration::from_secs(1)).await;
        let running = runtime
            .list_runs(&RunFilter::default().status(RunStatus::Running))
            .await
            .unwrap();
        runtime.cancel(running[0].id).await.unwrap()
    };
    let (run, cancelled) = tokio::join!(
        runtime.run_workflow("render", TriggerSource::Api, json!({})),
        cancel
    );
    let run = run.unwrap();

    assert!(cancelled);
    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.error.as_ref().unwrap().kind, ErrorKind::Cancelled);
    assert_eq!(render.finished(), 0);
    assert_eq!(notify.calls(), 0);
    assert!(!runtime.runner().is_active(run.id));
    assert!(!runtime.cancel(run.id).await.unwrap());
}

#[tokio::test]
async fn cancelling_a_paused_run_fails_it() {
    let mut registry = SkillRegistry::new();
    registry.register(descriptor("debug.echo", Echo::new())).unwrap();
    let runtime = SkillRuntime::new(Arc::new(registry));
    let def = runtime
        .composer("gate", "t")
        .add_pause("approve", "go?")
        .add_step("debug.echo", StepOptions::new())
        .build()
        .unwrap();
    runtime.register_workflow(def).await.unwrap();

    let paused = runtime
        .run_workflow("gate", TriggerSource::Manual, json!({}))
        .await
        .unwrap();
    assert!(runtime.cancel(paused.id).await.unwrap());

    let run = runtime.get_run(paused.id).await.unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    // terminal now: resuming starts a continuation instead
    let next = runtime.resume(paused.id, None).await.unwrap();
    assert_eq!(next.resumed_from, Some(paused.id));
}

#[tokio::test]
async fn escalation_policy_notifies_on_optional_failures() {
    let mut registry = SkillRegistry::new();
    registry
        .register(descriptor("photo.enhance", Scripted::failing(SkillError::validation("blurry"))))
        .unwrap();
    registry.register(descriptor("notify.agent", Echo::new())).unwrap();
    let (notifier, mut events) = ChannelNotifier::channel();
    let config = RuntimeConfig {
        runner: RunnerConfig {
            optional_failure_policy: OptionalFailurePolicy::Escalate,
        },
        ..RuntimeConfig::default()
    };
    let runtime = SkillRuntime::with_store(
        Arc::new(registry),
        config,
        Arc::new(MemoryStore::new()),
        Arc::new(notifier),
    );
    let def = runtime
        .composer("media", "t")
        .add_step("photo.enhance", StepOptions::new().key("photos").optional())
        .add_step("notify.agent", StepOptions::new().key("notify"))
        .build()
        .unwrap();
    runtime.register_workflow(def).await.unwrap();

    let run = runtime
        .run_workflow("media", TriggerSource::Api, json!({}))
        .await
        .unwrap();
    assert_eq!(run.status, RunStatus::Completed);

    match events.recv().await.unwrap() {
        DomainEvent::OptionalStepFailed { failure, .. } => {
            assert_eq!(failure.step_key, "photos");
            assert_eq!(failure.kind, ErrorKind::Validation);
        }
        other => panic!("unexpected {:?}", other),
    }
    match events.recv().await.unwrap() {
        DomainEvent::RunCompleted { run_id, output, .. } => {
            assert_eq!(run_id, run.id);
            assert!(output.get("notify").is_some());
            assert!(output.get("photos").is_none());
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[tokio::test]
async fn triggers_select_workflows_by_event() {
    let mut registry = SkillRegistry::new();
    registry.register(descriptor("debug.echo", Echo::new())).unwrap();
    let runtime = SkillRuntime::new(Arc::new(registry));
    for (name, trigger) in [("a", "listing.created"), ("b", "listing.created"), ("c", "booking.paid")] {
        let def = runtime
            .composer(name, trigger)
            .add_step("debug.echo", StepOptions::new())
            .build()
            .unwrap();
        runtime.register_workflow(def).await.unwrap();
    }

    let runs = runtime
        .trigger("listing.created", TriggerSource::Webhook, json!({}))
        .await
        .unwrap();
    let mut names: Vec<_> = runs.iter().map(|r| r.workflow.as_str()).collect();
    names.sort();
    assert_eq!(names, vec!["a", "b"]);
    assert!(runtime
        .trigger("nothing.listens", TriggerSource::Api, json!({}))
        .await
        .unwrap()
        .is_empty());

    let stats = runtime.workflow_stats(&RunFilter::default()).await.unwrap();
    assert_eq!(stats.len(), 2);
    assert!(stats.iter().all(|s| s.success_rate == 1.0));
    let skills = runtime.skill_stats(&ExecutionQuery::default()).await.unwrap();
    assert_eq!(skills[0].invocations, 2);
}
