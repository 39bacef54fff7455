//! Engine behaviour beyond the happy path: versioning, claiming, parallel
//! joins, terminate ends, history levels and deployment failures.

use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use flowlite_core::{
    EngineConfig, EngineError, HistoricActivityInstance, HistoryLevel, InstanceState,
    ManualClock, ProcessEngine, ProcessEngineBuilder, VariableValue, Variables, MAX_STEPS,
};

const HOLIDAY_REQUEST: &str = include_str!("models/holiday-request.bpmn20.xml");
const PARALLEL_REVIEW: &str = include_str!("models/parallel-review.bpmn20.xml");
const ESCALATION: &str = include_str!("models/escalation.bpmn20.xml");

const COUNTER_LOOP: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<definitions xmlns="http://www.omg.org/spec/BPMN/20100524/MODEL"
  xmlns:flowable="http://flowable.org/bpmn">
  <process id="counter" name="Counter">
    <startEvent id="start"/>
    <sequenceFlow id="toTick" sourceRef="start" targetRef="tick"/>
    <serviceTask id="tick" flowable:delegateExpression="${tick}"/>
    <sequenceFlow id="toCheck" sourceRef="tick" targetRef="check"/>
    <exclusiveGateway id="check" default="again"/>
    <sequenceFlow id="again" sourceRef="check" targetRef="tick"/>
    <sequenceFlow id="done" sourceRef="check" targetRef="end">
      <conditionExpression>${count &gt;= 3}</conditionExpression>
    </sequenceFlow>
    <endEvent id="end"/>
  </process>
</definitions>"#;

// ── Helpers ────────────────────────────────────────────────────

fn builder(config: EngineConfig) -> ProcessEngineBuilder {
    let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 7, 1, 9, 0, 0).unwrap());
    ProcessEngine::builder(config).with_clock(Arc::new(clock))
}

async fn deploy(engine: &ProcessEngine, name: &str, xml: &str) {
    engine
        .repository_service()
        .create_deployment()
        .add_string(name, xml)
        .deploy()
        .await
        .unwrap();
}

fn vars(pairs: &[(&str, VariableValue)]) -> Variables {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

// ── Repository ─────────────────────────────────────────────────

#[tokio::test]
async fn test_redeploy_bumps_version_and_start_uses_latest() {
    let engine = builder(EngineConfig::standalone_in_memory())
        .with_delegate_fn("CallExternalSystemDelegate", |_| Ok(()))
        .with_delegate_fn("SendRejectionMail", |_| Ok(()))
        .build()
        .await
        .unwrap();
    deploy(&engine, "holiday-request.bpmn20.xml", HOLIDAY_REQUEST).await;
    deploy(&engine, "holiday-request.bpmn20.xml", HOLIDAY_REQUEST).await;

    let repo = engine.repository_service();
    let versions: Vec<u32> = repo
        .create_process_definition_query()
        .process_definition_key("holidayRequest")
        .list()
        .await
        .unwrap()
        .into_iter()
        .map(|d| d.version)
        .collect();
    assert_eq!(versions, vec![1, 2]);

    let latest = repo
        .create_process_definition_query()
        .latest_version()
        .single_result()
        .await
        .unwrap()
        .unwrap();
    assert_eq!(latest.version, 2);
    assert!(latest.id.starts_with("holidayRequest:2:"));

    let instance = engine
        .runtime_service()
        .start_process_instance_by_key("holidayRequest", Variables::new())
        .await
        .unwrap();
    assert_eq!(instance.definition_id, latest.id);
}

#[tokio::test]
async fn test_classpath_resource_is_read_from_resource_root() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("review.bpmn20.xml"), PARALLEL_REVIEW).unwrap();

    let engine = builder(EngineConfig::standalone_in_memory().with_resource_root(dir.path()))
        .build()
        .await
        .unwrap();
    let deployment = engine
        .repository_service()
        .create_deployment()
        .name("review")
        .add_classpath_resource("review.bpmn20.xml")
        .add_string("README.txt", "not a process")
        .deploy()
        .await
        .unwrap();
    assert_eq!(
        deployment.resources,
        vec!["review.bpmn20.xml".to_string(), "README.txt".to_string()]
    );

    let stored = engine
        .repository_service()
        .get_deployment(deployment.id)
        .await
        .unwrap();
    assert_eq!(stored.name.as_deref(), Some("review"));

    let defs = engine
        .repository_service()
        .create_process_definition_query()
        .deployment_id(deployment.id)
        .list()
        .await
        .unwrap();
    assert_eq!(defs.len(), 1);
    assert_eq!(defs[0].key, "parallelReview");
    assert_eq!(defs[0].resource_name, "review.bpmn20.xml");
}

#[tokio::test]
async fn test_missing_classpath_resource_fails_deploy() {
    let dir = tempfile::tempdir().unwrap();
    let engine = builder(EngineConfig::standalone_in_memory().with_resource_root(dir.path()))
        .build()
        .await
        .unwrap();
    let err = engine
        .repository_service()
        .create_deployment()
        .add_classpath_resource("absent.bpmn20.xml")
        .deploy()
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Deployment(_)));
}

#[tokio::test]
async fn test_invalid_models_are_rejected_before_storing() {
    let engine = builder(EngineConfig::standalone_in_memory())
        .build()
        .await
        .unwrap();

    let unsupported = r#"<definitions><process id="p">
        <startEvent id="s"/><sequenceFlow id="f1" sourceRef="s" targetRef="x"/>
        <scriptTask id="x"/><sequenceFlow id="f2" sourceRef="x" targetRef="e"/>
        <endEvent id="e"/></process></definitions>"#;
    let err = engine
        .repository_service()
        .create_deployment()
        .add_string("script.bpmn", unsupported)
        .deploy()
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Parse { ref resource, .. } if resource == "script.bpmn"));

    let no_start = r#"<definitions><process id="p"><endEvent id="e"/></process></definitions>"#;
    let err = engine
        .repository_service()
        .create_deployment()
        .add_string("good.bpmn20.xml", HOLIDAY_REQUEST)
        .add_string("nostart.bpmn20.xml", no_start)
        .deploy()
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation { ref process, .. } if process == "p"));

    let stored = engine
        .repository_service()
        .create_process_definition_query()
        .count()
        .await
        .unwrap();
    assert_eq!(stored, 0);
}

#[tokio::test]
async fn test_unknown_key_fails_start() {
    let engine = builder(EngineConfig::standalone_in_memory())
        .build()
        .await
        .unwrap();
    let err = engine
        .runtime_service()
        .start_process_instance_by_key("nope", Variables::new())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound { kind: "process definition", .. }));
}

// ── Tasks ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_claim_conflict_and_candidate_visibility() {
    let engine = builder(EngineConfig::standalone_in_memory())
        .build()
        .await
        .unwrap();
    deploy(&engine, "holiday-request.bpmn20.xml", HOLIDAY_REQUEST).await;
    engine
        .runtime_service()
        .start_process_instance_by_key("holidayRequest", Variables::new())
        .await
        .unwrap();

    let tasks = engine.task_service();
    let task = tasks
        .create_task_query()
        .task_candidate_group("managers")
        .single_result()
        .await
        .unwrap()
        .unwrap();

    tasks.claim(task.id, "kermit").await.unwrap();
    // Claiming again as the same user is a no-op.
    tasks.claim(task.id, "kermit").await.unwrap();

    let err = tasks.claim(task.id, "gonzo").await.unwrap_err();
    assert!(
        matches!(err, EngineError::TaskAlreadyClaimed { ref assignee, .. } if assignee == "kermit")
    );

    let group = tasks
        .create_task_query()
        .task_candidate_group("managers")
        .count()
        .await
        .unwrap();
    assert_eq!(group, 0);
    let mine = tasks
        .create_task_query()
        .task_assignee("kermit")
        .count()
        .await
        .unwrap();
    assert_eq!(mine, 1);

    tasks.unclaim(task.id).await.unwrap();
    let group = tasks
        .create_task_query()
        .task_candidate_group("managers")
        .count()
        .await
        .unwrap();
    assert_eq!(group, 1);
}

#[tokio::test]
async fn test_local_variables_shadow_process_variables() {
    let engine = builder(EngineConfig::standalone_in_memory())
        .build()
        .await
        .unwrap();
    deploy(&engine, "holiday-request.bpmn20.xml", HOLIDAY_REQUEST).await;
    let instance = engine
        .runtime_service()
        .start_process_instance_by_key(
            "holidayRequest",
            vars(&[("description", "Ferien".into())]),
        )
        .await
        .unwrap();

    let tasks = engine.task_service();
    let task = tasks.create_task_query().single_result().await.unwrap().unwrap();
    tasks
        .set_variable_local(task.id, "description", "draft")
        .await
        .unwrap();
    tasks.set_variable(task.id, "comment", "ok").await.unwrap();

    assert_eq!(
        tasks.get_variable(task.id, "description").await.unwrap(),
        Some(VariableValue::from("draft"))
    );
    let process = engine.runtime_service().get_variables(instance.id).await.unwrap();
    assert_eq!(process.get("description"), Some(&VariableValue::from("Ferien")));
    assert_eq!(process.get("comment"), Some(&VariableValue::from("ok")));
}

// ── Execution ──────────────────────────────────────────────────

#[tokio::test]
async fn test_parallel_join_waits_for_every_branch() {
    let engine = builder(EngineConfig::standalone_in_memory())
        .with_delegate_fn("Stamp", |execution| {
            execution.set_variable("stamped", true);
            Ok(())
        })
        .build()
        .await
        .unwrap();
    deploy(&engine, "parallel-review.bpmn20.xml", PARALLEL_REVIEW).await;

    let instance = engine
        .runtime_service()
        .start_process_instance_by_key("parallelReview", Variables::new())
        .await
        .unwrap();
    assert_eq!(instance.state, InstanceState::Active);
    assert_eq!(
        instance.variables.get("stamped"),
        Some(&VariableValue::Bool(true))
    );

    let tasks = engine.task_service();
    let review = tasks
        .create_task_query()
        .task_candidate_user("gonzo")
        .single_result()
        .await
        .unwrap()
        .unwrap();
    assert_eq!(review.name, "Legal review");
    assert_eq!(review.candidate_users, vec!["kermit", "gonzo"]);

    tasks.complete(review.id, Variables::new()).await.unwrap();

    let done = engine
        .runtime_service()
        .get_process_instance(instance.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(done.state, InstanceState::Completed);

    let gateways = engine
        .history_service()
        .create_historic_activity_instance_query()
        .process_instance_id(instance.id)
        .activity_type("parallelGateway")
        .list()
        .await
        .unwrap();
    // The fork once, the join once per arriving branch.
    assert_eq!(gateways.len(), 3);
    assert!(gateways.iter().all(|a| a.is_finished()));
    let ends = engine
        .history_service()
        .create_historic_activity_instance_query()
        .process_instance_id(instance.id)
        .activity_id("end")
        .count()
        .await
        .unwrap();
    assert_eq!(ends, 1);
}

#[tokio::test]
async fn test_terminate_end_cancels_open_work() {
    let engine = builder(EngineConfig::standalone_in_memory())
        .build()
        .await
        .unwrap();
    deploy(&engine, "escalation.bpmn20.xml", ESCALATION).await;

    let instance = engine
        .runtime_service()
        .start_process_instance_by_key("escalation", vars(&[("urgent", true.into())]))
        .await
        .unwrap();
    assert_eq!(instance.state, InstanceState::Terminated);
    assert_eq!(engine.task_service().create_task_query().count().await.unwrap(), 0);

    let history = engine.history_service();
    let open = history
        .create_historic_activity_instance_query()
        .process_instance_id(instance.id)
        .unfinished()
        .count()
        .await
        .unwrap();
    assert_eq!(open, 0);
    let historic = history
        .create_historic_process_instance_query()
        .process_instance_id(instance.id)
        .single_result()
        .await
        .unwrap()
        .unwrap();
    assert_eq!(historic.end_activity_id.as_deref(), Some("kill"));
}

#[tokio::test]
async fn test_default_flow_keeps_instance_alive_until_terminate() {
    let engine = builder(EngineConfig::standalone_in_memory())
        .build()
        .await
        .unwrap();
    deploy(&engine, "escalation.bpmn20.xml", ESCALATION).await;
    let instance = engine
        .runtime_service()
        .start_process_instance_by_key("escalation", vars(&[("urgent", false.into())]))
        .await
        .unwrap();

    let tasks = engine.task_service();
    let work = tasks
        .create_task_query()
        .task_assignee("fozzie")
        .single_result()
        .await
        .unwrap()
        .unwrap();
    tasks.complete(work.id, Variables::new()).await.unwrap();

    // One branch reached a plain end; the supervisor branch is still open.
    let runtime = engine.runtime_service();
    let current = runtime.get_process_instance(instance.id).await.unwrap().unwrap();
    assert_eq!(current.state, InstanceState::Active);

    let supervise = tasks
        .create_task_query()
        .task_candidate_group("supervisors")
        .single_result()
        .await
        .unwrap()
        .unwrap();
    tasks.complete(supervise.id, Variables::new()).await.unwrap();

    let current = runtime.get_process_instance(instance.id).await.unwrap().unwrap();
    assert_eq!(current.state, InstanceState::Terminated);

    let err = runtime
        .set_variable(instance.id, "late", 1)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InstanceEnded(id) if id == instance.id));
}

#[tokio::test]
async fn test_delegate_loop_until_condition_holds() {
    let engine = builder(EngineConfig::standalone_in_memory())
        .with_delegate_fn("tick", |execution| {
            let count = execution
                .get_variable("count")
                .and_then(VariableValue::as_i64)
                .unwrap_or(0);
            execution.set_variable("count", count + 1);
            Ok(())
        })
        .build()
        .await
        .unwrap();
    deploy(&engine, "counter.bpmn", COUNTER_LOOP).await;

    let instance = engine
        .runtime_service()
        .start_process_instance_by_key("counter", Variables::new())
        .await
        .unwrap();
    assert_eq!(instance.state, InstanceState::Completed);
    assert_eq!(instance.variables.get("count"), Some(&VariableValue::Integer(3)));

    let ticks = engine
        .history_service()
        .create_historic_activity_instance_query()
        .activity_id("tick")
        .count()
        .await
        .unwrap();
    assert_eq!(ticks, 3);
}

#[tokio::test]
async fn test_loop_without_wait_state_hits_step_limit() {
    let engine = builder(EngineConfig::standalone_in_memory().with_history_level(HistoryLevel::None))
        .with_delegate_fn("tick", |_| Ok(()))
        .build()
        .await
        .unwrap();
    deploy(&engine, "counter.bpmn", COUNTER_LOOP).await;

    let err = engine
        .runtime_service()
        .start_process_instance_by_key("counter", vars(&[("count", 0.into())]))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::StepLimit { limit, .. } if limit == MAX_STEPS));
}

#[tokio::test]
async fn test_missing_delegate_fails_service_task() {
    let engine = builder(EngineConfig::standalone_in_memory())
        .build()
        .await
        .unwrap();
    deploy(&engine, "parallel-review.bpmn20.xml", PARALLEL_REVIEW).await;

    let err = engine
        .runtime_service()
        .start_process_instance_by_key("parallelReview", Variables::new())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Delegate { ref activity, .. } if activity == "stamp"));
}

#[tokio::test]
async fn test_failing_delegate_reports_its_error() {
    let engine = builder(EngineConfig::standalone_in_memory())
        .with_delegate_fn("Stamp", |_| anyhow::bail!("ink ran out"))
        .build()
        .await
        .unwrap();
    deploy(&engine, "parallel-review.bpmn20.xml", PARALLEL_REVIEW).await;

    let err = engine
        .runtime_service()
        .start_process_instance_by_key("parallelReview", Variables::new())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("ink ran out"), "{err}");
}

// ── History ────────────────────────────────────────────────────

#[tokio::test]
async fn test_history_level_none_records_nothing() {
    let engine = builder(EngineConfig::standalone_in_memory().with_history_level(HistoryLevel::None))
        .build()
        .await
        .unwrap();
    deploy(&engine, "holiday-request.bpmn20.xml", HOLIDAY_REQUEST).await;
    let instance = engine
        .runtime_service()
        .start_process_instance_by_key("holidayRequest", Variables::new())
        .await
        .unwrap();

    let history = engine.history_service();
    assert_eq!(
        history
            .create_historic_activity_instance_query()
            .count()
            .await
            .unwrap(),
        0
    );
    assert!(history
        .create_historic_process_instance_query()
        .process_instance_id(instance.id)
        .single_result()
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_activity_history_orders_by_end_and_start_time() {
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 7, 1, 9, 0, 0).unwrap(),
    ));
    let stamp_clock = clock.clone();
    let engine = ProcessEngine::builder(EngineConfig::standalone_in_memory())
        .with_clock(clock.clone())
        .with_delegate_fn("Stamp", move |_| {
            stamp_clock.advance(Duration::seconds(1));
            Ok(())
        })
        .build()
        .await
        .unwrap();
    deploy(&engine, "parallel-review.bpmn20.xml", PARALLEL_REVIEW).await;
    let instance = engine
        .runtime_service()
        .start_process_instance_by_key("parallelReview", Variables::new())
        .await
        .unwrap();

    let history = engine.history_service();
    let ids = |activities: Vec<HistoricActivityInstance>| -> Vec<String> {
        activities.into_iter().map(|a| a.activity_id).collect()
    };

    // The review starts before the stamp but is still open, so it sorts
    // last ascending and first descending.
    let by_end = history
        .create_historic_activity_instance_query()
        .process_instance_id(instance.id)
        .order_by_historic_activity_instance_end_time()
        .asc()
        .list()
        .await
        .unwrap();
    assert_eq!(ids(by_end), vec!["start", "fork", "stamp", "join", "legalReview"]);
    let by_end_desc = history
        .create_historic_activity_instance_query()
        .process_instance_id(instance.id)
        .order_by_historic_activity_instance_end_time()
        .desc()
        .list()
        .await
        .unwrap();
    assert_eq!(
        ids(by_end_desc),
        vec!["legalReview", "stamp", "join", "start", "fork"]
    );

    clock.advance(Duration::seconds(10));
    let review = engine
        .task_service()
        .create_task_query()
        .process_instance_id(instance.id)
        .single_result()
        .await
        .unwrap()
        .unwrap();
    engine
        .task_service()
        .complete(review.id, Variables::new())
        .await
        .unwrap();

    // Equal timestamps keep the order the records were started in.
    let by_end = history
        .create_historic_activity_instance_query()
        .process_instance_id(instance.id)
        .finished()
        .order_by_historic_activity_instance_end_time()
        .asc()
        .list()
        .await
        .unwrap();
    assert_eq!(
        ids(by_end),
        vec!["start", "fork", "stamp", "join", "legalReview", "join", "end"]
    );
    let by_end_desc = history
        .create_historic_activity_instance_query()
        .process_instance_id(instance.id)
        .finished()
        .order_by_historic_activity_instance_end_time()
        .desc()
        .list()
        .await
        .unwrap();
    assert_eq!(
        ids(by_end_desc),
        vec!["legalReview", "join", "end", "stamp", "join", "start", "fork"]
    );

    let by_start = history
        .create_historic_activity_instance_query()
        .process_instance_id(instance.id)
        .order_by_historic_activity_instance_start_time()
        .asc()
        .list()
        .await
        .unwrap();
    assert_eq!(
        ids(by_start),
        vec!["start", "fork", "legalReview", "stamp", "join", "join", "end"]
    );
    let by_start_desc = history
        .create_historic_activity_instance_query()
        .process_instance_id(instance.id)
        .order_by_historic_activity_instance_start_time()
        .desc()
        .list()
        .await
        .unwrap();
    assert_eq!(
        ids(by_start_desc),
        vec!["join", "end", "join", "start", "fork", "legalReview", "stamp"]
    );

    let review_activity = history
        .create_historic_activity_instance_query()
        .process_instance_id(instance.id)
        .activity_id("legalReview")
        .list()
        .await
        .unwrap();
    assert_eq!(review_activity[0].duration_in_millis(), Some(11_000));
}
