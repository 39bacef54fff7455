//! The holiday-request walkthrough: deploy, start, pick a task, complete it
//! and print the timing history, with a numbered marker after each stage.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use flowlite_core::{
    EngineConfig, ProcessEngine, SchemaUpdate, VariableValue, Variables,
};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, info};
use uuid::Uuid;

use crate::console::Console;
use crate::delegates::{CallExternalSystemDelegate, SendRejectionMail};

pub const PROCESS_KEY: &str = "holidayRequest";
pub const PROCESS_RESOURCE: &str = "holiday-request.bpmn20.xml";
pub const MANAGERS_GROUP: &str = "managers";

/// Inputs for one run. In interactive mode these are the defaults offered
/// when the user just presses enter.
#[derive(Debug, Clone)]
pub struct Request {
    pub resources: PathBuf,
    pub employee: String,
    pub holidays: i64,
    pub description: String,
    /// 1-based position in the printed task list.
    pub task_index: usize,
    pub approved: bool,
}

#[derive(Debug)]
pub struct Outcome {
    pub process_instance_id: Uuid,
    pub approved: bool,
    /// `(activity id, duration in ms)` in end-time order.
    pub history: Vec<(String, i64)>,
}

pub fn engine_config(resources: PathBuf) -> EngineConfig {
    EngineConfig::standalone_in_memory()
        .with_url("mem:flowlite;DB_CLOSE_DELAY=-1")
        .with_username("sa")
        .with_password("")
        .with_driver("flowlite.memory")
        .with_schema_update(SchemaUpdate::True)
        .with_resource_root(resources)
}

/// Build the engine with the holiday-request delegates, which print to
/// `console`.
pub async fn build_engine<W>(config: EngineConfig, console: &Console<W>) -> Result<ProcessEngine>
where
    W: Write + Send + 'static,
{
    ProcessEngine::builder(config)
        .with_delegate(
            "CallExternalSystemDelegate",
            Arc::new(CallExternalSystemDelegate::new(console.clone())),
        )
        .with_delegate(
            "SendRejectionMail",
            Arc::new(SendRejectionMail::new(console.clone())),
        )
        .build()
        .await
        .context("Failed to build process engine")
}

fn marker(out: &mut impl Write, n: u8) -> Result<()> {
    writeln!(out, "{n} {}", "*".repeat(74))?;
    Ok(())
}

/// Print `question`; with an input attached, read one line and fall back to
/// `default` when it is blank.
async fn ask<R>(
    input: &mut Option<R>,
    out: &mut impl Write,
    question: &str,
    default: String,
) -> Result<String>
where
    R: AsyncBufRead + Unpin,
{
    writeln!(out, "{question}")?;
    out.flush()?;
    let Some(reader) = input.as_mut() else {
        return Ok(default);
    };
    let mut line = String::new();
    reader
        .read_line(&mut line)
        .await
        .context("Failed to read answer")?;
    let answer = line.trim();
    if answer.is_empty() {
        Ok(default)
    } else {
        Ok(answer.to_string())
    }
}

pub async fn run<R, W>(
    engine: &ProcessEngine,
    request: &Request,
    mut input: Option<R>,
    out: &mut W,
) -> Result<Outcome>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    marker(out, 1)?;

    let deployment = engine
        .repository_service()
        .create_deployment()
        .add_classpath_resource(PROCESS_RESOURCE)
        .deploy()
        .await
        .with_context(|| format!("Failed to deploy {PROCESS_RESOURCE}"))?;
    marker(out, 2)?;

    let definition = engine
        .repository_service()
        .create_process_definition_query()
        .deployment_id(deployment.id)
        .single_result()
        .await?
        .context("Deployment contains no process definition")?;
    writeln!(
        out,
        "Found process definition : {}",
        definition.name.as_deref().unwrap_or(&definition.key)
    )?;
    marker(out, 3)?;

    let employee = ask(&mut input, out, "Who are you?", request.employee.clone()).await?;
    let holidays: i64 = ask(
        &mut input,
        out,
        "How many holidays do you want to request?",
        request.holidays.to_string(),
    )
    .await?
    .parse()
    .context("Number of holidays must be a whole number")?;
    let description = ask(
        &mut input,
        out,
        "Why do you need them?",
        request.description.clone(),
    )
    .await?;

    let mut variables = Variables::new();
    variables.insert("employee".into(), employee.into());
    variables.insert("nrOfHolidays".into(), holidays.into());
    variables.insert("description".into(), description.into());
    let instance = engine
        .runtime_service()
        .start_process_instance_by_key(PROCESS_KEY, variables)
        .await
        .context("Failed to start holiday request")?;
    marker(out, 4)?;

    let task_service = engine.task_service();
    let tasks = task_service
        .create_task_query()
        .task_candidate_group(MANAGERS_GROUP)
        .list()
        .await?;
    writeln!(out, "You have {} tasks:", tasks.len())?;
    for (i, task) in tasks.iter().enumerate() {
        writeln!(out, "{}) {}", i + 1, task.name)?;
    }
    marker(out, 5)?;

    let task_index: usize = ask(
        &mut input,
        out,
        "Which task would you like to complete?",
        request.task_index.to_string(),
    )
    .await?
    .parse()
    .context("Task number must be a positive whole number")?;
    let Some(task) = task_index.checked_sub(1).and_then(|i| tasks.get(i)) else {
        bail!("No task number {task_index}; {} task(s) available", tasks.len());
    };
    let process_variables = task_service.get_variables(task.id).await?;
    let show = |name: &str| {
        process_variables
            .get(name)
            .map(ToString::to_string)
            .unwrap_or_default()
    };
    let default_answer = if request.approved { "y" } else { "n" };
    let approved = ask(
        &mut input,
        out,
        &format!(
            "{} wants {} of holidays. Do you approve this?",
            show("employee"),
            show("nrOfHolidays")
        ),
        default_answer.to_string(),
    )
    .await?
    .eq_ignore_ascii_case("y");
    marker(out, 6)?;

    let mut decision = Variables::new();
    decision.insert("approved".into(), VariableValue::Bool(approved));
    task_service
        .complete(task.id, decision)
        .await
        .with_context(|| format!("Failed to complete task '{}'", task.name))?;
    info!(instance_id = %instance.id, approved, "Holiday request decided");

    let activities = engine
        .history_service()
        .create_historic_activity_instance_query()
        .process_instance_id(instance.id)
        .finished()
        .order_by_historic_activity_instance_end_time()
        .asc()
        .list()
        .await?;
    let mut history = Vec::with_capacity(activities.len());
    for activity in activities {
        let millis = activity.duration_in_millis().unwrap_or_default();
        writeln!(out, "{} took {millis} milliseconds", activity.activity_id)?;
        history.push((activity.activity_id, millis));
    }
    marker(out, 7)?;
    debug!(activities = history.len(), "History printed");

    Ok(Outcome {
        process_instance_id: instance.id,
        approved,
        history,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowlite_core::InstanceState;
    use tokio::io::BufReader;

    fn resources() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("resources")
    }

    fn request() -> Request {
        Request {
            resources: resources(),
            employee: "Reto".into(),
            holidays: 3,
            description: "Ferien".into(),
            task_index: 1,
            approved: true,
        }
    }

    async fn engine(console: &Console<Vec<u8>>) -> ProcessEngine {
        build_engine(engine_config(resources()), console).await.unwrap()
    }

    fn no_input() -> Option<BufReader<&'static [u8]>> {
        None
    }

    #[tokio::test]
    async fn test_default_run_prints_tutorial_transcript() {
        let console = Console::new(Vec::new());
        let engine = engine(&console).await;
        let outcome = run(&engine, &request(), no_input(), &mut console.clone())
            .await
            .unwrap();
        let text = console.text();
        let lines: Vec<&str> = text.lines().collect();

        let stars = "*".repeat(74);
        assert_eq!(lines[0], format!("1 {stars}"));
        assert_eq!(lines[1], format!("2 {stars}"));
        assert_eq!(lines[2], "Found process definition : Holiday Request");
        assert_eq!(lines[3], format!("3 {stars}"));
        assert_eq!(lines[4], "Who are you?");
        assert_eq!(lines[5], "How many holidays do you want to request?");
        assert_eq!(lines[6], "Why do you need them?");
        assert_eq!(lines[7], format!("4 {stars}"));
        assert_eq!(lines[8], "You have 1 tasks:");
        assert_eq!(lines[9], "1) Approve or reject request");
        assert_eq!(lines[10], format!("5 {stars}"));
        assert_eq!(lines[11], "Which task would you like to complete?");
        assert_eq!(lines[12], "Reto wants 3 of holidays. Do you approve this?");
        assert_eq!(lines[13], format!("6 {stars}"));
        assert_eq!(lines[14], "Calling the external system for employee Reto");
        assert!(lines[15].starts_with("startEvent took "));
        assert!(lines[16].starts_with("approveTask took "));
        assert!(lines[17].starts_with("decision took "));
        assert!(lines[18].starts_with("externalSystemCall took "));
        assert_eq!(lines[19], format!("7 {stars}"));
        assert_eq!(lines.len(), 20);

        assert!(outcome.approved);
        let ids: Vec<&str> = outcome.history.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(
            ids,
            vec!["startEvent", "approveTask", "decision", "externalSystemCall"]
        );
        assert!(outcome.history.iter().all(|(_, ms)| *ms >= 0));

        let approved_task = engine
            .task_service()
            .create_task_query()
            .task_assignee("Reto")
            .single_result()
            .await
            .unwrap()
            .unwrap();
        assert_eq!(approved_task.name, "Holiday approved");
    }

    #[tokio::test]
    async fn test_interactive_answers_override_defaults() {
        let console = Console::new(Vec::new());
        let engine = engine(&console).await;
        let answers = BufReader::new(&b"Kermit\n10\nWedding\n\nn\n"[..]);
        let outcome = run(&engine, &request(), Some(answers), &mut console.clone())
            .await
            .unwrap();
        let text = console.text();

        assert!(text.contains("Kermit wants 10 of holidays. Do you approve this?"));
        assert!(text.contains("Sending rejection mail to employee Kermit\n"));
        assert!(!text.contains("Calling the external system"));
        assert!(text.ends_with(&format!("7 {}\n", "*".repeat(74))));
        assert!(!outcome.approved);
        assert!(outcome
            .history
            .iter()
            .any(|(id, _)| id == "sendRejectionMail"));

        let instance = engine
            .runtime_service()
            .get_process_instance(outcome.process_instance_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(instance.state, InstanceState::Completed);
        assert_eq!(
            instance.variables.get("description"),
            Some(&VariableValue::from("Wedding"))
        );
    }

    #[tokio::test]
    async fn test_task_index_out_of_range_fails() {
        let console = Console::new(Vec::new());
        let engine = engine(&console).await;
        let mut req = request();
        req.task_index = 2;
        let err = run(&engine, &req, no_input(), &mut Vec::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("No task number 2"));
    }

    #[tokio::test]
    async fn test_missing_resource_root_fails_deploy() {
        let console = Console::new(Vec::new());
        let engine = build_engine(engine_config(PathBuf::from("/nonexistent/flowlite")), &console)
            .await
            .unwrap();
        let err = run(&engine, &request(), no_input(), &mut Vec::new())
            .await
            .unwrap_err();
        assert!(format!("{err:#}").contains("Failed to deploy"));
    }

    #[test]
    fn test_engine_config_uses_in_memory_literals() {
        let config = engine_config(resources());
        assert_eq!(config.url, "mem:flowlite;DB_CLOSE_DELAY=-1");
        assert_eq!(config.username, "sa");
        assert_eq!(config.password, "");
        assert_eq!(config.driver, "flowlite.memory");
        assert_eq!(config.schema_update, SchemaUpdate::True);
    }
}
