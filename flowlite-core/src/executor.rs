//! Token walk over a [`ProcessModel`].
//!
//! A call to [`Executor::start`] or [`Executor::resume`] moves tokens
//! through the graph until each one is parked (user task, parallel join)
//! or consumed (end event). Tokens are processed breadth-first in the order
//! their sequence flows appear in the document.

use std::collections::VecDeque;

use tracing::{debug, info};
use uuid::Uuid;

use crate::config::HistoryLevel;
use crate::delegate::DelegateExecution;
use crate::engine::EngineContext;
use crate::error::{EngineError, EngineResult};
use crate::expr::{evaluate, evaluate_condition, parse_expression, ExprError};
use crate::types::*;

/// Upper bound on node visits per call, so a cycle without a wait state
/// fails instead of spinning forever.
pub const MAX_STEPS: usize = 10_000;

/// Outcome of executing a node's behaviour.
#[derive(Debug, PartialEq)]
enum Step {
    /// Leave through outgoing flows.
    Continue,
    /// Token parked; a later call resumes it.
    Wait,
    /// Token reached a plain end event.
    Consumed,
    /// Token reached a terminate end event.
    Terminate,
}

/// A token about to enter `node_id`, or (when `entered`) about to leave it.
#[derive(Debug)]
struct Token {
    execution_id: Uuid,
    node_id: String,
    entered: bool,
    activity: Option<HistoricActivityInstance>,
}

impl Token {
    fn arriving(execution_id: Uuid, node_id: impl Into<String>) -> Self {
        Self {
            execution_id,
            node_id: node_id.into(),
            entered: false,
            activity: None,
        }
    }
}

pub(crate) struct Executor<'a> {
    ctx: &'a EngineContext,
}

/// Stored state of one instance, taken before a resume so a failed walk
/// can be undone.
pub(crate) struct InstanceSnapshot {
    instance: ProcessInstance,
    tasks: Vec<Task>,
    executions: Vec<Execution>,
    activities: Vec<HistoricActivityInstance>,
    historic: Option<HistoricProcessInstance>,
}

impl<'a> Executor<'a> {
    pub fn new(ctx: &'a EngineContext) -> Self {
        Self { ctx }
    }

    fn history_enabled(&self) -> bool {
        self.ctx.config.history_level != HistoryLevel::None
    }

    /// Create an instance of `definition` and run it to its first wait states.
    pub async fn start(
        &self,
        definition: &ProcessDefinition,
        model: &ProcessModel,
        business_key: Option<String>,
        variables: Variables,
    ) -> EngineResult<ProcessInstance> {
        let start = model
            .start_events()
            .first()
            .map(|n| n.id.clone())
            .ok_or_else(|| EngineError::not_found("start event", &definition.id))?;

        let now = self.ctx.clock.now();
        let mut instance = ProcessInstance {
            id: Uuid::now_v7(),
            definition_id: definition.id.clone(),
            definition_key: definition.key.clone(),
            business_key,
            variables,
            state: InstanceState::Active,
            started_at: now,
            ended_at: None,
        };
        self.ctx.store.save_instance(&instance).await?;

        if self.history_enabled() {
            self.ctx
                .store
                .save_historic_instance(&HistoricProcessInstance {
                    id: instance.id,
                    process_definition_id: definition.id.clone(),
                    business_key: instance.business_key.clone(),
                    start_time: now,
                    end_time: None,
                    end_activity_id: None,
                })
                .await?;
        }

        info!(
            instance_id = %instance.id,
            definition = %definition.id,
            "Process instance started"
        );

        let queue = VecDeque::from([Token::arriving(Uuid::now_v7(), start)]);
        self.walk(&mut instance, model, queue).await?;
        Ok(instance)
    }

    /// Continue a parked execution out of `node_id`. The caller has already
    /// closed the node's activity record and removed the parked execution.
    pub async fn resume(
        &self,
        instance: &mut ProcessInstance,
        model: &ProcessModel,
        execution_id: Uuid,
        node_id: &str,
    ) -> EngineResult<()> {
        if instance.state.is_ended() {
            return Err(EngineError::InstanceEnded(instance.id));
        }
        let token = Token {
            execution_id,
            node_id: node_id.to_string(),
            entered: true,
            activity: None,
        };
        self.walk(instance, model, VecDeque::from([token])).await
    }

    async fn walk(
        &self,
        instance: &mut ProcessInstance,
        model: &ProcessModel,
        mut queue: VecDeque<Token>,
    ) -> EngineResult<()> {
        let mut steps = 0usize;
        let mut last_end: Option<String> = None;

        while let Some(mut token) = queue.pop_front() {
            steps += 1;
            if steps > MAX_STEPS {
                self.ctx.store.save_instance(instance).await?;
                return Err(EngineError::StepLimit {
                    instance_id: instance.id,
                    limit: MAX_STEPS,
                });
            }

            let node = model
                .node(&token.node_id)
                .cloned()
                .ok_or_else(|| EngineError::not_found("node", &token.node_id))?;

            if !token.entered {
                debug!(instance_id = %instance.id, node = %node.id, "Token entered node");
                token.activity = self.record_start(instance, &node, token.execution_id).await?;
                match self.execute(instance, model, &node, &mut token).await? {
                    Step::Continue => {}
                    Step::Wait => continue,
                    Step::Consumed => {
                        last_end = Some(node.id.clone());
                        continue;
                    }
                    Step::Terminate => {
                        self.terminate(instance, &node.id).await?;
                        return Ok(());
                    }
                }
            }

            self.finish_activity(token.activity.take()).await?;

            let flows = self.select_outgoing(instance, model, &node)?;
            for (i, flow) in flows.into_iter().enumerate() {
                // The first branch keeps the execution; further branches fork.
                let execution_id = if i == 0 {
                    token.execution_id
                } else {
                    Uuid::now_v7()
                };
                debug!(flow = %flow.id, from = %flow.source, to = %flow.target, "Taking sequence flow");
                queue.push_back(Token::arriving(execution_id, flow.target.clone()));
            }
        }

        if instance.state == InstanceState::Active
            && self.ctx.store.load_executions(instance.id).await?.is_empty()
        {
            self.finish_instance(instance, InstanceState::Completed, last_end)
                .await?;
        } else {
            self.ctx.store.save_instance(instance).await?;
        }
        Ok(())
    }

    async fn execute(
        &self,
        instance: &mut ProcessInstance,
        model: &ProcessModel,
        node: &Node,
        token: &mut Token,
    ) -> EngineResult<Step> {
        match &node.kind {
            NodeKind::StartEvent | NodeKind::ExclusiveGateway { .. } => Ok(Step::Continue),

            NodeKind::EndEvent { terminate } => {
                self.finish_activity(token.activity.take()).await?;
                if *terminate {
                    Ok(Step::Terminate)
                } else {
                    Ok(Step::Consumed)
                }
            }

            NodeKind::ServiceTask { delegate } => {
                self.run_delegate(instance, node, delegate).await?;
                Ok(Step::Continue)
            }

            NodeKind::UserTask {
                assignee,
                candidate_users,
                candidate_groups,
            } => {
                let assignee = match assignee {
                    Some(raw) => self.resolve_assignee(instance, &node.id, raw)?,
                    None => None,
                };
                let task = Task {
                    id: Uuid::now_v7(),
                    name: node.label().to_string(),
                    task_definition_key: node.id.clone(),
                    process_instance_id: instance.id,
                    process_definition_id: instance.definition_id.clone(),
                    execution_id: token.execution_id,
                    assignee: assignee.clone(),
                    candidate_users: candidate_users.clone(),
                    candidate_groups: candidate_groups.clone(),
                    created_at: self.ctx.clock.now(),
                    local_variables: Variables::new(),
                };
                self.ctx.store.save_task(&task).await?;
                self.park(instance.id, token.execution_id, &node.id).await?;

                if let Some(mut activity) = token.activity.take() {
                    activity.task_id = Some(task.id);
                    activity.assignee = assignee;
                    self.ctx.store.save_activity(&activity).await?;
                }

                info!(
                    instance_id = %instance.id,
                    task_id = %task.id,
                    task = %task.name,
                    "User task created"
                );
                Ok(Step::Wait)
            }

            NodeKind::ParallelGateway => {
                let expected = model.incoming(&node.id).len();
                if expected <= 1 {
                    return Ok(Step::Continue);
                }

                self.park(instance.id, token.execution_id, &node.id).await?;
                let waiting: Vec<Execution> = self
                    .ctx
                    .store
                    .load_executions(instance.id)
                    .await?
                    .into_iter()
                    .filter(|e| e.node_id == node.id)
                    .collect();

                if waiting.len() < expected {
                    debug!(
                        gateway = %node.id,
                        arrived = waiting.len(),
                        expected,
                        "Join waiting"
                    );
                    // Each arrival is its own completed activity.
                    self.finish_activity(token.activity.take()).await?;
                    return Ok(Step::Wait);
                }

                for execution in &waiting {
                    self.ctx
                        .store
                        .delete_execution(instance.id, execution.id)
                        .await?;
                }
                debug!(gateway = %node.id, "Join released");
                token.execution_id = Uuid::now_v7();
                Ok(Step::Continue)
            }
        }
    }

    async fn run_delegate(
        &self,
        instance: &mut ProcessInstance,
        node: &Node,
        name: &str,
    ) -> EngineResult<()> {
        let delegate = self
            .ctx
            .delegates
            .get(name)
            .ok_or_else(|| EngineError::Delegate {
                activity: node.id.clone(),
                message: format!("no delegate registered under '{name}'"),
            })?;

        let mut execution = DelegateExecution {
            process_instance_id: instance.id,
            process_definition_id: instance.definition_id.clone(),
            activity_id: node.id.clone(),
            variables: instance.variables.clone(),
        };
        delegate
            .execute(&mut execution)
            .await
            .map_err(|e| EngineError::Delegate {
                activity: node.id.clone(),
                message: format!("{e:#}"),
            })?;

        instance.variables = execution.variables;
        debug!(
            instance_id = %instance.id,
            delegate = name,
            variables = %serde_json::to_string(&instance.variables).unwrap_or_default(),
            "Service task executed"
        );
        Ok(())
    }

    fn resolve_assignee(
        &self,
        instance: &ProcessInstance,
        activity: &str,
        raw: &str,
    ) -> EngineResult<Option<String>> {
        let expr_error = |source: ExprError| EngineError::Expression {
            activity: activity.to_string(),
            source,
        };
        let expr = parse_expression(raw).map_err(expr_error)?;
        let value = evaluate(&expr, &instance.variables).map_err(expr_error)?;
        Ok(match value {
            VariableValue::Null => None,
            other => Some(other.to_string()),
        })
    }

    fn select_outgoing<'m>(
        &self,
        instance: &ProcessInstance,
        model: &'m ProcessModel,
        node: &Node,
    ) -> EngineResult<Vec<&'m SequenceFlow>> {
        let outgoing = model.outgoing(&node.id);

        match &node.kind {
            NodeKind::ParallelGateway => Ok(outgoing),

            NodeKind::ExclusiveGateway { default_flow } => {
                let mut default = None;
                for flow in outgoing {
                    if default_flow.as_deref() == Some(flow.id.as_str()) {
                        default = Some(flow);
                        continue;
                    }
                    if self.condition_holds(instance, &node.id, flow)? {
                        return Ok(vec![flow]);
                    }
                }
                default
                    .map(|f| vec![f])
                    .ok_or_else(|| EngineError::NoOutgoingFlow(node.id.clone()))
            }

            _ => {
                let mut taken = Vec::new();
                for flow in outgoing {
                    if self.condition_holds(instance, &node.id, flow)? {
                        taken.push(flow);
                    }
                }
                if taken.is_empty() {
                    return Err(EngineError::NoOutgoingFlow(node.id.clone()));
                }
                Ok(taken)
            }
        }
    }

    fn condition_holds(
        &self,
        instance: &ProcessInstance,
        activity: &str,
        flow: &SequenceFlow,
    ) -> EngineResult<bool> {
        let Some(cond) = &flow.condition else {
            return Ok(true);
        };
        let expr_error = |source: ExprError| EngineError::Expression {
            activity: activity.to_string(),
            source,
        };
        let expr = parse_expression(cond).map_err(expr_error)?;
        evaluate_condition(&expr, &instance.variables).map_err(expr_error)
    }

    async fn park(&self, instance_id: Uuid, execution_id: Uuid, node_id: &str) -> EngineResult<()> {
        self.ctx
            .store
            .save_execution(&Execution {
                id: execution_id,
                instance_id,
                node_id: node_id.to_string(),
            })
            .await?;
        Ok(())
    }

    async fn record_start(
        &self,
        instance: &ProcessInstance,
        node: &Node,
        execution_id: Uuid,
    ) -> EngineResult<Option<HistoricActivityInstance>> {
        if !self.history_enabled() {
            return Ok(None);
        }
        let activity = HistoricActivityInstance {
            id: Uuid::now_v7(),
            process_instance_id: instance.id,
            process_definition_id: instance.definition_id.clone(),
            activity_id: node.id.clone(),
            activity_name: node.name.clone(),
            activity_type: node.kind.activity_type().to_string(),
            execution_id,
            task_id: None,
            assignee: None,
            start_time: self.ctx.clock.now(),
            end_time: None,
        };
        self.ctx.store.save_activity(&activity).await?;
        Ok(Some(activity))
    }

    async fn finish_activity(&self, activity: Option<HistoricActivityInstance>) -> EngineResult<()> {
        if let Some(mut activity) = activity {
            activity.end_time = Some(self.ctx.clock.now());
            self.ctx.store.save_activity(&activity).await?;
        }
        Ok(())
    }

    /// Close the open activity record of a user task.
    pub async fn finish_task_activity(&self, task: &Task) -> EngineResult<()> {
        if !self.history_enabled() {
            return Ok(());
        }
        let open = self
            .ctx
            .store
            .list_activities(Some(task.process_instance_id))
            .await?
            .into_iter()
            .find(|a| a.task_id == Some(task.id) && !a.is_finished());
        self.finish_activity(open).await
    }

    pub async fn snapshot(&self, instance_id: Uuid) -> EngineResult<InstanceSnapshot> {
        let store = &self.ctx.store;
        let instance = store
            .load_instance(instance_id)
            .await?
            .ok_or_else(|| EngineError::not_found("process instance", instance_id))?;
        let tasks = store
            .list_tasks()
            .await?
            .into_iter()
            .filter(|t| t.process_instance_id == instance_id)
            .collect();
        let historic = store
            .list_historic_instances()
            .await?
            .into_iter()
            .find(|h| h.id == instance_id);
        Ok(InstanceSnapshot {
            instance,
            tasks,
            executions: store.load_executions(instance_id).await?,
            activities: store.list_activities(Some(instance_id)).await?,
            historic,
        })
    }

    /// Put an instance back to `snapshot`, discarding whatever a failed
    /// walk wrote in between.
    pub async fn restore(&self, snapshot: InstanceSnapshot) -> EngineResult<()> {
        let store = &self.ctx.store;
        let id = snapshot.instance.id;
        for task in store.list_tasks().await? {
            if task.process_instance_id == id {
                store.delete_task(task.id).await?;
            }
        }
        for execution in store.load_executions(id).await? {
            store.delete_execution(id, execution.id).await?;
        }
        store.delete_activities(id).await?;

        for task in &snapshot.tasks {
            store.save_task(task).await?;
        }
        for execution in &snapshot.executions {
            store.save_execution(execution).await?;
        }
        for activity in &snapshot.activities {
            store.save_activity(activity).await?;
        }
        if let Some(historic) = &snapshot.historic {
            store.save_historic_instance(historic).await?;
        }
        store.save_instance(&snapshot.instance).await?;
        Ok(())
    }

    /// Terminate end: drop every other token and open task.
    async fn terminate(&self, instance: &mut ProcessInstance, end_id: &str) -> EngineResult<()> {
        let store = &self.ctx.store;
        for task in store.list_tasks().await? {
            if task.process_instance_id == instance.id {
                store.delete_task(task.id).await?;
            }
        }
        for execution in store.load_executions(instance.id).await? {
            store.delete_execution(instance.id, execution.id).await?;
        }
        if self.history_enabled() {
            for activity in store.list_activities(Some(instance.id)).await? {
                if !activity.is_finished() {
                    self.finish_activity(Some(activity)).await?;
                }
            }
        }
        self.finish_instance(instance, InstanceState::Terminated, Some(end_id.to_string()))
            .await
    }

    async fn finish_instance(
        &self,
        instance: &mut ProcessInstance,
        state: InstanceState,
        end_activity_id: Option<String>,
    ) -> EngineResult<()> {
        let now = self.ctx.clock.now();
        instance.state = state;
        instance.ended_at = Some(now);
        self.ctx.store.save_instance(instance).await?;

        if self.history_enabled() {
            let historic = self
                .ctx
                .store
                .list_historic_instances()
                .await?
                .into_iter()
                .find(|h| h.id == instance.id);
            if let Some(mut historic) = historic {
                historic.end_time = Some(now);
                historic.end_activity_id = end_activity_id;
                self.ctx.store.save_historic_instance(&historic).await?;
            }
        }

        info!(
            instance_id = %instance.id,
            state = ?instance.state,
            "Process instance ended"
        );
        Ok(())
    }
}
