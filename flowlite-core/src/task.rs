//! Human tasks: querying, variables, claiming and completion.

use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use crate::engine::EngineContext;
use crate::error::{EngineError, EngineResult};
use crate::types::{Task, VariableValue, Variables};

#[derive(Clone)]
pub struct TaskService {
    ctx: Arc<EngineContext>,
}

impl TaskService {
    pub(crate) fn new(ctx: Arc<EngineContext>) -> Self {
        Self { ctx }
    }

    pub fn create_task_query(&self) -> TaskQuery {
        TaskQuery {
            ctx: self.ctx.clone(),
            candidate_group: None,
            candidate_user: None,
            assignee: None,
            process_instance_id: None,
            task_definition_key: None,
        }
    }

    pub async fn get_task(&self, task_id: Uuid) -> EngineResult<Task> {
        self.ctx
            .store
            .load_task(task_id)
            .await?
            .ok_or_else(|| EngineError::not_found("task", task_id))
    }

    /// Process variables with the task's local variables laid over them.
    pub async fn get_variables(&self, task_id: Uuid) -> EngineResult<Variables> {
        let task = self.get_task(task_id).await?;
        let instance = self
            .ctx
            .store
            .load_instance(task.process_instance_id)
            .await?
            .ok_or_else(|| EngineError::not_found("process instance", task.process_instance_id))?;
        let mut vars = instance.variables;
        vars.extend(task.local_variables);
        Ok(vars)
    }

    pub async fn get_variable(
        &self,
        task_id: Uuid,
        name: &str,
    ) -> EngineResult<Option<VariableValue>> {
        Ok(self.get_variables(task_id).await?.remove(name))
    }

    /// Set a variable on the task's process instance.
    pub async fn set_variable(
        &self,
        task_id: Uuid,
        name: impl Into<String>,
        value: impl Into<VariableValue>,
    ) -> EngineResult<()> {
        let task = self.get_task(task_id).await?;
        let mut instance = self
            .ctx
            .store
            .load_instance(task.process_instance_id)
            .await?
            .ok_or_else(|| EngineError::not_found("process instance", task.process_instance_id))?;
        instance.variables.insert(name.into(), value.into());
        self.ctx.store.save_instance(&instance).await?;
        Ok(())
    }

    /// Set a variable visible only through this task. Dropped on completion.
    pub async fn set_variable_local(
        &self,
        task_id: Uuid,
        name: impl Into<String>,
        value: impl Into<VariableValue>,
    ) -> EngineResult<()> {
        let mut task = self.get_task(task_id).await?;
        task.local_variables.insert(name.into(), value.into());
        self.ctx.store.save_task(&task).await?;
        Ok(())
    }

    pub async fn claim(&self, task_id: Uuid, user: impl Into<String>) -> EngineResult<()> {
        let user = user.into();
        let mut task = self.get_task(task_id).await?;
        if let Some(current) = &task.assignee {
            if current != &user {
                return Err(EngineError::TaskAlreadyClaimed {
                    task_id,
                    assignee: current.clone(),
                });
            }
            return Ok(());
        }
        task.assignee = Some(user.clone());
        self.ctx.store.save_task(&task).await?;
        info!(task_id = %task_id, user = %user, "Task claimed");
        Ok(())
    }

    pub async fn unclaim(&self, task_id: Uuid) -> EngineResult<()> {
        let mut task = self.get_task(task_id).await?;
        task.assignee = None;
        self.ctx.store.save_task(&task).await?;
        Ok(())
    }

    /// Complete the task, merge `variables` into the process and move on.
    /// If the walk that follows fails, the task, its instance and their
    /// history are put back as they were and the error is returned.
    pub async fn complete(&self, task_id: Uuid, variables: Variables) -> EngineResult<()> {
        let task = self.get_task(task_id).await?;
        let store = &self.ctx.store;

        let mut instance = store
            .load_instance(task.process_instance_id)
            .await?
            .ok_or_else(|| EngineError::not_found("process instance", task.process_instance_id))?;
        if instance.state.is_ended() {
            return Err(EngineError::InstanceEnded(instance.id));
        }
        let model = store
            .load_model(&task.process_definition_id)
            .await?
            .ok_or_else(|| EngineError::not_found("process definition", &task.process_definition_id))?;

        instance.variables.extend(variables);

        let executor = self.ctx.executor();
        let snapshot = executor.snapshot(instance.id).await?;
        store.delete_task(task.id).await?;
        store
            .delete_execution(instance.id, task.execution_id)
            .await?;
        executor.finish_task_activity(&task).await?;

        info!(task_id = %task.id, task = %task.name, "Task completed");
        let resumed = executor
            .resume(
                &mut instance,
                &model,
                task.execution_id,
                &task.task_definition_key,
            )
            .await;
        if let Err(err) = resumed {
            warn!(task_id = %task.id, error = %err, "Task completion rolled back");
            executor.restore(snapshot).await?;
            return Err(err);
        }
        Ok(())
    }
}

pub struct TaskQuery {
    ctx: Arc<EngineContext>,
    candidate_group: Option<String>,
    candidate_user: Option<String>,
    assignee: Option<String>,
    process_instance_id: Option<Uuid>,
    task_definition_key: Option<String>,
}

impl TaskQuery {
    /// Unassigned tasks offered to `group`.
    pub fn task_candidate_group(mut self, group: impl Into<String>) -> Self {
        self.candidate_group = Some(group.into());
        self
    }

    /// Tasks `user` may work on: offered to them directly or assigned to them.
    pub fn task_candidate_user(mut self, user: impl Into<String>) -> Self {
        self.candidate_user = Some(user.into());
        self
    }

    pub fn task_assignee(mut self, user: impl Into<String>) -> Self {
        self.assignee = Some(user.into());
        self
    }

    pub fn process_instance_id(mut self, id: Uuid) -> Self {
        self.process_instance_id = Some(id);
        self
    }

    pub fn task_definition_key(mut self, key: impl Into<String>) -> Self {
        self.task_definition_key = Some(key.into());
        self
    }

    fn matches(&self, task: &Task) -> bool {
        if let Some(group) = &self.candidate_group {
            if task.assignee.is_some() || !task.candidate_groups.contains(group) {
                return false;
            }
        }
        if let Some(user) = &self.candidate_user {
            let offered = task.assignee.is_none() && task.candidate_users.contains(user);
            if !offered && task.assignee.as_ref() != Some(user) {
                return false;
            }
        }
        if let Some(assignee) = &self.assignee {
            if task.assignee.as_ref() != Some(assignee) {
                return false;
            }
        }
        if let Some(id) = self.process_instance_id {
            if task.process_instance_id != id {
                return false;
            }
        }
        if let Some(key) = &self.task_definition_key {
            if &task.task_definition_key != key {
                return false;
            }
        }
        true
    }

    /// Matches ordered by creation time, then id.
    pub async fn list(self) -> EngineResult<Vec<Task>> {
        let mut tasks: Vec<Task> = self
            .ctx
            .store
            .list_tasks()
            .await?
            .into_iter()
            .filter(|t| self.matches(t))
            .collect();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(tasks)
    }

    pub async fn count(self) -> EngineResult<usize> {
        Ok(self.list().await?.len())
    }

    pub async fn single_result(self) -> EngineResult<Option<Task>> {
        let mut tasks = self.list().await?;
        match tasks.len() {
            0 => Ok(None),
            1 => Ok(tasks.pop()),
            count => Err(EngineError::NotUnique { kind: "task", count }),
        }
    }
}
