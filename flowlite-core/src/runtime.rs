use std::sync::Arc;

use uuid::Uuid;

use crate::engine::EngineContext;
use crate::error::{EngineError, EngineResult};
use crate::types::{InstanceState, ProcessInstance, VariableValue, Variables};

#[derive(Clone)]
pub struct RuntimeService {
    ctx: Arc<EngineContext>,
}

impl RuntimeService {
    pub(crate) fn new(ctx: Arc<EngineContext>) -> Self {
        Self { ctx }
    }

    /// Start the latest version of the process with the given key.
    pub async fn start_process_instance_by_key(
        &self,
        key: &str,
        variables: Variables,
    ) -> EngineResult<ProcessInstance> {
        self.start(key, None, variables).await
    }

    pub async fn start_process_instance_by_key_and_business_key(
        &self,
        key: &str,
        business_key: impl Into<String>,
        variables: Variables,
    ) -> EngineResult<ProcessInstance> {
        self.start(key, Some(business_key.into()), variables).await
    }

    async fn start(
        &self,
        key: &str,
        business_key: Option<String>,
        variables: Variables,
    ) -> EngineResult<ProcessInstance> {
        let store = &self.ctx.store;
        let version = store
            .latest_version(key)
            .await?
            .ok_or_else(|| EngineError::not_found("process definition", key))?;
        let definition = store
            .list_definitions()
            .await?
            .into_iter()
            .find(|d| d.key == key && d.version == version)
            .ok_or_else(|| EngineError::not_found("process definition", key))?;
        let model = store
            .load_model(&definition.id)
            .await?
            .ok_or_else(|| EngineError::not_found("process definition", &definition.id))?;

        self.ctx
            .executor()
            .start(&definition, &model, business_key, variables)
            .await
    }

    pub async fn get_process_instance(&self, id: Uuid) -> EngineResult<Option<ProcessInstance>> {
        Ok(self.ctx.store.load_instance(id).await?)
    }

    pub async fn get_variables(&self, instance_id: Uuid) -> EngineResult<Variables> {
        Ok(self.load(instance_id).await?.variables)
    }

    pub async fn get_variable(
        &self,
        instance_id: Uuid,
        name: &str,
    ) -> EngineResult<Option<VariableValue>> {
        Ok(self.load(instance_id).await?.variables.remove(name))
    }

    pub async fn set_variable(
        &self,
        instance_id: Uuid,
        name: impl Into<String>,
        value: impl Into<VariableValue>,
    ) -> EngineResult<()> {
        let mut vars = Variables::new();
        vars.insert(name.into(), value.into());
        self.set_variables(instance_id, vars).await
    }

    pub async fn set_variables(&self, instance_id: Uuid, variables: Variables) -> EngineResult<()> {
        let mut instance = self.load(instance_id).await?;
        if instance.state.is_ended() {
            return Err(EngineError::InstanceEnded(instance_id));
        }
        instance.variables.extend(variables);
        self.ctx.store.save_instance(&instance).await?;
        Ok(())
    }

    pub fn create_process_instance_query(&self) -> ProcessInstanceQuery {
        ProcessInstanceQuery {
            ctx: self.ctx.clone(),
            key: None,
            business_key: None,
            active_only: false,
        }
    }

    async fn load(&self, id: Uuid) -> EngineResult<ProcessInstance> {
        self.ctx
            .store
            .load_instance(id)
            .await?
            .ok_or_else(|| EngineError::not_found("process instance", id))
    }
}

pub struct ProcessInstanceQuery {
    ctx: Arc<EngineContext>,
    key: Option<String>,
    business_key: Option<String>,
    active_only: bool,
}

impl ProcessInstanceQuery {
    pub fn process_definition_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn process_instance_business_key(mut self, business_key: impl Into<String>) -> Self {
        self.business_key = Some(business_key.into());
        self
    }

    pub fn active(mut self) -> Self {
        self.active_only = true;
        self
    }

    /// Matches ordered by start time.
    pub async fn list(self) -> EngineResult<Vec<ProcessInstance>> {
        let mut instances: Vec<ProcessInstance> = self
            .ctx
            .store
            .list_instances()
            .await?
            .into_iter()
            .filter(|i| self.key.as_ref().map_or(true, |k| &i.definition_key == k))
            .filter(|i| {
                self.business_key
                    .as_ref()
                    .map_or(true, |b| i.business_key.as_ref() == Some(b))
            })
            .filter(|i| !self.active_only || i.state == InstanceState::Active)
            .collect();
        instances.sort_by(|a, b| a.started_at.cmp(&b.started_at).then(a.id.cmp(&b.id)));
        Ok(instances)
    }

    pub async fn count(self) -> EngineResult<usize> {
        Ok(self.list().await?.len())
    }
}
