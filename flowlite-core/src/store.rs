use crate::types::*;
use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

/// Persistence trait for all engine state.
///
/// Services operate exclusively through this trait, so the in-memory
/// backend can be swapped without touching execution logic. Every method
/// other than the schema ones fails until `create_schema` has run.
#[async_trait]
pub trait ProcessStore: Send + Sync {
    /// Human-readable store name (used in diagnostics).
    fn name(&self) -> &str;

    // ── Schema ──

    async fn create_schema(&self) -> Result<()>;
    async fn drop_schema(&self) -> Result<()>;
    async fn schema_exists(&self) -> Result<bool>;

    // ── Deployments & definitions ──

    async fn save_deployment(&self, deployment: &Deployment) -> Result<()>;
    async fn load_deployment(&self, id: Uuid) -> Result<Option<Deployment>>;
    async fn save_definition(
        &self,
        definition: &ProcessDefinition,
        model: &ProcessModel,
    ) -> Result<()>;
    async fn load_definition(&self, id: &str) -> Result<Option<ProcessDefinition>>;
    async fn load_model(&self, definition_id: &str) -> Result<Option<ProcessModel>>;
    async fn list_definitions(&self) -> Result<Vec<ProcessDefinition>>;
    /// Highest deployed version of `key`, if any.
    async fn latest_version(&self, key: &str) -> Result<Option<u32>>;

    // ── Instances ──

    async fn save_instance(&self, instance: &ProcessInstance) -> Result<()>;
    async fn load_instance(&self, id: Uuid) -> Result<Option<ProcessInstance>>;
    async fn list_instances(&self) -> Result<Vec<ProcessInstance>>;

    // ── Executions ──

    async fn save_execution(&self, execution: &Execution) -> Result<()>;
    async fn delete_execution(&self, instance_id: Uuid, execution_id: Uuid) -> Result<()>;
    async fn load_executions(&self, instance_id: Uuid) -> Result<Vec<Execution>>;

    // ── Tasks ──

    async fn save_task(&self, task: &Task) -> Result<()>;
    async fn load_task(&self, id: Uuid) -> Result<Option<Task>>;
    async fn delete_task(&self, id: Uuid) -> Result<()>;
    async fn list_tasks(&self) -> Result<Vec<Task>>;

    // ── History ──

    /// Insert or replace by id.
    async fn save_activity(&self, activity: &HistoricActivityInstance) -> Result<()>;
    /// All activity records, or those of one instance. Insertion order.
    async fn list_activities(
        &self,
        instance_id: Option<Uuid>,
    ) -> Result<Vec<HistoricActivityInstance>>;
    /// Remove every activity record of one instance.
    async fn delete_activities(&self, instance_id: Uuid) -> Result<()>;
    async fn save_historic_instance(&self, instance: &HistoricProcessInstance) -> Result<()>;
    async fn list_historic_instances(&self) -> Result<Vec<HistoricProcessInstance>>;
}
