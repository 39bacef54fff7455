use crate::store::ProcessStore;
use crate::types::*;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct Tables {
    deployments: HashMap<Uuid, Deployment>,
    definitions: BTreeMap<String, (ProcessDefinition, ProcessModel)>,
    instances: BTreeMap<Uuid, ProcessInstance>,
    executions: HashMap<Uuid, Vec<Execution>>,
    tasks: BTreeMap<Uuid, Task>,
    activities: Vec<HistoricActivityInstance>,
    historic_instances: BTreeMap<Uuid, HistoricProcessInstance>,
}

/// In-memory [`ProcessStore`]. State lives as long as the store value, the
/// equivalent of an in-memory database kept open for the process lifetime.
pub struct MemoryStore {
    name: String,
    tables: RwLock<Option<Tables>>,
}

impl MemoryStore {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tables: RwLock::new(None),
        }
    }

    /// A store whose schema already exists.
    pub fn with_schema(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tables: RwLock::new(Some(Tables::default())),
        }
    }

    fn missing_schema(&self) -> anyhow::Error {
        anyhow!("schema not initialised in store '{}'", self.name)
    }
}

/// Run `$body` with `$t` bound to the tables, read-locked.
macro_rules! with_read {
    ($self:ident, $t:ident => $body:expr) => {{
        let guard = $self.tables.read().await;
        let $t = guard.as_ref().ok_or_else(|| $self.missing_schema())?;
        Ok($body)
    }};
}

/// Run `$body` with `$t` bound to the tables, write-locked.
macro_rules! with_write {
    ($self:ident, $t:ident => $body:expr) => {{
        let mut guard = $self.tables.write().await;
        let $t = guard.as_mut().ok_or_else(|| $self.missing_schema())?;
        Ok($body)
    }};
}

#[async_trait]
impl ProcessStore for MemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn create_schema(&self) -> Result<()> {
        let mut guard = self.tables.write().await;
        if guard.is_none() {
            *guard = Some(Tables::default());
        }
        Ok(())
    }

    async fn drop_schema(&self) -> Result<()> {
        *self.tables.write().await = None;
        Ok(())
    }

    async fn schema_exists(&self) -> Result<bool> {
        Ok(self.tables.read().await.is_some())
    }

    async fn save_deployment(&self, deployment: &Deployment) -> Result<()> {
        with_write!(self, t => {
            t.deployments.insert(deployment.id, deployment.clone());
        })
    }

    async fn load_deployment(&self, id: Uuid) -> Result<Option<Deployment>> {
        with_read!(self, t => t.deployments.get(&id).cloned())
    }

    async fn save_definition(
        &self,
        definition: &ProcessDefinition,
        model: &ProcessModel,
    ) -> Result<()> {
        with_write!(self, t => {
            t.definitions
                .insert(definition.id.clone(), (definition.clone(), model.clone()));
        })
    }

    async fn load_definition(&self, id: &str) -> Result<Option<ProcessDefinition>> {
        with_read!(self, t => t.definitions.get(id).map(|(d, _)| d.clone()))
    }

    async fn load_model(&self, definition_id: &str) -> Result<Option<ProcessModel>> {
        with_read!(self, t => t.definitions.get(definition_id).map(|(_, m)| m.clone()))
    }

    async fn list_definitions(&self) -> Result<Vec<ProcessDefinition>> {
        with_read!(self, t => t.definitions.values().map(|(d, _)| d.clone()).collect())
    }

    async fn latest_version(&self, key: &str) -> Result<Option<u32>> {
        with_read!(self, t => t
            .definitions
            .values()
            .filter(|(d, _)| d.key == key)
            .map(|(d, _)| d.version)
            .max())
    }

    async fn save_instance(&self, instance: &ProcessInstance) -> Result<()> {
        with_write!(self, t => {
            t.instances.insert(instance.id, instance.clone());
        })
    }

    async fn load_instance(&self, id: Uuid) -> Result<Option<ProcessInstance>> {
        with_read!(self, t => t.instances.get(&id).cloned())
    }

    async fn list_instances(&self) -> Result<Vec<ProcessInstance>> {
        with_read!(self, t => t.instances.values().cloned().collect())
    }

    async fn save_execution(&self, execution: &Execution) -> Result<()> {
        with_write!(self, t => {
            let list = t.executions.entry(execution.instance_id).or_default();
            match list.iter_mut().find(|e| e.id == execution.id) {
                Some(existing) => *existing = execution.clone(),
                None => list.push(execution.clone()),
            }
        })
    }

    async fn delete_execution(&self, instance_id: Uuid, execution_id: Uuid) -> Result<()> {
        with_write!(self, t => {
            if let Some(list) = t.executions.get_mut(&instance_id) {
                list.retain(|e| e.id != execution_id);
            }
        })
    }

    async fn load_executions(&self, instance_id: Uuid) -> Result<Vec<Execution>> {
        with_read!(self, t => t.executions.get(&instance_id).cloned().unwrap_or_default())
    }

    async fn save_task(&self, task: &Task) -> Result<()> {
        with_write!(self, t => {
            t.tasks.insert(task.id, task.clone());
        })
    }

    async fn load_task(&self, id: Uuid) -> Result<Option<Task>> {
        with_read!(self, t => t.tasks.get(&id).cloned())
    }

    async fn delete_task(&self, id: Uuid) -> Result<()> {
        with_write!(self, t => {
            t.tasks.remove(&id);
        })
    }

    async fn list_tasks(&self) -> Result<Vec<Task>> {
        with_read!(self, t => t.tasks.values().cloned().collect())
    }

    async fn save_activity(&self, activity: &HistoricActivityInstance) -> Result<()> {
        with_write!(self, t => {
            match t.activities.iter_mut().find(|a| a.id == activity.id) {
                Some(existing) => *existing = activity.clone(),
                None => t.activities.push(activity.clone()),
            }
        })
    }

    async fn list_activities(
        &self,
        instance_id: Option<Uuid>,
    ) -> Result<Vec<HistoricActivityInstance>> {
        with_read!(self, t => t
            .activities
            .iter()
            .filter(|a| instance_id.map_or(true, |id| a.process_instance_id == id))
            .cloned()
            .collect())
    }

    async fn delete_activities(&self, instance_id: Uuid) -> Result<()> {
        with_write!(self, t => {
            t.activities.retain(|a| a.process_instance_id != instance_id);
        })
    }

    async fn save_historic_instance(&self, instance: &HistoricProcessInstance) -> Result<()> {
        with_write!(self, t => {
            t.historic_instances.insert(instance.id, instance.clone());
        })
    }

    async fn list_historic_instances(&self) -> Result<Vec<HistoricProcessInstance>> {
        with_read!(self, t => t.historic_instances.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn execution(instance_id: Uuid, node: &str) -> Execution {
        Execution {
            id: Uuid::now_v7(),
            instance_id,
            node_id: node.into(),
        }
    }

    #[tokio::test]
    async fn test_requires_schema() {
        let store = MemoryStore::new("test");
        assert!(!store.schema_exists().await.unwrap());
        let err = store.list_tasks().await.unwrap_err();
        assert!(err.to_string().contains("schema not initialised"));

        store.create_schema().await.unwrap();
        assert!(store.list_tasks().await.unwrap().is_empty());

        store.drop_schema().await.unwrap();
        assert!(store.load_instance(Uuid::now_v7()).await.is_err());
    }

    #[tokio::test]
    async fn test_create_schema_is_idempotent() {
        let store = MemoryStore::with_schema("test");
        let deployment = Deployment {
            id: Uuid::now_v7(),
            name: None,
            deployed_at: Utc::now(),
            resources: vec![],
        };
        store.save_deployment(&deployment).await.unwrap();
        store.create_schema().await.unwrap();
        assert!(store.load_deployment(deployment.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_execution_upsert_and_delete() {
        let store = MemoryStore::with_schema("test");
        let instance_id = Uuid::now_v7();
        let mut exec = execution(instance_id, "a");
        store.save_execution(&exec).await.unwrap();
        exec.node_id = "b".into();
        store.save_execution(&exec).await.unwrap();
        store
            .save_execution(&execution(instance_id, "c"))
            .await
            .unwrap();

        let list = store.load_executions(instance_id).await.unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].node_id, "b");

        store.delete_execution(instance_id, exec.id).await.unwrap();
        let list = store.load_executions(instance_id).await.unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].node_id, "c");
    }

    #[tokio::test]
    async fn test_delete_activities_only_touches_one_instance() {
        let store = MemoryStore::with_schema("test");
        let (keep, drop) = (Uuid::now_v7(), Uuid::now_v7());
        for instance_id in [keep, drop, keep] {
            store
                .save_activity(&HistoricActivityInstance {
                    id: Uuid::now_v7(),
                    process_instance_id: instance_id,
                    process_definition_id: "p:1:x".into(),
                    activity_id: "a".into(),
                    activity_name: None,
                    activity_type: "userTask".into(),
                    execution_id: Uuid::now_v7(),
                    task_id: None,
                    assignee: None,
                    start_time: Utc::now(),
                    end_time: None,
                })
                .await
                .unwrap();
        }

        store.delete_activities(drop).await.unwrap();
        assert!(store.list_activities(Some(drop)).await.unwrap().is_empty());
        assert_eq!(store.list_activities(None).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_latest_version() {
        let store = MemoryStore::with_schema("test");
        let model = ProcessModel {
            id: "k".into(),
            name: None,
            executable: true,
            nodes: BTreeMap::new(),
            flows: vec![],
        };
        assert_eq!(store.latest_version("k").await.unwrap(), None);
        for version in [1, 2] {
            let deployment_id = Uuid::now_v7();
            let def = ProcessDefinition {
                id: ProcessDefinition::make_id("k", version, deployment_id),
                key: "k".into(),
                name: None,
                version,
                deployment_id,
                resource_name: "k.bpmn".into(),
            };
            store.save_definition(&def, &model).await.unwrap();
        }
        assert_eq!(store.latest_version("k").await.unwrap(), Some(2));
        assert_eq!(store.latest_version("other").await.unwrap(), None);
    }
}
