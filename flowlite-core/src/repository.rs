//! Deployments and process definitions.

use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use crate::engine::EngineContext;
use crate::error::{EngineError, EngineResult};
use crate::parser::parse_bpmn_xml;
use crate::types::{Deployment, ProcessDefinition, ProcessModel};
use crate::validate::validate_model;

/// Resource suffixes that are parsed as BPMN on deploy.
const BPMN_SUFFIXES: &[&str] = &[".bpmn20.xml", ".bpmn"];

#[derive(Clone)]
pub struct RepositoryService {
    ctx: Arc<EngineContext>,
}

impl RepositoryService {
    pub(crate) fn new(ctx: Arc<EngineContext>) -> Self {
        Self { ctx }
    }

    pub fn create_deployment(&self) -> DeploymentBuilder {
        DeploymentBuilder {
            ctx: self.ctx.clone(),
            name: None,
            resources: Vec::new(),
        }
    }

    pub fn create_process_definition_query(&self) -> ProcessDefinitionQuery {
        ProcessDefinitionQuery {
            ctx: self.ctx.clone(),
            deployment_id: None,
            key: None,
            latest_version: false,
        }
    }

    pub async fn get_process_definition(&self, id: &str) -> EngineResult<ProcessDefinition> {
        self.ctx
            .store
            .load_definition(id)
            .await?
            .ok_or_else(|| EngineError::not_found("process definition", id))
    }

    pub async fn get_process_model(&self, definition_id: &str) -> EngineResult<ProcessModel> {
        self.ctx
            .store
            .load_model(definition_id)
            .await?
            .ok_or_else(|| EngineError::not_found("process definition", definition_id))
    }

    pub async fn get_deployment(&self, id: Uuid) -> EngineResult<Deployment> {
        self.ctx
            .store
            .load_deployment(id)
            .await?
            .ok_or_else(|| EngineError::not_found("deployment", id))
    }
}

/// Collects resources, then parses, validates and stores them in one go.
pub struct DeploymentBuilder {
    ctx: Arc<EngineContext>,
    name: Option<String>,
    resources: Vec<PendingResource>,
}

enum PendingResource {
    /// Resolved against the configured resource root on deploy.
    Classpath(String),
    Inline { name: String, content: String },
}

impl DeploymentBuilder {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Add a resource by path relative to the engine's resource root.
    pub fn add_classpath_resource(mut self, name: impl Into<String>) -> Self {
        self.resources.push(PendingResource::Classpath(name.into()));
        self
    }

    pub fn add_string(mut self, name: impl Into<String>, content: impl Into<String>) -> Self {
        self.resources.push(PendingResource::Inline {
            name: name.into(),
            content: content.into(),
        });
        self
    }

    pub async fn deploy(self) -> EngineResult<Deployment> {
        if self.resources.is_empty() {
            return Err(EngineError::Deployment(
                "deployment contains no resources".into(),
            ));
        }

        let mut loaded = Vec::with_capacity(self.resources.len());
        for resource in self.resources {
            loaded.push(match resource {
                PendingResource::Inline { name, content } => (name, content),
                PendingResource::Classpath(name) => {
                    let path = self.ctx.config.resource_root.join(&name);
                    let content = tokio::fs::read_to_string(&path).await.map_err(|e| {
                        EngineError::Deployment(format!(
                            "cannot read resource '{}': {e}",
                            path.display()
                        ))
                    })?;
                    (name, content)
                }
            });
        }

        // Parse and validate everything before storing anything.
        let mut parsed: Vec<(String, ProcessModel)> = Vec::new();
        for (name, content) in &loaded {
            if !BPMN_SUFFIXES.iter().any(|s| name.ends_with(s)) {
                warn!(resource = %name, "Resource is not BPMN; stored without parsing");
                continue;
            }
            let models = parse_bpmn_xml(content).map_err(|source| EngineError::Parse {
                resource: name.clone(),
                source,
            })?;
            for model in models {
                let errors = validate_model(&model);
                if !errors.is_empty() {
                    return Err(EngineError::Validation {
                        process: model.id.clone(),
                        errors,
                    });
                }
                if !model.executable {
                    info!(process = %model.id, "Skipping non-executable process");
                    continue;
                }
                parsed.push((name.clone(), model));
            }
        }

        let deployment = Deployment {
            id: Uuid::now_v7(),
            name: self.name,
            deployed_at: self.ctx.clock.now(),
            resources: loaded.into_iter().map(|(name, _)| name).collect(),
        };
        self.ctx.store.save_deployment(&deployment).await?;

        for (resource_name, model) in parsed {
            let version = self
                .ctx
                .store
                .latest_version(&model.id)
                .await?
                .map_or(1, |v| v + 1);
            let definition = ProcessDefinition {
                id: ProcessDefinition::make_id(&model.id, version, deployment.id),
                key: model.id.clone(),
                name: model.name.clone(),
                version,
                deployment_id: deployment.id,
                resource_name,
            };
            self.ctx.store.save_definition(&definition, &model).await?;
            info!(
                definition = %definition.id,
                name = definition.name.as_deref().unwrap_or(""),
                "Process definition deployed"
            );
        }

        Ok(deployment)
    }
}

pub struct ProcessDefinitionQuery {
    ctx: Arc<EngineContext>,
    deployment_id: Option<Uuid>,
    key: Option<String>,
    latest_version: bool,
}

impl ProcessDefinitionQuery {
    pub fn deployment_id(mut self, id: Uuid) -> Self {
        self.deployment_id = Some(id);
        self
    }

    pub fn process_definition_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Keep only the highest version of each key.
    pub fn latest_version(mut self) -> Self {
        self.latest_version = true;
        self
    }

    /// Matches ordered by key, then version.
    pub async fn list(self) -> EngineResult<Vec<ProcessDefinition>> {
        let mut defs: Vec<ProcessDefinition> = self
            .ctx
            .store
            .list_definitions()
            .await?
            .into_iter()
            .filter(|d| self.deployment_id.map_or(true, |id| d.deployment_id == id))
            .filter(|d| self.key.as_ref().map_or(true, |k| &d.key == k))
            .collect();
        defs.sort_by(|a, b| a.key.cmp(&b.key).then(a.version.cmp(&b.version)));

        if self.latest_version {
            let mut latest: Vec<ProcessDefinition> = Vec::new();
            for def in defs {
                match latest.last_mut() {
                    Some(last) if last.key == def.key => *last = def,
                    _ => latest.push(def),
                }
            }
            defs = latest;
        }
        Ok(defs)
    }

    pub async fn count(self) -> EngineResult<usize> {
        Ok(self.list().await?.len())
    }

    /// `Ok(None)` when nothing matches; an error when more than one does.
    pub async fn single_result(self) -> EngineResult<Option<ProcessDefinition>> {
        let mut defs = self.list().await?;
        match defs.len() {
            0 => Ok(None),
            1 => Ok(defs.pop()),
            count => Err(EngineError::NotUnique {
                kind: "process definition",
                count,
            }),
        }
    }
}
