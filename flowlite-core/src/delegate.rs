use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::types::{VariableValue, Variables};

/// What a service task sees while it runs. Variable writes are merged back
/// into the process instance when the delegate returns `Ok`.
#[derive(Debug, Clone)]
pub struct DelegateExecution {
    pub process_instance_id: Uuid,
    pub process_definition_id: String,
    pub activity_id: String,
    pub variables: Variables,
}

impl DelegateExecution {
    pub fn get_variable(&self, name: &str) -> Option<&VariableValue> {
        self.variables.get(name)
    }

    pub fn set_variable(&mut self, name: impl Into<String>, value: impl Into<VariableValue>) {
        self.variables.insert(name.into(), value.into());
    }
}

/// Behaviour behind a `<serviceTask>`, looked up by the task's delegate name.
#[async_trait]
pub trait ServiceDelegate: Send + Sync {
    async fn execute(&self, execution: &mut DelegateExecution) -> anyhow::Result<()>;
}

/// Adapter so a plain closure can be registered as a delegate.
pub struct FnDelegate<F>(pub F);

#[async_trait]
impl<F> ServiceDelegate for FnDelegate<F>
where
    F: Fn(&mut DelegateExecution) -> anyhow::Result<()> + Send + Sync,
{
    async fn execute(&self, execution: &mut DelegateExecution) -> anyhow::Result<()> {
        (self.0)(execution)
    }
}

#[derive(Clone, Default)]
pub struct DelegateRegistry {
    delegates: HashMap<String, Arc<dyn ServiceDelegate>>,
}

impl fmt::Debug for DelegateRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.delegates.keys().collect();
        names.sort();
        f.debug_struct("DelegateRegistry")
            .field("delegates", &names)
            .finish()
    }
}

impl DelegateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, delegate: Arc<dyn ServiceDelegate>) {
        self.delegates.insert(name.into(), delegate);
    }

    pub fn register_fn<F>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(&mut DelegateExecution) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.register(name, Arc::new(FnDelegate(f)));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ServiceDelegate>> {
        self.delegates.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.delegates.contains_key(name)
    }
}
