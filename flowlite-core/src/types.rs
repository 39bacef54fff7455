use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

// ─── Variables ────────────────────────────────────────────────

/// A process or task variable. Deliberately small: anything richer belongs
/// in an external store and travels here as a string reference.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VariableValue {
    Null,
    Bool(bool),
    Integer(i64),
    Double(f64),
    String(String),
}

/// Named variable bag. Ordered so snapshots and debug output are stable.
pub type Variables = BTreeMap<String, VariableValue>;

impl VariableValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            VariableValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            VariableValue::Integer(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            VariableValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            VariableValue::Null => "null",
            VariableValue::Bool(_) => "boolean",
            VariableValue::Integer(_) => "integer",
            VariableValue::Double(_) => "double",
            VariableValue::String(_) => "string",
        }
    }
}

impl fmt::Display for VariableValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VariableValue::Null => write!(f, "null"),
            VariableValue::Bool(b) => write!(f, "{b}"),
            VariableValue::Integer(n) => write!(f, "{n}"),
            VariableValue::Double(d) => write!(f, "{d}"),
            VariableValue::String(s) => write!(f, "{s}"),
        }
    }
}

impl From<bool> for VariableValue {
    fn from(v: bool) -> Self {
        VariableValue::Bool(v)
    }
}

impl From<i64> for VariableValue {
    fn from(v: i64) -> Self {
        VariableValue::Integer(v)
    }
}

impl From<i32> for VariableValue {
    fn from(v: i32) -> Self {
        VariableValue::Integer(v.into())
    }
}

impl From<u32> for VariableValue {
    fn from(v: u32) -> Self {
        VariableValue::Integer(v.into())
    }
}

impl From<f64> for VariableValue {
    fn from(v: f64) -> Self {
        VariableValue::Double(v)
    }
}

impl From<&str> for VariableValue {
    fn from(v: &str) -> Self {
        VariableValue::String(v.to_string())
    }
}

impl From<String> for VariableValue {
    fn from(v: String) -> Self {
        VariableValue::String(v)
    }
}

// ─── Process model (parsed BPMN) ──────────────────────────────

/// Executable graph of one `<process>` element.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProcessModel {
    /// The `id` attribute; becomes the process definition key.
    pub id: String,
    pub name: Option<String>,
    pub executable: bool,
    pub nodes: BTreeMap<String, Node>,
    /// Sequence flows in document order. Exclusive gateways evaluate
    /// outgoing flows in this order.
    pub flows: Vec<SequenceFlow>,
}

impl ProcessModel {
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn outgoing(&self, node_id: &str) -> Vec<&SequenceFlow> {
        self.flows.iter().filter(|f| f.source == node_id).collect()
    }

    pub fn incoming(&self, node_id: &str) -> Vec<&SequenceFlow> {
        self.flows.iter().filter(|f| f.target == node_id).collect()
    }

    pub fn start_events(&self) -> Vec<&Node> {
        self.nodes
            .values()
            .filter(|n| matches!(n.kind, NodeKind::StartEvent))
            .collect()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub name: Option<String>,
    pub kind: NodeKind,
}

impl Node {
    /// Display name, falling back to the id.
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub enum NodeKind {
    StartEvent,
    EndEvent {
        terminate: bool,
    },
    UserTask {
        /// Literal user id or `${...}` expression.
        assignee: Option<String>,
        candidate_users: Vec<String>,
        candidate_groups: Vec<String>,
    },
    ServiceTask {
        /// Name the delegate is registered under.
        delegate: String,
    },
    ExclusiveGateway {
        default_flow: Option<String>,
    },
    ParallelGateway,
}

impl NodeKind {
    /// BPMN element name, as recorded in activity history.
    pub fn activity_type(&self) -> &'static str {
        match self {
            NodeKind::StartEvent => "startEvent",
            NodeKind::EndEvent { .. } => "endEvent",
            NodeKind::UserTask { .. } => "userTask",
            NodeKind::ServiceTask { .. } => "serviceTask",
            NodeKind::ExclusiveGateway { .. } => "exclusiveGateway",
            NodeKind::ParallelGateway => "parallelGateway",
        }
    }

    pub fn is_gateway(&self) -> bool {
        matches!(
            self,
            NodeKind::ExclusiveGateway { .. } | NodeKind::ParallelGateway
        )
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SequenceFlow {
    pub id: String,
    pub source: String,
    pub target: String,
    /// Raw condition text, e.g. `${approved}`.
    pub condition: Option<String>,
}

// ─── Repository ───────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Deployment {
    pub id: Uuid,
    pub name: Option<String>,
    pub deployed_at: DateTime<Utc>,
    pub resources: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProcessDefinition {
    /// `<key>:<version>:<deployment id>`.
    pub id: String,
    pub key: String,
    pub name: Option<String>,
    pub version: u32,
    pub deployment_id: Uuid,
    pub resource_name: String,
}

impl ProcessDefinition {
    pub fn make_id(key: &str, version: u32, deployment_id: Uuid) -> String {
        format!("{key}:{version}:{deployment_id}")
    }
}

// ─── Runtime ──────────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum InstanceState {
    Active,
    Completed,
    Terminated,
}

impl InstanceState {
    pub fn is_ended(&self) -> bool {
        !matches!(self, InstanceState::Active)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProcessInstance {
    pub id: Uuid,
    pub definition_id: String,
    pub definition_key: String,
    pub business_key: Option<String>,
    pub variables: Variables,
    pub state: InstanceState,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

/// A token parked inside an instance: at a user task, or waiting at a
/// parallel join for its sibling branches.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Execution {
    pub id: Uuid,
    pub instance_id: Uuid,
    pub node_id: String,
}

// ─── Tasks ────────────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub name: String,
    /// Id of the user task element that created this task.
    pub task_definition_key: String,
    pub process_instance_id: Uuid,
    pub process_definition_id: String,
    pub execution_id: Uuid,
    pub assignee: Option<String>,
    pub candidate_users: Vec<String>,
    pub candidate_groups: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub local_variables: Variables,
}

// ─── History ──────────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HistoricActivityInstance {
    pub id: Uuid,
    pub process_instance_id: Uuid,
    pub process_definition_id: String,
    pub activity_id: String,
    pub activity_name: Option<String>,
    pub activity_type: String,
    pub execution_id: Uuid,
    pub task_id: Option<Uuid>,
    pub assignee: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
}

impl HistoricActivityInstance {
    pub fn is_finished(&self) -> bool {
        self.end_time.is_some()
    }

    pub fn duration_in_millis(&self) -> Option<i64> {
        self.end_time
            .map(|end| (end - self.start_time).num_milliseconds())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HistoricProcessInstance {
    pub id: Uuid,
    pub process_definition_id: String,
    pub business_key: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub end_activity_id: Option<String>,
}

impl HistoricProcessInstance {
    pub fn duration_in_millis(&self) -> Option<i64> {
        self.end_time
            .map(|end| (end - self.start_time).num_milliseconds())
    }
}
