//! Engine error model.
//!
//! Services return [`EngineError`]; the store trait stays on `anyhow` and
//! its failures surface as [`EngineError::Store`].

use uuid::Uuid;

use crate::expr::ExprError;
use crate::parser::ParseError;
use crate::validate::ValidationError;

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Invalid engine configuration: {0}")]
    Config(String),

    #[error("Schema not present in store '{store}' and schema update policy is 'false'")]
    SchemaMissing { store: String },

    #[error("Failed to parse resource '{resource}': {source}")]
    Parse {
        resource: String,
        #[source]
        source: ParseError,
    },

    #[error("Process '{process}' is invalid: {}", format_validation(.errors))]
    Validation {
        process: String,
        errors: Vec<ValidationError>,
    },

    #[error("Deployment failed: {0}")]
    Deployment(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("Query expected a single {kind} but found {count}")]
    NotUnique { kind: &'static str, count: usize },

    #[error("Task {task_id} is already claimed by '{assignee}'")]
    TaskAlreadyClaimed { task_id: Uuid, assignee: String },

    #[error("Expression error at '{activity}': {source}")]
    Expression {
        activity: String,
        #[source]
        source: ExprError,
    },

    #[error("No outgoing sequence flow could be selected at '{0}'")]
    NoOutgoingFlow(String),

    #[error("Service task '{activity}' failed: {message}")]
    Delegate { activity: String, message: String },

    #[error("Process instance {instance_id} exceeded {limit} steps without reaching a wait state")]
    StepLimit { instance_id: Uuid, limit: usize },

    #[error("Process instance {0} has already ended")]
    InstanceEnded(Uuid),

    #[error("Store error: {0}")]
    Store(#[from] anyhow::Error),
}

impl EngineError {
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        EngineError::NotFound {
            kind,
            id: id.to_string(),
        }
    }
}

fn format_validation(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
