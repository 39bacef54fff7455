use std::collections::HashSet;

use crate::expr::parse_expression;
use crate::types::{NodeKind, ProcessModel};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("[{rule}] {message}")]
pub struct ValidationError {
    pub rule: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(rule: &str, message: impl Into<String>) -> Self {
        Self {
            rule: rule.to_string(),
            message: message.into(),
        }
    }
}

/// Validate a parsed process before it is deployed. Returns all errors found.
pub fn validate_model(model: &ProcessModel) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    // V1: Flow ids must not collide with node ids
    let mut seen: HashSet<&str> = model.nodes.keys().map(String::as_str).collect();
    for flow in &model.flows {
        if !seen.insert(flow.id.as_str()) {
            errors.push(ValidationError::new(
                "V1",
                format!("Sequence flow id '{}' is already used", flow.id),
            ));
        }
    }

    // V2: Flow endpoints must exist
    for flow in &model.flows {
        for (end, node_id) in [("source", &flow.source), ("target", &flow.target)] {
            if !model.nodes.contains_key(node_id) {
                errors.push(ValidationError::new(
                    "V2",
                    format!(
                        "Sequence flow '{}' has unknown {end} '{node_id}'",
                        flow.id
                    ),
                ));
            }
        }
    }

    // V3: Exactly one start event
    let starts = model.start_events();
    if starts.len() != 1 {
        errors.push(ValidationError::new(
            "V3",
            format!("Expected exactly one start event, found {}", starts.len()),
        ));
    }

    // V4: At least one end event
    if !model
        .nodes
        .values()
        .any(|n| matches!(n.kind, NodeKind::EndEvent { .. }))
    {
        errors.push(ValidationError::new("V4", "Process has no end event"));
    }

    // V5: Everything except end events must lead somewhere
    for node in model.nodes.values() {
        if !matches!(node.kind, NodeKind::EndEvent { .. }) && model.outgoing(&node.id).is_empty() {
            errors.push(ValidationError::new(
                "V5",
                format!("Node '{}' has no outgoing sequence flow", node.id),
            ));
        }
    }

    // V6: Gateway default must be one of its own outgoing flows
    for node in model.nodes.values() {
        if let NodeKind::ExclusiveGateway {
            default_flow: Some(default),
        } = &node.kind
        {
            let owned = model.outgoing(&node.id).iter().any(|f| &f.id == default);
            if !owned {
                errors.push(ValidationError::new(
                    "V6",
                    format!(
                        "Default flow '{default}' is not an outgoing flow of gateway '{}'",
                        node.id
                    ),
                ));
            }
        }
    }

    // V7: Conditions must parse
    for flow in &model.flows {
        if let Some(cond) = &flow.condition {
            if let Err(e) = parse_expression(cond) {
                errors.push(ValidationError::new(
                    "V7",
                    format!("Condition on '{}' does not parse: {e}", flow.id),
                ));
            }
        }
    }

    // V8: Nothing flows back into the start event
    for start in &starts {
        if !model.incoming(&start.id).is_empty() {
            errors.push(ValidationError::new(
                "V8",
                format!("Start event '{}' has incoming sequence flows", start.id),
            ));
        }
    }

    errors
}
