//! BPMN 2.0 XML → [`ProcessModel`].
//!
//! Namespace prefixes are ignored (`bpmn:process`, `bpmn2:process` and
//! `process` are the same element) and extension attributes are matched on
//! their local name, so `flowable:candidateGroups`, `activiti:candidateGroups`
//! and `camunda:candidateGroups` all work.
//!
//! Only the element set the executor understands is accepted. Any other
//! flow node inside a `<process>` is rejected with [`ParseError::Unsupported`]
//! instead of being silently skipped.

use std::collections::BTreeMap;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::types::{Node, NodeKind, ProcessModel, SequenceFlow};

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("Malformed XML at byte {position}: {message}")]
    Xml { position: u64, message: String },

    #[error("<{element}> is missing required attribute '{attribute}'")]
    MissingAttribute {
        element: &'static str,
        attribute: &'static str,
    },

    #[error("Unsupported BPMN element <{element}> (id '{id}')")]
    Unsupported { element: String, id: String },

    #[error("Duplicate element id '{0}'")]
    DuplicateId(String),

    #[error("Document contains no <process> element")]
    NoProcess,
}

/// Flow-node elements that are valid BPMN but not executable here.
const UNSUPPORTED_NODES: &[&str] = &[
    "task",
    "manualTask",
    "scriptTask",
    "sendTask",
    "receiveTask",
    "businessRuleTask",
    "callActivity",
    "subProcess",
    "transaction",
    "inclusiveGateway",
    "complexGateway",
    "eventBasedGateway",
    "intermediateCatchEvent",
    "intermediateThrowEvent",
    "boundaryEvent",
];

/// Parse every `<process>` in a BPMN document.
pub fn parse_bpmn_xml(xml: &str) -> Result<Vec<ProcessModel>, ParseError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut builder = DocumentBuilder::default();

    loop {
        let position = reader.buffer_position() as u64;
        let event = reader.read_event().map_err(|e| ParseError::Xml {
            position,
            message: e.to_string(),
        })?;

        match event {
            Event::Start(e) => {
                let name = local_name(&e);
                builder.open(&name, &e, position)?;
                builder.stack.push(name);
            }
            Event::Empty(e) => {
                let name = local_name(&e);
                builder.open(&name, &e, position)?;
                builder.close(&name)?;
            }
            Event::End(_) => {
                if let Some(name) = builder.stack.pop() {
                    builder.close(&name)?;
                }
            }
            Event::Text(t) => {
                if let Some(buf) = builder.condition_text.as_mut() {
                    let text = t.unescape().map_err(|e| ParseError::Xml {
                        position,
                        message: e.to_string(),
                    })?;
                    buf.push_str(&text);
                }
            }
            Event::CData(c) => {
                if let Some(buf) = builder.condition_text.as_mut() {
                    buf.push_str(&String::from_utf8_lossy(&c));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if builder.processes.is_empty() {
        return Err(ParseError::NoProcess);
    }
    Ok(builder.processes)
}

fn local_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).into_owned()
}

/// Attribute lookup by local name.
fn attr(e: &BytesStart<'_>, name: &str, position: u64) -> Result<Option<String>, ParseError> {
    for a in e.attributes() {
        let a = a.map_err(|err| ParseError::Xml {
            position,
            message: err.to_string(),
        })?;
        if a.key.local_name().as_ref() == name.as_bytes() {
            let value = a.unescape_value().map_err(|err| ParseError::Xml {
                position,
                message: err.to_string(),
            })?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}

fn split_list(value: Option<String>) -> Vec<String> {
    value
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// `org.example.CallExternalSystemDelegate` → `CallExternalSystemDelegate`,
/// `${mailer}` → `mailer`.
fn delegate_name(raw: &str) -> String {
    let raw = raw.trim();
    let inner = raw
        .strip_prefix("${")
        .or_else(|| raw.strip_prefix("#{"))
        .and_then(|r| r.strip_suffix('}'))
        .unwrap_or(raw);
    inner.rsplit('.').next().unwrap_or(inner).to_string()
}

#[derive(Default)]
struct DocumentBuilder {
    stack: Vec<String>,
    processes: Vec<ProcessModel>,
    current: Option<ProcessModel>,
    pending_node: Option<Node>,
    pending_flow: Option<SequenceFlow>,
    condition_text: Option<String>,
}

impl DocumentBuilder {
    fn in_process(&self) -> bool {
        self.current.is_some() && self.stack.last().map(String::as_str) == Some("process")
    }

    fn open(&mut self, name: &str, e: &BytesStart<'_>, pos: u64) -> Result<(), ParseError> {
        if name == "process" && self.current.is_none() {
            let id = attr(e, "id", pos)?.ok_or(ParseError::MissingAttribute {
                element: "process",
                attribute: "id",
            })?;
            let executable = attr(e, "isExecutable", pos)?
                .map(|v| v != "false")
                .unwrap_or(true);
            self.current = Some(ProcessModel {
                id,
                name: attr(e, "name", pos)?,
                executable,
                nodes: BTreeMap::new(),
                flows: Vec::new(),
            });
            return Ok(());
        }

        if name == "terminateEventDefinition" {
            if let Some(Node {
                kind: NodeKind::EndEvent { terminate },
                ..
            }) = self.pending_node.as_mut()
            {
                *terminate = true;
            }
            return Ok(());
        }

        if name == "conditionExpression" && self.pending_flow.is_some() {
            self.condition_text = Some(String::new());
            return Ok(());
        }

        if !self.in_process() {
            return Ok(());
        }

        if name == "sequenceFlow" {
            let flow_count = self.current.as_ref().map(|p| p.flows.len()).unwrap_or(0);
            let source = attr(e, "sourceRef", pos)?.ok_or(ParseError::MissingAttribute {
                element: "sequenceFlow",
                attribute: "sourceRef",
            })?;
            let target = attr(e, "targetRef", pos)?.ok_or(ParseError::MissingAttribute {
                element: "sequenceFlow",
                attribute: "targetRef",
            })?;
            self.pending_flow = Some(SequenceFlow {
                id: attr(e, "id", pos)?.unwrap_or_else(|| format!("flow_{}", flow_count + 1)),
                source,
                target,
                // Flowable also accepts the condition as an attribute.
                condition: attr(e, "conditionExpression", pos)?,
            });
            return Ok(());
        }

        let kind = match name {
            "startEvent" => NodeKind::StartEvent,
            "endEvent" => NodeKind::EndEvent { terminate: false },
            "userTask" => NodeKind::UserTask {
                assignee: attr(e, "assignee", pos)?,
                candidate_users: split_list(attr(e, "candidateUsers", pos)?),
                candidate_groups: split_list(attr(e, "candidateGroups", pos)?),
            },
            "serviceTask" => {
                let raw = match attr(e, "class", pos)? {
                    Some(c) => c,
                    None => match attr(e, "delegateExpression", pos)? {
                        Some(d) => d,
                        None => attr(e, "type", pos)?.ok_or(ParseError::MissingAttribute {
                            element: "serviceTask",
                            attribute: "class",
                        })?,
                    },
                };
                NodeKind::ServiceTask {
                    delegate: delegate_name(&raw),
                }
            }
            "exclusiveGateway" => NodeKind::ExclusiveGateway {
                default_flow: attr(e, "default", pos)?,
            },
            "parallelGateway" => NodeKind::ParallelGateway,
            other if UNSUPPORTED_NODES.contains(&other) => {
                return Err(ParseError::Unsupported {
                    element: other.to_string(),
                    id: attr(e, "id", pos)?.unwrap_or_default(),
                });
            }
            _ => return Ok(()),
        };

        let id = attr(e, "id", pos)?.ok_or(ParseError::MissingAttribute {
            element: "flow node",
            attribute: "id",
        })?;
        self.pending_node = Some(Node {
            id,
            name: attr(e, "name", pos)?,
            kind,
        });
        Ok(())
    }

    fn close(&mut self, name: &str) -> Result<(), ParseError> {
        match name {
            "process" => {
                if let Some(process) = self.current.take() {
                    self.processes.push(process);
                }
            }
            "conditionExpression" => {
                if let (Some(text), Some(flow)) =
                    (self.condition_text.take(), self.pending_flow.as_mut())
                {
                    let text = text.trim();
                    if !text.is_empty() {
                        flow.condition = Some(text.to_string());
                    }
                }
            }
            "sequenceFlow" => {
                if let (Some(flow), Some(process)) =
                    (self.pending_flow.take(), self.current.as_mut())
                {
                    if process.flows.iter().any(|f| f.id == flow.id) {
                        return Err(ParseError::DuplicateId(flow.id));
                    }
                    process.flows.push(flow);
                }
            }
            _ => {
                // Only the element that produced the pending node closes it.
                let closes_pending = self
                    .pending_node
                    .as_ref()
                    .map(|n| n.kind.activity_type() == name)
                    .unwrap_or(false);
                if closes_pending {
                    if let (Some(node), Some(process)) =
                        (self.pending_node.take(), self.current.as_mut())
                    {
                        if process.nodes.contains_key(&node.id) {
                            return Err(ParseError::DuplicateId(node.id));
                        }
                        process.nodes.insert(node.id.clone(), node);
                    }
                }
            }
        }
        Ok(())
    }
}
