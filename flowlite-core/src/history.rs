use std::cmp::Ordering;
use std::sync::Arc;

use uuid::Uuid;

use crate::engine::EngineContext;
use crate::error::{EngineError, EngineResult};
use crate::types::{HistoricActivityInstance, HistoricProcessInstance};

#[derive(Clone)]
pub struct HistoryService {
    ctx: Arc<EngineContext>,
}

impl HistoryService {
    pub(crate) fn new(ctx: Arc<EngineContext>) -> Self {
        Self { ctx }
    }

    pub fn create_historic_activity_instance_query(&self) -> HistoricActivityInstanceQuery {
        HistoricActivityInstanceQuery {
            ctx: self.ctx.clone(),
            process_instance_id: None,
            activity_id: None,
            activity_type: None,
            finished: None,
            order: None,
            descending: false,
        }
    }

    pub fn create_historic_process_instance_query(&self) -> HistoricProcessInstanceQuery {
        HistoricProcessInstanceQuery {
            ctx: self.ctx.clone(),
            process_instance_id: None,
            finished: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ActivityOrder {
    StartTime,
    EndTime,
}

pub struct HistoricActivityInstanceQuery {
    ctx: Arc<EngineContext>,
    process_instance_id: Option<Uuid>,
    activity_id: Option<String>,
    activity_type: Option<String>,
    finished: Option<bool>,
    order: Option<ActivityOrder>,
    descending: bool,
}

impl HistoricActivityInstanceQuery {
    pub fn process_instance_id(mut self, id: Uuid) -> Self {
        self.process_instance_id = Some(id);
        self
    }

    pub fn activity_id(mut self, id: impl Into<String>) -> Self {
        self.activity_id = Some(id.into());
        self
    }

    /// BPMN element name, e.g. `userTask`.
    pub fn activity_type(mut self, activity_type: impl Into<String>) -> Self {
        self.activity_type = Some(activity_type.into());
        self
    }

    pub fn finished(mut self) -> Self {
        self.finished = Some(true);
        self
    }

    pub fn unfinished(mut self) -> Self {
        self.finished = Some(false);
        self
    }

    pub fn order_by_historic_activity_instance_start_time(mut self) -> Self {
        self.order = Some(ActivityOrder::StartTime);
        self
    }

    pub fn order_by_historic_activity_instance_end_time(mut self) -> Self {
        self.order = Some(ActivityOrder::EndTime);
        self
    }

    pub fn asc(mut self) -> Self {
        self.descending = false;
        self
    }

    pub fn desc(mut self) -> Self {
        self.descending = true;
        self
    }

    /// Without an explicit ordering, records come back in the order they
    /// were started. Unfinished records sort after finished ones by end time.
    pub async fn list(self) -> EngineResult<Vec<HistoricActivityInstance>> {
        let mut activities: Vec<HistoricActivityInstance> = self
            .ctx
            .store
            .list_activities(self.process_instance_id)
            .await?
            .into_iter()
            .filter(|a| self.activity_id.as_ref().map_or(true, |id| &a.activity_id == id))
            .filter(|a| {
                self.activity_type
                    .as_ref()
                    .map_or(true, |t| &a.activity_type == t)
            })
            .filter(|a| self.finished.map_or(true, |f| a.is_finished() == f))
            .collect();

        if let Some(order) = self.order {
            // Stable sort: ties keep start order.
            activities.sort_by(|a, b| {
                let ord = match order {
                    ActivityOrder::StartTime => a.start_time.cmp(&b.start_time),
                    ActivityOrder::EndTime => match (a.end_time, b.end_time) {
                        (Some(x), Some(y)) => x.cmp(&y),
                        (Some(_), None) => Ordering::Less,
                        (None, Some(_)) => Ordering::Greater,
                        (None, None) => Ordering::Equal,
                    },
                };
                if self.descending {
                    ord.reverse()
                } else {
                    ord
                }
            });
        }
        Ok(activities)
    }

    pub async fn count(self) -> EngineResult<usize> {
        Ok(self.list().await?.len())
    }
}

pub struct HistoricProcessInstanceQuery {
    ctx: Arc<EngineContext>,
    process_instance_id: Option<Uuid>,
    finished: Option<bool>,
}

impl HistoricProcessInstanceQuery {
    pub fn process_instance_id(mut self, id: Uuid) -> Self {
        self.process_instance_id = Some(id);
        self
    }

    pub fn finished(mut self) -> Self {
        self.finished = Some(true);
        self
    }

    pub fn unfinished(mut self) -> Self {
        self.finished = Some(false);
        self
    }

    pub async fn list(self) -> EngineResult<Vec<HistoricProcessInstance>> {
        let mut instances: Vec<HistoricProcessInstance> = self
            .ctx
            .store
            .list_historic_instances()
            .await?
            .into_iter()
            .filter(|h| self.process_instance_id.map_or(true, |id| h.id == id))
            .filter(|h| self.finished.map_or(true, |f| h.end_time.is_some() == f))
            .collect();
        instances.sort_by(|a, b| a.start_time.cmp(&b.start_time).then(a.id.cmp(&b.id)));
        Ok(instances)
    }

    pub async fn single_result(self) -> EngineResult<Option<HistoricProcessInstance>> {
        let mut instances = self.list().await?;
        match instances.len() {
            0 => Ok(None),
            1 => Ok(instances.pop()),
            count => Err(EngineError::NotUnique {
                kind: "historic process instance",
                count,
            }),
        }
    }
}
