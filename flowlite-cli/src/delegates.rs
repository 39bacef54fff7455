//! Service-task behaviour for the holiday-request process.

use std::io::Write;

use async_trait::async_trait;
use flowlite_core::{DelegateExecution, ServiceDelegate};
use tracing::info;

use crate::console::Console;

/// `externalSystemCall`: hands the approved request to the payroll system.
pub struct CallExternalSystemDelegate<W> {
    console: Console<W>,
}

impl<W> CallExternalSystemDelegate<W> {
    pub fn new(console: Console<W>) -> Self {
        Self { console }
    }
}

#[async_trait]
impl<W: Write + Send + 'static> ServiceDelegate for CallExternalSystemDelegate<W> {
    async fn execute(&self, execution: &mut DelegateExecution) -> anyhow::Result<()> {
        let employee = employee_of(execution);
        self.console
            .line(format!("Calling the external system for employee {employee}"))?;
        info!(
            instance_id = %execution.process_instance_id,
            employee = %employee,
            "External system called"
        );
        execution.set_variable("externalSystemNotified", true);
        Ok(())
    }
}

/// `sendRejectionMail`: tells the employee the request was turned down.
pub struct SendRejectionMail<W> {
    console: Console<W>,
}

impl<W> SendRejectionMail<W> {
    pub fn new(console: Console<W>) -> Self {
        Self { console }
    }
}

#[async_trait]
impl<W: Write + Send + 'static> ServiceDelegate for SendRejectionMail<W> {
    async fn execute(&self, execution: &mut DelegateExecution) -> anyhow::Result<()> {
        let employee = employee_of(execution);
        self.console
            .line(format!("Sending rejection mail to employee {employee}"))?;
        info!(
            instance_id = %execution.process_instance_id,
            employee = %employee,
            "Rejection mail sent"
        );
        execution.set_variable("rejectionMailSent", true);
        Ok(())
    }
}

fn employee_of(execution: &DelegateExecution) -> String {
    execution
        .get_variable("employee")
        .map(ToString::to_string)
        .unwrap_or_else(|| "<unknown>".to_string())
}
