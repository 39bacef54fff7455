//! flowlite: an in-process BPMN engine.
//!
//! Deploy BPMN 2.0 process documents, start instances, work through their
//! human tasks and read back per-activity timing history:
//!
//! ```no_run
//! # async fn demo() -> Result<(), flowlite_core::EngineError> {
//! use flowlite_core::{EngineConfig, Variables};
//!
//! let engine = EngineConfig::standalone_in_memory()
//!     .with_resource_root("resources")
//!     .build_process_engine()
//!     .await?;
//!
//! engine
//!     .repository_service()
//!     .create_deployment()
//!     .add_classpath_resource("holiday-request.bpmn20.xml")
//!     .deploy()
//!     .await?;
//!
//! let mut vars = Variables::new();
//! vars.insert("employee".into(), "Reto".into());
//! engine
//!     .runtime_service()
//!     .start_process_instance_by_key("holidayRequest", vars)
//!     .await?;
//!
//! let tasks = engine
//!     .task_service()
//!     .create_task_query()
//!     .task_candidate_group("managers")
//!     .list()
//!     .await?;
//! # let _ = tasks;
//! # Ok(())
//! # }
//! ```

pub mod clock;
pub mod config;
pub mod delegate;
pub mod engine;
pub mod error;
pub(crate) mod executor;
pub mod expr;
pub mod history;
pub mod parser;
pub mod repository;
pub mod runtime;
pub mod store;
pub mod store_memory;
pub mod task;
pub mod types;
pub mod validate;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{EngineConfig, HistoryLevel, SchemaUpdate};
pub use delegate::{DelegateExecution, DelegateRegistry, FnDelegate, ServiceDelegate};
pub use engine::{ProcessEngine, ProcessEngineBuilder};
pub use error::{EngineError, EngineResult};
pub use executor::MAX_STEPS;
pub use types::*;
