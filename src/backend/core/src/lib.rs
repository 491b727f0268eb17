#![allow(clippy::result_large_err)]
//! # Taskbus Core
//!
//! Delayed, cancelable task execution over interchangeable transports.
//!
//! ## Architecture
//!
//! - **Store**: namespaced TTL key/value storage holding pending task payloads
//! - **Events**: named publish/subscribe bus (in-process or Redis work queue)
//! - **Tasks**: the scheduler, with launch/cancel/status and a worker pool
//! - **Bus**: composition root selecting backends from configuration
//! - **Telemetry**: structured logging and Prometheus metrics

pub mod bus;
pub mod config;
pub mod error;
pub mod events;
pub mod store;
pub mod tasks;
pub mod telemetry;

pub use error::{ErrorCode, ErrorContext, ErrorDetails, ErrorSeverity, Result, TaskbusError};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::bus::Bus;
    pub use crate::config::{Config, Transport, WorkerConfig};
    pub use crate::error::{ErrorCode, ErrorContext, Result, TaskbusError};
    pub use crate::events::{
        handler_fn, Event, EventBus, EventHandler, MemoryEventBus, RecordingEventBus,
        RedisEventBus,
    };
    pub use crate::store::{KvStore, MemoryStore, RedisStore};
    pub use crate::tasks::{
        operation_fn, Operation, OperationHandler, Payload, Task, TaskId, TaskManager,
        TaskSettings, TaskStats,
    };
}
