//! Delayed, cancelable task scheduling.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  set(key, payload)   ┌──────────────┐
//! │  Task::run   │─────────────────────▶│   KvStore    │◀──────────────┐
//! │  (launch)    │                      └──────────────┘               │
//! │              │  push("task", op)    ┌──────────────┐  deliver      │ re-read,
//! │              │─────────────────────▶│   EventBus   │──────────┐    │ compare id
//! └──────────────┘                      └──────────────┘          ▼    │
//!                                                          ┌──────────────┐
//!                                                          │ delay timer  │
//!                                                          └──────┬───────┘
//!                                                                 │ still current
//!                                                                 ▼
//!                                                          ┌──────────────┐
//!                                                          │ WorkerPool   │
//!                                                          │  (handler)   │
//!                                                          └──────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use taskbus_core::tasks::{TaskManager, TaskSettings};
//!
//! let manager = TaskManager::new(events, store, TaskSettings::default());
//! let delete_credential = manager
//!     .task::<i64>("credential.delete")
//!     .delay(20)
//!     .handler(|_, id| async move { credentials.delete(id).await })?;
//!
//! manager.start()?;
//! delete_credential.run(42, &42).await?;
//! delete_credential.cancel(42).await?;
//! manager.stop().await;
//! ```

mod manager;
mod operation;
mod task;
mod worker;

pub mod builtin;

pub use manager::{TaskManager, TaskSettings, TaskStats, TASK_EVENT};
pub use operation::{operation_fn, Operation, OperationHandler, Payload, TaskId};
pub use task::{Task, TaskBuilder, Unmarshal};
pub use worker::{Job, WorkerPool, WorkerStats};
