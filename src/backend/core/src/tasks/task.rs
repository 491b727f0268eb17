//! Typed task handles over the untyped operation registry.

use super::manager::TaskManager;
use super::{Operation, OperationHandler, Payload, TaskId};
use crate::error::{ErrorCode, Result, TaskbusError};
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::error;

/// Decodes a payload's data into the task's value type.
pub type Unmarshal<T> = Arc<dyn Fn(&[u8]) -> Result<T> + Send + Sync>;

type BoxedHandler<T> = Arc<dyn Fn(TaskId, T) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Handle for one registered task type.
///
/// Holds no per-launch state; every call goes through the manager and the
/// store.
pub struct Task<T> {
    name: String,
    delay: u64,
    manager: TaskManager,
    _value: PhantomData<fn(T)>,
}

impl<T> Clone for Task<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            delay: self.delay,
            manager: self.manager.clone(),
            _value: PhantomData,
        }
    }
}

impl<T> fmt::Debug for Task<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("delay", &self.delay)
            .finish()
    }
}

impl<T: Serialize> Task<T> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Delay in seconds applied to every launch.
    pub fn delay(&self) -> u64 {
        self.delay
    }

    /// Schedule the task for `id`, replacing any pending launch for it.
    pub async fn run(&self, id: impl Into<TaskId>, data: &T) -> Result<()> {
        let bytes = serde_json::to_vec(data)?;
        self.manager.launch(&self.name, id, self.delay, bytes).await
    }

    /// Cancel the pending launch for `id`. Canceling nothing is not an error.
    pub async fn cancel(&self, id: impl Into<TaskId>) -> Result<()> {
        self.manager.cancel(&self.name, id).await
    }

    /// Whether a launch for `id` is pending. Store errors read as `false`.
    pub async fn is_running(&self, id: impl Into<TaskId>) -> bool {
        let id = id.into();
        match self.manager.is_scheduled(&self.name, &id).await {
            Ok(scheduled) => scheduled,
            Err(e) => {
                error!(task = %self.name, id = %id, error = %e, "Cannot check task state");
                false
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Registration
// ═══════════════════════════════════════════════════════════════════════════════

struct TypedHandler<T> {
    name: String,
    unmarshal: Unmarshal<T>,
    handler: BoxedHandler<T>,
}

#[async_trait]
impl<T: Send + 'static> OperationHandler for TypedHandler<T> {
    async fn run(&self, op: Operation, payload: Payload) -> Result<()> {
        let value = (self.unmarshal)(&payload.data).map_err(|e| {
            TaskbusError::with_internal(
                ErrorCode::DeserializationError,
                format!("cannot decode payload of task {}", self.name),
                e.to_string(),
            )
            .with_source(e)
        })?;
        (self.handler)(op.id, value).await
    }
}

fn json_unmarshal<T: DeserializeOwned>() -> Unmarshal<T> {
    Arc::new(|data: &[u8]| -> Result<T> { Ok(serde_json::from_slice(data)?) })
}

/// Builder returned by [`TaskManager::task`].
///
/// ```rust,ignore
/// let delete_user = manager
///     .task::<i64>("user.delete")
///     .delay(20)
///     .handler(|id, user_id| async move { users.delete(user_id).await })?;
/// ```
pub struct TaskBuilder<T> {
    manager: TaskManager,
    name: String,
    delay: u64,
    unmarshal: Option<Unmarshal<T>>,
}

impl<T> TaskBuilder<T>
where
    T: Serialize + DeserializeOwned + Send + 'static,
{
    /// Delay in seconds between a launch and its execution.
    pub fn delay(mut self, secs: u64) -> Self {
        self.delay = secs;
        self
    }

    /// Replace the default JSON decoding of payload data.
    pub fn unmarshal<F>(mut self, f: F) -> Self
    where
        F: Fn(&[u8]) -> Result<T> + Send + Sync + 'static,
    {
        self.unmarshal = Some(Arc::new(f));
        self
    }

    /// Register the handler and return the task handle.
    pub fn handler<F, Fut>(self, f: F) -> Result<Task<T>>
    where
        F: Fn(TaskId, T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let unmarshal = self.unmarshal.unwrap_or_else(json_unmarshal);
        self.manager.register_task(self.name, self.delay, unmarshal, f)
    }
}

impl TaskManager {
    /// Start building a typed task.
    pub fn task<T>(&self, name: impl Into<String>) -> TaskBuilder<T>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
    {
        TaskBuilder {
            manager: self.clone(),
            name: name.into(),
            delay: 0,
            unmarshal: None,
        }
    }

    /// Register a typed task in one call.
    pub fn register_task<T, F, Fut>(
        &self,
        name: impl Into<String>,
        delay: u64,
        unmarshal: Unmarshal<T>,
        handler: F,
    ) -> Result<Task<T>>
    where
        T: Serialize + Send + 'static,
        F: Fn(TaskId, T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let name = name.into();
        let handler: BoxedHandler<T> =
            Arc::new(move |id: TaskId, value: T| -> BoxFuture<'static, Result<()>> {
                Box::pin(handler(id, value))
            });

        self.register(
            name.clone(),
            Arc::new(TypedHandler {
                name: name.clone(),
                unmarshal,
                handler,
            }),
        )?;

        Ok(Task {
            name,
            delay,
            manager: self.clone(),
            _value: PhantomData,
        })
    }
}
