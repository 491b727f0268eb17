//! Wire types: the `Operation` pointer published on the bus and the
//! `Payload` record stored under the operation's key.

use crate::error::Result;
use crate::events::base64_bytes;
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use uuid::Uuid;

// ═══════════════════════════════════════════════════════════════════════════════
// Task ID
// ═══════════════════════════════════════════════════════════════════════════════

/// Subject of a task, e.g. the numeric id of the user being deleted.
///
/// Serialized as a JSON string; numbers are accepted on input.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parse the id as an integer.
    pub fn as_i64(&self) -> Option<i64> {
        self.0.parse().ok()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

macro_rules! task_id_from_display {
    ($($t:ty),*) => {
        $(impl From<$t> for TaskId {
            fn from(id: $t) -> Self {
                Self(id.to_string())
            }
        })*
    };
}

task_id_from_display!(i32, i64, u32, u64, usize, Uuid, &str, &String);

impl From<String> for TaskId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&TaskId> for TaskId {
    fn from(id: &TaskId) -> Self {
        id.clone()
    }
}

impl Serialize for TaskId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for TaskId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct TaskIdVisitor;

        impl<'de> Visitor<'de> for TaskIdVisitor {
            type Value = TaskId;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a string or integer task id")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<TaskId, E> {
                Ok(TaskId::new(v))
            }

            fn visit_string<E: de::Error>(self, v: String) -> std::result::Result<TaskId, E> {
                Ok(TaskId(v))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<TaskId, E> {
                Ok(TaskId::from(v))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<TaskId, E> {
                Ok(TaskId::from(v))
            }
        }

        deserializer.deserialize_any(TaskIdVisitor)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Operation & Payload
// ═══════════════════════════════════════════════════════════════════════════════

/// Which task and which subject. Carries no data or delay; receivers look
/// up the current [`Payload`] by [`Operation::key`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    pub name: String,
    pub id: TaskId,
}

impl Operation {
    pub fn new(name: impl Into<String>, id: impl Into<TaskId>) -> Self {
        Self {
            name: name.into(),
            id: id.into(),
        }
    }

    /// Store key `prefix:name:id`.
    pub fn key(&self, prefix: &str) -> String {
        format!("{}:{}:{}", prefix, self.name, self.id)
    }
}

/// One scheduling request. `id` is regenerated on every launch; a timer
/// only acts if the stored payload still carries the id it started with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    pub id: Uuid,
    pub delay: u64,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
}

impl Payload {
    pub fn new(delay: u64, data: Vec<u8>) -> Self {
        Self {
            id: Uuid::new_v4(),
            delay,
            data,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Operation Handler
// ═══════════════════════════════════════════════════════════════════════════════

/// Untyped handler invoked on a worker once an operation's delay elapsed.
#[async_trait]
pub trait OperationHandler: Send + Sync {
    async fn run(&self, op: Operation, payload: Payload) -> Result<()>;
}

struct FnOperationHandler<F>(F);

#[async_trait]
impl<F> OperationHandler for FnOperationHandler<F>
where
    F: Fn(Operation, Payload) -> BoxFuture<'static, Result<()>> + Send + Sync,
{
    async fn run(&self, op: Operation, payload: Payload) -> Result<()> {
        (self.0)(op, payload).await
    }
}

/// Wrap an async closure as an [`OperationHandler`].
pub fn operation_fn<F, Fut>(f: F) -> Arc<dyn OperationHandler>
where
    F: Fn(Operation, Payload) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(FnOperationHandler(
        move |op, payload| -> BoxFuture<'static, Result<()>> { Box::pin(f(op, payload)) },
    ))
}
