//! Built-in tasks.

use super::{Task, TaskManager};
use crate::error::Result;
use tracing::info;

/// Name of the smoke-test task.
pub const ECHO_TASK: &str = "echo";

/// Register `echo`: logs whatever JSON it was launched with.
///
/// Useful to check a deployment end to end, e.g.
/// `taskbus task run echo 1 --data '{"hello":"world"}'`.
pub fn register_echo(manager: &TaskManager) -> Result<Task<serde_json::Value>> {
    manager
        .task::<serde_json::Value>(ECHO_TASK)
        .handler(|id, value| async move {
            info!(task = ECHO_TASK, id = %id, payload = %value, "Echo");
            Ok(())
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::MemoryEventBus;
    use crate::store::MemoryStore;
    use crate::tasks::TaskSettings;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_echo_executes() {
        let manager = TaskManager::new(
            Arc::new(MemoryEventBus::new()),
            Arc::new(MemoryStore::new()),
            TaskSettings::default(),
        );
        let echo = register_echo(&manager).unwrap();
        assert_eq!(echo.delay(), 0);

        manager.start().unwrap();
        echo.run(1, &serde_json::json!({"hello": "world"})).await.unwrap();
        manager.stop().await;

        assert_eq!(manager.stats().executed, 1);
    }
}
