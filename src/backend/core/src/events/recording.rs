use super::{EventBus, EventHandler};
use crate::error::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Event bus for tests of host applications: every push is recorded by
/// name and nothing is ever delivered.
///
/// Wire it with [`Bus::with_backends`](crate::bus::Bus::with_backends) and a
/// [`MemoryStore`](crate::store::MemoryStore) to assert that a task was
/// launched without running it. `stop` forgets everything recorded.
#[derive(Debug, Default)]
pub struct RecordingEventBus {
    records: Mutex<HashMap<String, Vec<Vec<u8>>>>,
}

impl RecordingEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Values pushed under `name`, oldest first.
    pub fn records(&self, name: &str) -> Vec<Vec<u8>> {
        self.records.lock().get(name).cloned().unwrap_or_default()
    }

    pub fn clear(&self) {
        self.records.lock().clear();
    }
}

#[async_trait]
impl EventBus for RecordingEventBus {
    fn listen(&self) -> Result<()> {
        Ok(())
    }

    async fn stop(&self) {
        self.clear();
    }

    async fn push(&self, name: &str, value: Vec<u8>) -> Result<()> {
        self.records
            .lock()
            .entry(name.to_string())
            .or_default()
            .push(value);
        Ok(())
    }

    fn on(&self, _name: &str, _handler: Arc<dyn EventHandler>) {}

    fn name(&self) -> &'static str {
        "recording"
    }
}
