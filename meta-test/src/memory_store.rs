use async_trait::async_trait;
use chrono::Utc;
use meta_core::CoreResult;
use meta_store::{CheckpointQuery, CheckpointRow, CheckpointStore, ProviderStateRow};
use std::collections::HashMap;
use std::sync::Mutex;

/// An in-process `CheckpointStore` backed by plain `HashMap`s. Faster to
/// construct than `SqliteCheckpointStore::in_memory()` for tests that don't
/// care about SQL semantics, only about what gets written and in what order.
#[derive(Default)]
pub struct InMemoryCheckpointStore {
    state: Mutex<HashMap<String, ProviderStateRow>>,
    checkpoints: Mutex<HashMap<String, Vec<CheckpointRow>>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn upsert_provider_state(&self, row: &ProviderStateRow) -> CoreResult<()> {
        self.state.lock().expect("state mutex poisoned").insert(row.provider_id.clone(), row.clone());
        Ok(())
    }

    async fn get_provider_state(&self, provider_id: &str) -> CoreResult<Option<ProviderStateRow>> {
        Ok(self.state.lock().expect("state mutex poisoned").get(provider_id).cloned())
    }

    async fn scan_provider_states(&self) -> CoreResult<Vec<ProviderStateRow>> {
        Ok(self.state.lock().expect("state mutex poisoned").values().cloned().collect())
    }

    async fn append_checkpoint(&self, row: &CheckpointRow) -> CoreResult<()> {
        self.checkpoints
            .lock()
            .expect("checkpoints mutex poisoned")
            .entry(row.provider_id.clone())
            .or_default()
            .push(row.clone());
        Ok(())
    }

    async fn next_sequence(&self, provider_id: &str) -> CoreResult<i64> {
        let checkpoints = self.checkpoints.lock().expect("checkpoints mutex poisoned");
        Ok(checkpoints.get(provider_id).map(|rows| rows.len() as i64).unwrap_or(0))
    }

    async fn list_checkpoints(&self, provider_id: &str, query: &CheckpointQuery) -> CoreResult<(Vec<CheckpointRow>, u64)> {
        let checkpoints = self.checkpoints.lock().expect("checkpoints mutex poisoned");
        let mut rows: Vec<CheckpointRow> = checkpoints.get(provider_id).cloned().unwrap_or_default();
        rows.sort_by(|a, b| b.sequence.cmp(&a.sequence));
        let total = rows.len() as u64;
        if query.success_only {
            rows.retain(|r| r.success);
        }
        rows.truncate(query.limit);
        Ok((rows, total))
    }
}
