use async_trait::async_trait;
use meta_core::CoreResult;

use crate::model::{CheckpointQuery, CheckpointRow, ProviderStateRow};

/// Durable key-value persistence for provider-state records and per-item
/// checkpoints. Reads may be concurrent; writes for a given provider are
/// expected to be serialized by the caller.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Insert or overwrite the current state row for a provider.
    async fn upsert_provider_state(&self, row: &ProviderStateRow) -> CoreResult<()>;

    /// Fetch the current state row for a provider, if one has ever been written.
    async fn get_provider_state(&self, provider_id: &str) -> CoreResult<Option<ProviderStateRow>>;

    /// Every persisted provider-state row, for the Recovery Manager's
    /// process-start scan.
    async fn scan_provider_states(&self) -> CoreResult<Vec<ProviderStateRow>>;

    /// Append one checkpoint row. `sequence` must be the next monotonic
    /// value for `provider_id`; callers should use `next_sequence` to
    /// obtain it.
    async fn append_checkpoint(&self, row: &CheckpointRow) -> CoreResult<()>;

    /// The next checkpoint sequence number for a provider (one past the
    /// highest sequence already stored, or 0 if none).
    async fn next_sequence(&self, provider_id: &str) -> CoreResult<i64>;

    /// Checkpoints for a provider, most recent first, subject to `query`.
    async fn list_checkpoints(&self, provider_id: &str, query: &CheckpointQuery) -> CoreResult<(Vec<CheckpointRow>, u64)>;
}
