use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// `provider_state/<provider_id>` persisted state layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderStateRow {
    pub provider_id: String,
    /// Serialized Provider FSM state tag, e.g. `"RUNNING"`, `"WAITING_QUOTA"`.
    pub state: String,
    pub permits_held: u32,
    pub total_processed: u64,
    pub error_count: u64,
    pub last_checkpoint_urn: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// `checkpoints/<provider_id>/<sequence>`. Append-only; `sequence` is
/// monotonic per provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointRow {
    pub provider_id: String,
    pub sequence: i64,
    pub urn: String,
    pub success: bool,
    pub error_message: Option<String>,
    pub processed_at: DateTime<Utc>,
}

/// Selection criteria for `CheckpointStore::list_checkpoints`.
#[derive(Debug, Clone)]
pub struct CheckpointQuery {
    pub limit: usize,
    pub success_only: bool,
}

impl Default for CheckpointQuery {
    fn default() -> Self {
        CheckpointQuery {
            limit: 100,
            success_only: false,
        }
    }
}
