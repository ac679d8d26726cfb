use async_trait::async_trait;
use meta_core::CoreResult;

/// Accumulates what one batch did, for the caller to fold into the
/// `ProviderFsm`'s counters and last-checkpoint marker after `execute`
/// returns.
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub items_processed: u64,
    pub items_errored: u64,
    pub last_checkpoint_urn: Option<String>,
}

impl BatchReport {
    pub fn record_success(&mut self, urn: impl Into<String>) {
        self.items_processed += 1;
        self.last_checkpoint_urn = Some(urn.into());
    }

    pub fn record_error(&mut self) {
        self.items_processed += 1;
        self.items_errored += 1;
    }
}

/// `true` if the provider has more items to fetch after this batch,
/// `false` if its source is exhausted.
pub type More = bool;

/// The contract every data-source adapter implements. One call = one
/// batch; the Permit Executor's worker loop is the only thing that ever
/// calls `execute`, and only while the provider is `RUNNING`.
///
/// Concrete parsers, storage RPC calls, and URN derivation for a given
/// catalog are out of scope here — this crate only fixes the shape an
/// adapter must expose, and the worker-loop bookkeeping (counters,
/// checkpoint writes, auto-pause) that wraps every call to it.
#[async_trait]
pub trait ProviderExecutor: Send + Sync {
    /// Fetches up to `batch_size` items, processes each one (diff, store,
    /// checkpoint), and folds the outcome into `report`.
    async fn execute(&self, batch_size: u32, report: &mut BatchReport) -> CoreResult<More>;
}
