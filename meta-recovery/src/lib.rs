//! Process-start Recovery Manager: scans the Checkpoint Store, matches
//! persisted rows to registered providers, and re-admits or restores each
//! one per the persisted-state recovery rule table. Runs once, before the
//! Macro FSM leaves BOOTSTRAPPING.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use meta_core::CoreResult;
use meta_executor::{PermitExecutor, QuotaSource};
use meta_fsm::{ProviderFsm, ProviderState};
use meta_store::{CheckpointStore, ProviderStateRow};
use tracing::{info, warn};

/// Aggregate result of one recovery pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub total: u32,
    pub recovered: u32,
    pub skipped: u32,
}

pub struct RecoveryManager<Q: QuotaSource + 'static> {
    registry: Arc<Mutex<HashMap<String, ProviderFsm>>>,
    store: Arc<dyn CheckpointStore>,
    executor: Arc<PermitExecutor<Q>>,
}

impl<Q: QuotaSource + 'static> RecoveryManager<Q> {
    pub fn new(
        registry: Arc<Mutex<HashMap<String, ProviderFsm>>>,
        store: Arc<dyn CheckpointStore>,
        executor: Arc<PermitExecutor<Q>>,
    ) -> Self {
        RecoveryManager { registry, store, executor }
    }

    /// Runs the full recovery pass. Safe to call more than once: a provider
    /// left in a terminal or idle persisted state takes no action on a
    /// second pass, and re-admission of an already-running provider is
    /// rejected by the FSM's own transition guard rather than double
    /// counted.
    pub async fn recover(&self) -> CoreResult<RecoveryReport> {
        let rows = self.store.scan_provider_states().await?;
        let mut report = RecoveryReport { total: rows.len() as u32, ..Default::default() };

        for row in rows {
            match self.recover_one(&row).await {
                Ok(true) => report.recovered += 1,
                Ok(false) => report.skipped += 1,
                Err(e) => {
                    warn!(provider_id = %row.provider_id, error = %e, "recovery of provider failed");
                    report.skipped += 1;
                }
            }
        }

        info!(total = report.total, recovered = report.recovered, skipped = report.skipped, "recovery pass complete");
        Ok(report)
    }

    /// Returns `Ok(true)` if the provider was restarted/re-admitted,
    /// `Ok(false)` if it was found but left untouched or unmatched.
    async fn recover_one(&self, row: &ProviderStateRow) -> CoreResult<bool> {
        let persisted_state = ProviderState::parse(&row.state)?;

        let known = {
            let mut registry = self.registry.lock().expect("registry mutex poisoned");
            match registry.get_mut(&row.provider_id) {
                Some(fsm) => {
                    restore_counters(fsm, row);
                    true
                }
                None => false,
            }
        };

        if !known {
            warn!(provider_id = %row.provider_id, "checkpoint store has no matching registered provider; skipping");
            return Ok(false);
        }

        match persisted_state {
            ProviderState::Idle | ProviderState::Terminated => {
                self.set_state(&row.provider_id, persisted_state);
                Ok(false)
            }
            ProviderState::Paused => {
                self.set_state(&row.provider_id, ProviderState::Paused);
                Ok(false)
            }
            ProviderState::WaitingBackoff => {
                self.set_state(&row.provider_id, ProviderState::WaitingBackoff);
                Ok(false)
            }
            ProviderState::Acquiring | ProviderState::Running | ProviderState::WaitingQuota => {
                let requested = if row.permits_held > 0 {
                    row.permits_held
                } else {
                    self.registry
                        .lock()
                        .expect("registry mutex poisoned")
                        .get(&row.provider_id)
                        .map(|fsm| fsm.default_permits)
                        .unwrap_or(1)
                };
                self.set_state(&row.provider_id, ProviderState::Idle);
                self.executor.start_provider(&row.provider_id, requested).await?;
                Ok(true)
            }
        }
    }

    fn set_state(&self, provider_id: &str, state: ProviderState) {
        let mut registry = self.registry.lock().expect("registry mutex poisoned");
        if let Some(fsm) = registry.get_mut(provider_id) {
            fsm.state = state;
        }
    }
}

/// Restores running totals from the persisted row onto the freshly
/// constructed in-memory FSM. Recovery never resets counters:
/// `total_processed`, `error_count`, and `last_checkpoint_urn` are the
/// authoritative continuation point, not the in-memory defaults.
fn restore_counters(fsm: &mut ProviderFsm, row: &ProviderStateRow) {
    fsm.total_processed = row.total_processed;
    fsm.error_count = row.error_count;
    fsm.permits_held = row.permits_held;
    fsm.last_checkpoint_urn = row.last_checkpoint_urn.clone();
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use meta_executor::LocalQuotaSource;
    use meta_fsm::{BatchReport, More, ProviderExecutor};

    struct NeverCalled;

    #[async_trait]
    impl ProviderExecutor for NeverCalled {
        async fn execute(&self, _batch_size: u32, _report: &mut BatchReport) -> CoreResult<More> {
            panic!("executor should not run for a PAUSED/TERMINATED recovery target");
        }
    }

    struct OneBatchThenDone;

    #[async_trait]
    impl ProviderExecutor for OneBatchThenDone {
        async fn execute(&self, _batch_size: u32, report: &mut BatchReport) -> CoreResult<More> {
            report.record_success("v2e::nvd::cve::CVE-2024-00001");
            Ok(false)
        }
    }

    fn registry_with(fsm: ProviderFsm) -> Arc<Mutex<HashMap<String, ProviderFsm>>> {
        let mut map = HashMap::new();
        map.insert(fsm.provider_id.clone(), fsm);
        Arc::new(Mutex::new(map))
    }

    async fn store_row(store: &meta_store::SqliteCheckpointStore, row: ProviderStateRow) {
        store.upsert_provider_state(&row).await.unwrap();
    }

    fn base_row(provider_id: &str, state: &str) -> ProviderStateRow {
        ProviderStateRow {
            provider_id: provider_id.to_string(),
            state: state.to_string(),
            permits_held: 0,
            total_processed: 42,
            error_count: 1,
            last_checkpoint_urn: Some("v2e::nvd::cve::CVE-2023-99999".to_string()),
            updated_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn paused_provider_is_restored_but_not_restarted() {
        let registry = registry_with(ProviderFsm::new("cve", "cve", vec![]));
        let store = Arc::new(meta_store::SqliteCheckpointStore::in_memory().await.unwrap());
        store_row(&store, base_row("cve", "PAUSED")).await;

        let quota = Arc::new(LocalQuotaSource::new(5));
        let executor = Arc::new(PermitExecutor::new(registry.clone(), store.clone(), quota));
        executor.register_executor("cve", Arc::new(NeverCalled));
        let recovery = RecoveryManager::new(registry.clone(), store, executor);

        let report = recovery.recover().await.unwrap();
        assert_eq!(report, RecoveryReport { total: 1, recovered: 0, skipped: 1 });

        let fsm = registry.lock().unwrap().get("cve").unwrap().clone();
        assert_eq!(fsm.state, ProviderState::Paused);
        assert_eq!(fsm.total_processed, 42);
        assert_eq!(fsm.error_count, 1);
    }

    #[tokio::test]
    async fn running_provider_is_restarted_with_its_persisted_permit_count() {
        let registry = registry_with(ProviderFsm::new("cve", "cve", vec![]));
        let store = Arc::new(meta_store::SqliteCheckpointStore::in_memory().await.unwrap());
        let mut row = base_row("cve", "RUNNING");
        row.permits_held = 3;
        store_row(&store, row).await;

        let quota = Arc::new(LocalQuotaSource::new(5));
        let executor = Arc::new(PermitExecutor::new(registry.clone(), store.clone(), quota.clone()));
        executor.register_executor("cve", Arc::new(OneBatchThenDone));
        let recovery = RecoveryManager::new(registry.clone(), store, executor);

        let report = recovery.recover().await.unwrap();
        assert_eq!(report.recovered, 1);

        for _ in 0..50 {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            if registry.lock().unwrap().get("cve").unwrap().state == ProviderState::Terminated {
                break;
            }
        }
        let fsm = registry.lock().unwrap().get("cve").unwrap().clone();
        assert_eq!(fsm.state, ProviderState::Terminated);
        assert_eq!(fsm.total_processed, 43);
        assert_eq!(quota.outstanding(), 0);
    }

    #[tokio::test]
    async fn unmatched_provider_is_skipped_not_errored() {
        let registry = registry_with(ProviderFsm::new("cve", "cve", vec![]));
        let store = Arc::new(meta_store::SqliteCheckpointStore::in_memory().await.unwrap());
        store_row(&store, base_row("cwe", "RUNNING")).await;

        let quota = Arc::new(LocalQuotaSource::new(5));
        let executor = Arc::new(PermitExecutor::new(registry.clone(), store.clone(), quota));
        let recovery = RecoveryManager::new(registry, store, executor);

        let report = recovery.recover().await.unwrap();
        assert_eq!(report, RecoveryReport { total: 1, recovered: 0, skipped: 1 });
    }

    #[tokio::test]
    async fn running_recovery_pass_is_idempotent() {
        let registry = registry_with(ProviderFsm::new("cve", "cve", vec![]));
        let store = Arc::new(meta_store::SqliteCheckpointStore::in_memory().await.unwrap());
        store_row(&store, base_row("cve", "PAUSED")).await;

        let quota = Arc::new(LocalQuotaSource::new(5));
        let executor = Arc::new(PermitExecutor::new(registry.clone(), store.clone(), quota));
        executor.register_executor("cve", Arc::new(NeverCalled));
        let recovery = RecoveryManager::new(registry.clone(), store, executor);

        let first = recovery.recover().await.unwrap();
        let second = recovery.recover().await.unwrap();
        assert_eq!(first, second);
        let fsm = registry.lock().unwrap().get("cve").unwrap().clone();
        assert_eq!(fsm.total_processed, 42);
    }
}
