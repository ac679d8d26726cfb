use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use meta_core::{CoreError, CoreResult};
use meta_fsm::{AutoPauseOutcome, BatchReport, ProviderExecutor, ProviderFsm, ProviderState, Trigger};
use meta_store::{CheckpointRow, CheckpointStore, ProviderStateRow};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::quota::QuotaSource;

/// A live worker task for one provider.
struct ActiveJob {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Converts Start/Pause/Resume/Stop/QuotaRevoked requests into Provider FSM
/// transitions and worker-task lifecycle actions.
///
/// Holds the provider registry directly rather than through the Macro FSM,
/// which is the only component allowed to *register* or *deregister*
/// providers — `PermitExecutor` only mutates a registered provider's live
/// state, never the registry's membership.
pub struct PermitExecutor<Q: QuotaSource> {
    registry: Arc<Mutex<HashMap<String, ProviderFsm>>>,
    executors: Mutex<HashMap<String, Arc<dyn ProviderExecutor>>>,
    active_jobs: Mutex<HashMap<String, ActiveJob>>,
    quota: Arc<Q>,
    store: Arc<dyn CheckpointStore>,
    shutdown_hooks: Mutex<Vec<Arc<dyn Fn() + Send + Sync>>>,
    shutdown_started: std::sync::atomic::AtomicBool,
}

impl<Q: QuotaSource + 'static> PermitExecutor<Q> {
    pub fn new(registry: Arc<Mutex<HashMap<String, ProviderFsm>>>, store: Arc<dyn CheckpointStore>, quota: Arc<Q>) -> Self {
        PermitExecutor {
            registry,
            executors: Mutex::new(HashMap::new()),
            active_jobs: Mutex::new(HashMap::new()),
            quota,
            store,
            shutdown_hooks: Mutex::new(Vec::new()),
            shutdown_started: std::sync::atomic::AtomicBool::new(false),
        }
    }

    pub fn register_executor(&self, provider_id: impl Into<String>, executor: Arc<dyn ProviderExecutor>) {
        self.executors.lock().expect("executors mutex poisoned").insert(provider_id.into(), executor);
    }

    pub fn register_shutdown_hook(&self, hook: Arc<dyn Fn() + Send + Sync>) {
        self.shutdown_hooks.lock().expect("shutdown hooks mutex poisoned").push(hook);
    }

    pub fn get_active_providers(&self) -> Vec<String> {
        self.active_jobs.lock().expect("active jobs mutex poisoned").keys().cloned().collect()
    }

    fn snapshot_row(fsm: &ProviderFsm) -> ProviderStateRow {
        ProviderStateRow {
            provider_id: fsm.provider_id.clone(),
            state: fsm.state.tag().to_string(),
            permits_held: fsm.permits_held,
            total_processed: fsm.total_processed,
            error_count: fsm.error_count,
            last_checkpoint_urn: fsm.last_checkpoint_urn.clone(),
            updated_at: Utc::now(),
        }
    }

    /// `StartProvider(provider, requested_permits)`.
    pub async fn start_provider(self: &Arc<Self>, provider_id: &str, requested_permits: u32) -> CoreResult<()> {
        {
            let mut registry = self.registry.lock().expect("registry mutex poisoned");
            let fsm = registry
                .get_mut(provider_id)
                .ok_or_else(|| CoreError::not_found(format!("unknown provider {provider_id}")))?;
            fsm.apply(Trigger::Start)?;
        }
        self.admit_and_run(provider_id, requested_permits).await
    }

    /// Shared by `StartProvider`, `ResumeProvider`, and the backoff timer:
    /// asks the quota source, transitions `Admitted`, and spawns a worker
    /// if granted permits are nonzero. Rolls back to `IDLE` on any failure
    /// before the worker spawns.
    async fn admit_and_run(self: &Arc<Self>, provider_id: &str, requested_permits: u32) -> CoreResult<()> {
        let granted = self.quota.request(provider_id, requested_permits).await;

        let (snapshot, should_run) = {
            let mut registry = self.registry.lock().expect("registry mutex poisoned");
            let fsm = registry
                .get_mut(provider_id)
                .ok_or_else(|| CoreError::not_found(format!("unknown provider {provider_id}")))?;
            let next = fsm.apply(Trigger::Admitted { granted })?;
            fsm.permits_held = granted;
            (Self::snapshot_row(fsm), next == ProviderState::Running)
        };
        if let Err(e) = self.persist_row(&snapshot).await {
            if granted > 0 {
                self.quota.release(provider_id, granted).await;
            }
            return Err(e);
        }

        if !should_run {
            return Ok(());
        }

        let Some(executor) = self.executors.lock().expect("executors mutex poisoned").get(provider_id).cloned() else {
            self.quota.release(provider_id, granted).await;
            let mut registry = self.registry.lock().expect("registry mutex poisoned");
            if let Some(fsm) = registry.get_mut(provider_id) {
                fsm.permits_held = 0;
            }
            return Err(CoreError::internal(format!("no executor registered for provider {provider_id}")));
        };

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_worker(
            provider_id.to_string(),
            Arc::clone(self),
            executor,
            cancel.clone(),
        ));
        self.active_jobs
            .lock()
            .expect("active jobs mutex poisoned")
            .insert(provider_id.to_string(), ActiveJob { cancel, handle });
        Ok(())
    }

    async fn persist_row(&self, row: &ProviderStateRow) -> CoreResult<()> {
        self.store.upsert_provider_state(row).await
    }

    /// `PauseProvider(id)`. Valid from any state the transition table
    /// allows a Pause trigger from; anything else is rejected as
    /// `InvalidTransition` by the FSM itself.
    pub async fn pause_provider(&self, provider_id: &str) -> CoreResult<()> {
        let snapshot = {
            let mut registry = self.registry.lock().expect("registry mutex poisoned");
            let fsm = registry
                .get_mut(provider_id)
                .ok_or_else(|| CoreError::not_found(format!("unknown provider {provider_id}")))?;
            fsm.apply(Trigger::Pause)?;
            let held = fsm.permits_held;
            fsm.permits_held = 0;
            (Self::snapshot_row(fsm), held)
        };
        let (row, held) = snapshot;
        self.persist_row(&row).await?;
        if held > 0 {
            self.quota.release(provider_id, held).await;
        }
        self.signal_worker_to_exit(provider_id).await;
        Ok(())
    }

    /// `ResumeProvider(id)`: PAUSED → ACQUIRING → RUNNING, re-requesting
    /// the previously-held permit count.
    pub async fn resume_provider(self: &Arc<Self>, provider_id: &str, requested_permits: u32) -> CoreResult<()> {
        {
            let mut registry = self.registry.lock().expect("registry mutex poisoned");
            let fsm = registry
                .get_mut(provider_id)
                .ok_or_else(|| CoreError::not_found(format!("unknown provider {provider_id}")))?;
            fsm.apply(Trigger::Resume)?;
        }
        self.admit_and_run(provider_id, requested_permits).await
    }

    /// `StopProvider(id)`: release permits, signal and await the worker,
    /// persist TERMINATED, drop the ActiveJob.
    pub async fn stop_provider(&self, provider_id: &str) -> CoreResult<()> {
        let held = {
            let mut registry = self.registry.lock().expect("registry mutex poisoned");
            let fsm = registry
                .get_mut(provider_id)
                .ok_or_else(|| CoreError::not_found(format!("unknown provider {provider_id}")))?;
            let held = fsm.permits_held;
            fsm.apply(Trigger::Stop)?;
            fsm.permits_held = 0;
            held
        };
        self.signal_worker_to_exit(provider_id).await;
        if held > 0 {
            self.quota.release(provider_id, held).await;
        }
        let row = {
            let registry = self.registry.lock().expect("registry mutex poisoned");
            Self::snapshot_row(registry.get(provider_id).expect("provider vanished mid-stop"))
        };
        self.persist_row(&row).await
    }

    /// `HandleQuotaRevoked(id, n)`.
    pub async fn handle_quota_revoked(&self, provider_id: &str, n: u32) -> CoreResult<()> {
        let (row, newly_waiting) = {
            let mut registry = self.registry.lock().expect("registry mutex poisoned");
            let fsm = registry
                .get_mut(provider_id)
                .ok_or_else(|| CoreError::not_found(format!("unknown provider {provider_id}")))?;
            let remaining_after = fsm.permits_held.saturating_sub(n);
            let next = fsm.apply(Trigger::QuotaRevoked { remaining_after })?;
            fsm.permits_held = remaining_after;
            (Self::snapshot_row(fsm), next == ProviderState::WaitingQuota)
        };
        self.persist_row(&row).await?;
        if newly_waiting {
            self.signal_worker_to_exit(provider_id).await;
        }
        Ok(())
    }

    async fn signal_worker_to_exit(&self, provider_id: &str) {
        let job = self.active_jobs.lock().expect("active jobs mutex poisoned").remove(provider_id);
        if let Some(job) = job {
            job.cancel.cancel();
            if let Err(e) = job.handle.await {
                warn!(provider_id, error = %e, "worker task panicked during shutdown signal");
            }
        }
    }

    /// `GracefulShutdown`: idempotent. Runs every registered hook, then
    /// stops every ActiveJob.
    pub async fn graceful_shutdown(&self) {
        if self.shutdown_started.swap(true, std::sync::atomic::Ordering::SeqCst) {
            return;
        }
        let hooks: Vec<_> = self.shutdown_hooks.lock().expect("shutdown hooks mutex poisoned").clone();
        for hook in hooks {
            hook();
        }
        let provider_ids = self.get_active_providers();
        for provider_id in provider_ids {
            if let Err(e) = self.stop_provider(&provider_id).await {
                error!(provider_id, error = %e, "failed to stop provider during graceful shutdown");
            }
        }
        info!("graceful shutdown complete");
    }
}

/// The worker task body: runs `execute` in a loop, folding results into
/// the FSM and Checkpoint Store, observing cancellation only between
/// batches.
async fn run_worker<Q: QuotaSource + 'static>(
    provider_id: String,
    exec: Arc<PermitExecutor<Q>>,
    executor: Arc<dyn ProviderExecutor>,
    cancel: CancellationToken,
) {
    let mut items_since_checkpoint: u64 = 0;

    loop {
        if cancel.is_cancelled() {
            return;
        }

        let (batch_size, checkpoint_interval) = {
            let registry = exec.registry.lock().expect("registry mutex poisoned");
            match registry.get(&provider_id) {
                Some(fsm) if fsm.state == ProviderState::Running => (fsm.policy.batch_size, fsm.policy.checkpoint_interval),
                _ => return,
            }
        };

        let mut report = BatchReport::default();
        match executor.execute(batch_size, &mut report).await {
            Ok(more) => {
                let (row, checkpoint, done) = {
                    let mut registry = exec.registry.lock().expect("registry mutex poisoned");
                    let Some(fsm) = registry.get_mut(&provider_id) else { return };
                    let auto_pause = fsm.record_batch(report.items_processed, report.items_errored);
                    if let Some(urn) = &report.last_checkpoint_urn {
                        fsm.record_checkpoint(urn.clone());
                    }

                    let done = if !more {
                        let _ = fsm.apply(meta_fsm::Trigger::Complete);
                        fsm.permits_held = 0;
                        true
                    } else if matches!(auto_pause, AutoPauseOutcome::Paused { .. }) {
                        let _ = fsm.apply(meta_fsm::Trigger::Pause);
                        fsm.permits_held = 0;
                        true
                    } else {
                        false
                    };

                    // Writes a durable checkpoint every `checkpoint_interval`
                    // processed items, plus one final checkpoint on
                    // completion/pause so the last URN observed is never
                    // left unpersisted.
                    items_since_checkpoint += report.items_processed;
                    let due = items_since_checkpoint >= checkpoint_interval as u64 || done;
                    let checkpoint_row = if due {
                        report.last_checkpoint_urn.clone().map(|urn| (urn, report.items_errored == 0))
                    } else {
                        None
                    };
                    if checkpoint_row.is_some() {
                        items_since_checkpoint = 0;
                    }

                    (PermitExecutor::<Q>::snapshot_row(fsm), checkpoint_row, done)
                };

                if let Some((urn, success)) = checkpoint {
                    let seq = exec.store.next_sequence(&provider_id).await.unwrap_or(0);
                    let checkpoint_row = CheckpointRow {
                        provider_id: provider_id.clone(),
                        sequence: seq,
                        urn,
                        success,
                        error_message: None,
                        processed_at: Utc::now(),
                    };
                    if let Err(e) = exec.store.append_checkpoint(&checkpoint_row).await {
                        error!(provider_id = %provider_id, error = %e, "failed to append checkpoint");
                    }
                }
                if let Err(e) = exec.persist_row(&row).await {
                    error!(provider_id = %provider_id, error = %e, "failed to persist provider state");
                }

                if done {
                    exec.active_jobs.lock().expect("active jobs mutex poisoned").remove(&provider_id);
                    return;
                }
            }
            Err(e) => {
                let transient = e.is_transient();
                let (row, held, backoff_attempt, backoff_policy, default_permits) = {
                    let mut registry = exec.registry.lock().expect("registry mutex poisoned");
                    let Some(fsm) = registry.get_mut(&provider_id) else { return };
                    let _ = fsm.apply(meta_fsm::Trigger::ExecErr { transient });
                    let held = fsm.permits_held;
                    fsm.permits_held = 0;
                    (
                        PermitExecutor::<Q>::snapshot_row(fsm),
                        held,
                        fsm.backoff_attempt,
                        fsm.backoff,
                        fsm.default_permits,
                    )
                };
                if let Err(persist_err) = exec.persist_row(&row).await {
                    error!(provider_id = %provider_id, error = %persist_err, "failed to persist after exec error");
                }
                exec.active_jobs.lock().expect("active jobs mutex poisoned").remove(&provider_id);
                if held > 0 {
                    exec.quota.release(&provider_id, held).await;
                }

                if transient {
                    let delay = backoff_policy.delay_for_attempt(backoff_attempt.saturating_sub(1));
                    let exec = Arc::clone(&exec);
                    let provider_id = provider_id.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        {
                            let mut registry = exec.registry.lock().expect("registry mutex poisoned");
                            if let Some(fsm) = registry.get_mut(&provider_id) {
                                if fsm.apply(meta_fsm::Trigger::BackoffElapsed).is_err() {
                                    return;
                                }
                            } else {
                                return;
                            }
                        }
                        if let Err(e) = exec.admit_and_run(&provider_id, default_permits).await {
                            warn!(provider_id = %provider_id, error = %e, "backoff re-admission failed");
                        }
                    });
                }
                return;
            }
        }
    }
}
