//! Ties the Macro FSM, the provider registry, the Permit Executor, and the
//! Checkpoint Store into the single facade the RPC handlers call into.
//! Controllers translate inbound RPC requests into Permit-Executor and
//! FSM calls against this facade.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use meta_core::{CoreError, CoreResult};
use meta_executor::{PermitExecutor, QuotaSource};
use meta_fsm::{MacroFsm, MacroState, ProviderExecutor, ProviderFsm, ProviderState};
use meta_store::{CheckpointQuery, CheckpointRow, CheckpointStore};
use serde_json::{json, Value};

pub struct Core<Q: QuotaSource + 'static> {
    registry: Arc<Mutex<HashMap<String, ProviderFsm>>>,
    macro_fsm: Mutex<MacroFsm>,
    executor: Arc<PermitExecutor<Q>>,
    store: Arc<dyn CheckpointStore>,
}

impl<Q: QuotaSource + 'static> Core<Q> {
    pub fn new(store: Arc<dyn CheckpointStore>, quota: Arc<Q>) -> Self {
        let registry: Arc<Mutex<HashMap<String, ProviderFsm>>> = Arc::new(Mutex::new(HashMap::new()));
        let executor = Arc::new(PermitExecutor::new(registry.clone(), store.clone(), quota));
        Core {
            registry,
            macro_fsm: Mutex::new(MacroFsm::new()),
            executor,
            store,
        }
    }

    pub fn executor(&self) -> &Arc<PermitExecutor<Q>> {
        &self.executor
    }

    pub fn registry(&self) -> &Arc<Mutex<HashMap<String, ProviderFsm>>> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn CheckpointStore> {
        &self.store
    }

    /// Registers a provider with the Macro FSM. Only valid during
    /// BOOTSTRAPPING, since the Macro FSM is the only component allowed
    /// to mutate the provider registry's membership.
    pub fn register_provider(
        &self,
        provider_id: impl Into<String>,
        kind: impl Into<String>,
        dependencies: Vec<String>,
        default_permits: u32,
        executor: Arc<dyn ProviderExecutor>,
    ) -> CoreResult<()> {
        if self.macro_fsm.lock().expect("macro fsm mutex poisoned").state() != MacroState::Bootstrapping {
            return Err(CoreError::invalid_transition("providers may only be registered while BOOTSTRAPPING"));
        }
        let provider_id = provider_id.into();
        let fsm = ProviderFsm::new(provider_id.clone(), kind, dependencies).with_default_permits(default_permits);
        self.registry.lock().expect("registry mutex poisoned").insert(provider_id.clone(), fsm);
        self.executor.register_executor(provider_id, executor);
        Ok(())
    }

    /// Runs the Recovery Manager's process-start pass, then leaves
    /// BOOTSTRAPPING.
    pub async fn run_recovery(&self) -> CoreResult<meta_recovery::RecoveryReport> {
        let recovery = meta_recovery::RecoveryManager::new(self.registry.clone(), self.store.clone(), self.executor.clone());
        let report = recovery.recover().await?;
        self.macro_fsm.lock().expect("macro fsm mutex poisoned").finish_bootstrapping()?;
        Ok(report)
    }

    pub async fn start_provider(&self, provider_id: &str, requested_permits: u32) -> CoreResult<()> {
        if !self.macro_fsm.lock().expect("macro fsm mutex poisoned").accepts_new_starts() {
            return Err(CoreError::invalid_transition("macro FSM is not accepting new provider starts"));
        }
        self.check_dependencies_satisfied(provider_id)?;
        self.executor.start_provider(provider_id, requested_permits).await?;
        self.refresh_macro_mix();
        Ok(())
    }

    pub async fn pause_provider(&self, provider_id: &str) -> CoreResult<()> {
        self.executor.pause_provider(provider_id).await?;
        self.refresh_macro_mix();
        Ok(())
    }

    pub async fn resume_provider(&self, provider_id: &str, requested_permits: u32) -> CoreResult<()> {
        self.executor.resume_provider(provider_id, requested_permits).await?;
        self.refresh_macro_mix();
        Ok(())
    }

    pub async fn stop_provider(&self, provider_id: &str) -> CoreResult<()> {
        self.executor.stop_provider(provider_id).await?;
        self.refresh_macro_mix();
        Ok(())
    }

    /// A provider with a non-empty dependency list cannot leave IDLE until
    /// every listed dependency is TERMINATED with success. A terminated
    /// provider counts as successful if it never recorded an error — this
    /// core has no separate success flag, so `error_count == 0` is the
    /// success proxy (see DESIGN.md).
    fn check_dependencies_satisfied(&self, provider_id: &str) -> CoreResult<()> {
        let registry = self.registry.lock().expect("registry mutex poisoned");
        let fsm = registry.get(provider_id).ok_or_else(|| CoreError::not_found(format!("unknown provider {provider_id}")))?;
        if fsm.dependencies.is_empty() {
            return Ok(());
        }
        let terminal_success: HashMap<String, bool> = registry
            .iter()
            .map(|(id, f)| (id.clone(), f.state == ProviderState::Terminated && f.error_count == 0))
            .collect();
        if fsm.dependencies_satisfied(&terminal_success) {
            Ok(())
        } else {
            Err(CoreError::invalid_transition(format!("provider {provider_id} has unsatisfied dependencies")))
        }
    }

    fn refresh_macro_mix(&self) {
        let (unsettled, total) = {
            let registry = self.registry.lock().expect("registry mutex poisoned");
            let total = registry.len();
            let unsettled = registry
                .values()
                .filter(|f| matches!(f.state, ProviderState::Paused | ProviderState::WaitingQuota))
                .count();
            (unsettled, total)
        };
        self.macro_fsm.lock().expect("macro fsm mutex poisoned").observe_provider_mix(unsettled, total);
    }

    pub fn list_providers(&self) -> Value {
        let registry = self.registry.lock().expect("registry mutex poisoned");
        let providers: Vec<Value> = registry
            .values()
            .map(|f| json!({"id": f.provider_id, "type": f.kind, "state": f.state.tag()}))
            .collect();
        json!({"providers": providers, "count": providers.len()})
    }

    pub async fn get_checkpoints(&self, provider_id: &str, query: &CheckpointQuery) -> CoreResult<(Vec<CheckpointRow>, u64)> {
        self.store.list_checkpoints(provider_id, query).await
    }

    pub fn get_etl_tree(&self) -> Value {
        let registry = self.registry.lock().expect("registry mutex poisoned");
        let macro_state = self.macro_fsm.lock().expect("macro fsm mutex poisoned").state();
        let providers: Vec<Value> = registry
            .values()
            .map(|f| {
                json!({
                    "id": f.provider_id,
                    "type": f.kind,
                    "state": f.state.tag(),
                    "dependencies": f.dependencies,
                    "permits_held": f.permits_held,
                    "total_processed": f.total_processed,
                    "error_count": f.error_count,
                    "last_checkpoint_urn": f.last_checkpoint_urn,
                })
            })
            .collect();
        json!({"macro_fsm": {"state": macro_state.tag()}, "providers": providers})
    }

    pub fn update_performance_policy(
        &self,
        provider_id: &str,
        batch_size: Option<u32>,
        checkpoint_interval: Option<u32>,
        failure_threshold: Option<f64>,
    ) -> CoreResult<()> {
        let mut registry = self.registry.lock().expect("registry mutex poisoned");
        let fsm = registry
            .get_mut(provider_id)
            .ok_or_else(|| CoreError::not_found(format!("unknown provider {provider_id}")))?;
        if let Some(batch_size) = batch_size {
            fsm.policy.batch_size = batch_size;
        }
        if let Some(checkpoint_interval) = checkpoint_interval {
            fsm.policy.checkpoint_interval = checkpoint_interval;
        }
        if let Some(failure_threshold) = failure_threshold {
            fsm.policy.failure_threshold = failure_threshold;
        }
        Ok(())
    }

    /// `GracefulShutdown`: enters DRAINING (no new starts), stops existing
    /// providers with their state checkpointed, then TERMINATED.
    pub async fn graceful_shutdown(&self) {
        let _ = self.macro_fsm.lock().expect("macro fsm mutex poisoned").begin_draining();
        self.executor.graceful_shutdown().await;
        let _ = self.macro_fsm.lock().expect("macro fsm mutex poisoned").finish_draining();
    }
}
