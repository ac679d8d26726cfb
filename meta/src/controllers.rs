//! RPC-surface handlers: decode a request payload, call into `Core`,
//! encode the reply. Handler bodies stay thin on purpose — the
//! controller/handler split exists so the FSM/Executor/Store layers
//! never know about the wire format.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use meta_core::{CoreError, CoreResult};
use meta_executor::QuotaSource;
use meta_rpc::{Dispatcher, Handler};
use meta_store::CheckpointQuery;
use meta_transport::Envelope;
use serde_json::{json, Value};

use crate::core::Core;

type HandlerFuture = Pin<Box<dyn Future<Output = CoreResult<Value>> + Send>>;

fn require_str<'a>(payload: &'a Value, field: &str) -> CoreResult<&'a str> {
    payload
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| CoreError::invalid_argument(format!("meta: {field} is required")))
}

fn optional_u32(payload: &Value, field: &str) -> Option<u32> {
    payload.get(field).and_then(Value::as_u64).map(|n| n as u32)
}

fn optional_f64(payload: &Value, field: &str) -> Option<f64> {
    payload.get(field).and_then(Value::as_f64)
}

/// Registers every RPC handler this core answers on `dispatcher`.
pub fn register<R, W, Q>(dispatcher: &mut Dispatcher<R, W>, core: Arc<Core<Q>>)
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
    W: tokio::io::AsyncWrite + Unpin + Send + 'static,
    Q: QuotaSource + 'static,
{
    dispatcher.register("FSMStartProvider", start_provider(core.clone()));
    dispatcher.register("FSMStopProvider", stop_provider(core.clone()));
    dispatcher.register("FSMPauseProvider", pause_provider(core.clone()));
    dispatcher.register("FSMResumeProvider", resume_provider(core.clone()));
    dispatcher.register("FSMListProviders", list_providers(core.clone()));
    dispatcher.register("FSMGetCheckpoints", get_checkpoints(core.clone()));
    dispatcher.register("FSMGetEtlTree", get_etl_tree(core.clone()));
    dispatcher.register("UpdatePerformancePolicy", update_performance_policy(core));
}

fn start_provider<Q: QuotaSource + 'static>(core: Arc<Core<Q>>) -> Handler {
    Arc::new(move |envelope: Envelope| {
        let core = Arc::clone(&core);
        Box::pin(async move {
            let provider_id = require_str(&envelope.payload, "provider_id")?.to_string();
            let requested_permits = optional_u32(&envelope.payload, "requested_permits").unwrap_or(1);
            core.start_provider(&provider_id, requested_permits).await?;
            Ok(json!({"success": true, "provider_id": provider_id}))
        }) as HandlerFuture
    })
}

fn stop_provider<Q: QuotaSource + 'static>(core: Arc<Core<Q>>) -> Handler {
    Arc::new(move |envelope: Envelope| {
        let core = Arc::clone(&core);
        Box::pin(async move {
            let provider_id = require_str(&envelope.payload, "provider_id")?.to_string();
            core.stop_provider(&provider_id).await?;
            Ok(json!({"success": true, "provider_id": provider_id}))
        }) as HandlerFuture
    })
}

fn pause_provider<Q: QuotaSource + 'static>(core: Arc<Core<Q>>) -> Handler {
    Arc::new(move |envelope: Envelope| {
        let core = Arc::clone(&core);
        Box::pin(async move {
            let provider_id = require_str(&envelope.payload, "provider_id")?.to_string();
            core.pause_provider(&provider_id).await?;
            Ok(json!({"success": true, "provider_id": provider_id}))
        }) as HandlerFuture
    })
}

fn resume_provider<Q: QuotaSource + 'static>(core: Arc<Core<Q>>) -> Handler {
    Arc::new(move |envelope: Envelope| {
        let core = Arc::clone(&core);
        Box::pin(async move {
            let provider_id = require_str(&envelope.payload, "provider_id")?.to_string();
            let requested_permits = optional_u32(&envelope.payload, "requested_permits").unwrap_or(1);
            core.resume_provider(&provider_id, requested_permits).await?;
            Ok(json!({"success": true, "provider_id": provider_id}))
        }) as HandlerFuture
    })
}

fn list_providers<Q: QuotaSource + 'static>(core: Arc<Core<Q>>) -> Handler {
    Arc::new(move |_envelope: Envelope| {
        let core = Arc::clone(&core);
        Box::pin(async move { Ok(core.list_providers()) }) as HandlerFuture
    })
}

fn get_checkpoints<Q: QuotaSource + 'static>(core: Arc<Core<Q>>) -> Handler {
    Arc::new(move |envelope: Envelope| {
        let core = Arc::clone(&core);
        Box::pin(async move {
            let provider_id = require_str(&envelope.payload, "provider_id")?.to_string();
            let query = CheckpointQuery {
                limit: optional_u32(&envelope.payload, "limit").map(|n| n as usize).unwrap_or(100),
                success_only: envelope.payload.get("success_only").and_then(Value::as_bool).unwrap_or(false),
            };
            let (checkpoints, total) = core.get_checkpoints(&provider_id, &query).await?;
            let checkpoints: Vec<Value> = checkpoints
                .into_iter()
                .map(|c| {
                    json!({
                        "urn": c.urn,
                        "provider_id": c.provider_id,
                        "processed_at": c.processed_at,
                        "success": c.success,
                        "error_message": c.error_message,
                    })
                })
                .collect();
            Ok(json!({"checkpoints": checkpoints, "total": total}))
        }) as HandlerFuture
    })
}

fn get_etl_tree<Q: QuotaSource + 'static>(core: Arc<Core<Q>>) -> Handler {
    Arc::new(move |_envelope: Envelope| {
        let core = Arc::clone(&core);
        Box::pin(async move { Ok(core.get_etl_tree()) }) as HandlerFuture
    })
}

fn update_performance_policy<Q: QuotaSource + 'static>(core: Arc<Core<Q>>) -> Handler {
    Arc::new(move |envelope: Envelope| {
        let core = Arc::clone(&core);
        Box::pin(async move {
            let provider_id = require_str(&envelope.payload, "provider_id")?.to_string();
            let policy = envelope
                .payload
                .get("policy")
                .ok_or_else(|| CoreError::invalid_argument("meta: policy is required"))?;
            let batch_size = optional_u32(policy, "batch_size");
            let checkpoint_interval = optional_u32(policy, "checkpoint_interval");
            let failure_threshold = optional_f64(policy, "failure_threshold");
            core.update_performance_policy(&provider_id, batch_size, checkpoint_interval, failure_threshold)?;
            Ok(json!({"success": true}))
        }) as HandlerFuture
    })
}
