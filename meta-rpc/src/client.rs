use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use meta_core::{CoreError, CoreResult};
use meta_transport::{Envelope, TransportWriter};
use serde_json::Value;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::correlation::CorrelationIdGenerator;
use crate::error_payload;

type PendingTable = Mutex<HashMap<String, oneshot::Sender<CoreResult<Value>>>>;

/// Issues correlated requests over a shared writer and resolves the
/// matching reply when the dispatcher's reader loop hands one back via
/// `handle_reply`.
///
/// One pending entry per in-flight call, keyed by correlation id, guarded
/// by a single mutex — not a sharded map — for a straightforward no-leak,
/// at-most-once delivery guarantee.
pub struct RpcClient<W> {
    process_id: String,
    writer: Arc<tokio::sync::Mutex<TransportWriter<W>>>,
    ids: CorrelationIdGenerator,
    pending: Arc<PendingTable>,
}

impl<W> RpcClient<W>
where
    W: tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(process_id: impl Into<String>, writer: Arc<tokio::sync::Mutex<TransportWriter<W>>>) -> Self {
        let process_id = process_id.into();
        RpcClient {
            ids: CorrelationIdGenerator::new(process_id.clone()),
            process_id,
            writer,
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// A cloneable handle to the pending table, for wiring into a `Dispatcher`
    /// so inbound replies can be routed back to a waiting `invoke`.
    pub fn pending_handle(&self) -> Arc<PendingTable> {
        Arc::clone(&self.pending)
    }

    /// Send a request to `target` and await its reply, up to `timeout`, or
    /// until `cancel` fires. Every exit path removes the pending entry
    /// exactly once: normal reply delivery removes it in `handle_reply`;
    /// timeout and cancellation remove it here. Both sides tolerate the
    /// entry already being gone.
    pub async fn invoke(
        &self,
        target: &str,
        method: &str,
        payload: Value,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> CoreResult<Value> {
        let correlation_id = self.ids.next();
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .expect("pending table mutex poisoned")
            .insert(correlation_id.clone(), tx);

        let request = Envelope::request(method, &self.process_id, target, &correlation_id, payload);
        if let Err(e) = self.writer.lock().await.send_one(&request).await {
            self.pending
                .lock()
                .expect("pending table mutex poisoned")
                .remove(&correlation_id);
            return Err(e);
        }

        let outcome = tokio::select! {
            biased;
            reply = rx => match reply {
                Ok(result) => result,
                Err(_) => Err(CoreError::Internal("rpc reply sender dropped without a reply".into())),
            },
            _ = cancel.cancelled() => {
                self.pending.lock().expect("pending table mutex poisoned").remove(&correlation_id);
                Err(CoreError::Cancelled)
            }
            _ = tokio::time::sleep(timeout) => {
                self.pending.lock().expect("pending table mutex poisoned").remove(&correlation_id);
                Err(CoreError::Timeout)
            }
        };
        outcome
    }

    /// Called by the dispatcher's reader loop when a `type=response` or
    /// `type=error` envelope arrives. Unknown correlation ids (already
    /// timed out, already delivered, or never ours) are logged and dropped.
    pub fn handle_reply(&self, envelope: Envelope) {
        handle_reply_via(&self.pending, envelope);
    }
}

/// Free function so a `Dispatcher` can route replies without holding a
/// borrow of the whole `RpcClient` — it only needs the pending table.
pub(crate) fn handle_reply_via(pending: &PendingTable, envelope: Envelope) {
    let sender = pending
        .lock()
        .expect("pending table mutex poisoned")
        .remove(&envelope.correlation_id);
    let Some(sender) = sender else {
        warn!(correlation_id = %envelope.correlation_id, "reply for unknown or already-resolved correlation id");
        return;
    };
    let outcome = match envelope.kind {
        meta_transport::EnvelopeType::Error => {
            let message = envelope.error.clone().unwrap_or_default();
            Err(error_payload::decode(&envelope.payload, &message))
        }
        _ => Ok(envelope.payload),
    };
    // The receiver may already be gone if `invoke` timed out between the
    // reply arriving and this send; that's a normal race, not a bug.
    let _ = sender.send(outcome);
}

#[cfg(test)]
mod tests {
    use super::*;
    use meta_transport::Transport;
    use serde_json::json;

    async fn writer_only() -> Arc<tokio::sync::Mutex<TransportWriter<tokio::io::DuplexStream>>> {
        let (read_half, write_half) = tokio::io::duplex(4096);
        let (_reader, transport_writer) = Transport::new(read_half, write_half).split();
        Arc::new(tokio::sync::Mutex::new(transport_writer))
    }

    #[tokio::test]
    async fn delivers_a_successful_reply_to_the_waiting_invoke() {
        let (client_read, server_write) = tokio::io::duplex(4096);
        let (server_read, client_write) = tokio::io::duplex(4096);
        let (_client_reader, client_writer) = Transport::new(client_read, client_write).split();
        let (mut server_reader, server_writer) = Transport::new(server_read, server_write).split();

        let client = RpcClient::new("meta", Arc::new(tokio::sync::Mutex::new(client_writer)));
        let cancel = CancellationToken::new();

        let server_writer = Arc::new(tokio::sync::Mutex::new(server_writer));
        let invoke_fut = client.invoke("provider-core", "FSMListProviders", json!({}), Duration::from_secs(5), &cancel);

        let responder = async {
            let request = server_reader.recv_one().await.unwrap().unwrap();
            let reply = Envelope::response(&request.id, "provider-core", "meta", &request.correlation_id, json!({"providers": []}));
            server_writer.lock().await.send_one(&reply).await.unwrap();
        };

        let (result, _) = tokio::join!(invoke_fut, responder);
        assert_eq!(result.unwrap(), json!({"providers": []}));
    }

    #[tokio::test]
    async fn times_out_when_no_reply_arrives() {
        let writer = writer_only().await;
        let client = RpcClient::new("meta", writer);
        let cancel = CancellationToken::new();
        let err = client
            .invoke("provider-core", "FSMListProviders", json!({}), Duration::from_millis(20), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Timeout));
        assert!(client.pending.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn cancellation_resolves_before_timeout() {
        let writer = writer_only().await;
        let client = RpcClient::new("meta", writer);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = client
            .invoke("provider-core", "FSMListProviders", json!({}), Duration::from_secs(5), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Cancelled));
    }

    #[tokio::test]
    async fn reply_for_unknown_correlation_id_is_dropped_not_panicking() {
        let writer = writer_only().await;
        let client = RpcClient::new("meta", writer);
        let stray = Envelope::response("FSMListProviders", "provider-core", "meta", "rpc-stray-1-1", json!({}));
        client.handle_reply(stray);
    }
}
