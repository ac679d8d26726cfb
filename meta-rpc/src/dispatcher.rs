use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use meta_core::{CoreError, CoreResult};
use meta_transport::{Envelope, EnvelopeType, TransportReader, TransportWriter};
use serde_json::Value;
use tracing::{error, warn};

use crate::client::handle_reply_via;
use crate::error_payload;

type PendingTable = std::sync::Mutex<HashMap<String, tokio::sync::oneshot::Sender<CoreResult<Value>>>>;
type HandlerFuture = Pin<Box<dyn Future<Output = CoreResult<Value>> + Send>>;
pub type Handler = Arc<dyn Fn(Envelope) -> HandlerFuture + Send + Sync>;

/// Owns the reader half of the bus and drives the single reader loop: one
/// task decodes envelopes in order, and handler work fans out onto spawned
/// tasks so a slow handler never blocks the next read.
///
/// Requests are routed to a registered handler and run on `tokio::spawn`;
/// replies (`type=response`/`type=error`) are routed to the `RpcClient`'s
/// pending table. Both paths write back through the same shared writer.
pub struct Dispatcher<R, W> {
    reader: TransportReader<R>,
    writer: Arc<tokio::sync::Mutex<TransportWriter<W>>>,
    pending: Arc<PendingTable>,
    process_id: String,
    handlers: HashMap<String, Handler>,
}

impl<R, W> Dispatcher<R, W>
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
    W: tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(
        process_id: impl Into<String>,
        reader: TransportReader<R>,
        writer: Arc<tokio::sync::Mutex<TransportWriter<W>>>,
        pending: Arc<PendingTable>,
    ) -> Self {
        Dispatcher {
            reader,
            writer,
            pending,
            process_id: process_id.into(),
            handlers: HashMap::new(),
        }
    }

    /// Register a handler for method `name`. Requests for unregistered
    /// methods get a `NotFound` error envelope back.
    pub fn register(&mut self, name: impl Into<String>, handler: Handler) {
        self.handlers.insert(name.into(), handler);
    }

    /// Run the reader loop until the transport hits clean EOF. Each
    /// request is dispatched onto its own spawned task so one slow or
    /// cancelled handler never delays reading the next envelope.
    pub async fn run(mut self) {
        loop {
            let envelope = match self.reader.recv_one().await {
                Ok(Some(envelope)) => envelope,
                Ok(None) => return,
                Err(e) => {
                    warn!(error = %e, "skipping malformed envelope");
                    continue;
                }
            };

            match envelope.kind {
                EnvelopeType::Request => self.dispatch_request(envelope),
                EnvelopeType::Response | EnvelopeType::Error => {
                    handle_reply_via(&self.pending, envelope);
                }
            }
        }
    }

    fn dispatch_request(&self, envelope: Envelope) {
        let method = envelope.id.clone();
        let source = envelope.source.clone();
        let correlation_id = envelope.correlation_id.clone();
        let process_id = self.process_id.clone();
        let writer = Arc::clone(&self.writer);

        let Some(handler) = self.handlers.get(&method).cloned() else {
            tokio::spawn(async move {
                let err = CoreError::not_found(format!("no handler registered for method {method}"));
                let reply = error_envelope(&method, &process_id, &source, &correlation_id, &err);
                if let Err(e) = writer.lock().await.send_one(&reply).await {
                    error!(error = %e, "failed writing NotFound reply");
                }
            });
            return;
        };

        tokio::spawn(async move {
            let outcome = handler(envelope).await;
            let reply = match outcome {
                Ok(payload) => Envelope::response(&method, &process_id, &source, &correlation_id, payload),
                Err(err) => error_envelope(&method, &process_id, &source, &correlation_id, &err),
            };
            if let Err(e) = writer.lock().await.send_one(&reply).await {
                error!(error = %e, "failed writing handler reply");
            }
        });
    }
}

fn error_envelope(method: &str, source: &str, target: &str, correlation_id: &str, err: &CoreError) -> Envelope {
    Envelope {
        kind: EnvelopeType::Error,
        id: method.to_string(),
        source: source.to_string(),
        target: target.to_string(),
        correlation_id: correlation_id.to_string(),
        payload: error_payload::encode(err),
        error: Some(err.wire_message()),
    }
}
