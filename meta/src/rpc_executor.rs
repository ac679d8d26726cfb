//! A `ProviderExecutor` that delegates the actual fetch/parse/store work to
//! a remote service over the RPC Client, implementing the batching,
//! URN-derivation, field-level-diff, and checkpointing parts of the
//! provider execution contract generically.
//!
//! The concrete catalog parsers (CVE/CWE/CAPEC/ATT&CK/SSG/ASVS) are out of
//! scope for this core — this adapter is what every one of them would sit
//! behind, each parameterized by `source`/`kind`/`storage_target`.

use std::time::Duration;

use async_trait::async_trait;
use meta_core::{CoreError, CoreResult, Urn};
use meta_fsm::{diff_fields, BatchReport, FieldDiff, More, ProviderExecutor};
use meta_rpc::RpcClient;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

/// One fetched item from the upstream source service, ahead of diffing.
struct FetchedItem {
    id: String,
    data: Value,
}

pub struct RpcBackedExecutor<W> {
    rpc: std::sync::Arc<RpcClient<W>>,
    provider_id: String,
    /// Process id of the service that owns the raw catalog data (fetch target).
    source_service: String,
    /// Process id of the service that owns the indexed storage (diff/write target).
    storage_service: String,
    /// URN namespace segment, e.g. `"nvd"`.
    source: String,
    /// URN kind segment, e.g. `"cve"`.
    kind: String,
    rpc_timeout: Duration,
}

impl<W> RpcBackedExecutor<W>
where
    W: tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(
        rpc: std::sync::Arc<RpcClient<W>>,
        provider_id: impl Into<String>,
        source_service: impl Into<String>,
        storage_service: impl Into<String>,
        source: impl Into<String>,
        kind: impl Into<String>,
        rpc_timeout: Duration,
    ) -> Self {
        RpcBackedExecutor {
            rpc,
            provider_id: provider_id.into(),
            source_service: source_service.into(),
            storage_service: storage_service.into(),
            source: source.into(),
            kind: kind.into(),
            rpc_timeout,
        }
    }

    async fn fetch_batch(&self, batch_size: u32) -> CoreResult<(Vec<FetchedItem>, bool)> {
        let cancel = CancellationToken::new();
        let reply = self
            .rpc
            .invoke(
                &self.source_service,
                "FetchBatch",
                json!({"provider_id": self.provider_id, "batch_size": batch_size}),
                self.rpc_timeout,
                &cancel,
            )
            .await?;

        let items = reply
            .get("items")
            .and_then(Value::as_array)
            .ok_or_else(|| CoreError::internal("FetchBatch reply missing 'items' array"))?;
        let has_more = reply.get("has_more").and_then(Value::as_bool).unwrap_or(false);

        let mut fetched = Vec::with_capacity(items.len());
        for item in items {
            let id = item
                .get("id")
                .and_then(Value::as_str)
                .ok_or_else(|| CoreError::internal("fetched item missing 'id'"))?
                .to_string();
            let data = item
                .get("data")
                .cloned()
                .ok_or_else(|| CoreError::internal("fetched item missing 'data'"))?;
            fetched.push(FetchedItem { id, data });
        }
        Ok((fetched, has_more))
    }

    async fn existing_record(&self, urn: &Urn) -> CoreResult<Option<Value>> {
        let cancel = CancellationToken::new();
        let reply = self
            .rpc
            .invoke(&self.storage_service, "StorageGet", json!({"urn": urn.to_string()}), self.rpc_timeout, &cancel)
            .await?;
        Ok(match reply.get("record") {
            Some(Value::Null) | None => None,
            Some(record) => Some(record.clone()),
        })
    }

    async fn write_record(&self, urn: &Urn, diff: &Value) -> CoreResult<()> {
        let cancel = CancellationToken::new();
        self.rpc
            .invoke(
                &self.storage_service,
                "StorageWrite",
                json!({"urn": urn.to_string(), "fields": diff}),
                self.rpc_timeout,
                &cancel,
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl<W> ProviderExecutor for RpcBackedExecutor<W>
where
    W: tokio::io::AsyncWrite + Unpin + Send + Sync + 'static,
{
    /// One call = one batch. Fetches up to `batch_size` items, diffs and
    /// writes each, and records the latest processed URN in `report` —
    /// the worker loop that calls this decides, from the configured
    /// `checkpoint_interval`, when that URN actually gets persisted.
    async fn execute(&self, batch_size: u32, report: &mut BatchReport) -> CoreResult<More> {
        let (items, has_more) = self.fetch_batch(batch_size).await?;

        for item in items {
            let urn = Urn::new(self.source.as_str(), self.kind.as_str(), item.id.as_str())?;
            let existing = self.existing_record(&urn).await?;
            match diff_fields(existing.as_ref(), &item.data, "id") {
                FieldDiff::NoOp => {
                    report.record_success(urn.to_string());
                }
                FieldDiff::Create(full) | FieldDiff::Update(full) => match self.write_record(&urn, &full).await {
                    Ok(()) => report.record_success(urn.to_string()),
                    Err(_) => report.record_error(),
                },
            }
        }

        Ok(has_more)
    }
}
