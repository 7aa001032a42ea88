use crate::pricing::{Charge, ModelPricingTable};
use crate::urp::Usage;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BillingRecord {
    pub request_id: Option<String>,
    pub channel_id: String,
    pub model: String,
    pub usage: Usage,
    pub charge: Charge,
    pub created_at: DateTime<Utc>,
}

/// Usage captured at response time, priced later.
#[derive(Debug, Clone)]
pub struct PendingCharge {
    pub request_id: Option<String>,
    pub channel_id: String,
    pub model: String,
    pub usage: Usage,
}

#[async_trait]
pub trait BillingSink: Send + Sync {
    async fn record(&self, record: BillingRecord) -> Result<(), String>;
}

/// Emits each record as a structured log line.
#[derive(Debug, Clone, Default)]
pub struct TracingBillingSink;

#[async_trait]
impl BillingSink for TracingBillingSink {
    async fn record(&self, record: BillingRecord) -> Result<(), String> {
        tracing::info!(
            request_id = record.request_id.as_deref().unwrap_or(""),
            channel_id = %record.channel_id,
            model = %record.model,
            prompt_tokens = record.usage.prompt_tokens,
            completion_tokens = record.usage.completion_tokens,
            cached_tokens = record.usage.cached_tokens,
            image_count = record.usage.image_count,
            charge_nano_usd = %record.charge.total_nano_usd,
            "billing record"
        );
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryBillingSink {
    records: Arc<Mutex<Vec<BillingRecord>>>,
}

impl MemoryBillingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn records(&self) -> Vec<BillingRecord> {
        self.records.lock().await.clone()
    }
}

#[async_trait]
impl BillingSink for MemoryBillingSink {
    async fn record(&self, record: BillingRecord) -> Result<(), String> {
        self.records.lock().await.push(record);
        Ok(())
    }
}

/// Prices `pending` and hands the record to `sink`. Failures are logged, not
/// retried.
pub async fn settle(pricing: &ModelPricingTable, sink: &dyn BillingSink, pending: PendingCharge) {
    let charge = match pricing.price(&pending.model, &pending.usage) {
        Ok(charge) => charge,
        Err(err) => {
            tracing::error!(
                channel_id = %pending.channel_id,
                model = %pending.model,
                "billing skipped: {err}"
            );
            return;
        }
    };
    let total = u64::try_from(charge.total_nano_usd).unwrap_or(0);
    metrics::counter!("relay_charge_nano_usd_total", "model" => pending.model.clone())
        .increment(total);

    let record = BillingRecord {
        request_id: pending.request_id,
        channel_id: pending.channel_id,
        model: pending.model,
        usage: pending.usage,
        charge,
        created_at: Utc::now(),
    };
    if let Err(err) = sink.record(record).await {
        tracing::error!("failed to write billing record: {err}");
    }
}
