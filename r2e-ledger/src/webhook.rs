use async_trait::async_trait;
use serde_json::Value;

/// Sink for ledger lifecycle notifications (`budget.reserved`,
/// `budget.committed`, `budget.released`, `execution.denied`,
/// `execution.failed`, ...).
///
/// Dispatch happens after the settling transaction has already committed —
/// a sink failure must never roll back accounting state, only be logged.
/// Matches the original daemon's `dispatch_budget_webhooks`, which is
/// always called outside the `with get_db_connection()` block.
#[async_trait]
pub trait WebhookSink: Send + Sync {
    async fn dispatch(&self, tenant_id: &str, event_type: &str, execution_id: &str, payload: Value);
}

/// Default sink: logs at `debug` and otherwise does nothing. The `aex`
/// binary wires in a real HTTP-delivering sink backed by
/// `webhook_subscriptions`/`webhook_deliveries`; this no-op keeps the
/// ledger crate usable (and testable) without one.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullWebhookSink;

#[async_trait]
impl WebhookSink for NullWebhookSink {
    async fn dispatch(&self, tenant_id: &str, event_type: &str, execution_id: &str, _payload: Value) {
        tracing::debug!(tenant_id, event_type, execution_id, "webhook dispatch skipped (no sink configured)");
    }
}
