//! Default `WebhookSink`: records delivery bookkeeping rows against
//! every subscription matching `(tenant_id, event_type)` without
//! performing any network I/O. The real HTTP sender is an external
//! adapter — this sink only guarantees every dispatched event has a
//! durable, queryable delivery row.

use async_trait::async_trait;
use r2e_codec::canonical_json;
use r2e_ledger::WebhookSink;
use serde_json::Value;
use sqlx::PgPool;

pub struct LoggingWebhookSink {
    pool: PgPool,
}

impl LoggingWebhookSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WebhookSink for LoggingWebhookSink {
    async fn dispatch(&self, tenant_id: &str, event_type: &str, execution_id: &str, payload: Value) {
        tracing::debug!(tenant_id, event_type, execution_id, "webhook event");

        let subscriptions: Vec<(i64,)> = match sqlx::query_as(
            "SELECT id FROM webhook_subscriptions
             WHERE tenant_id = $1 AND event_types @> to_jsonb($2::text)",
        )
        .bind(tenant_id)
        .bind(event_type)
        .fetch_all(&self.pool)
        .await
        {
            Ok(rows) => rows,
            Err(err) => {
                tracing::warn!(error = %err, "failed to look up webhook subscriptions");
                return;
            }
        };

        let payload_json = canonical_json(&payload);
        for (subscription_id,) in subscriptions {
            let result = sqlx::query(
                "INSERT INTO webhook_deliveries
                    (subscription_id, event_type, execution_id, payload_json, attempts, status)
                 VALUES ($1, $2, $3, $4, 0, 'pending')",
            )
            .bind(subscription_id)
            .bind(event_type)
            .bind(execution_id)
            .bind(&payload_json)
            .execute(&self.pool)
            .await;

            if let Err(err) = result {
                tracing::warn!(error = %err, subscription_id, "failed to record webhook delivery");
            }
        }
    }
}
