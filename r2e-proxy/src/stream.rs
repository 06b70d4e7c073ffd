//! Streaming SSE dispatch: relay the upstream chunked response to the
//! client while folding AEX accounting in, settling the reservation
//! exactly once no matter how the relay ends.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use futures_util::StreamExt;
use r2e_admission::AdmissionResult;
use r2e_ledger::{budget, WebhookSink};
use r2e_router::{ModelConfig, RoutePlan};
use reqwest::Client;
use serde_json::Value;
use sqlx::PgPool;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::body::build_upstream_body;
use crate::error::ProxyError;
use crate::usage::{actual_cost_micro, estimate_tokens_from_text, parse_usage, Usage};

pub type ByteStream = ReceiverStream<Result<Bytes, std::io::Error>>;

/// Guards the settle-exactly-once invariant. The relay task flips
/// `settled` to `true` itself on the normal-completion path; if the task
/// instead returns early (client disconnect, panic during send) the
/// `Drop` impl performs the release that the normal path skipped. A
/// plain local `bool` wouldn't survive an early `return`; this does.
struct SettleGuard {
    pool: PgPool,
    webhooks: Arc<dyn WebhookSink>,
    agent: String,
    execution_id: String,
    estimated_micro: i64,
    settled: Arc<AtomicBool>,
}

impl Drop for SettleGuard {
    fn drop(&mut self) {
        if self.settled.swap(true, Ordering::SeqCst) {
            return;
        }
        let pool = self.pool.clone();
        let webhooks = self.webhooks.clone();
        let agent = self.agent.clone();
        let execution_id = self.execution_id.clone();
        let estimated_micro = self.estimated_micro;
        tokio::spawn(async move {
            if let Err(err) = budget::release(
                &pool,
                webhooks.as_ref(),
                &agent,
                &execution_id,
                estimated_micro,
                "Stream ended without settlement (client disconnect)",
                Some(502),
            )
            .await
            {
                tracing::error!(execution_id, error = %err, critical = true, "failed to release abandoned stream reservation");
            }
        });
    }
}

/// Open the upstream stream and hand back a byte stream the HTTP layer
/// can wrap into an SSE response body. Settlement happens in a spawned
/// task that outlives the call; by the time this function returns, the
/// execution is already DISPATCHED and a reservation is guaranteed to
/// exist.
#[allow(clippy::too_many_arguments)]
pub async fn dispatch_streaming(
    client: Client,
    pool: PgPool,
    webhooks: Arc<dyn WebhookSink>,
    admission: AdmissionResult,
    model: ModelConfig,
    agent: String,
    provider_api_key: Option<String>,
    dimensions_denylist: &[String],
) -> Result<ByteStream, ProxyError> {
    budget::mark_dispatched(&pool, &admission.execution_id).await?;

    let url = format!("{}{}", admission.route_plan.base_url, admission.route_plan.upstream_path);
    let upstream_body = build_upstream_body(&admission.route_plan, &admission.patched_body, dimensions_denylist);

    let mut request = client.post(&url).json(&upstream_body);
    if let Some(key) = &provider_api_key {
        request = request.bearer_auth(key);
    }

    let response = match request.send().await {
        Ok(r) => r,
        Err(err) => {
            budget::release(
                &pool,
                webhooks.as_ref(),
                &agent,
                &admission.execution_id,
                admission.estimated_cost_micro,
                &format!("Upstream transport error: {err}"),
                Some(502),
            )
            .await?;
            return Err(ProxyError::Transport(err.to_string()));
        }
    };

    let status = response.status().as_u16();
    if status != 200 {
        let body_text = response.text().await.unwrap_or_default();
        budget::release(
            &pool,
            webhooks.as_ref(),
            &agent,
            &admission.execution_id,
            admission.estimated_cost_micro,
            &format!("Upstream returned status {status}"),
            Some(status as i32),
        )
        .await?;
        let error_value: Value =
            serde_json::from_str(&body_text).unwrap_or_else(|_| serde_json::json!({"detail": body_text}));
        return Err(ProxyError::Upstream(status, error_value));
    }

    let (tx, rx) = mpsc::channel::<Result<Bytes, std::io::Error>>(16);
    let settled = Arc::new(AtomicBool::new(false));
    let guard = SettleGuard {
        pool: pool.clone(),
        webhooks: webhooks.clone(),
        agent: agent.clone(),
        execution_id: admission.execution_id.clone(),
        estimated_micro: admission.estimated_cost_micro,
        settled: settled.clone(),
    };

    tokio::spawn(relay_stream(response, tx, pool, webhooks, admission, model, agent, settled, guard));

    Ok(ReceiverStream::new(rx))
}

#[allow(clippy::too_many_arguments)]
async fn relay_stream(
    response: reqwest::Response,
    tx: mpsc::Sender<Result<Bytes, std::io::Error>>,
    pool: PgPool,
    webhooks: Arc<dyn WebhookSink>,
    admission: AdmissionResult,
    model: ModelConfig,
    agent: String,
    settled: Arc<AtomicBool>,
    guard: SettleGuard,
) {
    let mut byte_stream = response.bytes_stream();
    let mut buffer: Vec<u8> = Vec::new();
    let mut usage = Usage::default();
    let mut saw_usage = false;

    loop {
        let chunk = match byte_stream.next().await {
            Some(Ok(chunk)) => chunk,
            Some(Err(err)) => {
                tracing::warn!(execution_id = %admission.execution_id, error = %err, "upstream stream read error");
                break;
            }
            None => break,
        };
        buffer.extend_from_slice(&chunk);

        while let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw).trim_end().to_string();
            if line.is_empty() {
                continue;
            }
            if let Some(out) = process_line(&line, &admission.route_plan, &mut usage, &mut saw_usage) {
                if tx.send(Ok(Bytes::from(out))).await.is_err() {
                    // Client disconnected; the guard's Drop releases.
                    drop(guard);
                    return;
                }
            }
        }
    }

    if settled.swap(true, Ordering::SeqCst) {
        return;
    }

    let cost_micro = actual_cost_micro(usage, &model);
    if let Err(err) = budget::commit(
        &pool,
        webhooks.as_ref(),
        &agent,
        &admission.execution_id,
        admission.estimated_cost_micro,
        cost_micro,
        usage.prompt_tokens,
        usage.completion_tokens,
        Some(&admission.route_plan.requested_model),
        None,
        200,
    )
    .await
    {
        tracing::error!(execution_id = %admission.execution_id, error = %err, critical = true, "failed to commit streamed execution");
    }

    drop(guard);
}

/// Transform one already-trimmed upstream line. `None` means "drop it"
/// (never happens today, kept for parity with the `passthrough-unchanged`
/// rule applying to an empty transform).
fn process_line(line: &str, route: &RoutePlan, usage: &mut Usage, saw_usage: &mut bool) -> Option<String> {
    if !line.starts_with("data:") {
        return Some(format!("{line}\n"));
    }

    let payload = line["data:".len()..].trim();
    if payload == "[DONE]" {
        return Some("data: [DONE]\n\n".to_string());
    }

    let Ok(mut value) = serde_json::from_str::<Value>(payload) else {
        return Some(format!("{line}\n"));
    };

    if let Some(response_usage) = value.get("usage").filter(|u| !u.is_null()) {
        *usage = parse_usage(&serde_json::json!({ "usage": response_usage }));
        *saw_usage = true;
    } else if !*saw_usage {
        if let Some(delta_text) = extract_delta_text(&value) {
            usage.completion_tokens += estimate_tokens_from_text(&delta_text);
        }
    }

    if let Value::Object(ref mut map) = value {
        map.insert("model".to_string(), Value::String(route.requested_model.clone()));
    }

    Some(format!("data: {value}\n\n"))
}

fn extract_delta_text(value: &Value) -> Option<String> {
    value
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first())
        .and_then(|choice| choice.get("delta"))
        .and_then(|delta| delta.get("content"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route() -> RoutePlan {
        RoutePlan {
            requested_model: "gpt-4o".to_string(),
            provider_name: "openai".to_string(),
            provider_model: "gpt-4o-2024".to_string(),
            base_url: "https://example.test".to_string(),
            upstream_path: "/chat/completions".to_string(),
            route_hash: "hash".to_string(),
        }
    }

    #[test]
    fn passes_non_data_lines_through() {
        let mut usage = Usage::default();
        let mut saw_usage = false;
        let out = process_line(": keep-alive", &route(), &mut usage, &mut saw_usage);
        assert_eq!(out, Some(": keep-alive\n".to_string()));
    }

    #[test]
    fn done_sentinel_gets_double_newline() {
        let mut usage = Usage::default();
        let mut saw_usage = false;
        let out = process_line("data: [DONE]", &route(), &mut usage, &mut saw_usage);
        assert_eq!(out, Some("data: [DONE]\n\n".to_string()));
    }

    #[test]
    fn rewrites_model_in_data_chunk() {
        let mut usage = Usage::default();
        let mut saw_usage = false;
        let chunk = r#"data: {"model":"gpt-4o-2024","choices":[{"delta":{"content":"hi"}}]}"#;
        let out = process_line(chunk, &route(), &mut usage, &mut saw_usage).unwrap();
        assert!(out.contains("\"model\":\"gpt-4o\""));
        assert_eq!(usage.completion_tokens, 1);
    }

    #[test]
    fn usage_field_overrides_delta_estimate() {
        let mut usage = Usage::default();
        let mut saw_usage = false;
        let chunk = r#"data: {"model":"gpt-4o-2024","usage":{"prompt_tokens":5,"completion_tokens":20}}"#;
        process_line(chunk, &route(), &mut usage, &mut saw_usage).unwrap();
        assert!(saw_usage);
        assert_eq!(usage, Usage { prompt_tokens: 5, completion_tokens: 20 });
    }
}
