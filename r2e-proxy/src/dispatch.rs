//! Non-streaming dispatch: send the upstream request once, parse usage,
//! run the post-flight policy check, and settle exactly once.

use r2e_admission::AdmissionResult;
use r2e_ledger::{budget, WebhookSink};
use r2e_policy::{evaluate_response, AgentCaps};
use r2e_router::ModelConfig;
use reqwest::Client;
use serde_json::Value;
use sqlx::PgPool;

use crate::body::{build_upstream_body, rewrite_response_model};
use crate::error::ProxyError;
use crate::usage::{actual_cost_micro, parse_usage};

pub struct DispatchOutcome {
    pub status: u16,
    pub body: Value,
}

/// Send one request upstream and settle the reservation. Every return
/// path — success, non-2xx, transport failure, post-flight denial —
/// settles (commit or release) before returning, so the caller never has
/// to remember to close out the reservation itself.
#[allow(clippy::too_many_arguments)]
pub async fn dispatch_non_streaming(
    client: &Client,
    pool: &PgPool,
    webhooks: &dyn WebhookSink,
    admission: &AdmissionResult,
    model: &ModelConfig,
    caps: &AgentCaps,
    agent: &str,
    provider_api_key: Option<&str>,
    dimensions_denylist: &[String],
) -> Result<DispatchOutcome, ProxyError> {
    budget::mark_dispatched(pool, &admission.execution_id).await?;

    let url = format!("{}{}", admission.route_plan.base_url, admission.route_plan.upstream_path);
    let upstream_body = build_upstream_body(&admission.route_plan, &admission.patched_body, dimensions_denylist);

    let mut request = client.post(&url).json(&upstream_body);
    if let Some(key) = provider_api_key {
        request = request.bearer_auth(key);
    }

    let response = match request.send().await {
        Ok(r) => r,
        Err(err) => {
            release_for_transport_failure(pool, webhooks, agent, admission, &err.to_string()).await?;
            return Err(ProxyError::Transport(err.to_string()));
        }
    };

    let status = response.status().as_u16();
    let body: Value = response.json().await.unwrap_or(Value::Null);

    if status != 200 {
        budget::release(
            pool,
            webhooks,
            agent,
            &admission.execution_id,
            admission.estimated_cost_micro,
            &format!("Upstream returned status {status}"),
            Some(status as i32),
        )
        .await?;
        return Ok(DispatchOutcome { status, body });
    }

    if let Some(reason) = evaluate_response(caps, &body) {
        budget::release(
            pool,
            webhooks,
            agent,
            &admission.execution_id,
            admission.estimated_cost_micro,
            &reason,
            Some(403),
        )
        .await?;
        return Err(ProxyError::PolicyDenied(reason));
    }

    let usage = parse_usage(&body);
    let cost_micro = actual_cost_micro(usage, model);
    let rewritten = rewrite_response_model(&admission.route_plan, body);

    budget::commit(
        pool,
        webhooks,
        agent,
        &admission.execution_id,
        admission.estimated_cost_micro,
        cost_micro,
        usage.prompt_tokens,
        usage.completion_tokens,
        Some(&admission.route_plan.requested_model),
        Some(rewritten.clone()),
        200,
    )
    .await?;

    tracing::info!(
        execution_id = %admission.execution_id,
        agent,
        cost_micro,
        estimated_micro = admission.estimated_cost_micro,
        "settled non-streaming execution"
    );

    Ok(DispatchOutcome { status: 200, body: rewritten })
}

async fn release_for_transport_failure(
    pool: &PgPool,
    webhooks: &dyn WebhookSink,
    agent: &str,
    admission: &AdmissionResult,
    detail: &str,
) -> Result<(), ProxyError> {
    budget::release(
        pool,
        webhooks,
        agent,
        &admission.execution_id,
        admission.estimated_cost_micro,
        &format!("Upstream transport error: {detail}"),
        Some(502),
    )
    .await?;
    Ok(())
}
