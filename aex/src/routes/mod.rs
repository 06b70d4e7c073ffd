pub mod admin;
pub mod proxy;
pub mod tools;
pub mod v2;

use axum::Router;

use crate::state::AppState;

/// Assemble the gateway's full router by hand — no controller/DI macro
/// indirection, since AEX (like the rest of this gateway) wires its
/// `Router` directly.
pub fn build_router(state: AppState) -> Router {
    let openai_routes = Router::new()
        .route("/chat/completions", axum::routing::post(proxy::chat_completions))
        .route("/responses", axum::routing::post(proxy::responses))
        .route("/embeddings", axum::routing::post(proxy::embeddings))
        .route("/tools/execute", axum::routing::post(tools::execute_tool));

    let v2_routes = Router::new()
        .route("/admission/check", axum::routing::post(v2::admission_check))
        .route("/settlement/commit", axum::routing::post(v2::settlement_commit))
        .route("/settlement/release", axum::routing::post(v2::settlement_release))
        .route("/webhooks/subscriptions", axum::routing::post(v2::create_webhook_subscription))
        .route("/webhooks/subscriptions", axum::routing::get(v2::list_webhook_subscriptions));

    let admin_routes = Router::new()
        .route("/replay", axum::routing::get(admin::replay))
        .route("/alerts", axum::routing::get(admin::alerts))
        .route("/activity", axum::routing::get(admin::activity))
        .route("/dashboard/data", axum::routing::get(admin::dashboard_data))
        .route("/reload_config", axum::routing::post(admin::reload_config))
        .route("/snapshot", axum::routing::post(admin::snapshot))
        .route("/snapshot/rollback", axum::routing::post(admin::snapshot_rollback));

    Router::new()
        .nest("/v1", openai_routes.clone())
        .nest("/openai/v1", openai_routes)
        .nest("/api/v2", v2_routes)
        .nest("/admin", admin_routes)
        .route("/ready", axum::routing::get(admin::ready))
        .with_state(state)
}
