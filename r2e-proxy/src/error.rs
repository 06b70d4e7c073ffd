use r2e_core::HttpError;
use r2e_ledger::LedgerError;

/// Proxy-internal error taxonomy. Upstream and transport failures never
/// reach the caller as anything but 502/403 — the ledger's own errors
/// (404/409/423/402/500) pass through via [`LedgerError`]'s mapping.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("upstream returned status {0}")]
    Upstream(u16, serde_json::Value),

    #[error("policy denied post-flight: {0}")]
    PolicyDenied(String),

    #[error("upstream transport error: {0}")]
    Transport(String),
}

impl From<ProxyError> for HttpError {
    fn from(err: ProxyError) -> Self {
        match err {
            ProxyError::Ledger(e) => e.into(),
            ProxyError::Upstream(status, body) => HttpError::Custom {
                status: reqwest_status_to_axum(status),
                body,
            },
            ProxyError::PolicyDenied(msg) => HttpError::Forbidden(msg),
            ProxyError::Transport(msg) => HttpError::BadGateway(msg),
        }
    }
}

fn reqwest_status_to_axum(status: u16) -> r2e_core::http::StatusCode {
    r2e_core::http::StatusCode::from_u16(status).unwrap_or(r2e_core::http::StatusCode::BAD_GATEWAY)
}
