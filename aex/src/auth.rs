//! Bearer-token authentication extractor. Runs before admission: it only
//! establishes *who* is calling (existence + token expiry), not whether
//! the agent is allowed to execute right now — the lifecycle gate is
//! admission's step 1, not auth's job.

use axum::extract::{FromRequestParts, State};
use axum::http::request::Parts;
use r2e_admission::AgentRecord;
use r2e_core::HttpError;
use sha2::{Digest, Sha256};

use crate::state::AppState;

pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex_lower(&hasher.finalize())
}

fn hex_lower(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{b:02x}"));
    }
    out
}

/// An authenticated agent plus the raw bearer token (needed downstream
/// for provider passthrough credential checks).
pub struct AuthenticatedAgent {
    pub agent: AgentRecord,
    pub raw_token: String,
}

impl FromRequestParts<AppState> for AuthenticatedAgent {
    type Rejection = HttpError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let State(state) = State::<AppState>::from_request_parts(parts, state)
            .await
            .map_err(|_| HttpError::Internal("failed to extract application state".into()))?;

        let header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| HttpError::Unauthorized("missing Authorization header".to_string()))?;

        let token = header
            .strip_prefix("Bearer ")
            .ok_or_else(|| HttpError::Unauthorized("Authorization header must use Bearer scheme".to_string()))?
            .trim();
        if token.is_empty() {
            return Err(HttpError::Unauthorized("empty bearer token".to_string()));
        }

        let token_hash = hash_token(token);
        let agent = AgentRecord::load_by_token(&state.pool, token, &token_hash)
            .await
            .map_err(HttpError::from)?
            .ok_or_else(|| HttpError::Unauthorized("unknown agent token".to_string()))?;

        if agent.is_token_expired(chrono::Utc::now()) {
            return Err(HttpError::Unauthorized("agent token expired".to_string()));
        }

        Ok(AuthenticatedAgent { agent, raw_token: token.to_string() })
    }
}

/// Guards `/admin/*` routes against `x-aex-admin-key`. Absence of a
/// configured admin key locks the surface down entirely rather than
/// defaulting open.
pub struct AdminGuard;

impl FromRequestParts<AppState> for AdminGuard {
    type Rejection = HttpError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let State(state) = State::<AppState>::from_request_parts(parts, state)
            .await
            .map_err(|_| HttpError::Internal("failed to extract application state".into()))?;

        let configured = state
            .admin_key
            .as_deref()
            .ok_or_else(|| HttpError::Forbidden("admin surface is disabled".to_string()))?;

        let provided = parts
            .headers
            .get("x-aex-admin-key")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| HttpError::Forbidden("missing x-aex-admin-key".to_string()))?;

        if provided != configured {
            return Err(HttpError::Forbidden("invalid x-aex-admin-key".to_string()));
        }

        Ok(AdminGuard)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_token_is_stable_and_hex() {
        let a = hash_token("sk-test-123");
        let b = hash_token("sk-test-123");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn hash_token_differs_for_different_tokens() {
        assert_ne!(hash_token("a"), hash_token("b"));
    }
}
