//! Agent record loading: the columns admission and auth need from
//! `agents`, collapsed into one row type so callers don't re-derive
//! [`r2e_policy::AgentCaps`] by hand at every call site.

use r2e_policy::AgentCaps;
use sqlx::PgPool;

use crate::error::AdmissionError;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AgentRecord {
    pub name: String,
    pub tenant_id: String,
    pub project_id: String,
    pub token_hash: String,
    pub token_scope: String,
    pub token_expires_at: Option<chrono::DateTime<chrono::Utc>>,
    pub lifecycle_state: String,
    pub budget_micro: i64,
    pub spent_micro: i64,
    pub reserved_micro: i64,
    pub rpm_limit: i64,
    pub tpm_limit: Option<i64>,
    pub max_tokens_per_request: Option<i64>,
    pub max_tokens_per_minute: Option<i64>,
    pub allowed_models: Option<sqlx::types::Json<Vec<String>>>,
    pub allow_streaming: bool,
    pub allow_tools: bool,
    pub allowed_tool_names: Option<sqlx::types::Json<Vec<String>>>,
    pub allow_function_calling: bool,
    pub allow_vision: bool,
    pub strict_mode: bool,
    pub allow_passthrough: bool,
}

const SELECT_COLUMNS: &str = "name, tenant_id, project_id, token_hash, token_scope, token_expires_at,
     lifecycle_state, budget_micro, spent_micro, reserved_micro, rpm_limit, tpm_limit,
     max_tokens_per_request, max_tokens_per_minute, allowed_models, allow_streaming,
     allow_tools, allowed_tool_names, allow_function_calling, allow_vision, strict_mode,
     allow_passthrough";

impl AgentRecord {
    pub async fn load_by_name(pool: &PgPool, name: &str) -> Result<Option<Self>, AdmissionError> {
        let sql = format!("SELECT {SELECT_COLUMNS} FROM agents WHERE name = $1");
        let row = sqlx::query_as::<_, AgentRecord>(&sql)
            .bind(name)
            .fetch_optional(pool)
            .await?;
        Ok(row)
    }

    /// Hashed-token lookup, with a raw-token fallback for legacy rows that
    /// predate hashing (the token column stores the plaintext in that
    /// case, matching the original daemon's migration-era compatibility
    /// shim).
    pub async fn load_by_token(pool: &PgPool, token: &str, token_hash: &str) -> Result<Option<Self>, AdmissionError> {
        let sql = format!("SELECT {SELECT_COLUMNS} FROM agents WHERE token_hash = $1");
        if let Some(row) = sqlx::query_as::<_, AgentRecord>(&sql)
            .bind(token_hash)
            .fetch_optional(pool)
            .await?
        {
            return Ok(Some(row));
        }

        let sql = format!("SELECT {SELECT_COLUMNS} FROM agents WHERE token_hash = $1");
        let legacy = sqlx::query_as::<_, AgentRecord>(&sql)
            .bind(token)
            .fetch_optional(pool)
            .await?;
        Ok(legacy)
    }

    pub fn is_token_expired(&self, now: chrono::DateTime<chrono::Utc>) -> bool {
        self.token_expires_at.is_some_and(|expiry| expiry <= now)
    }

    pub fn is_ready(&self) -> bool {
        self.lifecycle_state == "READY"
    }

    pub fn remaining_micro(&self) -> i64 {
        self.budget_micro - self.spent_micro - self.reserved_micro
    }

    pub fn caps(&self) -> AgentCaps {
        AgentCaps {
            name: self.name.clone(),
            token_scope: self.token_scope.clone(),
            allowed_models: self.allowed_models.as_ref().map(|j| j.0.clone()),
            allow_streaming: self.allow_streaming,
            allow_tools: self.allow_tools,
            allowed_tool_names: self.allowed_tool_names.as_ref().map(|j| j.0.clone()),
            allow_function_calling: self.allow_function_calling,
            allow_vision: self.allow_vision,
            max_input_tokens: None,
            max_output_tokens: self.max_tokens_per_request,
            max_tokens_per_request: self.max_tokens_per_request,
            strict_mode: self.strict_mode,
        }
    }
}
