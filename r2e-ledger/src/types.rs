use serde::{Deserialize, Serialize};

/// Execution state machine. See `RESERVING -> RESERVED -> DISPATCHED ->
/// RESPONSE_RECEIVED -> COMMITTED` (with `DENIED`/`RELEASED`/`FAILED`
/// terminal branches).
///
/// Stored as plain `TEXT` in Postgres (not a native enum type) so new
/// states can be added without a migration; conversion is manual via
/// [`ExecutionState::as_str`] / [`std::str::FromStr`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionState {
    Reserving,
    Reserved,
    Dispatched,
    ResponseReceived,
    Committed,
    Released,
    Denied,
    Failed,
}

impl ExecutionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ExecutionState::Committed
                | ExecutionState::Released
                | ExecutionState::Denied
                | ExecutionState::Failed
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionState::Reserving => "RESERVING",
            ExecutionState::Reserved => "RESERVED",
            ExecutionState::Dispatched => "DISPATCHED",
            ExecutionState::ResponseReceived => "RESPONSE_RECEIVED",
            ExecutionState::Committed => "COMMITTED",
            ExecutionState::Released => "RELEASED",
            ExecutionState::Denied => "DENIED",
            ExecutionState::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ExecutionState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RESERVING" => Ok(ExecutionState::Reserving),
            "RESERVED" => Ok(ExecutionState::Reserved),
            "DISPATCHED" => Ok(ExecutionState::Dispatched),
            "RESPONSE_RECEIVED" => Ok(ExecutionState::ResponseReceived),
            "COMMITTED" => Ok(ExecutionState::Committed),
            "RELEASED" => Ok(ExecutionState::Released),
            "DENIED" => Ok(ExecutionState::Denied),
            "FAILED" => Ok(ExecutionState::Failed),
            other => Err(format!("unknown execution state: {other}")),
        }
    }
}

/// Reservation state: `RESERVED -> {COMMITTED, RELEASED}`, checked via CAS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReservationState {
    Reserved,
    Committed,
    Released,
}

impl ReservationState {
    pub fn as_str(self) -> &'static str {
        match self {
            ReservationState::Reserved => "RESERVED",
            ReservationState::Committed => "COMMITTED",
            ReservationState::Released => "RELEASED",
        }
    }
}

/// Tenant/project scope, stamped on every admission and ledger row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scope {
    pub tenant_id: String,
    pub project_id: String,
}

pub const DEFAULT_TENANT_ID: &str = "default";
pub const DEFAULT_PROJECT_ID: &str = "default";

impl Scope {
    /// Normalize optional header-supplied scope values: blank or absent
    /// falls back to the `default` tenant/project, matching the original
    /// daemon's `_scope()` helper.
    pub fn resolve(tenant_id: Option<&str>, project_id: Option<&str>) -> Self {
        let tenant = tenant_id
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_TENANT_ID)
            .to_string();
        let project = project_id
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_PROJECT_ID)
            .to_string();
        Scope {
            tenant_id: tenant,
            project_id: project,
        }
    }
}

/// Outcome of [`crate::budget::reserve`].
#[derive(Debug, Clone)]
pub struct ReservationDecision {
    pub execution_id: String,
    pub reserved: bool,
    pub estimated_micro: i64,
    pub reused: bool,
    pub state: Option<ExecutionState>,
    pub status_code: Option<i32>,
    pub response_body: Option<serde_json::Value>,
    pub error_body: Option<serde_json::Value>,
}

/// Cached terminal result, returned verbatim on idempotent replay.
#[derive(Debug, Clone)]
pub struct CachedExecutionResult {
    pub state: ExecutionState,
    pub status_code: Option<i32>,
    pub response_body: Option<serde_json::Value>,
    pub error_body: Option<serde_json::Value>,
    pub request_hash: Option<String>,
}

#[derive(Debug, sqlx::FromRow)]
pub struct AgentLedgerRow {
    pub budget_micro: i64,
    pub spent_micro: i64,
    pub reserved_micro: i64,
    pub lifecycle_state: String,
    pub tenant_id: String,
    pub project_id: String,
}

#[derive(Debug, sqlx::FromRow)]
pub struct ExecutionRow {
    pub state: String,
    pub status_code: Option<i32>,
    pub response_body: Option<serde_json::Value>,
    pub error_body: Option<serde_json::Value>,
    pub request_hash: Option<String>,
    pub agent: String,
    pub tenant_id: String,
    pub project_id: String,
}
