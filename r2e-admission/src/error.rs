use r2e_core::HttpError;
use r2e_ledger::LedgerError;
use r2e_policy::PolicyDecision;
use r2e_router::RouteError;

/// Admission-internal error taxonomy. Every variant here maps to one of
/// the HTTP statuses the external error taxonomy promises callers: 400,
/// 402, 403, 404, 409, 423, 429, 500.
#[derive(Debug, thiserror::Error)]
pub enum AdmissionError {
    #[error("agent not found: {0}")]
    AgentNotFound(String),

    #[error("agent state is {0}; execution blocked")]
    AgentLocked(String),

    #[error("{0}")]
    ModelNotAllowed(String),

    #[error("{0}")]
    UnsupportedEndpoint(String),

    #[error("agent is not mapped to requested tenant")]
    TenantMismatch,

    #[error("agent is not mapped to requested project")]
    ProjectMismatch,

    #[error("{0}")]
    RateLimited(String),

    #[error("policy denied: {0}")]
    PolicyDenied(String),

    #[error("idempotency conflict: execution_id is already bound to a different request hash")]
    IdempotencyConflict,

    #[error("execution is still in progress; retry later")]
    ExecutionInProgress,

    #[error("insufficient budget: estimated={estimated_micro} remaining={remaining_micro}")]
    InsufficientBudget {
        estimated_micro: i64,
        remaining_micro: i64,
    },

    #[error(transparent)]
    Db(#[from] sqlx::Error),

    #[error("internal admission error: {0}")]
    Internal(String),
}

/// The outcome of a completed policy evaluation that denied the request,
/// carried alongside [`AdmissionError::PolicyDenied`] so callers can log
/// the full trace without re-running the engine.
#[derive(Debug, Clone)]
pub struct PolicyDenial(pub PolicyDecision);

impl From<RouteError> for AdmissionError {
    fn from(err: RouteError) -> Self {
        match err {
            RouteError::ModelNotAllowed(_) | RouteError::ProviderNotConfigured(_) => {
                AdmissionError::ModelNotAllowed(err.to_string())
            }
            RouteError::UnsupportedEndpoint(_) => AdmissionError::UnsupportedEndpoint(err.to_string()),
        }
    }
}

impl From<LedgerError> for AdmissionError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::AgentNotFound(name) => AdmissionError::AgentNotFound(name),
            LedgerError::AgentLocked(state) => AdmissionError::AgentLocked(state),
            LedgerError::TenantMismatch => AdmissionError::TenantMismatch,
            LedgerError::ProjectMismatch => AdmissionError::ProjectMismatch,
            LedgerError::IdempotencyConflict => AdmissionError::IdempotencyConflict,
            LedgerError::InsufficientBudget {
                estimated_micro,
                remaining_micro,
            } => AdmissionError::InsufficientBudget {
                estimated_micro,
                remaining_micro,
            },
            LedgerError::CasConflict => AdmissionError::Internal(err.to_string()),
            LedgerError::ExecutionMissing(id) => AdmissionError::Internal(format!("execution missing: {id}")),
            LedgerError::Db(e) => AdmissionError::Db(e),
        }
    }
}

impl From<AdmissionError> for HttpError {
    fn from(err: AdmissionError) -> Self {
        match err {
            AdmissionError::AgentNotFound(_) => HttpError::NotFound(err.to_string()),
            AdmissionError::AgentLocked(_) => HttpError::Locked(err.to_string()),
            AdmissionError::ModelNotAllowed(msg) => HttpError::Forbidden(msg),
            AdmissionError::UnsupportedEndpoint(msg) => HttpError::BadRequest(msg),
            AdmissionError::TenantMismatch | AdmissionError::ProjectMismatch => {
                HttpError::Forbidden(err.to_string())
            }
            AdmissionError::RateLimited(msg) => HttpError::TooManyRequests(msg),
            AdmissionError::PolicyDenied(msg) => HttpError::Forbidden(msg),
            AdmissionError::IdempotencyConflict => HttpError::Conflict(err.to_string()),
            AdmissionError::ExecutionInProgress => HttpError::Conflict(err.to_string()),
            AdmissionError::InsufficientBudget {
                estimated_micro,
                remaining_micro,
            } => HttpError::PaymentRequired(format!(
                "Insufficient budget: estimated_micro={estimated_micro} remaining_micro={remaining_micro}"
            )),
            AdmissionError::Db(_) | AdmissionError::Internal(_) => HttpError::Internal(err.to_string()),
        }
    }
}
