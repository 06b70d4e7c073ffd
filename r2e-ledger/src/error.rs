use r2e_core::HttpError;

/// Ledger-internal error taxonomy. The HTTP layer never sees anything but
/// the mapped [`HttpError`] variants (402, 404, 409, 423, 500) — the
/// propagation rule the rest of the gateway depends on.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("agent not found: {0}")]
    AgentNotFound(String),

    #[error("agent is not mapped to requested tenant")]
    TenantMismatch,

    #[error("agent is not mapped to requested project")]
    ProjectMismatch,

    #[error("agent state is {0}; execution blocked")]
    AgentLocked(String),

    #[error("idempotency conflict: execution_id is already bound to a different request hash")]
    IdempotencyConflict,

    #[error("insufficient budget: estimated={estimated_micro} remaining={remaining_micro}")]
    InsufficientBudget {
        estimated_micro: i64,
        remaining_micro: i64,
    },

    #[error("reservation CAS failed; refusing duplicate settlement")]
    CasConflict,

    #[error("execution {0} missing")]
    ExecutionMissing(String),

    #[error("invalid snapshot tag: {0}")]
    InvalidSnapshotTag(String),

    #[error("no snapshot found for tag {0}")]
    SnapshotNotFound(String),

    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

impl From<LedgerError> for HttpError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::AgentNotFound(_) | LedgerError::ExecutionMissing(_) => {
                HttpError::NotFound(err.to_string())
            }
            LedgerError::TenantMismatch | LedgerError::ProjectMismatch => {
                HttpError::Forbidden(err.to_string())
            }
            LedgerError::AgentLocked(_) => HttpError::Locked(err.to_string()),
            LedgerError::IdempotencyConflict => HttpError::Conflict(err.to_string()),
            LedgerError::InsufficientBudget {
                estimated_micro,
                remaining_micro,
            } => HttpError::PaymentRequired(format!(
                "Insufficient budget: estimated_micro={estimated_micro} remaining_micro={remaining_micro}"
            )),
            LedgerError::InvalidSnapshotTag(_) => HttpError::BadRequest(err.to_string()),
            LedgerError::SnapshotNotFound(_) => HttpError::NotFound(err.to_string()),
            LedgerError::CasConflict | LedgerError::Db(_) => {
                HttpError::Internal(err.to_string())
            }
        }
    }
}
