use sea_orm::error::DbErr;
use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced by the ledger and scheduling services.
///
/// Business-rule violations (`InsufficientStock`, `NotFound`, `Conflict`,
/// `InvalidPeriod`) are recoverable by the caller. Transport faults raised
/// by the scheduler are absorbed at the poll loop and logged, never
/// propagated to job dispatch.
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] DbErr),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Insufficient stock: requested {requested}, {available} remaining")]
    InsufficientStock { requested: i64, available: i64 },

    #[error("Concurrent modification of order {0}")]
    Conflict(Uuid),

    #[error("Invalid reporting period: {0}")]
    InvalidPeriod(String),

    #[error("Queue error: {0}")]
    QueueError(String),

    #[error("Scheduler transport error: {0}")]
    SchedulerTransport(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl ServiceError {
    pub fn not_found(entity: &str, id: Uuid) -> Self {
        Self::NotFound(format!("{entity} {id} not found"))
    }

    /// Whether the caller can fix the request and retry.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::NotFound(_)
                | Self::ValidationError(_)
                | Self::InsufficientStock { .. }
                | Self::InvalidPeriod(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insufficient_stock_reports_shortfall() {
        let err = ServiceError::InsufficientStock {
            requested: 5,
            available: 2,
        };
        let msg = err.to_string();
        assert!(msg.contains("requested 5"));
        assert!(msg.contains("2 remaining"));
        assert!(err.is_client_error());
    }

    #[test]
    fn transport_faults_are_not_client_errors() {
        assert!(!ServiceError::SchedulerTransport("broker down".into()).is_client_error());
    }
}
