use thiserror::Error;

use crate::decimal::Money;
use crate::lifecycle::LoanStatus;
use crate::types::{LoanId, TransactionId};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LedgerError {
    #[error("invalid input: {message}")]
    InvalidInput {
        message: String,
    },

    #[error("illegal transition: {from:?} -> {to:?}")]
    IllegalTransition {
        from: LoanStatus,
        to: LoanStatus,
    },

    #[error("stale state: {message}")]
    StaleState {
        message: String,
    },

    #[error("version conflict on loan {loan_id}: expected {expected}, found {found}")]
    VersionConflict {
        loan_id: LoanId,
        expected: u64,
        found: u64,
    },

    #[error("payment exceeds total outstanding by {excess}")]
    AllocationOverflow {
        excess: Money,
    },

    #[error("loan does not accept payments in status {status:?}")]
    NotAcceptingPayments {
        status: LoanStatus,
    },

    #[error("loan not found: {id}")]
    LoanNotFound {
        id: LoanId,
    },

    #[error("transaction not found: {id}")]
    TransactionNotFound {
        id: TransactionId,
    },

    #[error("notification failed: {message}")]
    Notification {
        message: String,
    },

    #[error("invalid configuration: {message}")]
    InvalidConfiguration {
        message: String,
    },
}

impl LedgerError {
    pub fn invalid_input(message: impl Into<String>) -> Self {
        LedgerError::InvalidInput {
            message: message.into(),
        }
    }

    pub fn stale(message: impl Into<String>) -> Self {
        LedgerError::StaleState {
            message: message.into(),
        }
    }

    /// true for both a resolved-record conflict and an optimistic lock failure
    pub fn is_stale(&self) -> bool {
        matches!(
            self,
            LedgerError::StaleState { .. } | LedgerError::VersionConflict { .. }
        )
    }

    /// only optimistic lock failures are worth retrying
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::VersionConflict { .. })
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;
