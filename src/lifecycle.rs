//! Loan status state machine.
//!
//! Every status change goes through [`LoanStatus::transition`], which consults a
//! single transition table. Preconditions that depend on ledger state (disbursement
//! recorded, days overdue, installment cleared) are checked by the guard functions
//! below before a transition is requested.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{LedgerError, Result};
use crate::state::LoanAccount;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LoanStatus {
    /// application received, not yet reviewed
    QueryInitiated,
    /// waiting on an admin decision
    PendingAdminVerification,
    /// borrower must supply more documents
    AdditionalInfoRequired,
    Rejected,
    /// approved, funds not yet released
    Approved,
    /// disbursed and performing
    Active,
    /// past due beyond the grace period
    Overdue,
    Defaulted,
    PaidOff,
}

impl LoanStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            LoanStatus::Rejected | LoanStatus::Defaulted | LoanStatus::PaidOff
        )
    }

    /// statuses in which repayments may be posted
    pub fn accepts_payments(&self) -> bool {
        matches!(
            self,
            LoanStatus::Active | LoanStatus::Overdue | LoanStatus::Defaulted
        )
    }

    /// statuses the overdue scanner looks at
    pub fn is_servicing(&self) -> bool {
        matches!(self, LoanStatus::Active | LoanStatus::Overdue)
    }

    pub fn can_transition_to(&self, to: LoanStatus) -> bool {
        use LoanStatus::*;

        matches!(
            (self, to),
            (QueryInitiated, PendingAdminVerification)
                | (QueryInitiated, AdditionalInfoRequired)
                | (QueryInitiated, Rejected)
                | (PendingAdminVerification, Approved)
                | (PendingAdminVerification, AdditionalInfoRequired)
                | (PendingAdminVerification, Rejected)
                | (AdditionalInfoRequired, PendingAdminVerification)
                | (AdditionalInfoRequired, Rejected)
                | (Approved, Active)
                | (Active, Overdue)
                | (Active, PaidOff)
                | (Overdue, Active)
                | (Overdue, Defaulted)
                | (Overdue, PaidOff)
        )
    }

    /// checked transition against the table
    pub fn transition(self, to: LoanStatus) -> Result<LoanStatus> {
        if self.can_transition_to(to) {
            Ok(to)
        } else {
            Err(LedgerError::IllegalTransition { from: self, to })
        }
    }
}

/// a status change the caller must persist and announce
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
    pub from: LoanStatus,
    pub to: LoanStatus,
    pub at: DateTime<Utc>,
}

/// move a loan to a new status, stamping the change
pub fn apply_transition(
    loan: &mut LoanAccount,
    to: LoanStatus,
    at: DateTime<Utc>,
) -> Result<StatusChange> {
    let from = loan.status;
    loan.status = from.transition(to)?;
    loan.last_status_change = at;
    Ok(StatusChange { from, to, at })
}

/// Approved -> Active needs a disbursement and a schedule
pub fn ensure_can_activate(loan: &LoanAccount, has_disbursement: bool) -> Result<()> {
    if !has_disbursement {
        return Err(LedgerError::invalid_input(
            "activation requires a recorded disbursement",
        ));
    }
    if loan.schedule.is_empty() {
        return Err(LedgerError::invalid_input(
            "activation requires a repayment schedule",
        ));
    }
    Ok(())
}

/// Active -> Overdue once the grace period has passed
pub fn is_overdue(loan: &LoanAccount, now: DateTime<Utc>, grace_period_days: u32) -> bool {
    loan.days_past_due(now) > grace_period_days
}

/// Overdue -> Defaulted once days overdue exceed the threshold
pub fn is_defaultable(loan: &LoanAccount, now: DateTime<Utc>, default_after_days: u32) -> bool {
    loan.days_past_due(now) > default_after_days
}

/// Overdue -> Active once no installment is past due beyond the grace period
pub fn clears_overdue(loan: &LoanAccount, now: DateTime<Utc>, grace_period_days: u32) -> bool {
    !is_overdue(loan, now, grace_period_days)
}
