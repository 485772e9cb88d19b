use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::decimal::Money;
use crate::types::{LoanId, PartyId, PaymentMethod, TransactionId, TransactionType, VerificationStatus};

/// immutable record of a money movement
///
/// The allocation breakdown is filled exactly once, when the ledger applies the
/// transaction; `applied_at` marks that moment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub loan_id: LoanId,
    pub kind: TransactionType,
    pub amount: Money,
    pub payment_date: DateTime<Utc>,
    pub method: PaymentMethod,
    pub proof_ref: Option<String>,

    // allocation breakdown
    pub principal_applied: Money,
    pub interest_applied: Money,
    pub penalty_applied: Money,
    pub overpayment_credited: Money,
    pub is_late: bool,
    pub days_late: u32,

    // verification
    pub verification_status: VerificationStatus,
    pub submitted_by: PartyId,
    pub verified_by: Option<PartyId>,
    pub verified_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,

    pub created_at: DateTime<Utc>,
    pub applied_at: Option<DateTime<Utc>>,
}

impl Transaction {
    fn new(
        loan_id: LoanId,
        kind: TransactionType,
        amount: Money,
        payment_date: DateTime<Utc>,
        method: PaymentMethod,
        verification_status: VerificationStatus,
        submitted_by: PartyId,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            loan_id,
            kind,
            amount,
            payment_date,
            method,
            proof_ref: None,
            principal_applied: Money::ZERO,
            interest_applied: Money::ZERO,
            penalty_applied: Money::ZERO,
            overpayment_credited: Money::ZERO,
            is_late: false,
            days_late: 0,
            verification_status,
            submitted_by,
            verified_by: None,
            verified_at: None,
            rejection_reason: None,
            created_at,
            applied_at: None,
        }
    }

    /// funds released to the borrower; recorded as already applied
    pub fn disbursement(
        loan_id: LoanId,
        amount: Money,
        method: PaymentMethod,
        admin: PartyId,
        now: DateTime<Utc>,
    ) -> Self {
        let mut tx = Self::new(
            loan_id,
            TransactionType::Disbursement,
            amount,
            now,
            method,
            VerificationStatus::SystemRecorded,
            admin,
            now,
        );
        tx.applied_at = Some(now);
        tx
    }

    /// repayment entered directly by an admin, trusted without verification
    pub fn recorded_repayment(
        loan_id: LoanId,
        amount: Money,
        payment_date: DateTime<Utc>,
        method: PaymentMethod,
        admin: PartyId,
        now: DateTime<Utc>,
    ) -> Self {
        let mut tx = Self::new(
            loan_id,
            TransactionType::Repayment,
            amount,
            payment_date,
            method,
            VerificationStatus::SystemRecorded,
            admin.clone(),
            now,
        );
        tx.verified_by = Some(admin);
        tx.verified_at = Some(now);
        tx
    }

    /// borrower's unauthenticated claim of payment, held until an admin decides
    pub fn user_submission(
        loan_id: LoanId,
        amount: Money,
        payment_date: DateTime<Utc>,
        method: PaymentMethod,
        proof_ref: Option<String>,
        borrower: PartyId,
        now: DateTime<Utc>,
    ) -> Self {
        let mut tx = Self::new(
            loan_id,
            TransactionType::UserSubmittedPayment,
            amount,
            payment_date,
            method,
            VerificationStatus::PendingVerification,
            borrower,
            now,
        );
        tx.proof_ref = proof_ref;
        tx
    }

    pub fn is_applied(&self) -> bool {
        self.applied_at.is_some()
    }

    pub fn is_pending(&self) -> bool {
        self.verification_status == VerificationStatus::PendingVerification
    }

    /// cleared to move money on the ledger
    pub fn is_cleared_for_ledger(&self) -> bool {
        matches!(
            self.verification_status,
            VerificationStatus::SystemRecorded | VerificationStatus::AdminVerifiedPaid
        )
    }

    pub fn allocated_total(&self) -> Money {
        self.principal_applied + self.interest_applied + self.penalty_applied
    }
}
