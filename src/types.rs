use chrono::Duration;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// unique identifier for a loan account
pub type LoanId = Uuid;

/// unique identifier for a transaction
pub type TransactionId = Uuid;

/// identity of a borrower or admin, opaque to the engine
pub type PartyId = String;

/// how interest is charged over the term
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterestConvention {
    /// flat interest on the original principal, spread evenly
    Simple,
    /// reducing balance, level installment
    CompoundMonthly,
}

/// repayment frequency
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepaymentFrequency {
    Daily,
    Weekly,
    Monthly,
}

impl RepaymentFrequency {
    pub fn periods_per_year(&self) -> u32 {
        match self {
            RepaymentFrequency::Daily => 365,
            RepaymentFrequency::Weekly => 52,
            RepaymentFrequency::Monthly => 12,
        }
    }

    /// fixed-length step for daily and weekly periods; monthly steps are calendar months
    pub fn fixed_step(&self) -> Option<Duration> {
        match self {
            RepaymentFrequency::Daily => Some(Duration::days(1)),
            RepaymentFrequency::Weekly => Some(Duration::weeks(1)),
            RepaymentFrequency::Monthly => None,
        }
    }
}

/// kind of money movement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Disbursement,
    Repayment,
    UserSubmittedPayment,
}

/// verification state of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    PendingVerification,
    AdminVerifiedPaid,
    AdminRejectedProof,
    SystemRecorded,
}

impl VerificationStatus {
    /// no further verification action is possible
    pub fn is_resolved(&self) -> bool {
        !matches!(self, VerificationStatus::PendingVerification)
    }
}

/// how the money moved
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    BankTransfer,
    Cash,
    Card,
    MobileWallet,
    Cheque,
    Other(String),
}

/// what to do with money left after every balance is cleared
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverpaymentPolicy {
    /// refuse the payment with an allocation overflow
    Reject,
    /// keep the excess as a credit owed back to the borrower
    CreditForward,
}
