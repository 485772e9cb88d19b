pub mod penalty;
pub mod waterfall;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::decimal::Money;
use crate::errors::{LedgerError, Result};
use crate::state::LoanAccount;

pub use penalty::{days_late, PenaltyAssessment, PenaltyEngine};
pub use waterfall::{AllocationResult, PaymentAllocator};

/// the slice of a loan the allocation engine reads
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LoanSnapshot {
    pub principal_outstanding: Money,
    /// interest charged so far and not yet paid
    pub interest_outstanding: Money,
    /// scheduled interest for later periods, payable once principal is cleared
    pub deferred_interest: Money,
    /// late penalty already collected against the current due date
    pub penalty_already_charged: Money,
    pub next_payment_due_date: Option<DateTime<Utc>>,
    pub next_payment_amount: Option<Money>,
}

impl LoanSnapshot {
    pub fn total_outstanding(&self) -> Money {
        self.principal_outstanding + self.interest_outstanding
    }
}

impl From<&LoanAccount> for LoanSnapshot {
    fn from(loan: &LoanAccount) -> Self {
        Self {
            principal_outstanding: loan.current_principal_outstanding,
            interest_outstanding: loan.current_interest_outstanding,
            deferred_interest: loan.deferred_interest(),
            penalty_already_charged: loan.penalty_already_charged(),
            next_payment_due_date: loan.next_payment_due_date,
            next_payment_amount: loan.next_payment_amount,
        }
    }
}

/// payment amounts must be positive whole cents
pub fn validate_amount(amount: Money) -> Result<()> {
    if !amount.is_positive() {
        return Err(LedgerError::invalid_input(format!(
            "payment amount must be positive, got {}",
            amount
        )));
    }
    if amount.round_currency() != amount {
        return Err(LedgerError::invalid_input(format!(
            "payment amount {} has sub-cent precision",
            amount
        )));
    }
    Ok(())
}

/// a payment cannot be dated in the future or before the funds went out
pub fn validate_payment_date(
    loan: &LoanAccount,
    payment_date: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<()> {
    if payment_date > now {
        return Err(LedgerError::invalid_input(format!(
            "payment date {} is in the future",
            payment_date
        )));
    }
    if let Some(disbursed_at) = loan.disbursed_at {
        if payment_date < disbursed_at {
            return Err(LedgerError::invalid_input(format!(
                "payment date {} is before disbursement on {}",
                payment_date, disbursed_at
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LoanTerms;
    use crate::decimal::Rate;
    use chrono::{Duration, TimeZone};
    use uuid::Uuid;

    #[test]
    fn test_amount_validation() {
        assert!(validate_amount(Money::ZERO).is_err());
        assert!(validate_amount(Money::from_major(-10)).is_err());
        assert!(validate_amount(Money::from_str_exact("10.005").unwrap()).is_err());
        assert!(validate_amount(Money::from_str_exact("10.05").unwrap()).is_ok());
    }

    #[test]
    fn test_payment_date_window() {
        let disbursed = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let now = disbursed + Duration::days(40);
        let terms = LoanTerms::monthly_emi(Money::from_major(1_000), Rate::from_percentage(12), 6);
        let mut loan = LoanAccount::new_application(Uuid::new_v4(), "b".to_string(), terms, disbursed);
        loan.disbursed_at = Some(disbursed);

        assert!(validate_payment_date(&loan, disbursed, now).is_ok());
        assert!(validate_payment_date(&loan, now, now).is_ok());
        assert!(matches!(
            validate_payment_date(&loan, now + Duration::seconds(1), now),
            Err(LedgerError::InvalidInput { .. })
        ));
        assert!(matches!(
            validate_payment_date(&loan, disbursed - Duration::days(1), now),
            Err(LedgerError::InvalidInput { .. })
        ));
    }
}
