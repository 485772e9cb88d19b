use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::PenaltyConfig;
use crate::decimal::Money;
use crate::errors::Result;

use super::penalty::{PenaltyAssessment, PenaltyEngine};
use super::{validate_amount, LoanSnapshot};

/// how one payment splits across the waterfall
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AllocationResult {
    pub amount: Money,
    pub payment_date: DateTime<Utc>,
    pub penalty_applied: Money,
    pub interest_applied: Money,
    pub principal_applied: Money,
    /// money left after principal and all scheduled interest are cleared
    pub overpayment: Money,
    pub is_late: bool,
    pub days_late: u32,
    /// full penalty owed, which may exceed what this payment covered
    pub penalty_assessed: Money,
}

impl AllocationResult {
    pub fn total_applied(&self) -> Money {
        self.penalty_applied + self.interest_applied + self.principal_applied
    }

    pub fn has_overpayment(&self) -> bool {
        self.overpayment.is_positive()
    }
}

#[derive(Debug, Clone, Copy)]
enum Component {
    Penalty,
    Interest,
    Principal,
    /// later periods' scheduled interest; only reached once principal is cleared
    DeferredInterest,
}

/// fixed priority: penalty, then interest, then principal
const WATERFALL: [Component; 4] = [
    Component::Penalty,
    Component::Interest,
    Component::Principal,
    Component::DeferredInterest,
];

/// the one allocation engine used by every payment path
#[derive(Debug, Clone)]
pub struct PaymentAllocator {
    penalties: PenaltyEngine,
}

impl PaymentAllocator {
    pub fn new(penalty_config: PenaltyConfig) -> Self {
        Self {
            penalties: PenaltyEngine::new(penalty_config),
        }
    }

    pub fn penalties(&self) -> &PenaltyEngine {
        &self.penalties
    }

    /// split a payment without touching any loan state
    pub fn allocate(
        &self,
        snapshot: &LoanSnapshot,
        amount: Money,
        payment_date: DateTime<Utc>,
    ) -> Result<AllocationResult> {
        validate_amount(amount)?;

        let assessment = self.penalties.assess(snapshot, payment_date);
        let mut result = AllocationResult {
            amount,
            payment_date,
            penalty_applied: Money::ZERO,
            interest_applied: Money::ZERO,
            principal_applied: Money::ZERO,
            overpayment: Money::ZERO,
            is_late: assessment.days_late > 0,
            days_late: assessment.days_late,
            penalty_assessed: assessment.amount,
        };

        let mut remaining = amount;
        for component in WATERFALL {
            remaining = apply_to_component(component, remaining, snapshot, &assessment, &mut result);
            if remaining.is_zero() {
                break;
            }
        }

        result.overpayment = remaining;
        Ok(result)
    }
}

fn apply_to_component(
    component: Component,
    available: Money,
    snapshot: &LoanSnapshot,
    assessment: &PenaltyAssessment,
    result: &mut AllocationResult,
) -> Money {
    let (owed, applied) = match component {
        Component::Penalty => (assessment.amount, &mut result.penalty_applied),
        Component::Interest => (snapshot.interest_outstanding, &mut result.interest_applied),
        Component::Principal => (snapshot.principal_outstanding, &mut result.principal_applied),
        Component::DeferredInterest => (snapshot.deferred_interest, &mut result.interest_applied),
    };

    let payment = available.min(owed.max(Money::ZERO));
    *applied += payment;
    available - payment
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::LedgerError;
    use chrono::{Duration, TimeZone};

    fn due() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap()
    }

    fn snapshot() -> LoanSnapshot {
        LoanSnapshot {
            principal_outstanding: Money::from_major(100_000),
            interest_outstanding: Money::from_major(1_000),
            deferred_interest: Money::ZERO,
            penalty_already_charged: Money::ZERO,
            next_payment_due_date: Some(due()),
            next_payment_amount: Some(Money::from_str_exact("8884.88").unwrap()),
        }
    }

    fn allocator() -> PaymentAllocator {
        PaymentAllocator::new(PenaltyConfig::default())
    }

    #[test]
    fn test_on_time_installment() {
        let result = allocator()
            .allocate(&snapshot(), Money::from_str_exact("8884.88").unwrap(), due())
            .unwrap();

        assert!(!result.is_late);
        assert_eq!(result.penalty_applied, Money::ZERO);
        assert_eq!(result.interest_applied, Money::from_major(1_000));
        assert_eq!(result.principal_applied, Money::from_str_exact("7884.88").unwrap());
        assert_eq!(result.overpayment, Money::ZERO);
    }

    #[test]
    fn test_late_payment_pays_penalty_first() {
        let result = allocator()
            .allocate(
                &snapshot(),
                Money::from_str_exact("8884.88").unwrap(),
                due() + Duration::days(10),
            )
            .unwrap();

        assert!(result.is_late);
        assert_eq!(result.days_late, 10);
        assert_eq!(result.penalty_applied, Money::from_str_exact("444.24").unwrap());
        assert_eq!(result.interest_applied, Money::from_major(1_000));
        assert_eq!(result.principal_applied, Money::from_str_exact("7440.64").unwrap());
        assert_eq!(result.total_applied(), result.amount);
    }

    #[test]
    fn test_small_late_payment_is_capped_at_penalty() {
        let result = allocator()
            .allocate(&snapshot(), Money::from_major(100), due() + Duration::days(10))
            .unwrap();

        assert_eq!(result.penalty_applied, Money::from_major(100));
        assert_eq!(result.penalty_assessed, Money::from_str_exact("444.24").unwrap());
        assert_eq!(result.interest_applied, Money::ZERO);
        assert_eq!(result.principal_applied, Money::ZERO);
    }

    #[test]
    fn test_overpayment_is_surfaced() {
        let result = allocator()
            .allocate(&snapshot(), Money::from_major(101_500), due())
            .unwrap();

        assert_eq!(result.interest_applied, Money::from_major(1_000));
        assert_eq!(result.principal_applied, Money::from_major(100_000));
        assert_eq!(result.overpayment, Money::from_major(500));
        assert!(result.has_overpayment());
        assert_eq!(result.total_applied() + result.overpayment, result.amount);
    }

    #[test]
    fn test_deferred_interest_follows_cleared_principal() {
        let mut contract = snapshot();
        contract.deferred_interest = Money::from_str_exact("5618.53").unwrap();

        let short = allocator().allocate(&contract, Money::from_major(100_500), due()).unwrap();
        assert_eq!(short.interest_applied, Money::from_major(1_000));
        assert_eq!(short.principal_applied, Money::from_major(99_500));

        let result = allocator()
            .allocate(&contract, Money::from_str_exact("107118.53").unwrap(), due())
            .unwrap();
        assert_eq!(result.principal_applied, Money::from_major(100_000));
        assert_eq!(result.interest_applied, Money::from_str_exact("6618.53").unwrap());
        assert_eq!(result.overpayment, Money::from_major(500));
    }

    #[test]
    fn test_earlier_penalty_is_not_charged_twice() {
        let mut partly_paid = snapshot();
        partly_paid.penalty_already_charged = Money::from_str_exact("444.24").unwrap();

        let result = allocator()
            .allocate(&partly_paid, Money::from_major(2_000), due() + Duration::days(10))
            .unwrap();
        assert_eq!(result.penalty_applied, Money::ZERO);
        assert_eq!(result.interest_applied, Money::from_major(1_000));
        assert_eq!(result.principal_applied, Money::from_major(1_000));
    }

    #[test]
    fn test_components_never_negative_or_exceed_amount() {
        let amounts = ["0.01", "1", "999.99", "1000", "1000.01", "8884.88", "150000"];
        let dates = [due() - Duration::days(5), due(), due() + Duration::days(3)];

        for amount in amounts {
            for date in dates {
                let amount = Money::from_str_exact(amount).unwrap();
                let result = allocator().allocate(&snapshot(), amount, date).unwrap();

                assert!(!result.penalty_applied.is_negative());
                assert!(!result.interest_applied.is_negative());
                assert!(!result.principal_applied.is_negative());
                assert!(result.total_applied() <= amount);
                assert!(result.interest_applied <= snapshot().interest_outstanding);
                assert!(result.principal_applied <= snapshot().principal_outstanding);
            }
        }
    }

    #[test]
    fn test_rejects_non_positive_amount() {
        assert!(matches!(
            allocator().allocate(&snapshot(), Money::ZERO, due()),
            Err(LedgerError::InvalidInput { .. })
        ));
    }
}
