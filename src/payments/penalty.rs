use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::PenaltyConfig;
use crate::decimal::{Money, Rate};

use super::LoanSnapshot;

const SECONDS_PER_DAY: i64 = 86_400;

/// whole days late, rounded up; zero when `at` is on or before `due`
pub fn days_late(due: DateTime<Utc>, at: DateTime<Utc>) -> u32 {
    if at <= due {
        return 0;
    }
    let seconds = (at - due).num_seconds();
    ((seconds + SECONDS_PER_DAY - 1) / SECONDS_PER_DAY) as u32
}

/// penalty assessment result
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PenaltyAssessment {
    pub base: Money,
    pub daily_rate: Rate,
    pub days_late: u32,
    /// base * rate * days for the whole lateness window
    pub accrued: Money,
    /// part of `accrued` collected by earlier payments
    pub already_charged: Money,
    /// still owed
    pub amount: Money,
}

impl PenaltyAssessment {
    pub fn none() -> Self {
        Self {
            base: Money::ZERO,
            daily_rate: Rate::ZERO,
            days_late: 0,
            accrued: Money::ZERO,
            already_charged: Money::ZERO,
            amount: Money::ZERO,
        }
    }
}

/// late penalty calculation shared by payment allocation and the overdue scanner
#[derive(Debug, Clone)]
pub struct PenaltyEngine {
    config: PenaltyConfig,
}

impl PenaltyEngine {
    pub fn new(config: PenaltyConfig) -> Self {
        Self { config }
    }

    /// the installment currently due, or outstanding principal when none is set
    pub fn penalty_base(snapshot: &LoanSnapshot) -> Money {
        snapshot
            .next_payment_amount
            .filter(|amount| amount.is_positive())
            .unwrap_or(snapshot.principal_outstanding)
    }

    /// base * daily rate * days late, rounded to cents
    pub fn calculate(&self, base: Money, days_late: u32) -> PenaltyAssessment {
        let daily_rate = self.config.daily_rate;
        let amount = (base.times_rate(daily_rate) * rust_decimal::Decimal::from(days_late))
            .round_currency();

        PenaltyAssessment {
            base,
            daily_rate,
            days_late,
            accrued: amount,
            already_charged: Money::ZERO,
            amount,
        }
    }

    /// penalty still owed on a snapshot as of a moment in time
    ///
    /// Penalty collected earlier against the same due date is netted off, so
    /// repeated partial payments never charge one lateness window twice.
    pub fn assess(&self, snapshot: &LoanSnapshot, at: DateTime<Utc>) -> PenaltyAssessment {
        let Some(due) = snapshot.next_payment_due_date else {
            return PenaltyAssessment::none();
        };

        let days = days_late(due, at);
        if days == 0 {
            return PenaltyAssessment::none();
        }

        let mut assessment = self.calculate(Self::penalty_base(snapshot), days);
        assessment.already_charged = snapshot.penalty_already_charged.min(assessment.accrued);
        assessment.amount = assessment.accrued - assessment.already_charged;
        assessment
    }
}
