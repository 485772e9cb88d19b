use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::amortization::ScheduleEntry;
use crate::config::LoanTerms;
use crate::decimal::Money;
use crate::events::RejectionReason;
use crate::lifecycle::LoanStatus;
use crate::payments::penalty::days_late;
use crate::types::{LoanId, PartyId};

/// loan account aggregate
///
/// Balances are only ever changed by [`crate::ledger::apply_allocation`] and the
/// disbursement step; everything else reads them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoanAccount {
    // identification
    pub id: LoanId,
    pub borrower_id: PartyId,

    // terms
    pub terms: LoanTerms,
    pub principal_requested: Money,
    pub principal_approved: Option<Money>,
    pub principal_disbursed: Money,

    // status
    pub status: LoanStatus,
    pub last_status_change: DateTime<Utc>,
    pub additional_info_note: Option<String>,
    pub rejection_reason: Option<RejectionReason>,

    // balances
    pub current_principal_outstanding: Money,
    pub current_interest_outstanding: Money,
    pub total_principal_repaid: Money,
    pub total_interest_repaid: Money,
    pub total_penalties_paid: Money,
    /// latest scanner assessment, recomputed rather than accumulated
    pub assessed_penalty: Money,
    /// last period whose scheduled interest has been charged
    pub interest_accrued_through: u32,
    /// penalty already collected against `penalty_charged_for`
    pub penalty_charged: Money,
    pub penalty_charged_for: Option<DateTime<Utc>>,
    /// excess owed back to the borrower under the credit-forward policy
    pub overpayment_credit: Money,

    // payment tracking
    pub next_payment_due_date: Option<DateTime<Utc>>,
    pub next_payment_amount: Option<Money>,
    pub last_payment_date: Option<DateTime<Utc>>,
    pub last_reminder_sent_date: Option<NaiveDate>,
    pub payment_count: u32,

    pub schedule: Vec<ScheduleEntry>,

    // dates
    pub created_at: DateTime<Utc>,
    pub approved_at: Option<DateTime<Utc>>,
    pub disbursed_at: Option<DateTime<Utc>>,
    pub matured_at: Option<DateTime<Utc>>,

    /// optimistic concurrency stamp, bumped by the store on every commit
    pub version: u64,
}

impl LoanAccount {
    /// a fresh application awaiting review
    pub fn new_application(
        id: LoanId,
        borrower_id: PartyId,
        terms: LoanTerms,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            borrower_id,
            principal_requested: terms.principal,
            terms,
            principal_approved: None,
            principal_disbursed: Money::ZERO,
            status: LoanStatus::QueryInitiated,
            last_status_change: now,
            additional_info_note: None,
            rejection_reason: None,
            current_principal_outstanding: Money::ZERO,
            current_interest_outstanding: Money::ZERO,
            total_principal_repaid: Money::ZERO,
            total_interest_repaid: Money::ZERO,
            total_penalties_paid: Money::ZERO,
            assessed_penalty: Money::ZERO,
            interest_accrued_through: 0,
            penalty_charged: Money::ZERO,
            penalty_charged_for: None,
            overpayment_credit: Money::ZERO,
            next_payment_due_date: None,
            next_payment_amount: None,
            last_payment_date: None,
            last_reminder_sent_date: None,
            payment_count: 0,
            schedule: Vec::new(),
            created_at: now,
            approved_at: None,
            disbursed_at: None,
            matured_at: None,
            version: 0,
        }
    }

    /// principal plus interest currently owed
    pub fn total_outstanding(&self) -> Money {
        self.current_principal_outstanding + self.current_interest_outstanding
    }

    /// scheduled interest not yet charged to the balance
    pub fn deferred_interest(&self) -> Money {
        Money::sum(
            self.schedule
                .iter()
                .filter(|e| e.period > self.interest_accrued_through)
                .map(|e| e.interest_component),
        )
    }

    /// everything left on the contract: principal plus all unpaid scheduled interest
    pub fn payoff_amount(&self) -> Money {
        self.total_outstanding() + self.deferred_interest()
    }

    /// late penalty already collected for the installment currently due
    pub fn penalty_already_charged(&self) -> Money {
        match self.next_payment_due_date {
            Some(due) if self.penalty_charged_for == Some(due) => self.penalty_charged,
            _ => Money::ZERO,
        }
    }

    pub fn is_settled(&self) -> bool {
        self.current_principal_outstanding.is_zero() && self.current_interest_outstanding.is_zero()
    }

    /// whole days (rounded up) past the next due date, zero if not yet due
    pub fn days_past_due(&self, now: DateTime<Utc>) -> u32 {
        self.next_payment_due_date
            .map(|due| days_late(due, now))
            .unwrap_or(0)
    }

    pub fn next_unpaid_entry(&self) -> Option<&ScheduleEntry> {
        self.schedule.iter().find(|e| !e.is_paid)
    }

    pub fn remaining_installments(&self) -> usize {
        self.schedule.iter().filter(|e| !e.is_paid).count()
    }

    /// scheduled principal due up to and including a period
    pub fn scheduled_principal_through(&self, period: u32) -> Money {
        Money::sum(
            self.schedule
                .iter()
                .take_while(|e| e.period <= period)
                .map(|e| e.principal_component),
        )
    }

    pub fn scheduled_interest_through(&self, period: u32) -> Money {
        Money::sum(
            self.schedule
                .iter()
                .take_while(|e| e.period <= period)
                .map(|e| e.interest_component),
        )
    }

    /// the repayment invariant: outstanding + repaid == disbursed
    pub fn principal_reconciles(&self) -> bool {
        self.current_principal_outstanding + self.total_principal_repaid == self.principal_disbursed
    }

    pub fn summary(&self, now: DateTime<Utc>) -> LoanSummary {
        LoanSummary {
            id: self.id,
            borrower_id: self.borrower_id.clone(),
            status: self.status,
            principal_disbursed: self.principal_disbursed,
            principal_outstanding: self.current_principal_outstanding,
            interest_outstanding: self.current_interest_outstanding,
            total_outstanding: self.total_outstanding(),
            payoff_amount: self.payoff_amount(),
            total_principal_repaid: self.total_principal_repaid,
            total_interest_repaid: self.total_interest_repaid,
            total_penalties_paid: self.total_penalties_paid,
            assessed_penalty: self.assessed_penalty,
            overpayment_credit: self.overpayment_credit,
            next_payment_due_date: self.next_payment_due_date,
            next_payment_amount: self.next_payment_amount,
            days_past_due: self.days_past_due(now),
            installments_paid: self.schedule.len() - self.remaining_installments(),
            installments_total: self.schedule.len(),
        }
    }
}

/// serializable read model for the presentation layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoanSummary {
    pub id: LoanId,
    pub borrower_id: PartyId,
    pub status: LoanStatus,
    pub principal_disbursed: Money,
    pub principal_outstanding: Money,
    pub interest_outstanding: Money,
    pub total_outstanding: Money,
    pub payoff_amount: Money,
    pub total_principal_repaid: Money,
    pub total_interest_repaid: Money,
    pub total_penalties_paid: Money,
    pub assessed_penalty: Money,
    pub overpayment_credit: Money,
    pub next_payment_due_date: Option<DateTime<Utc>>,
    pub next_payment_amount: Option<Money>,
    pub days_past_due: u32,
    pub installments_paid: usize,
    pub installments_total: usize,
}

impl LoanSummary {
    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
