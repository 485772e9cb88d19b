//! Ledger bookkeeping.
//!
//! Both entry points take an immutable [`LoanAccount`] and return a new one together
//! with the settled [`Transaction`]. Nothing here writes to storage; the caller
//! commits the returned pair as one unit of work.

use chrono::{DateTime, Utc};

use crate::amortization::{ScheduleEntry, ScheduleTotals};
use crate::config::LedgerConfig;
use crate::decimal::Money;
use crate::errors::{LedgerError, Result};
use crate::events::Event;
use crate::lifecycle::{self, LoanStatus, StatusChange};
use crate::payments::{AllocationResult, LoanSnapshot, PaymentAllocator};
use crate::state::LoanAccount;
use crate::transaction::Transaction;
use crate::types::{OverpaymentPolicy, TransactionType};

/// result of a ledger operation, ready to be committed
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerUpdate {
    pub loan: LoanAccount,
    pub transaction: Transaction,
    pub status_change: Option<StatusChange>,
}

impl LedgerUpdate {
    pub fn status_changed(&self) -> bool {
        self.status_change.is_some()
    }

    pub fn paid_off(&self) -> bool {
        matches!(
            self.status_change,
            Some(StatusChange {
                to: LoanStatus::PaidOff,
                ..
            })
        )
    }

    /// status announcements owed to the borrower for this update
    pub fn status_events(&self) -> Vec<Event> {
        let mut events = Vec::new();
        if let Some(change) = self.status_change {
            events.push(Event::status_changed(self.loan.id, change, None));
            if change.to == LoanStatus::PaidOff {
                events.push(Event::LoanPaidOff {
                    loan_id: self.loan.id,
                    final_payment: self.transaction.amount,
                    timestamp: change.at,
                });
            }
        }
        events
    }
}

/// allocate a cleared repayment and apply it; shared by every payment path
pub fn post_payment(
    loan: &LoanAccount,
    transaction: &Transaction,
    allocator: &PaymentAllocator,
    config: &LedgerConfig,
    now: DateTime<Utc>,
) -> Result<(AllocationResult, LedgerUpdate)> {
    let allocation = allocator.allocate(
        &snapshot_at(loan, transaction.payment_date),
        transaction.amount,
        transaction.payment_date,
    )?;
    let update = apply_allocation(loan, &allocation, transaction, config, now)?;
    Ok((allocation, update))
}

/// allocation view of a loan with interest charged up to `at`
pub fn snapshot_at(loan: &LoanAccount, at: DateTime<Utc>) -> LoanSnapshot {
    let mut accrued = loan.clone();
    accrue_interest(&mut accrued, at);
    LoanSnapshot::from(&accrued)
}

/// charge the scheduled interest of every period that has fallen due by `at`
///
/// The current period's interest is always carried. Once principal is cleared the
/// remaining scheduled interest is owed at once. Returns the interest added.
pub fn accrue_interest(loan: &mut LoanAccount, at: DateTime<Utc>) -> Money {
    let last = final_period(loan);
    let target = if loan.current_principal_outstanding.is_zero() {
        last
    } else {
        let fallen_due = loan
            .schedule
            .iter()
            .take_while(|e| e.due_date <= at)
            .map(|e| e.period)
            .last()
            .unwrap_or(0);
        let current = loan.next_unpaid_entry().map(|e| e.period).unwrap_or(last);
        fallen_due.max(current)
    };
    accrue_through(loan, target)
}

fn accrue_through(loan: &mut LoanAccount, period: u32) -> Money {
    let from = loan.interest_accrued_through;
    if period <= from {
        return Money::ZERO;
    }

    let charged = Money::sum(
        loan.schedule
            .iter()
            .filter(|e| e.period > from && e.period <= period)
            .map(|e| e.interest_component),
    );
    loan.current_interest_outstanding += charged;
    loan.interest_accrued_through = period;
    charged
}

fn final_period(loan: &LoanAccount) -> u32 {
    loan.schedule.last().map(|e| e.period).unwrap_or(0)
}

/// release funds against a freshly generated schedule and activate the loan
pub fn apply_disbursement(
    loan: &LoanAccount,
    schedule: Vec<ScheduleEntry>,
    transaction: &Transaction,
    now: DateTime<Utc>,
) -> Result<LedgerUpdate> {
    if transaction.kind != TransactionType::Disbursement || transaction.loan_id != loan.id {
        return Err(LedgerError::invalid_input(
            "disbursement requires a disbursement transaction for this loan",
        ));
    }

    let approved = loan.principal_approved.ok_or_else(|| {
        LedgerError::invalid_input("loan has no approved principal to disburse")
    })?;
    if transaction.amount > approved {
        return Err(LedgerError::invalid_input(format!(
            "disbursement {} exceeds approved principal {}",
            transaction.amount, approved
        )));
    }
    if ScheduleTotals::of(&schedule).principal != transaction.amount {
        return Err(LedgerError::invalid_input(
            "schedule principal does not match the disbursed amount",
        ));
    }

    let mut next = loan.clone();
    next.principal_disbursed = transaction.amount;
    next.current_principal_outstanding = transaction.amount;
    next.current_interest_outstanding = Money::ZERO;
    next.interest_accrued_through = 0;
    next.schedule = schedule;
    next.disbursed_at = Some(now);
    // the first period's interest is owed from day one
    accrue_through(&mut next, 1);

    lifecycle::ensure_can_activate(&next, true)?;
    let change = lifecycle::apply_transition(&mut next, LoanStatus::Active, now)?;
    refresh_next_due(&mut next);

    Ok(LedgerUpdate {
        loan: next,
        transaction: transaction.clone(),
        status_change: Some(change),
    })
}

/// apply an allocation to a loan; the only place repayment balances change
pub fn apply_allocation(
    loan: &LoanAccount,
    allocation: &AllocationResult,
    transaction: &Transaction,
    config: &LedgerConfig,
    now: DateTime<Utc>,
) -> Result<LedgerUpdate> {
    if transaction.is_applied() {
        return Err(LedgerError::stale(format!(
            "transaction {} has already been applied",
            transaction.id
        )));
    }
    if transaction.loan_id != loan.id {
        return Err(LedgerError::invalid_input(format!(
            "transaction {} belongs to a different loan",
            transaction.id
        )));
    }
    if !transaction.is_cleared_for_ledger() {
        return Err(LedgerError::invalid_input(format!(
            "transaction {} is {:?} and cannot touch the ledger",
            transaction.id, transaction.verification_status
        )));
    }
    if allocation.amount != transaction.amount {
        return Err(LedgerError::invalid_input(
            "allocation amount does not match the transaction",
        ));
    }
    if !loan.status.accepts_payments() {
        return Err(LedgerError::NotAcceptingPayments {
            status: loan.status,
        });
    }

    let mut next = loan.clone();
    accrue_interest(&mut next, allocation.payment_date);
    if allocation.principal_applied == next.current_principal_outstanding {
        // clearing principal brings the rest of the scheduled interest due
        let last = final_period(&next);
        accrue_through(&mut next, last);
    }

    if allocation.principal_applied > next.current_principal_outstanding
        || allocation.interest_applied > next.current_interest_outstanding
    {
        return Err(LedgerError::stale(
            "allocation was computed against an out-of-date balance",
        ));
    }

    let credited = match (allocation.has_overpayment(), config.overpayment_policy) {
        (false, _) => Money::ZERO,
        (true, OverpaymentPolicy::Reject) => {
            return Err(LedgerError::AllocationOverflow {
                excess: allocation.overpayment,
            });
        }
        (true, OverpaymentPolicy::CreditForward) => allocation.overpayment,
    };

    if allocation.penalty_applied.is_positive() {
        if next.penalty_charged_for != next.next_payment_due_date {
            next.penalty_charged_for = next.next_payment_due_date;
            next.penalty_charged = Money::ZERO;
        }
        next.penalty_charged += allocation.penalty_applied;
    }

    next.current_interest_outstanding -= allocation.interest_applied;
    next.current_principal_outstanding -= allocation.principal_applied;
    next.total_interest_repaid += allocation.interest_applied;
    next.total_principal_repaid += allocation.principal_applied;
    next.total_penalties_paid += allocation.penalty_applied;
    next.overpayment_credit += credited;
    next.assessed_penalty = Money::ZERO;
    next.last_payment_date = Some(allocation.payment_date);
    next.payment_count += 1;

    advance_schedule(&mut next);

    let status_change = if next.is_settled() {
        match next.status {
            LoanStatus::Active | LoanStatus::Overdue => {
                next.matured_at = Some(now);
                Some(lifecycle::apply_transition(&mut next, LoanStatus::PaidOff, now)?)
            }
            // a defaulted loan stays defaulted even when recovered in full
            _ => None,
        }
    } else if next.status == LoanStatus::Overdue
        && lifecycle::clears_overdue(&next, now, config.grace_period_days)
    {
        Some(lifecycle::apply_transition(&mut next, LoanStatus::Active, now)?)
    } else {
        None
    };

    let mut settled = transaction.clone();
    settled.principal_applied = allocation.principal_applied;
    settled.interest_applied = allocation.interest_applied;
    settled.penalty_applied = allocation.penalty_applied;
    settled.overpayment_credited = credited;
    settled.is_late = allocation.is_late;
    settled.days_late = allocation.days_late;
    settled.applied_at = Some(now);

    Ok(LedgerUpdate {
        loan: next,
        transaction: settled,
        status_change,
    })
}

/// mark every period whose cumulative interest and principal are repaid
fn advance_schedule(loan: &mut LoanAccount) {
    while let Some(idx) = loan.schedule.iter().position(|e| !e.is_paid) {
        let period = loan.schedule[idx].period;
        if loan.scheduled_interest_through(period) > loan.total_interest_repaid
            || loan.scheduled_principal_through(period) > loan.total_principal_repaid
        {
            break;
        }
        loan.schedule[idx].is_paid = true;
    }

    // the new current period carries its interest
    if let Some(period) = loan.next_unpaid_entry().map(|e| e.period) {
        accrue_through(loan, period);
    }
    refresh_next_due(loan);
}

/// point next due date/amount at the first unpaid period, including any residual
fn refresh_next_due(loan: &mut LoanAccount) {
    match loan.next_unpaid_entry().map(|e| (e.period, e.due_date)) {
        Some((period, due_date)) => {
            let interest_due = loan
                .scheduled_interest_through(period)
                .saturating_sub(loan.total_interest_repaid);
            let principal_due = loan
                .scheduled_principal_through(period)
                .saturating_sub(loan.total_principal_repaid);
            loan.next_payment_due_date = Some(due_date);
            loan.next_payment_amount = Some(interest_due + principal_due);
        }
        None => {
            loan.next_payment_due_date = None;
            loan.next_payment_amount = None;
        }
    }
}
