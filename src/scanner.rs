//! Recurring overdue scan.
//!
//! One pass walks every servicing loan, charges interest for periods that have
//! fallen due, refreshes the assessed penalty, moves
//! loans along Active -> Overdue -> Defaulted, and sends at most one reminder or
//! overdue alert per loan per calendar day. A failure on one loan is recorded in
//! the report and the batch carries on.

use chrono::{DateTime, Duration, Utc};
use hourglass_rs::SafeTimeProvider;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::LedgerConfig;
use crate::errors::{LedgerError, Result};
use crate::events::{dispatch, Event, NotificationSink};
use crate::ledger;
use crate::lifecycle::{self, LoanStatus};
use crate::payments::{LoanSnapshot, PenaltyEngine};
use crate::state::LoanAccount;
use crate::store::{with_loan_lock, LoanStore, UnitOfWork};
use crate::types::LoanId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanError {
    pub loan_id: LoanId,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScanReport {
    pub scanned: usize,
    pub marked_overdue: usize,
    pub marked_defaulted: usize,
    pub reminders_sent: usize,
    pub errors: Vec<ScanError>,
}

impl ScanReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct LoanOutcome {
    marked_overdue: bool,
    marked_defaulted: bool,
    reminder_sent: bool,
}

pub struct OverdueScanner<'a, S: ?Sized, N: ?Sized> {
    store: &'a S,
    notifier: &'a N,
    config: &'a LedgerConfig,
    penalties: PenaltyEngine,
}

impl<'a, S, N> OverdueScanner<'a, S, N>
where
    S: LoanStore + ?Sized,
    N: NotificationSink + ?Sized,
{
    pub fn new(store: &'a S, notifier: &'a N, config: &'a LedgerConfig) -> Self {
        Self {
            store,
            notifier,
            config,
            penalties: PenaltyEngine::new(config.penalty.clone()),
        }
    }

    pub fn run(&self, time: &SafeTimeProvider) -> ScanReport {
        let now = time.now();
        let mut report = ScanReport::default();

        let ids = match self
            .store
            .loan_ids_with_status(&[LoanStatus::Active, LoanStatus::Overdue])
        {
            Ok(ids) => ids,
            Err(e) => {
                warn!(error = %e, "overdue scan could not list loans");
                return report;
            }
        };

        for loan_id in ids {
            report.scanned += 1;
            match self.scan_loan(loan_id, now) {
                Ok(outcome) => {
                    report.marked_overdue += outcome.marked_overdue as usize;
                    report.marked_defaulted += outcome.marked_defaulted as usize;
                    report.reminders_sent += outcome.reminder_sent as usize;
                }
                Err(e) => {
                    warn!(loan_id = %loan_id, error = %e, "overdue scan failed for loan");
                    report.errors.push(ScanError {
                        loan_id,
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            scanned = report.scanned,
            marked_overdue = report.marked_overdue,
            marked_defaulted = report.marked_defaulted,
            reminders_sent = report.reminders_sent,
            errors = report.errors.len(),
            "overdue scan finished"
        );
        report
    }

    fn scan_loan(&self, loan_id: LoanId, now: DateTime<Utc>) -> Result<LoanOutcome> {
        let (outcome, recipient, events) =
            with_loan_lock(self.store, loan_id, self.config.max_commit_retries, |store| {
                let loan = store.load_loan(loan_id)?;
                let (next, outcome, events) = self.evaluate(&loan, now)?;
                if next != loan {
                    store.commit(UnitOfWork::new(next))?;
                }
                Ok((outcome, loan.borrower_id, events))
            })?;

        dispatch(self.notifier, &recipient, events);
        Ok(outcome)
    }

    /// decide what the scan does to one loan, without writing anything
    fn evaluate(
        &self,
        loan: &LoanAccount,
        now: DateTime<Utc>,
    ) -> Result<(LoanAccount, LoanOutcome, Vec<Event>)> {
        let mut next = loan.clone();
        let mut outcome = LoanOutcome::default();
        let mut events = Vec::new();

        // listed before a concurrent payment closed it out
        if !loan.status.is_servicing() {
            return Ok((next, outcome, events));
        }
        let due_date = match loan.next_payment_due_date {
            Some(due) => due,
            None => return Ok((next, outcome, events)),
        };

        let accrued = ledger::accrue_interest(&mut next, now);
        if accrued.is_positive() {
            debug!(loan_id = %loan.id, interest = %accrued, "interest charged for missed periods");
        }

        let days_overdue = loan.days_past_due(now);
        let assessment = self.penalties.assess(&LoanSnapshot::from(loan), now);
        next.assessed_penalty = assessment.amount;

        if next.status == LoanStatus::Active
            && lifecycle::is_overdue(&next, now, self.config.grace_period_days)
        {
            let change = lifecycle::apply_transition(&mut next, LoanStatus::Overdue, now)?;
            events.push(Event::status_changed(loan.id, change, None));
            outcome.marked_overdue = true;
        }
        if next.status == LoanStatus::Overdue
            && lifecycle::is_defaultable(&next, now, self.config.default_after_days)
        {
            let change = lifecycle::apply_transition(&mut next, LoanStatus::Defaulted, now)?;
            events.push(Event::status_changed(loan.id, change, None));
            outcome.marked_defaulted = true;
        }

        let today = now.date_naive();
        if loan.last_reminder_sent_date == Some(today) {
            debug!(loan_id = %loan.id, "reminder already sent today");
            return Ok((next, outcome, events));
        }

        let amount_due = loan.next_payment_amount.ok_or_else(|| {
            LedgerError::stale(format!("loan {} has a due date but no amount due", loan.id))
        })?;

        if days_overdue > 0 {
            events.push(Event::OverdueAlert {
                loan_id: loan.id,
                amount_due,
                days_overdue,
                penalty_assessed: assessment.amount,
                timestamp: now,
            });
        } else if due_date - now <= Duration::days(i64::from(self.config.reminder_lead_days)) {
            events.push(Event::PaymentReminder {
                loan_id: loan.id,
                amount_due,
                due_date: due_date.date_naive(),
                timestamp: now,
            });
        } else {
            return Ok((next, outcome, events));
        }

        next.last_reminder_sent_date = Some(today);
        outcome.reminder_sent = true;
        Ok((next, outcome, events))
    }
}
