use chrono::{DateTime, Utc};
use hourglass_rs::SafeTimeProvider;
use tracing::{debug, info};
use uuid::Uuid;

use crate::amortization::{generate_schedule, ScheduleEntry, ScheduleGenerator};
use crate::config::{LedgerConfig, LoanTerms};
use crate::decimal::{Money, Rate};
use crate::errors::{LedgerError, Result};
use crate::events::{dispatch, Event, NotificationSink, RejectionReason};
use crate::ledger::{self, LedgerUpdate};
use crate::lifecycle::{self, LoanStatus};
use crate::payments::{
    validate_amount, validate_payment_date, AllocationResult, LoanSnapshot, PaymentAllocator,
};
use crate::scanner::{OverdueScanner, ScanReport};
use crate::state::{LoanAccount, LoanSummary};
use crate::store::{with_loan_lock, LoanStore, UnitOfWork};
use crate::transaction::Transaction;
use crate::types::{InterestConvention, LoanId, PartyId, PaymentMethod, RepaymentFrequency};

/// loan servicing engine
///
/// Owns the record store and notification sink. Every mutating operation runs under
/// the loan's lock, commits one unit of work, and only then notifies.
pub struct LoanEngine<S, N> {
    pub(crate) store: S,
    pub(crate) notifier: N,
    pub(crate) config: LedgerConfig,
    pub(crate) allocator: PaymentAllocator,
}

impl<S: LoanStore, N: NotificationSink> LoanEngine<S, N> {
    pub fn new(store: S, notifier: N, config: LedgerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            allocator: PaymentAllocator::new(config.penalty.clone()),
            store,
            notifier,
            config,
        })
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn notifier(&self) -> &N {
        &self.notifier
    }

    // calculation

    pub fn generate_schedule(
        &self,
        principal: Money,
        annual_rate: Rate,
        term_months: u32,
        start_date: DateTime<Utc>,
        convention: InterestConvention,
        frequency: RepaymentFrequency,
    ) -> Result<Vec<ScheduleEntry>> {
        generate_schedule(principal, annual_rate, term_months, start_date, convention, frequency)
    }

    /// pure allocation preview, nothing is written
    pub fn allocate_payment(
        &self,
        snapshot: &LoanSnapshot,
        amount: Money,
        payment_date: DateTime<Utc>,
    ) -> Result<AllocationResult> {
        self.allocator.allocate(snapshot, amount, payment_date)
    }

    // origination

    pub fn submit_application(
        &self,
        borrower_id: PartyId,
        terms: LoanTerms,
        time: &SafeTimeProvider,
    ) -> Result<LoanAccount> {
        terms.validate()?;
        let now = time.now();

        let loan = LoanAccount::new_application(Uuid::new_v4(), borrower_id, terms, now);
        self.store.insert_loan(loan.clone())?;

        info!(loan_id = %loan.id, borrower = %loan.borrower_id, amount = %loan.principal_requested, "application submitted");
        dispatch(
            &self.notifier,
            &loan.borrower_id,
            vec![Event::ApplicationSubmitted {
                loan_id: loan.id,
                amount: loan.principal_requested,
                timestamp: now,
            }],
        );
        Ok(loan)
    }

    /// QueryInitiated -> PendingAdminVerification
    pub fn forward_for_review(&self, loan_id: LoanId, time: &SafeTimeProvider) -> Result<LoanAccount> {
        self.change_status(loan_id, time, |loan, now| {
            lifecycle::apply_transition(loan, LoanStatus::PendingAdminVerification, now)
                .map(|change| vec![Event::status_changed(loan.id, change, None)])
        })
    }

    pub fn request_additional_info(
        &self,
        loan_id: LoanId,
        note: &str,
        time: &SafeTimeProvider,
    ) -> Result<LoanAccount> {
        if note.trim().is_empty() {
            return Err(LedgerError::invalid_input("a note describing what is missing is required"));
        }

        self.change_status(loan_id, time, |loan, now| {
            let change = lifecycle::apply_transition(loan, LoanStatus::AdditionalInfoRequired, now)?;
            loan.additional_info_note = Some(note.to_string());
            Ok(vec![
                Event::status_changed(loan.id, change, None),
                Event::AdditionalInfoRequested {
                    loan_id: loan.id,
                    note: note.to_string(),
                    timestamp: now,
                },
            ])
        })
    }

    /// borrower answered an info request; back into the review queue
    pub fn resubmit_application(&self, loan_id: LoanId, time: &SafeTimeProvider) -> Result<LoanAccount> {
        self.change_status(loan_id, time, |loan, now| {
            if loan.status != LoanStatus::AdditionalInfoRequired {
                return Err(LedgerError::IllegalTransition {
                    from: loan.status,
                    to: LoanStatus::PendingAdminVerification,
                });
            }
            let change = lifecycle::apply_transition(loan, LoanStatus::PendingAdminVerification, now)?;
            loan.additional_info_note = None;
            Ok(vec![Event::status_changed(loan.id, change, None)])
        })
    }

    pub fn approve_application(
        &self,
        loan_id: LoanId,
        approved_amount: Money,
        admin: &PartyId,
        time: &SafeTimeProvider,
    ) -> Result<LoanAccount> {
        validate_amount(approved_amount)?;

        let loan = self.change_status(loan_id, time, |loan, now| {
            if approved_amount > loan.principal_requested {
                return Err(LedgerError::invalid_input(format!(
                    "approved amount {} exceeds requested {}",
                    approved_amount, loan.principal_requested
                )));
            }
            let change = lifecycle::apply_transition(loan, LoanStatus::Approved, now)?;
            loan.principal_approved = Some(approved_amount);
            loan.approved_at = Some(now);
            Ok(vec![Event::status_changed(loan.id, change, None)])
        })?;

        info!(loan_id = %loan_id, admin = %admin, amount = %approved_amount, "application approved");
        Ok(loan)
    }

    pub fn reject_application(
        &self,
        loan_id: LoanId,
        reason: RejectionReason,
        time: &SafeTimeProvider,
    ) -> Result<LoanAccount> {
        if reason.is_empty() {
            return Err(LedgerError::invalid_input("a rejection reason is required"));
        }

        self.change_status(loan_id, time, |loan, now| {
            let change = lifecycle::apply_transition(loan, LoanStatus::Rejected, now)?;
            loan.rejection_reason = Some(reason.clone());
            Ok(vec![Event::status_changed(loan.id, change, Some(reason.clone()))])
        })
    }

    /// release funds, build the schedule from today and activate the loan
    pub fn disburse(
        &self,
        loan_id: LoanId,
        amount: Money,
        method: PaymentMethod,
        admin: &PartyId,
        time: &SafeTimeProvider,
    ) -> Result<LedgerUpdate> {
        validate_amount(amount)?;
        let now = time.now();

        let (update, stored) = with_loan_lock(&self.store, loan_id, self.config.max_commit_retries, |store| {
            let loan = store.load_loan(loan_id)?;
            let schedule = ScheduleGenerator::generate(&loan.terms.with_principal(amount), now)?;
            let tx = Transaction::disbursement(loan_id, amount, method.clone(), admin.clone(), now);

            let update = ledger::apply_disbursement(&loan, schedule, &tx, now)?;
            let stored = store.commit(UnitOfWork::new(update.loan.clone()).with_transaction(update.transaction.clone()))?;
            Ok((update, stored))
        })?;

        info!(loan_id = %loan_id, amount = %amount, periods = stored.schedule.len(), "loan disbursed");

        let mut events = update.status_events();
        events.push(Event::LoanDisbursed {
            loan_id,
            amount,
            first_due_date: stored.next_payment_due_date.unwrap_or(now),
            first_installment: stored.next_payment_amount.unwrap_or(Money::ZERO),
            timestamp: now,
        });
        dispatch(&self.notifier, &stored.borrower_id, events);

        Ok(LedgerUpdate { loan: stored, ..update })
    }

    // servicing

    /// admin-recorded repayment, trusted and applied immediately
    pub fn record_payment(
        &self,
        loan_id: LoanId,
        amount: Money,
        payment_date: DateTime<Utc>,
        method: PaymentMethod,
        admin: &PartyId,
        time: &SafeTimeProvider,
    ) -> Result<LedgerUpdate> {
        validate_amount(amount)?;
        let now = time.now();

        let (allocation, update) = with_loan_lock(&self.store, loan_id, self.config.max_commit_retries, |store| {
            let loan = store.load_loan(loan_id)?;
            validate_payment_date(&loan, payment_date, now)?;
            let tx = Transaction::recorded_repayment(loan_id, amount, payment_date, method.clone(), admin.clone(), now);

            let (allocation, update) = ledger::post_payment(&loan, &tx, &self.allocator, &self.config, now)?;
            let stored = store.commit(UnitOfWork::new(update.loan.clone()).with_transaction(update.transaction.clone()))?;
            Ok((allocation, LedgerUpdate { loan: stored, ..update }))
        })?;

        info!(
            loan_id = %loan_id,
            amount = %amount,
            penalty = %allocation.penalty_applied,
            interest = %allocation.interest_applied,
            principal = %allocation.principal_applied,
            "payment recorded"
        );

        let mut events = vec![Event::PaymentRecorded {
            loan_id,
            transaction_id: update.transaction.id,
            amount,
            applied_to_penalty: allocation.penalty_applied,
            applied_to_interest: allocation.interest_applied,
            applied_to_principal: allocation.principal_applied,
            timestamp: now,
        }];
        events.extend(update.status_events());
        dispatch(&self.notifier, &update.loan.borrower_id, events);

        Ok(update)
    }

    pub fn run_overdue_scan(&self, time: &SafeTimeProvider) -> ScanReport {
        OverdueScanner::new(&self.store, &self.notifier, &self.config).run(time)
    }

    // reads

    pub fn loan(&self, loan_id: LoanId) -> Result<LoanAccount> {
        self.store.load_loan(loan_id)
    }

    pub fn transactions(&self, loan_id: LoanId) -> Result<Vec<Transaction>> {
        self.store.transactions_for_loan(loan_id)
    }

    pub fn summary(&self, loan_id: LoanId, time: &SafeTimeProvider) -> Result<LoanSummary> {
        Ok(self.store.load_loan(loan_id)?.summary(time.now()))
    }

    /// apply a pre-ledger status change and announce it
    fn change_status<F>(&self, loan_id: LoanId, time: &SafeTimeProvider, mut change: F) -> Result<LoanAccount>
    where
        F: FnMut(&mut LoanAccount, DateTime<Utc>) -> Result<Vec<Event>>,
    {
        let now = time.now();

        let (stored, events) = with_loan_lock(&self.store, loan_id, self.config.max_commit_retries, |store| {
            let mut loan = store.load_loan(loan_id)?;
            let events = change(&mut loan, now)?;
            let stored = store.commit(UnitOfWork::new(loan))?;
            Ok((stored, events))
        })?;

        debug!(loan_id = %loan_id, status = ?stored.status, "status updated");
        dispatch(&self.notifier, &stored.borrower_id, events);
        Ok(stored)
    }
}
