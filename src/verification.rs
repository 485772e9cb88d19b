//! Borrower payment claims and the admin gate in front of the ledger.
//!
//! A submitted proof is only a claim. It sits in `PendingVerification` until an
//! admin approves it, at which point it goes through the same allocation and
//! ledger path as an admin-recorded payment, or rejects it with a reason.

use chrono::{DateTime, Utc};
use hourglass_rs::SafeTimeProvider;
use tracing::info;

use crate::decimal::Money;
use crate::engine::LoanEngine;
use crate::errors::{LedgerError, Result};
use crate::events::{dispatch, Event, NotificationSink};
use crate::ledger::{self, LedgerUpdate};
use crate::payments::{validate_amount, validate_payment_date};
use crate::store::{with_loan_lock, LoanStore, UnitOfWork};
use crate::transaction::Transaction;
use crate::types::{LoanId, PartyId, PaymentMethod, TransactionId, VerificationStatus};

/// result of an admin decision on a payment claim
#[derive(Debug, Clone, PartialEq)]
pub struct VerificationOutcome {
    pub transaction: Transaction,
    /// present only when the claim was approved and applied
    pub ledger_update: Option<LedgerUpdate>,
}

impl<S: LoanStore, N: NotificationSink> LoanEngine<S, N> {
    /// record a borrower's claim of payment; the ledger is untouched
    pub fn submit_payment_proof(
        &self,
        loan_id: LoanId,
        amount: Money,
        payment_date: DateTime<Utc>,
        method: PaymentMethod,
        proof_ref: Option<String>,
        borrower: &PartyId,
        time: &SafeTimeProvider,
    ) -> Result<Transaction> {
        validate_amount(amount)?;
        let now = time.now();

        let loan = self.store.load_loan(loan_id)?;
        if &loan.borrower_id != borrower {
            return Err(LedgerError::invalid_input(format!(
                "{} is not the borrower on loan {}",
                borrower, loan_id
            )));
        }
        if !loan.status.accepts_payments() {
            return Err(LedgerError::NotAcceptingPayments { status: loan.status });
        }
        validate_payment_date(&loan, payment_date, now)?;

        let tx = Transaction::user_submission(loan_id, amount, payment_date, method, proof_ref, borrower.clone(), now);
        self.store.insert_transaction(tx.clone())?;

        info!(loan_id = %loan_id, transaction_id = %tx.id, amount = %amount, "payment proof submitted");
        dispatch(
            &self.notifier,
            borrower,
            vec![Event::PaymentProofSubmitted {
                loan_id,
                transaction_id: tx.id,
                amount,
                timestamp: now,
            }],
        );
        Ok(tx)
    }

    /// claims waiting on an admin decision
    pub fn pending_verifications(&self, loan_id: LoanId) -> Result<Vec<Transaction>> {
        Ok(self
            .store
            .transactions_for_loan(loan_id)?
            .into_iter()
            .filter(Transaction::is_pending)
            .collect())
    }

    /// approve or reject a pending claim
    ///
    /// Approval applies the payment through the ledger in the same unit of work that
    /// resolves the transaction. Rejection needs a reason and leaves balances alone.
    /// Acting on a transaction that is already resolved fails with `StaleState`.
    pub fn verify_transaction(
        &self,
        transaction_id: TransactionId,
        approve: bool,
        reason: Option<&str>,
        admin: &PartyId,
        time: &SafeTimeProvider,
    ) -> Result<VerificationOutcome> {
        let reason = reason.map(str::trim).filter(|r| !r.is_empty());
        if !approve && reason.is_none() {
            return Err(LedgerError::invalid_input("rejecting a payment proof requires a reason"));
        }
        let now = time.now();
        let loan_id = self.store.load_transaction(transaction_id)?.loan_id;

        let (outcome, borrower) = with_loan_lock(&self.store, loan_id, self.config.max_commit_retries, |store| {
            let mut tx = store.load_transaction(transaction_id)?;
            if tx.verification_status.is_resolved() {
                return Err(LedgerError::stale(format!(
                    "transaction {} is already {:?}",
                    tx.id, tx.verification_status
                )));
            }
            let loan = store.load_loan(loan_id)?;

            tx.verified_by = Some(admin.clone());
            tx.verified_at = Some(now);

            if approve {
                tx.verification_status = VerificationStatus::AdminVerifiedPaid;
                let (_, update) = ledger::post_payment(&loan, &tx, &self.allocator, &self.config, now)?;
                let stored = store.commit(
                    UnitOfWork::new(update.loan.clone()).with_transaction(update.transaction.clone()),
                )?;
                let update = LedgerUpdate { loan: stored, ..update };
                Ok((
                    VerificationOutcome {
                        transaction: update.transaction.clone(),
                        ledger_update: Some(update),
                    },
                    loan.borrower_id,
                ))
            } else {
                tx.verification_status = VerificationStatus::AdminRejectedProof;
                tx.rejection_reason = reason.map(str::to_string);
                store.commit(UnitOfWork::new(loan.clone()).with_transaction(tx.clone()))?;
                Ok((
                    VerificationOutcome {
                        transaction: tx,
                        ledger_update: None,
                    },
                    loan.borrower_id,
                ))
            }
        })?;

        let tx = &outcome.transaction;
        info!(
            loan_id = %loan_id,
            transaction_id = %tx.id,
            admin = %admin,
            status = ?tx.verification_status,
            "payment proof verified"
        );

        let events = match &outcome.ledger_update {
            Some(update) => {
                let mut events = vec![Event::PaymentConfirmed {
                    loan_id,
                    transaction_id: tx.id,
                    amount: tx.amount,
                    remaining_balance: update.loan.payoff_amount(),
                    timestamp: now,
                }];
                events.extend(update.status_events());
                events
            }
            None => vec![Event::PaymentProofRejected {
                loan_id,
                transaction_id: tx.id,
                reason: tx.rejection_reason.clone().unwrap_or_default(),
                timestamp: now,
            }],
        };
        dispatch(&self.notifier, &borrower, events);

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LedgerConfig, LoanTerms};
    use crate::decimal::Rate;
    use crate::events::EventStore;
    use crate::lifecycle::LoanStatus;
    use crate::state::LoanAccount;
    use crate::store::InMemoryStore;
    use chrono::{Duration, TimeZone};
    use hourglass_rs::TimeSource;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap()
    }

    fn borrower() -> PartyId {
        "borrower-1".to_string()
    }

    fn admin() -> PartyId {
        "admin-1".to_string()
    }

    fn setup() -> (LoanEngine<InMemoryStore, EventStore>, SafeTimeProvider, LoanAccount) {
        let engine = LoanEngine::new(InMemoryStore::new(), EventStore::new(), LedgerConfig::default()).unwrap();
        let time = SafeTimeProvider::new(TimeSource::Test(start()));

        let terms = LoanTerms::monthly_emi(Money::from_major(100_000), Rate::from_percentage(12), 12);
        let loan = engine.submit_application(borrower(), terms, &time).unwrap();
        engine.forward_for_review(loan.id, &time).unwrap();
        engine.approve_application(loan.id, Money::from_major(100_000), &admin(), &time).unwrap();
        let loan = engine
            .disburse(loan.id, Money::from_major(100_000), PaymentMethod::BankTransfer, &admin(), &time)
            .unwrap()
            .loan;
        engine.notifier().clear();
        (engine, time, loan)
    }

    fn submit(engine: &LoanEngine<InMemoryStore, EventStore>, loan: &LoanAccount, amount: Money, time: &SafeTimeProvider) -> Transaction {
        engine
            .submit_payment_proof(loan.id, amount, time.now(), PaymentMethod::MobileWallet, Some("receipts/1.png".to_string()), &borrower(), time)
            .unwrap()
    }

    #[test]
    fn test_submission_does_not_touch_ledger() {
        let (engine, time, loan) = setup();

        let tx = submit(&engine, &loan, Money::from_major(8_000), &time);

        assert!(tx.is_pending());
        assert_eq!(engine.loan(loan.id).unwrap(), loan);
        assert_eq!(engine.pending_verifications(loan.id).unwrap(), vec![tx]);
        assert_eq!(engine.notifier().count_of("payment_proof_submitted"), 1);
    }

    #[test]
    fn test_submission_checks_borrower_and_status() {
        let (engine, time, loan) = setup();

        let stranger = engine.submit_payment_proof(
            loan.id,
            Money::from_major(10),
            time.now(),
            PaymentMethod::Cash,
            None,
            &"someone-else".to_string(),
            &time,
        );
        assert!(matches!(stranger, Err(LedgerError::InvalidInput { .. })));

        let zero = engine.submit_payment_proof(loan.id, Money::ZERO, time.now(), PaymentMethod::Cash, None, &borrower(), &time);
        assert!(matches!(zero, Err(LedgerError::InvalidInput { .. })));

        // a claim cannot be dated ahead of the clock or before the funds went out
        let future = engine.submit_payment_proof(loan.id, Money::from_major(10), time.now() + Duration::hours(1), PaymentMethod::Cash, None, &borrower(), &time);
        assert!(matches!(future, Err(LedgerError::InvalidInput { .. })));

        let backdated = engine.submit_payment_proof(loan.id, Money::from_major(10), start() - Duration::days(3), PaymentMethod::Cash, None, &borrower(), &time);
        assert!(matches!(backdated, Err(LedgerError::InvalidInput { .. })));

        assert!(engine.pending_verifications(loan.id).unwrap().is_empty());
    }

    #[test]
    fn test_approval_applies_payment() {
        let (engine, time, loan) = setup();
        let tx = submit(&engine, &loan, Money::from_str_exact("8884.88").unwrap(), &time);

        let outcome = engine.verify_transaction(tx.id, true, None, &admin(), &time).unwrap();

        assert_eq!(outcome.transaction.verification_status, VerificationStatus::AdminVerifiedPaid);
        assert_eq!(outcome.transaction.verified_by, Some(admin()));
        assert_eq!(outcome.transaction.interest_applied, Money::from_major(1_000));
        assert!(outcome.transaction.is_applied());

        let update = outcome.ledger_update.unwrap();
        assert!(update.loan.schedule[0].is_paid);
        assert_eq!(engine.loan(loan.id).unwrap(), update.loan);
        assert_eq!(engine.store().load_transaction(tx.id).unwrap(), outcome.transaction);
        assert!(engine.pending_verifications(loan.id).unwrap().is_empty());
        assert_eq!(engine.notifier().count_of("payment_confirmed"), 1);
    }

    #[test]
    fn test_rejection_requires_reason_and_leaves_ledger() {
        let (engine, time, loan) = setup();
        let tx = submit(&engine, &loan, Money::from_major(8_000), &time);

        assert!(matches!(
            engine.verify_transaction(tx.id, false, None, &admin(), &time),
            Err(LedgerError::InvalidInput { .. })
        ));
        assert!(matches!(
            engine.verify_transaction(tx.id, false, Some("   "), &admin(), &time),
            Err(LedgerError::InvalidInput { .. })
        ));

        let outcome = engine
            .verify_transaction(tx.id, false, Some("screenshot does not show a transfer"), &admin(), &time)
            .unwrap();

        assert_eq!(outcome.transaction.verification_status, VerificationStatus::AdminRejectedProof);
        assert!(outcome.ledger_update.is_none());
        assert!(!outcome.transaction.is_applied());

        let stored = engine.loan(loan.id).unwrap();
        assert_eq!(stored.total_outstanding(), loan.total_outstanding());
        assert_eq!(stored.payment_count, 0);
        assert!(engine.notifier().events().iter().any(|e| matches!(
            e,
            Event::PaymentProofRejected { reason, .. } if reason == "screenshot does not show a transfer"
        )));
    }

    #[test]
    fn test_reverification_is_stale() {
        let (engine, time, loan) = setup();
        let tx = submit(&engine, &loan, Money::from_major(5_000), &time);
        engine.verify_transaction(tx.id, true, None, &admin(), &time).unwrap();
        let after_first = engine.loan(loan.id).unwrap();

        let again = engine.verify_transaction(tx.id, true, None, &admin(), &time);
        assert!(matches!(again, Err(LedgerError::StaleState { .. })));

        let flip = engine.verify_transaction(tx.id, false, Some("changed my mind"), &admin(), &time);
        assert!(matches!(flip, Err(LedgerError::StaleState { .. })));

        assert_eq!(engine.loan(loan.id).unwrap(), after_first);
    }

    #[test]
    fn test_failed_approval_keeps_claim_pending() {
        let (engine, time, loan) = setup();
        let tx = submit(&engine, &loan, Money::from_major(150_000), &time);

        let result = engine.verify_transaction(tx.id, true, None, &admin(), &time);
        assert!(matches!(result, Err(LedgerError::AllocationOverflow { .. })));

        assert!(engine.store().load_transaction(tx.id).unwrap().is_pending());
        assert_eq!(engine.loan(loan.id).unwrap(), loan);
    }

    #[test]
    fn test_concurrent_verification_applies_once() {
        let (engine, time, loan) = setup();
        let tx = submit(&engine, &loan, Money::from_major(5_000), &time);

        let results: Vec<Result<VerificationOutcome>> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    s.spawn(|| {
                        let time = SafeTimeProvider::new(TimeSource::Test(start()));
                        engine.verify_transaction(tx.id, true, None, &admin(), &time)
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(LedgerError::is_stale));

        let stored = engine.loan(loan.id).unwrap();
        assert_eq!(stored.payment_count, 1);
        assert_eq!(stored.total_principal_repaid, Money::from_major(4_000));
        assert!(stored.principal_reconciles());
    }

    #[test]
    fn test_approval_can_pay_off_loan() {
        let (engine, time, loan) = setup();
        let tx = submit(&engine, &loan, loan.payoff_amount(), &time);

        let outcome = engine.verify_transaction(tx.id, true, None, &admin(), &time).unwrap();

        let update = outcome.ledger_update.unwrap();
        assert!(update.paid_off());
        assert_eq!(engine.loan(loan.id).unwrap().status, LoanStatus::PaidOff);
        assert_eq!(engine.notifier().count_of("loan_paid_off"), 1);
    }
}
