//! Persistence seam for loans and transactions.
//!
//! Writes go through [`LoanStore::commit`], which takes a [`UnitOfWork`] and either
//! persists all of it or none of it. Loans carry a version stamp; a commit built
//! from an outdated read fails with [`LedgerError::VersionConflict`].

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::errors::{LedgerError, Result};
use crate::lifecycle::LoanStatus;
use crate::state::LoanAccount;
use crate::transaction::Transaction;
use crate::types::{LoanId, TransactionId};

/// loan update plus the transactions written with it
#[derive(Debug, Clone, PartialEq)]
pub struct UnitOfWork {
    pub loan: LoanAccount,
    pub transactions: Vec<Transaction>,
}

impl UnitOfWork {
    pub fn new(loan: LoanAccount) -> Self {
        Self {
            loan,
            transactions: Vec::new(),
        }
    }

    pub fn with_transaction(mut self, transaction: Transaction) -> Self {
        self.transactions.push(transaction);
        self
    }
}

pub trait LoanStore: Send + Sync {
    /// store a brand new loan
    fn insert_loan(&self, loan: LoanAccount) -> Result<()>;

    fn load_loan(&self, id: LoanId) -> Result<LoanAccount>;

    /// store a new transaction that does not change loan state
    fn insert_transaction(&self, transaction: Transaction) -> Result<()>;

    fn load_transaction(&self, id: TransactionId) -> Result<Transaction>;

    /// transactions for a loan, oldest first
    fn transactions_for_loan(&self, loan_id: LoanId) -> Result<Vec<Transaction>>;

    fn loan_ids_with_status(&self, statuses: &[LoanStatus]) -> Result<Vec<LoanId>>;

    /// per-loan mutex serializing ledger mutations
    fn loan_lock(&self, loan_id: LoanId) -> Arc<Mutex<()>>;

    /// atomically persist a unit of work, returning the loan as stored
    fn commit(&self, work: UnitOfWork) -> Result<LoanAccount>;

    /// called after a locked unit of work; stores may forget idle locks here
    fn release_loan_lock(&self, _loan_id: LoanId) {}
}

/// run `f` while holding the loan's lock, retrying version conflicts
pub fn with_loan_lock<S, T, F>(store: &S, loan_id: LoanId, max_attempts: u32, mut f: F) -> Result<T>
where
    S: LoanStore + ?Sized,
    F: FnMut(&S) -> Result<T>,
{
    let lock = store.loan_lock(loan_id);
    let result = {
        let _guard = lock.lock();

        let mut attempt = 1;
        loop {
            match f(store) {
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    warn!(loan_id = %loan_id, attempt, error = %e, "retrying unit of work");
                    attempt += 1;
                }
                result => break result,
            }
        }
    };

    drop(lock);
    store.release_loan_lock(loan_id);
    result
}

#[derive(Debug, Default)]
pub struct InMemoryStore {
    loans: RwLock<HashMap<LoanId, LoanAccount>>,
    transactions: RwLock<HashMap<TransactionId, Transaction>>,
    locks: Mutex<HashMap<LoanId, Arc<Mutex<()>>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn loan_count(&self) -> usize {
        self.loans.read().len()
    }

    /// per-loan locks currently held in the lock table
    pub fn tracked_locks(&self) -> usize {
        self.locks.lock().len()
    }
}

impl LoanStore for InMemoryStore {
    fn insert_loan(&self, loan: LoanAccount) -> Result<()> {
        let mut loans = self.loans.write();
        if loans.contains_key(&loan.id) {
            return Err(LedgerError::invalid_input(format!("loan {} already exists", loan.id)));
        }
        loans.insert(loan.id, loan);
        Ok(())
    }

    fn load_loan(&self, id: LoanId) -> Result<LoanAccount> {
        self.loans
            .read()
            .get(&id)
            .cloned()
            .ok_or(LedgerError::LoanNotFound { id })
    }

    fn insert_transaction(&self, transaction: Transaction) -> Result<()> {
        if !self.loans.read().contains_key(&transaction.loan_id) {
            return Err(LedgerError::LoanNotFound {
                id: transaction.loan_id,
            });
        }

        let mut transactions = self.transactions.write();
        if transactions.contains_key(&transaction.id) {
            return Err(LedgerError::invalid_input(format!(
                "transaction {} already exists",
                transaction.id
            )));
        }
        transactions.insert(transaction.id, transaction);
        Ok(())
    }

    fn load_transaction(&self, id: TransactionId) -> Result<Transaction> {
        self.transactions
            .read()
            .get(&id)
            .cloned()
            .ok_or(LedgerError::TransactionNotFound { id })
    }

    fn transactions_for_loan(&self, loan_id: LoanId) -> Result<Vec<Transaction>> {
        let mut found: Vec<Transaction> = self
            .transactions
            .read()
            .values()
            .filter(|t| t.loan_id == loan_id)
            .cloned()
            .collect();
        found.sort_by_key(|t| (t.created_at, t.payment_date));
        Ok(found)
    }

    fn loan_ids_with_status(&self, statuses: &[LoanStatus]) -> Result<Vec<LoanId>> {
        let loans = self.loans.read();
        let mut matching: Vec<&LoanAccount> = loans
            .values()
            .filter(|l| statuses.contains(&l.status))
            .collect();
        matching.sort_by_key(|l| (l.created_at, l.id));
        Ok(matching.into_iter().map(|l| l.id).collect())
    }

    fn loan_lock(&self, loan_id: LoanId) -> Arc<Mutex<()>> {
        self.locks.lock().entry(loan_id).or_default().clone()
    }

    /// terminal or unknown loans drop their lock once no caller holds it
    fn release_loan_lock(&self, loan_id: LoanId) {
        let finished = self
            .loans
            .read()
            .get(&loan_id)
            .map_or(true, |loan| loan.status.is_terminal());
        if !finished {
            return;
        }

        let mut locks = self.locks.lock();
        if locks.get(&loan_id).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(&loan_id);
        }
    }

    fn commit(&self, work: UnitOfWork) -> Result<LoanAccount> {
        // both maps stay locked until every check has passed
        let mut loans = self.loans.write();
        let mut transactions = self.transactions.write();

        let loan_id = work.loan.id;
        let stored = loans.get(&loan_id).ok_or(LedgerError::LoanNotFound { id: loan_id })?;
        if stored.version != work.loan.version {
            return Err(LedgerError::VersionConflict {
                loan_id,
                expected: work.loan.version,
                found: stored.version,
            });
        }

        for tx in &work.transactions {
            if tx.loan_id != loan_id {
                return Err(LedgerError::invalid_input(format!(
                    "transaction {} does not belong to loan {}",
                    tx.id, loan_id
                )));
            }
            if let Some(existing) = transactions.get(&tx.id) {
                if existing.verification_status.is_resolved() || existing.is_applied() {
                    return Err(LedgerError::stale(format!(
                        "transaction {} was already resolved",
                        tx.id
                    )));
                }
            }
        }

        let mut loan = work.loan;
        loan.version += 1;
        for tx in work.transactions {
            transactions.insert(tx.id, tx);
        }
        loans.insert(loan_id, loan.clone());

        debug!(loan_id = %loan_id, version = loan.version, "committed unit of work");
        Ok(loan)
    }
}
