use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::decimal::Money;
use crate::errors::{LedgerError, Result};
use crate::lifecycle::{LoanStatus, StatusChange};
use crate::types::{LoanId, PartyId, TransactionId};

/// why an application or proof was turned down; at least one part is required
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectionReason {
    pub text: Option<String>,
    pub image_ref: Option<String>,
    pub audio_ref: Option<String>,
}

impl RejectionReason {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        let blank = |part: &Option<String>| part.as_deref().map_or(true, |s| s.trim().is_empty());
        blank(&self.text) && blank(&self.image_ref) && blank(&self.audio_ref)
    }
}

/// everything the engine tells the outside world about
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    // origination
    ApplicationSubmitted {
        loan_id: LoanId,
        amount: Money,
        timestamp: DateTime<Utc>,
    },
    AdditionalInfoRequested {
        loan_id: LoanId,
        note: String,
        timestamp: DateTime<Utc>,
    },
    LoanDisbursed {
        loan_id: LoanId,
        amount: Money,
        first_due_date: DateTime<Utc>,
        first_installment: Money,
        timestamp: DateTime<Utc>,
    },

    // status
    StatusChanged {
        loan_id: LoanId,
        old_status: LoanStatus,
        new_status: LoanStatus,
        reason: Option<RejectionReason>,
        timestamp: DateTime<Utc>,
    },
    LoanPaidOff {
        loan_id: LoanId,
        final_payment: Money,
        timestamp: DateTime<Utc>,
    },

    // payments
    PaymentRecorded {
        loan_id: LoanId,
        transaction_id: TransactionId,
        amount: Money,
        applied_to_penalty: Money,
        applied_to_interest: Money,
        applied_to_principal: Money,
        timestamp: DateTime<Utc>,
    },
    PaymentProofSubmitted {
        loan_id: LoanId,
        transaction_id: TransactionId,
        amount: Money,
        timestamp: DateTime<Utc>,
    },
    PaymentConfirmed {
        loan_id: LoanId,
        transaction_id: TransactionId,
        amount: Money,
        remaining_balance: Money,
        timestamp: DateTime<Utc>,
    },
    PaymentProofRejected {
        loan_id: LoanId,
        transaction_id: TransactionId,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    // servicing
    PaymentReminder {
        loan_id: LoanId,
        amount_due: Money,
        due_date: NaiveDate,
        timestamp: DateTime<Utc>,
    },
    OverdueAlert {
        loan_id: LoanId,
        amount_due: Money,
        days_overdue: u32,
        penalty_assessed: Money,
        timestamp: DateTime<Utc>,
    },
}

impl Event {
    pub fn status_changed(loan_id: LoanId, change: StatusChange, reason: Option<RejectionReason>) -> Self {
        Event::StatusChanged {
            loan_id,
            old_status: change.from,
            new_status: change.to,
            reason,
            timestamp: change.at,
        }
    }

    pub fn loan_id(&self) -> LoanId {
        match self {
            Event::ApplicationSubmitted { loan_id, .. }
            | Event::AdditionalInfoRequested { loan_id, .. }
            | Event::LoanDisbursed { loan_id, .. }
            | Event::StatusChanged { loan_id, .. }
            | Event::LoanPaidOff { loan_id, .. }
            | Event::PaymentRecorded { loan_id, .. }
            | Event::PaymentProofSubmitted { loan_id, .. }
            | Event::PaymentConfirmed { loan_id, .. }
            | Event::PaymentProofRejected { loan_id, .. }
            | Event::PaymentReminder { loan_id, .. }
            | Event::OverdueAlert { loan_id, .. } => *loan_id,
        }
    }

    /// short type tag for sinks that route on it
    pub fn kind(&self) -> &'static str {
        match self {
            Event::ApplicationSubmitted { .. } => "application_submitted",
            Event::AdditionalInfoRequested { .. } => "additional_info_requested",
            Event::LoanDisbursed { .. } => "loan_disbursed",
            Event::StatusChanged { .. } => "status_changed",
            Event::LoanPaidOff { .. } => "loan_paid_off",
            Event::PaymentRecorded { .. } => "payment_recorded",
            Event::PaymentProofSubmitted { .. } => "payment_proof_submitted",
            Event::PaymentConfirmed { .. } => "payment_confirmed",
            Event::PaymentProofRejected { .. } => "payment_proof_rejected",
            Event::PaymentReminder { .. } => "payment_reminder",
            Event::OverdueAlert { .. } => "overdue_alert",
        }
    }
}

/// outbound notification channel; delivery is fire-and-forget
pub trait NotificationSink: Send + Sync {
    fn emit(&self, recipient: &PartyId, event: Event) -> Result<()>;
}

/// deliver events after a commit; failures are logged and dropped
pub fn dispatch<N: NotificationSink + ?Sized>(sink: &N, recipient: &PartyId, events: Vec<Event>) {
    for event in events {
        let kind = event.kind();
        let loan_id = event.loan_id();
        if let Err(e) = sink.emit(recipient, event) {
            warn!(loan_id = %loan_id, kind, recipient = %recipient, error = %e, "notification delivery failed");
        }
    }
}

/// a notification addressed to a party
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub recipient: PartyId,
    pub event: Event,
}

/// in-memory sink that records every notification
#[derive(Debug, Default)]
pub struct EventStore {
    notifications: Mutex<Vec<Notification>>,
}

impl EventStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take_notifications(&self) -> Vec<Notification> {
        std::mem::take(&mut *self.notifications.lock())
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.notifications.lock().clone()
    }

    pub fn events(&self) -> Vec<Event> {
        self.notifications.lock().iter().map(|n| n.event.clone()).collect()
    }

    pub fn count_of(&self, kind: &str) -> usize {
        self.notifications
            .lock()
            .iter()
            .filter(|n| n.event.kind() == kind)
            .count()
    }

    pub fn clear(&self) {
        self.notifications.lock().clear();
    }
}

impl NotificationSink for EventStore {
    fn emit(&self, recipient: &PartyId, event: Event) -> Result<()> {
        self.notifications.lock().push(Notification {
            recipient: recipient.clone(),
            event,
        });
        Ok(())
    }
}

/// sink that always fails, for exercising delivery-failure handling
#[derive(Debug, Default, Clone, Copy)]
pub struct FailingSink;

impl NotificationSink for FailingSink {
    fn emit(&self, recipient: &PartyId, event: Event) -> Result<()> {
        Err(LedgerError::Notification {
            message: format!("cannot deliver {} to {}", event.kind(), recipient),
        })
    }
}
