pub mod amortization;
pub mod config;
pub mod decimal;
pub mod engine;
pub mod errors;
pub mod events;
pub mod ledger;
pub mod lifecycle;
pub mod payments;
pub mod scanner;
pub mod state;
pub mod store;
pub mod transaction;
pub mod types;
pub mod verification;

// re-export key types
pub use amortization::{
    generate_schedule, AmortizationCalculator, InstallmentQuote, ScheduleEntry, ScheduleGenerator,
    ScheduleTotals,
};
pub use config::{LedgerConfig, LoanTerms, PenaltyConfig};
pub use decimal::{Money, Rate};
pub use engine::LoanEngine;
pub use errors::{LedgerError, Result};
pub use events::{Event, EventStore, NotificationSink, RejectionReason};
pub use ledger::{apply_allocation, apply_disbursement, LedgerUpdate};
pub use lifecycle::{LoanStatus, StatusChange};
pub use payments::{AllocationResult, LoanSnapshot, PaymentAllocator, PenaltyEngine};
pub use scanner::{OverdueScanner, ScanError, ScanReport};
pub use state::{LoanAccount, LoanSummary};
pub use store::{InMemoryStore, LoanStore, UnitOfWork};
pub use transaction::Transaction;
pub use types::{
    InterestConvention, LoanId, OverpaymentPolicy, PartyId, PaymentMethod, RepaymentFrequency,
    TransactionId, TransactionType, VerificationStatus,
};
pub use verification::VerificationOutcome;

// re-export external dependencies that users will need
pub use chrono;
pub use hourglass_rs::{SafeTimeProvider, TimeSource};
pub use rust_decimal::Decimal;
pub use uuid::Uuid;
