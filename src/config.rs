use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::decimal::{Money, Rate};
use crate::errors::{LedgerError, Result};
use crate::types::{InterestConvention, OverpaymentPolicy, RepaymentFrequency};

/// longest term accepted, fifty years
pub const MAX_TERM_MONTHS: u32 = 600;

/// financial terms of a single loan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoanTerms {
    pub principal: Money,
    pub annual_rate: Rate,
    pub term_months: u32,
    pub convention: InterestConvention,
    pub frequency: RepaymentFrequency,
}

impl LoanTerms {
    pub fn new(
        principal: Money,
        annual_rate: Rate,
        term_months: u32,
        convention: InterestConvention,
        frequency: RepaymentFrequency,
    ) -> Self {
        Self {
            principal,
            annual_rate,
            term_months,
            convention,
            frequency,
        }
    }

    /// reducing-balance monthly installments
    pub fn monthly_emi(principal: Money, annual_rate: Rate, term_months: u32) -> Self {
        Self::new(
            principal,
            annual_rate,
            term_months,
            InterestConvention::CompoundMonthly,
            RepaymentFrequency::Monthly,
        )
    }

    /// flat-interest weekly collections, typical of micro loans
    pub fn weekly_flat(principal: Money, annual_rate: Rate, term_months: u32) -> Self {
        Self::new(
            principal,
            annual_rate,
            term_months,
            InterestConvention::Simple,
            RepaymentFrequency::Weekly,
        )
    }

    /// same terms with a different principal (approval may lower the amount)
    pub fn with_principal(&self, principal: Money) -> Self {
        Self {
            principal,
            ..self.clone()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !self.principal.is_positive() {
            return Err(LedgerError::invalid_input(format!(
                "principal must be positive, got {}",
                self.principal
            )));
        }
        if self.term_months == 0 {
            return Err(LedgerError::invalid_input("term must be at least one month"));
        }
        if self.term_months > MAX_TERM_MONTHS {
            return Err(LedgerError::invalid_input(format!(
                "term of {} months exceeds the {} month limit",
                self.term_months, MAX_TERM_MONTHS
            )));
        }
        if self.annual_rate.is_negative() {
            return Err(LedgerError::invalid_input(format!(
                "annual rate must not be negative, got {}",
                self.annual_rate
            )));
        }
        Ok(())
    }

    /// number of repayment periods, rounded half up, never below one
    pub fn periods(&self) -> u32 {
        let periods = match self.frequency {
            RepaymentFrequency::Monthly => self.term_months,
            RepaymentFrequency::Weekly => (self.term_months * 52 + 6) / 12,
            RepaymentFrequency::Daily => (self.term_months * 365 + 6) / 12,
        };
        periods.max(1)
    }
}

/// late penalty settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PenaltyConfig {
    /// charged per day late on the installment due
    pub daily_rate: Rate,
}

impl Default for PenaltyConfig {
    fn default() -> Self {
        Self {
            daily_rate: Rate::from_percentage_decimal(dec!(0.5)),
        }
    }
}

/// engine-wide settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerConfig {
    pub penalty: PenaltyConfig,
    /// days after the due date before an Active loan turns Overdue
    pub grace_period_days: u32,
    /// days after the due date before an Overdue loan is Defaulted
    pub default_after_days: u32,
    /// how early a payment reminder goes out before the due date
    pub reminder_lead_days: u32,
    pub overpayment_policy: OverpaymentPolicy,
    /// attempts for a unit of work that hits a version conflict
    pub max_commit_retries: u32,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            penalty: PenaltyConfig::default(),
            grace_period_days: 3,
            default_after_days: 90,
            reminder_lead_days: 3,
            overpayment_policy: OverpaymentPolicy::Reject,
            max_commit_retries: 3,
        }
    }
}

impl LedgerConfig {
    /// load from a json document, validating thresholds
    pub fn from_json(json: &str) -> Result<Self> {
        let config: LedgerConfig =
            serde_json::from_str(json).map_err(|e| LedgerError::InvalidConfiguration {
                message: e.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.penalty.daily_rate.is_negative() {
            return Err(LedgerError::InvalidConfiguration {
                message: "penalty rate must not be negative".to_string(),
            });
        }
        if self.default_after_days <= self.grace_period_days {
            return Err(LedgerError::InvalidConfiguration {
                message: format!(
                    "default threshold ({} days) must exceed grace period ({} days)",
                    self.default_after_days, self.grace_period_days
                ),
            });
        }
        if self.max_commit_retries == 0 {
            return Err(LedgerError::InvalidConfiguration {
                message: "at least one commit attempt is required".to_string(),
            });
        }
        Ok(())
    }
}
