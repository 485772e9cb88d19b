use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::config::LoanTerms;
use crate::decimal::{Money, Rate};
use crate::errors::{LedgerError, Result};
use crate::types::{InterestConvention, RepaymentFrequency};

/// installment and interest totals for a set of terms
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InstallmentQuote {
    pub installment: Money,
    pub total_interest: Money,
    pub total_payable: Money,
    pub periods: u32,
}

/// pure installment (EMI) and interest calculations
#[derive(Debug, Clone, Copy)]
pub struct AmortizationCalculator {
    convention: InterestConvention,
    frequency: RepaymentFrequency,
}

impl AmortizationCalculator {
    pub fn new(convention: InterestConvention, frequency: RepaymentFrequency) -> Self {
        Self {
            convention,
            frequency,
        }
    }

    pub fn for_terms(terms: &LoanTerms) -> Self {
        Self::new(terms.convention, terms.frequency)
    }

    /// level installment per period, rounded to cents
    pub fn installment(
        &self,
        principal: Money,
        annual_rate: Rate,
        term_months: u32,
        periods: u32,
    ) -> Result<Money> {
        validate_inputs(principal, annual_rate, term_months, periods)?;

        match self.convention {
            InterestConvention::CompoundMonthly => {
                let rate = annual_rate.per_period(self.frequency).as_decimal();
                annuity_payment(principal, rate, periods)
            }
            InterestConvention::Simple => {
                let total_interest = simple_interest(principal, annual_rate, term_months);
                Ok(((principal + total_interest) / Decimal::from(periods)).round_currency())
            }
        }
    }

    /// total interest over the term, rounded to cents
    ///
    /// For the reducing-balance convention this is `installment * periods - principal`;
    /// the generated schedule matches it to within the final period's rounding absorption.
    pub fn total_interest(
        &self,
        principal: Money,
        annual_rate: Rate,
        term_months: u32,
        periods: u32,
    ) -> Result<Money> {
        validate_inputs(principal, annual_rate, term_months, periods)?;

        match self.convention {
            InterestConvention::Simple => Ok(simple_interest(principal, annual_rate, term_months)),
            InterestConvention::CompoundMonthly => {
                let installment = self.installment(principal, annual_rate, term_months, periods)?;
                Ok((installment * Decimal::from(periods))
                    .saturating_sub(principal)
                    .round_currency())
            }
        }
    }

    pub fn quote(&self, terms: &LoanTerms) -> Result<InstallmentQuote> {
        let periods = terms.periods();
        let installment =
            self.installment(terms.principal, terms.annual_rate, terms.term_months, periods)?;
        let total_interest =
            self.total_interest(terms.principal, terms.annual_rate, terms.term_months, periods)?;

        Ok(InstallmentQuote {
            installment,
            total_interest,
            total_payable: terms.principal + total_interest,
            periods,
        })
    }
}

fn validate_inputs(principal: Money, annual_rate: Rate, term_months: u32, periods: u32) -> Result<()> {
    if !principal.is_positive() {
        return Err(LedgerError::invalid_input(format!(
            "principal must be positive, got {}",
            principal
        )));
    }
    if term_months == 0 || periods == 0 {
        return Err(LedgerError::invalid_input("term must be positive"));
    }
    if annual_rate.is_negative() {
        return Err(LedgerError::invalid_input(format!(
            "annual rate must not be negative, got {}",
            annual_rate
        )));
    }
    Ok(())
}

/// flat interest: principal * rate * (months / 12)
pub(crate) fn simple_interest(principal: Money, annual_rate: Rate, term_months: u32) -> Money {
    let interest = principal.as_decimal() * annual_rate.as_decimal() * Decimal::from(term_months)
        / Decimal::from(12);
    Money::from_decimal(interest).round_currency()
}

/// EMI = P * r * (1 + r)^n / ((1 + r)^n - 1), or P / n at zero rate
fn annuity_payment(principal: Money, rate: Decimal, periods: u32) -> Result<Money> {
    if rate.is_zero() {
        return Ok((principal / Decimal::from(periods)).round_currency());
    }

    let base = Decimal::ONE + rate;
    let mut compound = Decimal::ONE;
    for _ in 0..periods {
        compound = compound.checked_mul(base).ok_or_else(|| {
            LedgerError::invalid_input("rate and term overflow the installment calculation")
        })?;
    }

    let numerator = principal
        .as_decimal()
        .checked_mul(rate)
        .and_then(|v| v.checked_mul(compound))
        .ok_or_else(|| {
            LedgerError::invalid_input("rate and term overflow the installment calculation")
        })?;
    let denominator = compound - Decimal::ONE;

    Ok(Money::from_decimal(numerator / denominator).round_currency())
}
