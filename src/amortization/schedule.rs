use chrono::{DateTime, Months, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::config::LoanTerms;
use crate::decimal::{Money, Rate};
use crate::errors::{LedgerError, Result};
use crate::types::{InterestConvention, RepaymentFrequency};

use super::calculator::AmortizationCalculator;

/// one repayment period of an amortization schedule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub period: u32,
    pub due_date: DateTime<Utc>,
    pub starting_balance: Money,
    pub principal_component: Money,
    pub interest_component: Money,
    pub ending_balance: Money,
    pub payment_amount: Money,
    pub is_paid: bool,
}

/// totals across a schedule
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScheduleTotals {
    pub principal: Money,
    pub interest: Money,
    pub payments: Money,
}

impl ScheduleTotals {
    pub fn of(entries: &[ScheduleEntry]) -> Self {
        Self {
            principal: Money::sum(entries.iter().map(|e| e.principal_component)),
            interest: Money::sum(entries.iter().map(|e| e.interest_component)),
            payments: Money::sum(entries.iter().map(|e| e.payment_amount)),
        }
    }
}

/// stateless schedule builder
pub struct ScheduleGenerator;

impl ScheduleGenerator {
    /// build the full schedule; the first period falls due one step after `start_date`
    pub fn generate(terms: &LoanTerms, start_date: DateTime<Utc>) -> Result<Vec<ScheduleEntry>> {
        terms.validate()?;

        let calculator = AmortizationCalculator::for_terms(terms);
        let periods = terms.periods();
        let installment =
            calculator.installment(terms.principal, terms.annual_rate, terms.term_months, periods)?;

        let due_dates = (1..=periods)
            .map(|period| due_date(start_date, terms.frequency, period))
            .collect::<Result<Vec<_>>>()?;

        let entries = match terms.convention {
            InterestConvention::CompoundMonthly => reducing_balance(
                terms.principal,
                terms.annual_rate.per_period(terms.frequency),
                installment,
                &due_dates,
            ),
            InterestConvention::Simple => {
                let total_interest = calculator.total_interest(
                    terms.principal,
                    terms.annual_rate,
                    terms.term_months,
                    periods,
                )?;
                flat_interest(terms.principal, total_interest, installment, &due_dates)
            }
        };

        Ok(entries)
    }
}

/// generate a schedule from loose parameters
pub fn generate_schedule(
    principal: Money,
    annual_rate: Rate,
    term_months: u32,
    start_date: DateTime<Utc>,
    convention: InterestConvention,
    frequency: RepaymentFrequency,
) -> Result<Vec<ScheduleEntry>> {
    let terms = LoanTerms::new(principal, annual_rate, term_months, convention, frequency);
    ScheduleGenerator::generate(&terms, start_date)
}

fn due_date(start: DateTime<Utc>, frequency: RepaymentFrequency, period: u32) -> Result<DateTime<Utc>> {
    let date = match frequency.fixed_step() {
        Some(step) => start.checked_add_signed(step * period as i32),
        // anchored on the start date so month-end clamping never drifts
        None => start.checked_add_months(Months::new(period)),
    };
    date.ok_or_else(|| LedgerError::invalid_input(format!("due date for period {} is out of range", period)))
}

fn reducing_balance(
    principal: Money,
    period_rate: Rate,
    installment: Money,
    due_dates: &[DateTime<Utc>],
) -> Vec<ScheduleEntry> {
    let last = due_dates.len();
    let mut balance = principal;
    let mut entries = Vec::with_capacity(last);

    for (idx, due_date) in due_dates.iter().enumerate() {
        let period = idx as u32 + 1;
        let interest = balance.times_rate(period_rate).round_currency();

        // final period absorbs rounding drift
        let principal_component = if idx + 1 == last {
            balance
        } else {
            installment.saturating_sub(interest).min(balance)
        };

        let ending_balance = balance - principal_component;
        entries.push(ScheduleEntry {
            period,
            due_date: *due_date,
            starting_balance: balance,
            principal_component,
            interest_component: interest,
            ending_balance,
            payment_amount: principal_component + interest,
            is_paid: false,
        });
        balance = ending_balance;
    }

    entries
}

fn flat_interest(
    principal: Money,
    total_interest: Money,
    installment: Money,
    due_dates: &[DateTime<Utc>],
) -> Vec<ScheduleEntry> {
    let last = due_dates.len();
    let interest_share = (total_interest / Decimal::from(last as u32)).round_currency();
    let mut balance = principal;
    let mut interest_charged = Money::ZERO;
    let mut entries = Vec::with_capacity(last);

    for (idx, due_date) in due_dates.iter().enumerate() {
        let period = idx as u32 + 1;
        let interest_left = total_interest - interest_charged;

        let (principal_component, interest) = if idx + 1 == last {
            (balance, interest_left)
        } else {
            let interest = interest_share.min(interest_left);
            (installment.saturating_sub(interest).min(balance), interest)
        };

        let ending_balance = balance - principal_component;
        entries.push(ScheduleEntry {
            period,
            due_date: *due_date,
            starting_balance: balance,
            principal_component,
            interest_component: interest,
            ending_balance,
            payment_amount: principal_component + interest,
            is_paid: false,
        });
        balance = ending_balance;
        interest_charged += interest;
    }

    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, TimeZone};

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn assert_balanced(entries: &[ScheduleEntry], principal: Money) {
        for entry in entries {
            assert_eq!(
                entry.starting_balance - entry.principal_component,
                entry.ending_balance,
                "period {} does not balance",
                entry.period
            );
            assert!(!entry.principal_component.is_negative());
            assert!(!entry.interest_component.is_negative());
            assert_eq!(entry.payment_amount, entry.principal_component + entry.interest_component);
        }
        for pair in entries.windows(2) {
            assert_eq!(pair[0].ending_balance, pair[1].starting_balance);
        }
        assert_eq!(entries[0].starting_balance, principal);
        assert_eq!(entries.last().unwrap().ending_balance, Money::ZERO);
        assert_eq!(ScheduleTotals::of(entries).principal, principal);
    }

    #[test]
    fn test_reference_reducing_balance_schedule() {
        let principal = Money::from_major(100_000);
        let entries = generate_schedule(
            principal,
            Rate::from_percentage(12),
            12,
            start(),
            InterestConvention::CompoundMonthly,
            RepaymentFrequency::Monthly,
        )
        .unwrap();

        assert_eq!(entries.len(), 12);
        assert_balanced(&entries, principal);

        let emi = Money::from_str_exact("8884.88").unwrap();
        assert_eq!(entries[0].interest_component, Money::from_major(1_000));
        assert_eq!(entries[0].principal_component, Money::from_str_exact("7884.88").unwrap());
        for entry in &entries[..11] {
            assert_eq!(entry.payment_amount, emi);
        }
        // last period absorbs a few cents at most
        assert!((entries[11].payment_amount - emi).abs() < Money::ONE);

        // interest declines as the balance reduces
        for pair in entries.windows(2) {
            assert!(pair[1].interest_component < pair[0].interest_component);
        }
    }

    #[test]
    fn test_interest_matches_calculator_total() {
        let terms = LoanTerms::monthly_emi(Money::from_major(250_000), Rate::from_percentage(9), 36);
        let entries = ScheduleGenerator::generate(&terms, start()).unwrap();
        let quote = AmortizationCalculator::for_terms(&terms).quote(&terms).unwrap();

        let totals = ScheduleTotals::of(&entries);
        assert!((totals.interest - quote.total_interest).abs() < Money::ONE);
        assert_eq!(totals.payments, totals.principal + totals.interest);
    }

    #[test]
    fn test_flat_interest_weekly_schedule() {
        let terms = LoanTerms::weekly_flat(Money::from_major(10_000), Rate::from_percentage(18), 6);
        let entries = ScheduleGenerator::generate(&terms, start()).unwrap();

        assert_eq!(entries.len(), 26);
        assert_balanced(&entries, terms.principal);

        // 10,000 * 18% * 6/12
        let totals = ScheduleTotals::of(&entries);
        assert_eq!(totals.interest, Money::from_major(900));

        assert_eq!(entries[0].due_date, start() + chrono::Duration::weeks(1));
        assert_eq!(entries[25].due_date, start() + chrono::Duration::weeks(26));
    }

    #[test]
    fn test_daily_reducing_balance_schedule() {
        let terms = LoanTerms::new(
            Money::from_major(3_000),
            Rate::from_percentage(36),
            1,
            InterestConvention::CompoundMonthly,
            RepaymentFrequency::Daily,
        );
        let entries = ScheduleGenerator::generate(&terms, start()).unwrap();

        assert_eq!(entries.len(), 30);
        assert_balanced(&entries, terms.principal);
        assert_eq!(entries[29].due_date, start() + chrono::Duration::days(30));
    }

    #[test]
    fn test_zero_rate_schedule() {
        let principal = Money::from_major(100);
        let entries = generate_schedule(
            principal,
            Rate::ZERO,
            3,
            start(),
            InterestConvention::CompoundMonthly,
            RepaymentFrequency::Monthly,
        )
        .unwrap();

        assert_balanced(&entries, principal);
        assert_eq!(entries[0].payment_amount, Money::from_str_exact("33.33").unwrap());
        assert_eq!(entries[2].payment_amount, Money::from_str_exact("33.34").unwrap());
        assert_eq!(ScheduleTotals::of(&entries).interest, Money::ZERO);
    }

    #[test]
    fn test_monthly_due_dates_clamp_to_month_end() {
        let jan_31 = Utc.with_ymd_and_hms(2024, 1, 31, 0, 0, 0).unwrap();
        let terms = LoanTerms::monthly_emi(Money::from_major(1_000), Rate::from_percentage(12), 3);
        let entries = ScheduleGenerator::generate(&terms, jan_31).unwrap();

        assert_eq!((entries[0].due_date.month(), entries[0].due_date.day()), (2, 29));
        assert_eq!((entries[1].due_date.month(), entries[1].due_date.day()), (3, 31));
        assert_eq!((entries[2].due_date.month(), entries[2].due_date.day()), (4, 30));
    }

    #[test]
    fn test_generation_is_deterministic() {
        let terms = LoanTerms::monthly_emi(Money::from_major(42_000), Rate::from_percentage(15), 24);
        let a = ScheduleGenerator::generate(&terms, start()).unwrap();
        let b = ScheduleGenerator::generate(&terms, start()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_invalid_terms_produce_no_schedule() {
        let result = generate_schedule(
            Money::ZERO,
            Rate::from_percentage(12),
            12,
            start(),
            InterestConvention::Simple,
            RepaymentFrequency::Monthly,
        );
        assert!(matches!(result, Err(LedgerError::InvalidInput { .. })));
    }
}
