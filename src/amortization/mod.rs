pub mod calculator;
pub mod schedule;

pub use calculator::{AmortizationCalculator, InstallmentQuote};
pub use schedule::{generate_schedule, ScheduleEntry, ScheduleGenerator, ScheduleTotals};
