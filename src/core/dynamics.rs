use chrono::{Datelike, NaiveDate};
use tracing::debug;

use super::error::{ForecastError, MIN_HISTORY_MONTHS};
use super::types::{Dynamics, MonthlyRecord};

/// 1-based month of `date` counted from the group's first month; dates before
/// the group started map to 0.
pub fn elapsed_months(start: NaiveDate, date: NaiveDate) -> u32 {
    let diff = (date.year() - start.year()) * 12 + date.month() as i32 - start.month() as i32;
    (diff + 1).max(0) as u32
}

/// Rebuild pool dynamics from an oldest-to-newest record window.
pub fn estimate_dynamics(
    records: &[MonthlyRecord],
    group_start: NaiveDate,
) -> Result<Dynamics, ForecastError> {
    if records.len() < MIN_HISTORY_MONTHS {
        return Err(ForecastError::InsufficientHistory {
            found: records.len(),
            required: MIN_HISTORY_MONTHS,
        });
    }

    let participant_history: Vec<u32> = records.iter().map(|r| r.offered).collect();
    let allocation_history: Vec<u32> = records.iter().map(|r| r.allocated).collect();

    // Contemplated participants leave the pool; add them back so only
    // voluntary entries and exits remain in the delta.
    let mut exits = Vec::new();
    let mut entries = Vec::new();
    for i in 1..participant_history.len() {
        let delta = participant_history[i] as f64 - participant_history[i - 1] as f64
            + allocation_history[i - 1] as f64;
        if delta < 0.0 {
            exits.push(-delta);
        } else if delta > 0.0 {
            entries.push(delta);
        }
    }

    let monthly_exit_rate = mean(&exits);
    let monthly_entry_rate = mean(&entries);
    let volatility = population_std_dev(&participant_history);

    let last = &records[records.len() - 1];
    let dynamics = Dynamics {
        participant_history,
        allocation_history,
        monthly_exit_rate,
        monthly_entry_rate,
        volatility,
        current_participants: last.offered,
        current_month: elapsed_months(group_start, last.date),
    };
    debug!(
        monthly_exit_rate,
        monthly_entry_rate,
        volatility,
        current_participants = dynamics.current_participants,
        current_month = dynamics.current_month,
        "estimated pool dynamics"
    );
    Ok(dynamics)
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

fn population_std_dev(values: &[u32]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().map(|&v| v as f64).sum::<f64>() / n;
    let variance = values
        .iter()
        .map(|&v| (v as f64 - mean).powi(2))
        .sum::<f64>()
        / n;
    variance.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-6;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= EPS,
            "expected {expected}, got {actual}"
        );
    }

    fn date(year: i32, month: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, 1).expect("valid date")
    }

    fn series(offered: &[u32], allocated: &[u32]) -> Vec<MonthlyRecord> {
        offered
            .iter()
            .zip(allocated)
            .enumerate()
            .map(|(i, (&o, &a))| MonthlyRecord {
                date: date(2023, i as u32 + 1),
                offered: o,
                allocated: a,
                winning_bid_percent: 30.0,
            })
            .collect()
    }

    #[test]
    fn elapsed_months_is_one_based() {
        let start = date(2022, 3);
        assert_eq!(elapsed_months(start, date(2022, 3)), 1);
        assert_eq!(elapsed_months(start, date(2022, 12)), 10);
        assert_eq!(elapsed_months(start, date(2024, 2)), 24);
        assert_eq!(elapsed_months(start, date(2021, 1)), 0);
    }

    #[test]
    fn deltas_add_back_contemplated_participants() {
        // 100 -> 96 with 5 contemplated: one voluntary entry.
        // 96 -> 90 with 5 contemplated: one voluntary exit.
        // 90 -> 80 with 5 contemplated: five voluntary exits.
        let records = series(&[100, 96, 90, 80], &[5, 5, 5, 5]);
        let dynamics = estimate_dynamics(&records, date(2022, 1)).expect("dynamics");

        assert_approx(dynamics.monthly_entry_rate, 1.0);
        assert_approx(dynamics.monthly_exit_rate, 3.0);
        assert_eq!(dynamics.current_participants, 80);
        assert_eq!(dynamics.current_month, 16);
        assert_eq!(dynamics.participant_history, vec![100, 96, 90, 80]);
        assert_eq!(dynamics.allocation_history, vec![5, 5, 5, 5]);
        assert_approx(dynamics.mean_allocated_per_month(), 5.0);
    }

    #[test]
    fn rates_default_to_zero_without_samples() {
        let records = series(&[50, 45, 40], &[5, 5, 5]);
        let dynamics = estimate_dynamics(&records, date(2023, 1)).expect("dynamics");
        assert_approx(dynamics.monthly_entry_rate, 0.0);
        assert_approx(dynamics.monthly_exit_rate, 0.0);
    }

    #[test]
    fn volatility_is_population_std_dev() {
        let records = series(&[2, 4, 4, 4, 5, 5, 7, 9], &[0; 8]);
        let dynamics = estimate_dynamics(&records, date(2023, 1)).expect("dynamics");
        assert_approx(dynamics.volatility, 2.0);
    }

    #[test]
    fn two_records_are_insufficient_history() {
        let records = series(&[10, 9], &[1, 1]);
        let err = estimate_dynamics(&records, date(2023, 1)).expect_err("must reject");
        assert!(matches!(
            err,
            ForecastError::InsufficientHistory {
                found: 2,
                required: 3
            }
        ));
        assert!(estimate_dynamics(&series(&[10, 9, 8], &[1, 1, 1]), date(2023, 1)).is_ok());
    }
}
