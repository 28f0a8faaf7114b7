use tracing::debug;

use super::error::ForecastError;
use super::types::{
    BaseMetrics, CompetitivenessIndicator, CompetitivenessTier, Confidence, Mechanism,
    MonthlyRecord,
};

/// Linear-interpolated quantile (R-7) of `values`, sorting them in place.
/// `q` is a fraction in 0..=1. Empty input yields 0.
pub fn quantile(values: &mut [f64], q: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }

    values.sort_by(|a, b| a.total_cmp(b));

    let n = values.len();
    if n == 1 {
        return values[0];
    }

    let rank = q.clamp(0.0, 1.0) * (n as f64 - 1.0);
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;

    if lower == upper {
        values[lower]
    } else {
        let w = rank - lower as f64;
        values[lower] * (1.0 - w) + values[upper] * w
    }
}

pub(crate) fn check_records(records: &[MonthlyRecord]) -> Result<(), ForecastError> {
    for (index, record) in records.iter().enumerate() {
        if record.allocated > record.offered {
            return Err(ForecastError::InvalidRecord {
                index,
                reason: format!(
                    "allocated ({}) exceeds offered ({})",
                    record.allocated, record.offered
                ),
            });
        }
        if record.allocated > 0
            && (!record.winning_bid_percent.is_finite()
                || !(0.0..=100.0).contains(&record.winning_bid_percent))
        {
            return Err(ForecastError::InvalidRecord {
                index,
                reason: format!(
                    "winning bid {} is outside 0..=100",
                    record.winning_bid_percent
                ),
            });
        }
    }
    Ok(())
}

/// Per-month contemplation ratio; zero when nobody was offered.
pub fn contemplation_rate(record: &MonthlyRecord) -> f64 {
    if record.offered == 0 {
        0.0
    } else {
        record.allocated as f64 / record.offered as f64
    }
}

pub fn compute_base_metrics(
    records: &[MonthlyRecord],
    mechanism: Mechanism,
) -> Result<BaseMetrics, ForecastError> {
    check_records(records)?;

    let mut bids: Vec<f64> = records
        .iter()
        .filter(|r| r.allocated > 0)
        .map(|r| r.winning_bid_percent)
        .collect();
    if bids.is_empty() {
        return Err(ForecastError::InsufficientSample { mechanism });
    }

    let p_median = quantile(&mut bids, 0.5);
    let p_min = bids[0];
    let p_max = bids[bids.len() - 1];

    let mean_contemplation_rate =
        records.iter().map(contemplation_rate).sum::<f64>() / records.len() as f64;

    let sample_size = bids.len();
    let metrics = BaseMetrics {
        p_min,
        p_median,
        p_max,
        mean_contemplation_rate,
        sample_size,
        confidence: Confidence::from_sample_size(sample_size),
    };
    debug!(
        %mechanism,
        p_min,
        p_median,
        p_max,
        mean_contemplation_rate,
        sample_size,
        "computed base metrics"
    );
    Ok(metrics)
}

pub fn score_competitiveness(
    bid_percent: f64,
    metrics: &BaseMetrics,
) -> CompetitivenessIndicator {
    let range = metrics.p_max - metrics.p_min;
    let score = if range.abs() <= f64::EPSILON {
        0.5
    } else {
        ((bid_percent - metrics.p_min) / range).clamp(0.0, 1.0)
    };
    let tier = CompetitivenessTier::from_score(score);
    let description = match tier {
        CompetitivenessTier::Low => format!(
            "A {bid_percent:.2}% bid sits in the lower part of recent winning bids \
             ({:.2}%-{:.2}%); contemplation by bid is unlikely soon.",
            metrics.p_min, metrics.p_max
        ),
        CompetitivenessTier::Medium => format!(
            "A {bid_percent:.2}% bid is close to the historical median of {:.2}%; \
             it competes on an average footing.",
            metrics.p_median
        ),
        CompetitivenessTier::High => format!(
            "A {bid_percent:.2}% bid is near the top of recent winning bids \
             (up to {:.2}%); it is highly competitive.",
            metrics.p_max
        ),
    };

    CompetitivenessIndicator {
        score,
        tier,
        description,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use proptest::prelude::{prop_assert, proptest};

    const EPS: f64 = 1e-6;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= EPS,
            "expected {expected}, got {actual}"
        );
    }

    fn record(month: u32, offered: u32, allocated: u32, bid: f64) -> MonthlyRecord {
        MonthlyRecord {
            date: NaiveDate::from_ymd_opt(2024, month, 1).expect("valid date"),
            offered,
            allocated,
            winning_bid_percent: bid,
        }
    }

    fn metrics_with_range(p_min: f64, p_max: f64) -> BaseMetrics {
        BaseMetrics {
            p_min,
            p_median: (p_min + p_max) / 2.0,
            p_max,
            mean_contemplation_rate: 0.05,
            sample_size: 6,
            confidence: Confidence::Medium,
        }
    }

    #[test]
    fn quantile_interpolates_between_ranks() {
        let mut values = vec![65.0, 40.0, 55.0, 45.0, 60.0, 50.0];
        assert_approx(quantile(&mut values, 0.5), 52.5);
        assert_approx(quantile(&mut values, 0.0), 40.0);
        assert_approx(quantile(&mut values, 1.0), 65.0);
        assert_approx(quantile(&mut values, 0.25), 46.25);
    }

    #[test]
    fn quantile_of_empty_and_single_values() {
        assert_approx(quantile(&mut [], 0.5), 0.0);
        assert_approx(quantile(&mut [7.5], 0.9), 7.5);
    }

    #[test]
    fn six_month_history_produces_expected_percentiles() {
        let records: Vec<MonthlyRecord> = [40.0, 45.0, 50.0, 55.0, 60.0, 65.0]
            .iter()
            .enumerate()
            .map(|(i, &bid)| record(i as u32 + 1, 100, 2, bid))
            .collect();

        let metrics = compute_base_metrics(&records, Mechanism::FreeBid).expect("metrics");
        assert_approx(metrics.p_min, 40.0);
        assert_approx(metrics.p_median, 52.5);
        assert_approx(metrics.p_max, 65.0);
        assert_approx(metrics.mean_contemplation_rate, 0.02);
        assert_eq!(metrics.sample_size, 6);
        assert_eq!(metrics.confidence, Confidence::Medium);
    }

    #[test]
    fn mean_rate_counts_every_month_in_window() {
        let records = vec![
            record(1, 100, 10, 30.0),
            record(2, 50, 0, 0.0),
            record(3, 0, 0, 0.0),
        ];
        let metrics = compute_base_metrics(&records, Mechanism::Lottery).expect("metrics");
        assert_approx(metrics.mean_contemplation_rate, 0.1 / 3.0);
        assert_eq!(metrics.sample_size, 1);
        assert_eq!(metrics.confidence, Confidence::Low);
    }

    #[test]
    fn bids_from_months_without_allocation_are_ignored() {
        let records = vec![
            record(1, 100, 1, 30.0),
            record(2, 100, 0, 99.0),
            record(3, 100, 1, 40.0),
        ];
        let metrics = compute_base_metrics(&records, Mechanism::FreeBid).expect("metrics");
        assert_approx(metrics.p_max, 40.0);
    }

    #[test]
    fn no_allocated_month_is_insufficient_sample() {
        let records = vec![record(1, 100, 0, 0.0), record(2, 90, 0, 0.0)];
        let err = compute_base_metrics(&records, Mechanism::CappedBid)
            .expect_err("must reject empty bid sample");
        assert!(matches!(
            err,
            ForecastError::InsufficientSample {
                mechanism: Mechanism::CappedBid
            }
        ));
        assert!(err.to_string().contains("wider lookback"));
    }

    #[test]
    fn allocated_above_offered_is_invalid_record() {
        let records = vec![record(1, 10, 1, 20.0), record(2, 3, 4, 20.0)];
        let err = compute_base_metrics(&records, Mechanism::FreeBid).expect_err("must reject");
        assert!(matches!(err, ForecastError::InvalidRecord { index: 1, .. }));
    }

    #[test]
    fn confidence_follows_sample_size_thresholds() {
        assert_eq!(Confidence::from_sample_size(0), Confidence::Low);
        assert_eq!(Confidence::from_sample_size(5), Confidence::Low);
        assert_eq!(Confidence::from_sample_size(6), Confidence::Medium);
        assert_eq!(Confidence::from_sample_size(9), Confidence::Medium);
        assert_eq!(Confidence::from_sample_size(10), Confidence::High);
    }

    #[test]
    fn top_of_range_bid_is_high_tier() {
        let indicator = score_competitiveness(65.0, &metrics_with_range(40.0, 65.0));
        assert_approx(indicator.score, 1.0);
        assert_eq!(indicator.tier, CompetitivenessTier::High);
        assert_approx(indicator.tier.rate_multiplier(), 1.5);
    }

    #[test]
    fn tiers_switch_at_thresholds() {
        let metrics = metrics_with_range(0.0, 100.0);
        for (bid, tier) in [
            (32.9, CompetitivenessTier::Low),
            (33.0, CompetitivenessTier::Medium),
            (65.9, CompetitivenessTier::Medium),
            (66.0, CompetitivenessTier::High),
        ] {
            assert_eq!(score_competitiveness(bid, &metrics).tier, tier);
        }
    }

    #[test]
    fn bids_outside_range_are_clamped() {
        let metrics = metrics_with_range(20.0, 40.0);
        assert_approx(score_competitiveness(5.0, &metrics).score, 0.0);
        assert_approx(score_competitiveness(90.0, &metrics).score, 1.0);
    }

    proptest! {
        #![proptest_config(proptest::test_runner::Config::with_cases(64))]

        #[test]
        fn prop_percentiles_are_ordered_and_rate_is_bounded(
            months in proptest::collection::vec((0u32..500, 0u32..500, 0u32..10_000), 1..30)
        ) {
            let records: Vec<MonthlyRecord> = months
                .iter()
                .enumerate()
                .map(|(i, &(offered, allocated, bid_bp))| MonthlyRecord {
                    date: NaiveDate::from_ymd_opt(2020 + (i as i32 / 12), (i as u32 % 12) + 1, 1)
                        .expect("valid date"),
                    offered,
                    allocated: allocated.min(offered),
                    winning_bid_percent: bid_bp as f64 / 100.0,
                })
                .collect();

            if let Ok(metrics) = compute_base_metrics(&records, Mechanism::FreeBid) {
                prop_assert!(metrics.p_min <= metrics.p_median);
                prop_assert!(metrics.p_median <= metrics.p_max);
                prop_assert!((0.0..=1.0).contains(&metrics.mean_contemplation_rate));
                prop_assert!(metrics.sample_size >= 1);
            } else {
                prop_assert!(records.iter().all(|r| r.allocated == 0));
            }
        }

        #[test]
        fn prop_score_is_normalised(
            bid_bp in 0u32..=10_000,
            lo_bp in 0u32..=10_000,
            span_bp in 0u32..=10_000
        ) {
            let p_min = lo_bp as f64 / 100.0;
            let p_max = (p_min + span_bp as f64 / 100.0).min(100.0);
            let metrics = metrics_with_range(p_min, p_max);
            let indicator = score_competitiveness(bid_bp as f64 / 100.0, &metrics);
            prop_assert!((0.0..=1.0).contains(&indicator.score));
        }

        #[test]
        fn prop_degenerate_range_scores_one_half(
            bid_bp in 0u32..=10_000,
            level_bp in 0u32..=10_000
        ) {
            let level = level_bp as f64 / 100.0;
            let metrics = metrics_with_range(level, level);
            let indicator = score_competitiveness(bid_bp as f64 / 100.0, &metrics);
            prop_assert!(indicator.score == 0.5);
            prop_assert!(indicator.tier == CompetitivenessTier::Medium);
        }
    }
}
