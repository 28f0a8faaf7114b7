//! Group and administrator roll-ups built from the same metrics primitives
//! the forecast uses.

use serde::Serialize;
use tracing::warn;

use super::error::ForecastError;
use super::metrics::compute_base_metrics;
use super::types::{BaseMetrics, Group, GroupKey, Mechanism, MonthlyRecord};

/// Relative divergence tolerated between a derived and a reported total.
pub const DEFAULT_CONSISTENCY_TOLERANCE: f64 = 0.01;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupReport {
    pub group: GroupKey,
    pub mechanism: Mechanism,
    pub months: usize,
    pub total_offered: u64,
    pub total_allocated: u64,
    pub metrics: BaseMetrics,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsistencyWarning {
    pub field: &'static str,
    pub derived: f64,
    pub reported: f64,
    pub relative_gap: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdministratorReport {
    pub administrator: String,
    pub mechanism: Mechanism,
    pub groups: Vec<GroupReport>,
    /// Groups whose window had no allocated month.
    pub groups_without_sample: Vec<GroupKey>,
    pub total_offered: u64,
    pub total_allocated: u64,
    pub pooled_metrics: Option<BaseMetrics>,
    pub mean_group_rate: f64,
    pub warnings: Vec<ConsistencyWarning>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupRanking {
    pub rank: usize,
    pub group: GroupKey,
    pub p_median: f64,
    pub mean_contemplation_rate: f64,
}

pub fn summarize_group(
    group: &Group,
    mechanism: Mechanism,
    records: &[MonthlyRecord],
) -> Result<GroupReport, ForecastError> {
    let metrics = compute_base_metrics(records, mechanism)?;
    Ok(GroupReport {
        group: group.key(),
        mechanism,
        months: records.len(),
        total_offered: records.iter().map(|r| r.offered as u64).sum(),
        total_allocated: records.iter().map(|r| r.allocated as u64).sum(),
        metrics,
    })
}

/// Roll every group of one administrator up for a single mechanism.
///
/// `reported_total_allocated` is an externally supplied aggregate; when the
/// per-group sum drifts from it the report carries a warning instead of
/// failing.
pub fn summarize_administrator(
    administrator: &str,
    mechanism: Mechanism,
    histories: &[(&Group, &[MonthlyRecord])],
    reported_total_allocated: Option<u64>,
) -> Result<AdministratorReport, ForecastError> {
    let mut groups = Vec::new();
    let mut groups_without_sample = Vec::new();
    let mut pooled: Vec<MonthlyRecord> = Vec::new();

    for (group, records) in histories {
        if group.administrator != administrator {
            continue;
        }
        match summarize_group(group, mechanism, records) {
            Ok(report) => groups.push(report),
            Err(ForecastError::InsufficientSample { .. }) => {
                groups_without_sample.push(group.key())
            }
            Err(err) => return Err(err),
        }
        pooled.extend_from_slice(records);
    }

    // Totals cover every matched group, sampled or not.
    let total_offered = pooled.iter().map(|r| r.offered as u64).sum();
    let total_allocated: u64 = pooled.iter().map(|r| r.allocated as u64).sum();
    let mean_group_rate = if groups.is_empty() {
        0.0
    } else {
        groups
            .iter()
            .map(|g| g.metrics.mean_contemplation_rate)
            .sum::<f64>()
            / groups.len() as f64
    };
    let pooled_metrics = match compute_base_metrics(&pooled, mechanism) {
        Ok(metrics) => Some(metrics),
        Err(ForecastError::InsufficientSample { .. }) => None,
        Err(err) => return Err(err),
    };

    let warnings = reported_total_allocated
        .and_then(|reported| {
            check_consistency(
                "totalAllocated",
                total_allocated as f64,
                reported as f64,
                DEFAULT_CONSISTENCY_TOLERANCE,
            )
        })
        .into_iter()
        .collect();

    Ok(AdministratorReport {
        administrator: administrator.to_string(),
        mechanism,
        groups,
        groups_without_sample,
        total_offered,
        total_allocated,
        pooled_metrics,
        mean_group_rate,
        warnings,
    })
}

/// Cheapest entry first: ascending median winning bid, then higher
/// contemplation rate.
pub fn rank_groups(reports: &[GroupReport]) -> Vec<GroupRanking> {
    let mut ordered: Vec<&GroupReport> = reports.iter().collect();
    ordered.sort_by(|a, b| {
        a.metrics
            .p_median
            .total_cmp(&b.metrics.p_median)
            .then(
                b.metrics
                    .mean_contemplation_rate
                    .total_cmp(&a.metrics.mean_contemplation_rate),
            )
    });
    ordered
        .into_iter()
        .enumerate()
        .map(|(idx, report)| GroupRanking {
            rank: idx + 1,
            group: report.group.clone(),
            p_median: report.metrics.p_median,
            mean_contemplation_rate: report.metrics.mean_contemplation_rate,
        })
        .collect()
}

pub fn check_consistency(
    field: &'static str,
    derived: f64,
    reported: f64,
    tolerance: f64,
) -> Option<ConsistencyWarning> {
    let relative_gap = (derived - reported).abs() / reported.abs().max(1.0);
    if relative_gap <= tolerance {
        return None;
    }
    warn!(
        field,
        derived,
        reported,
        relative_gap,
        "derived total diverges from reported aggregate"
    );
    Some(ConsistencyWarning {
        field,
        derived,
        reported,
        relative_gap,
    })
}
