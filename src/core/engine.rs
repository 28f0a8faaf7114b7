use tracing::{info, warn};

use super::dynamics::estimate_dynamics;
use super::error::{ForecastError, MIN_HISTORY_MONTHS};
use super::metrics::{compute_base_metrics, score_competitiveness};
use super::projector::{ProjectionInputs, project_scenarios};
use super::source::RecordSource;
use super::types::{
    BaseMetrics, CompetitivenessIndicator, Confidence, Dynamics, Group, LookbackWindow,
    MonthlyRecord, Scenario, SimulationParams, SimulationRequest, SimulationResult,
};

/// Longest group term accepted; projections step month by month up to it.
pub const MAX_TERM_MONTHS: u32 = 600;

pub fn validate_params(request: &SimulationRequest) -> Result<SimulationParams, ForecastError> {
    if !request.credit_value.is_finite() || request.credit_value <= 0.0 {
        return Err(ForecastError::invalid("creditValue", "must be > 0"));
    }

    let Some(lookback) = LookbackWindow::from_months(request.lookback_months) else {
        return Err(ForecastError::invalid(
            "lookbackMonths",
            format!("must be 6, 12 or 24 (got {})", request.lookback_months),
        ));
    };

    let mechanism = request.mechanism;
    let mut bid_percent = None;
    let mut entry_month = None;

    if mechanism.is_bid_based() {
        let Some(bid) = request.bid_percent else {
            return Err(ForecastError::invalid(
                "bidPercent",
                format!("is required for {mechanism}"),
            ));
        };
        if !bid.is_finite() || !(0.0..=100.0).contains(&bid) {
            return Err(ForecastError::invalid(
                "bidPercent",
                "must be between 0 and 100",
            ));
        }
        bid_percent = Some(bid);
    }

    if mechanism.is_fixed_bid() {
        match request.entry_month {
            Some(month) if month >= 1 => entry_month = Some(month),
            Some(_) => return Err(ForecastError::invalid("entryMonth", "must be >= 1")),
            None => {
                return Err(ForecastError::invalid(
                    "entryMonth",
                    format!("is required for {mechanism}"),
                ));
            }
        }
    }

    Ok(SimulationParams {
        group_ref: request.group_ref.clone(),
        mechanism,
        credit_value: request.credit_value,
        bid_percent,
        entry_month,
        lookback,
        only_months_with_allocation: request.only_months_with_allocation,
    })
}

pub(crate) fn check_group(group: &Group, params: &SimulationParams) -> Result<(), ForecastError> {
    if params.group_ref != group.key() {
        return Err(ForecastError::invalid(
            "groupRef",
            format!("{} does not match group {}", params.group_ref, group.key()),
        ));
    }
    if group.term_months == 0 || group.term_months > MAX_TERM_MONTHS {
        return Err(ForecastError::invalid(
            "termMonths",
            format!("must be between 1 and {MAX_TERM_MONTHS}"),
        ));
    }
    if let Some(entry) = params.entry_month {
        if entry > group.term_months {
            return Err(ForecastError::invalid(
                "entryMonth",
                format!("must be <= group term of {} months", group.term_months),
            ));
        }
    }
    Ok(())
}

/// Fetch the window once, order it oldest to newest and run the forecast.
pub fn run_simulation(
    group: &Group,
    request: &SimulationRequest,
    source: &dyn RecordSource,
) -> Result<SimulationResult, ForecastError> {
    let params = validate_params(request)?;
    check_group(group, &params)?;

    let records = fetch_window(group, &params, source)?;
    forecast_from_records(group, params, &records)
}

pub(crate) fn fetch_window(
    group: &Group,
    params: &SimulationParams,
    source: &dyn RecordSource,
) -> Result<Vec<MonthlyRecord>, ForecastError> {
    let mut records = source.fetch_records(
        &group.key(),
        params.mechanism,
        params.lookback,
        params.only_months_with_allocation,
    )?;
    records.sort_by_key(|r| r.date);
    Ok(records)
}

/// Forecast over an already-fetched window, ordered oldest to newest.
pub fn forecast_from_records(
    group: &Group,
    params: SimulationParams,
    records: &[MonthlyRecord],
) -> Result<SimulationResult, ForecastError> {
    let (metrics, dynamics) = history_statistics(group, &params, records)?;

    let competitiveness = params
        .bid_percent
        .filter(|_| params.mechanism.is_bid_based())
        .map(|bid| score_competitiveness(bid, &metrics));

    let scenarios = project_scenarios(ProjectionInputs {
        mechanism: params.mechanism,
        term_months: group.term_months,
        metrics: &metrics,
        dynamics: &dynamics,
        competitiveness: competitiveness.as_ref(),
        entry_month: params.entry_month,
    });

    if metrics.confidence == Confidence::Low {
        warn!(
            group = %group.key(),
            mechanism = %params.mechanism,
            sample_size = metrics.sample_size,
            "forecast built from a small sample; confidence is low"
        );
    }
    info!(
        group = %group.key(),
        mechanism = %params.mechanism,
        optimistic = scenarios[0].estimated_month,
        median = scenarios[1].estimated_month,
        conservative = scenarios[2].estimated_month,
        "simulation complete"
    );

    Ok(assemble_result(
        group.clone(),
        params,
        metrics,
        competitiveness,
        dynamics,
        scenarios,
    ))
}

pub(crate) fn history_statistics(
    group: &Group,
    params: &SimulationParams,
    records: &[MonthlyRecord],
) -> Result<(BaseMetrics, Dynamics), ForecastError> {
    if records.len() < MIN_HISTORY_MONTHS {
        return Err(ForecastError::InsufficientHistory {
            found: records.len(),
            required: MIN_HISTORY_MONTHS,
        });
    }
    let metrics = compute_base_metrics(records, params.mechanism)?;
    let dynamics = estimate_dynamics(records, group.start_date)?;
    Ok((metrics, dynamics))
}

pub fn assemble_result(
    group: Group,
    params: SimulationParams,
    metrics: BaseMetrics,
    competitiveness: Option<CompetitivenessIndicator>,
    dynamics: Dynamics,
    scenarios: [Scenario; 3],
) -> SimulationResult {
    SimulationResult {
        group,
        params,
        metrics,
        competitiveness,
        dynamics,
        scenarios,
    }
}
