use serde::Serialize;
use tracing::debug;

use super::engine::{check_group, fetch_window, history_statistics, validate_params};
use super::error::ForecastError;
use super::metrics::score_competitiveness;
use super::projector::{ProjectionInputs, project_scenarios};
use super::source::RecordSource;
use super::types::{
    BaseMetrics, CompetitivenessTier, Dynamics, Group, Mechanism, SimulationRequest,
};

#[derive(Debug, Clone, Copy)]
pub struct BidSolveConfig {
    pub target_month: u32,
    pub search_min: f64,
    pub search_max: f64,
    pub tolerance: f64,
    pub max_iterations: u32,
}

impl BidSolveConfig {
    pub fn for_target(target_month: u32) -> Self {
        Self {
            target_month,
            search_min: 0.0,
            search_max: 100.0,
            tolerance: 0.01,
            max_iterations: 40,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BidSolveIteration {
    pub iteration: u32,
    pub lower_bound: f64,
    pub upper_bound: f64,
    pub candidate_bid: f64,
    pub median_month: u32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BidSolveResult {
    pub target_month: u32,
    pub search_min: f64,
    pub search_max: f64,
    pub tolerance: f64,
    pub max_iterations: u32,
    pub solved_bid: Option<f64>,
    pub achieved_month: Option<u32>,
    pub achieved_tier: Option<CompetitivenessTier>,
    pub iterations: Vec<BidSolveIteration>,
    pub converged: bool,
    pub feasible: bool,
    pub message: String,
}

#[derive(Debug, Clone, Copy)]
struct CandidateEval {
    median_month: u32,
    tier: CompetitivenessTier,
}

/// Smallest bid percent whose Median scenario lands on or before
/// `config.target_month`. The median month never increases with the bid, so
/// a bisection over the search bounds finds it.
pub fn solve_bid_for_target_month(
    group: &Group,
    request: &SimulationRequest,
    source: &dyn RecordSource,
    config: BidSolveConfig,
) -> Result<BidSolveResult, ForecastError> {
    validate_config(config)?;
    if !request.mechanism.is_bid_based() {
        return Err(ForecastError::invalid(
            "mechanism",
            format!("{} has no bid to solve for", request.mechanism),
        ));
    }

    let mut ceiling_request = request.clone();
    ceiling_request.bid_percent = Some(config.search_max);
    let params = validate_params(&ceiling_request)?;
    check_group(group, &params)?;

    let records = fetch_window(group, &params, source)?;
    let (metrics, dynamics) = history_statistics(group, &params, &records)?;
    let evaluate = |bid: f64| evaluate_candidate(group, params.mechanism, &metrics, &dynamics, bid);

    let mut iterations = Vec::with_capacity(config.max_iterations as usize);
    let low_eval = evaluate(config.search_min);
    let high_eval = evaluate(config.search_max);

    let mut solved_bid = None;
    let mut converged = false;
    let feasible;
    let message;

    if low_eval.median_month <= config.target_month {
        solved_bid = Some(config.search_min);
        converged = true;
        feasible = true;
        message = "Target month already met at the lower bid bound.".to_string();
    } else if high_eval.median_month > config.target_month {
        feasible = false;
        message = "No bid within the search bounds reaches the target month.".to_string();
    } else {
        let mut lo = config.search_min;
        let mut hi = config.search_max;
        let mut it = 0;
        while it < config.max_iterations {
            it += 1;
            let mid = (lo + hi) * 0.5;
            let eval = evaluate(mid);
            iterations.push(BidSolveIteration {
                iteration: it,
                lower_bound: lo,
                upper_bound: hi,
                candidate_bid: mid,
                median_month: eval.median_month,
            });

            if eval.median_month <= config.target_month {
                hi = mid;
            } else {
                lo = mid;
            }

            if (hi - lo).abs() <= config.tolerance {
                converged = true;
                break;
            }
        }
        solved_bid = Some(hi);
        feasible = true;
        message = if converged {
            "Solved minimum bid for target month.".to_string()
        } else {
            "Reached max iterations before tolerance was met; returning best estimate.".to_string()
        };
    }

    let final_eval = solved_bid.map(evaluate);
    debug!(
        target_month = config.target_month,
        ?solved_bid,
        feasible,
        iterations = iterations.len(),
        "bid solve finished"
    );

    Ok(BidSolveResult {
        target_month: config.target_month,
        search_min: config.search_min,
        search_max: config.search_max,
        tolerance: config.tolerance,
        max_iterations: config.max_iterations,
        solved_bid,
        achieved_month: final_eval.map(|e| e.median_month),
        achieved_tier: final_eval.map(|e| e.tier),
        iterations,
        converged,
        feasible,
        message,
    })
}

fn evaluate_candidate(
    group: &Group,
    mechanism: Mechanism,
    metrics: &BaseMetrics,
    dynamics: &Dynamics,
    bid: f64,
) -> CandidateEval {
    let competitiveness = score_competitiveness(bid, metrics);
    let scenarios = project_scenarios(ProjectionInputs {
        mechanism,
        term_months: group.term_months,
        metrics,
        dynamics,
        competitiveness: Some(&competitiveness),
        entry_month: None,
    });
    CandidateEval {
        median_month: scenarios[1].estimated_month,
        tier: competitiveness.tier,
    }
}

fn validate_config(config: BidSolveConfig) -> Result<(), ForecastError> {
    if config.target_month == 0 {
        return Err(ForecastError::invalid("targetMonth", "must be >= 1"));
    }
    if !config.search_min.is_finite() || !config.search_max.is_finite() {
        return Err(ForecastError::invalid("searchBounds", "must be finite"));
    }
    if config.search_min < 0.0 || config.search_max > 100.0 {
        return Err(ForecastError::invalid(
            "searchBounds",
            "must lie between 0 and 100",
        ));
    }
    if config.search_max <= config.search_min {
        return Err(ForecastError::invalid(
            "searchBounds",
            "search_max must be greater than search_min",
        ));
    }
    if !config.tolerance.is_finite() || config.tolerance <= 0.0 {
        return Err(ForecastError::invalid("tolerance", "must be > 0"));
    }
    if config.max_iterations == 0 {
        return Err(ForecastError::invalid("maxIterations", "must be > 0"));
    }
    Ok(())
}
