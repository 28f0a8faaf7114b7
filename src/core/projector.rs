//! Forward models that turn pool dynamics into Optimistic/Median/Conservative
//! contemplation months. Each model answers "in which month does the
//! cumulative chance reach 25%/50%/75%" under its own assumptions, so they
//! stay separate functions behind [`project_scenarios`].

use super::types::{
    BaseMetrics, CompetitivenessIndicator, Dynamics, Mechanism, ModelKind, Scenario, ScenarioLabel,
};

/// Position multipliers for the queue model, in scenario order.
const QUEUE_POSITION_FACTORS: [f64; 3] = [0.7, 1.0, 1.3];

/// Everything a forward model may consult.
#[derive(Debug, Clone, Copy)]
pub struct ProjectionInputs<'a> {
    pub mechanism: Mechanism,
    pub term_months: u32,
    pub metrics: &'a BaseMetrics,
    pub dynamics: &'a Dynamics,
    pub competitiveness: Option<&'a CompetitivenessIndicator>,
    pub entry_month: Option<u32>,
}

pub fn project_scenarios(inputs: ProjectionInputs<'_>) -> [Scenario; 3] {
    let months = match inputs.mechanism.model() {
        ModelKind::Lottery => project_lottery(
            inputs.dynamics.current_month,
            inputs.term_months,
            inputs.dynamics.current_participants as f64,
            inputs.dynamics.mean_allocated_per_month(),
        ),
        ModelKind::Queue => project_queue(
            inputs.dynamics.current_month,
            inputs.term_months,
            inputs.entry_month.unwrap_or(1),
            inputs.dynamics.current_participants as f64,
            inputs.dynamics.mean_allocated_per_month(),
        ),
        ModelKind::Auction => {
            let multiplier = inputs
                .competitiveness
                .map(|c| c.tier.rate_multiplier())
                .unwrap_or(1.0);
            project_auction(
                inputs.dynamics.current_month,
                inputs.term_months,
                inputs.metrics.mean_contemplation_rate * multiplier,
            )
        }
    };

    let model = inputs.mechanism.model();
    let [optimistic, median, conservative] = months;
    [
        Scenario::new(ScenarioLabel::Optimistic, optimistic, model),
        Scenario::new(ScenarioLabel::Median, median, model),
        Scenario::new(ScenarioLabel::Conservative, conservative, model),
    ]
}

/// Expected-value survival curve over a shrinking pool drawn uniformly at random.
///
/// Each month the user's chance is `allocated / remaining`; it is accumulated
/// before the pool shrinks, so the month's own draws count toward the user.
pub fn project_lottery(
    current_month: u32,
    term_months: u32,
    current_participants: f64,
    mean_allocated_per_month: f64,
) -> [u32; 3] {
    let targets = ScenarioLabel::ALL.map(|label| label.target_probability());
    let mut reached: [Option<u32>; 3] = [None; 3];

    let mut remaining = current_participants.max(1.0);
    let mut p_accumulated = 0.0_f64;
    let mut month = current_month + 1;
    while month <= term_months {
        let hazard = (mean_allocated_per_month / remaining).clamp(0.0, 1.0);
        p_accumulated += (1.0 - p_accumulated) * hazard;
        remaining = (remaining - mean_allocated_per_month).max(1.0);

        for (slot, &target) in reached.iter_mut().zip(&targets) {
            if slot.is_none() && p_accumulated >= target {
                *slot = Some(month);
            }
        }
        if reached.iter().all(Option::is_some) {
            break;
        }
        month += 1;
    }

    reached.map(|m| clamp_month(m.unwrap_or(term_months), current_month, term_months))
}

/// Deterministic FIFO countdown.
///
/// The starting position is a heuristic, not a reconstruction of the real
/// queue: the pool at entry is extrapolated backwards from today's pool using
/// the mean monthly allocations, then scaled by `entry_month / term_months`.
/// Scenarios rerun the same countdown with the position scaled by 0.7/1.0/1.3.
pub fn project_queue(
    current_month: u32,
    term_months: u32,
    entry_month: u32,
    current_participants: f64,
    mean_allocated_per_month: f64,
) -> [u32; 3] {
    let months_since_entry = current_month.saturating_sub(entry_month) as f64;
    let participants_at_entry =
        current_participants + mean_allocated_per_month * months_since_entry;
    let cohort_share = if term_months == 0 {
        1.0
    } else {
        entry_month as f64 / term_months as f64
    };
    let base_position = participants_at_entry * cohort_share;

    QUEUE_POSITION_FACTORS.map(|factor| {
        let month = queue_countdown(
            base_position * factor,
            current_month,
            term_months,
            mean_allocated_per_month,
        );
        clamp_month(month, current_month, term_months)
    })
}

fn queue_countdown(
    mut position: f64,
    current_month: u32,
    term_months: u32,
    mean_allocated_per_month: f64,
) -> u32 {
    if mean_allocated_per_month <= 0.0 {
        return term_months;
    }
    let mut month = current_month;
    while position > 0.0 && month < term_months {
        month += 1;
        position -= mean_allocated_per_month;
    }
    month
}

/// Memoryless model: a constant monthly rate `r` gives
/// `P(month m) = 1 - (1 - r)^(m - current_month)`; each scenario is the
/// smallest month reaching its target, within the term.
pub fn project_auction(current_month: u32, term_months: u32, adjusted_rate: f64) -> [u32; 3] {
    ScenarioLabel::ALL.map(|label| {
        auction_month(
            current_month,
            term_months,
            adjusted_rate,
            label.target_probability(),
        )
    })
}

fn auction_month(current_month: u32, term_months: u32, rate: f64, target: f64) -> u32 {
    if !rate.is_finite() || rate <= 0.0 || rate >= 1.0 {
        return term_months;
    }

    let reaches = |k: f64| 1.0 - (1.0 - rate).powf(k) >= target;
    let exact = (1.0 - target).ln() / (1.0 - rate).ln();
    let mut k = exact.ceil().max(1.0);
    // ln/ceil can land one step off at exact boundaries.
    if k > 1.0 && reaches(k - 1.0) {
        k -= 1.0;
    } else if !reaches(k) {
        k += 1.0;
    }

    let month = (current_month as f64 + k).min(term_months as f64).max(0.0) as u32;
    clamp_month(month, current_month, term_months)
}

/// Clamp into `[current_month + 1, term_months]`; when no month remains the
/// term end is the answer.
fn clamp_month(month: u32, current_month: u32, term_months: u32) -> u32 {
    let earliest = current_month.saturating_add(1);
    if earliest > term_months {
        return term_months;
    }
    month.clamp(earliest, term_months)
}
