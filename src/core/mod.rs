mod dynamics;
mod engine;
mod error;
mod metrics;
mod projector;
mod reports;
mod solver;
mod source;
mod types;

pub use dynamics::{elapsed_months, estimate_dynamics};
pub use engine::{assemble_result, forecast_from_records, run_simulation, validate_params};
pub use error::{ForecastError, MIN_HISTORY_MONTHS, RecordSourceError};
pub use metrics::{compute_base_metrics, contemplation_rate, quantile, score_competitiveness};
pub use projector::{
    ProjectionInputs, project_auction, project_lottery, project_queue, project_scenarios,
};
pub use reports::{
    AdministratorReport, ConsistencyWarning, DEFAULT_CONSISTENCY_TOLERANCE, GroupRanking,
    GroupReport, check_consistency, rank_groups, summarize_administrator, summarize_group,
};
pub use solver::{BidSolveConfig, BidSolveIteration, BidSolveResult, solve_bid_for_target_month};
pub use source::{HistoryFile, InMemoryRecordSource, RecordSource, TaggedRecord};
pub use types::{
    BaseMetrics, CompetitivenessIndicator, CompetitivenessTier, Confidence, Dynamics, Group,
    GroupKey, LookbackWindow, Mechanism, ModelKind, MonthlyRecord, Scenario, ScenarioLabel,
    SimulationParams, SimulationRequest, SimulationResult,
};
