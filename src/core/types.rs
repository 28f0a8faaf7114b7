use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Mechanism {
    Lottery,
    #[serde(alias = "fixedBidEarly", alias = "fixed_bid_early")]
    FixedBidEarly,
    #[serde(alias = "fixedBidLate", alias = "fixed_bid_late")]
    FixedBidLate,
    #[serde(alias = "freeBid", alias = "free_bid")]
    FreeBid,
    #[serde(alias = "cappedBid", alias = "capped_bid")]
    CappedBid,
}

impl Mechanism {
    pub const ALL: [Mechanism; 5] = [
        Mechanism::Lottery,
        Mechanism::FixedBidEarly,
        Mechanism::FixedBidLate,
        Mechanism::FreeBid,
        Mechanism::CappedBid,
    ];

    /// Forward model used to project this mechanism.
    pub fn model(self) -> ModelKind {
        match self {
            Mechanism::Lottery => ModelKind::Lottery,
            Mechanism::FixedBidEarly | Mechanism::FixedBidLate => ModelKind::Queue,
            Mechanism::FreeBid | Mechanism::CappedBid => ModelKind::Auction,
        }
    }

    pub fn is_bid_based(self) -> bool {
        self.model() == ModelKind::Auction
    }

    pub fn is_fixed_bid(self) -> bool {
        self.model() == ModelKind::Queue
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Mechanism::Lottery => "lottery",
            Mechanism::FixedBidEarly => "fixed-bid-early",
            Mechanism::FixedBidLate => "fixed-bid-late",
            Mechanism::FreeBid => "free-bid",
            Mechanism::CappedBid => "capped-bid",
        }
    }
}

impl std::fmt::Display for Mechanism {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
pub enum ModelKind {
    Queue,
    Lottery,
    Auction,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
pub enum LookbackWindow {
    Six,
    Twelve,
    TwentyFour,
}

impl LookbackWindow {
    pub fn months(self) -> u32 {
        match self {
            LookbackWindow::Six => 6,
            LookbackWindow::Twelve => 12,
            LookbackWindow::TwentyFour => 24,
        }
    }

    pub fn from_months(months: u32) -> Option<Self> {
        match months {
            6 => Some(LookbackWindow::Six),
            12 => Some(LookbackWindow::Twelve),
            24 => Some(LookbackWindow::TwentyFour),
            _ => None,
        }
    }
}

/// One group's observation for one mechanism in one calendar month.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthlyRecord {
    pub date: NaiveDate,
    pub offered: u32,
    pub allocated: u32,
    /// Only meaningful when `allocated > 0`.
    #[serde(default)]
    pub winning_bid_percent: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupKey {
    pub administrator: String,
    pub group_number: String,
}

impl std::fmt::Display for GroupKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.administrator, self.group_number)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub administrator: String,
    pub group_number: String,
    pub term_months: u32,
    pub total_capacity: u32,
    pub start_date: NaiveDate,
}

impl Group {
    pub fn key(&self) -> GroupKey {
        GroupKey {
            administrator: self.administrator.clone(),
            group_number: self.group_number.clone(),
        }
    }
}

/// Unvalidated simulation input as supplied by a caller.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationRequest {
    pub group_ref: GroupKey,
    pub mechanism: Mechanism,
    pub credit_value: f64,
    pub bid_percent: Option<f64>,
    pub entry_month: Option<u32>,
    pub lookback_months: u32,
    pub only_months_with_allocation: bool,
}

/// Validated simulation request. Only the field matching `mechanism`
/// (`bid_percent` or `entry_month`) is carried; the other is `None`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationParams {
    pub group_ref: GroupKey,
    pub mechanism: Mechanism,
    pub credit_value: f64,
    pub bid_percent: Option<f64>,
    pub entry_month: Option<u32>,
    pub lookback: LookbackWindow,
    pub only_months_with_allocation: bool,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl Confidence {
    pub fn from_sample_size(sample_size: usize) -> Self {
        if sample_size >= 10 {
            Confidence::High
        } else if sample_size >= 6 {
            Confidence::Medium
        } else {
            Confidence::Low
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BaseMetrics {
    pub p_min: f64,
    pub p_median: f64,
    pub p_max: f64,
    pub mean_contemplation_rate: f64,
    pub sample_size: usize,
    pub confidence: Confidence,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
pub enum CompetitivenessTier {
    Low,
    Medium,
    High,
}

impl CompetitivenessTier {
    pub fn from_score(score: f64) -> Self {
        if score >= 0.66 {
            CompetitivenessTier::High
        } else if score >= 0.33 {
            CompetitivenessTier::Medium
        } else {
            CompetitivenessTier::Low
        }
    }

    /// Multiplier applied to the base contemplation rate by the auction model.
    pub fn rate_multiplier(self) -> f64 {
        match self {
            CompetitivenessTier::Low => 0.6,
            CompetitivenessTier::Medium => 1.0,
            CompetitivenessTier::High => 1.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompetitivenessIndicator {
    /// Normalised to 0..=1, unlike every other percentage in the crate.
    pub score: f64,
    pub tier: CompetitivenessTier,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Dynamics {
    pub participant_history: Vec<u32>,
    pub allocation_history: Vec<u32>,
    pub monthly_exit_rate: f64,
    pub monthly_entry_rate: f64,
    pub volatility: f64,
    pub current_participants: u32,
    pub current_month: u32,
}

impl Dynamics {
    pub fn mean_allocated_per_month(&self) -> f64 {
        if self.allocation_history.is_empty() {
            return 0.0;
        }
        let total: f64 = self.allocation_history.iter().map(|&a| a as f64).sum();
        total / self.allocation_history.len() as f64
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
pub enum ScenarioLabel {
    Optimistic,
    Median,
    Conservative,
}

impl ScenarioLabel {
    pub const ALL: [ScenarioLabel; 3] = [
        ScenarioLabel::Optimistic,
        ScenarioLabel::Median,
        ScenarioLabel::Conservative,
    ];

    pub fn target_probability(self) -> f64 {
        match self {
            ScenarioLabel::Optimistic => 0.25,
            ScenarioLabel::Median => 0.50,
            ScenarioLabel::Conservative => 0.75,
        }
    }

    pub fn probability_label(self) -> &'static str {
        match self {
            ScenarioLabel::Optimistic => "25%",
            ScenarioLabel::Median => "50%",
            ScenarioLabel::Conservative => "75%",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Scenario {
    pub label: ScenarioLabel,
    pub estimated_month: u32,
    pub target_probability: f64,
    pub probability_label: &'static str,
    pub model_used: ModelKind,
}

impl Scenario {
    pub fn new(label: ScenarioLabel, estimated_month: u32, model_used: ModelKind) -> Self {
        Self {
            label,
            estimated_month,
            target_probability: label.target_probability(),
            probability_label: label.probability_label(),
            model_used,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationResult {
    pub group: Group,
    pub params: SimulationParams,
    pub metrics: BaseMetrics,
    pub competitiveness: Option<CompetitivenessIndicator>,
    pub dynamics: Dynamics,
    pub scenarios: [Scenario; 3],
}

impl SimulationResult {
    pub fn scenario(&self, label: ScenarioLabel) -> &Scenario {
        match label {
            ScenarioLabel::Optimistic => &self.scenarios[0],
            ScenarioLabel::Median => &self.scenarios[1],
            ScenarioLabel::Conservative => &self.scenarios[2],
        }
    }

    /// Bid expressed in credit units; `None` for mechanisms without a user bid.
    pub fn bid_amount(&self) -> Option<f64> {
        self.params
            .bid_percent
            .map(|pct| self.params.credit_value * pct / 100.0)
    }
}
