use axum::{
    Router,
    extract::Json,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::net::TcpListener;
use tracing::info;

use crate::core::{
    AdministratorReport, BidSolveConfig, BidSolveResult, ForecastError, Group, GroupRanking,
    GroupReport, HistoryFile, InMemoryRecordSource, LookbackWindow, Mechanism, MonthlyRecord,
    RecordSource, RecordSourceError, SimulationRequest, SimulationResult, TaggedRecord,
    rank_groups, run_simulation, solve_bid_for_target_month, summarize_administrator,
    summarize_group, validate_params,
};

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum CliMechanism {
    Lottery,
    FixedBidEarly,
    FixedBidLate,
    FreeBid,
    CappedBid,
}

impl From<CliMechanism> for Mechanism {
    fn from(value: CliMechanism) -> Self {
        match value {
            CliMechanism::Lottery => Mechanism::Lottery,
            CliMechanism::FixedBidEarly => Mechanism::FixedBidEarly,
            CliMechanism::FixedBidLate => Mechanism::FixedBidLate,
            CliMechanism::FreeBid => Mechanism::FreeBid,
            CliMechanism::CappedBid => Mechanism::CappedBid,
        }
    }
}

impl From<Mechanism> for CliMechanism {
    fn from(value: Mechanism) -> Self {
        match value {
            Mechanism::Lottery => CliMechanism::Lottery,
            Mechanism::FixedBidEarly => CliMechanism::FixedBidEarly,
            Mechanism::FixedBidLate => CliMechanism::FixedBidLate,
            Mechanism::FreeBid => CliMechanism::FreeBid,
            Mechanism::CappedBid => CliMechanism::CappedBid,
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "contemplation",
    about = "Forecast consortium contemplation months from allocation history"
)]
pub struct Cli {
    #[arg(long, global = true, help = "Emit logs as JSON lines on stderr")]
    pub log_json: bool,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the HTTP API.
    Serve {
        #[arg(long, default_value_t = 8080)]
        port: u16,
    },
    #[command(flatten)]
    Task(Task),
}

/// Subcommands that run once and print JSON to stdout.
#[derive(Subcommand, Debug)]
pub enum Task {
    /// Forecast the contemplation month for one group history file.
    Simulate {
        #[arg(long, help = "Group history JSON file")]
        history: PathBuf,
        #[command(flatten)]
        args: SimulateArgs,
    },
    /// Find the smallest bid whose median scenario meets a target month.
    SolveBid {
        #[arg(long, help = "Group history JSON file")]
        history: PathBuf,
        #[arg(long)]
        target_month: u32,
        #[command(flatten)]
        args: SimulateArgs,
    },
    /// Summarise every mechanism of one group history file.
    Report {
        #[arg(long, help = "Group history JSON file")]
        history: PathBuf,
        #[arg(long, default_value_t = 12, help = "Lookback window in months: 6, 12 or 24")]
        lookback_months: u32,
    },
}

#[derive(Args, Debug, Clone)]
pub struct SimulateArgs {
    #[arg(long, value_enum)]
    pub mechanism: CliMechanism,
    #[arg(
        long,
        help = "Proposed bid in percent of the credit (free-bid and capped-bid only)"
    )]
    pub bid_percent: Option<f64>,
    #[arg(
        long,
        help = "Month the participant joined the group (fixed-bid mechanisms only)"
    )]
    pub entry_month: Option<u32>,
    #[arg(long, default_value_t = 100_000.0, help = "Credit value of the quota")]
    pub credit_value: f64,
    #[arg(long, default_value_t = 12, help = "Lookback window in months: 6, 12 or 24")]
    pub lookback_months: u32,
    #[arg(long, help = "Only consider months in which someone was contemplated")]
    pub only_months_with_allocation: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error(transparent)]
    Forecast(#[from] ForecastError),
    #[error(transparent)]
    Source(#[from] RecordSourceError),
    #[error("failed to encode output: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct SimulatePayload {
    group: Option<Group>,
    records: Vec<TaggedRecord>,
    mechanism: Option<Mechanism>,
    bid_percent: Option<f64>,
    entry_month: Option<u32>,
    credit_value: Option<f64>,
    lookback_months: Option<u32>,
    only_months_with_allocation: Option<bool>,
    target_month: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ReportPayload {
    histories: Vec<HistoryFile>,
    administrator: Option<String>,
    mechanism: Option<Mechanism>,
    lookback_months: Option<u32>,
    reported_total_allocated: Option<u64>,
}

#[derive(Debug)]
struct ApiRequest {
    history: HistoryFile,
    request: SimulationRequest,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ReportResponse {
    report: AdministratorReport,
    ranking: Vec<GroupRanking>,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl From<ForecastError> for ApiError {
    fn from(err: ForecastError) -> Self {
        let status = match &err {
            ForecastError::InvalidParameter { .. } | ForecastError::InvalidRecord { .. } => {
                StatusCode::BAD_REQUEST
            }
            ForecastError::InsufficientHistory { .. }
            | ForecastError::InsufficientSample { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            ForecastError::Source(RecordSourceError::UnknownGroup(_)) => StatusCode::NOT_FOUND,
            ForecastError::Source(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        error_response(self.status, &self.message)
    }
}

pub fn default_args_for_api() -> SimulateArgs {
    SimulateArgs {
        mechanism: CliMechanism::Lottery,
        bid_percent: None,
        entry_month: None,
        credit_value: 100_000.0,
        lookback_months: 12,
        only_months_with_allocation: false,
    }
}

/// Turn CLI/API arguments into a request for `group`, rejecting invalid
/// combinations before any history is touched.
pub fn build_request(
    group: &Group,
    args: &SimulateArgs,
) -> Result<SimulationRequest, ForecastError> {
    let request = SimulationRequest {
        group_ref: group.key(),
        mechanism: args.mechanism.into(),
        credit_value: args.credit_value,
        bid_percent: args.bid_percent,
        entry_month: args.entry_month,
        lookback_months: args.lookback_months,
        only_months_with_allocation: args.only_months_with_allocation,
    };
    validate_params(&request)?;
    Ok(request)
}

/// Run a one-shot subcommand and return its JSON output.
pub fn execute(task: Task) -> Result<String, CliError> {
    match task {
        Task::Simulate { history, args } => {
            let history = HistoryFile::load(&history)?;
            let request = build_request(&history.group, &args)?;
            let source = InMemoryRecordSource::from_history(&history);
            let result = run_simulation(&history.group, &request, &source)?;
            Ok(serde_json::to_string_pretty(&result)?)
        }
        Task::SolveBid {
            history,
            target_month,
            mut args,
        } => {
            let history = HistoryFile::load(&history)?;
            args.bid_percent.get_or_insert(100.0);
            let request = build_request(&history.group, &args)?;
            let source = InMemoryRecordSource::from_history(&history);
            let result = solve_bid_for_target_month(
                &history.group,
                &request,
                &source,
                BidSolveConfig::for_target(target_month),
            )?;
            Ok(serde_json::to_string_pretty(&result)?)
        }
        Task::Report {
            history,
            lookback_months,
        } => {
            let history = HistoryFile::load(&history)?;
            let reports = group_reports(&history, lookback_months)?;
            Ok(serde_json::to_string_pretty(&reports)?)
        }
    }
}

fn lookback(months: u32) -> Result<LookbackWindow, ForecastError> {
    LookbackWindow::from_months(months).ok_or_else(|| ForecastError::InvalidParameter {
        field: "lookbackMonths",
        reason: format!("must be 6, 12 or 24 (got {months})"),
    })
}

fn windowed_records(
    history: &HistoryFile,
    mechanism: Mechanism,
    window: LookbackWindow,
) -> Result<Vec<MonthlyRecord>, ForecastError> {
    let source = InMemoryRecordSource::from_history(history);
    let mut records = source.fetch_records(&history.group.key(), mechanism, window, false)?;
    records.sort_by_key(|r| r.date);
    Ok(records)
}

fn group_reports(
    history: &HistoryFile,
    lookback_months: u32,
) -> Result<Vec<GroupReport>, ForecastError> {
    let window = lookback(lookback_months)?;
    let mut reports = Vec::new();
    for mechanism in Mechanism::ALL {
        let records = windowed_records(history, mechanism, window)?;
        if records.is_empty() {
            continue;
        }
        match summarize_group(&history.group, mechanism, &records) {
            Ok(report) => reports.push(report),
            Err(ForecastError::InsufficientSample { .. }) => continue,
            Err(err) => return Err(err),
        }
    }
    Ok(reports)
}

pub async fn run_http_server(port: u16) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let app = Router::new()
        .route("/healthz", get(health_handler))
        .route("/api/simulate", post(simulate_handler))
        .route("/api/solve-bid", post(solve_bid_handler))
        .route("/api/report", post(report_handler))
        .fallback(not_found_handler);

    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "contemplation HTTP API listening");

    axum::serve(listener, app).await
}

async fn health_handler() -> Response {
    json_response(StatusCode::OK, serde_json::json!({ "status": "ok" }))
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

async fn simulate_handler(Json(payload): Json<SimulatePayload>) -> Response {
    match simulate_from_payload(payload) {
        Ok(result) => json_response(StatusCode::OK, result),
        Err(err) => err.into_response(),
    }
}

async fn solve_bid_handler(Json(payload): Json<SimulatePayload>) -> Response {
    match solve_bid_from_payload(payload) {
        Ok(result) => json_response(StatusCode::OK, result),
        Err(err) => err.into_response(),
    }
}

async fn report_handler(Json(payload): Json<ReportPayload>) -> Response {
    match report_from_payload(payload) {
        Ok(result) => json_response(StatusCode::OK, result),
        Err(err) => err.into_response(),
    }
}

fn simulate_from_payload(payload: SimulatePayload) -> Result<SimulationResult, ApiError> {
    let api = api_request_from_payload(payload)?;
    let source = InMemoryRecordSource::from_history(&api.history);
    Ok(run_simulation(&api.history.group, &api.request, &source)?)
}

fn solve_bid_from_payload(mut payload: SimulatePayload) -> Result<BidSolveResult, ApiError> {
    let Some(target_month) = payload.target_month else {
        return Err(ApiError::bad_request("targetMonth is required"));
    };
    payload.bid_percent.get_or_insert(100.0);
    let api = api_request_from_payload(payload)?;
    let source = InMemoryRecordSource::from_history(&api.history);
    Ok(solve_bid_for_target_month(
        &api.history.group,
        &api.request,
        &source,
        BidSolveConfig::for_target(target_month),
    )?)
}

fn report_from_payload(payload: ReportPayload) -> Result<ReportResponse, ApiError> {
    let Some(first) = payload.histories.first() else {
        return Err(ApiError::bad_request("histories must not be empty"));
    };
    let administrator = payload
        .administrator
        .clone()
        .unwrap_or_else(|| first.group.administrator.clone());
    let mechanism = payload.mechanism.unwrap_or(Mechanism::FreeBid);
    let window = lookback(payload.lookback_months.unwrap_or(12))?;

    let windows = payload
        .histories
        .iter()
        .map(|h| windowed_records(h, mechanism, window))
        .collect::<Result<Vec<_>, _>>()?;
    let histories: Vec<(&Group, &[MonthlyRecord])> = payload
        .histories
        .iter()
        .zip(&windows)
        .map(|(h, records)| (&h.group, records.as_slice()))
        .collect();

    let report = summarize_administrator(
        &administrator,
        mechanism,
        &histories,
        payload.reported_total_allocated,
    )?;
    let ranking = rank_groups(&report.groups);
    Ok(ReportResponse { report, ranking })
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    let mut response = (status, Json(body)).into_response();
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        header::HeaderValue::from_static("no-store"),
    );
    response
}

fn error_response(status: StatusCode, msg: &str) -> Response {
    json_response(
        status,
        ErrorResponse {
            error: msg.to_string(),
        },
    )
}

#[cfg(test)]
fn payload_from_json(json: &str) -> Result<SimulatePayload, String> {
    serde_json::from_str::<SimulatePayload>(json)
        .map_err(|e| format!("Invalid API JSON payload: {e}"))
}

fn api_request_from_payload(payload: SimulatePayload) -> Result<ApiRequest, ApiError> {
    let Some(group) = payload.group else {
        return Err(ApiError::bad_request("group is required"));
    };
    let mut args = default_args_for_api();

    if let Some(v) = payload.mechanism {
        args.mechanism = v.into();
    }
    if let Some(v) = payload.bid_percent {
        args.bid_percent = Some(v);
    }
    if let Some(v) = payload.entry_month {
        args.entry_month = Some(v);
    }
    if let Some(v) = payload.credit_value {
        args.credit_value = v;
    }
    if let Some(v) = payload.lookback_months {
        args.lookback_months = v;
    }
    if let Some(v) = payload.only_months_with_allocation {
        args.only_months_with_allocation = v;
    }

    let request = build_request(&group, &args)?;
    Ok(ApiRequest {
        history: HistoryFile {
            group,
            records: payload.records,
        },
        request,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{CompetitivenessTier, ModelKind, ScenarioLabel};

    const EPS: f64 = 1e-6;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= EPS,
            "expected {expected}, got {actual}"
        );
    }

    fn history_json(mechanism: &str, extra: &str) -> String {
        let bids = [40.0, 45.0, 50.0, 55.0, 60.0, 65.0];
        let records: Vec<String> = bids
            .iter()
            .enumerate()
            .map(|(i, bid)| {
                format!(
                    r#"{{ "mechanism": "{mechanism}", "date": "2024-{:02}-01",
                         "offered": 40, "allocated": 2, "winningBidPercent": {bid} }}"#,
                    i + 1
                )
            })
            .collect();
        format!(
            r#"{{
              "group": {{
                "administrator": "Acme",
                "groupNumber": "1042",
                "termMonths": 120,
                "totalCapacity": 3000,
                "startDate": "2020-01-01"
              }},
              "records": [{}],
              "mechanism": "{mechanism}"{extra}
            }}"#,
            records.join(",")
        )
    }

    #[test]
    fn payload_from_json_parses_web_keys() {
        let payload = payload_from_json(&history_json(
            "freeBid",
            r#", "bidPercent": 65, "creditValue": 250000, "lookbackMonths": 6,
               "onlyMonthsWithAllocation": true"#,
        ))
        .expect("json should parse");
        let api = api_request_from_payload(payload).expect("valid request");

        assert_eq!(api.request.mechanism, Mechanism::FreeBid);
        assert_eq!(api.request.bid_percent, Some(65.0));
        assert_approx(api.request.credit_value, 250_000.0);
        assert_eq!(api.request.lookback_months, 6);
        assert!(api.request.only_months_with_allocation);
        assert_eq!(api.history.records.len(), 6);
        assert_eq!(api.history.group.term_months, 120);
    }

    #[test]
    fn simulate_payload_runs_auction_model() {
        let payload =
            payload_from_json(&history_json("free-bid", r#", "bidPercent": 65"#)).expect("json");
        let result = simulate_from_payload(payload).expect("simulation should succeed");

        let competitiveness = result.competitiveness.as_ref().expect("bid-based");
        assert_eq!(competitiveness.tier, CompetitivenessTier::High);
        assert_eq!(result.scenario(ScenarioLabel::Median).estimated_month, 63);
        assert!(result.scenarios.iter().all(|s| s.model_used == ModelKind::Auction));
    }

    #[test]
    fn missing_bid_is_bad_request() {
        let payload = payload_from_json(&history_json("capped-bid", "")).expect("json");
        let err = simulate_from_payload(payload).expect_err("must reject");
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert!(err.message.contains("bidPercent"));
    }

    #[test]
    fn short_history_is_unprocessable() {
        let payload = payload_from_json(
            r#"{
              "group": { "administrator": "Acme", "groupNumber": "1", "termMonths": 60,
                         "totalCapacity": 500, "startDate": "2023-01-01" },
              "records": [
                { "mechanism": "lottery", "date": "2024-01-01", "offered": 90, "allocated": 1 },
                { "mechanism": "lottery", "date": "2024-02-01", "offered": 89, "allocated": 1 }
              ],
              "mechanism": "lottery"
            }"#,
        )
        .expect("json");
        let err = simulate_from_payload(payload).expect_err("must reject");
        assert_eq!(err.status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn missing_group_is_bad_request() {
        let payload = payload_from_json(r#"{ "mechanism": "lottery" }"#).expect("json");
        let err = simulate_from_payload(payload).expect_err("must reject");
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn solve_bid_payload_requires_target_month() {
        let payload = payload_from_json(&history_json("free-bid", "")).expect("json");
        let err = solve_bid_from_payload(payload).expect_err("must reject");
        assert_eq!(err.status, StatusCode::BAD_REQUEST);

        let payload = payload_from_json(&history_json("free-bid", r#", "targetMonth": 65"#))
            .expect("json");
        let result = solve_bid_from_payload(payload).expect("must solve");
        assert!(result.feasible);
        assert_eq!(result.achieved_month, Some(63));
    }

    #[test]
    fn report_payload_ranks_groups() {
        let first: HistoryFile =
            serde_json::from_str(&history_json("free-bid", "")).expect("history");
        let mut second = first.clone();
        second.group.group_number = "2000".to_string();
        for tagged in &mut second.records {
            tagged.record.winning_bid_percent -= 20.0;
        }
        let payload = ReportPayload {
            histories: vec![first, second],
            administrator: None,
            mechanism: Some(Mechanism::FreeBid),
            lookback_months: Some(12),
            reported_total_allocated: Some(24),
        };

        let response = report_from_payload(payload).expect("report");
        assert_eq!(response.report.groups.len(), 2);
        assert_eq!(response.report.total_allocated, 24);
        assert!(response.report.warnings.is_empty());
        assert_eq!(response.ranking[0].group.group_number, "2000");
    }

    #[test]
    fn build_request_rejects_bad_lookback() {
        let history: HistoryFile =
            serde_json::from_str(&history_json("lottery", "")).expect("history");
        let mut args = default_args_for_api();
        args.lookback_months = 18;
        let err = build_request(&history.group, &args).expect_err("must reject");
        assert!(err.to_string().contains("lookbackMonths"));
    }

    #[test]
    fn cli_parses_simulate_subcommand() {
        let cli = Cli::try_parse_from([
            "contemplation",
            "simulate",
            "--history",
            "group.json",
            "--mechanism",
            "fixed-bid-late",
            "--entry-month",
            "7",
        ])
        .expect("cli should parse");
        match cli.command {
            Command::Task(Task::Simulate { history, args }) => {
                assert_eq!(history, PathBuf::from("group.json"));
                assert_eq!(Mechanism::from(args.mechanism), Mechanism::FixedBidLate);
                assert_eq!(args.entry_month, Some(7));
                assert_eq!(args.lookback_months, 12);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn cli_parses_serve_apart_from_one_shot_tasks() {
        let cli = Cli::try_parse_from(["contemplation", "serve", "--port", "9090"])
            .expect("cli should parse");
        assert!(matches!(cli.command, Command::Serve { port: 9090 }));

        let cli = Cli::try_parse_from(["contemplation", "report", "--history", "group.json"])
            .expect("cli should parse");
        let Command::Task(task) = cli.command else {
            panic!("report must parse as a one-shot task");
        };
        assert!(matches!(task, Task::Report { lookback_months: 12, .. }));
    }

    #[test]
    fn error_response_serialization_contains_error_field() {
        let json = serde_json::to_string(&ErrorResponse {
            error: "boom".to_string(),
        })
        .expect("serialize");
        assert_eq!(json, r#"{"error":"boom"}"#);
    }
}
