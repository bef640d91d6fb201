use axum::{
    Router,
    extract::{Json, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::post,
};
use clap::{Args, Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

use crate::core::dates::parse_date;
use crate::core::{
    EnginePolicy, Expense, ExpenseRecord, LedgerEntry, Period, Projection, ProjectionEngine,
    ProjectionParameters, expenses_from_records, horizon_months,
};

const DEFAULT_CYCLE_YEARS: i32 = 5;
const MAX_CYCLE_YEARS: i32 = 100;

#[derive(Parser, Debug)]
#[command(
    name = "reserve-planner",
    about = "Monthly savings planner that keeps a reserve account above a target balance"
)]
pub struct Cli {
    #[arg(long, global = true, help = "Enable debug logging (RUST_LOG takes precedence)")]
    pub verbose: bool,
    #[arg(
        long,
        global = true,
        help = "JSON file overriding engine policy constants (camelCase keys)"
    )]
    pub policy: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve the JSON API.
    Serve {
        #[arg(long, default_value_t = 8080)]
        port: u16,
    },
    /// Print the monthly ledger for an expense file.
    Project(ProjectArgs),
    /// Print only the first period's monthly contribution.
    Rate(ProjectArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ProjectArgs {
    #[arg(long, help = "JSON file holding an array of expense records")]
    pub expenses: PathBuf,
    #[arg(long, allow_hyphen_values = true)]
    pub starting_balance: f64,
    #[arg(
        long,
        default_value_t = 0.0,
        allow_hyphen_values = true,
        help = "Balance to keep at every month end; <= 0 selects the default"
    )]
    pub target_balance: f64,
    #[arg(long, default_value_t = DEFAULT_CYCLE_YEARS)]
    pub cycle_years: i32,
    #[arg(long, help = "First projected month (any supported date format); defaults to today")]
    pub start_date: Option<String>,
    #[arg(long, help = "Emit JSON instead of a table")]
    pub json: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ProjectPayload {
    expenses: Vec<ExpenseRecord>,
    starting_balance: Option<f64>,
    target_balance: Option<f64>,
    adjustment_cycle_years: Option<i32>,
    start_date: Option<String>,
}

#[derive(Debug)]
struct ApiRequest {
    expenses: Vec<Expense>,
    parameters: ProjectionParameters,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ProjectResponse {
    horizon_months: u32,
    starting_balance: f64,
    target_balance: f64,
    first_period_rate: f64,
    lowest_balance: Option<f64>,
    terminal_balance: Option<f64>,
    months_below_target: usize,
    corrected: bool,
    periods: Vec<Period>,
    ledger: Vec<LedgerEntry>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RateResponse {
    first_period_rate: f64,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

fn today() -> chrono::NaiveDate {
    chrono::Local::now().date_naive()
}

fn build_parameters(
    policy: &EnginePolicy,
    starting_balance: f64,
    target_balance: f64,
    cycle_years: i32,
    start_date: Option<&str>,
) -> Result<ProjectionParameters, String> {
    if !starting_balance.is_finite() {
        return Err("startingBalance must be a finite number".to_string());
    }
    if !target_balance.is_finite() {
        return Err("targetBalance must be a finite number".to_string());
    }
    if !(0..=MAX_CYCLE_YEARS).contains(&cycle_years) {
        return Err(format!(
            "adjustmentCycleYears must be between 0 and {MAX_CYCLE_YEARS}"
        ));
    }
    let start_date = match start_date {
        Some(raw) => parse_date(raw).map_err(|e| format!("startDate: {e}"))?,
        None => today(),
    };

    Ok(ProjectionParameters {
        starting_balance,
        target_balance,
        horizon_months: horizon_months(cycle_years, policy),
        start_date,
    })
}

#[cfg(test)]
fn api_request_from_json(policy: &EnginePolicy, json: &str) -> Result<ApiRequest, String> {
    let payload = serde_json::from_str::<ProjectPayload>(json)
        .map_err(|e| format!("Invalid API JSON payload: {e}"))?;
    api_request_from_payload(policy, payload)
}

fn api_request_from_payload(policy: &EnginePolicy, payload: ProjectPayload) -> Result<ApiRequest, String> {
    let starting_balance = payload
        .starting_balance
        .ok_or_else(|| "startingBalance is required".to_string())?;
    let parameters = build_parameters(
        policy,
        starting_balance,
        payload.target_balance.unwrap_or(0.0),
        payload.adjustment_cycle_years.unwrap_or(DEFAULT_CYCLE_YEARS),
        payload.start_date.as_deref(),
    )?;
    Ok(ApiRequest {
        expenses: expenses_from_records(&payload.expenses),
        parameters,
    })
}

fn build_project_response(projection: &Projection) -> ProjectResponse {
    ProjectResponse {
        horizon_months: projection.parameters.horizon_months,
        starting_balance: projection.parameters.starting_balance,
        target_balance: projection.parameters.target_balance,
        first_period_rate: projection.first_period_rate(),
        lowest_balance: projection.lowest_balance(),
        terminal_balance: projection.terminal_balance(),
        months_below_target: projection.months_below_target(),
        corrected: projection.correction.is_some(),
        periods: projection.periods.clone(),
        ledger: projection.ledger.clone(),
    }
}

pub fn build_router(engine: Arc<ProjectionEngine>) -> Router {
    Router::new()
        .route("/api/project", post(project_handler))
        .route("/api/first-period-rate", post(rate_handler))
        .route("/api/cache/clear", post(clear_cache_handler))
        .fallback(not_found_handler)
        .with_state(engine)
}

pub async fn run_http_server(port: u16, policy: EnginePolicy) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let app = build_router(Arc::new(ProjectionEngine::new(policy)));

    let listener = TcpListener::bind(addr).await?;
    info!("reserve planner API listening on http://{addr}");

    axum::serve(listener, app).await
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

async fn project_handler(
    State(engine): State<Arc<ProjectionEngine>>,
    Json(payload): Json<ProjectPayload>,
) -> Response {
    let request = match api_request_from_payload(engine.policy(), payload) {
        Ok(request) => request,
        Err(msg) => return error_response(StatusCode::BAD_REQUEST, &msg),
    };
    let projection = engine.project_at(&request.expenses, &request.parameters);
    json_response(StatusCode::OK, build_project_response(&projection))
}

async fn rate_handler(
    State(engine): State<Arc<ProjectionEngine>>,
    Json(payload): Json<ProjectPayload>,
) -> Response {
    let request = match api_request_from_payload(engine.policy(), payload) {
        Ok(request) => request,
        Err(msg) => return error_response(StatusCode::BAD_REQUEST, &msg),
    };
    let first_period_rate = engine.first_period_rate_at(&request.expenses, &request.parameters);
    json_response(StatusCode::OK, RateResponse { first_period_rate })
}

async fn clear_cache_handler(State(engine): State<Arc<ProjectionEngine>>) -> Response {
    engine.clear_cache();
    with_cache_control(StatusCode::NO_CONTENT)
}

fn with_cache_control<R: IntoResponse>(response: R) -> Response {
    let mut response = response.into_response();
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        header::HeaderValue::from_static("no-store"),
    );
    response
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    with_cache_control((status, Json(body)))
}

fn error_response(status: StatusCode, msg: &str) -> Response {
    json_response(
        status,
        ErrorResponse {
            error: msg.to_string(),
        },
    )
}

pub fn load_policy(path: Option<&Path>) -> Result<EnginePolicy, String> {
    let Some(path) = path else {
        return Ok(EnginePolicy::default());
    };
    let raw = std::fs::read_to_string(path)
        .map_err(|e| format!("cannot read {}: {e}", path.display()))?;
    serde_json::from_str::<EnginePolicy>(&raw)
        .map_err(|e| format!("invalid policy file {}: {e}", path.display()))
}

fn read_expense_file(path: &Path) -> Result<Vec<Expense>, String> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| format!("cannot read {}: {e}", path.display()))?;
    let records = serde_json::from_str::<Vec<ExpenseRecord>>(&raw)
        .map_err(|e| format!("invalid expense file {}: {e}", path.display()))?;
    Ok(expenses_from_records(&records))
}

pub fn format_ledger_table(ledger: &[LedgerEntry]) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<9} {:>3} {:>12} {:>10} {:>12} {:>12}  expenses",
        "month", "per", "start", "saving", "expenses", "end"
    );
    for entry in ledger {
        let marker = if entry.below_target { " !" } else { "" };
        let _ = writeln!(
            out,
            "{:<9} {:>3} {:>12.2} {:>10.2} {:>12.2} {:>12.2}{marker}  {}",
            entry.label,
            entry.period_index,
            entry.start_balance,
            entry.monthly_saving,
            entry.total_expenses,
            entry.end_balance,
            entry.expense_descriptions.join(", ")
        );
    }
    out
}

pub async fn run_cli(cli: Cli) -> Result<(), String> {
    let policy = load_policy(cli.policy.as_deref())?;
    let args = match cli.command {
        Command::Serve { port } => {
            return run_http_server(port, policy)
                .await
                .map_err(|e| format!("server error: {e}"));
        }
        Command::Project(ref args) | Command::Rate(ref args) => args.clone(),
    };

    let engine = ProjectionEngine::new(policy);
    let expenses = read_expense_file(&args.expenses)?;
    let parameters = build_parameters(
        engine.policy(),
        args.starting_balance,
        args.target_balance,
        args.cycle_years,
        args.start_date.as_deref(),
    )?;
    let projection = engine.project_at(&expenses, &parameters);

    match (&cli.command, args.json) {
        (Command::Rate(_), true) => {
            let body = RateResponse {
                first_period_rate: projection.first_period_rate(),
            };
            println!("{}", serde_json::to_string_pretty(&body).map_err(|e| e.to_string())?);
        }
        (Command::Rate(_), false) => println!("{:.2}", projection.first_period_rate()),
        (_, true) => {
            let body = build_project_response(&projection);
            println!("{}", serde_json::to_string_pretty(&body).map_err(|e| e.to_string())?);
        }
        (_, false) => print!("{}", format_ledger_table(&projection.ledger)),
    }
    Ok(())
}
