use std::fs::File;
use std::io::{self, BufWriter};
use std::net::SocketAddr;
use std::path::PathBuf;

use axum::{
    Router,
    extract::{Json, Query},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use clap::{ArgAction, Parser, ValueEnum};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;

use crate::core::{
    DrawPolicy, Goal, GoalEntry, ProjectionConstants, ProjectionError, ProjectionRow,
    RetirementAccountModel, ScenarioComparison, ScenarioParameters, compare_scenarios,
    expand_goals, project, validate_goals,
};
use crate::export::{
    ExportError, comparison_csv_string, goals_csv_string, projection_csv_string,
    scenarios_csv_string, write_projection_csv,
};

const INFLATION_ADJUSTMENT_RATE: f64 = 0.02;

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum CliRetirementAccount {
    Amortized,
    Flat,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum CliDrawPolicy {
    UntilWithdrawalAge,
    Always,
}

impl From<CliDrawPolicy> for DrawPolicy {
    fn from(value: CliDrawPolicy) -> Self {
        match value {
            CliDrawPolicy::UntilWithdrawalAge => DrawPolicy::UntilWithdrawalAge,
            CliDrawPolicy::Always => DrawPolicy::Always,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
enum ApiScenario {
    #[default]
    #[serde(alias = "A", alias = "scenarioA", alias = "scenario-a")]
    A,
    #[serde(alias = "B", alias = "scenarioB", alias = "scenario-b")]
    B,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
enum ApiRetirementAccount {
    #[serde(alias = "annuity")]
    Amortized,
    Flat,
}

impl From<ApiRetirementAccount> for CliRetirementAccount {
    fn from(value: ApiRetirementAccount) -> Self {
        match value {
            ApiRetirementAccount::Amortized => CliRetirementAccount::Amortized,
            ApiRetirementAccount::Flat => CliRetirementAccount::Flat,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
enum ApiDrawPolicy {
    #[serde(alias = "untilWithdrawalAge", alias = "until_withdrawal_age")]
    UntilWithdrawalAge,
    Always,
}

impl From<ApiDrawPolicy> for CliDrawPolicy {
    fn from(value: ApiDrawPolicy) -> Self {
        match value {
            ApiDrawPolicy::UntilWithdrawalAge => CliDrawPolicy::UntilWithdrawalAge,
            ApiDrawPolicy::Always => CliDrawPolicy::Always,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ForecastPayload {
    scenario: Option<ApiScenario>,

    retirement_age: Option<u32>,
    withdraw_401k_age: Option<u32>,
    social_security_age: Option<u32>,
    end_age: Option<u32>,

    annual_need: Option<f64>,
    after_tax_start: Option<f64>,
    dividend_start: Option<f64>,
    after_tax_return: Option<f64>,
    dividend_yield: Option<f64>,
    capital_growth: Option<f64>,

    contrib_start_age: Option<u32>,
    contrib_end_age: Option<u32>,
    annual_contribution: Option<f64>,
    return_401k: Option<f64>,
    roth_pct: Option<f64>,
    tax_401k: Option<f64>,

    adjust_for_inflation: Option<bool>,
    retirement_account: Option<ApiRetirementAccount>,
    flat_withdrawal: Option<f64>,
    draw_policy: Option<ApiDrawPolicy>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ComparePayload {
    scenario_a: Option<ForecastPayload>,
    scenario_b: Option<ForecastPayload>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct GoalsPayload {
    goals: Vec<Goal>,
}

#[derive(Parser, Debug, Clone, PartialEq)]
#[command(
    name = "retirement-forecast",
    about = "Year-by-year retirement income forecast (after-tax, dividend and 401(k) portfolios)"
)]
struct Cli {
    #[arg(long, default_value_t = 53)]
    retirement_age: u32,
    #[arg(long, default_value_t = 63, help = "Age when 401(k) withdrawals start")]
    withdraw_401k_age: u32,
    #[arg(long, default_value_t = 67)]
    social_security_age: u32,
    #[arg(long, default_value_t = 95, help = "Age to plan through")]
    end_age: u32,
    #[arg(long, default_value_t = 100000.0, help = "Annual spending need")]
    annual_need: f64,
    #[arg(long, default_value_t = 1300000.0)]
    after_tax_start: f64,
    #[arg(long, default_value_t = 1000000.0)]
    dividend_start: f64,
    #[arg(
        long,
        default_value_t = 6.0,
        help = "Expected annual after-tax portfolio return in percent"
    )]
    after_tax_return: f64,
    #[arg(long, default_value_t = 4.0, help = "Dividend yield in percent")]
    dividend_yield: f64,
    #[arg(
        long,
        default_value_t = 3.0,
        help = "Dividend portfolio capital growth in percent"
    )]
    capital_growth: f64,
    #[arg(long, default_value_t = 50)]
    contrib_start_age: u32,
    #[arg(long, default_value_t = 53)]
    contrib_end_age: u32,
    #[arg(long, default_value_t = 90000.0, help = "Annual 401(k) contribution")]
    annual_contribution: f64,
    #[arg(long, default_value_t = 7.0, help = "401(k) annual return in percent")]
    return_401k: f64,
    #[arg(
        long,
        default_value_t = 30.0,
        help = "Share of 401(k) withdrawals that are Roth (untaxed) in percent"
    )]
    roth_pct: f64,
    #[arg(
        long,
        default_value_t = 22.0,
        help = "Tax rate on taxable 401(k) withdrawals in percent"
    )]
    tax_401k: f64,
    #[arg(
        long,
        default_value_t = true,
        action = ArgAction::Set,
        help = "Subtract 2% inflation from every growth rate"
    )]
    adjust_for_inflation: bool,
    #[arg(
        long,
        value_enum,
        default_value_t = CliRetirementAccount::Amortized,
        help = "401(k) drawdown: annuity over the remaining plan or a flat yearly amount"
    )]
    retirement_account: CliRetirementAccount,
    #[arg(
        long,
        help = "Gross yearly 401(k) withdrawal; required when --retirement-account=flat"
    )]
    flat_withdrawal: Option<f64>,
    #[arg(
        long,
        value_enum,
        default_value_t = CliDrawPolicy::UntilWithdrawalAge,
        help = "Whether the after-tax draw continues once 401(k) withdrawals start"
    )]
    draw_policy: CliDrawPolicy,
    #[arg(long, help = "Write the CSV projection here instead of stdout")]
    output: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ForecastResponse {
    scenario: ApiScenario,
    rows: Vec<ProjectionRow>,
}

#[derive(Debug, Serialize)]
struct GoalsResponse {
    goals: Vec<GoalEntry>,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

fn build_params(cli: &Cli) -> Result<ScenarioParameters, String> {
    if !(50..=70).contains(&cli.retirement_age) {
        return Err("--retirement-age must be between 50 and 70".to_string());
    }

    if !(59..=75).contains(&cli.withdraw_401k_age) {
        return Err("--withdraw-401k-age must be between 59 and 75".to_string());
    }

    if !(62..=70).contains(&cli.social_security_age) {
        return Err("--social-security-age must be between 62 and 70".to_string());
    }

    if cli.end_age > 120 {
        return Err("--end-age must be <= 120".to_string());
    }

    for (name, age) in [
        ("--retirement-age", cli.retirement_age),
        ("--withdraw-401k-age", cli.withdraw_401k_age),
        ("--social-security-age", cli.social_security_age),
        ("--contrib-end-age", cli.contrib_end_age),
    ] {
        if cli.end_age < age {
            return Err(format!("--end-age must be >= {name}"));
        }
    }

    for (name, age) in [
        ("--contrib-start-age", cli.contrib_start_age),
        ("--contrib-end-age", cli.contrib_end_age),
    ] {
        if !(40..=70).contains(&age) {
            return Err(format!("{name} must be between 40 and 70"));
        }
    }

    if cli.contrib_start_age > cli.contrib_end_age {
        return Err("--contrib-start-age must be <= --contrib-end-age".to_string());
    }

    for (name, balance) in [
        ("--after-tax-start", cli.after_tax_start),
        ("--dividend-start", cli.dividend_start),
    ] {
        if !(0.0..=10_000_000.0).contains(&balance) {
            return Err(format!("{name} must be between 0 and 10000000"));
        }
    }

    if !(0.0..=300_000.0).contains(&cli.annual_need) {
        return Err("--annual-need must be between 0 and 300000".to_string());
    }

    if !(0.0..=200_000.0).contains(&cli.annual_contribution) {
        return Err("--annual-contribution must be between 0 and 200000".to_string());
    }

    for (name, rate) in [
        ("--after-tax-return", cli.after_tax_return),
        ("--dividend-yield", cli.dividend_yield),
        ("--capital-growth", cli.capital_growth),
        ("--return-401k", cli.return_401k),
    ] {
        if !(0.0..=10.0).contains(&rate) {
            return Err(format!("{name} must be between 0 and 10"));
        }
    }

    if !(0.0..=100.0).contains(&cli.roth_pct) {
        return Err("--roth-pct must be between 0 and 100".to_string());
    }

    if !(0.0..=50.0).contains(&cli.tax_401k) {
        return Err("--tax-401k must be between 0 and 50".to_string());
    }

    let retirement_account = match cli.retirement_account {
        CliRetirementAccount::Amortized => RetirementAccountModel::Amortized,
        CliRetirementAccount::Flat => {
            let Some(annual_withdrawal) = cli.flat_withdrawal else {
                return Err(
                    "--flat-withdrawal is required when --retirement-account=flat".to_string(),
                );
            };
            if !annual_withdrawal.is_finite() || annual_withdrawal < 0.0 {
                return Err("--flat-withdrawal must be >= 0".to_string());
            }
            RetirementAccountModel::Flat { annual_withdrawal }
        }
    };

    Ok(ScenarioParameters {
        retirement_age: cli.retirement_age,
        withdraw_401k_age: cli.withdraw_401k_age,
        social_security_age: cli.social_security_age,
        end_age: cli.end_age,
        annual_need: cli.annual_need,
        after_tax_start: cli.after_tax_start,
        dividend_start: cli.dividend_start,
        after_tax_return: cli.after_tax_return / 100.0,
        dividend_yield: cli.dividend_yield / 100.0,
        capital_appreciation: cli.capital_growth / 100.0,
        contrib_start_age: cli.contrib_start_age,
        contrib_end_age: cli.contrib_end_age,
        annual_contribution: cli.annual_contribution,
        return_401k: cli.return_401k / 100.0,
        roth_fraction: cli.roth_pct / 100.0,
        withdraw_tax_rate: cli.tax_401k / 100.0,
        inflation_rate: if cli.adjust_for_inflation {
            INFLATION_ADJUSTMENT_RATE
        } else {
            0.0
        },
        retirement_account,
        draw_policy: cli.draw_policy.into(),
    })
}

/// Parses process arguments, projects one scenario and writes it as CSV.
pub fn run_cli() -> Result<(), String> {
    let cli = Cli::parse();
    let params = build_params(&cli)?;
    let rows = project(&params, &ProjectionConstants::default()).map_err(|e| e.to_string())?;

    let written = match &cli.output {
        Some(path) => {
            let file = File::create(path)
                .map_err(|e| format!("failed to create {}: {e}", path.display()))?;
            write_projection_csv(&rows, BufWriter::new(file))
        }
        None => write_projection_csv(&rows, io::stdout().lock()),
    };
    written.map_err(|e| e.to_string())?;

    info!(
        "projected {} rows (ages {}..={})",
        rows.len(),
        params.start_age(),
        params.end_age
    );
    Ok(())
}

pub async fn run_http_server(port: u16) -> io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let app = Router::new()
        .route(
            "/api/forecast",
            get(forecast_get_handler).post(forecast_post_handler),
        )
        .route(
            "/api/forecast.csv",
            get(forecast_csv_get_handler).post(forecast_csv_post_handler),
        )
        .route("/api/compare", post(compare_handler))
        .route("/api/compare.csv", post(compare_csv_handler))
        .route("/api/forecasts.csv", post(forecasts_csv_handler))
        .route("/api/goals", post(goals_handler))
        .route("/api/goals.csv", post(goals_csv_handler))
        .fallback(not_found_handler);

    let listener = TcpListener::bind(addr).await?;
    info!("forecast HTTP API listening on http://{addr}");
    info!("local access: http://127.0.0.1:{port}/api/forecast");

    axum::serve(listener, app).await
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

async fn forecast_get_handler(Query(payload): Query<ForecastPayload>) -> Response {
    forecast_handler_impl(payload)
}

async fn forecast_post_handler(Json(payload): Json<ForecastPayload>) -> Response {
    forecast_handler_impl(payload)
}

async fn forecast_csv_get_handler(Query(payload): Query<ForecastPayload>) -> Response {
    forecast_csv_handler_impl(payload)
}

async fn forecast_csv_post_handler(Json(payload): Json<ForecastPayload>) -> Response {
    forecast_csv_handler_impl(payload)
}

fn forecast_handler_impl(payload: ForecastPayload) -> Response {
    let scenario = payload.scenario.unwrap_or_default();
    let rows = match forecast_rows(payload) {
        Ok(rows) => rows,
        Err(response) => return response,
    };
    json_response(StatusCode::OK, ForecastResponse { scenario, rows })
}

fn forecast_csv_handler_impl(payload: ForecastPayload) -> Response {
    let scenario = payload.scenario.unwrap_or_default();
    let rows = match forecast_rows(payload) {
        Ok(rows) => rows,
        Err(response) => return response,
    };
    let file_name = match scenario {
        ApiScenario::A => "scenario_a.csv",
        ApiScenario::B => "scenario_b.csv",
    };
    match projection_csv_string(&rows) {
        Ok(body) => csv_response(body, file_name),
        Err(err) => export_error_response(&err),
    }
}

fn forecast_rows(payload: ForecastPayload) -> Result<Vec<ProjectionRow>, Response> {
    let params = params_from_payload(payload).map_err(|msg| bad_request(&msg))?;
    project(&params, &ProjectionConstants::default()).map_err(|err| projection_error_response(&err))
}

async fn compare_handler(Json(payload): Json<ComparePayload>) -> Response {
    match comparison_from_payload(payload) {
        Ok(comparison) => json_response(StatusCode::OK, comparison),
        Err(response) => response,
    }
}

async fn compare_csv_handler(Json(payload): Json<ComparePayload>) -> Response {
    let comparison = match comparison_from_payload(payload) {
        Ok(comparison) => comparison,
        Err(response) => return response,
    };
    match comparison_csv_string(&comparison) {
        Ok(body) => csv_response(body, "forecast_series.csv"),
        Err(err) => export_error_response(&err),
    }
}

async fn forecasts_csv_handler(Json(payload): Json<ComparePayload>) -> Response {
    let comparison = match comparison_from_payload(payload) {
        Ok(comparison) => comparison,
        Err(response) => return response,
    };
    match scenarios_csv_string(&comparison) {
        Ok(body) => csv_response(body, "retirement_forecasts.csv"),
        Err(err) => export_error_response(&err),
    }
}

fn comparison_from_payload(payload: ComparePayload) -> Result<ScenarioComparison, Response> {
    let (scenario_a, scenario_b) =
        compare_params_from_payload(payload).map_err(|msg| bad_request(&msg))?;
    compare_scenarios(&scenario_a, &scenario_b, &ProjectionConstants::default())
        .map_err(|err| projection_error_response(&err))
}

async fn goals_handler(Json(payload): Json<GoalsPayload>) -> Response {
    match goal_entries_from_payload(payload) {
        Ok(goals) => json_response(StatusCode::OK, GoalsResponse { goals }),
        Err(msg) => bad_request(&msg),
    }
}

async fn goals_csv_handler(Json(payload): Json<GoalsPayload>) -> Response {
    let entries = match goal_entries_from_payload(payload) {
        Ok(entries) => entries,
        Err(msg) => return bad_request(&msg),
    };
    match goals_csv_string(&entries) {
        Ok(body) => csv_response(body, "retirement_goals.csv"),
        Err(err) => export_error_response(&err),
    }
}

fn goal_entries_from_payload(payload: GoalsPayload) -> Result<Vec<GoalEntry>, String> {
    validate_goals(&payload.goals)?;
    Ok(expand_goals(&payload.goals))
}

fn no_store(mut response: Response) -> Response {
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    no_store((status, Json(body)).into_response())
}

fn csv_response(body: String, file_name: &str) -> Response {
    let disposition = HeaderValue::from_str(&format!("attachment; filename=\"{file_name}\""))
        .unwrap_or_else(|_| HeaderValue::from_static("attachment"));
    no_store(
        (
            StatusCode::OK,
            [
                (
                    header::CONTENT_TYPE,
                    HeaderValue::from_static("text/csv; charset=utf-8"),
                ),
                (header::CONTENT_DISPOSITION, disposition),
            ],
            body,
        )
            .into_response(),
    )
}

fn error_response(status: StatusCode, msg: &str) -> Response {
    json_response(
        status,
        ErrorResponse {
            error: msg.to_string(),
        },
    )
}

fn bad_request(msg: &str) -> Response {
    warn!("rejected request: {msg}");
    error_response(StatusCode::BAD_REQUEST, msg)
}

fn projection_error_response(err: &ProjectionError) -> Response {
    warn!("projection failed: {err}");
    error_response(StatusCode::UNPROCESSABLE_ENTITY, &err.to_string())
}

fn export_error_response(err: &ExportError) -> Response {
    warn!("export failed: {err}");
    error_response(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string())
}

#[cfg(test)]
fn params_from_json(json: &str) -> Result<ScenarioParameters, String> {
    let payload = serde_json::from_str::<ForecastPayload>(json)
        .map_err(|e| format!("Invalid API JSON payload: {e}"))?;
    params_from_payload(payload)
}

fn compare_params_from_payload(
    payload: ComparePayload,
) -> Result<(ScenarioParameters, ScenarioParameters), String> {
    let mut scenario_a = payload.scenario_a.unwrap_or_default();
    scenario_a.scenario.get_or_insert(ApiScenario::A);
    let mut scenario_b = payload.scenario_b.unwrap_or_default();
    scenario_b.scenario.get_or_insert(ApiScenario::B);

    let params_a = params_from_payload(scenario_a).map_err(|msg| format!("scenarioA: {msg}"))?;
    let params_b = params_from_payload(scenario_b).map_err(|msg| format!("scenarioB: {msg}"))?;
    Ok((params_a, params_b))
}

fn params_from_payload(payload: ForecastPayload) -> Result<ScenarioParameters, String> {
    let mut cli = default_cli_for_scenario(payload.scenario.unwrap_or_default());

    if let Some(v) = payload.retirement_age {
        cli.retirement_age = v;
    }
    if let Some(v) = payload.withdraw_401k_age {
        cli.withdraw_401k_age = v;
    }
    if let Some(v) = payload.social_security_age {
        cli.social_security_age = v;
    }
    if let Some(v) = payload.end_age {
        cli.end_age = v;
    }

    if let Some(v) = payload.annual_need {
        cli.annual_need = v;
    }
    if let Some(v) = payload.after_tax_start {
        cli.after_tax_start = v;
    }
    if let Some(v) = payload.dividend_start {
        cli.dividend_start = v;
    }
    if let Some(v) = payload.after_tax_return {
        cli.after_tax_return = v;
    }
    if let Some(v) = payload.dividend_yield {
        cli.dividend_yield = v;
    }
    if let Some(v) = payload.capital_growth {
        cli.capital_growth = v;
    }

    if let Some(v) = payload.contrib_start_age {
        cli.contrib_start_age = v;
    }
    if let Some(v) = payload.contrib_end_age {
        cli.contrib_end_age = v;
    }
    if let Some(v) = payload.annual_contribution {
        cli.annual_contribution = v;
    }
    if let Some(v) = payload.return_401k {
        cli.return_401k = v;
    }
    if let Some(v) = payload.roth_pct {
        cli.roth_pct = v;
    }
    if let Some(v) = payload.tax_401k {
        cli.tax_401k = v;
    }

    if let Some(v) = payload.adjust_for_inflation {
        cli.adjust_for_inflation = v;
    }
    if let Some(v) = payload.retirement_account {
        cli.retirement_account = v.into();
    }
    if let Some(v) = payload.flat_withdrawal {
        cli.flat_withdrawal = Some(v);
    }
    if let Some(v) = payload.draw_policy {
        cli.draw_policy = v.into();
    }

    build_params(&cli)
}

fn default_cli_for_scenario(scenario: ApiScenario) -> Cli {
    let scenario_a = Cli {
        retirement_age: 53,
        withdraw_401k_age: 63,
        social_security_age: 67,
        end_age: 95,
        annual_need: 100_000.0,
        after_tax_start: 1_300_000.0,
        dividend_start: 1_000_000.0,
        after_tax_return: 6.0,
        dividend_yield: 4.0,
        capital_growth: 3.0,
        contrib_start_age: 50,
        contrib_end_age: 53,
        annual_contribution: 90_000.0,
        return_401k: 7.0,
        roth_pct: 30.0,
        tax_401k: 22.0,
        adjust_for_inflation: true,
        retirement_account: CliRetirementAccount::Amortized,
        flat_withdrawal: None,
        draw_policy: CliDrawPolicy::UntilWithdrawalAge,
        output: None,
    };

    match scenario {
        ApiScenario::A => scenario_a,
        ApiScenario::B => Cli {
            retirement_age: 57,
            withdraw_401k_age: 65,
            annual_need: 90_000.0,
            after_tax_start: 1_000_000.0,
            dividend_start: 800_000.0,
            after_tax_return: 5.0,
            contrib_end_age: 55,
            return_401k: 6.5,
            ..scenario_a
        },
    }
}
