//! Reporter Service - sales ledger report generator
//!
//! Reads the wide sales ledger from a source spreadsheet, normalizes it
//! into long-form sales lines, filters them by report kind and date-code
//! range, and writes the block back into the report spreadsheet.
//!
//! Endpoints:
//! - POST /run-multi - run one report over the ledger and write it back
//! - POST /debug - ledger diagnostics, writes nothing
//! - GET /health - health check
//!
//! One request is one full read -> transform -> write cycle; nothing is
//! cached between requests. Concurrent requests against the same
//! destination range are not serialized: last write wins, so the
//! scheduler must not overlap them.

mod error;
mod report;
mod sheets;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};

use error::ReportError;
use report::ReportKind;
use sheets::SheetsClient;

// ============================================================================
// State & config
// ============================================================================

struct AppState {
    sheets: SheetsClient,
}

#[derive(Debug, Clone)]
struct Config {
    bind: String,
    api_base: String,
    token: Option<String>,
    token_url: String,
    http_timeout_secs: u64,
}

impl Config {
    fn from_env() -> Self {
        Self {
            bind: std::env::var("REPORTER_BIND").unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            api_base: std::env::var("SHEETS_API_BASE")
                .unwrap_or_else(|_| sheets::DEFAULT_API_BASE.to_string()),
            token: std::env::var("GOOGLE_TOKEN")
                .ok()
                .filter(|t| !t.trim().is_empty()),
            token_url: std::env::var("GOOGLE_TOKEN_URL")
                .unwrap_or_else(|_| sheets::DEFAULT_TOKEN_URL.to_string()),
            http_timeout_secs: std::env::var("HTTP_TIMEOUT_SECS")
                .unwrap_or_else(|_| "120".to_string())
                .parse()
                .unwrap_or(120),
        }
    }
}

// ============================================================================
// Request types
// ============================================================================

#[derive(Debug, Deserialize)]
struct RunMultiRequest {
    spreadsheet_base_id: Option<String>,
    sheet_base: Option<String>,
    spreadsheet_reporte_id: Option<String>,
    sheet_reporte: Option<String>,
    fecha_ini: Option<Value>,
    fecha_fin: Option<Value>,
    tipo: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DebugRequest {
    spreadsheet_base_id: Option<String>,
    sheet_base: Option<String>,
}

// ============================================================================
// Request validation
// ============================================================================

/// Required string field: present and non-blank.
fn require_str(value: Option<String>, field: &'static str) -> Result<String, ReportError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        _ => Err(ReportError::MissingParam(field)),
    }
}

/// Required date-code: a JSON integer or an integer-parsable string.
fn require_fecha(value: Option<&Value>, field: &'static str) -> Result<i64, ReportError> {
    let value = value.ok_or(ReportError::MissingParam(field))?;
    match value {
        Value::Number(n) => n.as_i64().ok_or(ReportError::InvalidParam(field)),
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return Err(ReportError::MissingParam(field));
            }
            trimmed.parse().map_err(|_| ReportError::InvalidParam(field))
        }
        Value::Null => Err(ReportError::MissingParam(field)),
        _ => Err(ReportError::InvalidParam(field)),
    }
}

/// Optional sheet name, falling back to its legacy default.
fn sheet_or_default(value: Option<String>, default: &str) -> String {
    value
        .filter(|v| !v.trim().is_empty())
        .map(|v| v.trim().to_string())
        .unwrap_or_else(|| default.to_string())
}

fn status_for(err: &ReportError) -> StatusCode {
    match err {
        ReportError::MissingParam(_)
        | ReportError::InvalidParam(_)
        | ReportError::InvalidReportKind(_) => StatusCode::BAD_REQUEST,
        ReportError::SheetNotFound(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(err: ReportError) -> Response {
    eprintln!("request failed: {err}");
    (
        status_for(&err),
        Json(json!({ "status": "error", "error": err.to_string() })),
    )
        .into_response()
}

// ============================================================================
// Handlers
// ============================================================================

async fn health_handler() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn run_multi_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RunMultiRequest>,
) -> Response {
    match run_multi(&state, req).await {
        Ok((tipo, rows)) => {
            Json(json!({ "status": "ok", "tipo": tipo, "rows": rows })).into_response()
        }
        Err(err) => error_response(err),
    }
}

async fn run_multi(
    state: &AppState,
    req: RunMultiRequest,
) -> Result<(&'static str, usize), ReportError> {
    let base_id = require_str(req.spreadsheet_base_id, "spreadsheet_base_id")?;
    let reporte_id = require_str(req.spreadsheet_reporte_id, "spreadsheet_reporte_id")?;
    let fecha_ini = require_fecha(req.fecha_ini.as_ref(), "fecha_ini")?;
    let fecha_fin = require_fecha(req.fecha_fin.as_ref(), "fecha_fin")?;
    let tipo = require_str(req.tipo, "tipo")?;
    // the selector is validated before any spreadsheet call, so an unknown
    // kind can never leave a partially cleared report behind
    let kind = ReportKind::parse(&tipo)?;
    let sheet_base = sheet_or_default(req.sheet_base, "BaseV");
    let sheet_reporte = sheet_or_default(req.sheet_reporte, "REPORTE VENTAS");

    println!(
        "[run-multi] tipo={} rango={}..{} base='{}' destino='{}'",
        kind.as_str(),
        fecha_ini,
        fecha_fin,
        sheet_base,
        sheet_reporte
    );

    let rows = state.sheets.read_table(&base_id, &sheet_base).await?;
    println!("  Ledger: {} rows", rows.len());

    let lines = report::run_reporte(kind, &rows, fecha_ini, fecha_fin);
    println!("  Report lines: {}", lines.len());

    let block = report::to_output_block(&lines, kind.include_extras());

    state.sheets.ensure_sheet(&reporte_id, &sheet_reporte).await?;
    state
        .sheets
        .clear_range(&reporte_id, &sheets::block_clear_range(&sheet_reporte))
        .await?;
    state
        .sheets
        .update_cells(
            &reporte_id,
            &sheets::block_start_range(&sheet_reporte),
            &block,
        )
        .await?;
    println!(
        "  Wrote {} rows at A{}",
        block.len(),
        report::OUTPUT_START_ROW
    );

    Ok((kind.as_str(), lines.len()))
}

async fn debug_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<DebugRequest>,
) -> Response {
    match ledger_debug(&state, req).await {
        Ok(summary) => Json(json!({ "status": "ok", "resumen": summary })).into_response(),
        Err(err) => error_response(err),
    }
}

async fn ledger_debug(
    state: &AppState,
    req: DebugRequest,
) -> Result<report::LedgerSummary, ReportError> {
    let base_id = require_str(req.spreadsheet_base_id, "spreadsheet_base_id")?;
    let sheet_base = sheet_or_default(req.sheet_base, "BaseV");
    let rows = state.sheets.read_table(&base_id, &sheet_base).await?;
    Ok(report::summarize_ledger(&rows))
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::from_env();

    println!("=== Reporte Ventas ===");
    println!("Sheets API: {}", config.api_base);
    println!(
        "Token source: {}",
        if config.token.is_some() {
            "env"
        } else {
            "metadata server"
        }
    );

    let sheets_client = SheetsClient::new(
        config.api_base.clone(),
        config.token.clone(),
        config.token_url.clone(),
        Duration::from_secs(config.http_timeout_secs),
    )?;
    let state = Arc::new(AppState {
        sheets: sheets_client,
    });

    // CORS for manual triggering from the sheet's side panel
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/health", get(health_handler))
        .route("/run-multi", post(run_multi_handler))
        .route("/debug", post(debug_handler))
        .layer(cors)
        .with_state(state);

    println!("Listening on http://{}", config.bind);
    println!("\nEndpoints:");
    println!("  GET  /health");
    println!("  POST /run-multi");
    println!("  POST /debug");

    let listener = tokio::net::TcpListener::bind(&config.bind).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================
