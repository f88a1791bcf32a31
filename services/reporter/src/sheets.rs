//! Google Sheets collaborator - the only I/O boundary of the service
//!
//! Responsibilities:
//! - Acquire a bearer token (static env token or the metadata server)
//! - Read the source ledger as a values table
//! - Check destination sheet existence explicitly, creating it if absent
//! - Clear the report region and write the output block
//!
//! Both round-trips are synchronous calls with no retries: a transient
//! failure surfaces immediately and the caller re-invokes the endpoint,
//! which rebuilds the whole output region from scratch anyway.

use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::{ReportError, Result};
use crate::report::{table_to_rows, RawRow, OUTPUT_START_ROW};

/// Sheets v4 REST endpoint root (overridable for tests and mirrors).
pub const DEFAULT_API_BASE: &str = "https://sheets.googleapis.com/v4/spreadsheets";
/// Token endpoint of the GCE/Cloud Run metadata server.
pub const DEFAULT_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

/// Handle to the spreadsheet backend. Constructed once per process and
/// injected into request handlers; holds no per-request state.
pub struct SheetsClient {
    http: reqwest::Client,
    api_base: String,
    static_token: Option<String>,
    token_url: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

#[derive(Debug, Deserialize)]
struct SpreadsheetMeta {
    #[serde(default)]
    sheets: Vec<SheetEntry>,
}

#[derive(Debug, Deserialize)]
struct SheetEntry {
    properties: SheetProperties,
}

#[derive(Debug, Deserialize)]
struct SheetProperties {
    title: String,
}

// =============================================================================
// A1 range helpers
// =============================================================================

/// Quote a sheet title for A1 notation; titles with spaces need it.
fn quoted(sheet: &str) -> String {
    format!("'{}'", sheet.replace('\'', "''"))
}

/// Range covering a whole sheet, for the ledger read.
pub fn sheet_range(sheet: &str) -> String {
    quoted(sheet)
}

/// Everything at or below the output offset in the report columns.
pub fn block_clear_range(sheet: &str) -> String {
    format!("{}!A{}:Z", quoted(sheet), OUTPUT_START_ROW)
}

/// Anchor cell where the output block is written.
pub fn block_start_range(sheet: &str) -> String {
    format!("{}!A{}", quoted(sheet), OUTPUT_START_ROW)
}

// =============================================================================
// Client
// =============================================================================

impl SheetsClient {
    pub fn new(
        api_base: String,
        static_token: Option<String>,
        token_url: String,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent("reporte-ventas/0.1")
            .build()?;
        Ok(Self {
            http,
            api_base,
            static_token,
            token_url,
        })
    }

    /// Bearer token for the next call. A static token (dev) is used as
    /// given; otherwise the service-account token comes from the metadata
    /// server, freshly per call so expiry never bites a long-lived process.
    async fn token(&self) -> Result<String> {
        if let Some(token) = &self.static_token {
            return Ok(token.clone());
        }
        let resp = self
            .http
            .get(&self.token_url)
            .header("Metadata-Flavor", "Google")
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(ReportError::Auth(format!(
                "metadata server respondió {}",
                resp.status()
            )));
        }
        let token: TokenResponse = resp.json().await?;
        Ok(token.access_token)
    }

    /// Read a sheet as a table and build ledger rows from it. The header
    /// row is canonicalized inside `table_to_rows`.
    pub async fn read_table(&self, spreadsheet_id: &str, sheet: &str) -> Result<Vec<RawRow>> {
        let url = format!(
            "{}/{}/values/{}",
            self.api_base,
            spreadsheet_id,
            sheet_range(sheet)
        );
        let resp = self
            .http
            .get(&url)
            .bearer_auth(self.token().await?)
            .send()
            .await?;
        let resp = check_sheet_response(resp, spreadsheet_id, sheet)?;
        let range: ValueRange = resp.json().await?;
        Ok(table_to_rows(&range.values))
    }

    /// Explicit existence check for the destination sheet, creating it
    /// when absent. Replaces the old create-on-write-failure behavior
    /// with a declared decision.
    pub async fn ensure_sheet(&self, spreadsheet_id: &str, sheet: &str) -> Result<()> {
        let url = format!(
            "{}/{}?fields=sheets.properties.title",
            self.api_base, spreadsheet_id
        );
        let resp = self
            .http
            .get(&url)
            .bearer_auth(self.token().await?)
            .send()
            .await?;
        let resp = check_sheet_response(resp, spreadsheet_id, sheet)?;
        let meta: SpreadsheetMeta = resp.json().await?;

        if meta.sheets.iter().any(|s| s.properties.title == sheet) {
            return Ok(());
        }

        println!("Destination sheet '{}' absent - creating it", sheet);
        let url = format!("{}/{}:batchUpdate", self.api_base, spreadsheet_id);
        let body = json!({
            "requests": [{ "addSheet": { "properties": { "title": sheet } } }]
        });
        let resp = self
            .http
            .post(&url)
            .bearer_auth(self.token().await?)
            .json(&body)
            .send()
            .await?;
        check_sheet_response(resp, spreadsheet_id, sheet)?;
        Ok(())
    }

    /// Clear a range in the destination sheet.
    pub async fn clear_range(&self, spreadsheet_id: &str, range: &str) -> Result<()> {
        let url = format!("{}/{}/values/{}:clear", self.api_base, spreadsheet_id, range);
        let resp = self
            .http
            .post(&url)
            .bearer_auth(self.token().await?)
            .json(&json!({}))
            .send()
            .await?;
        check_sheet_response(resp, spreadsheet_id, range)?;
        Ok(())
    }

    /// Write a rectangular block of cells starting at `range`, RAW so
    /// numbers land as numbers and text stays text.
    pub async fn update_cells(
        &self,
        spreadsheet_id: &str,
        range: &str,
        values: &[Vec<Value>],
    ) -> Result<()> {
        let url = format!(
            "{}/{}/values/{}?valueInputOption=RAW",
            self.api_base, spreadsheet_id, range
        );
        let body = json!({
            "range": range,
            "majorDimension": "ROWS",
            "values": values,
        });
        let resp = self
            .http
            .put(&url)
            .bearer_auth(self.token().await?)
            .json(&body)
            .send()
            .await?;
        check_sheet_response(resp, spreadsheet_id, range)?;
        Ok(())
    }
}

/// Map a Sheets API response status onto the error taxonomy. The API
/// answers 404 for an unknown spreadsheet and 400 for a range naming a
/// sheet that does not exist; both identify the same caller mistake.
fn check_sheet_response(
    resp: reqwest::Response,
    spreadsheet_id: &str,
    name: &str,
) -> Result<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    match status.as_u16() {
        400 | 404 => Err(ReportError::SheetNotFound(format!(
            "{} / {}",
            spreadsheet_id, name
        ))),
        401 | 403 => Err(ReportError::Auth(format!(
            "acceso denegado a {} ({})",
            spreadsheet_id, status
        ))),
        _ => Err(ReportError::Backend(format!(
            "Sheets API respondió {} para {}",
            status, spreadsheet_id
        ))),
    }
}

// =============================================================================
// TESTS
// =============================================================================
