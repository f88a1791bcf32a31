//! Report engine - reshapes the wide sales ledger into sales-line records
//!
//! Responsibilities:
//! - Canonicalize raw header names (case, accents, punctuation)
//! - Resolve logical fields through their historical column aliases
//! - Explode up to 9 item slots per transaction into one line each
//! - Apply the per-report department/payment predicates and date range
//! - Shape the output block written back to the report sheet
//!
//! CRITICAL: everything in this module is DETERMINISTIC and free of I/O
//! Same ledger + same parameters = same output block

use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;
use serde::Serialize;
use serde_json::Value;

use crate::error::ReportError;

// =============================================================================
// Cell values
// =============================================================================

/// The ledger's missing-value markers: an absent cell, a JSON null, or a
/// blank string.
fn is_missing(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

/// Text form of a cell. Integral numbers render without a decimal point so
/// a folio read back as `1500.0` compares equal to the `"1500"` it was.
fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => match n.as_i64() {
            Some(i) => i.to_string(),
            None => n.to_string(),
        },
        Value::Bool(b) => b.to_string(),
        _ => String::new(),
    }
}

fn value_to_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

// =============================================================================
// Column normalizer
// =============================================================================

/// Canonical form of a raw header: trim, lowercase, spaces and hyphens to
/// underscore, periods/parentheses/slashes stripped, `#` spelled out as
/// `num`, accented vowels folded. Idempotent: normalizing an already
/// canonical name is a no-op.
pub fn normalize_header(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.trim().to_lowercase().chars() {
        match ch {
            ' ' | '-' => out.push('_'),
            '.' | '(' | ')' | '/' => {}
            '#' => out.push_str("num"),
            'á' | 'à' | 'ä' | 'â' => out.push('a'),
            'é' | 'è' | 'ë' | 'ê' => out.push('e'),
            'í' | 'ì' | 'ï' | 'î' => out.push('i'),
            'ó' | 'ò' | 'ö' | 'ô' => out.push('o'),
            'ú' | 'ù' | 'ü' | 'û' => out.push('u'),
            other => out.push(other),
        }
    }
    out
}

// =============================================================================
// Raw rows
// =============================================================================

/// One ledger transaction keyed by canonical column name. Lookup never
/// fails: a column the ledger revision did not carry simply resolves to
/// nothing.
#[derive(Debug, Clone, Default)]
pub struct RawRow {
    cells: HashMap<String, Value>,
}

impl RawRow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a cell under the canonical form of `header`.
    pub fn insert(&mut self, header: &str, value: Value) {
        self.cells.insert(normalize_header(header), value);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.cells.get(key)
    }

    /// First alias present with a non-missing value, in the given order.
    /// Absence is a normal outcome, never an error.
    pub fn resolve<S: AsRef<str>>(&self, aliases: &[S]) -> Option<&Value> {
        aliases
            .iter()
            .filter_map(|alias| self.cells.get(alias.as_ref()))
            .find(|value| !is_missing(value))
    }

    pub fn resolve_str<S: AsRef<str>>(&self, aliases: &[S]) -> Option<String> {
        self.resolve(aliases).map(value_to_string)
    }

    /// Resolve, then parse. A value that resolved but does not parse is
    /// not a match for a later alias.
    pub fn resolve_num<S: AsRef<str>>(&self, aliases: &[S]) -> Option<f64> {
        self.resolve(aliases).and_then(value_to_f64)
    }
}

/// Build rows from a values-API table. The first row is the header row and
/// passes through the normalizer before any field lookup. Short data rows
/// leave their trailing fields missing; cells beyond the header width are
/// dropped. `departamento` and `tipo_de_pago` are trimmed and lowercased
/// at ingest so every later comparison sees uniform text.
pub fn table_to_rows(table: &[Vec<Value>]) -> Vec<RawRow> {
    let mut table_rows = table.iter();
    let Some(header_row) = table_rows.next() else {
        return Vec::new();
    };
    let headers: Vec<String> = header_row
        .iter()
        .map(|cell| normalize_header(&value_to_string(cell)))
        .collect();

    let mut rows = Vec::new();
    for raw in table_rows {
        let mut row = RawRow::new();
        for (key, cell) in headers.iter().zip(raw.iter()) {
            if key.is_empty() {
                continue;
            }
            let cell = if key == "departamento" || key == "tipo_de_pago" {
                Value::String(value_to_string(cell).to_lowercase())
            } else {
                cell.clone()
            };
            row.cells.insert(key.clone(), cell);
        }
        rows.push(row);
    }
    rows
}

// =============================================================================
// Report kinds
// =============================================================================

/// Payment types that make a branch (sucursal) sale reportable.
const PAGOS_SUCURSAL: &[&str] = &["pago total", "puerta pagada (anticipo)", "complemento"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportKind {
    General,
    Constructora,
    Distribuidores,
    Sucursales,
}

impl ReportKind {
    /// Case-insensitive selector parse; the offending value is kept in
    /// the error so the caller sees what it sent.
    pub fn parse(value: &str) -> Result<Self, ReportError> {
        match value.trim().to_lowercase().as_str() {
            "general" => Ok(Self::General),
            "constructora" => Ok(Self::Constructora),
            "distribuidores" => Ok(Self::Distribuidores),
            "sucursales" => Ok(Self::Sucursales),
            _ => Err(ReportError::InvalidReportKind(value.trim().to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::General => "GENERAL",
            Self::Constructora => "CONSTRUCTORA",
            Self::Distribuidores => "DISTRIBUIDORES",
            Self::Sucursales => "SUCURSALES",
        }
    }

    /// Item slots scanned per row for this report.
    pub fn slot_count(&self) -> usize {
        match self {
            Self::Sucursales => 6,
            _ => 9,
        }
    }

    /// Whether the coupon/comment annotation fields are extracted.
    pub fn include_extras(&self) -> bool {
        matches!(self, Self::Sucursales)
    }

    /// Row predicate applied after the date filter. Both sides of every
    /// comparison are trimmed and lowercased.
    pub fn matches(&self, row: &RawRow) -> bool {
        let depto = field_lower(row, "departamento");
        let pago = field_lower(row, "tipo_de_pago");
        match self {
            Self::General => {
                depto == "constructora"
                    || depto == "distribuidores"
                    || (depto == "sucursal" && PAGOS_SUCURSAL.contains(&pago.as_str()))
            }
            Self::Constructora => depto == "constructora",
            Self::Distribuidores => depto == "distribuidores" && pago == "pago",
            Self::Sucursales => depto == "sucursal" && PAGOS_SUCURSAL.contains(&pago.as_str()),
        }
    }
}

fn field_lower(row: &RawRow, key: &str) -> String {
    row.resolve_str(&[key])
        .map(|s| s.to_lowercase())
        .unwrap_or_default()
}

// =============================================================================
// Slot extraction
// =============================================================================

/// One normalized sales line: a single non-empty item slot of one
/// transaction. Quantity is always positive; every other field carries
/// whatever the ledger held, or nothing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SalesLine {
    pub fecha_captura: Option<String>,
    pub fecha: Option<String>,
    pub folio: Option<String>,
    pub departamento: Option<String>,
    pub cliente: Option<String>,
    pub metodo_de_venta: Option<String>,
    pub num_sucursal: Option<String>,
    pub sucursal: Option<String>,
    pub vendedor: Option<String>,
    pub cantidad: f64,
    pub categoria: Option<String>,
    pub descripcion: Option<String>,
    pub precio_final: Option<String>,
    pub tipo_de_pago: Option<String>,
    pub salida: Option<String>,
    pub comentario_cupon: Option<String>,
    pub monto_cupon: Option<String>,
    pub comentario: Option<String>,
}

/// Quantity aliases per slot. Slots 1-3 picked up a double-underscore
/// variant in one ledger revision; later slots never had it.
fn slot_quantity_aliases(slot: usize) -> Vec<String> {
    match slot {
        1..=3 => vec![
            format!("cant_{slot}"),
            format!("cant__{slot}"),
            format!("cant{slot}"),
        ],
        _ => vec![format!("cant_{slot}"), format!("cant{slot}")],
    }
}

/// Category aliases per slot, in fallback order. The per-slot differences
/// mirror how the ledger's column families drifted release to release.
fn slot_category_aliases(slot: usize) -> Vec<String> {
    match slot {
        1..=4 => vec![format!("descr{slot}_1")],
        5 | 6 | 8 => vec![format!("descr{slot}"), format!("descr{slot}_1")],
        7 => vec!["descr7".to_string()],
        9 => vec!["descr9_1".to_string(), "descr9".to_string()],
        _ => Vec::new(),
    }
}

/// Final-price column per slot. Slot 7's price has always lived under
/// slot 6's column in the ledger; kept as-is, flagged for source cleanup.
fn slot_price_column(slot: usize) -> String {
    if slot == 7 {
        "precio_final_6".to_string()
    } else {
        format!("precio_final_{slot}")
    }
}

/// Substring markers that make an `adicional_*` cell a coupon comment.
const CUPON_MARKERS: &[&str] = &["chs", "model", "cambio", "cancel", "folio"];
/// Substring markers that make a `comp*` cell a general comment.
const COMENTARIO_MARKERS: &[&str] = &["cancel", "modelo", "model", "cambio"];

fn contains_any(text: &str, markers: &[&str]) -> bool {
    let lowered = text.to_lowercase();
    markers.iter().any(|marker| lowered.contains(marker))
}

fn matches_any(value: &Option<String>, markers: &[&str]) -> bool {
    value.as_deref().is_some_and(|v| contains_any(v, markers))
}

fn contains_marker(value: &Option<String>, marker: &str) -> bool {
    value.as_deref().is_some_and(|v| v.to_lowercase().contains(marker))
}

/// Annotation fields for the branch report. Each source pair is checked
/// first-to-second and the first cell whose text matches wins outright;
/// the two cells are never combined.
fn apply_extras(row: &RawRow, line: &mut SalesLine) {
    let adicional_1 = row.resolve_str(&["adicional_1"]);
    let adicional_2 = row.resolve_str(&["adicional_2"]);

    line.comentario_cupon = if matches_any(&adicional_1, CUPON_MARKERS) {
        adicional_1.clone()
    } else if matches_any(&adicional_2, CUPON_MARKERS) {
        adicional_2.clone()
    } else {
        None
    };

    line.monto_cupon = if contains_marker(&adicional_1, "chs") {
        row.resolve_str(&["precio_adic_1"])
    } else if contains_marker(&adicional_2, "chs") {
        row.resolve_str(&["precio_adic_2"])
    } else {
        None
    };

    let comp1 = row.resolve_str(&["comp1"]);
    let comp2 = row.resolve_str(&["comp2"]);
    line.comentario = if matches_any(&comp1, COMENTARIO_MARKERS) {
        comp1
    } else if matches_any(&comp2, COMENTARIO_MARKERS) {
        comp2
    } else {
        None
    };
}

/// Extract one item slot from a transaction row. A missing, unparseable
/// or non-positive quantity means the slot contributes nothing; that is
/// the normal shape of most rows, not a failure.
fn extract_slot(row: &RawRow, slot: usize, include_extras: bool) -> Option<SalesLine> {
    let cantidad = row.resolve_num(&slot_quantity_aliases(slot))?;
    if !cantidad.is_finite() || cantidad <= 0.0 {
        return None;
    }

    let mut line = SalesLine {
        fecha_captura: row.resolve_str(&["fecha_captura"]),
        fecha: row.resolve_str(&["fecha"]),
        folio: row.resolve_str(&["folio"]),
        departamento: row.resolve_str(&["departamento"]),
        cliente: row.resolve_str(&["cliente"]),
        metodo_de_venta: row.resolve_str(&["metodo_de_venta"]),
        num_sucursal: row.resolve_str(&["num_sucursal"]),
        sucursal: row.resolve_str(&["sucursal"]),
        vendedor: row.resolve_str(&["vendedor"]),
        cantidad,
        categoria: row.resolve_str(&slot_category_aliases(slot)),
        descripcion: row.resolve_str(&[format!("descr{slot}_2")]),
        precio_final: row.resolve_str(&[slot_price_column(slot)]),
        tipo_de_pago: row.resolve_str(&["tipo_de_pago"]),
        salida: row.resolve_str(&["salida"]),
        comentario_cupon: None,
        monto_cupon: None,
        comentario: None,
    };

    if include_extras {
        apply_extras(row, &mut line);
    }

    Some(line)
}

// =============================================================================
// Normalization engine + orchestrator
// =============================================================================

/// Explode rows into sales lines: row order, then slot order within each
/// row. Output order is stable so report diffs line up across runs.
pub fn normalize_items(rows: &[&RawRow], slot_count: usize, include_extras: bool) -> Vec<SalesLine> {
    let mut out = Vec::new();
    for row in rows {
        for slot in 1..=slot_count {
            if let Some(line) = extract_slot(row, slot, include_extras) {
                out.push(line);
            }
        }
    }
    out
}

/// Closed interval over the integer date-code column `num_a`. A row whose
/// code does not parse is out of range by definition.
pub fn filter_by_date<'a>(rows: &'a [RawRow], ini: i64, fin: i64) -> Vec<&'a RawRow> {
    rows.iter()
        .filter(|row| {
            row.resolve_num(&["num_a"])
                .is_some_and(|code| code >= ini as f64 && code <= fin as f64)
        })
        .collect()
}

/// Single entry point: date range -> report predicate -> slot explosion
/// with the kind's slot count and extras configuration. Stateless; safe
/// to call repeatedly against the same loaded ledger.
pub fn run_reporte(kind: ReportKind, rows: &[RawRow], ini: i64, fin: i64) -> Vec<SalesLine> {
    let in_range = filter_by_date(rows, ini, fin);
    let selected: Vec<&RawRow> = in_range
        .into_iter()
        .filter(|row| kind.matches(row))
        .collect();
    normalize_items(&selected, kind.slot_count(), kind.include_extras())
}

// =============================================================================
// Output block
// =============================================================================

/// Row (1-based) where the output block starts in the report sheet. The
/// rows above it hold the dashboard the sheet owners maintain by hand.
pub const OUTPUT_START_ROW: u32 = 26;

const BASE_COLUMNS: &[&str] = &[
    "fecha_captura",
    "fecha",
    "folio",
    "departamento",
    "cliente",
    "metodo_de_venta",
    "num_sucursal",
    "sucursal",
    "vendedor",
    "cantidad",
    "categoria",
    "descripcion",
    "precio_final",
    "tipo_de_pago",
    "salida",
];
const EXTRA_COLUMNS: &[&str] = &["comentario_cupon", "monto_cupon", "comentario"];

/// Columns written as numbers when their text parses as one.
const NUMERIC_COLUMNS: &[&str] = &[
    "folio",
    "num_sucursal",
    "cantidad",
    "precio_final",
    "monto_cupon",
];
/// Columns rewritten as ISO dates when their text parses as one.
const DATE_COLUMNS: &[&str] = &["fecha_captura", "fecha"];

pub fn output_columns(include_extras: bool) -> Vec<&'static str> {
    let mut columns = BASE_COLUMNS.to_vec();
    if include_extras {
        columns.extend_from_slice(EXTRA_COLUMNS);
    }
    columns
}

/// Display form of a canonical column name: "metodo_de_venta" becomes
/// "Metodo De Venta".
pub fn titled_header(name: &str) -> String {
    name.split('_')
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn trim_float(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        value.to_string()
    }
}

fn field_text(line: &SalesLine, column: &str) -> Option<String> {
    match column {
        "fecha_captura" => line.fecha_captura.clone(),
        "fecha" => line.fecha.clone(),
        "folio" => line.folio.clone(),
        "departamento" => line.departamento.clone(),
        "cliente" => line.cliente.clone(),
        "metodo_de_venta" => line.metodo_de_venta.clone(),
        "num_sucursal" => line.num_sucursal.clone(),
        "sucursal" => line.sucursal.clone(),
        "vendedor" => line.vendedor.clone(),
        "cantidad" => Some(trim_float(line.cantidad)),
        "categoria" => line.categoria.clone(),
        "descripcion" => line.descripcion.clone(),
        "precio_final" => line.precio_final.clone(),
        "tipo_de_pago" => line.tipo_de_pago.clone(),
        "salida" => line.salida.clone(),
        "comentario_cupon" => line.comentario_cupon.clone(),
        "monto_cupon" => line.monto_cupon.clone(),
        "comentario" => line.comentario.clone(),
        _ => None,
    }
}

/// Parse a numeric cell back into a JSON number, integer when exact.
fn parse_number(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(int) = trimmed.parse::<i64>() {
        return Some(Value::from(int));
    }
    let float: f64 = trimmed.parse().ok()?;
    serde_json::Number::from_f64(float).map(Value::Number)
}

/// Ledger date shapes accepted for re-emission as YYYY-MM-DD; anything
/// else is written back as the original text.
fn iso_date(text: &str) -> Option<String> {
    let trimmed = text.trim();
    let head = trimmed.split(['T', ' ']).next().unwrap_or(trimmed);
    for format in ["%Y-%m-%d", "%d/%m/%Y", "%d-%m-%Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(head, format) {
            return Some(date.format("%Y-%m-%d").to_string());
        }
    }
    None
}

fn output_cell(column: &str, text: Option<String>) -> Value {
    let Some(text) = text else {
        return Value::String(String::new());
    };
    if DATE_COLUMNS.contains(&column) {
        return Value::String(iso_date(&text).unwrap_or(text));
    }
    if NUMERIC_COLUMNS.contains(&column) {
        if let Some(number) = parse_number(&text) {
            return number;
        }
    }
    Value::String(text)
}

/// Header row plus one row per sales line, ready for a RAW values write.
pub fn to_output_block(lines: &[SalesLine], include_extras: bool) -> Vec<Vec<Value>> {
    let columns = output_columns(include_extras);
    let mut block = Vec::with_capacity(lines.len() + 1);
    block.push(
        columns
            .iter()
            .map(|column| Value::String(titled_header(column)))
            .collect(),
    );
    for line in lines {
        block.push(
            columns
                .iter()
                .map(|column| output_cell(column, field_text(line, column)))
                .collect(),
        );
    }
    block
}

// =============================================================================
// Ledger summary
// =============================================================================

/// Diagnostic counts for `/debug`: what the ledger looks like before any
/// filtering. BTreeMaps keep the JSON output deterministic.
#[derive(Debug, Serialize)]
pub struct LedgerSummary {
    pub total_rows: usize,
    pub departamentos: BTreeMap<String, usize>,
    pub tipos_de_pago: BTreeMap<String, usize>,
    pub num_a_min: Option<i64>,
    pub num_a_max: Option<i64>,
}

pub fn summarize_ledger(rows: &[RawRow]) -> LedgerSummary {
    let mut departamentos: BTreeMap<String, usize> = BTreeMap::new();
    let mut tipos_de_pago: BTreeMap<String, usize> = BTreeMap::new();
    let mut num_a_min: Option<i64> = None;
    let mut num_a_max: Option<i64> = None;

    for row in rows {
        if let Some(depto) = row.resolve_str(&["departamento"]) {
            *departamentos.entry(depto.to_lowercase()).or_insert(0) += 1;
        }
        if let Some(pago) = row.resolve_str(&["tipo_de_pago"]) {
            *tipos_de_pago.entry(pago.to_lowercase()).or_insert(0) += 1;
        }
        if let Some(code) = row.resolve_num(&["num_a"]) {
            let code = code as i64;
            num_a_min = Some(num_a_min.map_or(code, |m| m.min(code)));
            num_a_max = Some(num_a_max.map_or(code, |m| m.max(code)));
        }
    }

    LedgerSummary {
        total_rows: rows.len(),
        departamentos,
        tipos_de_pago,
        num_a_min,
        num_a_max,
    }
}

// =============================================================================
// TESTS
// =============================================================================
