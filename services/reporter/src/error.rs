//! Error types for the reporter service.
//!
//! The wire contract distinguishes three failure classes: bad request
//! input (400), a missing sheet or spreadsheet (404), and everything
//! else (500). Messages for the 400 class keep the exact Spanish wording
//! the scheduler that calls `/run-multi` already matches on.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReportError {
    /// A required request field is missing or blank.
    #[error("Falta parámetro: {0}")]
    MissingParam(&'static str),

    /// A request field is present but not usable (e.g. a date-code that
    /// is not integer-parsable).
    #[error("Parámetro inválido: {0}")]
    InvalidParam(&'static str),

    /// The report selector does not name a known report kind.
    #[error("Tipo de reporte no válido: {0}")]
    InvalidReportKind(String),

    /// Source or destination sheet/spreadsheet absent or inaccessible.
    #[error("Hoja o documento no encontrado: {0}")]
    SheetNotFound(String),

    /// Credential acquisition failed.
    #[error("fallo de autenticación: {0}")]
    Auth(String),

    /// The spreadsheet backend rejected a call.
    #[error("fallo del backend de hojas: {0}")]
    Backend(String),

    /// Transport-level failure talking to the backend.
    #[error("error de red: {0}")]
    Http(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, ReportError>;
