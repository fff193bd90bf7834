//! Fehlertypen fuer Parley
//!
//! Zentraler Fehler-Enum fuer crate-uebergreifende Fehlerzustaende.
//! Untermodule definieren eigene Fehler und konvertieren via `#[from]`.

use thiserror::Error;

/// Globaler Result-Alias fuer Parley
pub type Result<T> = std::result::Result<T, ParleyError>;

/// Crate-uebergreifende Fehler im Parley-System
#[derive(Debug, Error)]
pub enum ParleyError {
    // --- Verbindung & Netzwerk ---
    #[error("Verbindung fehlgeschlagen: {0}")]
    Verbindung(String),

    #[error("Verbindung getrennt: {0}")]
    Getrennt(String),

    #[error("Zeitlimit ueberschritten: {0}")]
    Zeitlimit(String),

    // --- Medien ---
    #[error("Mikrofon nicht verfuegbar: {0}")]
    MedienNichtVerfuegbar(String),

    #[error("Aushandlung fehlgeschlagen: {0}")]
    Aushandlung(String),

    // --- Intern ---
    #[error("Interner Fehler: {0}")]
    Intern(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl ParleyError {
    /// Erstellt einen internen Fehler aus einer beliebigen Nachricht
    pub fn intern(msg: impl Into<String>) -> Self {
        Self::Intern(msg.into())
    }
}
