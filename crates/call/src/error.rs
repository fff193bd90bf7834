//! Fehlertypen der Call State Machine

use parley_core::error::ParleyError;
use thiserror::Error;

/// Result-Alias fuer die Call State Machine
pub type CallResult<T> = std::result::Result<T, CallError>;

/// Fehler die ein UI-Befehl oder ein Transport zurueckgeben kann
///
/// Keiner dieser Fehler ist fatal: die Maschine steht danach immer in einem
/// gueltigen Zustand und hat alle Ressourcen des betroffenen Anrufs
/// freigegeben.
#[derive(Debug, Error)]
pub enum CallError {
    /// Befehl ist im aktuellen Zustand nicht erlaubt
    #[error("Befehl im Zustand {0} nicht erlaubt")]
    InvalidState(&'static str),

    /// Es laeuft bereits ein Anruf oder ein Voice-Channel
    #[error("Bereits in einem Anruf")]
    Busy,

    /// Mute/Lautsprecher ohne aktive Mikrofon-Aufnahme
    #[error("Keine aktive Aufnahme")]
    NoCapture,

    #[error("Mikrofon nicht verfuegbar: {0}")]
    MediaUnavailable(String),

    #[error("Aushandlung fehlgeschlagen: {0}")]
    NegotiationFailure(String),

    #[error("Transport-Fehler: {0}")]
    Transport(String),

    /// Der Maschinen-Task laeuft nicht mehr
    #[error("Call State Machine gestoppt")]
    Stopped,
}

impl CallError {
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }
}

impl From<ParleyError> for CallError {
    fn from(e: ParleyError) -> Self {
        match e {
            ParleyError::MedienNichtVerfuegbar(m) => Self::MediaUnavailable(m),
            ParleyError::Aushandlung(m) => Self::NegotiationFailure(m),
            ParleyError::Verbindung(m) | ParleyError::Getrennt(m) | ParleyError::Zeitlimit(m) => {
                Self::Transport(m)
            }
            other => Self::NegotiationFailure(other.to_string()),
        }
    }
}
