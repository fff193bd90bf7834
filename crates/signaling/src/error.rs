//! Fehlertypen fuer den Session Coordinator
//!
//! Routing-Fehler tauchen hier nicht auf: ein nicht zustellbares Signal wird
//! verworfen und nur gezaehlt.

use thiserror::Error;

/// Fehlertyp fuer den Signaling-Service
#[derive(Debug, Error)]
pub enum SignalingError {
    /// IO-Fehler (TCP, Socket, Frame-Dekodierung)
    #[error("IO-Fehler: {0}")]
    Io(#[from] std::io::Error),

    /// Verbindung wurde vom Client getrennt
    #[error("Verbindung getrennt")]
    VerbindungGetrennt,

    /// Eine neuere Verbindung hat sich mit derselben Identitaet gemeldet
    #[error("Verbindung durch neuere Anmeldung ersetzt")]
    Ersetzt,

    /// Protokollfehler (ungueltiges Frame, falscher Zustand)
    #[error("Protokollfehler: {0}")]
    Protokoll(String),

    /// Server ist voll
    #[error("Server ist voll")]
    ServerVoll,

    /// Keine Nachricht innerhalb des Verbindungs-Timeouts
    #[error("Timeout")]
    Timeout,

    /// Server wird heruntergefahren
    #[error("Shutdown")]
    Shutdown,

    /// Interner Fehler
    #[error("Interner Fehler: {0}")]
    Intern(String),
}

impl SignalingError {
    /// Erstellt einen internen Fehler
    pub fn intern(msg: impl Into<String>) -> Self {
        Self::Intern(msg.into())
    }

    /// Erstellt einen Protokollfehler
    pub fn protokoll(msg: impl Into<String>) -> Self {
        Self::Protokoll(msg.into())
    }

    /// Regulaeres Verbindungsende (kein Warn-Log noetig)
    pub fn ist_regulaer(&self) -> bool {
        matches!(self, Self::VerbindungGetrennt | Self::Shutdown | Self::Ersetzt)
    }
}

/// Result-Typ fuer den Signaling-Service
pub type SignalingResult<T> = Result<T, SignalingError>;
