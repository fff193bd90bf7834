//! Signaling-Nachrichten zwischen zwei Teilnehmern
//!
//! Ein `Signal` wird vom Coordinator unveraendert vom Sender zum Empfaenger
//! weitergeleitet. Der Coordinator interpretiert den Inhalt nicht; nur die
//! Call State Machines der beiden Seiten tun das.
//!
//! ## Ablauf eines 1:1-Anrufs
//! ```text
//! A                         Coordinator                        B
//! | -- CallRequest ------------> | -- CallRequest ------------> |
//! | <-- CallAccepted ----------- | <-- CallAccepted ----------- |
//! | <-- SessionOffer ----------- | <-- SessionOffer ----------- |
//! | -- SessionAnswer ----------> | -- SessionAnswer ----------> |
//! | <-> NetworkCandidate ...     |                              |
//! | -- CallEnded --------------> | -- CallEnded --------------> |
//! ```

use parley_core::types::{CallId, ChannelId};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Session-Beschreibungen
// ---------------------------------------------------------------------------

/// Art einer Session-Beschreibung
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SdpType {
    Offer,
    Answer,
}

/// Session-Beschreibung (opak fuer den Kern, erzeugt vom Media-Backend)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    /// Erstellt ein Angebot
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    /// Erstellt eine Antwort
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// Netzwerk-Kandidat (ICE) fuer eine Peer-Verbindung
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkCandidate {
    pub candidate: String,
    pub sdp_mid: Option<String>,
    pub sdp_m_line_index: Option<u16>,
}

impl NetworkCandidate {
    /// Kandidat ohne Media-Zuordnung
    pub fn neu(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_m_line_index: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Geltungsbereich der Aushandlung
// ---------------------------------------------------------------------------

/// Wozu eine Offer/Answer/Candidate-Nachricht gehoert
///
/// 1:1-Anrufe und Voice-Channels nutzen dieselbe Aushandlung; der Scope
/// trennt beide, damit ein Kandidat fuer den Channel nie in einen laufenden
/// Anruf geraet und umgekehrt.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NegotiationScope {
    Call { call_id: CallId },
    Channel { channel_id: ChannelId },
}

// ---------------------------------------------------------------------------
// Ablehnungsgruende
// ---------------------------------------------------------------------------

/// Grund fuer ein `CallRejected`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// Angerufener hat abgelehnt
    Declined,
    /// Angerufener ist bereits in einem Anruf
    Busy,
    /// Angerufener konnte kein Mikrofon oeffnen
    MediaUnavailable,
}

impl Default for RejectReason {
    fn default() -> Self {
        Self::Declined
    }
}

// ---------------------------------------------------------------------------
// Signal
// ---------------------------------------------------------------------------

/// Alle Peer-zu-Peer Signaling-Nachrichten
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "signal", rename_all = "snake_case")]
pub enum Signal {
    CallRequest {
        call_id: CallId,
        caller_name: String,
    },
    CallAccepted {
        call_id: CallId,
    },
    CallRejected {
        call_id: CallId,
        #[serde(default)]
        reason: RejectReason,
    },
    CallEnded {
        call_id: CallId,
    },
    SessionOffer {
        scope: NegotiationScope,
        description: SessionDescription,
    },
    SessionAnswer {
        scope: NegotiationScope,
        description: SessionDescription,
    },
    NetworkCandidate {
        scope: NegotiationScope,
        candidate: NetworkCandidate,
    },
}

impl Signal {
    /// Kurzname fuer Logs und Metriken
    pub fn art(&self) -> &'static str {
        match self {
            Signal::CallRequest { .. } => "call_request",
            Signal::CallAccepted { .. } => "call_accepted",
            Signal::CallRejected { .. } => "call_rejected",
            Signal::CallEnded { .. } => "call_ended",
            Signal::SessionOffer { .. } => "session_offer",
            Signal::SessionAnswer { .. } => "session_answer",
            Signal::NetworkCandidate { .. } => "network_candidate",
        }
    }

    /// Scope einer Aushandlungs-Nachricht (None fuer Anrufsteuerung)
    pub fn scope(&self) -> Option<&NegotiationScope> {
        match self {
            Signal::SessionOffer { scope, .. }
            | Signal::SessionAnswer { scope, .. }
            | Signal::NetworkCandidate { scope, .. } => Some(scope),
            _ => None,
        }
    }

    /// Anruf-ID, falls die Nachricht zu einem 1:1-Anruf gehoert
    pub fn call_id(&self) -> Option<CallId> {
        match self {
            Signal::CallRequest { call_id, .. }
            | Signal::CallAccepted { call_id }
            | Signal::CallRejected { call_id, .. }
            | Signal::CallEnded { call_id } => Some(*call_id),
            other => match other.scope() {
                Some(NegotiationScope::Call { call_id }) => Some(*call_id),
                _ => None,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
