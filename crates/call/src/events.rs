//! Ereignisse an die UI
//!
//! Die UI rendert nur, was hier ankommt. Sie haelt keinen eigenen
//! Anrufzustand.

use parley_core::types::UserId;

use crate::table::CallPhase;

/// Zustandsmeldung der Call State Machine an die UI
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiEvent {
    /// Neue Phase des 1:1-Anrufs
    PhaseChanged(CallPhase),
    /// Statuszeile, z.B. "Calling bob..."
    StatusText(String),
    /// Eingehender-Anruf-Dialog anzeigen oder ausblenden
    IncomingCallPrompt {
        visible: bool,
        caller_name: Option<String>,
    },
    /// Sprach-Oberflaeche ein- oder ausblenden
    CallUiVisible(bool),
    ParticipantAdded {
        user_id: UserId,
        display_name: String,
    },
    ParticipantRemoved {
        user_id: UserId,
    },
    MuteChanged {
        muted: bool,
    },
    SpeakerChanged {
        enabled: bool,
    },
}

impl UiEvent {
    pub(crate) fn status(text: impl Into<String>) -> Self {
        Self::StatusText(text.into())
    }
}
