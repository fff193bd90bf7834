//! Identity-Handler – Hello
//!
//! Der Coordinator authentifiziert nicht: die `UserId` kommt opak vom
//! Client und wird nur an die Verbindung gebunden.

use parley_protocol::control::{ControlMessage, ControlPayload, ErrorCode, HelloRequest, HelloResponse};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::server_state::SignalingState;

/// Ergebnis eines Hello
pub struct Anmeldung {
    pub antwort: ControlMessage,
    /// Send-Queue der Verbindung (None wenn abgelehnt)
    pub queue: Option<mpsc::Receiver<ControlMessage>>,
}

/// Verarbeitet ein Hello und registriert die Send-Queue der Verbindung
pub fn handle_hello(
    request: HelloRequest,
    request_id: u32,
    verbindung_id: u64,
    state: &Arc<SignalingState>,
) -> Anmeldung {
    if request.user_id.as_str().trim().is_empty() {
        return Anmeldung {
            antwort: ControlMessage::error(request_id, ErrorCode::InvalidRequest, "Leere User-ID"),
            queue: None,
        };
    }

    let user_id = request.user_id;
    let display_name = if request.display_name.trim().is_empty() {
        user_id.to_string()
    } else {
        request.display_name
    };

    // Neuanmeldung: die alte Verbindung verliert ihre Channels sofort, ihr
    // eigenes Cleanup greift nach dem Ersetzen nicht mehr
    if state.broadcaster.ist_registriert(&user_id) {
        let verlassen = state.presence.client_getrennt(&user_id, &state.broadcaster);
        if let Some(m) = &state.metriken {
            m.channel_leaves_total.inc_by(verlassen.len() as u64);
        }
        tracing::info!(
            user_id = %user_id,
            channels = verlassen.len(),
            "Neuanmeldung, Channels der alten Verbindung verlassen"
        );
    }

    let queue = state
        .broadcaster
        .client_registrieren(user_id.clone(), verbindung_id);
    state.presence.client_verbunden(user_id.clone(), display_name);
    state.gauges_aktualisieren();

    tracing::debug!(user_id = %user_id, verbindung_id, "Verbindung identifiziert");

    Anmeldung {
        antwort: ControlMessage::new(
            request_id,
            ControlPayload::HelloResponse(HelloResponse {
                user_id,
                server_name: state.config.server_name.clone(),
            }),
        ),
        queue: Some(queue),
    }
}
