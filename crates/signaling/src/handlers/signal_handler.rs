//! Signal-Handler – routet Peer-Signale
//!
//! Fire-and-forget: das Signal wird unveraendert und mit dem Absender
//! gestempelt an die Queue des Empfaengers gehaengt. Ist der Empfaenger
//! nicht verbunden, wird es verworfen; der Absender erfaehrt davon nichts.
//! Channel-Signale laufen nur zwischen aktuellen Mitgliedern des Channels.

use parley_core::types::UserId;
use parley_protocol::control::{ControlMessage, ControlPayload, SignalDelivery, SignalRequest};
use parley_protocol::signal::NegotiationScope;
use std::sync::Arc;

use crate::broadcast::Zustellung;
use crate::server_state::SignalingState;

/// Leitet ein Signal von `from` an `request.target` weiter
pub fn handle_signal(
    request: SignalRequest,
    from: &UserId,
    state: &Arc<SignalingState>,
) -> Zustellung {
    let art = request.signal.art();

    if &request.target == from {
        tracing::debug!(user_id = %from, art, "Signal an sich selbst verworfen");
        if let Some(m) = &state.metriken {
            m.signal_verworfen("self_addressed");
        }
        return Zustellung::Unbekannt;
    }

    if let Some(NegotiationScope::Channel { channel_id }) = request.signal.scope() {
        let mitglieder = state.presence.user_ids_in_channel(channel_id);
        if !mitglieder.contains(from) || !mitglieder.contains(&request.target) {
            tracing::debug!(
                from = %from,
                target = %request.target,
                channel_id = %channel_id,
                art,
                "Channel-Signal ausserhalb des Channels verworfen"
            );
            if let Some(m) = &state.metriken {
                m.signal_verworfen(Zustellung::KeinMitglied.grund());
            }
            return Zustellung::KeinMitglied;
        }
    }

    let zustellung = ControlMessage::notice(ControlPayload::SignalDelivery(SignalDelivery {
        from: from.clone(),
        signal: request.signal,
    }));
    let ergebnis = state.broadcaster.an_user_senden(&request.target, zustellung);

    match ergebnis {
        Zustellung::Eingereiht => {
            tracing::trace!(from = %from, target = %request.target, art, "Signal weitergeleitet");
            if let Some(m) = &state.metriken {
                m.signal_weitergeleitet(art);
            }
        }
        verworfen => {
            tracing::debug!(
                from = %from,
                target = %request.target,
                art,
                grund = verworfen.grund(),
                "Signal verworfen"
            );
            if let Some(m) = &state.metriken {
                m.signal_verworfen(verworfen.grund());
            }
        }
    }
    ergebnis
}
