//! Channel-Handler – Join und Leave fuer Voice-Channels
//!
//! Die eigentliche Mitgliedschaftslogik liegt im `PresenceManager`; hier
//! werden Antworten gebaut und Metriken gepflegt.

use parley_core::types::UserId;
use parley_protocol::control::{
    ChannelJoinRequest, ChannelJoinResponse, ChannelLeaveRequest, ControlMessage, ControlPayload,
};
use std::sync::Arc;

use crate::server_state::SignalingState;

/// Verarbeitet einen Channel-Beitritt
///
/// Der Beitretende erhaelt den Mitglieder-Snapshot als direkte Antwort,
/// alle bisherigen Mitglieder ein `MemberJoined` ueber ihre Queues.
pub fn handle_channel_join(
    request: ChannelJoinRequest,
    request_id: u32,
    user_id: &UserId,
    state: &Arc<SignalingState>,
) -> ControlMessage {
    let channel_id = request.channel_id;
    let beitritt = state
        .presence
        .channel_beitreten(&channel_id, user_id, &state.broadcaster);

    if beitritt.neu {
        tracing::info!(
            user_id = %user_id,
            channel_id = %channel_id,
            mitglieder = beitritt.mitglieder.len() + 1,
            "Voice-Channel beigetreten"
        );
        if let Some(m) = &state.metriken {
            m.channel_joins_total.inc();
        }
        state.gauges_aktualisieren();
    }

    ControlMessage::new(
        request_id,
        ControlPayload::ChannelJoinResponse(ChannelJoinResponse {
            channel_id,
            members: beitritt.mitglieder,
        }),
    )
}

/// Verarbeitet das Verlassen eines Channels (keine Antwort)
pub fn handle_channel_leave(
    request: ChannelLeaveRequest,
    user_id: &UserId,
    state: &Arc<SignalingState>,
) {
    let channel_id = request.channel_id;
    match state
        .presence
        .channel_verlassen(&channel_id, user_id, &state.broadcaster)
    {
        Some(benachrichtigt) => {
            tracing::info!(
                user_id = %user_id,
                channel_id = %channel_id,
                benachrichtigt,
                "Voice-Channel verlassen"
            );
            if let Some(m) = &state.metriken {
                m.channel_leaves_total.inc();
            }
            state.gauges_aktualisieren();
        }
        None => {
            tracing::debug!(user_id = %user_id, channel_id = %channel_id, "Leave ohne Mitgliedschaft ignoriert");
        }
    }
}
