//! Message-Dispatcher – Routet ControlMessages an die richtigen Handler
//!
//! ## Zustandspruefung
//! - `Hello`, `Ping` und `Pong` sind immer erlaubt
//! - Alles andere erst nach einem erfolgreichen `Hello`, sonst
//!   `NOT_IDENTIFIED`
//! - Ein zweites `Hello` auf derselben Verbindung gibt `ALREADY_IDENTIFIED`

use parley_core::types::UserId;
use parley_protocol::control::{ControlMessage, ControlPayload, ErrorCode};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::handlers::{channel_handler, identity_handler, signal_handler};
use crate::server_state::SignalingState;

/// Dispatcher-Kontext – Informationen ueber die aktuelle Verbindung
pub struct DispatcherContext {
    pub peer_addr: SocketAddr,
    /// Eindeutige ID dieser TCP-Verbindung
    pub verbindung_id: u64,
    /// Gebundene Identitaet (None vor dem Hello)
    pub user_id: Option<UserId>,
    /// Send-Queue aus dem Broadcaster, wird nach dem Hello gesetzt
    pub queue: Option<mpsc::Receiver<ControlMessage>>,
}

impl DispatcherContext {
    pub fn neu(peer_addr: SocketAddr, verbindung_id: u64) -> Self {
        Self {
            peer_addr,
            verbindung_id,
            user_id: None,
            queue: None,
        }
    }
}

/// Zentraler Message-Dispatcher
pub struct MessageDispatcher {
    state: Arc<SignalingState>,
}

impl MessageDispatcher {
    pub fn neu(state: Arc<SignalingState>) -> Self {
        Self { state }
    }

    /// Verarbeitet eine eingehende ControlMessage
    ///
    /// Gibt `None` zurueck wenn keine direkte Antwort gesendet wird
    /// (gerouteten Signale, Leave, Pong).
    pub fn dispatch(
        &self,
        message: ControlMessage,
        ctx: &mut DispatcherContext,
    ) -> Option<ControlMessage> {
        let request_id = message.request_id;

        match message.payload {
            ControlPayload::Hello(req) => {
                if ctx.user_id.is_some() {
                    return Some(ControlMessage::error(
                        request_id,
                        ErrorCode::AlreadyIdentified,
                        "Verbindung ist bereits identifiziert",
                    ));
                }

                let user_id = req.user_id.clone();
                let anmeldung =
                    identity_handler::handle_hello(req, request_id, ctx.verbindung_id, &self.state);
                if anmeldung.queue.is_some() {
                    ctx.user_id = Some(user_id);
                    ctx.queue = anmeldung.queue;
                }
                Some(anmeldung.antwort)
            }

            ControlPayload::Ping(ping) => Some(ControlMessage::pong(
                request_id,
                ping.timestamp_ms,
                chrono::Utc::now().timestamp_millis().max(0) as u64,
            )),

            ControlPayload::Pong(_) => {
                tracing::trace!(peer = %ctx.peer_addr, "Pong empfangen");
                None
            }

            payload => {
                let Some(user_id) = ctx.user_id.clone() else {
                    tracing::debug!(
                        peer = %ctx.peer_addr,
                        art = payload.art(),
                        "Nachricht vor Hello abgelehnt"
                    );
                    return Some(ControlMessage::error(
                        request_id,
                        ErrorCode::NotIdentified,
                        "Nicht identifiziert, bitte zuerst Hello senden",
                    ));
                };
                self.dispatch_identifiziert(payload, request_id, &user_id)
            }
        }
    }

    /// Routet Nachrichten die eine Identitaet erfordern
    fn dispatch_identifiziert(
        &self,
        payload: ControlPayload,
        request_id: u32,
        user_id: &UserId,
    ) -> Option<ControlMessage> {
        match payload {
            ControlPayload::Signal(req) => {
                signal_handler::handle_signal(req, user_id, &self.state);
                None
            }

            ControlPayload::ChannelJoin(req) => Some(channel_handler::handle_channel_join(
                req,
                request_id,
                user_id,
                &self.state,
            )),

            ControlPayload::ChannelLeave(req) => {
                channel_handler::handle_channel_leave(req, user_id, &self.state);
                None
            }

            ControlPayload::Error(e) => {
                tracing::warn!(user_id = %user_id, code = ?e.code, message = %e.message, "Fehlermeldung vom Client");
                None
            }

            // Coordinator -> Client Nachrichten
            ControlPayload::HelloResponse(_)
            | ControlPayload::SignalDelivery(_)
            | ControlPayload::ChannelJoinResponse(_)
            | ControlPayload::MemberJoined(_)
            | ControlPayload::MemberLeft(_) => {
                tracing::warn!(
                    user_id = %user_id,
                    request_id,
                    "Unerwartete Server->Client Nachricht vom Client empfangen"
                );
                Some(ControlMessage::error(
                    request_id,
                    ErrorCode::InvalidRequest,
                    "Unerwartete Nachricht",
                ))
            }

            // Werden in `dispatch` behandelt
            ControlPayload::Hello(_) | ControlPayload::Ping(_) | ControlPayload::Pong(_) => None,
        }
    }

    /// Bereinigt alle Ressourcen eines Clients beim Trennen
    ///
    /// Wurde die Verbindung inzwischen durch eine neuere desselben Benutzers
    /// ersetzt, bleibt alles unangetastet.
    pub fn client_cleanup(&self, user_id: &UserId, verbindung_id: u64) {
        if !self.state.broadcaster.client_entfernen(user_id, verbindung_id) {
            tracing::debug!(user_id = %user_id, verbindung_id, "Verbindung war ersetzt, kein Cleanup");
            return;
        }

        let verlassen = self
            .state
            .presence
            .client_getrennt(user_id, &self.state.broadcaster);
        if let Some(m) = &self.state.metriken {
            m.channel_leaves_total.inc_by(verlassen.len() as u64);
        }
        self.state.gauges_aktualisieren();

        tracing::debug!(user_id = %user_id, channels = verlassen.len(), "Client-Ressourcen bereinigt");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server_state::SignalingConfig;
    use parley_core::types::{CallId, ChannelId};
    use parley_protocol::signal::Signal;

    fn umgebung() -> (Arc<SignalingState>, MessageDispatcher) {
        let state = SignalingState::neu(SignalingConfig::default(), None);
        let dispatcher = MessageDispatcher::neu(Arc::clone(&state));
        (state, dispatcher)
    }

    fn kontext(id: u64) -> DispatcherContext {
        DispatcherContext::neu("127.0.0.1:40000".parse().unwrap(), id)
    }

    fn fehlercode(antwort: Option<ControlMessage>) -> Option<ErrorCode> {
        match antwort?.payload {
            ControlPayload::Error(e) => Some(e.code),
            _ => None,
        }
    }

    fn anmelden(dispatcher: &MessageDispatcher, ctx: &mut DispatcherContext, user: &str) {
        let antwort = dispatcher.dispatch(ControlMessage::hello(1, UserId::from(user), user), ctx);
        assert!(matches!(
            antwort.map(|m| m.payload),
            Some(ControlPayload::HelloResponse(_))
        ));
    }

    #[test]
    fn signal_vor_hello_gibt_not_identified() {
        let (_state, dispatcher) = umgebung();
        let mut ctx = kontext(1);

        let antwort = dispatcher.dispatch(
            ControlMessage::signal(
                4,
                UserId::from("bob"),
                Signal::CallEnded {
                    call_id: CallId::new(),
                },
            ),
            &mut ctx,
        );
        assert_eq!(fehlercode(antwort), Some(ErrorCode::NotIdentified));
    }

    #[test]
    fn ping_vor_hello_erlaubt() {
        let (_state, dispatcher) = umgebung();
        let mut ctx = kontext(1);

        let antwort = dispatcher
            .dispatch(ControlMessage::ping(9, 1234), &mut ctx)
            .expect("Pong erwartet");
        assert_eq!(antwort.request_id, 9);
        match antwort.payload {
            ControlPayload::Pong(p) => assert_eq!(p.echo_timestamp_ms, 1234),
            other => panic!("Erwartet Pong, erhalten: {other:?}"),
        }
    }

    #[test]
    fn zweites_hello_gibt_already_identified() {
        let (_state, dispatcher) = umgebung();
        let mut ctx = kontext(1);
        anmelden(&dispatcher, &mut ctx, "alice");

        let antwort =
            dispatcher.dispatch(ControlMessage::hello(2, UserId::from("mallory"), "M"), &mut ctx);
        assert_eq!(fehlercode(antwort), Some(ErrorCode::AlreadyIdentified));
        assert_eq!(ctx.user_id, Some(UserId::from("alice")));
    }

    #[test]
    fn signal_zwischen_zwei_verbindungen() {
        let (_state, dispatcher) = umgebung();
        let mut alice = kontext(1);
        let mut bob = kontext(2);
        anmelden(&dispatcher, &mut alice, "alice");
        anmelden(&dispatcher, &mut bob, "bob");

        let call_id = CallId::new();
        let antwort = dispatcher.dispatch(
            ControlMessage::signal(
                5,
                UserId::from("bob"),
                Signal::CallAccepted { call_id },
            ),
            &mut alice,
        );
        assert!(antwort.is_none(), "Routing ist fire-and-forget");

        let zugestellt = bob.queue.as_mut().unwrap().try_recv().unwrap();
        assert!(matches!(
            zugestellt.payload,
            ControlPayload::SignalDelivery(ref d) if d.from == UserId::from("alice")
        ));
    }

    #[test]
    fn client_nachricht_vom_typ_server_ist_invalid_request() {
        let (_state, dispatcher) = umgebung();
        let mut ctx = kontext(1);
        anmelden(&dispatcher, &mut ctx, "alice");

        let antwort = dispatcher.dispatch(
            ControlMessage::new(
                3,
                ControlPayload::MemberLeft(parley_protocol::control::MemberLeftNotice {
                    channel_id: ChannelId::from("general"),
                    user_id: UserId::from("bob"),
                }),
            ),
            &mut ctx,
        );
        assert_eq!(fehlercode(antwort), Some(ErrorCode::InvalidRequest));
    }

    #[test]
    fn cleanup_der_ersetzten_verbindung_laesst_channels_bestehen() {
        let (state, dispatcher) = umgebung();
        let mut alt = kontext(1);
        let mut neu = kontext(2);
        anmelden(&dispatcher, &mut alt, "alice");
        anmelden(&dispatcher, &mut neu, "alice");

        dispatcher.dispatch(
            ControlMessage::new(
                4,
                ControlPayload::ChannelJoin(parley_protocol::control::ChannelJoinRequest {
                    channel_id: ChannelId::from("general"),
                }),
            ),
            &mut neu,
        );

        dispatcher.client_cleanup(&UserId::from("alice"), alt.verbindung_id);
        assert!(state.broadcaster.ist_registriert(&UserId::from("alice")));
        assert_eq!(
            state.presence.user_ids_in_channel(&ChannelId::from("general")),
            vec![UserId::from("alice")]
        );

        dispatcher.client_cleanup(&UserId::from("alice"), neu.verbindung_id);
        assert!(!state.broadcaster.ist_registriert(&UserId::from("alice")));
        assert_eq!(state.presence.aktive_channels(), 0);
    }
}
