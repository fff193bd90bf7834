//! Verbindung zum Session Coordinator
//!
//! `SignalTransport` ist die Sendeseite, die die Call State Machine sieht.
//! Eingehende Nachrichten kommen als `TransportEvent` ueber einen eigenen
//! Receiver in die Maschine.
//!
//! `CoordinatorClient` implementiert beides ueber TCP mit dem gemeinsamen
//! `FrameCodec`:
//!
//! ```text
//! CallMachine --send()--> mpsc --> Verbindungs-Task --Frame--> Coordinator
//! CallMachine <--TransportEvent-- Verbindungs-Task <--Frame-- Coordinator
//! ```
//!
//! Die ausgehende Queue ist unbegrenzt: `send()` darf die Maschine nie
//! blockieren, solange der Verbindungs-Task selbst auf die Event-Queue der
//! Maschine wartet.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parley_core::types::{ChannelId, UserId};
use parley_protocol::control::{
    ChannelJoinRequest, ChannelLeaveRequest, ControlMessage, ControlPayload, MemberInfo,
};
use parley_protocol::signal::Signal;
use parley_protocol::wire::{read_frame, write_frame, DEFAULT_MAX_FRAME_SIZE};
use parley_protocol::FrameCodec;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::Framed;

use crate::error::{CallError, CallResult};

/// Wie lange auf die `HelloResponse` gewartet wird
const HELLO_TIMEOUT: Duration = Duration::from_secs(10);

/// Groesse der Event-Queue vom Verbindungs-Task zur Maschine
const EVENT_QUEUE_GROESSE: usize = 64;

/// Eingehendes Ereignis vom Coordinator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Geroutetes Signal eines anderen Teilnehmers
    Signal { from: UserId, signal: Signal },
    /// Mitglieder-Snapshot nach eigenem Beitritt (ohne sich selbst)
    ChannelSnapshot {
        channel_id: ChannelId,
        members: Vec<MemberInfo>,
    },
    MemberJoined {
        channel_id: ChannelId,
        member: MemberInfo,
    },
    MemberLeft {
        channel_id: ChannelId,
        user_id: UserId,
    },
    /// Verbindung zum Coordinator verloren
    Lost,
}

/// Sendeseite zum Coordinator
#[async_trait]
pub trait SignalTransport: Send + Sync + 'static {
    /// Signal an einen anderen Teilnehmer (fire-and-forget)
    async fn send(&self, target: &UserId, signal: Signal) -> CallResult<()>;

    async fn join_channel(&self, channel_id: &ChannelId) -> CallResult<()>;

    async fn leave_channel(&self, channel_id: &ChannelId) -> CallResult<()>;
}

/// TCP-Client zum Session Coordinator
#[derive(Clone)]
pub struct CoordinatorClient {
    user_id: UserId,
    ausgehend: mpsc::UnboundedSender<ControlMessage>,
    naechste_request_id: Arc<AtomicU32>,
}

impl CoordinatorClient {
    /// Verbindet, identifiziert sich per `Hello` und startet den
    /// Verbindungs-Task
    pub async fn verbinden(
        addr: SocketAddr,
        user_id: UserId,
        display_name: impl Into<String>,
    ) -> CallResult<(Self, mpsc::Receiver<TransportEvent>)> {
        let mut stream = TcpStream::connect(addr)
            .await
            .map_err(|e| CallError::transport(format!("Verbindung zu {addr}: {e}")))?;

        // Hello-Handshake direkt auf dem Socket, danach uebernimmt der Codec
        let hello = ControlMessage::hello(1, user_id.clone(), display_name);
        write_frame(&mut stream, &hello, DEFAULT_MAX_FRAME_SIZE)
            .await
            .map_err(|e| CallError::transport(e.to_string()))?;

        let antwort = tokio::time::timeout(
            HELLO_TIMEOUT,
            read_frame(&mut stream, DEFAULT_MAX_FRAME_SIZE),
        )
        .await
        .map_err(|_| CallError::transport("Keine Antwort auf Hello"))?;
        match antwort {
            Ok(ControlMessage {
                payload: ControlPayload::HelloResponse(r),
                ..
            }) => {
                tracing::info!(user_id = %r.user_id, server = %r.server_name, "Beim Coordinator angemeldet");
            }
            Ok(ControlMessage {
                payload: ControlPayload::Error(e),
                ..
            }) => {
                return Err(CallError::transport(format!(
                    "Hello abgelehnt ({:?}): {}",
                    e.code, e.message
                )));
            }
            Ok(andere) => {
                return Err(CallError::transport(format!(
                    "Unerwartete Antwort auf Hello: {}",
                    andere.payload.art()
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Err(CallError::transport("Verbindung vor Hello-Antwort geschlossen"));
            }
            Err(e) => return Err(CallError::transport(e.to_string())),
        }
        let framed = Framed::new(stream, FrameCodec::new());

        let (ausgehend_tx, ausgehend_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE_GROESSE);
        tokio::spawn(verbindung_betreiben(
            framed,
            ausgehend_rx,
            event_tx,
            user_id.clone(),
        ));

        Ok((
            Self {
                user_id,
                ausgehend: ausgehend_tx,
                naechste_request_id: Arc::new(AtomicU32::new(2)),
            },
            event_rx,
        ))
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    fn request_id(&self) -> u32 {
        self.naechste_request_id.fetch_add(1, Ordering::Relaxed)
    }

    fn senden(&self, nachricht: ControlMessage) -> CallResult<()> {
        self.ausgehend
            .send(nachricht)
            .map_err(|_| CallError::transport("Verbindung zum Coordinator geschlossen"))
    }
}

#[async_trait]
impl SignalTransport for CoordinatorClient {
    async fn send(&self, target: &UserId, signal: Signal) -> CallResult<()> {
        let nachricht = ControlMessage::signal(self.request_id(), target.clone(), signal);
        self.senden(nachricht)
    }

    async fn join_channel(&self, channel_id: &ChannelId) -> CallResult<()> {
        let nachricht = ControlMessage::new(
            self.request_id(),
            ControlPayload::ChannelJoin(ChannelJoinRequest {
                channel_id: channel_id.clone(),
            }),
        );
        self.senden(nachricht)
    }

    async fn leave_channel(&self, channel_id: &ChannelId) -> CallResult<()> {
        let nachricht = ControlMessage::new(
            self.request_id(),
            ControlPayload::ChannelLeave(ChannelLeaveRequest {
                channel_id: channel_id.clone(),
            }),
        );
        self.senden(nachricht)
    }
}

/// Verbindungs-Task: schreibt ausgehende Frames, uebersetzt eingehende in
/// `TransportEvent`s und beantwortet Server-Pings
async fn verbindung_betreiben(
    mut framed: Framed<TcpStream, FrameCodec>,
    mut ausgehend: mpsc::UnboundedReceiver<ControlMessage>,
    events: mpsc::Sender<TransportEvent>,
    user_id: UserId,
) {
    loop {
        tokio::select! {
            nachricht = ausgehend.recv() => {
                // Alle Client-Handles weg: sauber beenden
                let Some(nachricht) = nachricht else { break };
                if let Err(e) = framed.send(nachricht).await {
                    tracing::warn!(user_id = %user_id, fehler = %e, "Senden an Coordinator fehlgeschlagen");
                    let _ = events.send(TransportEvent::Lost).await;
                    break;
                }
            }

            frame = framed.next() => {
                let nachricht = match frame {
                    Some(Ok(n)) => n,
                    Some(Err(e)) => {
                        tracing::warn!(user_id = %user_id, fehler = %e, "Ungueltiger Frame vom Coordinator");
                        let _ = events.send(TransportEvent::Lost).await;
                        break;
                    }
                    None => {
                        tracing::info!(user_id = %user_id, "Coordinator hat die Verbindung geschlossen");
                        let _ = events.send(TransportEvent::Lost).await;
                        break;
                    }
                };

                if let ControlPayload::Ping(ping) = &nachricht.payload {
                    let pong = ControlMessage::pong(
                        nachricht.request_id,
                        ping.timestamp_ms,
                        chrono::Utc::now().timestamp_millis().max(0) as u64,
                    );
                    if framed.send(pong).await.is_err() {
                        let _ = events.send(TransportEvent::Lost).await;
                        break;
                    }
                    continue;
                }

                let Some(event) = uebersetzen(nachricht, &user_id) else { continue };
                if events.send(event).await.is_err() {
                    // Maschine gestoppt
                    break;
                }
            }
        }
    }
    tracing::debug!(user_id = %user_id, "Coordinator-Verbindung beendet");
}

/// Coordinator-Nachricht -> TransportEvent (None fuer rein technische)
fn uebersetzen(nachricht: ControlMessage, user_id: &UserId) -> Option<TransportEvent> {
    match nachricht.payload {
        ControlPayload::SignalDelivery(d) => Some(TransportEvent::Signal {
            from: d.from,
            signal: d.signal,
        }),
        ControlPayload::ChannelJoinResponse(r) => Some(TransportEvent::ChannelSnapshot {
            channel_id: r.channel_id,
            members: r.members,
        }),
        ControlPayload::MemberJoined(n) => Some(TransportEvent::MemberJoined {
            channel_id: n.channel_id,
            member: n.member,
        }),
        ControlPayload::MemberLeft(n) => Some(TransportEvent::MemberLeft {
            channel_id: n.channel_id,
            user_id: n.user_id,
        }),
        ControlPayload::Error(e) => {
            tracing::warn!(user_id = %user_id, code = ?e.code, message = %e.message, "Fehler vom Coordinator");
            None
        }
        ControlPayload::Pong(_) => None,
        andere => {
            tracing::debug!(user_id = %user_id, art = andere.art(), "Unerwartete Nachricht vom Coordinator");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::types::CallId;
    use parley_protocol::control::{MemberJoinedNotice, SignalDelivery};

    #[test]
    fn zustellung_wird_zu_signal_event() {
        let call_id = CallId::new();
        let event = uebersetzen(
            ControlMessage::notice(ControlPayload::SignalDelivery(SignalDelivery {
                from: UserId::from("bob"),
                signal: Signal::CallAccepted { call_id },
            })),
            &UserId::from("alice"),
        );
        assert_eq!(
            event,
            Some(TransportEvent::Signal {
                from: UserId::from("bob"),
                signal: Signal::CallAccepted { call_id },
            })
        );
    }

    #[test]
    fn channel_notices_werden_uebersetzt() {
        let event = uebersetzen(
            ControlMessage::notice(ControlPayload::MemberJoined(MemberJoinedNotice {
                channel_id: ChannelId::from("general"),
                member: MemberInfo {
                    user_id: UserId::from("carol"),
                    display_name: "Carol".into(),
                },
            })),
            &UserId::from("alice"),
        );
        assert!(matches!(
            event,
            Some(TransportEvent::MemberJoined { ref member, .. }) if member.user_id == UserId::from("carol")
        ));
    }

    #[test]
    fn fehler_und_pong_erzeugen_kein_event() {
        let uid = UserId::from("alice");
        assert!(uebersetzen(ControlMessage::pong(1, 2, 3), &uid).is_none());
        assert!(uebersetzen(
            ControlMessage::error(
                1,
                parley_protocol::control::ErrorCode::InvalidRequest,
                "nope"
            ),
            &uid
        )
        .is_none());
    }
}
