//! Client-Connection – Verwaltet eine einzelne TCP-Verbindung
//!
//! Jede TCP-Verbindung bekommt eine `ClientConnection` in einem eigenen
//! tokio-Task.
//!
//! ## Ablauf
//! ```text
//! Verbunden --Hello--> Identifiziert --EOF/Timeout/Ersetzt/Shutdown--> Cleanup
//! ```
//!
//! ## Keepalive
//! - Server sendet alle `keepalive_sek` einen Ping
//! - Kommt `verbindungs_timeout_sek` lang kein Frame, wird getrennt
//!
//! Nach dem Hello gibt es zwei Wege zum Client: direkte Antworten des
//! Dispatchers werden sofort geschrieben, alles andere kommt ueber die
//! Send-Queue aus dem Broadcaster.

use futures_util::{SinkExt, StreamExt};
use parley_protocol::control::{ControlMessage, ErrorCode};
use parley_protocol::wire::FrameCodec;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::codec::Framed;

use crate::dispatcher::{DispatcherContext, MessageDispatcher};
use crate::error::{SignalingError, SignalingResult};
use crate::server_state::{SignalingState, VerbindungsTicket};

type ClientFramed = Framed<TcpStream, FrameCodec>;

/// Verarbeitet eine einzelne TCP-Verbindung
pub struct ClientConnection {
    state: Arc<SignalingState>,
    peer_addr: SocketAddr,
    ticket: VerbindungsTicket,
}

impl ClientConnection {
    pub fn neu(state: Arc<SignalingState>, peer_addr: SocketAddr, ticket: VerbindungsTicket) -> Self {
        Self {
            state,
            peer_addr,
            ticket,
        }
    }

    /// Laeuft bis die Verbindung endet, danach werden Queue-Registrierung
    /// und Channel-Mitgliedschaften aufgeraeumt
    pub async fn verarbeiten(self, stream: TcpStream, mut shutdown_rx: watch::Receiver<bool>) {
        let peer_addr = self.peer_addr;
        tracing::info!(peer = %peer_addr, verbindung_id = self.ticket.id, "Neue Verbindung");

        let mut framed = Framed::new(stream, FrameCodec::new());
        let dispatcher = MessageDispatcher::neu(Arc::clone(&self.state));
        let mut ctx = DispatcherContext::neu(peer_addr, self.ticket.id);

        match self
            .schleife(&mut framed, &dispatcher, &mut ctx, &mut shutdown_rx)
            .await
        {
            Ok(()) => tracing::info!(peer = %peer_addr, "Verbindung beendet"),
            Err(e) if e.ist_regulaer() => {
                tracing::info!(peer = %peer_addr, grund = %e, "Verbindung beendet")
            }
            Err(e) => tracing::warn!(peer = %peer_addr, fehler = %e, "Verbindung abgebrochen"),
        }

        if let Some(user_id) = ctx.user_id.take() {
            dispatcher.client_cleanup(&user_id, ctx.verbindung_id);
        }
        tracing::debug!(peer = %peer_addr, "Verbindungs-Task beendet");
    }

    async fn schleife(
        &self,
        framed: &mut ClientFramed,
        dispatcher: &MessageDispatcher,
        ctx: &mut DispatcherContext,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> SignalingResult<()> {
        let keepalive = Duration::from_secs(self.state.config.keepalive_sek.max(1));
        let timeout = Duration::from_secs(self.state.config.verbindungs_timeout_sek.max(1));

        let mut ping_takt = tokio::time::interval_at(Instant::now() + keepalive, keepalive);
        ping_takt.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut ping_request_id: u32 = 0;

        let frist = tokio::time::sleep(timeout);
        tokio::pin!(frist);

        loop {
            tokio::select! {
                frame = framed.next() => {
                    let nachricht = match frame {
                        Some(Ok(n)) => n,
                        Some(Err(e)) => return Err(e.into()),
                        None => return Ok(()),
                    };
                    frist.as_mut().reset(Instant::now() + timeout);
                    tracing::trace!(
                        peer = %ctx.peer_addr,
                        request_id = nachricht.request_id,
                        art = nachricht.payload.art(),
                        "Nachricht empfangen"
                    );

                    if let Some(antwort) = dispatcher.dispatch(nachricht, ctx) {
                        framed.send(antwort).await?;
                    }
                }

                ausgehend = naechste_ausgehende(&mut ctx.queue) => {
                    match ausgehend {
                        Some(nachricht) => framed.send(nachricht).await?,
                        None => {
                            // Broadcaster hat die Queue fallen lassen: neuere Verbindung
                            let _ = framed
                                .send(ControlMessage::error(
                                    0,
                                    ErrorCode::AlreadyIdentified,
                                    "Identitaet wurde von einer neueren Verbindung uebernommen",
                                ))
                                .await;
                            ctx.queue = None;
                            return Err(SignalingError::Ersetzt);
                        }
                    }
                }

                _ = ping_takt.tick() => {
                    ping_request_id = ping_request_id.wrapping_add(1);
                    let ts = chrono::Utc::now().timestamp_millis().max(0) as u64;
                    framed.send(ControlMessage::ping(ping_request_id, ts)).await?;
                }

                _ = &mut frist => {
                    return Err(SignalingError::Timeout);
                }

                Ok(()) = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        let _ = framed
                            .send(ControlMessage::error(
                                0,
                                ErrorCode::InternalError,
                                "Server wird heruntergefahren",
                            ))
                            .await;
                        return Err(SignalingError::Shutdown);
                    }
                }
            }
        }
    }
}

/// Naechste Nachricht aus der Send-Queue; ohne Queue (vor dem Hello)
/// wartet der Branch fuer immer
async fn naechste_ausgehende(
    queue: &mut Option<mpsc::Receiver<ControlMessage>>,
) -> Option<ControlMessage> {
    match queue {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
