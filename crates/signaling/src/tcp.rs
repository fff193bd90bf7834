//! TCP-Listener – Bindet Socket, akzeptiert Verbindungen
//!
//! Der `SignalingServer` bindet einen TCP-Socket und startet fuer jede
//! eingehende Verbindung einen eigenen tokio-Task mit einer
//! `ClientConnection`. Binden und Starten sind getrennt, damit Aufrufer mit
//! Port 0 binden und die tatsaechliche Adresse abfragen koennen.

use parley_protocol::control::{ControlMessage, ErrorCode};
use parley_protocol::wire::{write_frame, DEFAULT_MAX_FRAME_SIZE};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

use crate::connection::ClientConnection;
use crate::error::{SignalingError, SignalingResult};
use crate::server_state::SignalingState;

/// TCP-Signaling-Server (Session Coordinator)
pub struct SignalingServer {
    state: Arc<SignalingState>,
    listener: TcpListener,
}

impl SignalingServer {
    /// Bindet den TCP-Socket
    pub async fn binden(state: Arc<SignalingState>, bind_addr: SocketAddr) -> SignalingResult<Self> {
        let listener = TcpListener::bind(bind_addr).await?;
        Ok(Self { state, listener })
    }

    /// Tatsaechlich gebundene Adresse
    pub fn lokale_adresse(&self) -> SignalingResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn state(&self) -> &Arc<SignalingState> {
        &self.state
    }

    /// Akzeptiert Verbindungen bis `shutdown_rx` auf `true` wechselt
    ///
    /// Laufende Verbindungs-Tasks bekommen dasselbe Signal und beenden sich
    /// selbst.
    pub async fn starten(self, mut shutdown_rx: watch::Receiver<bool>) -> SignalingResult<()> {
        let lokale_addr = self.lokale_adresse()?;
        tracing::info!(adresse = %lokale_addr, "TCP Signaling-Server gestartet");

        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => self.annehmen(stream, peer_addr, &shutdown_rx),
                        Err(e) => {
                            tracing::error!(fehler = %e, "TCP-Accept-Fehler");
                            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                        }
                    }
                }

                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        tracing::info!("Signaling-Server: Shutdown-Signal empfangen");
                        break;
                    }
                }
            }
        }

        tracing::info!("TCP Signaling-Server gestoppt");
        Ok(())
    }

    fn annehmen(&self, stream: TcpStream, peer_addr: SocketAddr, shutdown_rx: &watch::Receiver<bool>) {
        let Some(ticket) = self.state.verbindung_annehmen() else {
            tracing::warn!(
                peer = %peer_addr,
                max = self.state.config.max_clients,
                "Server voll, Verbindung abgelehnt"
            );
            tokio::spawn(ablehnen(stream, peer_addr));
            return;
        };

        tracing::debug!(peer = %peer_addr, verbindung_id = ticket.id, "Verbindung akzeptiert");
        let verbindung = ClientConnection::neu(Arc::clone(&self.state), peer_addr, ticket);
        let shutdown_rx = shutdown_rx.clone();
        tokio::spawn(async move {
            verbindung.verarbeiten(stream, shutdown_rx).await;
        });
    }
}

/// Schickt `SERVER_FULL` und schliesst die Verbindung
async fn ablehnen(mut stream: TcpStream, peer_addr: SocketAddr) {
    let antwort = ControlMessage::error(0, ErrorCode::ServerFull, SignalingError::ServerVoll.to_string());
    if let Err(e) = write_frame(&mut stream, &antwort, DEFAULT_MAX_FRAME_SIZE).await {
        tracing::debug!(peer = %peer_addr, fehler = %e, "Ablehnung konnte nicht gesendet werden");
    }
}
