//! parley-server – Bibliotheks-Root
//!
//! Startet den Session Coordinator und den Observability-Server aus einer
//! `ServerConfig`. Der Einstiegspunkt ist getrennt von `main.rs`, damit
//! Integrationstests den Server mit eigenem Shutdown-Kanal starten koennen.

pub mod config;

use anyhow::{Context, Result};
use config::ServerConfig;
use parley_observability::{observability_server_starten, HealthState, ParleyMetrics};
use parley_signaling::{SignalingServer, SignalingState};
use std::net::SocketAddr;
use tokio::sync::watch;

/// Haelt den laufenden Server-Zustand zusammen
pub struct Server {
    pub config: ServerConfig,
}

impl Server {
    pub fn neu(config: ServerConfig) -> Self {
        Self { config }
    }

    /// Startet alle Subsysteme und laeuft, bis `shutdown_rx` `true` meldet
    ///
    /// Reihenfolge:
    /// 1. Metriken und Health-Zustand anlegen
    /// 2. Observability-Server starten (falls aktiviert)
    /// 3. TCP-Listener des Coordinators binden
    /// 4. Verbindungen annehmen bis zum Shutdown
    pub async fn starten(self, shutdown_rx: watch::Receiver<bool>) -> Result<()> {
        let tcp_addr: SocketAddr = self
            .config
            .tcp_bind_adresse()
            .parse()
            .context("Ungueltige TCP-Bind-Adresse")?;

        tracing::info!(
            server_name = %self.config.server.name,
            tcp = %tcp_addr,
            max_clients = self.config.server.max_clients,
            "Server startet"
        );

        let metriken = ParleyMetrics::neu().context("Metriken konnten nicht registriert werden")?;
        let health = HealthState::neu();

        let observability = if self.config.observability.aktiviert {
            let addr: SocketAddr = self
                .config
                .observability_bind_adresse()
                .parse()
                .context("Ungueltige Observability-Bind-Adresse")?;
            let metriken = metriken.clone();
            let health = health.clone();
            let rx = shutdown_rx.clone();
            Some(tokio::spawn(async move {
                if let Err(e) = observability_server_starten(addr, metriken, health, rx).await {
                    tracing::error!(fehler = %e, "Observability-Server beendet");
                }
            }))
        } else {
            None
        };

        let state = SignalingState::neu(self.config.signaling_config(), Some(metriken));
        let server = SignalingServer::binden(state, tcp_addr)
            .await
            .with_context(|| format!("TCP-Listener auf {tcp_addr} nicht gebunden"))?;
        health.coordinator_status_setzen(true);

        let ergebnis = server.starten(shutdown_rx).await;
        health.coordinator_status_setzen(false);

        if let Some(task) = observability {
            let _ = task.await;
        }
        tracing::info!("Server beendet");
        ergebnis.context("Coordinator beendet mit Fehler")
    }
}
