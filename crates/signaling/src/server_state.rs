//! Gemeinsamer Zustand des Session Coordinators
//!
//! Haelt Konfiguration, Client-Register, Presence und optionale Metriken als
//! Arc-Referenzen, die zwischen den Verbindungs-Tasks geteilt werden.

use parley_observability::ParleyMetrics;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::broadcast::{EventBroadcaster, SEND_QUEUE_GROESSE};
use crate::presence::PresenceManager;

/// Konfiguration fuer den Signaling-Service
#[derive(Debug, Clone)]
pub struct SignalingConfig {
    /// Anzeigename des Servers (in `HelloResponse`)
    pub server_name: String,
    /// Maximale gleichzeitige TCP-Verbindungen
    pub max_clients: u32,
    /// Keepalive-Intervall in Sekunden
    pub keepalive_sek: u64,
    /// Timeout fuer inaktive Verbindungen in Sekunden
    pub verbindungs_timeout_sek: u64,
    /// Groesse der Send-Queue pro Client
    pub send_queue_groesse: usize,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            server_name: "Parley Coordinator".to_string(),
            max_clients: 512,
            keepalive_sek: 30,
            verbindungs_timeout_sek: 90,
            send_queue_groesse: SEND_QUEUE_GROESSE,
        }
    }
}

/// Gemeinsamer Server-Zustand (thread-safe, Arc-geteilt)
pub struct SignalingState {
    pub config: Arc<SignalingConfig>,
    /// Send-Queues aller identifizierten Clients
    pub broadcaster: EventBroadcaster,
    /// Online-Status und Channel-Mitgliedschaften
    pub presence: PresenceManager,
    /// Prometheus-Metriken (None in Tests ohne Observability)
    pub metriken: Option<ParleyMetrics>,
    /// Startzeitpunkt des Servers
    pub start_time: Instant,
    offene_verbindungen: AtomicUsize,
    naechste_verbindung_id: AtomicU64,
}

impl SignalingState {
    /// Erstellt einen neuen SignalingState
    pub fn neu(config: SignalingConfig, metriken: Option<ParleyMetrics>) -> Arc<Self> {
        let broadcaster = EventBroadcaster::mit_queue_groesse(config.send_queue_groesse);
        Arc::new(Self {
            config: Arc::new(config),
            broadcaster,
            presence: PresenceManager::neu(),
            metriken,
            start_time: Instant::now(),
            offene_verbindungen: AtomicUsize::new(0),
            naechste_verbindung_id: AtomicU64::new(1),
        })
    }

    /// Gibt die Uptime in Sekunden zurueck
    pub fn uptime_sek(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Reserviert einen Verbindungsplatz
    ///
    /// `None` wenn `max_clients` erreicht ist. Der Platz wird beim Drop des
    /// Tickets wieder freigegeben.
    pub fn verbindung_annehmen(self: &Arc<Self>) -> Option<VerbindungsTicket> {
        let max = self.config.max_clients as usize;
        let reserviert = self
            .offene_verbindungen
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |offen| {
                (offen < max).then_some(offen + 1)
            })
            .is_ok();
        if !reserviert {
            return None;
        }
        Some(VerbindungsTicket {
            id: self.naechste_verbindung_id.fetch_add(1, Ordering::Relaxed),
            state: Arc::clone(self),
        })
    }

    /// Anzahl offener TCP-Verbindungen (auch nicht identifizierte)
    pub fn offene_verbindungen(&self) -> usize {
        self.offene_verbindungen.load(Ordering::Acquire)
    }

    /// Aktualisiert die Gauges nach einer Aenderung
    pub(crate) fn gauges_aktualisieren(&self) {
        if let Some(m) = &self.metriken {
            m.connected_clients.set(self.broadcaster.client_anzahl() as i64);
            m.voice_channels_active
                .set(self.presence.aktive_channels() as i64);
        }
    }
}

/// Belegter Verbindungsplatz, gibt sich beim Drop frei
pub struct VerbindungsTicket {
    pub id: u64,
    state: Arc<SignalingState>,
}

impl Drop for VerbindungsTicket {
    fn drop(&mut self) {
        self.state.offene_verbindungen.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_konfiguration() {
        let config = SignalingConfig::default();
        assert_eq!(config.max_clients, 512);
        assert_eq!(config.keepalive_sek, 30);
        assert_eq!(config.verbindungs_timeout_sek, 90);
        assert_eq!(config.send_queue_groesse, 64);
    }

    #[test]
    fn verbindungsplaetze_begrenzt_und_freigegeben() {
        let state = SignalingState::neu(
            SignalingConfig {
                max_clients: 2,
                ..Default::default()
            },
            None,
        );

        let t1 = state.verbindung_annehmen().expect("Platz 1");
        let t2 = state.verbindung_annehmen().expect("Platz 2");
        assert_ne!(t1.id, t2.id);
        assert!(state.verbindung_annehmen().is_none());
        assert_eq!(state.offene_verbindungen(), 2);

        drop(t1);
        assert_eq!(state.offene_verbindungen(), 1);
        assert!(state.verbindung_annehmen().is_some());
    }

    #[test]
    fn gauges_folgen_dem_zustand() {
        let metriken = ParleyMetrics::neu().unwrap();
        let state = SignalingState::neu(SignalingConfig::default(), Some(metriken.clone()));
        let uid = parley_core::types::UserId::from("alice");
        let _rx = state.broadcaster.client_registrieren(uid, 1);

        state.gauges_aktualisieren();
        assert_eq!(metriken.connected_clients.get(), 1);
        assert_eq!(metriken.voice_channels_active.get(), 0);
    }
}
