//! Client-Konfiguration der Call State Machine

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Standard-STUN-Server fuer neue Medien-Sitzungen
pub const DEFAULT_ICE_SERVERS: [&str; 2] = [
    "stun:stun.l.google.com:19302",
    "stun:stun1.l.google.com:19302",
];

/// Konfiguration einer Call State Machine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CallConfig {
    /// Wie lange eine Ablehnung angezeigt wird (Millisekunden)
    pub reject_grace_ms: u64,
    /// Wie lange "Call ended" nach einem entfernten Auflegen stehen bleibt
    pub end_grace_ms: u64,
    /// ICE-Server fuer `SessionConfig`
    pub ice_servers: Vec<String>,
    /// Kapazitaet der Befehls-Queue zwischen `CallHandle` und Maschine
    pub befehl_queue_groesse: usize,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            reject_grace_ms: 3_000,
            end_grace_ms: 2_000,
            ice_servers: DEFAULT_ICE_SERVERS.iter().map(|s| s.to_string()).collect(),
            befehl_queue_groesse: 32,
        }
    }
}

impl CallConfig {
    pub fn reject_grace(&self) -> Duration {
        Duration::from_millis(self.reject_grace_ms)
    }

    pub fn end_grace(&self) -> Duration {
        Duration::from_millis(self.end_grace_ms)
    }
}
