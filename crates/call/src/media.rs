//! Adapter zum Medien-Transport
//!
//! Die eigentliche Audio-Uebertragung (Codec, RTP, ICE) liegt ausserhalb
//! dieses Crates. Die Call State Machine sieht nur opake Handles fuer eine
//! Mikrofon-Aufnahme und fuer ausgehandelte Peer-Verbindungen.

use async_trait::async_trait;
use parley_core::error::Result as ParleyResult;
use parley_core::types::UserId;
use parley_protocol::signal::{NetworkCandidate, SessionDescription};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::machine::{Abschluss, Schritt};

/// Opakes Handle einer lokalen Mikrofon-Aufnahme
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Capture(u64);

impl Capture {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

/// Opakes Handle einer Peer-Verbindung im Medien-Backend
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MediaSessionHandle(u64);

impl MediaSessionHandle {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

/// Parameter fuer eine neue Peer-Verbindung
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub ice_servers: Vec<String>,
}

/// Rueckkanal fuer lokal gefundene Netzwerk-Kandidaten
///
/// Jede Sitzung bekommt eine eigene Senke. Kandidaten einer inzwischen
/// beendeten Sitzung verwirft die Maschine anhand der Epoche.
#[derive(Debug, Clone)]
pub struct CandidateSink {
    tx: mpsc::UnboundedSender<Abschluss>,
    epoch: u64,
    peer: Option<UserId>,
}

impl CandidateSink {
    pub(crate) fn new(
        tx: mpsc::UnboundedSender<Abschluss>,
        epoch: u64,
        peer: Option<UserId>,
    ) -> Self {
        Self { tx, epoch, peer }
    }

    /// Meldet einen lokalen Kandidaten; `false` wenn die Maschine weg ist
    pub fn send(&self, candidate: NetworkCandidate) -> bool {
        self.tx
            .send(Abschluss {
                epoch: self.epoch,
                peer: self.peer.clone(),
                schritt: Schritt::LocalCandidate(candidate),
            })
            .is_ok()
    }
}

/// Medien-Backend (WebRTC-Stack, Audio-Geraete)
///
/// `create_offer` und `create_answer` setzen die lokale Beschreibung
/// selbst, `create_answer` zusaetzlich das entfernte Angebot.
#[async_trait]
pub trait MediaBackend: Send + Sync + 'static {
    /// Mikrofon oeffnen; `MedienNichtVerfuegbar` bei verweigertem Zugriff
    async fn acquire_local_capture(&self) -> ParleyResult<Capture>;

    async fn release_capture(&self, capture: Capture);

    /// Mikrofon stumm schalten (`false`) oder wieder aktivieren
    fn set_capture_enabled(&self, capture: &Capture, enabled: bool);

    /// Wiedergabe der entfernten Audiospuren ein- oder ausschalten
    fn set_playback_enabled(&self, enabled: bool);

    async fn create_session(
        &self,
        config: &SessionConfig,
        capture: &Capture,
        candidates: CandidateSink,
    ) -> ParleyResult<MediaSessionHandle>;

    async fn create_offer(&self, handle: &MediaSessionHandle) -> ParleyResult<SessionDescription>;

    async fn create_answer(
        &self,
        handle: &MediaSessionHandle,
        remote_offer: SessionDescription,
    ) -> ParleyResult<SessionDescription>;

    async fn set_remote_description(
        &self,
        handle: &MediaSessionHandle,
        description: SessionDescription,
    ) -> ParleyResult<()>;

    async fn add_candidate(
        &self,
        handle: &MediaSessionHandle,
        candidate: NetworkCandidate,
    ) -> ParleyResult<()>;

    async fn close(&self, handle: MediaSessionHandle);
}

/// Schliesst eine frisch erzeugte Sitzung, falls der erzeugende Schritt
/// scheitert oder abgebrochen wird
pub(crate) struct SitzungsWache {
    backend: Arc<dyn MediaBackend>,
    handle: MediaSessionHandle,
    aktiv: bool,
}

impl SitzungsWache {
    pub(crate) fn new(backend: Arc<dyn MediaBackend>, handle: MediaSessionHandle) -> Self {
        Self {
            backend,
            handle,
            aktiv: true,
        }
    }

    /// Sitzung wurde erfolgreich an die Maschine uebergeben
    pub(crate) fn entschaerfen(mut self) {
        self.aktiv = false;
    }
}

impl Drop for SitzungsWache {
    fn drop(&mut self) {
        if !self.aktiv {
            return;
        }
        let backend = Arc::clone(&self.backend);
        let handle = self.handle.clone();
        if let Ok(rt) = tokio::runtime::Handle::try_current() {
            tracing::debug!(session = handle.id(), "Halb aufgebaute Sitzung wird geschlossen");
            rt.spawn(async move { backend.close(handle).await });
        }
    }
}

/// Sitzung holen oder anlegen, dann ein Angebot erzeugen
pub(crate) async fn sitzung_mit_angebot(
    backend: Arc<dyn MediaBackend>,
    config: SessionConfig,
    capture: Capture,
    sink: CandidateSink,
) -> ParleyResult<(MediaSessionHandle, SessionDescription)> {
    let handle = backend.create_session(&config, &capture, sink).await?;
    let wache = SitzungsWache::new(Arc::clone(&backend), handle.clone());
    let angebot = backend.create_offer(&handle).await?;
    wache.entschaerfen();
    Ok((handle, angebot))
}

/// Beantwortet ein Angebot; ohne vorhandene Sitzung wird eine angelegt
pub(crate) async fn sitzung_mit_antwort(
    backend: Arc<dyn MediaBackend>,
    vorhanden: Option<MediaSessionHandle>,
    config: SessionConfig,
    capture: Capture,
    sink: CandidateSink,
    angebot: SessionDescription,
) -> ParleyResult<(MediaSessionHandle, SessionDescription)> {
    let (handle, wache) = match vorhanden {
        Some(h) => (h, None),
        None => {
            let h = backend.create_session(&config, &capture, sink).await?;
            let wache = SitzungsWache::new(Arc::clone(&backend), h.clone());
            (h, Some(wache))
        }
    };
    let antwort = backend.create_answer(&handle, angebot).await?;
    if let Some(w) = wache {
        w.entschaerfen();
    }
    Ok((handle, antwort))
}
