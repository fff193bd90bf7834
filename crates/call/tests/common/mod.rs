//! Gemeinsame Test-Hilfen: Fake-Medien-Backend und In-Memory-Vermittlung

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use parley_call::{
    CallConfig, CallHandle, CallMachine, CallResult, CallSnapshot, CandidateSink, Capture,
    MediaBackend, MediaSessionHandle, SessionConfig, SignalTransport, TransportEvent, UiEvent,
};
use parley_core::error::{ParleyError, Result as ParleyResult};
use parley_core::types::{ChannelId, UserId};
use parley_protocol::signal::{NetworkCandidate, SessionDescription, Signal};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};

// ---------------------------------------------------------------------------
// Fake-Medien-Backend
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MedienZustand {
    naechste_id: u64,
    captures_offen: HashSet<u64>,
    sessions_offen: HashSet<u64>,
    sessions_geschlossen: Vec<u64>,
    senken: HashMap<u64, CandidateSink>,
    angebote: usize,
    antworten: usize,
    remote_gesetzt: usize,
    kandidaten: Vec<(u64, String)>,
    mikrofon_verweigert: bool,
    capture_aktiv: Option<bool>,
    wiedergabe_aktiv: Option<bool>,
    /// Schritte, die an einem Tor angekommen sind
    angehalten: Vec<&'static str>,
}

/// Medien-Backend ohne echte Geraete, zaehlt nur mit
#[derive(Default)]
pub struct FakeMedia {
    zustand: Mutex<MedienZustand>,
    /// Haelt `acquire_local_capture` an, bis `tore_oeffnen` kommt
    tor_capture: Option<Arc<Notify>>,
    /// Haelt `create_offer` an, bis `tore_oeffnen` kommt
    tor_angebot: Option<Arc<Notify>>,
}

impl FakeMedia {
    pub fn neu() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn ohne_mikrofon() -> Arc<Self> {
        let media = Self::default();
        media.zustand.lock().mikrofon_verweigert = true;
        Arc::new(media)
    }

    /// Backend, dessen Aufnahme und/oder Angebot erst nach `tore_oeffnen`
    /// fertig wird
    pub fn mit_toren(capture: bool, angebot: bool) -> Arc<Self> {
        Arc::new(Self {
            tor_capture: capture.then(|| Arc::new(Notify::new())),
            tor_angebot: angebot.then(|| Arc::new(Notify::new())),
            ..Self::default()
        })
    }

    pub fn tore_oeffnen(&self) {
        for tor in [&self.tor_capture, &self.tor_angebot].into_iter().flatten() {
            tor.notify_waiters();
        }
    }

    /// `true` sobald ein Schritt der Art ("capture", "angebot") am Tor wartet
    pub fn hat_angehalten(&self, art: &str) -> bool {
        self.zustand.lock().angehalten.iter().any(|a| *a == art)
    }

    async fn tor(&self, art: &'static str, tor: &Option<Arc<Notify>>) {
        let Some(tor) = tor else { return };
        let offen = tor.notified();
        self.zustand.lock().angehalten.push(art);
        offen.await;
    }

    pub fn offene_captures(&self) -> usize {
        self.zustand.lock().captures_offen.len()
    }

    pub fn offene_sessions(&self) -> usize {
        self.zustand.lock().sessions_offen.len()
    }

    pub fn erzeugte_angebote(&self) -> usize {
        self.zustand.lock().angebote
    }

    pub fn erzeugte_antworten(&self) -> usize {
        self.zustand.lock().antworten
    }

    pub fn kandidaten(&self) -> Vec<(u64, String)> {
        self.zustand.lock().kandidaten.clone()
    }

    pub fn capture_aktiv(&self) -> Option<bool> {
        self.zustand.lock().capture_aktiv
    }

    pub fn wiedergabe_aktiv(&self) -> Option<bool> {
        self.zustand.lock().wiedergabe_aktiv
    }

    /// Simuliert einen lokal gefundenen Kandidaten auf allen Sitzungen
    /// (auch bereits geschlossenen)
    pub fn kandidat_melden(&self, candidate: &str) {
        let senken: Vec<CandidateSink> = self.zustand.lock().senken.values().cloned().collect();
        for senke in senken {
            senke.send(NetworkCandidate::neu(candidate));
        }
    }
}

#[async_trait]
impl MediaBackend for FakeMedia {
    async fn acquire_local_capture(&self) -> ParleyResult<Capture> {
        self.tor("capture", &self.tor_capture).await;
        let mut z = self.zustand.lock();
        if z.mikrofon_verweigert {
            return Err(ParleyError::MedienNichtVerfuegbar("Zugriff verweigert".into()));
        }
        z.naechste_id += 1;
        let id = z.naechste_id;
        z.captures_offen.insert(id);
        Ok(Capture::new(id))
    }

    async fn release_capture(&self, capture: Capture) {
        self.zustand.lock().captures_offen.remove(&capture.id());
    }

    fn set_capture_enabled(&self, _capture: &Capture, enabled: bool) {
        self.zustand.lock().capture_aktiv = Some(enabled);
    }

    fn set_playback_enabled(&self, enabled: bool) {
        self.zustand.lock().wiedergabe_aktiv = Some(enabled);
    }

    async fn create_session(
        &self,
        _config: &SessionConfig,
        _capture: &Capture,
        candidates: CandidateSink,
    ) -> ParleyResult<MediaSessionHandle> {
        let mut z = self.zustand.lock();
        z.naechste_id += 1;
        let id = z.naechste_id;
        z.sessions_offen.insert(id);
        z.senken.insert(id, candidates);
        Ok(MediaSessionHandle::new(id))
    }

    async fn create_offer(&self, handle: &MediaSessionHandle) -> ParleyResult<SessionDescription> {
        self.tor("angebot", &self.tor_angebot).await;
        let mut z = self.zustand.lock();
        if !z.sessions_offen.contains(&handle.id()) {
            return Err(ParleyError::Aushandlung("Sitzung geschlossen".into()));
        }
        z.angebote += 1;
        Ok(SessionDescription::offer(format!("v=0 offer {}", handle.id())))
    }

    async fn create_answer(
        &self,
        handle: &MediaSessionHandle,
        remote_offer: SessionDescription,
    ) -> ParleyResult<SessionDescription> {
        let mut z = self.zustand.lock();
        if !z.sessions_offen.contains(&handle.id()) {
            return Err(ParleyError::Aushandlung("Sitzung geschlossen".into()));
        }
        z.antworten += 1;
        Ok(SessionDescription::answer(format!(
            "v=0 answer {} to [{}]",
            handle.id(),
            remote_offer.sdp
        )))
    }

    async fn set_remote_description(
        &self,
        handle: &MediaSessionHandle,
        _description: SessionDescription,
    ) -> ParleyResult<()> {
        let mut z = self.zustand.lock();
        if !z.sessions_offen.contains(&handle.id()) {
            return Err(ParleyError::Aushandlung("Sitzung geschlossen".into()));
        }
        z.remote_gesetzt += 1;
        Ok(())
    }

    async fn add_candidate(
        &self,
        handle: &MediaSessionHandle,
        candidate: NetworkCandidate,
    ) -> ParleyResult<()> {
        let mut z = self.zustand.lock();
        if !z.sessions_offen.contains(&handle.id()) {
            return Err(ParleyError::Aushandlung("Sitzung geschlossen".into()));
        }
        z.kandidaten.push((handle.id(), candidate.candidate));
        Ok(())
    }

    async fn close(&self, handle: MediaSessionHandle) {
        let mut z = self.zustand.lock();
        if z.sessions_offen.remove(&handle.id()) {
            z.sessions_geschlossen.push(handle.id());
        }
    }
}

// ---------------------------------------------------------------------------
// In-Memory-Vermittlung (ersetzt den Coordinator fuer 1:1-Anrufe)
// ---------------------------------------------------------------------------

/// Leitet Signale direkt zwischen Maschinen weiter und protokolliert sie
#[derive(Default)]
pub struct Vermittlung {
    postfaecher: Mutex<HashMap<UserId, mpsc::Sender<TransportEvent>>>,
    protokoll: Mutex<Vec<(UserId, UserId, Signal)>>,
    channel_aufrufe: Mutex<Vec<(UserId, &'static str, ChannelId)>>,
}

impl Vermittlung {
    pub fn neu() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Alle gesendeten Signale als (von, an, Signal)
    pub fn signale(&self) -> Vec<(UserId, UserId, Signal)> {
        self.protokoll.lock().clone()
    }

    /// Gesendete Signale einer Art
    pub fn signale_der_art(&self, art: &str) -> Vec<(UserId, UserId, Signal)> {
        self.signale()
            .into_iter()
            .filter(|(_, _, s)| s.art() == art)
            .collect()
    }

    pub fn channel_aufrufe(&self) -> Vec<(UserId, &'static str, ChannelId)> {
        self.channel_aufrufe.lock().clone()
    }

    pub fn teilnehmer(self: &Arc<Self>, user: &str) -> Teilnehmer {
        self.teilnehmer_mit(user, FakeMedia::neu(), CallConfig::default())
    }

    pub fn teilnehmer_mit(
        self: &Arc<Self>,
        user: &str,
        media: Arc<FakeMedia>,
        config: CallConfig,
    ) -> Teilnehmer {
        let user_id = UserId::from(user);
        let (events_tx, events_rx) = mpsc::channel(64);
        self.postfaecher
            .lock()
            .insert(user_id.clone(), events_tx.clone());

        let transport = Arc::new(VermittlungsTransport {
            local: user_id.clone(),
            netz: Arc::clone(self),
        });
        let (handle, ui) = CallMachine::spawn(
            user_id.clone(),
            user.to_uppercase(),
            config,
            media.clone(),
            transport,
            events_rx,
        );

        Teilnehmer {
            user_id,
            handle,
            ui,
            media,
            events_tx,
        }
    }
}

struct VermittlungsTransport {
    local: UserId,
    netz: Arc<Vermittlung>,
}

#[async_trait]
impl SignalTransport for VermittlungsTransport {
    async fn send(&self, target: &UserId, signal: Signal) -> CallResult<()> {
        self.netz
            .protokoll
            .lock()
            .push((self.local.clone(), target.clone(), signal.clone()));
        let postfach = self.netz.postfaecher.lock().get(target).cloned();
        if let Some(postfach) = postfach {
            // Wie beim Coordinator: kein Fehler wenn der Empfaenger fehlt
            let _ = postfach
                .send(TransportEvent::Signal {
                    from: self.local.clone(),
                    signal,
                })
                .await;
        }
        Ok(())
    }

    async fn join_channel(&self, channel_id: &ChannelId) -> CallResult<()> {
        self.netz
            .channel_aufrufe
            .lock()
            .push((self.local.clone(), "join", channel_id.clone()));
        Ok(())
    }

    async fn leave_channel(&self, channel_id: &ChannelId) -> CallResult<()> {
        self.netz
            .channel_aufrufe
            .lock()
            .push((self.local.clone(), "leave", channel_id.clone()));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Teilnehmer
// ---------------------------------------------------------------------------

pub struct Teilnehmer {
    pub user_id: UserId,
    pub handle: CallHandle,
    pub ui: mpsc::UnboundedReceiver<UiEvent>,
    pub media: Arc<FakeMedia>,
    /// Zum direkten Einspeisen von Transport-Events
    pub events_tx: mpsc::Sender<TransportEvent>,
}

impl Teilnehmer {
    pub async fn snapshot(&self) -> CallSnapshot {
        self.handle.snapshot().await.expect("Maschine laeuft nicht")
    }

    /// Wartet, bis der Zustand die Bedingung erfuellt
    pub async fn warten_auf(&self, bedingung: impl Fn(&CallSnapshot) -> bool) -> CallSnapshot {
        for _ in 0..500 {
            let snapshot = self.snapshot().await;
            if bedingung(&snapshot) {
                return snapshot;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("{}: Bedingung nicht erreicht, Zustand: {:?}", self.user_id, self.snapshot().await);
    }

    /// Liest UI-Ereignisse bis eines passt
    pub async fn ereignis(&mut self, passt: impl Fn(&UiEvent) -> bool) -> UiEvent {
        loop {
            let event = tokio::time::timeout(Duration::from_secs(10), self.ui.recv())
                .await
                .expect("Zeitlimit beim Warten auf UiEvent")
                .expect("UI-Kanal geschlossen");
            if passt(&event) {
                return event;
            }
        }
    }

    /// Liest UI-Ereignisse bis der Status-Text kommt
    pub async fn status(&mut self, text: &str) {
        let erwartet = text.to_string();
        self.ereignis(|e| matches!(e, UiEvent::StatusText(t) if *t == erwartet))
            .await;
    }

    /// Alle bereits vorliegenden UI-Ereignisse
    pub fn ereignisse_bisher(&mut self) -> Vec<UiEvent> {
        let mut alle = Vec::new();
        while let Ok(event) = self.ui.try_recv() {
            alle.push(event);
        }
        alle
    }
}
