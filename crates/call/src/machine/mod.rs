//! Call State Machine – ein Aktor pro lokalem Teilnehmer
//!
//! Ein tokio-Task besitzt den gesamten Zustand und arbeitet drei Quellen
//! nacheinander ab:
//!
//! ```text
//! CallHandle ----Befehl----> +-------------+ ---Signal---> SignalTransport
//! Transport --TransportEvent-> | CallMachine | ---UiEvent--> UI
//! Schritt-Tasks --Abschluss--> +-------------+ ---Aufruf---> MediaBackend
//! ```
//!
//! Jeder asynchrone Medien-Schritt laeuft in einem eigenen Task und meldet
//! sich mit der Epoche des Anrufs (bzw. Channels) zurueck, fuer den er
//! gestartet wurde. Abschluesse mit fremder Epoche werden verworfen und ihre
//! Ressourcen freigegeben.

mod call;
mod channel;
mod handle;

pub use handle::{CallHandle, CallSnapshot};

use chrono::{DateTime, Utc};
use parley_core::error::Result as ParleyResult;
use parley_core::types::{CallId, UserId};
use parley_protocol::signal::{NetworkCandidate, SessionDescription, Signal};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::CallConfig;
use crate::error::{CallError, CallResult};
use crate::events::UiEvent;
use crate::media::{Capture, CandidateSink, MediaBackend, MediaSessionHandle, SessionConfig};
use crate::table::{CallPhase, Direction, InputKind};
use crate::transport::{SignalTransport, TransportEvent};

use channel::Kanal;
use handle::Befehl;

/// Rueckmeldung eines Schritt-Tasks
#[derive(Debug)]
pub(crate) struct Abschluss {
    pub(crate) epoch: u64,
    /// Channel-Peer, fuer den der Schritt lief (None beim 1:1-Anruf)
    pub(crate) peer: Option<UserId>,
    pub(crate) schritt: Schritt,
}

#[derive(Debug)]
pub(crate) enum Schritt {
    Capture(ParleyResult<Capture>),
    Session(ParleyResult<MediaSessionHandle>),
    Offer(ParleyResult<(MediaSessionHandle, SessionDescription)>),
    Answer(ParleyResult<(MediaSessionHandle, SessionDescription)>),
    AnswerApplied(ParleyResult<()>),
    CandidateAdded(ParleyResult<()>),
    LocalCandidate(NetworkCandidate),
    GraceElapsed,
}

/// Eingabe fuer die Uebergangstabelle des 1:1-Anrufs
///
/// Ressourcen (Aufnahme, Sitzung) stecken in `Option`s, damit eine
/// `Adopt*`-Aktion sie herausnehmen kann. Was danach noch drin ist, wird
/// freigegeben.
#[derive(Debug)]
pub(crate) enum Eingabe {
    StartCall { target: UserId },
    AcceptCall,
    RejectCall,
    EndCall,
    Signal { from: UserId, signal: Signal },
    CaptureReady(Option<Capture>),
    CaptureFailed(String),
    SessionReady(Option<MediaSessionHandle>),
    OfferReady(Option<MediaSessionHandle>, SessionDescription),
    AnswerReady(Option<MediaSessionHandle>, SessionDescription),
    AnswerApplied,
    CandidateAdded,
    StepFailed(String),
    LocalCandidate(NetworkCandidate),
    GraceElapsed,
    TransportLost,
}

impl Eingabe {
    pub(crate) fn kind(&self) -> InputKind {
        match self {
            Eingabe::StartCall { .. } => InputKind::StartCall,
            Eingabe::AcceptCall => InputKind::AcceptCall,
            Eingabe::RejectCall => InputKind::RejectCall,
            Eingabe::EndCall => InputKind::EndCall,
            Eingabe::Signal { signal, .. } => match signal {
                Signal::CallRequest { .. } => InputKind::CallRequest,
                Signal::CallAccepted { .. } => InputKind::CallAccepted,
                Signal::CallRejected { .. } => InputKind::CallRejected,
                Signal::CallEnded { .. } => InputKind::CallEnded,
                Signal::SessionOffer { .. } => InputKind::SessionOffer,
                Signal::SessionAnswer { .. } => InputKind::SessionAnswer,
                Signal::NetworkCandidate { .. } => InputKind::RemoteCandidate,
            },
            Eingabe::CaptureReady(_) => InputKind::CaptureReady,
            Eingabe::CaptureFailed(_) => InputKind::CaptureFailed,
            Eingabe::SessionReady(_) => InputKind::SessionReady,
            Eingabe::OfferReady(..) => InputKind::OfferReady,
            Eingabe::AnswerReady(..) => InputKind::AnswerReady,
            Eingabe::AnswerApplied => InputKind::AnswerApplied,
            Eingabe::CandidateAdded => InputKind::CandidateAdded,
            Eingabe::StepFailed(_) => InputKind::StepFailed,
            Eingabe::LocalCandidate(_) => InputKind::LocalCandidate,
            Eingabe::GraceElapsed => InputKind::GraceElapsed,
            Eingabe::TransportLost => InputKind::TransportLost,
        }
    }

    pub(crate) fn aus_schritt(schritt: Schritt) -> Self {
        match schritt {
            Schritt::Capture(Ok(c)) => Eingabe::CaptureReady(Some(c)),
            Schritt::Capture(Err(e)) => Eingabe::CaptureFailed(e.to_string()),
            Schritt::Session(Ok(h)) => Eingabe::SessionReady(Some(h)),
            Schritt::Offer(Ok((h, d))) => Eingabe::OfferReady(Some(h), d),
            Schritt::Answer(Ok((h, d))) => Eingabe::AnswerReady(Some(h), d),
            Schritt::AnswerApplied(Ok(())) => Eingabe::AnswerApplied,
            Schritt::CandidateAdded(Ok(())) => Eingabe::CandidateAdded,
            Schritt::Session(Err(e))
            | Schritt::Offer(Err(e))
            | Schritt::Answer(Err(e))
            | Schritt::AnswerApplied(Err(e))
            | Schritt::CandidateAdded(Err(e)) => Eingabe::StepFailed(e.to_string()),
            Schritt::LocalCandidate(c) => Eingabe::LocalCandidate(c),
            Schritt::GraceElapsed => Eingabe::GraceElapsed,
        }
    }
}

/// Lokale Projektion des aktiven 1:1-Anrufs
pub(crate) struct Anruf {
    pub(crate) call_id: CallId,
    pub(crate) peer: UserId,
    pub(crate) peer_name: String,
    pub(crate) richtung: Direction,
    pub(crate) erstellt: DateTime<Utc>,
    pub(crate) epoch: u64,
    pub(crate) capture: Option<Capture>,
    pub(crate) session: Option<MediaSessionHandle>,
    /// CallRequest (ausgehend) bzw. CallAccepted (eingehend) ist raus
    pub(crate) signalisiert: bool,
    /// acceptCall laeuft, Aufnahme wird noch geholt
    pub(crate) annehmend: bool,
    pub(crate) antwort_laeuft: bool,
    /// Anrufer legt nach CallAccepted seine Sitzung an
    pub(crate) sitzung_laeuft: bool,
    /// Angebot, das vor der eigenen Sitzung ankam
    pub(crate) wartendes_angebot: Option<SessionDescription>,
    pub(crate) prompt_sichtbar: bool,
    pub(crate) teilnehmer_angezeigt: bool,
    /// Medien sind freigegeben, der Datensatz wartet nur noch auf Idle
    pub(crate) freigegeben: bool,
    pub(crate) aufgaben: Vec<JoinHandle<()>>,
}

impl Anruf {
    fn neu(call_id: CallId, peer: UserId, peer_name: String, richtung: Direction, epoch: u64) -> Self {
        Self {
            call_id,
            peer,
            peer_name,
            richtung,
            erstellt: Utc::now(),
            epoch,
            capture: None,
            session: None,
            signalisiert: false,
            annehmend: false,
            antwort_laeuft: false,
            sitzung_laeuft: false,
            wartendes_angebot: None,
            prompt_sichtbar: false,
            teilnehmer_angezeigt: false,
            freigegeben: false,
            aufgaben: Vec::new(),
        }
    }

    pub(crate) fn aufgabe(&mut self, handle: JoinHandle<()>) {
        self.aufgaben.retain(|h| !h.is_finished());
        self.aufgaben.push(handle);
    }
}

/// Zustand eines lokalen Teilnehmers
pub struct CallMachine {
    local: UserId,
    display_name: String,
    config: CallConfig,
    backend: Arc<dyn MediaBackend>,
    transport: Arc<dyn SignalTransport>,
    ui: mpsc::UnboundedSender<UiEvent>,
    intern_tx: mpsc::UnboundedSender<Abschluss>,
    phase: CallPhase,
    anruf: Option<Anruf>,
    kanal: Option<Kanal>,
    naechste_epoche: u64,
    /// Epoche des zuletzt beendeten Anrufs (fuer den End-Grace-Timer)
    letzte_anruf_epoche: u64,
    stumm: bool,
    lautsprecher: bool,
}

impl CallMachine {
    /// Startet den Maschinen-Task
    ///
    /// `events` kommt vom Transport (z.B. `CoordinatorClient::verbinden`).
    /// Der Task endet, wenn alle `CallHandle`s fallen gelassen wurden.
    pub fn spawn(
        local: UserId,
        display_name: impl Into<String>,
        config: CallConfig,
        backend: Arc<dyn MediaBackend>,
        transport: Arc<dyn SignalTransport>,
        events: mpsc::Receiver<TransportEvent>,
    ) -> (CallHandle, mpsc::UnboundedReceiver<UiEvent>) {
        let (befehl_tx, befehl_rx) = mpsc::channel(config.befehl_queue_groesse.max(1));
        let (ui_tx, ui_rx) = mpsc::unbounded_channel();
        let (intern_tx, intern_rx) = mpsc::unbounded_channel();

        let maschine = CallMachine {
            local,
            display_name: display_name.into(),
            config,
            backend,
            transport,
            ui: ui_tx,
            intern_tx,
            phase: CallPhase::Idle,
            anruf: None,
            kanal: None,
            naechste_epoche: 1,
            letzte_anruf_epoche: 0,
            stumm: false,
            lautsprecher: true,
        };
        tokio::spawn(maschine.laufen(befehl_rx, events, intern_rx));

        (CallHandle::new(befehl_tx), ui_rx)
    }

    async fn laufen(
        mut self,
        mut befehle: mpsc::Receiver<Befehl>,
        mut events: mpsc::Receiver<TransportEvent>,
        mut intern: mpsc::UnboundedReceiver<Abschluss>,
    ) {
        tracing::debug!(user_id = %self.local, "Call State Machine gestartet");
        let mut transport_offen = true;

        loop {
            tokio::select! {
                befehl = befehle.recv() => {
                    let Some(befehl) = befehl else { break };
                    self.befehl(befehl).await;
                }

                event = events.recv(), if transport_offen => {
                    match event {
                        Some(event) => self.transport_event(event).await,
                        None => {
                            transport_offen = false;
                            self.transport_event(TransportEvent::Lost).await;
                        }
                    }
                }

                Some(abschluss) = intern.recv() => {
                    self.abschluss(abschluss).await;
                }
            }
        }

        // Alle Handles weg: aufraeumen ohne etwas zu senden
        if let Some(anruf) = self.anruf.as_mut() {
            anruf.aufgaben.drain(..).for_each(|h| h.abort());
        }
        self.anruf_medien_freigeben().await;
        self.kanal_aufloesen().await;
        tracing::debug!(user_id = %self.local, "Call State Machine beendet");
    }

    async fn befehl(&mut self, befehl: Befehl) {
        match befehl {
            Befehl::StartCall { target, antwort } => {
                let ergebnis = if self.kanal.is_some() {
                    Err(CallError::Busy)
                } else {
                    self.verarbeiten(Eingabe::StartCall { target }).await
                };
                let _ = antwort.send(ergebnis);
            }
            Befehl::AcceptCall { antwort } => {
                let ergebnis = if self.anruf.as_ref().is_some_and(|a| a.annehmend) {
                    Err(CallError::InvalidState(self.phase.name()))
                } else {
                    self.verarbeiten(Eingabe::AcceptCall).await
                };
                let _ = antwort.send(ergebnis);
            }
            Befehl::RejectCall { antwort } => {
                let _ = antwort.send(self.verarbeiten(Eingabe::RejectCall).await);
            }
            Befehl::EndCall { antwort } => {
                let _ = antwort.send(self.verarbeiten(Eingabe::EndCall).await);
            }
            Befehl::ToggleMute { antwort } => {
                let _ = antwort.send(self.mute_umschalten());
            }
            Befehl::ToggleSpeaker { antwort } => {
                let _ = antwort.send(self.lautsprecher_umschalten());
            }
            Befehl::JoinChannel { channel_id, antwort } => {
                let _ = antwort.send(self.channel_beitreten(channel_id).await);
            }
            Befehl::LeaveChannel { channel_id, antwort } => {
                let _ = antwort.send(self.channel_verlassen(channel_id).await);
            }
            Befehl::Snapshot { antwort } => {
                let _ = antwort.send(Ok(self.snapshot()));
            }
        }
    }

    async fn transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Signal { from, signal } => self.signal(from, signal).await,
            TransportEvent::ChannelSnapshot {
                channel_id,
                members,
            } => self.channel_snapshot(channel_id, members).await,
            TransportEvent::MemberJoined { channel_id, member } => {
                self.mitglied_beigetreten(channel_id, member)
            }
            TransportEvent::MemberLeft {
                channel_id,
                user_id,
            } => self.mitglied_gegangen(channel_id, user_id).await,
            TransportEvent::Lost => {
                tracing::warn!(user_id = %self.local, "Verbindung zum Coordinator verloren");
                let _ = self.verarbeiten(Eingabe::TransportLost).await;
                self.kanal_aufloesen().await;
            }
        }
    }

    async fn abschluss(&mut self, abschluss: Abschluss) {
        if self
            .kanal
            .as_ref()
            .is_some_and(|k| k.epoch == abschluss.epoch)
        {
            self.kanal_abschluss(abschluss).await;
            return;
        }

        let gueltig = match (&self.anruf, &abschluss.schritt) {
            (Some(anruf), _) => anruf.epoch == abschluss.epoch,
            (None, Schritt::GraceElapsed) => abschluss.epoch == self.letzte_anruf_epoche,
            (None, _) => false,
        };
        if !gueltig {
            tracing::debug!(epoch = abschluss.epoch, "Veralteter Abschluss verworfen");
            self.schritt_verwerfen(abschluss.schritt).await;
            return;
        }

        let _ = self.verarbeiten(Eingabe::aus_schritt(abschluss.schritt)).await;
    }

    // -----------------------------------------------------------------------
    // Hilfsfunktionen
    // -----------------------------------------------------------------------

    fn ui(&self, event: UiEvent) {
        // UI weg ist kein Fehler fuer die Maschine
        let _ = self.ui.send(event);
    }

    fn neue_epoche(&mut self) -> u64 {
        let epoch = self.naechste_epoche;
        self.naechste_epoche += 1;
        epoch
    }

    fn session_config(&self) -> SessionConfig {
        SessionConfig {
            ice_servers: self.config.ice_servers.clone(),
        }
    }

    fn kandidaten_senke(&self, epoch: u64, peer: Option<UserId>) -> CandidateSink {
        CandidateSink::new(self.intern_tx.clone(), epoch, peer)
    }

    /// Startet einen Schritt-Task, der sein Ergebnis als `Abschluss` meldet
    fn schritt_starten<F>(&self, epoch: u64, peer: Option<UserId>, schritt: F) -> JoinHandle<()>
    where
        F: Future<Output = Schritt> + Send + 'static,
    {
        let tx = self.intern_tx.clone();
        tokio::spawn(async move {
            let schritt = schritt.await;
            let _ = tx.send(Abschluss {
                epoch,
                peer,
                schritt,
            });
        })
    }

    /// Gibt die Ressourcen eines nicht mehr benoetigten Ergebnisses frei
    async fn schritt_verwerfen(&self, schritt: Schritt) {
        match schritt {
            Schritt::Capture(Ok(capture)) => self.backend.release_capture(capture).await,
            Schritt::Session(Ok(handle))
            | Schritt::Offer(Ok((handle, _)))
            | Schritt::Answer(Ok((handle, _))) => self.backend.close(handle).await,
            _ => {}
        }
    }

    /// Aktuell aktive Aufnahme (Anruf oder Channel)
    fn aktive_capture(&self) -> Option<&Capture> {
        self.anruf
            .as_ref()
            .and_then(|a| a.capture.as_ref())
            .or_else(|| self.kanal.as_ref().and_then(|k| k.capture.as_ref()))
    }

    fn mute_umschalten(&mut self) -> CallResult<bool> {
        let capture = self.aktive_capture().cloned().ok_or(CallError::NoCapture)?;
        self.stumm = !self.stumm;
        self.backend.set_capture_enabled(&capture, !self.stumm);
        self.ui(UiEvent::MuteChanged { muted: self.stumm });
        self.ui(UiEvent::status(if self.stumm {
            "Microphone muted"
        } else {
            "Microphone unmuted"
        }));
        Ok(self.stumm)
    }

    fn lautsprecher_umschalten(&mut self) -> CallResult<bool> {
        if self.aktive_capture().is_none() {
            return Err(CallError::NoCapture);
        }
        self.lautsprecher = !self.lautsprecher;
        self.backend.set_playback_enabled(self.lautsprecher);
        self.ui(UiEvent::SpeakerChanged {
            enabled: self.lautsprecher,
        });
        self.ui(UiEvent::status(if self.lautsprecher {
            "Speaker enabled"
        } else {
            "Speaker disabled"
        }));
        Ok(self.lautsprecher)
    }

    /// Mute- und Lautsprecher-Zustand nach dem Ende einer Aufnahme
    fn audio_zuruecksetzen(&mut self) {
        if self.stumm {
            self.stumm = false;
            self.ui(UiEvent::MuteChanged { muted: false });
        }
        if !self.lautsprecher {
            self.lautsprecher = true;
            self.backend.set_playback_enabled(true);
            self.ui(UiEvent::SpeakerChanged { enabled: true });
        }
    }

    fn snapshot(&self) -> CallSnapshot {
        let (channel, channel_members, connected_peers) = match &self.kanal {
            Some(k) => (
                Some(k.channel_id.clone()),
                k.mitglieder(),
                k.verbundene_peers(),
            ),
            None => (None, Vec::new(), Vec::new()),
        };
        CallSnapshot {
            phase: self.phase,
            call_id: self.anruf.as_ref().map(|a| a.call_id),
            peer: self.anruf.as_ref().map(|a| a.peer.clone()),
            channel,
            channel_members,
            connected_peers,
            muted: self.stumm,
            speaker_enabled: self.lautsprecher,
        }
    }
}
