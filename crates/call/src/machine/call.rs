//! 1:1-Anruf: Vorpruefung der Signale und Ausfuehrung der Tabellen-Aktionen

use parley_core::types::{CallId, UserId};
use parley_protocol::signal::{
    NegotiationScope, NetworkCandidate, RejectReason, SdpType, SessionDescription, Signal,
};
use std::sync::Arc;

use super::{Anruf, CallMachine, Eingabe, Schritt};
use crate::error::{CallError, CallResult};
use crate::events::UiEvent;
use crate::media;
use crate::table::{self, Action, CallPhase, Direction, Refusal};

impl CallMachine {
    /// Eingehendes Signal eines Peers
    pub(super) async fn signal(&mut self, from: UserId, signal: Signal) {
        if let Some(NegotiationScope::Channel { .. }) = signal.scope() {
            self.kanal_signal(from, signal).await;
            return;
        }

        if let Signal::CallRequest { call_id, .. } = &signal {
            if self.anruf.as_ref().is_some_and(|a| a.call_id == *call_id) {
                tracing::debug!(call_id = %call_id, "Doppelter CallRequest ignoriert");
                return;
            }
            if self.kanal.is_some() {
                tracing::debug!(call_id = %call_id, from = %from, "CallRequest waehrend Voice-Channel, besetzt");
                self.senden(&from, Signal::CallRejected {
                    call_id: *call_id,
                    reason: RejectReason::Busy,
                })
                .await;
                return;
            }
        } else {
            let passt = self.anruf.as_ref().is_some_and(|a| {
                a.peer == from && signal.call_id() == Some(a.call_id) && !a.freigegeben
            });
            if !passt {
                tracing::debug!(
                    from = %from,
                    art = signal.art(),
                    "Signal gehoert zu keinem aktiven Anruf, ignoriert"
                );
                return;
            }
        }

        let _ = self.verarbeiten(Eingabe::Signal { from, signal }).await;
    }

    /// Tabellen-Lookup, Aktionen ausfuehren, Phase setzen
    pub(super) async fn verarbeiten(&mut self, mut eingabe: Eingabe) -> CallResult<()> {
        let phase = self.phase;
        let plan = table::plan(phase, eingabe.kind());

        if let Some(refusal) = plan.refusal {
            tracing::debug!(phase = %phase, eingabe = ?eingabe.kind(), "Befehl verweigert");
            return Err(match refusal {
                Refusal::Busy => CallError::Busy,
                Refusal::InvalidState => CallError::InvalidState(phase.name()),
            });
        }
        if plan.is_ignored() {
            tracing::trace!(phase = %phase, eingabe = ?eingabe.kind(), "Eingabe ignoriert");
            self.rest_freigeben(eingabe).await;
            return Ok(());
        }

        for aktion in plan.actions {
            self.aktion(*aktion, &mut eingabe).await;
        }
        self.rest_freigeben(eingabe).await;

        if let Some(naechste) = plan.next {
            if naechste != phase {
                tracing::info!(von = %phase, nach = %naechste, "Phasenwechsel");
                self.phase = naechste;
                self.ui(UiEvent::PhaseChanged(naechste));
            }
            if naechste == CallPhase::Idle {
                if let Some(anruf) = self.anruf.take() {
                    self.letzte_anruf_epoche = anruf.epoch;
                }
            }
        }
        Ok(())
    }

    /// Gibt Aufnahme/Sitzung frei, die keine Aktion uebernommen hat
    async fn rest_freigeben(&self, eingabe: Eingabe) {
        match eingabe {
            Eingabe::CaptureReady(Some(capture)) => self.backend.release_capture(capture).await,
            Eingabe::SessionReady(Some(handle))
            | Eingabe::OfferReady(Some(handle), _)
            | Eingabe::AnswerReady(Some(handle), _) => self.backend.close(handle).await,
            _ => {}
        }
    }

    async fn aktion(&mut self, aktion: Action, eingabe: &mut Eingabe) {
        match aktion {
            Action::OpenOutgoing => {
                let Eingabe::StartCall { target } = eingabe else { return };
                let epoch = self.neue_epoche();
                let anruf = Anruf::neu(
                    CallId::new(),
                    target.clone(),
                    target.to_string(),
                    Direction::Outgoing,
                    epoch,
                );
                tracing::info!(call_id = %anruf.call_id, peer = %anruf.peer, "Ausgehender Anruf");
                self.ui(UiEvent::CallUiVisible(true));
                self.ui(UiEvent::status(format!("Calling {}...", anruf.peer_name)));
                self.anruf = Some(anruf);
            }

            Action::OpenIncoming => {
                let Eingabe::Signal {
                    from,
                    signal: Signal::CallRequest {
                        call_id,
                        caller_name,
                    },
                } = eingabe
                else {
                    return;
                };
                let name = if caller_name.is_empty() {
                    from.to_string()
                } else {
                    caller_name.clone()
                };
                let epoch = self.neue_epoche();
                let mut anruf = Anruf::neu(*call_id, from.clone(), name.clone(), Direction::Incoming, epoch);
                anruf.prompt_sichtbar = true;
                tracing::info!(call_id = %call_id, peer = %from, "Eingehender Anruf");
                self.anruf = Some(anruf);
                self.ui(UiEvent::IncomingCallPrompt {
                    visible: true,
                    caller_name: Some(name.clone()),
                });
                self.ui(UiEvent::status(format!("{name} is calling...")));
            }

            Action::AcquireCapture => {
                let backend = Arc::clone(&self.backend);
                let Some(epoch) = self.anruf.as_ref().map(|a| a.epoch) else { return };
                let task = self.schritt_starten(epoch, None, async move {
                    Schritt::Capture(backend.acquire_local_capture().await)
                });
                let Some(anruf) = self.anruf.as_mut() else { return };
                anruf.aufgabe(task);
                if anruf.richtung == Direction::Incoming {
                    anruf.annehmend = true;
                    self.ui(UiEvent::CallUiVisible(true));
                }
            }

            Action::AdoptCapture => {
                let Eingabe::CaptureReady(capture) = eingabe else { return };
                if let Some(anruf) = self.anruf.as_mut() {
                    anruf.capture = capture.take();
                }
            }

            Action::SendCallRequest => {
                let Some((peer, call_id)) = self.anruf_ziel() else { return };
                let caller_name = self.display_name.clone();
                self.senden(&peer, Signal::CallRequest {
                    call_id,
                    caller_name,
                })
                .await;
                if let Some(anruf) = self.anruf.as_mut() {
                    anruf.signalisiert = true;
                }
            }

            Action::SendCallAccepted => {
                let Some((peer, call_id)) = self.anruf_ziel() else { return };
                self.senden(&peer, Signal::CallAccepted { call_id }).await;
                if let Some(anruf) = self.anruf.as_mut() {
                    anruf.signalisiert = true;
                    anruf.annehmend = false;
                }
            }

            Action::SendDeclined => self.ablehnung_senden(RejectReason::Declined).await,
            Action::SendMediaUnavailable => {
                self.ablehnung_senden(RejectReason::MediaUnavailable).await
            }

            Action::ReplyBusy => {
                let Eingabe::Signal {
                    from,
                    signal: Signal::CallRequest { call_id, .. },
                } = eingabe
                else {
                    return;
                };
                tracing::info!(call_id = %call_id, from = %from, "Besetzt, CallRequest abgelehnt");
                let (from, call_id) = (from.clone(), *call_id);
                self.senden(&from, Signal::CallRejected {
                    call_id,
                    reason: RejectReason::Busy,
                })
                .await;
            }

            Action::SendCallEnded => {
                let bereit = self
                    .anruf
                    .as_ref()
                    .is_some_and(|a| a.signalisiert && !a.freigegeben);
                if !bereit {
                    return;
                }
                let Some((peer, call_id)) = self.anruf_ziel() else { return };
                self.senden(&peer, Signal::CallEnded { call_id }).await;
            }

            Action::StartSession => {
                let Some(anruf) = self.anruf.as_ref() else { return };
                let Some(capture) = anruf.capture.clone() else {
                    tracing::warn!(call_id = %anruf.call_id, "Sitzung ohne Aufnahme nicht moeglich");
                    return;
                };
                let epoch = anruf.epoch;
                let backend = Arc::clone(&self.backend);
                let config = self.session_config();
                let sink = self.kandidaten_senke(epoch, None);
                let task = self.schritt_starten(epoch, None, async move {
                    Schritt::Session(backend.create_session(&config, &capture, sink).await)
                });
                if let Some(anruf) = self.anruf.as_mut() {
                    anruf.sitzung_laeuft = true;
                    anruf.aufgabe(task);
                }
            }

            Action::StartOffer => {
                let Some(anruf) = self.anruf.as_ref() else { return };
                let Some(capture) = anruf.capture.clone() else {
                    tracing::warn!(call_id = %anruf.call_id, "Angebot ohne Aufnahme nicht moeglich");
                    return;
                };
                let epoch = anruf.epoch;
                let backend = Arc::clone(&self.backend);
                let config = self.session_config();
                let sink = self.kandidaten_senke(epoch, None);
                let task = self.schritt_starten(epoch, None, async move {
                    Schritt::Offer(media::sitzung_mit_angebot(backend, config, capture, sink).await)
                });
                if let Some(anruf) = self.anruf.as_mut() {
                    anruf.aufgabe(task);
                }
            }

            Action::AdoptSession => {
                let (Eingabe::SessionReady(handle)
                | Eingabe::OfferReady(handle, _)
                | Eingabe::AnswerReady(handle, _)) = eingabe
                else {
                    return;
                };
                let Some(anruf) = self.anruf.as_mut() else { return };
                let Some(neu) = handle.take() else { return };
                anruf.sitzung_laeuft = false;
                if let Some(alt) = anruf.session.replace(neu.clone()) {
                    if alt != neu {
                        self.backend.close(alt).await;
                    }
                }
            }

            Action::SendOffer => {
                let Eingabe::OfferReady(_, angebot) = eingabe else { return };
                let Some((peer, call_id)) = self.anruf_ziel() else { return };
                let description = angebot.clone();
                self.senden(&peer, Signal::SessionOffer {
                    scope: NegotiationScope::Call { call_id },
                    description,
                })
                .await;
            }

            Action::StartAnswer => {
                let Eingabe::Signal {
                    signal: Signal::SessionOffer { description, .. },
                    ..
                } = eingabe
                else {
                    return;
                };
                let angebot = description.clone();
                self.anruf_antwort_starten(angebot);
            }

            Action::SendAnswer => {
                let Eingabe::AnswerReady(_, antwort) = eingabe else { return };
                let Some((peer, call_id)) = self.anruf_ziel() else { return };
                let description = antwort.clone();
                self.senden(&peer, Signal::SessionAnswer {
                    scope: NegotiationScope::Call { call_id },
                    description,
                })
                .await;
                if let Some(anruf) = self.anruf.as_mut() {
                    anruf.antwort_laeuft = false;
                }
            }

            Action::ApplyAnswer => {
                let Eingabe::Signal {
                    signal: Signal::SessionAnswer { description, .. },
                    ..
                } = eingabe
                else {
                    return;
                };
                let Some(anruf) = self.anruf.as_ref() else { return };
                let Some(handle) = anruf.session.clone() else {
                    tracing::debug!(call_id = %anruf.call_id, "Antwort ohne Sitzung ignoriert");
                    return;
                };
                if anruf.richtung != Direction::Incoming || description.sdp_type != SdpType::Answer {
                    tracing::debug!(call_id = %anruf.call_id, "Unerwartete Antwort ignoriert");
                    return;
                }
                let epoch = anruf.epoch;
                let antwort = description.clone();
                let backend = Arc::clone(&self.backend);
                let task = self.schritt_starten(epoch, None, async move {
                    Schritt::AnswerApplied(backend.set_remote_description(&handle, antwort).await)
                });
                if let Some(anruf) = self.anruf.as_mut() {
                    anruf.aufgabe(task);
                }
            }

            Action::AddCandidate => {
                let Eingabe::Signal {
                    signal: Signal::NetworkCandidate { candidate, .. },
                    ..
                } = eingabe
                else {
                    return;
                };
                let kandidat = candidate.clone();
                self.anruf_kandidat_anwenden(kandidat);
            }

            Action::ResumePending => {
                let angebot = self.anruf.as_mut().and_then(|a| a.wartendes_angebot.take());
                if let Some(angebot) = angebot {
                    self.anruf_antwort_starten(angebot);
                }
            }

            Action::ForwardCandidate => {
                let Eingabe::LocalCandidate(kandidat) = eingabe else { return };
                let Some((peer, call_id)) = self.anruf_ziel() else { return };
                let candidate = kandidat.clone();
                self.senden(&peer, Signal::NetworkCandidate {
                    scope: NegotiationScope::Call { call_id },
                    candidate,
                })
                .await;
            }

            Action::Release => {
                if let Some(anruf) = self.anruf.as_mut() {
                    anruf.aufgaben.drain(..).for_each(|h| h.abort());
                }
                self.anruf_medien_freigeben().await;
            }

            Action::HidePrompt => {
                let sichtbar = self.anruf.as_mut().is_some_and(|a| {
                    std::mem::replace(&mut a.prompt_sichtbar, false)
                });
                if sichtbar {
                    self.ui(UiEvent::IncomingCallPrompt {
                        visible: false,
                        caller_name: None,
                    });
                }
            }

            Action::ShowRejected => {
                let Eingabe::Signal {
                    signal: Signal::CallRejected { reason, .. },
                    ..
                } = eingabe
                else {
                    return;
                };
                let Some(anruf) = self.anruf.as_ref() else { return };
                let text = match reason {
                    RejectReason::Declined => format!("{} rejected the call", anruf.peer_name),
                    RejectReason::Busy => format!("{} is busy", anruf.peer_name),
                    RejectReason::MediaUnavailable => {
                        format!("{} could not access the microphone", anruf.peer_name)
                    }
                };
                tracing::info!(call_id = %anruf.call_id, grund = ?reason, "Anruf abgelehnt");
                self.ui(UiEvent::status(text));
            }

            Action::ShowConnected => {
                let Some(anruf) = self.anruf.as_mut() else { return };
                anruf.teilnehmer_angezeigt = true;
                let (peer, name) = (anruf.peer.clone(), anruf.peer_name.clone());
                tracing::info!(call_id = %anruf.call_id, peer = %peer, "Anruf verbunden");
                self.ui(UiEvent::status(format!("Connected to {name}")));
                self.ui(UiEvent::ParticipantAdded {
                    user_id: peer,
                    display_name: name,
                });
            }

            Action::ShowEnded => self.ui(UiEvent::status("Call ended")),
            Action::ShowMediaUnavailable => self.ui(UiEvent::status("Microphone access denied")),

            Action::HideCallUi => {
                if self.kanal.is_none() {
                    self.ui(UiEvent::CallUiVisible(false));
                    self.ui(UiEvent::status("Ready to connect"));
                }
            }

            Action::ScheduleRejectGrace => self.grace_planen(self.config.reject_grace()),
            Action::ScheduleEndGrace => self.grace_planen(self.config.end_grace()),
        }
    }

    /// Beantwortet das Angebot des Angerufenen; solange die eigene Sitzung
    /// noch entsteht, wird es zurueckgestellt
    fn anruf_antwort_starten(&mut self, angebot: SessionDescription) {
        let Some(anruf) = self.anruf.as_mut() else { return };
        // Der Angerufene bietet an, nur der Anrufer beantwortet
        if anruf.richtung != Direction::Outgoing
            || anruf.antwort_laeuft
            || angebot.sdp_type != SdpType::Offer
        {
            tracing::debug!(call_id = %anruf.call_id, "Unerwartetes Angebot ignoriert");
            return;
        }
        if anruf.session.is_none() && anruf.sitzung_laeuft {
            if anruf.wartendes_angebot.is_none() {
                tracing::debug!(call_id = %anruf.call_id, "Angebot wartet auf die eigene Sitzung");
                anruf.wartendes_angebot = Some(angebot);
            }
            return;
        }
        let Some(capture) = anruf.capture.clone() else { return };
        let epoch = anruf.epoch;
        let vorhanden = anruf.session.clone();
        let backend = Arc::clone(&self.backend);
        let config = self.session_config();
        let sink = self.kandidaten_senke(epoch, None);
        let task = self.schritt_starten(epoch, None, async move {
            Schritt::Answer(
                media::sitzung_mit_antwort(backend, vorhanden, config, capture, sink, angebot).await,
            )
        });
        if let Some(anruf) = self.anruf.as_mut() {
            anruf.antwort_laeuft = true;
            anruf.aufgabe(task);
        }
    }

    /// Entfernten Kandidaten uebernehmen; ohne Sitzung wird er verworfen
    fn anruf_kandidat_anwenden(&mut self, kandidat: NetworkCandidate) {
        let Some(anruf) = self.anruf.as_ref() else { return };
        let Some(handle) = anruf.session.clone() else {
            tracing::debug!(call_id = %anruf.call_id, "Kandidat vor der Sitzung verworfen");
            return;
        };
        let epoch = anruf.epoch;
        let backend = Arc::clone(&self.backend);
        let task = self.schritt_starten(epoch, None, async move {
            Schritt::CandidateAdded(backend.add_candidate(&handle, kandidat).await)
        });
        if let Some(anruf) = self.anruf.as_mut() {
            anruf.aufgabe(task);
        }
    }

    /// Peer und CallId des aktiven Anrufs
    fn anruf_ziel(&self) -> Option<(UserId, CallId)> {
        self.anruf.as_ref().map(|a| (a.peer.clone(), a.call_id))
    }

    async fn ablehnung_senden(&mut self, reason: RejectReason) {
        let Some((peer, call_id)) = self.anruf_ziel() else { return };
        self.senden(&peer, Signal::CallRejected { call_id, reason }).await;
    }

    fn grace_planen(&self, dauer: std::time::Duration) {
        let epoch = self
            .anruf
            .as_ref()
            .map(|a| a.epoch)
            .unwrap_or(self.letzte_anruf_epoche);
        // Nicht an den Anruf gebunden: Release bricht den Timer nicht ab
        self.schritt_starten(epoch, None, async move {
            tokio::time::sleep(dauer).await;
            Schritt::GraceElapsed
        });
    }

    /// Sitzung und Aufnahme des Anrufs freigeben (ohne Signal)
    pub(super) async fn anruf_medien_freigeben(&mut self) {
        let Some(anruf) = self.anruf.as_mut() else { return };
        if anruf.freigegeben {
            return;
        }
        anruf.freigegeben = true;
        let session = anruf.session.take();
        let capture = anruf.capture.take();
        let teilnehmer = anruf.teilnehmer_angezeigt.then(|| anruf.peer.clone());
        let dauer = (chrono::Utc::now() - anruf.erstellt).num_seconds();
        tracing::debug!(call_id = %anruf.call_id, dauer_sek = dauer, "Anruf-Medien freigegeben");

        if let Some(handle) = session {
            self.backend.close(handle).await;
        }
        if let Some(capture) = capture {
            self.backend.release_capture(capture).await;
            self.audio_zuruecksetzen();
        }
        if let Some(user_id) = teilnehmer {
            self.ui(UiEvent::ParticipantRemoved { user_id });
        }
    }

    /// Signal ueber den Transport senden; Fehler werden nur geloggt, der
    /// Verbindungsverlust kommt separat als `TransportEvent::Lost`
    pub(super) async fn senden(&self, target: &UserId, signal: Signal) {
        let art = signal.art();
        if let Err(e) = self.transport.send(target, signal).await {
            tracing::warn!(target = %target, art, fehler = %e, "Signal konnte nicht gesendet werden");
        }
    }
}
