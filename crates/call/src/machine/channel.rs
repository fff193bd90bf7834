//! Voice-Channel: ein Peer-Mesh ueber dieselben Medien-Schritte wie der
//! 1:1-Anruf
//!
//! Der Beitretende bietet jedem bereits anwesenden Mitglied an, Mitglieder
//! warten auf das Angebot des Neuen. Signale tragen den Channel als Scope
//! und werden nur von bekannten Mitgliedern angenommen.

use parley_core::types::{ChannelId, UserId};
use parley_protocol::control::MemberInfo;
use parley_protocol::signal::{NegotiationScope, SdpType, SessionDescription, Signal};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;

use super::{Abschluss, CallMachine, Schritt};
use crate::error::{CallError, CallResult};
use crate::events::UiEvent;
use crate::media::{self, Capture, MediaSessionHandle};

/// Lokaler Zustand des beigetretenen Voice-Channels
pub(crate) struct Kanal {
    pub(crate) channel_id: ChannelId,
    pub(crate) epoch: u64,
    pub(crate) capture: Option<Capture>,
    peers: HashMap<UserId, Peer>,
    aufgaben: Vec<JoinHandle<()>>,
}

struct Peer {
    display_name: String,
    session: Option<MediaSessionHandle>,
    /// Wir sind spaeter beigetreten und bieten an
    anbieter: bool,
    schritt_laeuft: bool,
    /// Angebot, das vor der eigenen Aufnahme ankam
    wartendes_angebot: Option<SessionDescription>,
    verbunden: bool,
}

impl Peer {
    fn neu(display_name: String, anbieter: bool) -> Self {
        Self {
            display_name,
            session: None,
            anbieter,
            schritt_laeuft: false,
            wartendes_angebot: None,
            verbunden: false,
        }
    }
}

impl Kanal {
    fn neu(channel_id: ChannelId, epoch: u64) -> Self {
        Self {
            channel_id,
            epoch,
            capture: None,
            peers: HashMap::new(),
            aufgaben: Vec::new(),
        }
    }

    fn aufgabe(&mut self, handle: JoinHandle<()>) {
        self.aufgaben.retain(|h| !h.is_finished());
        self.aufgaben.push(handle);
    }

    pub(crate) fn mitglieder(&self) -> Vec<UserId> {
        let mut ids: Vec<_> = self.peers.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub(crate) fn verbundene_peers(&self) -> Vec<UserId> {
        let mut ids: Vec<_> = self
            .peers
            .iter()
            .filter(|(_, p)| p.verbunden)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }
}

impl CallMachine {
    pub(super) async fn channel_beitreten(&mut self, channel_id: ChannelId) -> CallResult<()> {
        if !self.phase.is_idle() || self.anruf.is_some() {
            return Err(CallError::Busy);
        }
        if let Some(kanal) = &self.kanal {
            if kanal.channel_id == channel_id {
                return Ok(());
            }
            let alt = kanal.channel_id.clone();
            self.channel_verlassen(alt).await?;
        }

        self.transport.join_channel(&channel_id).await?;

        let epoch = self.neue_epoche();
        tracing::info!(channel_id = %channel_id, "Voice-Channel beigetreten");
        let mut kanal = Kanal::neu(channel_id, epoch);

        let backend = Arc::clone(&self.backend);
        let task = self.schritt_starten(epoch, None, async move {
            Schritt::Capture(backend.acquire_local_capture().await)
        });
        kanal.aufgabe(task);
        self.kanal = Some(kanal);

        self.ui(UiEvent::CallUiVisible(true));
        self.ui(UiEvent::status("Joined voice channel"));
        Ok(())
    }

    pub(super) async fn channel_verlassen(&mut self, channel_id: ChannelId) -> CallResult<()> {
        match &self.kanal {
            Some(k) if k.channel_id == channel_id => {}
            _ => return Err(CallError::InvalidState("kein Voice-Channel")),
        }
        if let Err(e) = self.transport.leave_channel(&channel_id).await {
            tracing::warn!(channel_id = %channel_id, fehler = %e, "ChannelLeave nicht gesendet");
        }
        tracing::info!(channel_id = %channel_id, "Voice-Channel verlassen");
        self.kanal_aufloesen().await;
        Ok(())
    }

    /// Lokalen Channel-Zustand abbauen, ohne den Coordinator zu informieren
    pub(super) async fn kanal_aufloesen(&mut self) {
        let Some(mut kanal) = self.kanal.take() else { return };
        kanal.aufgaben.drain(..).for_each(|h| h.abort());

        for (user_id, peer) in kanal.peers.drain() {
            if let Some(handle) = peer.session {
                self.backend.close(handle).await;
            }
            self.ui(UiEvent::ParticipantRemoved { user_id });
        }
        if let Some(capture) = kanal.capture.take() {
            self.backend.release_capture(capture).await;
            self.audio_zuruecksetzen();
        }
        self.ui(UiEvent::CallUiVisible(false));
        self.ui(UiEvent::status("Ready to connect"));
    }

    /// Passt das Event zum aktuellen Channel?
    fn kanal_mut(&mut self, channel_id: &ChannelId) -> Option<&mut Kanal> {
        self.kanal
            .as_mut()
            .filter(|k| &k.channel_id == channel_id)
    }

    pub(super) async fn channel_snapshot(&mut self, channel_id: ChannelId, members: Vec<MemberInfo>) {
        let local = self.local.clone();
        let Some(kanal) = self.kanal_mut(&channel_id) else {
            tracing::debug!(channel_id = %channel_id, "Snapshot fuer fremden Channel ignoriert");
            return;
        };

        let mut neu = Vec::new();
        for member in members {
            if member.user_id == local || kanal.peers.contains_key(&member.user_id) {
                continue;
            }
            kanal
                .peers
                .insert(member.user_id.clone(), Peer::neu(member.display_name.clone(), true));
            neu.push(member);
        }
        tracing::debug!(channel_id = %channel_id, mitglieder = neu.len(), "Mitglieder-Snapshot erhalten");

        for member in neu {
            self.ui(UiEvent::ParticipantAdded {
                user_id: member.user_id,
                display_name: member.display_name,
            });
        }
        self.angebote_starten();
    }

    pub(super) fn mitglied_beigetreten(&mut self, channel_id: ChannelId, member: MemberInfo) {
        let local = self.local.clone();
        let Some(kanal) = self.kanal_mut(&channel_id) else { return };
        if member.user_id == local || kanal.peers.contains_key(&member.user_id) {
            return;
        }
        kanal
            .peers
            .insert(member.user_id.clone(), Peer::neu(member.display_name.clone(), false));
        tracing::debug!(channel_id = %channel_id, user_id = %member.user_id, "Neues Channel-Mitglied");
        self.ui(UiEvent::ParticipantAdded {
            user_id: member.user_id,
            display_name: member.display_name,
        });
    }

    pub(super) async fn mitglied_gegangen(&mut self, channel_id: ChannelId, user_id: UserId) {
        let Some(kanal) = self.kanal_mut(&channel_id) else { return };
        let Some(peer) = kanal.peers.remove(&user_id) else { return };
        tracing::debug!(channel_id = %channel_id, user_id = %user_id, "Channel-Mitglied gegangen");
        if let Some(handle) = peer.session {
            self.backend.close(handle).await;
        }
        self.ui(UiEvent::ParticipantRemoved { user_id });
    }

    /// Startet Angebote an alle Peers, denen wir anbieten muessen
    fn angebote_starten(&mut self) {
        let Some(kanal) = self.kanal.as_ref() else { return };
        let Some(capture) = kanal.capture.clone() else { return };
        let epoch = kanal.epoch;
        let ziele: Vec<UserId> = kanal
            .peers
            .iter()
            .filter(|(_, p)| p.anbieter && p.session.is_none() && !p.schritt_laeuft)
            .map(|(id, _)| id.clone())
            .collect();

        for ziel in ziele {
            let backend = Arc::clone(&self.backend);
            let config = self.session_config();
            let sink = self.kandidaten_senke(epoch, Some(ziel.clone()));
            let capture = capture.clone();
            let task = self.schritt_starten(epoch, Some(ziel.clone()), async move {
                Schritt::Offer(media::sitzung_mit_angebot(backend, config, capture, sink).await)
            });
            if let Some(kanal) = self.kanal.as_mut() {
                kanal.aufgabe(task);
                if let Some(peer) = kanal.peers.get_mut(&ziel) {
                    peer.schritt_laeuft = true;
                }
            }
        }
    }

    /// Beantwortet ein Angebot eines Channel-Mitglieds
    fn antwort_starten(&mut self, von: UserId, angebot: SessionDescription) {
        let Some(kanal) = self.kanal.as_ref() else { return };
        let Some(capture) = kanal.capture.clone() else { return };
        let Some(peer) = kanal.peers.get(&von) else { return };
        let epoch = kanal.epoch;
        let vorhanden = peer.session.clone();

        let backend = Arc::clone(&self.backend);
        let config = self.session_config();
        let sink = self.kandidaten_senke(epoch, Some(von.clone()));
        let task = self.schritt_starten(epoch, Some(von.clone()), async move {
            Schritt::Answer(
                media::sitzung_mit_antwort(backend, vorhanden, config, capture, sink, angebot).await,
            )
        });
        if let Some(kanal) = self.kanal.as_mut() {
            kanal.aufgabe(task);
            if let Some(peer) = kanal.peers.get_mut(&von) {
                peer.schritt_laeuft = true;
            }
        }
    }

    /// Signal mit Channel-Scope
    pub(super) async fn kanal_signal(&mut self, from: UserId, signal: Signal) {
        let Some(NegotiationScope::Channel { channel_id }) = signal.scope().cloned() else {
            return;
        };
        let bekannt = self
            .kanal_mut(&channel_id)
            .is_some_and(|k| k.peers.contains_key(&from));
        if !bekannt {
            tracing::debug!(
                channel_id = %channel_id,
                from = %from,
                art = signal.art(),
                "Channel-Signal von Nicht-Mitglied verworfen"
            );
            return;
        }

        match signal {
            Signal::SessionOffer { description, .. } if description.sdp_type == SdpType::Offer => {
                let capture_da = self.kanal.as_ref().is_some_and(|k| k.capture.is_some());
                if !capture_da {
                    if let Some(peer) = self
                        .kanal
                        .as_mut()
                        .and_then(|k| k.peers.get_mut(&from))
                    {
                        peer.wartendes_angebot = Some(description);
                    }
                    return;
                }
                let laeuft = self
                    .kanal
                    .as_ref()
                    .and_then(|k| k.peers.get(&from))
                    .is_some_and(|p| p.schritt_laeuft);
                if laeuft {
                    tracing::debug!(from = %from, "Angebot waehrend laufender Aushandlung ignoriert");
                    return;
                }
                self.antwort_starten(from, description);
            }

            Signal::SessionAnswer { description, .. } if description.sdp_type == SdpType::Answer => {
                let Some(kanal) = self.kanal.as_ref() else { return };
                let Some(handle) = kanal.peers.get(&from).and_then(|p| p.session.clone()) else {
                    tracing::debug!(from = %from, "Antwort ohne Sitzung verworfen");
                    return;
                };
                let epoch = kanal.epoch;
                let backend = Arc::clone(&self.backend);
                let task = self.schritt_starten(epoch, Some(from), async move {
                    Schritt::AnswerApplied(backend.set_remote_description(&handle, description).await)
                });
                if let Some(kanal) = self.kanal.as_mut() {
                    kanal.aufgabe(task);
                }
            }

            Signal::NetworkCandidate { candidate, .. } => {
                let Some(kanal) = self.kanal.as_ref() else { return };
                let Some(handle) = kanal.peers.get(&from).and_then(|p| p.session.clone()) else {
                    tracing::debug!(from = %from, "Kandidat vor der Sitzung verworfen");
                    return;
                };
                let epoch = kanal.epoch;
                let backend = Arc::clone(&self.backend);
                let task = self.schritt_starten(epoch, Some(from), async move {
                    Schritt::CandidateAdded(backend.add_candidate(&handle, candidate).await)
                });
                if let Some(kanal) = self.kanal.as_mut() {
                    kanal.aufgabe(task);
                }
            }

            andere => {
                tracing::debug!(from = %from, art = andere.art(), "Unerwartetes Channel-Signal");
            }
        }
    }

    /// Abschluss eines Schritts mit der Epoche des aktuellen Channels
    pub(super) async fn kanal_abschluss(&mut self, abschluss: Abschluss) {
        let Some(peer_id) = abschluss.peer else {
            match abschluss.schritt {
                Schritt::Capture(Ok(capture)) => self.kanal_capture_bereit(capture),
                Schritt::Capture(Err(e)) => {
                    tracing::warn!(fehler = %e, "Aufnahme fuer Voice-Channel fehlgeschlagen");
                    let channel_id = self.kanal.as_ref().map(|k| k.channel_id.clone());
                    if let Some(channel_id) = channel_id {
                        let _ = self.channel_verlassen(channel_id).await;
                    }
                    self.ui(UiEvent::status("Microphone access denied"));
                }
                andere => self.schritt_verwerfen(andere).await,
            }
            return;
        };

        let peer_bekannt = self
            .kanal
            .as_ref()
            .is_some_and(|k| k.peers.contains_key(&peer_id));
        if !peer_bekannt {
            // Mitglied inzwischen gegangen
            self.schritt_verwerfen(abschluss.schritt).await;
            return;
        }

        let channel_id = match self.kanal.as_ref() {
            Some(k) => k.channel_id.clone(),
            None => return,
        };

        match abschluss.schritt {
            Schritt::Offer(Ok((handle, angebot))) => {
                if !self.peer_sitzung_setzen(&peer_id, handle).await {
                    return;
                }
                self.senden(
                    &peer_id,
                    Signal::SessionOffer {
                        scope: NegotiationScope::Channel { channel_id },
                        description: angebot,
                    },
                )
                .await;
            }
            Schritt::Answer(Ok((handle, antwort))) => {
                if !self.peer_sitzung_setzen(&peer_id, handle).await {
                    return;
                }
                self.peer_verbunden(&peer_id);
                self.senden(
                    &peer_id,
                    Signal::SessionAnswer {
                        scope: NegotiationScope::Channel { channel_id },
                        description: antwort,
                    },
                )
                .await;
            }
            Schritt::AnswerApplied(Ok(())) => self.peer_verbunden(&peer_id),
            Schritt::CandidateAdded(Ok(())) => {}
            Schritt::LocalCandidate(candidate) => {
                self.senden(
                    &peer_id,
                    Signal::NetworkCandidate {
                        scope: NegotiationScope::Channel { channel_id },
                        candidate,
                    },
                )
                .await;
            }
            Schritt::CandidateAdded(Err(e)) => {
                tracing::debug!(peer = %peer_id, fehler = %e, "Kandidat nicht uebernommen");
            }
            Schritt::Offer(Err(e)) | Schritt::Answer(Err(e)) | Schritt::AnswerApplied(Err(e)) => {
                tracing::warn!(peer = %peer_id, fehler = %e, "Aushandlung mit Channel-Peer fehlgeschlagen");
                self.peer_trennen(&peer_id).await;
            }
            andere @ (Schritt::Capture(_) | Schritt::Session(_)) => {
                self.schritt_verwerfen(andere).await
            }
            Schritt::GraceElapsed => {}
        }
    }

    fn kanal_capture_bereit(&mut self, capture: Capture) {
        let Some(kanal) = self.kanal.as_mut() else { return };
        tracing::debug!(channel_id = %kanal.channel_id, "Aufnahme fuer Voice-Channel bereit");
        kanal.capture = Some(capture);

        let wartend: Vec<(UserId, SessionDescription)> = kanal
            .peers
            .iter_mut()
            .filter_map(|(id, p)| p.wartendes_angebot.take().map(|a| (id.clone(), a)))
            .collect();

        self.angebote_starten();
        for (von, angebot) in wartend {
            self.antwort_starten(von, angebot);
        }
    }

    /// Uebernimmt die Sitzung eines Peers; `false` wenn der Peer schon eine
    /// andere hat (dann wird die neue geschlossen)
    async fn peer_sitzung_setzen(&mut self, peer_id: &UserId, handle: MediaSessionHandle) -> bool {
        let Some(peer) = self
            .kanal
            .as_mut()
            .and_then(|k| k.peers.get_mut(peer_id))
        else {
            self.backend.close(handle).await;
            return false;
        };
        peer.schritt_laeuft = false;
        if peer.session.as_ref().is_some_and(|vorhanden| *vorhanden != handle) {
            self.backend.close(handle).await;
            return false;
        }
        peer.session = Some(handle);
        true
    }

    fn peer_verbunden(&mut self, peer_id: &UserId) {
        let Some(peer) = self
            .kanal
            .as_mut()
            .and_then(|k| k.peers.get_mut(peer_id))
        else {
            return;
        };
        if !peer.verbunden {
            peer.verbunden = true;
            tracing::info!(peer = %peer_id, name = %peer.display_name, "Channel-Peer verbunden");
        }
    }

    /// Schliesst die Verbindung zu einem Peer, er bleibt Mitglied
    async fn peer_trennen(&mut self, peer_id: &UserId) {
        let session = self
            .kanal
            .as_mut()
            .and_then(|k| k.peers.get_mut(peer_id))
            .and_then(|p| {
                p.schritt_laeuft = false;
                p.verbunden = false;
                p.session.take()
            });
        if let Some(handle) = session {
            self.backend.close(handle).await;
        }
    }
}
