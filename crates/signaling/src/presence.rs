//! Presence-Manager – Wer ist online, wer ist in welchem Voice-Channel
//!
//! Der Coordinator ist die einzige Quelle fuer Channel-Mitgliedschaften.
//! Ein Channel entsteht beim ersten Beitritt und verschwindet, sobald er leer
//! ist.
//!
//! ## Reihenfolge
//! Jede Aenderung an einem Channel laeuft unter dem DashMap-Eintrags-Lock
//! dieses Channels, und die zugehoerigen Notices werden noch unter dem Lock
//! in die Send-Queues eingereiht. Damit sehen alle Mitglieder die
//! Aenderungen eines Channels in derselben Reihenfolge.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parley_core::types::{ChannelId, UserId};
use parley_protocol::control::{
    ControlMessage, ControlPayload, MemberInfo, MemberJoinedNotice, MemberLeftNotice,
};
use std::sync::Arc;

use crate::broadcast::EventBroadcaster;

/// Presence-Info eines identifizierten Clients
#[derive(Debug, Clone)]
pub struct ClientPresence {
    pub user_id: UserId,
    pub display_name: String,
    pub verbunden_seit: DateTime<Utc>,
}

/// Ergebnis eines Channel-Beitritts
#[derive(Debug, Clone)]
pub struct Beitritt {
    /// Alle anderen Mitglieder zum Zeitpunkt des Beitritts
    pub mitglieder: Vec<MemberInfo>,
    /// `false` wenn der Benutzer bereits Mitglied war
    pub neu: bool,
    /// Anzahl der eingereihten `MemberJoined`-Notices
    pub benachrichtigt: usize,
}

/// Verwaltet Online-Status und Voice-Channel-Mitgliedschaften
///
/// Thread-safe via Arc + DashMap. Clone teilt den inneren Zustand.
#[derive(Clone)]
pub struct PresenceManager {
    inner: Arc<PresenceManagerInner>,
}

struct PresenceManagerInner {
    clients: DashMap<UserId, ClientPresence>,
    /// Mitglieder in Beitrittsreihenfolge, jede ID hoechstens einmal
    channels: DashMap<ChannelId, Vec<UserId>>,
}

impl PresenceManager {
    pub fn neu() -> Self {
        Self {
            inner: Arc::new(PresenceManagerInner {
                clients: DashMap::new(),
                channels: DashMap::new(),
            }),
        }
    }

    /// Registriert einen identifizierten Client (ueberschreibt bei Neuanmeldung)
    pub fn client_verbunden(&self, user_id: UserId, display_name: impl Into<String>) {
        let presence = ClientPresence {
            user_id: user_id.clone(),
            display_name: display_name.into(),
            verbunden_seit: Utc::now(),
        };
        tracing::info!(user_id = %user_id, display_name = %presence.display_name, "Client online");
        self.inner.clients.insert(user_id, presence);
    }

    /// Entfernt einen Client und laesst ihn alle Channels verlassen
    ///
    /// Laufende 1:1-Anrufe werden nicht beruehrt; der Coordinator kennt sie
    /// nicht. Gibt die verlassenen Channels zurueck.
    pub fn client_getrennt(&self, user_id: &UserId, broadcaster: &EventBroadcaster) -> Vec<ChannelId> {
        let verlassen: Vec<ChannelId> = self
            .channels_von(user_id)
            .into_iter()
            .filter(|channel_id| self.channel_verlassen(channel_id, user_id, broadcaster).is_some())
            .collect();

        if self.inner.clients.remove(user_id).is_some() {
            tracing::info!(user_id = %user_id, channels = verlassen.len(), "Client offline");
        }
        verlassen
    }

    /// Fuegt einen Benutzer einem Channel hinzu
    ///
    /// Nur ein echter Neuzugang erzeugt `MemberJoined` an die bisherigen
    /// Mitglieder. Ein erneuter Beitritt liefert nur den Snapshot.
    pub fn channel_beitreten(
        &self,
        channel_id: &ChannelId,
        user_id: &UserId,
        broadcaster: &EventBroadcaster,
    ) -> Beitritt {
        let mut eintrag = self.inner.channels.entry(channel_id.clone()).or_default();
        let neu = !eintrag.contains(user_id);

        let mut benachrichtigt = 0;
        if neu {
            let notice = ControlMessage::notice(ControlPayload::MemberJoined(MemberJoinedNotice {
                channel_id: channel_id.clone(),
                member: self.member_info(user_id),
            }));
            benachrichtigt = broadcaster.an_users_senden(eintrag.iter(), &notice);
            eintrag.push(user_id.clone());
        }

        let mitglieder = eintrag
            .iter()
            .filter(|uid| *uid != user_id)
            .map(|uid| self.member_info(uid))
            .collect();

        tracing::debug!(
            user_id = %user_id,
            channel_id = %channel_id,
            neu,
            mitglieder = eintrag.len(),
            "Channel beigetreten"
        );

        Beitritt {
            mitglieder,
            neu,
            benachrichtigt,
        }
    }

    /// Entfernt einen Benutzer aus einem Channel
    ///
    /// `None` wenn er kein Mitglied war (dann gibt es auch keine Notice),
    /// sonst die Anzahl der eingereihten `MemberLeft`-Notices.
    pub fn channel_verlassen(
        &self,
        channel_id: &ChannelId,
        user_id: &UserId,
        broadcaster: &EventBroadcaster,
    ) -> Option<usize> {
        let Entry::Occupied(mut eintrag) = self.inner.channels.entry(channel_id.clone()) else {
            return None;
        };

        let position = eintrag.get().iter().position(|uid| uid == user_id)?;
        eintrag.get_mut().remove(position);

        let notice = ControlMessage::notice(ControlPayload::MemberLeft(MemberLeftNotice {
            channel_id: channel_id.clone(),
            user_id: user_id.clone(),
        }));
        let benachrichtigt = broadcaster.an_users_senden(eintrag.get().iter(), &notice);

        if eintrag.get().is_empty() {
            eintrag.remove();
            tracing::debug!(channel_id = %channel_id, "Channel leer, entfernt");
        }

        tracing::debug!(user_id = %user_id, channel_id = %channel_id, "Channel verlassen");
        Some(benachrichtigt)
    }

    /// Alle Mitglieder eines Channels in Beitrittsreihenfolge
    pub fn user_ids_in_channel(&self, channel_id: &ChannelId) -> Vec<UserId> {
        self.inner
            .channels
            .get(channel_id)
            .map(|ids| ids.clone())
            .unwrap_or_default()
    }

    /// Alle Channels in denen ein Benutzer Mitglied ist
    pub fn channels_von(&self, user_id: &UserId) -> Vec<ChannelId> {
        self.inner
            .channels
            .iter()
            .filter(|e| e.value().contains(user_id))
            .map(|e| e.key().clone())
            .collect()
    }

    /// Anzahl der Channels mit mindestens einem Mitglied
    pub fn aktive_channels(&self) -> usize {
        self.inner.channels.len()
    }

    pub fn ist_online(&self, user_id: &UserId) -> bool {
        self.inner.clients.contains_key(user_id)
    }

    pub fn online_anzahl(&self) -> usize {
        self.inner.clients.len()
    }

    pub fn client_presence(&self, user_id: &UserId) -> Option<ClientPresence> {
        self.inner.clients.get(user_id).map(|e| e.clone())
    }

    fn member_info(&self, user_id: &UserId) -> MemberInfo {
        let display_name = self
            .inner
            .clients
            .get(user_id)
            .map(|p| p.display_name.clone())
            .unwrap_or_else(|| user_id.to_string());
        MemberInfo {
            user_id: user_id.clone(),
            display_name,
        }
    }
}

impl Default for PresenceManager {
    fn default() -> Self {
        Self::neu()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    struct Umgebung {
        pm: PresenceManager,
        broadcaster: EventBroadcaster,
    }

    impl Umgebung {
        fn neu() -> Self {
            Self {
                pm: PresenceManager::neu(),
                broadcaster: EventBroadcaster::neu(),
            }
        }

        fn verbinden(&self, name: &str, verbindung_id: u64) -> (UserId, mpsc::Receiver<ControlMessage>) {
            let uid = UserId::from(name);
            self.pm.client_verbunden(uid.clone(), name.to_uppercase());
            let rx = self.broadcaster.client_registrieren(uid.clone(), verbindung_id);
            (uid, rx)
        }
    }

    fn leeren(rx: &mut mpsc::Receiver<ControlMessage>) -> Vec<ControlPayload> {
        let mut alle = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            alle.push(msg.payload);
        }
        alle
    }

    #[test]
    fn drei_beitritte_in_general() {
        let u = Umgebung::neu();
        let general = ChannelId::from("general");
        let (a, mut rx_a) = u.verbinden("a", 1);
        let (b, mut rx_b) = u.verbinden("b", 2);
        let (c, mut rx_c) = u.verbinden("c", 3);

        let ba = u.pm.channel_beitreten(&general, &a, &u.broadcaster);
        assert!(ba.mitglieder.is_empty());
        assert_eq!(ba.benachrichtigt, 0);

        let bb = u.pm.channel_beitreten(&general, &b, &u.broadcaster);
        assert_eq!(bb.mitglieder.len(), 1);
        assert_eq!(bb.mitglieder[0].display_name, "A");
        assert_eq!(bb.benachrichtigt, 1);

        let bc = u.pm.channel_beitreten(&general, &c, &u.broadcaster);
        assert_eq!(bc.mitglieder.len(), 2);
        assert_eq!(bc.benachrichtigt, 2);

        let mut mitglieder = u.pm.user_ids_in_channel(&general);
        mitglieder.sort();
        assert_eq!(mitglieder, vec![a, b, c]);

        // a sieht b und c, b sieht c, c sieht niemanden
        assert_eq!(leeren(&mut rx_a).len(), 2);
        assert_eq!(leeren(&mut rx_b).len(), 1);
        assert!(leeren(&mut rx_c).is_empty());
    }

    #[test]
    fn erneuter_beitritt_ohne_broadcast() {
        let u = Umgebung::neu();
        let general = ChannelId::from("general");
        let (a, mut rx_a) = u.verbinden("a", 1);
        let (b, _rx_b) = u.verbinden("b", 2);

        u.pm.channel_beitreten(&general, &a, &u.broadcaster);
        u.pm.channel_beitreten(&general, &b, &u.broadcaster);
        leeren(&mut rx_a);

        let nochmal = u.pm.channel_beitreten(&general, &b, &u.broadcaster);
        assert!(!nochmal.neu);
        assert_eq!(nochmal.benachrichtigt, 0);
        assert_eq!(nochmal.mitglieder.len(), 1);
        assert!(leeren(&mut rx_a).is_empty());
        assert_eq!(u.pm.user_ids_in_channel(&general).len(), 2);
    }

    #[test]
    fn verlassen_ohne_mitgliedschaft_ist_noop() {
        let u = Umgebung::neu();
        let general = ChannelId::from("general");
        let (a, mut rx_a) = u.verbinden("a", 1);
        let (b, _rx_b) = u.verbinden("b", 2);
        u.pm.channel_beitreten(&general, &a, &u.broadcaster);

        assert_eq!(u.pm.channel_verlassen(&general, &b, &u.broadcaster), None);
        assert_eq!(
            u.pm.channel_verlassen(&ChannelId::from("leer"), &b, &u.broadcaster),
            None
        );
        assert!(leeren(&mut rx_a).is_empty());
        assert_eq!(u.pm.user_ids_in_channel(&general), vec![a]);
    }

    #[test]
    fn verlassen_benachrichtigt_verbleibende() {
        let u = Umgebung::neu();
        let general = ChannelId::from("general");
        let (a, mut rx_a) = u.verbinden("a", 1);
        let (b, _rx_b) = u.verbinden("b", 2);
        u.pm.channel_beitreten(&general, &a, &u.broadcaster);
        u.pm.channel_beitreten(&general, &b, &u.broadcaster);
        leeren(&mut rx_a);

        assert_eq!(u.pm.channel_verlassen(&general, &b, &u.broadcaster), Some(1));
        let notices = leeren(&mut rx_a);
        assert!(matches!(
            notices.as_slice(),
            [ControlPayload::MemberLeft(MemberLeftNotice { user_id, .. })] if *user_id == b
        ));
    }

    #[test]
    fn leerer_channel_wird_entfernt() {
        let u = Umgebung::neu();
        let general = ChannelId::from("general");
        let (a, _rx) = u.verbinden("a", 1);

        u.pm.channel_beitreten(&general, &a, &u.broadcaster);
        assert_eq!(u.pm.aktive_channels(), 1);
        u.pm.channel_verlassen(&general, &a, &u.broadcaster);
        assert_eq!(u.pm.aktive_channels(), 0);
    }

    #[test]
    fn trennen_verlaesst_alle_channels() {
        let u = Umgebung::neu();
        let general = ChannelId::from("general");
        let random = ChannelId::from("random");
        let (a, _rx_a) = u.verbinden("a", 1);
        let (b, mut rx_b) = u.verbinden("b", 2);

        for channel in [&general, &random] {
            u.pm.channel_beitreten(channel, &b, &u.broadcaster);
            u.pm.channel_beitreten(channel, &a, &u.broadcaster);
        }
        leeren(&mut rx_b);

        let mut verlassen = u.pm.client_getrennt(&a, &u.broadcaster);
        verlassen.sort();
        assert_eq!(verlassen, vec![general.clone(), random.clone()]);
        assert!(!u.pm.ist_online(&a));
        assert_eq!(leeren(&mut rx_b).len(), 2);
        assert_eq!(u.pm.user_ids_in_channel(&general), vec![b]);
    }

    #[test]
    fn unbekannter_anzeigename_faellt_auf_id_zurueck() {
        let u = Umgebung::neu();
        let general = ChannelId::from("general");
        let (a, _rx) = u.verbinden("a", 1);
        let geist = UserId::from("geist");

        u.pm.channel_beitreten(&general, &geist, &u.broadcaster);
        let beitritt = u.pm.channel_beitreten(&general, &a, &u.broadcaster);
        assert_eq!(beitritt.mitglieder[0].display_name, "geist");
    }
}
