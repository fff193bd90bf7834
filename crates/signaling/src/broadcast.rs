//! Event-Broadcaster – Send-Queues aller identifizierten Clients
//!
//! Jede Verbindung bekommt nach dem `Hello` eine eigene, begrenzte Queue.
//! Alles was nicht direkte Antwort auf einen Request ist (zugestellte
//! Signale, Channel-Notices) laeuft ueber diese Queue, damit die Reihenfolge
//! pro Empfaenger erhalten bleibt.
//!
//! Pro `UserId` ist hoechstens eine Queue registriert. Meldet sich derselbe
//! Benutzer erneut an, ersetzt die neue Verbindung die alte; die alte merkt
//! das daran, dass ihre Queue geschlossen wird.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parley_core::types::UserId;
use parley_protocol::control::ControlMessage;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Standard-Groesse der Send-Queue pro Client
pub const SEND_QUEUE_GROESSE: usize = 64;

/// Ergebnis eines Sendeversuchs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Zustellung {
    /// In die Queue des Empfaengers eingereiht
    Eingereiht,
    /// Kein Client mit dieser ID verbunden
    Unbekannt,
    /// Queue voll, Nachricht verworfen
    QueueVoll,
    /// Queue geschlossen (Verbindung endet gerade)
    Geschlossen,
    /// Channel-Signal, Absender oder Empfaenger ist kein Mitglied
    KeinMitglied,
}

impl Zustellung {
    pub fn ist_eingereiht(self) -> bool {
        self == Self::Eingereiht
    }

    /// Label fuer die Drop-Metrik
    pub fn grund(self) -> &'static str {
        match self {
            Self::Eingereiht => "none",
            Self::Unbekannt => "unknown_target",
            Self::QueueVoll => "queue_full",
            Self::Geschlossen => "closed",
            Self::KeinMitglied => "not_in_channel",
        }
    }
}

// ---------------------------------------------------------------------------
// ClientSender
// ---------------------------------------------------------------------------

/// Handle auf die Send-Queue eines verbundenen Clients
#[derive(Clone, Debug)]
pub struct ClientSender {
    pub user_id: UserId,
    /// Verbindung, der diese Queue gehoert
    pub verbindung_id: u64,
    pub tx: mpsc::Sender<ControlMessage>,
}

impl ClientSender {
    /// Sendet eine Nachricht nicht-blockierend an den Client
    pub fn senden(&self, nachricht: ControlMessage) -> Zustellung {
        match self.tx.try_send(nachricht) {
            Ok(()) => Zustellung::Eingereiht,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(user_id = %self.user_id, "Send-Queue voll, Nachricht verworfen");
                Zustellung::QueueVoll
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!(user_id = %self.user_id, "Send-Queue geschlossen (Client getrennt)");
                Zustellung::Geschlossen
            }
        }
    }
}

// ---------------------------------------------------------------------------
// EventBroadcaster
// ---------------------------------------------------------------------------

/// Client-Register des Coordinators
///
/// Thread-safe via Arc + DashMap. Clone teilt den inneren Zustand.
#[derive(Clone)]
pub struct EventBroadcaster {
    inner: Arc<EventBroadcasterInner>,
}

struct EventBroadcasterInner {
    clients: DashMap<UserId, ClientSender>,
    queue_groesse: usize,
}

impl EventBroadcaster {
    /// Erstellt einen Broadcaster mit der Standard-Queue-Groesse
    pub fn neu() -> Self {
        Self::mit_queue_groesse(SEND_QUEUE_GROESSE)
    }

    pub fn mit_queue_groesse(queue_groesse: usize) -> Self {
        Self {
            inner: Arc::new(EventBroadcasterInner {
                clients: DashMap::new(),
                queue_groesse: queue_groesse.max(1),
            }),
        }
    }

    /// Registriert die Queue einer Verbindung und gibt die Empfangsseite zurueck
    ///
    /// Eine bereits registrierte Verbindung desselben Benutzers wird
    /// verdraengt; ihr Sender wird verworfen und ihre Queue damit geschlossen.
    pub fn client_registrieren(
        &self,
        user_id: UserId,
        verbindung_id: u64,
    ) -> mpsc::Receiver<ControlMessage> {
        let (tx, rx) = mpsc::channel(self.inner.queue_groesse);
        let sender = ClientSender {
            user_id: user_id.clone(),
            verbindung_id,
            tx,
        };
        if let Some(alt) = self.inner.clients.insert(user_id.clone(), sender) {
            tracing::info!(
                user_id = %user_id,
                alte_verbindung = alt.verbindung_id,
                neue_verbindung = verbindung_id,
                "Bestehende Verbindung durch neue Anmeldung ersetzt"
            );
        }
        tracing::debug!(user_id = %user_id, verbindung_id, "Client im Broadcaster registriert");
        rx
    }

    /// Entfernt einen Client, aber nur wenn die Registrierung noch zu
    /// `verbindung_id` gehoert
    ///
    /// Gibt `true` zurueck wenn tatsaechlich entfernt wurde.
    pub fn client_entfernen(&self, user_id: &UserId, verbindung_id: u64) -> bool {
        match self.inner.clients.entry(user_id.clone()) {
            Entry::Occupied(eintrag) if eintrag.get().verbindung_id == verbindung_id => {
                eintrag.remove();
                tracing::debug!(user_id = %user_id, verbindung_id, "Client aus Broadcaster entfernt");
                true
            }
            _ => false,
        }
    }

    /// Sendet eine Nachricht an einen einzelnen Client
    pub fn an_user_senden(&self, user_id: &UserId, nachricht: ControlMessage) -> Zustellung {
        match self.inner.clients.get(user_id) {
            Some(sender) => sender.senden(nachricht),
            None => {
                tracing::debug!(user_id = %user_id, "Senden an unbekannten Client");
                Zustellung::Unbekannt
            }
        }
    }

    /// Sendet eine Nachricht an mehrere Clients, gibt die Anzahl der
    /// erfolgreichen Sendungen zurueck
    pub fn an_users_senden<'a>(
        &self,
        user_ids: impl IntoIterator<Item = &'a UserId>,
        nachricht: &ControlMessage,
    ) -> usize {
        user_ids
            .into_iter()
            .filter(|uid| self.an_user_senden(uid, nachricht.clone()).ist_eingereiht())
            .count()
    }

    /// Anzahl der registrierten Clients
    pub fn client_anzahl(&self) -> usize {
        self.inner.clients.len()
    }

    /// Prueft ob ein Client registriert ist
    pub fn ist_registriert(&self, user_id: &UserId) -> bool {
        self.inner.clients.contains_key(user_id)
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::neu()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
