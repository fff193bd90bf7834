//! UI-seitiges Handle der Call State Machine

use parley_core::types::{CallId, ChannelId, UserId};
use tokio::sync::{mpsc, oneshot};

use crate::error::{CallError, CallResult};
use crate::table::CallPhase;

/// Befehl an den Maschinen-Task, Antwort ueber oneshot
pub(crate) enum Befehl {
    StartCall {
        target: UserId,
        antwort: oneshot::Sender<CallResult<()>>,
    },
    AcceptCall {
        antwort: oneshot::Sender<CallResult<()>>,
    },
    RejectCall {
        antwort: oneshot::Sender<CallResult<()>>,
    },
    EndCall {
        antwort: oneshot::Sender<CallResult<()>>,
    },
    ToggleMute {
        antwort: oneshot::Sender<CallResult<bool>>,
    },
    ToggleSpeaker {
        antwort: oneshot::Sender<CallResult<bool>>,
    },
    JoinChannel {
        channel_id: ChannelId,
        antwort: oneshot::Sender<CallResult<()>>,
    },
    LeaveChannel {
        channel_id: ChannelId,
        antwort: oneshot::Sender<CallResult<()>>,
    },
    Snapshot {
        antwort: oneshot::Sender<CallResult<CallSnapshot>>,
    },
}

/// Momentaufnahme des Maschinenzustands
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSnapshot {
    pub phase: CallPhase,
    pub call_id: Option<CallId>,
    pub peer: Option<UserId>,
    /// Aktiver Voice-Channel
    pub channel: Option<ChannelId>,
    /// Bekannte Channel-Mitglieder (ohne sich selbst), sortiert
    pub channel_members: Vec<UserId>,
    /// Channel-Mitglieder mit ausgehandelter Peer-Verbindung, sortiert
    pub connected_peers: Vec<UserId>,
    pub muted: bool,
    pub speaker_enabled: bool,
}

/// Klonbares Handle fuer die UI
///
/// Jeder Befehl wird in die Queue der Maschine gestellt und wartet auf deren
/// Antwort. Ist der Maschinen-Task beendet, kommt `CallError::Stopped`.
#[derive(Clone)]
pub struct CallHandle {
    tx: mpsc::Sender<Befehl>,
}

impl CallHandle {
    pub(crate) fn new(tx: mpsc::Sender<Befehl>) -> Self {
        Self { tx }
    }

    async fn anfragen<T>(
        &self,
        befehl: impl FnOnce(oneshot::Sender<CallResult<T>>) -> Befehl,
    ) -> CallResult<T> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(befehl(tx))
            .await
            .map_err(|_| CallError::Stopped)?;
        rx.await.map_err(|_| CallError::Stopped)?
    }

    /// Ruft `target` an
    pub async fn start_call(&self, target: UserId) -> CallResult<()> {
        self.anfragen(|antwort| Befehl::StartCall { target, antwort })
            .await
    }

    pub async fn accept_call(&self) -> CallResult<()> {
        self.anfragen(|antwort| Befehl::AcceptCall { antwort }).await
    }

    pub async fn reject_call(&self) -> CallResult<()> {
        self.anfragen(|antwort| Befehl::RejectCall { antwort }).await
    }

    /// Legt auf oder bricht einen ausgehenden Anruf ab
    pub async fn end_call(&self) -> CallResult<()> {
        self.anfragen(|antwort| Befehl::EndCall { antwort }).await
    }

    /// Gibt den neuen Mute-Zustand zurueck
    pub async fn toggle_mute(&self) -> CallResult<bool> {
        self.anfragen(|antwort| Befehl::ToggleMute { antwort }).await
    }

    /// Gibt zurueck ob der Lautsprecher jetzt an ist
    pub async fn toggle_speaker(&self) -> CallResult<bool> {
        self.anfragen(|antwort| Befehl::ToggleSpeaker { antwort })
            .await
    }

    pub async fn join_channel(&self, channel_id: ChannelId) -> CallResult<()> {
        self.anfragen(|antwort| Befehl::JoinChannel {
            channel_id,
            antwort,
        })
        .await
    }

    pub async fn leave_channel(&self, channel_id: ChannelId) -> CallResult<()> {
        self.anfragen(|antwort| Befehl::LeaveChannel {
            channel_id,
            antwort,
        })
        .await
    }

    pub async fn snapshot(&self) -> CallResult<CallSnapshot> {
        self.anfragen(|antwort| Befehl::Snapshot { antwort }).await
    }
}
