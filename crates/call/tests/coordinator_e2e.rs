//! Ende-zu-Ende: Call State Machines ueber einen echten Session Coordinator

mod common;

use common::FakeMedia;
use parley_call::{
    CallConfig, CallHandle, CallMachine, CallPhase, CallSnapshot, CoordinatorClient, Direction,
    UiEvent,
};
use parley_core::types::{ChannelId, UserId};
use parley_signaling::{SignalingConfig, SignalingServer, SignalingState};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

struct Client {
    handle: CallHandle,
    _ui: mpsc::UnboundedReceiver<UiEvent>,
    media: Arc<FakeMedia>,
}

impl Client {
    async fn warten_auf(&self, bedingung: impl Fn(&CallSnapshot) -> bool) -> CallSnapshot {
        let mut letzter = None;
        for _ in 0..250 {
            let snapshot = self.handle.snapshot().await.expect("snapshot fehlgeschlagen");
            if bedingung(&snapshot) {
                return snapshot;
            }
            letzter = Some(snapshot);
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("Bedingung nicht erreicht, letzter Zustand: {letzter:?}");
    }
}

async fn coordinator_starten() -> (SocketAddr, watch::Sender<bool>) {
    let state = SignalingState::neu(SignalingConfig::default(), None);
    let server = SignalingServer::binden(state, "127.0.0.1:0".parse().unwrap())
        .await
        .expect("Binden fehlgeschlagen");
    let addr = server.lokale_adresse().unwrap();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(server.starten(shutdown_rx));
    (addr, shutdown_tx)
}

async fn client(addr: SocketAddr, user: &str) -> Client {
    let user_id = UserId::from(user);
    let (transport, events) = CoordinatorClient::verbinden(addr, user_id.clone(), user.to_uppercase())
        .await
        .expect("Anmeldung fehlgeschlagen");
    let media = FakeMedia::neu();
    let (handle, ui) = CallMachine::spawn(
        user_id,
        user.to_uppercase(),
        CallConfig::default(),
        media.clone(),
        Arc::new(transport),
        events,
    );
    Client {
        handle,
        _ui: ui,
        media,
    }
}

#[tokio::test]
async fn anruf_ueber_coordinator() {
    let (addr, _shutdown) = coordinator_starten().await;
    let alice = client(addr, "alice").await;
    let bob = client(addr, "bob").await;

    alice
        .handle
        .start_call(UserId::from("bob"))
        .await
        .expect("start_call fehlgeschlagen");
    bob.warten_auf(|s| s.phase == CallPhase::Ringing(Direction::Incoming))
        .await;
    bob.handle.accept_call().await.expect("accept_call fehlgeschlagen");

    let a = alice.warten_auf(|s| s.phase == CallPhase::InCall).await;
    let b = bob.warten_auf(|s| s.phase == CallPhase::InCall).await;
    assert_eq!(a.call_id, b.call_id);
    assert_eq!(a.peer, Some(UserId::from("bob")));
    assert_eq!(b.peer, Some(UserId::from("alice")));

    bob.handle.end_call().await.expect("end_call fehlgeschlagen");
    alice.warten_auf(|s| s.phase == CallPhase::Idle).await;
    assert_eq!(alice.media.offene_sessions(), 0);
    assert_eq!(bob.media.offene_sessions(), 0);
}

#[tokio::test]
async fn drei_teilnehmer_bilden_ein_mesh() {
    let (addr, _shutdown) = coordinator_starten().await;
    let alice = client(addr, "alice").await;
    let bob = client(addr, "bob").await;
    let carol = client(addr, "carol").await;
    let general = ChannelId::from("general");

    alice
        .handle
        .join_channel(general.clone())
        .await
        .expect("join_channel fehlgeschlagen");
    alice.warten_auf(|s| s.channel.is_some()).await;

    bob.handle.join_channel(general.clone()).await.expect("join_channel fehlgeschlagen");
    bob.warten_auf(|s| s.connected_peers.len() == 1).await;

    carol.handle.join_channel(general.clone()).await.expect("join_channel fehlgeschlagen");

    let alle = |ich: &str| -> Vec<UserId> {
        ["alice", "bob", "carol"]
            .into_iter()
            .filter(|u| *u != ich)
            .map(UserId::from)
            .collect()
    };
    for (name, teilnehmer) in [("alice", &alice), ("bob", &bob), ("carol", &carol)] {
        let erwartet = alle(name);
        let s = teilnehmer
            .warten_auf(|s| s.connected_peers == erwartet)
            .await;
        assert_eq!(s.channel_members, erwartet);
        assert_eq!(teilnehmer.media.offene_sessions(), 2);
    }

    // Der jeweils Beitretende bietet an
    assert_eq!(alice.media.erzeugte_angebote(), 0);
    assert_eq!(bob.media.erzeugte_angebote(), 1);
    assert_eq!(carol.media.erzeugte_angebote(), 2);

    carol.handle.leave_channel(general.clone()).await.expect("leave_channel fehlgeschlagen");
    let erwartet = vec![UserId::from("bob")];
    alice.warten_auf(|s| s.channel_members == erwartet).await;
    assert_eq!(carol.media.offene_sessions(), 0);
}

#[tokio::test]
async fn kandidaten_flut_in_beide_richtungen_blockiert_nicht() {
    let (addr, _shutdown) = coordinator_starten().await;
    let alice = client(addr, "alice").await;
    let bob = client(addr, "bob").await;
    let general = ChannelId::from("general");

    alice.handle.join_channel(general.clone()).await.expect("join_channel fehlgeschlagen");
    alice.warten_auf(|s| s.channel.is_some()).await;
    bob.handle.join_channel(general.clone()).await.expect("join_channel fehlgeschlagen");
    alice.warten_auf(|s| s.connected_peers.len() == 1).await;
    bob.warten_auf(|s| s.connected_peers.len() == 1).await;

    for i in 0..2000 {
        alice.media.kandidat_melden(&format!("candidate:alice-{i}"));
        bob.media.kandidat_melden(&format!("candidate:bob-{i}"));
    }

    // Beide Maschinen bleiben ansprechbar
    for teilnehmer in [&alice, &bob] {
        let snapshot = tokio::time::timeout(Duration::from_secs(5), teilnehmer.handle.snapshot())
            .await
            .expect("Maschine blockiert")
            .expect("snapshot fehlgeschlagen");
        assert_eq!(snapshot.channel, Some(general.clone()));
    }

    // Ueberlaufende Queues im Coordinator duerfen verwerfen, aber etwas kommt an
    for _ in 0..250 {
        if !alice.media.kandidaten().is_empty() && !bob.media.kandidaten().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(!alice.media.kandidaten().is_empty());
    assert!(!bob.media.kandidaten().is_empty());

    tokio::time::timeout(Duration::from_secs(5), bob.handle.leave_channel(general.clone()))
        .await
        .expect("leave_channel blockiert")
        .expect("leave_channel fehlgeschlagen");
    let erwartet: Vec<UserId> = Vec::new();
    alice.warten_auf(|s| s.channel_members == erwartet).await;
}
