//! Control-Protokoll (TCP)
//!
//! Definiert alle Steuerungsnachrichten die ueber die TCP-Verbindung
//! zwischen Client und Coordinator ausgetauscht werden.
//!
//! ## Design
//! - Jede Nachricht hat eine `request_id: u32`, Antworten kopieren sie
//! - JSON-Serialisierung via serde (TCP, nicht zeitkritisch)
//! - Tagged Enums fuer typsichere Nachrichtentypen
//! - Peer-Signale werden als `Signal` transportiert und vom Coordinator
//!   nicht interpretiert

use parley_core::types::{ChannelId, UserId};
use serde::{Deserialize, Serialize};

use crate::signal::Signal;

// ---------------------------------------------------------------------------
// Fehler-Codes
// ---------------------------------------------------------------------------

/// Standardisierte Fehler-Codes fuer Error-Responses
///
/// Routing-Fehler gibt es absichtlich nicht: ein Signal an einen nicht
/// verbundenen Benutzer wird still verworfen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Allgemein
    InternalError,
    InvalidRequest,
    // Identitaet
    NotIdentified,
    AlreadyIdentified,
    // Server
    ServerFull,
}

// ---------------------------------------------------------------------------
// Identitaet
// ---------------------------------------------------------------------------

/// Bindet eine opake Identitaet an die Verbindung
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelloRequest {
    pub user_id: UserId,
    /// Anzeigename fuer Channel-Mitgliederlisten
    pub display_name: String,
}

/// Bestaetigung der Identitaet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelloResponse {
    pub user_id: UserId,
    pub server_name: String,
}

// ---------------------------------------------------------------------------
// Signal-Routing
// ---------------------------------------------------------------------------

/// Signal an einen anderen Benutzer (Client -> Coordinator)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalRequest {
    pub target: UserId,
    pub signal: Signal,
}

/// Zugestelltes Signal (Coordinator -> Client), mit Absender gestempelt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalDelivery {
    pub from: UserId,
    pub signal: Signal,
}

// ---------------------------------------------------------------------------
// Voice-Channels
// ---------------------------------------------------------------------------

/// Mitglied eines Voice-Channels
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberInfo {
    pub user_id: UserId,
    pub display_name: String,
}

/// Voice-Channel beitreten
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelJoinRequest {
    pub channel_id: ChannelId,
}

/// Mitglieder-Snapshot fuer den Beitretenden (ohne ihn selbst)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelJoinResponse {
    pub channel_id: ChannelId,
    pub members: Vec<MemberInfo>,
}

/// Voice-Channel verlassen
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelLeaveRequest {
    pub channel_id: ChannelId,
}

/// Benachrichtigung: neues Mitglied im Channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberJoinedNotice {
    pub channel_id: ChannelId,
    pub member: MemberInfo,
}

/// Benachrichtigung: Mitglied hat den Channel verlassen
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberLeftNotice {
    pub channel_id: ChannelId,
    pub user_id: UserId,
}

// ---------------------------------------------------------------------------
// Keepalive
// ---------------------------------------------------------------------------

/// Ping-Nachricht
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingMessage {
    /// Unix-Timestamp in Millisekunden fuer RTT-Messung
    pub timestamp_ms: u64,
}

/// Pong-Antwort (spiegelt Timestamp zurueck)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PongMessage {
    pub echo_timestamp_ms: u64,
    pub server_timestamp_ms: u64,
}

// ---------------------------------------------------------------------------
// Haupt-Enum: ControlPayload
// ---------------------------------------------------------------------------

/// Alle moeglichen Control-Nachrichten (typsicher via Tagged Enum)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlPayload {
    // Identitaet
    Hello(HelloRequest),
    HelloResponse(HelloResponse),

    // Peer-Signale
    Signal(SignalRequest),
    SignalDelivery(SignalDelivery),

    // Voice-Channels
    ChannelJoin(ChannelJoinRequest),
    ChannelJoinResponse(ChannelJoinResponse),
    ChannelLeave(ChannelLeaveRequest),
    MemberJoined(MemberJoinedNotice),
    MemberLeft(MemberLeftNotice),

    // Keepalive
    Ping(PingMessage),
    Pong(PongMessage),

    // Error
    Error(ErrorResponse),
}

impl ControlPayload {
    /// Kurzname fuer Logs
    pub fn art(&self) -> &'static str {
        match self {
            ControlPayload::Hello(_) => "hello",
            ControlPayload::HelloResponse(_) => "hello_response",
            ControlPayload::Signal(_) => "signal",
            ControlPayload::SignalDelivery(_) => "signal_delivery",
            ControlPayload::ChannelJoin(_) => "channel_join",
            ControlPayload::ChannelJoinResponse(_) => "channel_join_response",
            ControlPayload::ChannelLeave(_) => "channel_leave",
            ControlPayload::MemberJoined(_) => "member_joined",
            ControlPayload::MemberLeft(_) => "member_left",
            ControlPayload::Ping(_) => "ping",
            ControlPayload::Pong(_) => "pong",
            ControlPayload::Error(_) => "error",
        }
    }
}

/// Standardisierte Fehler-Antwort
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: ErrorCode,
    pub message: String,
}

// ---------------------------------------------------------------------------
// Control-Frame (Umschlag fuer alle Nachrichten)
// ---------------------------------------------------------------------------

/// Control-Protokoll-Nachricht mit Request/Response-Zuordnung
///
/// Der Coordinator kopiert die `request_id` in direkte Antworten.
/// Unaufgeforderte Nachrichten (Zustellungen, Channel-Notices) tragen 0.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlMessage {
    pub request_id: u32,
    /// Inhalt der Nachricht
    pub payload: ControlPayload,
}

impl ControlMessage {
    /// Erstellt eine neue Control-Nachricht
    pub fn new(request_id: u32, payload: ControlPayload) -> Self {
        Self {
            request_id,
            payload,
        }
    }

    /// Unaufgeforderte Nachricht vom Coordinator
    pub fn notice(payload: ControlPayload) -> Self {
        Self::new(0, payload)
    }

    /// Erstellt eine Hello-Nachricht
    pub fn hello(request_id: u32, user_id: UserId, display_name: impl Into<String>) -> Self {
        Self::new(
            request_id,
            ControlPayload::Hello(HelloRequest {
                user_id,
                display_name: display_name.into(),
            }),
        )
    }

    /// Erstellt ein zu routendes Signal
    pub fn signal(request_id: u32, target: UserId, signal: Signal) -> Self {
        Self::new(
            request_id,
            ControlPayload::Signal(SignalRequest { target, signal }),
        )
    }

    /// Erstellt eine Ping-Nachricht
    pub fn ping(request_id: u32, timestamp_ms: u64) -> Self {
        Self::new(
            request_id,
            ControlPayload::Ping(PingMessage { timestamp_ms }),
        )
    }

    /// Erstellt eine Pong-Antwort
    pub fn pong(request_id: u32, echo_timestamp_ms: u64, server_timestamp_ms: u64) -> Self {
        Self::new(
            request_id,
            ControlPayload::Pong(PongMessage {
                echo_timestamp_ms,
                server_timestamp_ms,
            }),
        )
    }

    /// Erstellt eine Fehler-Antwort
    pub fn error(request_id: u32, code: ErrorCode, message: impl Into<String>) -> Self {
        Self::new(
            request_id,
            ControlPayload::Error(ErrorResponse {
                code,
                message: message.into(),
            }),
        )
    }

    /// Serialisiert die Nachricht als JSON
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Deserialisiert eine Nachricht aus JSON
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::{NegotiationScope, SessionDescription};
    use parley_core::types::CallId;

    #[test]
    fn ping_serialisierung() {
        let msg = ControlMessage::ping(1, 1_700_000_000_000);
        let json = msg.to_json().unwrap();
        assert!(json.contains("\"type\":\"ping\""));
        assert!(json.contains("\"payload\""));
        let decoded = ControlMessage::from_json(&json).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn hello_serialisierung() {
        let msg = ControlMessage::hello(3, UserId::from("alice"), "Alice");
        let json = msg.to_json().unwrap();
        let decoded = ControlMessage::from_json(&json).unwrap();
        assert_eq!(decoded.request_id, 3);
        if let ControlPayload::Hello(h) = decoded.payload {
            assert_eq!(h.user_id, UserId::from("alice"));
            assert_eq!(h.display_name, "Alice");
        } else {
            panic!("Erwartet Hello-Payload");
        }
    }

    #[test]
    fn signal_envelope_json_format() {
        let call_id = CallId::new();
        let msg = ControlMessage::signal(
            7,
            UserId::from("bob"),
            Signal::SessionOffer {
                scope: NegotiationScope::Call { call_id },
                description: SessionDescription::offer("v=0"),
            },
        );
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["request_id"], 7);
        assert_eq!(value["payload"]["type"], "signal");
        assert_eq!(value["payload"]["target"], "bob");
        assert_eq!(value["payload"]["signal"]["signal"], "session_offer");
        assert_eq!(value["payload"]["signal"]["description"]["sdp_type"], "offer");

        let decoded: ControlMessage = serde_json::from_value(value).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn channel_join_response_serialisierung() {
        let msg = ControlMessage::new(
            9,
            ControlPayload::ChannelJoinResponse(ChannelJoinResponse {
                channel_id: ChannelId::from("general"),
                members: vec![MemberInfo {
                    user_id: UserId::from("alice"),
                    display_name: "Alice".into(),
                }],
            }),
        );
        let json = msg.to_json().unwrap();
        let decoded = ControlMessage::from_json(&json).unwrap();
        if let ControlPayload::ChannelJoinResponse(r) = decoded.payload {
            assert_eq!(r.channel_id, ChannelId::from("general"));
            assert_eq!(r.members.len(), 1);
        } else {
            panic!("Erwartet ChannelJoinResponse-Payload");
        }
    }

    #[test]
    fn notice_traegt_request_id_null() {
        let msg = ControlMessage::notice(ControlPayload::MemberLeft(MemberLeftNotice {
            channel_id: ChannelId::from("general"),
            user_id: UserId::from("carol"),
        }));
        assert_eq!(msg.request_id, 0);
        assert_eq!(msg.payload.art(), "member_left");
    }

    #[test]
    fn unbekannter_typ_wird_abgelehnt() {
        let json = r#"{"request_id":1,"payload":{"type":"login","username":"x"}}"#;
        assert!(ControlMessage::from_json(json).is_err());
    }

    #[test]
    fn error_codes_serialisierbar() {
        let codes = [
            ErrorCode::InternalError,
            ErrorCode::InvalidRequest,
            ErrorCode::NotIdentified,
            ErrorCode::AlreadyIdentified,
            ErrorCode::ServerFull,
        ];
        for code in &codes {
            let json = serde_json::to_string(code).unwrap();
            let decoded: ErrorCode = serde_json::from_str(&json).unwrap();
            assert_eq!(*code, decoded);
        }
        assert_eq!(
            serde_json::to_string(&ErrorCode::NotIdentified).unwrap(),
            "\"NOT_IDENTIFIED\""
        );
    }
}
