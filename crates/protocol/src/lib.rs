//! parley-protocol – Signaling-Protokoll-Definitionen
//!
//! Dieses Crate definiert alle Nachrichtentypen die zwischen Client
//! (Call State Machine) und Server (Session Coordinator) ausgetauscht werden,
//! sowie das Frame-Format der TCP-Verbindung.

pub mod control;
pub mod signal;
pub mod wire;

pub use control::{ControlMessage, ControlPayload, ErrorCode};
pub use signal::{
    NegotiationScope, NetworkCandidate, RejectReason, SessionDescription, SdpType, Signal,
};
pub use wire::FrameCodec;
