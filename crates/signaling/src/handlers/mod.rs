//! Handler fuer alle Control-Nachrichten
//!
//! Jeder Handler ist fuer einen Nachrichtentyp zustaendig und arbeitet auf
//! dem gemeinsamen `SignalingState`.

pub mod channel_handler;
pub mod identity_handler;
pub mod signal_handler;
