//! parley-call – Call State Machine
//!
//! Client-seitiger Kern fuer Sprachanrufe: eine Instanz pro lokalem
//! Teilnehmer haelt die Sicht auf den 1:1-Anruf (Idle, Ringing, Negotiating,
//! InCall) und den beigetretenen Voice-Channel.
//!
//! ## Aufbau
//! - `table`     – reine Uebergangstabelle `(Phase, Eingabe) -> Plan`
//! - `machine`   – Aktor, der die Tabelle ausfuehrt, plus `CallHandle`
//! - `media`     – `MediaBackend`-Trait fuer den Medien-Transport
//! - `transport` – `SignalTransport`-Trait und TCP-`CoordinatorClient`
//! - `events`    – `UiEvent`s an die Oberflaeche
//!
//! ## Beispiel
//! ```ignore
//! let (client, events) = CoordinatorClient::verbinden(addr, UserId::from("alice"), "Alice").await?;
//! let (handle, mut ui) = CallMachine::spawn(
//!     UserId::from("alice"),
//!     "Alice",
//!     CallConfig::default(),
//!     backend,
//!     Arc::new(client),
//!     events,
//! );
//! handle.start_call(UserId::from("bob")).await?;
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod machine;
pub mod media;
pub mod table;
pub mod transport;

pub use config::CallConfig;
pub use error::{CallError, CallResult};
pub use events::UiEvent;
pub use machine::{CallHandle, CallMachine, CallSnapshot};
pub use media::{CandidateSink, Capture, MediaBackend, MediaSessionHandle, SessionConfig};
pub use table::{CallPhase, Direction};
pub use transport::{CoordinatorClient, SignalTransport, TransportEvent};
