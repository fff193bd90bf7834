//! parley-signaling – Session Coordinator
//!
//! Serverseitiges Relay fuer Peer-Signale und Voice-Channel-Mitgliedschaft.
//! Der Coordinator interpretiert keine Medien und keine Signal-Inhalte; er
//! stellt sie nur dem richtigen Empfaenger zu.
//!
//! ## Architektur
//!
//! ```text
//! TCP Listener (SignalingServer)
//!     |
//!     v
//! ClientConnection (pro Verbindung ein Task)
//!     |  Verbunden -> Identifiziert (Hello)
//!     |
//!     v
//! MessageDispatcher
//!     |
//!     +-- IdentityHandler (Hello)
//!     +-- SignalHandler   (Signal -> SignalDelivery an den Empfaenger)
//!     +-- ChannelHandler  (Join, Leave)
//!
//! PresenceManager  – Wer ist online, wer ist in welchem Voice-Channel
//! EventBroadcaster – Send-Queue pro identifiziertem Client
//! ```

pub mod broadcast;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod handlers;
pub mod presence;
pub mod server_state;
pub mod tcp;

// Bequeme Re-Exporte
pub use broadcast::{EventBroadcaster, Zustellung};
pub use connection::ClientConnection;
pub use dispatcher::MessageDispatcher;
pub use error::{SignalingError, SignalingResult};
pub use presence::PresenceManager;
pub use server_state::{SignalingConfig, SignalingState};
pub use tcp::SignalingServer;
