//! parley-core – Gemeinsame Typen und Fehlertypen
//!
//! Dieses Crate stellt die Bausteine bereit, die Coordinator (Server) und
//! Call State Machine (Client) gemeinsam nutzen.

pub mod error;
pub mod types;

// Re-Exporte fuer bequemen Zugriff
pub use error::{ParleyError, Result};
pub use types::{CallId, ChannelId, UserId};
