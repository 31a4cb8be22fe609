//! startblock-core – Gemeinsame Typen, Traits und Fehlertypen
//!
//! Dieses Crate stellt die Bausteine bereit, die von allen anderen
//! Startblock-Crates gemeinsam genutzt werden: ID-Newtypes, Rollen, den
//! Erfolgskatalog, die Fehler-Taxonomie und den Notifier-Trait fuer Rennereignisse.

pub mod error;
pub mod event;
pub mod types;

// Re-Exporte fuer bequemen Zugriff
pub use error::FehlerArt;
pub use event::{LogNotifier, Notifier, NotifierFehler, RennEreignis};
pub use types::{Achievement, ConnectionId, RaceId, Rating, Rolle, UserId};
