//! startblock-signaling – Echtzeit-Koordination von Rennen
//!
//! Dieser Crate implementiert den WebSocket-Service fuer Startblock. Er
//! verwaltet Verbindungen, Chat-Raeume, Rennen samt Countdown und
//! Watchdog, Moderation und Rate-Limits.
//!
//! ## Architektur
//!
//! ```text
//! WebSocket-Endpunkt /ws (ws.rs)
//!     |  Handshake: IP-Ban -> Session -> Benutzer-Ban
//!     |
//!     v
//! Verbindungs-Task (pro Verbindung ein Task, Send-Queue pro Client)
//!     |
//!     v
//! CommandDispatcher ── RateLimiter
//!     |
//!     +-- RoomHandler     (Join, Leave, Chat, Private, Liste)
//!     +-- RaceHandler     (Create, Join, Ready, Finish, Quit, ...)
//!     +-- ProfileHandler  (Profil, Name, Stream, Twitch-Bot)
//!     +-- AdminHandler    (Ban, IP-Ban, Squelch, Promote, Demote)
//!
//! ConnectionRegistry – Verbindung <-> Benutzer, Raeume pro Verbindung
//! RoomBroadcaster    – Raum-Mitgliedschaft und Zustellung
//! RaceEngine         – Zustandsmaschine und Timer pro Rennen
//! ```

pub mod broadcast;
pub mod dispatcher;
pub mod error;
pub mod handlers;
pub mod race;
pub mod rate_limit;
pub mod registry;
pub mod server_state;
pub mod ws;

// Bequeme Re-Exporte
pub use broadcast::RoomBroadcaster;
pub use dispatcher::{BefehlsKontext, CommandDispatcher, Verarbeitung};
pub use error::{BefehlsFehler, BefehlsResult};
pub use race::{RaceEngine, RennDienste, RennFehler, RennKonfig, RennResult};
pub use rate_limit::{RateLimitKonfig, RateLimiter};
pub use registry::{ConnectionRegistry, VerbindungsHandle};
pub use server_state::{SignalingConfig, SignalingDienste, SignalingState};
pub use ws::{ws_router, ws_server_starten};
