//! startblock-auth – Moderation und Session-Validierung
//!
//! Dieses Crate implementiert:
//! - ModerationGate (Bans, IP-Bans, Stummschaltung, Rollen und deren Pruefung)
//! - Session-Validierung beim Verbindungsaufbau (SessionValidator-Trait)
//! - SessionStore (in-memory Tokens mit TTL)

pub mod error;
pub mod moderation;
pub mod session;

// Bequeme Re-Exporte
pub use error::{AuthError, AuthResult};
pub use moderation::ModerationGate;
pub use session::{Handshake, Session, SessionStore, SessionValidator};
