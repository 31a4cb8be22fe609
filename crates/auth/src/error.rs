//! Fehlertypen fuer Moderation und Session-Validierung

use startblock_core::error::FehlerArt;
use thiserror::Error;

/// Alle moeglichen Fehler im Auth-Crate
#[derive(Debug, Error)]
pub enum AuthError {
    // --- Verbindung ---
    #[error("Benutzer gebannt: {0}")]
    BenutzerGebannt(String),

    #[error("IP gebannt: {0}")]
    IpGebannt(String),

    // --- Session ---
    #[error("Session nicht gefunden oder ungueltig")]
    SessionUngueltig,

    #[error("Session abgelaufen")]
    SessionAbgelaufen,

    // --- Moderation ---
    #[error("Zugriff verweigert: {0}")]
    ZugriffVerweigert(String),

    // --- Store ---
    #[error("Store-Fehler: {0}")]
    Datenbank(#[from] startblock_db::DbError),
}

impl AuthError {
    pub fn verweigert(msg: impl Into<String>) -> Self {
        Self::ZugriffVerweigert(msg.into())
    }

    /// Abbildung auf die Fehler-Taxonomie
    pub fn art(&self) -> FehlerArt {
        match self {
            Self::Datenbank(_) => FehlerArt::Infrastructure,
            _ => FehlerArt::Authorization,
        }
    }
}

/// Result-Alias fuer das Auth-Crate
pub type AuthResult<T> = Result<T, AuthError>;
