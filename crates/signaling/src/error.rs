//! Fehlertypen fuer die Befehlsverarbeitung
//!
//! Jeder Fehler wird auf eine `FehlerArt` abgebildet und nur an die
//! ausloesende Verbindung zurueckgemeldet.

use startblock_auth::AuthError;
use startblock_core::error::FehlerArt;
use startblock_db::DbError;
use startblock_protocol::ServerMessage;
use thiserror::Error;

use crate::race::RennFehler;
use crate::registry::RegistryFehler;

/// Fehler bei der Verarbeitung eines Befehls
#[derive(Debug, Error)]
pub enum BefehlsFehler {
    /// Ungueltige Eingabe (Format, Laenge, unbekanntes Ziel)
    #[error("{0}")]
    Ungueltig(String),

    #[error("Zugriff verweigert: {0}")]
    ZugriffVerweigert(String),

    #[error("Zu viele Befehle, bitte langsamer")]
    Gedrosselt,

    #[error("{nachricht}")]
    Konflikt {
        nachricht: String,
        zustand: Option<String>,
    },

    #[error(transparent)]
    Rennen(#[from] RennFehler),

    #[error(transparent)]
    Registry(#[from] RegistryFehler),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("Store-Fehler: {0}")]
    Datenbank(#[from] DbError),

    #[error("Interner Fehler: {0}")]
    Intern(String),
}

impl BefehlsFehler {
    pub fn ungueltig(msg: impl Into<String>) -> Self {
        Self::Ungueltig(msg.into())
    }

    pub fn intern(msg: impl Into<String>) -> Self {
        Self::Intern(msg.into())
    }

    /// Abbildung auf die Fehler-Taxonomie
    pub fn art(&self) -> FehlerArt {
        match self {
            Self::Ungueltig(_) => FehlerArt::Validation,
            Self::ZugriffVerweigert(_) => FehlerArt::Authorization,
            Self::Gedrosselt => FehlerArt::Throttled,
            Self::Konflikt { .. } => FehlerArt::Conflict,
            Self::Rennen(e) => e.art(),
            Self::Registry(e) => e.art(),
            Self::Auth(e) => e.art(),
            Self::Datenbank(_) | Self::Intern(_) => FehlerArt::Infrastructure,
        }
    }

    /// Hinweis auf den aktuellen Zustand bei Konflikten
    pub fn zustand(&self) -> Option<String> {
        match self {
            Self::Konflikt { zustand, .. } => zustand.clone(),
            Self::Rennen(e) => e.zustand(),
            _ => None,
        }
    }

    /// Fehlerantwort fuer den ausloesenden Client
    pub fn antwort(&self, befehl: &str) -> ServerMessage {
        ServerMessage::error(befehl, self.art(), self.to_string(), self.zustand())
    }
}

/// Result-Typ fuer Befehls-Handler
pub type BefehlsResult<T> = Result<T, BefehlsFehler>;
