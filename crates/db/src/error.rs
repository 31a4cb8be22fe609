//! Fehlertypen fuer das Store-Crate

use startblock_core::error::FehlerArt;
use thiserror::Error;

/// Store-Fehlertypen
#[derive(Debug, Error)]
pub enum DbError {
    #[error("Datensatz nicht gefunden: {0}")]
    NichtGefunden(String),

    #[error("Store nicht verfuegbar: {0}")]
    NichtVerfuegbar(String),

    #[error("Ungueltige Daten: {0}")]
    UngueltigeDaten(String),

    #[error("JSON-Fehler: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Interner Store-Fehler: {0}")]
    Intern(String),
}

impl DbError {
    pub fn nicht_gefunden(msg: impl Into<String>) -> Self {
        Self::NichtGefunden(msg.into())
    }

    pub fn intern(msg: impl Into<String>) -> Self {
        Self::Intern(msg.into())
    }

    /// Store-Fehler sind immer Infrastrukturfehler
    pub fn art(&self) -> FehlerArt {
        FehlerArt::Infrastructure
    }

    /// Gibt `true` zurueck wenn ein erneuter Versuch sinnvoll ist
    pub fn ist_wiederholbar(&self) -> bool {
        matches!(self, Self::NichtVerfuegbar(_) | Self::Intern(_))
    }
}

/// Result-Typ fuer Store-Operationen
pub type DbResult<T> = Result<T, DbError>;
