//! Rennereignisse und Notifier-Schnittstelle
//!
//! Der `Notifier` wird ueber Meilensteine im Lebenszyklus eines Rennens
//! informiert (erstellt, gestartet, beendet), z.B. fuer einen Chat-Bot
//! oder eine Streaming-Plattform. Fehler werden vom Aufrufer nur geloggt
//! und nie als Befehlsfehler weitergegeben.

use crate::types::{RaceId, UserId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Meilensteine im Lebenszyklus eines Rennens
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "ereignis", rename_all = "snake_case")]
pub enum RennEreignis {
    /// Ein Rennen wurde erstellt
    Erstellt {
        rennen_id: RaceId,
        name: String,
        ersteller: UserId,
    },
    /// Der Countdown ist abgelaufen, das Rennen laeuft
    Gestartet {
        rennen_id: RaceId,
        teilnehmer: Vec<UserId>,
    },
    /// Das Rennen ist beendet; `platzierungen` in Zielreihenfolge
    Beendet {
        rennen_id: RaceId,
        platzierungen: Vec<(UserId, u32)>,
    },
}

impl RennEreignis {
    /// Gibt die Rennen-ID des Ereignisses zurueck
    pub fn rennen_id(&self) -> RaceId {
        match self {
            Self::Erstellt { rennen_id, .. }
            | Self::Gestartet { rennen_id, .. }
            | Self::Beendet { rennen_id, .. } => *rennen_id,
        }
    }
}

/// Fehler eines Notifiers
#[derive(Debug, Error)]
pub enum NotifierFehler {
    #[error("Notifier nicht erreichbar: {0}")]
    NichtErreichbar(String),

    #[error("Notifier hat das Ereignis abgelehnt: {0}")]
    Abgelehnt(String),
}

/// Schnittstelle fuer die Bekanntgabe von Rennereignissen
#[async_trait]
pub trait Notifier: Send + Sync + 'static {
    /// Meldet ein Ereignis
    async fn melden(&self, ereignis: &RennEreignis) -> Result<(), NotifierFehler>;
}

/// Notifier der Ereignisse nur ins Log schreibt
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn melden(&self, ereignis: &RennEreignis) -> Result<(), NotifierFehler> {
        tracing::info!(
            rennen_id = %ereignis.rennen_id(),
            ereignis = ?ereignis,
            "Rennereignis"
        );
        Ok(())
    }
}
