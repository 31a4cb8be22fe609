//! Fehler der RaceEngine

use startblock_core::error::FehlerArt;
use startblock_core::types::{RaceId, UserId};
use startblock_protocol::{ParticipantStatus, RaceStatus};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RennFehler {
    #[error("Unbekanntes Rennen: {0}")]
    Unbekannt(RaceId),

    /// Rennen ist bereits beendet oder abgebrochen
    #[error("Rennen {id} ist bereits {status}")]
    Archiviert { id: RaceId, status: RaceStatus },

    #[error("{aktion} ist im Zustand {status} nicht moeglich")]
    FalscherZustand {
        status: RaceStatus,
        aktion: &'static str,
    },

    #[error("{aktion} ist mit Teilnehmerstatus {status} nicht moeglich")]
    FalscherTeilnehmerStatus {
        status: ParticipantStatus,
        aktion: &'static str,
    },

    #[error("{0} nimmt an diesem Rennen nicht teil")]
    KeinTeilnehmer(UserId),

    #[error("Bereits Teilnehmer dieses Rennens")]
    BereitsTeilnehmer,

    #[error("Bereits Teilnehmer von Rennen {0}")]
    AnderesRennen(RaceId),

    #[error("Nur der Ersteller darf das Regelwerk aendern")]
    NurErsteller,

    #[error("Ungueltige Eingabe: {0}")]
    Ungueltig(String),
}

impl RennFehler {
    pub fn art(&self) -> FehlerArt {
        match self {
            // Verletzte Vorbedingung: Befehl passt nicht zum aktuellen Zustand
            Self::Unbekannt(_)
            | Self::KeinTeilnehmer(_)
            | Self::Ungueltig(_)
            | Self::FalscherZustand { .. }
            | Self::FalscherTeilnehmerStatus { .. }
            | Self::BereitsTeilnehmer => FehlerArt::Validation,
            Self::NurErsteller => FehlerArt::Authorization,
            // Rennen oder Benutzer ist inzwischen anderweitig festgelegt
            Self::Archiviert { .. } | Self::AnderesRennen(_) => FehlerArt::Conflict,
        }
    }

    /// Aktueller Zustand fuer die Fehlerantwort
    pub fn zustand(&self) -> Option<String> {
        match self {
            Self::Archiviert { status, .. } | Self::FalscherZustand { status, .. } => {
                Some(status.to_string())
            }
            Self::FalscherTeilnehmerStatus { status, .. } => Some(status.to_string()),
            _ => None,
        }
    }
}

pub type RennResult<T> = Result<T, RennFehler>;
