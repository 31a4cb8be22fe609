//! Zusammenfassung eines beendeten Rennens fuer die Wertung

use startblock_core::types::{RaceId, UserId};
use startblock_protocol::{ParticipantStatus, RaceStatus, Ruleset};

/// Ergebnis eines Teilnehmers
#[derive(Debug, Clone, PartialEq)]
pub struct ErgebnisEintrag {
    pub user_id: UserId,
    pub status: ParticipantStatus,
    pub platz: Option<u32>,
    pub dnf: bool,
}

/// Zusammenfassung eines Rennens am Ende
#[derive(Debug, Clone, PartialEq)]
pub struct RennErgebnis {
    pub rennen_id: RaceId,
    pub status: RaceStatus,
    pub regelwerk: Ruleset,
    pub teilnehmer: Vec<ErgebnisEintrag>,
}

impl RennErgebnis {
    /// Prueft ob das Rennen gewertet wird
    ///
    /// Voraussetzungen: Status Finished, Regelwerk gewertet und nicht solo,
    /// mindestens zwei Teilnehmer die nicht aufgegeben haben.
    pub fn ist_bewertbar(&self) -> bool {
        if self.status != RaceStatus::Finished || !self.regelwerk.ist_bewertbar() {
            return false;
        }
        let verblieben = self
            .teilnehmer
            .iter()
            .filter(|t| t.status != ParticipantStatus::Quit)
            .count();
        verblieben >= 2
    }

    /// Raenge fuer das Free-for-all-Update (1-basiert)
    ///
    /// Platzierte Teilnehmer erhalten ihren Platz als Rang. Alle ohne Platz
    /// (DNF, Aufgegeben) teilen sich den Rang hinter dem letzten Platz.
    pub fn raenge(&self) -> Vec<(UserId, usize)> {
        let letzter_platz = self
            .teilnehmer
            .iter()
            .filter_map(|t| t.platz)
            .max()
            .unwrap_or(0) as usize;

        let mut raenge: Vec<(UserId, usize)> = self
            .teilnehmer
            .iter()
            .map(|t| match t.platz {
                Some(platz) if !t.dnf => (t.user_id, platz as usize),
                _ => (t.user_id, letzter_platz + 1),
            })
            .collect();
        raenge.sort_by_key(|(_, rang)| *rang);
        raenge
    }
}
