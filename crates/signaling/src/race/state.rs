//! Zustand eines Rennens im Speicher

use chrono::{DateTime, Utc};
use startblock_core::types::{RaceId, UserId};
use startblock_db::{RennDatensatz, TeilnehmerDatensatz};
use startblock_protocol::{
    ParticipantInfo, ParticipantStatus, ProgressEntry, RaceInfo, RaceStatus, Ruleset,
};
use startblock_rating::{ErgebnisEintrag, RennErgebnis};
use std::time::Duration;
use tokio::time::Instant;

use super::error::RennFehler;
use super::timer::{self, TimerHandle};

#[derive(Debug)]
pub(crate) struct Teilnehmer {
    pub user_id: UserId,
    pub name: String,
    pub status: ParticipantStatus,
    pub beigetreten_am: DateTime<Utc>,
    /// Zielzeit in Millisekunden seit Rennstart
    pub zielzeit_ms: Option<u64>,
    pub platz: Option<u32>,
    pub dnf: bool,
    pub fortschritt: Vec<ProgressEntry>,
    /// Laeuft solange der Teilnehmer getrennt ist
    pub gnadenfrist: Option<TimerHandle>,
}

impl Teilnehmer {
    pub fn neu(user_id: UserId, name: impl Into<String>) -> Self {
        Self {
            user_id,
            name: name.into(),
            status: ParticipantStatus::NotReady,
            beigetreten_am: Utc::now(),
            zielzeit_ms: None,
            platz: None,
            dnf: false,
            fortschritt: Vec::new(),
            gnadenfrist: None,
        }
    }

    /// Racing oder Disconnected: das Rennen laeuft fuer ihn noch
    pub fn ist_unterwegs(&self) -> bool {
        matches!(
            self.status,
            ParticipantStatus::Racing | ParticipantStatus::Disconnected
        )
    }

    pub fn info(&self) -> ParticipantInfo {
        ParticipantInfo {
            user_id: self.user_id,
            name: self.name.clone(),
            status: self.status,
            place: self.platz,
            dnf: self.dnf,
            finish_time_ms: self.zielzeit_ms,
            progress: self.fortschritt.clone(),
        }
    }

    fn datensatz(&self) -> TeilnehmerDatensatz {
        TeilnehmerDatensatz {
            user_id: self.user_id,
            name: self.name.clone(),
            status: self.status,
            platz: self.platz,
            dnf: self.dnf,
            zielzeit_ms: self.zielzeit_ms,
            beigetreten_am: self.beigetreten_am,
            fortschritt: self.fortschritt.clone(),
        }
    }
}

#[derive(Debug)]
pub(crate) struct Rennen {
    pub id: RaceId,
    pub name: String,
    pub status: RaceStatus,
    pub regelwerk: Ruleset,
    pub ersteller: UserId,
    /// In Beitrittsreihenfolge
    pub teilnehmer: Vec<Teilnehmer>,
    pub countdown: Option<TimerHandle>,
    pub watchdog: Option<TimerHandle>,
    /// Zuletzt vergebener Platz
    pub zielzaehler: u32,
    pub erstellt_am: DateTime<Utc>,
    pub gestartet_am: Option<DateTime<Utc>>,
    /// Monotoner Startzeitpunkt fuer Zeitmessungen
    pub start: Option<Instant>,
    epoche: u64,
    /// Gesetzt sobald die Wertung ausgeloest wurde
    pub bewertet: bool,
}

impl Rennen {
    pub fn neu(id: RaceId, name: String, regelwerk: Ruleset, ersteller: Teilnehmer) -> Self {
        Self {
            id,
            name,
            status: RaceStatus::Open,
            regelwerk,
            ersteller: ersteller.user_id,
            teilnehmer: vec![ersteller],
            countdown: None,
            watchdog: None,
            zielzaehler: 0,
            erstellt_am: Utc::now(),
            gestartet_am: None,
            start: None,
            epoche: 0,
            bewertet: false,
        }
    }

    /// Baut ein laufendes Rennen aus einem gespeicherten Datensatz wieder auf
    pub fn aus_datensatz(d: RennDatensatz) -> Self {
        let vergangen = d
            .gestartet_am
            .and_then(|t| (Utc::now() - t).to_std().ok())
            .unwrap_or_default();
        let start = Instant::now().checked_sub(vergangen).unwrap_or_else(Instant::now);
        Self {
            id: d.id,
            name: d.name,
            status: d.status,
            regelwerk: d.regelwerk,
            ersteller: d.ersteller,
            teilnehmer: d
                .teilnehmer
                .into_iter()
                .map(|t| Teilnehmer {
                    user_id: t.user_id,
                    name: t.name,
                    status: t.status,
                    beigetreten_am: t.beigetreten_am,
                    zielzeit_ms: t.zielzeit_ms,
                    platz: t.platz,
                    dnf: t.dnf,
                    fortschritt: t.fortschritt,
                    gnadenfrist: None,
                })
                .collect(),
            countdown: None,
            watchdog: None,
            zielzaehler: d.zielzaehler,
            erstellt_am: d.erstellt_am,
            gestartet_am: d.gestartet_am,
            start: Some(start),
            epoche: 0,
            bewertet: false,
        }
    }

    /// Naechste Timer-Epoche
    pub fn naechste_epoche(&mut self) -> u64 {
        self.epoche += 1;
        self.epoche
    }

    pub fn teilnehmer(&self, user_id: UserId) -> Option<&Teilnehmer> {
        self.teilnehmer.iter().find(|t| t.user_id == user_id)
    }

    pub fn teilnehmer_mut(&mut self, user_id: UserId) -> Result<&mut Teilnehmer, RennFehler> {
        self.teilnehmer
            .iter_mut()
            .find(|t| t.user_id == user_id)
            .ok_or(RennFehler::KeinTeilnehmer(user_id))
    }

    pub fn ist_teilnehmer(&self, user_id: UserId) -> bool {
        self.teilnehmer(user_id).is_some()
    }

    /// Prueft den Rennstatus fuer eine Aktion
    pub fn status_pruefen(&self, erlaubt: &[RaceStatus], aktion: &'static str) -> Result<(), RennFehler> {
        if self.status.ist_terminal() {
            return Err(RennFehler::Archiviert {
                id: self.id,
                status: self.status,
            });
        }
        if erlaubt.contains(&self.status) {
            Ok(())
        } else {
            Err(RennFehler::FalscherZustand {
                status: self.status,
                aktion,
            })
        }
    }

    /// Millisekunden seit Rennstart
    pub fn vergangen_ms(&self) -> u64 {
        self.start
            .map(|s| Instant::now().duration_since(s).as_millis() as u64)
            .unwrap_or(0)
    }

    /// Laufzeit seit Start, fuer den Watchdog nach einer Wiederherstellung
    pub fn laufzeit(&self) -> Duration {
        self.start
            .map(|s| Instant::now().duration_since(s))
            .unwrap_or_default()
    }

    pub fn alle_bereit(&self, minimum: usize) -> bool {
        self.teilnehmer.len() >= minimum
            && self
                .teilnehmer
                .iter()
                .all(|t| t.status == ParticipantStatus::Ready)
    }

    pub fn alle_zuruecksetzen(&mut self) {
        for t in &mut self.teilnehmer {
            t.status = ParticipantStatus::NotReady;
        }
    }

    pub fn niemand_unterwegs(&self) -> bool {
        !self.teilnehmer.iter().any(Teilnehmer::ist_unterwegs)
    }

    /// Vergebene Plaetze bilden genau 1..=k ohne Luecken und Duplikate
    pub fn plaetze_lueckenlos(&self) -> bool {
        let mut plaetze: Vec<u32> = self.teilnehmer.iter().filter_map(|t| t.platz).collect();
        plaetze.sort_unstable();
        plaetze.len() as u32 == self.zielzaehler
            && plaetze.iter().enumerate().all(|(i, p)| *p == i as u32 + 1)
    }

    /// Bricht alle Timer des Rennens und seiner Teilnehmer ab
    pub fn timer_abbrechen(&mut self) {
        timer::abbrechen(&mut self.countdown);
        timer::abbrechen(&mut self.watchdog);
        for t in &mut self.teilnehmer {
            timer::abbrechen(&mut t.gnadenfrist);
        }
    }

    // -----------------------------------------------------------------------
    // Sichten
    // -----------------------------------------------------------------------

    pub fn info(&self) -> RaceInfo {
        RaceInfo {
            id: self.id,
            name: self.name.clone(),
            status: self.status,
            ruleset: self.regelwerk.clone(),
            creator: self.ersteller,
            participants: self.teilnehmer.iter().map(Teilnehmer::info).collect(),
            created_at: self.erstellt_am,
            started_at: self.gestartet_am,
        }
    }

    /// Teilnehmer nach Platz, Nichtplatzierte in Beitrittsreihenfolge dahinter
    pub fn ergebnisliste(&self) -> Vec<ParticipantInfo> {
        let mut liste: Vec<&Teilnehmer> = self.teilnehmer.iter().collect();
        liste.sort_by_key(|t| t.platz.unwrap_or(u32::MAX));
        liste.into_iter().map(Teilnehmer::info).collect()
    }

    pub fn platzierungen(&self) -> Vec<(UserId, u32)> {
        let mut p: Vec<(UserId, u32)> = self
            .teilnehmer
            .iter()
            .filter_map(|t| t.platz.map(|platz| (t.user_id, platz)))
            .collect();
        p.sort_by_key(|(_, platz)| *platz);
        p
    }

    pub fn datensatz(&self) -> RennDatensatz {
        RennDatensatz {
            id: self.id,
            name: self.name.clone(),
            status: self.status,
            regelwerk: self.regelwerk.clone(),
            ersteller: self.ersteller,
            teilnehmer: self.teilnehmer.iter().map(Teilnehmer::datensatz).collect(),
            erstellt_am: self.erstellt_am,
            gestartet_am: self.gestartet_am,
            zielzaehler: self.zielzaehler,
        }
    }

    pub fn ergebnis(&self) -> RennErgebnis {
        RennErgebnis {
            rennen_id: self.id,
            status: self.status,
            regelwerk: self.regelwerk.clone(),
            teilnehmer: self
                .teilnehmer
                .iter()
                .map(|t| ErgebnisEintrag {
                    user_id: t.user_id,
                    status: t.status,
                    platz: t.platz,
                    dnf: t.dnf,
                })
                .collect(),
        }
    }
}
