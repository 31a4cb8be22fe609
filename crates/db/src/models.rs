//! Datenmodelle fuer den Store
//!
//! Diese Typen sind die Datensaetze, die zwischen Server und Store
//! ausgetauscht werden. Der Renn-Zustand im Speicher (inkl. Timer) lebt
//! in der RaceEngine; `RennDatensatz` ist nur dessen persistierbarer Teil.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use startblock_core::types::{Achievement, RaceId, Rating, Rolle, UserId};
use startblock_protocol::{
    AchievementInfo, MemberInfo, ParticipantStatus, ProfileInfo, ProgressEntry, RaceStatus, Ruleset,
};
use std::collections::BTreeSet;
use std::net::IpAddr;

// ---------------------------------------------------------------------------
// Benutzer
// ---------------------------------------------------------------------------

/// Benutzer-Datensatz
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Benutzer {
    pub id: UserId,
    pub name: String,
    /// Stream-URL (leer = kein Stream)
    pub stream_url: String,
    pub twitch_bot_aktiv: bool,
    /// Verzoegerung der Bot-Ansagen in Sekunden
    pub twitch_bot_verzoegerung: u32,
    pub rolle: Rolle,
    pub gebannt: bool,
    pub stummgeschaltet: bool,
    pub rating: Rating,
    /// Freigeschaltete Erfolge (aeltere Datensaetze haben keine)
    #[serde(default)]
    pub erfolge: BTreeSet<Achievement>,
}

impl Benutzer {
    /// Erstellt einen neuen Benutzer mit Standardwerten
    pub fn neu(id: UserId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            stream_url: String::new(),
            twitch_bot_aktiv: false,
            twitch_bot_verzoegerung: 0,
            rolle: Rolle::Normal,
            gebannt: false,
            stummgeschaltet: false,
            rating: Rating::default(),
            erfolge: BTreeSet::new(),
        }
    }

    /// Setzt die Rolle (Builder-Stil, fuer Seeds und Tests)
    pub fn mit_rolle(mut self, rolle: Rolle) -> Self {
        self.rolle = rolle;
        self
    }

    /// Oeffentliches Profil
    pub fn profil(&self) -> ProfileInfo {
        ProfileInfo {
            user_id: self.id,
            name: self.name.clone(),
            stream_url: self.stream_url.clone(),
            twitch_bot_enabled: self.twitch_bot_aktiv,
            twitch_bot_delay: self.twitch_bot_verzoegerung,
            role: self.rolle,
            rating: self.rating,
            achievements: self.erfolge.iter().copied().map(AchievementInfo::from).collect(),
        }
    }

    /// Kurzform fuer Raum-Mitgliederlisten
    pub fn mitglied(&self) -> MemberInfo {
        MemberInfo {
            user_id: self.id,
            name: self.name.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Rennen
// ---------------------------------------------------------------------------

/// Persistierbarer Teil eines Teilnehmers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeilnehmerDatensatz {
    pub user_id: UserId,
    pub name: String,
    pub status: ParticipantStatus,
    pub platz: Option<u32>,
    pub dnf: bool,
    pub zielzeit_ms: Option<u64>,
    pub beigetreten_am: DateTime<Utc>,
    /// Fortschrittsprotokoll in Meldereihenfolge
    #[serde(default)]
    pub fortschritt: Vec<ProgressEntry>,
}

/// Persistierbarer Teil eines Rennens
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RennDatensatz {
    pub id: RaceId,
    pub name: String,
    pub status: RaceStatus,
    pub regelwerk: Ruleset,
    pub ersteller: UserId,
    pub teilnehmer: Vec<TeilnehmerDatensatz>,
    pub erstellt_am: DateTime<Utc>,
    pub gestartet_am: Option<DateTime<Utc>>,
    /// Stand des Zielzaehlers (letzter vergebener Platz)
    pub zielzaehler: u32,
}

// ---------------------------------------------------------------------------
// Bans
// ---------------------------------------------------------------------------

/// Beim Start geladene Ban-Listen
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BanListe {
    pub benutzer: Vec<UserId>,
    pub ips: Vec<IpAddr>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn neuer_benutzer_standardwerte() {
        let id = UserId::new();
        let benutzer = Benutzer::neu(id, "Zamiel");
        assert_eq!(benutzer.rolle, Rolle::Normal);
        assert!(!benutzer.gebannt);
        assert_eq!(benutzer.rating, Rating::default());

        let profil = benutzer.profil();
        assert_eq!(profil.user_id, id);
        assert_eq!(profil.name, "Zamiel");
        assert!(profil.stream_url.is_empty());
        assert!(profil.achievements.is_empty());
    }

    #[test]
    fn profil_listet_erfolge_in_katalogreihenfolge() {
        let mut benutzer = Benutzer::neu(UserId::new(), "Zamiel");
        benutzer.erfolge.insert(Achievement::ZehnRennen);
        benutzer.erfolge.insert(Achievement::ErstesZiel);

        let ids: Vec<_> = benutzer.profil().achievements.iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![Achievement::ErstesZiel, Achievement::ZehnRennen]);
    }

    #[test]
    fn alter_datensatz_ohne_erfolge_ist_lesbar() {
        let mut json = serde_json::to_value(Benutzer::neu(UserId::new(), "alt")).unwrap();
        json.as_object_mut().unwrap().remove("erfolge");
        let benutzer: Benutzer = serde_json::from_value(json).unwrap();
        assert!(benutzer.erfolge.is_empty());
    }

    #[test]
    fn mit_rolle_setzt_rolle() {
        let admin = Benutzer::neu(UserId::new(), "chef").mit_rolle(Rolle::Admin);
        assert_eq!(admin.profil().role, Rolle::Admin);
        assert_eq!(admin.mitglied().name, "chef");
    }
}
