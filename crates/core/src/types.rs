//! Gemeinsame Identifikationstypen fuer Startblock
//!
//! Alle IDs verwenden das Newtype-Pattern um Verwechslungen zwischen
//! verschiedenen ID-Arten zur Compilezeit auszuschliessen.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Eindeutige Benutzer-ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub Uuid);

impl UserId {
    /// Erstellt eine neue zufaellige UserId
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Gibt die innere UUID zurueck
    pub fn inner(&self) -> Uuid {
        self.0
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "user:{}", self.0)
    }
}

/// Eindeutige Verbindungs-ID
///
/// Wird beim Accept vergeben und lebt nur so lange wie die Verbindung.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn inner(&self) -> Uuid {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn:{}", self.0)
    }
}

/// Eindeutige Rennen-ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RaceId(pub Uuid);

impl RaceId {
    /// Erstellt eine neue zufaellige RaceId
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Gibt die innere UUID zurueck
    pub fn inner(&self) -> Uuid {
        self.0
    }

    /// Name des zugehoerigen Rennraums (`_race_<uuid>`)
    pub fn raum_name(&self) -> String {
        format!("_race_{}", self.0)
    }

    /// Liest die Rennen-ID aus einem Rennraum-Namen
    pub fn aus_raum_name(raum: &str) -> Option<Self> {
        raum.strip_prefix("_race_")
            .and_then(|rest| Uuid::parse_str(rest).ok())
            .map(Self)
    }
}

impl Default for RaceId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RaceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "race:{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Rating
// ---------------------------------------------------------------------------

/// Skill-Rating eines Benutzers (Weng-Lin: mu/sigma)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rating {
    /// Geschaetzte Spielstaerke
    pub mu: f64,
    /// Unsicherheit der Schaetzung
    pub sigma: f64,
    /// Anzahl gewerteter Rennen
    pub rennen: u32,
}

impl Rating {
    /// Konservative Schaetzung (`mu - 3 * sigma`) fuer Ranglisten
    pub fn konservativ(&self) -> f64 {
        self.mu - 3.0 * self.sigma
    }
}

impl Default for Rating {
    fn default() -> Self {
        Self {
            mu: 25.0,
            sigma: 25.0 / 3.0,
            rennen: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// Rollen
// ---------------------------------------------------------------------------

/// Rolle eines Benutzers
///
/// Die Reihenfolge der Varianten ist die Rangordnung:
/// `Normal < Moderator < Admin`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Rolle {
    #[default]
    Normal,
    Moderator,
    Admin,
}

impl Rolle {
    /// Gibt `true` zurueck wenn diese Rolle die andere echt uebertrifft
    pub fn uebertrifft(self, andere: Rolle) -> bool {
        self > andere
    }

    /// Naechsthoehere Rolle (Admin bleibt Admin)
    pub fn hoeher(self) -> Rolle {
        match self {
            Rolle::Normal => Rolle::Moderator,
            Rolle::Moderator | Rolle::Admin => Rolle::Admin,
        }
    }

    /// Naechstniedrigere Rolle (Normal bleibt Normal)
    pub fn niedriger(self) -> Rolle {
        match self {
            Rolle::Admin => Rolle::Moderator,
            Rolle::Moderator | Rolle::Normal => Rolle::Normal,
        }
    }
}

impl std::fmt::Display for Rolle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Rolle::Normal => "normal",
            Rolle::Moderator => "moderator",
            Rolle::Admin => "admin",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// Erfolge
// ---------------------------------------------------------------------------

/// Erfolg, der nach einem beendeten Rennen vergeben werden kann
///
/// Der Katalog ist fest; die Reihenfolge der Varianten bestimmt die
/// Anzeigereihenfolge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Achievement {
    /// Erstes Rennen regulaer beendet
    ErstesZiel,
    /// Erster Platz in einem Rennen mit mindestens zwei Teilnehmern
    ErsterSieg,
    /// Solo-Rennen beendet
    Solist,
    /// Zehn gewertete Rennen
    ZehnRennen,
    /// Hundert gewertete Rennen
    HundertRennen,
}

impl Achievement {
    pub const ALLE: [Achievement; 5] = [
        Achievement::ErstesZiel,
        Achievement::ErsterSieg,
        Achievement::Solist,
        Achievement::ZehnRennen,
        Achievement::HundertRennen,
    ];

    /// Anzeigename
    pub fn name(self) -> &'static str {
        match self {
            Achievement::ErstesZiel => "Im Ziel",
            Achievement::ErsterSieg => "Sieger",
            Achievement::Solist => "Solist",
            Achievement::ZehnRennen => "Stammgast",
            Achievement::HundertRennen => "Veteran",
        }
    }

    pub fn beschreibung(self) -> &'static str {
        match self {
            Achievement::ErstesZiel => "Ein Rennen regulaer beendet",
            Achievement::ErsterSieg => "Ein Rennen mit mindestens zwei Teilnehmern gewonnen",
            Achievement::Solist => "Ein Solo-Rennen beendet",
            Achievement::ZehnRennen => "Zehn gewertete Rennen bestritten",
            Achievement::HundertRennen => "Hundert gewertete Rennen bestritten",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rollen_rangordnung() {
        assert!(Rolle::Admin.uebertrifft(Rolle::Moderator));
        assert!(Rolle::Moderator.uebertrifft(Rolle::Normal));
        assert!(!Rolle::Moderator.uebertrifft(Rolle::Moderator));
        assert!(!Rolle::Normal.uebertrifft(Rolle::Admin));
    }

    #[test]
    fn rolle_hoeher_und_niedriger() {
        assert_eq!(Rolle::Normal.hoeher(), Rolle::Moderator);
        assert_eq!(Rolle::Admin.hoeher(), Rolle::Admin);
        assert_eq!(Rolle::Moderator.niedriger(), Rolle::Normal);
        assert_eq!(Rolle::Normal.niedriger(), Rolle::Normal);
    }

    #[test]
    fn raum_name_rundweg() {
        let id = RaceId::new();
        let raum = id.raum_name();
        assert!(raum.starts_with("_race_"));
        assert_eq!(RaceId::aus_raum_name(&raum), Some(id));
        assert_eq!(RaceId::aus_raum_name("lobby"), None);
        assert_eq!(RaceId::aus_raum_name("_race_kaputt"), None);
    }

    #[test]
    fn ids_sind_eindeutig() {
        assert_ne!(UserId::new(), UserId::new());
        assert_ne!(ConnectionId::new(), ConnectionId::new());
    }

    #[test]
    fn standard_rating_konservativ_null() {
        let r = Rating::default();
        assert_eq!(r.rennen, 0);
        assert!(r.konservativ().abs() < 1e-9);
    }

    #[test]
    fn anzeige_format() {
        let uid = UserId::new();
        assert!(uid.to_string().starts_with("user:"));
        assert_eq!(Rolle::Moderator.to_string(), "moderator");
    }

    #[test]
    fn erfolge_sind_vollstaendig_beschrieben() {
        for erfolg in Achievement::ALLE {
            assert!(!erfolg.name().is_empty());
            assert!(!erfolg.beschreibung().is_empty());
        }
        assert_eq!(
            serde_json::to_string(&Achievement::ErsterSieg).unwrap(),
            "\"erster_sieg\""
        );
    }
}
