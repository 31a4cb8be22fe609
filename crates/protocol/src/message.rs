//! Nachrichten vom Server an den Client
//!
//! Jede Antwort auf einen Befehl ist entweder eine Ergebnis-Nachricht
//! (`Ok`, `RaceState`, `Profile`, ...) oder `Error` mit maschinenlesbarer
//! `FehlerArt`. Dazu kommen Broadcasts an Raeume.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use startblock_core::error::FehlerArt;
use startblock_core::types::{Achievement, RaceId, Rating, Rolle, UserId};

use crate::ruleset::Ruleset;

// ---------------------------------------------------------------------------
// Status-Enums
// ---------------------------------------------------------------------------

/// Status eines Rennens
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RaceStatus {
    Open,
    Starting,
    InProgress,
    Finished,
    Cancelled,
}

impl RaceStatus {
    /// Finished und Cancelled sind endgueltig
    pub fn ist_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Cancelled)
    }

    /// Open, Starting oder InProgress
    pub fn ist_aktiv(self) -> bool {
        !self.ist_terminal()
    }
}

impl std::fmt::Display for RaceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Open => "open",
            Self::Starting => "starting",
            Self::InProgress => "in_progress",
            Self::Finished => "finished",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Status eines Teilnehmers innerhalb eines Rennens
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantStatus {
    NotReady,
    Ready,
    Racing,
    Finished,
    Quit,
    Disconnected,
}

impl std::fmt::Display for ParticipantStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::NotReady => "not_ready",
            Self::Ready => "ready",
            Self::Racing => "racing",
            Self::Finished => "finished",
            Self::Quit => "quit",
            Self::Disconnected => "disconnected",
        };
        f.write_str(name)
    }
}

/// Art eines Raums
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomKind {
    /// Dauerhafter Lobby-Chat
    Lobby,
    /// Von Benutzern angelegter Chatraum
    Chat,
    /// Raum eines Rennens (Teilnehmer und Zuschauer)
    Race,
}

// ---------------------------------------------------------------------------
// Info-Strukturen
// ---------------------------------------------------------------------------

/// Mitglied eines Raums
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberInfo {
    pub user_id: UserId,
    pub name: String,
}

/// Zusammenfassung eines Raums fuer `roomListAll`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomInfo {
    pub name: String,
    pub kind: RoomKind,
    pub members: usize,
}

/// Fortschritts-Ereignis eines Teilnehmers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProgressEvent {
    Item { item: u32 },
    Floor { floor: u32 },
    Comment { text: String },
}

/// Eintrag im Fortschritts-Log, `time_ms` relativ zum Rennstart
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEntry {
    pub time_ms: u64,
    pub event: ProgressEvent,
}

/// Oeffentliche Sicht auf einen Teilnehmer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantInfo {
    pub user_id: UserId,
    pub name: String,
    pub status: ParticipantStatus,
    pub place: Option<u32>,
    pub dnf: bool,
    pub finish_time_ms: Option<u64>,
    pub progress: Vec<ProgressEntry>,
}

/// Oeffentliche Sicht auf ein Rennen
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RaceInfo {
    pub id: RaceId,
    pub name: String,
    pub status: RaceStatus,
    pub ruleset: Ruleset,
    pub creator: UserId,
    pub participants: Vec<ParticipantInfo>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
}

/// Profil eines Benutzers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileInfo {
    pub user_id: UserId,
    pub name: String,
    pub stream_url: String,
    pub twitch_bot_enabled: bool,
    pub twitch_bot_delay: u32,
    pub role: Rolle,
    pub rating: Rating,
    #[serde(default)]
    pub achievements: Vec<AchievementInfo>,
}

/// Erfolg mit Anzeigetexten
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AchievementInfo {
    pub id: Achievement,
    pub name: String,
    pub description: String,
}

impl From<Achievement> for AchievementInfo {
    fn from(erfolg: Achievement) -> Self {
        Self {
            id: erfolg,
            name: erfolg.name().to_string(),
            description: erfolg.beschreibung().to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// ServerMessage
// ---------------------------------------------------------------------------

/// Alle Nachrichten die der Server senden kann
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum ServerMessage {
    /// Erste Nachricht nach erfolgreicher Authentifizierung
    Welcome {
        profile: ProfileInfo,
        races: Vec<RaceInfo>,
    },
    /// Bestaetigung eines Befehls ohne eigenes Ergebnis
    Ok { command: String },
    /// Fehlerantwort (nur an den ausloesenden Client)
    Error {
        command: String,
        kind: FehlerArt,
        message: String,
        /// Hinweis auf den aktuellen Zustand (z.B. "finished")
        state: Option<String>,
    },
    /// Server trennt die Verbindung
    Disconnecting { reason: String },

    // Raeume
    RoomMembers {
        room: String,
        members: Vec<MemberInfo>,
    },
    RoomJoined { room: String, member: MemberInfo },
    RoomLeft { room: String, member: MemberInfo },
    RoomMessage {
        room: String,
        from: MemberInfo,
        message: String,
        time: DateTime<Utc>,
    },
    PrivateMessage {
        from: MemberInfo,
        message: String,
        time: DateTime<Utc>,
    },
    RoomList { rooms: Vec<RoomInfo> },

    // Rennen
    RaceCreated { race: RaceInfo },
    RaceState { race: RaceInfo },
    RaceJoined {
        id: RaceId,
        participant: ParticipantInfo,
    },
    RaceLeft { id: RaceId, user_id: UserId },
    ParticipantStatusChanged {
        id: RaceId,
        user_id: UserId,
        status: ParticipantStatus,
        place: Option<u32>,
    },
    RulesetChanged { id: RaceId, ruleset: Ruleset },
    Countdown { id: RaceId, seconds: u64 },
    CountdownAborted { id: RaceId },
    RaceStarted {
        id: RaceId,
        started_at: DateTime<Utc>,
    },
    RaceProgress {
        id: RaceId,
        user_id: UserId,
        entry: ProgressEntry,
    },
    RaceFinished {
        id: RaceId,
        results: Vec<ParticipantInfo>,
    },
    RaceCancelled { id: RaceId, reason: String },
    RatingsUpdated {
        id: RaceId,
        ratings: Vec<(UserId, Rating)>,
    },
    /// Nach dem Zieleinlauf neu freigeschaltete Erfolge
    AchievementsUnlocked {
        id: RaceId,
        user_id: UserId,
        achievements: Vec<AchievementInfo>,
    },

    // Profil
    Profile { profile: ProfileInfo },
}

impl ServerMessage {
    /// Erstellt eine Bestaetigung fuer einen Befehl
    pub fn ok(command: &str) -> Self {
        Self::Ok {
            command: command.to_string(),
        }
    }

    /// Erstellt eine Fehler-Antwort
    pub fn error(
        command: &str,
        kind: FehlerArt,
        message: impl Into<String>,
        state: Option<String>,
    ) -> Self {
        Self::Error {
            command: command.to_string(),
            kind,
            message: message.into(),
            state,
        }
    }

    /// Serialisiert die Nachricht als JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialisiert eine Nachricht aus JSON
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
