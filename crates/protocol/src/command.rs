//! Befehle vom Client an den Server
//!
//! Der Befehlssatz ist geschlossen: jeder Befehl ist eine Variante von
//! `ClientCommand`. Unbekannte Befehlsnamen scheitern bereits beim
//! Deserialisieren und werden als Validierungsfehler beantwortet.

use serde::{Deserialize, Serialize};
use startblock_core::types::{RaceId, UserId};
use std::net::IpAddr;

use crate::ruleset::Ruleset;

// ---------------------------------------------------------------------------
// Raum-Anfragen
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomRequest {
    pub room: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomMessageRequest {
    pub room: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrivateMessageRequest {
    pub recipient: UserId,
    pub message: String,
}

// ---------------------------------------------------------------------------
// Rennen-Anfragen
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RaceCreateRequest {
    pub name: String,
    #[serde(default)]
    pub ruleset: Ruleset,
}

/// Anfrage die nur ein Rennen referenziert (join, leave, ready, ...)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RaceRequest {
    pub id: RaceId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RulesetRequest {
    pub id: RaceId,
    pub ruleset: Ruleset,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommentRequest {
    pub id: RaceId,
    pub comment: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemRequest {
    pub id: RaceId,
    pub item: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FloorRequest {
    pub id: RaceId,
    pub floor: u32,
}

// ---------------------------------------------------------------------------
// Profil-Anfragen
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileRequest {
    pub user: UserId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsernameRequest {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamRequest {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TwitchBotRequest {
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TwitchBotDelayRequest {
    pub delay: u32,
}

// ---------------------------------------------------------------------------
// Admin-Anfragen
// ---------------------------------------------------------------------------

/// Admin-Aktion gegen einen Benutzer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetRequest {
    pub user: UserId,
}

/// Admin-Aktion gegen eine IP-Adresse
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IpRequest {
    pub ip: IpAddr,
}

// ---------------------------------------------------------------------------
// ClientCommand
// ---------------------------------------------------------------------------

/// Alle Befehle die ein Client senden kann
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", content = "data", rename_all = "camelCase")]
pub enum ClientCommand {
    // Raeume
    RoomJoin(RoomRequest),
    RoomLeave(RoomRequest),
    RoomMessage(RoomMessageRequest),
    PrivateMessage(PrivateMessageRequest),
    RoomListAll,

    // Rennen
    RaceCreate(RaceCreateRequest),
    RaceJoin(RaceRequest),
    RaceLeave(RaceRequest),
    RaceReady(RaceRequest),
    RaceUnready(RaceRequest),
    RaceRuleset(RulesetRequest),
    RaceFinish(RaceRequest),
    RaceQuit(RaceRequest),
    RaceComment(CommentRequest),
    RaceItem(ItemRequest),
    RaceFloor(FloorRequest),

    // Profil
    ProfileGet(ProfileRequest),
    ProfileSetUsername(UsernameRequest),
    ProfileSetStream(StreamRequest),
    ProfileSetTwitchBotEnabled(TwitchBotRequest),
    ProfileSetTwitchBotDelay(TwitchBotDelayRequest),

    // Administration
    AdminBan(TargetRequest),
    AdminUnban(TargetRequest),
    #[serde(rename = "adminBanIP")]
    AdminBanIp(IpRequest),
    #[serde(rename = "adminUnbanIP")]
    AdminUnbanIp(IpRequest),
    AdminSquelch(TargetRequest),
    AdminUnsquelch(TargetRequest),
    AdminPromote(TargetRequest),
    AdminDemote(TargetRequest),

    Logout,
}

impl ClientCommand {
    /// Befehlsname wie auf dem Draht (fuer Antworten, Logs und Metriken)
    pub fn name(&self) -> &'static str {
        match self {
            Self::RoomJoin(_) => "roomJoin",
            Self::RoomLeave(_) => "roomLeave",
            Self::RoomMessage(_) => "roomMessage",
            Self::PrivateMessage(_) => "privateMessage",
            Self::RoomListAll => "roomListAll",
            Self::RaceCreate(_) => "raceCreate",
            Self::RaceJoin(_) => "raceJoin",
            Self::RaceLeave(_) => "raceLeave",
            Self::RaceReady(_) => "raceReady",
            Self::RaceUnready(_) => "raceUnready",
            Self::RaceRuleset(_) => "raceRuleset",
            Self::RaceFinish(_) => "raceFinish",
            Self::RaceQuit(_) => "raceQuit",
            Self::RaceComment(_) => "raceComment",
            Self::RaceItem(_) => "raceItem",
            Self::RaceFloor(_) => "raceFloor",
            Self::ProfileGet(_) => "profileGet",
            Self::ProfileSetUsername(_) => "profileSetUsername",
            Self::ProfileSetStream(_) => "profileSetStream",
            Self::ProfileSetTwitchBotEnabled(_) => "profileSetTwitchBotEnabled",
            Self::ProfileSetTwitchBotDelay(_) => "profileSetTwitchBotDelay",
            Self::AdminBan(_) => "adminBan",
            Self::AdminUnban(_) => "adminUnban",
            Self::AdminBanIp(_) => "adminBanIP",
            Self::AdminUnbanIp(_) => "adminUnbanIP",
            Self::AdminSquelch(_) => "adminSquelch",
            Self::AdminUnsquelch(_) => "adminUnsquelch",
            Self::AdminPromote(_) => "adminPromote",
            Self::AdminDemote(_) => "adminDemote",
            Self::Logout => "logout",
        }
    }

    /// Deserialisiert einen Befehl aus einem JSON-Frame
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Serialisiert den Befehl (fuer Tests und Client-Bibliotheken)
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
