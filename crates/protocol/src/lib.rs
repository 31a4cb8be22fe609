//! startblock-protocol – Nachrichtenformat zwischen Client und Server
//!
//! Dieses Crate definiert den geschlossenen Befehlssatz (`ClientCommand`),
//! alle Server-Nachrichten (`ServerMessage`) sowie das Regelwerk eines
//! Rennens. Kodiert wird JSON, eine Nachricht pro WebSocket-Frame:
//!
//! ```text
//! Client -> Server: {"command": "raceJoin", "data": {"id": "..."}}
//! Server -> Client: {"type": "raceJoined", "data": {...}}
//! ```

pub mod command;
pub mod message;
pub mod ruleset;

pub use command::ClientCommand;
pub use message::{
    AchievementInfo, MemberInfo, ParticipantInfo, ParticipantStatus, ProfileInfo, ProgressEntry,
    ProgressEvent, RaceInfo, RaceStatus, RoomInfo, RoomKind, ServerMessage,
};
pub use ruleset::{RaceFormat, RaceGoal, Ruleset};
