//! Raum-Handler – Join, Leave, Chat, Private Nachrichten, Raumliste
//!
//! Raumnamen bestehen aus `[a-z0-9_-]` (1 bis 32 Zeichen, Grossbuchstaben
//! werden umgewandelt). Namen mit `_` am Anfang sind reserviert; erlaubt
//! ist davon nur der Rennraum eines nicht archivierten Rennens.

use startblock_core::types::RaceId;
use startblock_protocol::command::{PrivateMessageRequest, RoomMessageRequest, RoomRequest};
use startblock_protocol::ServerMessage;

use super::text_pruefen;
use crate::dispatcher::BefehlsKontext;
use crate::error::{BefehlsFehler, BefehlsResult};
use crate::server_state::SignalingState;

pub const RAUMNAME_MAX_LAENGE: usize = 32;
pub const NACHRICHT_MAX_LAENGE: usize = 300;

/// Normalisiert und prueft einen Raumnamen
pub(crate) fn raumname_pruefen(name: &str, state: &SignalingState) -> BefehlsResult<String> {
    let name = name.trim().to_lowercase();
    if name.is_empty() || name.chars().count() > RAUMNAME_MAX_LAENGE {
        return Err(BefehlsFehler::ungueltig(format!(
            "Raumname muss 1 bis {RAUMNAME_MAX_LAENGE} Zeichen lang sein"
        )));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
    {
        return Err(BefehlsFehler::ungueltig(
            "Raumname darf nur a-z, 0-9, '_' und '-' enthalten",
        ));
    }

    if name.starts_with('_') {
        let rennen_aktiv = RaceId::aus_raum_name(&name)
            .and_then(|id| state.engine.rennen_abfragen(id).ok())
            .is_some_and(|r| !r.status.ist_terminal());
        if !rennen_aktiv {
            return Err(BefehlsFehler::ungueltig(format!("Raumname {name} ist reserviert")));
        }
    }
    Ok(name)
}

pub fn handle_room_join(
    req: RoomRequest,
    ctx: &BefehlsKontext,
    state: &SignalingState,
) -> BefehlsResult<ServerMessage> {
    let raum = raumname_pruefen(&req.room, state)?;
    let neu = state.broadcaster.beitreten(ctx.verbindung, &raum)?;
    if neu {
        tracing::debug!(user_id = %ctx.user_id, raum = %raum, "Raum betreten");
    }
    Ok(ServerMessage::ok("roomJoin"))
}

pub fn handle_room_leave(
    req: RoomRequest,
    ctx: &BefehlsKontext,
    state: &SignalingState,
) -> BefehlsResult<ServerMessage> {
    let raum = req.room.trim().to_lowercase();
    if !state.broadcaster.verlassen(ctx.verbindung, &raum) {
        return Err(BefehlsFehler::ungueltig(format!("Nicht Mitglied von Raum {raum}")));
    }
    Ok(ServerMessage::ok("roomLeave"))
}

pub fn handle_room_message(
    req: RoomMessageRequest,
    ctx: &BefehlsKontext,
    state: &SignalingState,
) -> BefehlsResult<ServerMessage> {
    let raum = req.room.trim().to_lowercase();
    let text = text_pruefen(&req.message, 1, NACHRICHT_MAX_LAENGE, "Nachricht")?;
    state.broadcaster.chat_senden(ctx.verbindung, &raum, text)?;
    Ok(ServerMessage::ok("roomMessage"))
}

pub fn handle_private_message(
    req: PrivateMessageRequest,
    ctx: &BefehlsKontext,
    state: &SignalingState,
) -> BefehlsResult<ServerMessage> {
    let text = text_pruefen(&req.message, 1, NACHRICHT_MAX_LAENGE, "Nachricht")?;
    state
        .broadcaster
        .privat_senden(ctx.verbindung, req.recipient, text)?;
    Ok(ServerMessage::ok("privateMessage"))
}

pub fn handle_room_list(state: &SignalingState) -> ServerMessage {
    ServerMessage::RoomList {
        rooms: state.broadcaster.raeume_auflisten(),
    }
}
