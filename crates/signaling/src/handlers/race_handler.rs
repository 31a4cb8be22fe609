//! Rennen-Handler – leitet Rennbefehle an die RaceEngine weiter
//!
//! Die Engine validiert Zustand und Eingaben selbst; hier wird nur der
//! Anzeigename aufgeloest und die Antwort fuer den Client gebaut.

use startblock_protocol::command::{
    CommentRequest, FloorRequest, ItemRequest, RaceCreateRequest, RaceRequest, RulesetRequest,
};
use startblock_protocol::ServerMessage;

use crate::dispatcher::BefehlsKontext;
use crate::error::BefehlsResult;
use crate::server_state::SignalingState;

pub fn handle_race_create(
    req: RaceCreateRequest,
    ctx: &BefehlsKontext,
    state: &SignalingState,
) -> BefehlsResult<ServerMessage> {
    let benutzername = state.cache.name_von(ctx.user_id);
    let race = state
        .engine
        .rennen_erstellen(ctx.user_id, &benutzername, &req.name, req.ruleset)?;
    Ok(ServerMessage::RaceState { race })
}

pub fn handle_race_join(
    req: RaceRequest,
    ctx: &BefehlsKontext,
    state: &SignalingState,
) -> BefehlsResult<ServerMessage> {
    let benutzername = state.cache.name_von(ctx.user_id);
    let race = state.engine.beitreten(ctx.user_id, &benutzername, req.id)?;
    Ok(ServerMessage::RaceState { race })
}

pub fn handle_race_leave(
    req: RaceRequest,
    ctx: &BefehlsKontext,
    state: &SignalingState,
) -> BefehlsResult<ServerMessage> {
    state.engine.verlassen(ctx.user_id, req.id)?;
    Ok(ServerMessage::ok("raceLeave"))
}

pub fn handle_race_ready(
    req: RaceRequest,
    ctx: &BefehlsKontext,
    state: &SignalingState,
) -> BefehlsResult<ServerMessage> {
    state.engine.bereit(ctx.user_id, req.id)?;
    Ok(ServerMessage::ok("raceReady"))
}

pub fn handle_race_unready(
    req: RaceRequest,
    ctx: &BefehlsKontext,
    state: &SignalingState,
) -> BefehlsResult<ServerMessage> {
    state.engine.nicht_bereit(ctx.user_id, req.id)?;
    Ok(ServerMessage::ok("raceUnready"))
}

pub fn handle_race_ruleset(
    req: RulesetRequest,
    ctx: &BefehlsKontext,
    state: &SignalingState,
) -> BefehlsResult<ServerMessage> {
    state
        .engine
        .regelwerk_setzen(ctx.user_id, req.id, req.ruleset)?;
    Ok(ServerMessage::ok("raceRuleset"))
}

pub fn handle_race_finish(
    req: RaceRequest,
    ctx: &BefehlsKontext,
    state: &SignalingState,
) -> BefehlsResult<ServerMessage> {
    let platz = state.engine.ziel_erreicht(ctx.user_id, req.id)?;
    tracing::debug!(user_id = %ctx.user_id, rennen_id = %req.id, platz, "raceFinish verarbeitet");
    Ok(ServerMessage::ok("raceFinish"))
}

pub fn handle_race_quit(
    req: RaceRequest,
    ctx: &BefehlsKontext,
    state: &SignalingState,
) -> BefehlsResult<ServerMessage> {
    state.engine.aufgeben(ctx.user_id, req.id)?;
    Ok(ServerMessage::ok("raceQuit"))
}

pub fn handle_race_comment(
    req: CommentRequest,
    ctx: &BefehlsKontext,
    state: &SignalingState,
) -> BefehlsResult<ServerMessage> {
    state.engine.kommentar(ctx.user_id, req.id, &req.comment)?;
    Ok(ServerMessage::ok("raceComment"))
}

pub fn handle_race_item(
    req: ItemRequest,
    ctx: &BefehlsKontext,
    state: &SignalingState,
) -> BefehlsResult<ServerMessage> {
    state.engine.item(ctx.user_id, req.id, req.item)?;
    Ok(ServerMessage::ok("raceItem"))
}

pub fn handle_race_floor(
    req: FloorRequest,
    ctx: &BefehlsKontext,
    state: &SignalingState,
) -> BefehlsResult<ServerMessage> {
    state.engine.etage(ctx.user_id, req.id, req.floor)?;
    Ok(ServerMessage::ok("raceFloor"))
}
