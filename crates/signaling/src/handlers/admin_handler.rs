//! Admin-Handler – Bans, IP-Bans, Stummschaltung, Rollen
//!
//! Die Rangpruefung liegt im `ModerationGate`. Vor jeder Mutation wird
//! das Ziel geladen, damit das Gate dessen aktuelle Rolle kennt. Nach
//! erfolgreicher Mutation werden Cache und Store nachgezogen.

use startblock_core::types::UserId;
use startblock_db::{Benutzer, SchreibAuftrag};
use startblock_protocol::command::{IpRequest, TargetRequest};
use startblock_protocol::ServerMessage;

use crate::dispatcher::BefehlsKontext;
use crate::error::{BefehlsFehler, BefehlsResult};
use crate::server_state::SignalingState;

/// Laedt das Ziel in Cache und Gate
async fn ziel_laden(state: &SignalingState, ziel: UserId) -> BefehlsResult<()> {
    let benutzer = state
        .cache
        .laden_oder_holen(state.store.as_ref(), ziel)
        .await?
        .ok_or_else(|| BefehlsFehler::ungueltig(format!("Unbekannter Benutzer {ziel}")))?;
    state.gate.benutzer_uebernehmen(&benutzer);
    Ok(())
}

fn ziel_speichern<F>(state: &SignalingState, ziel: UserId, aenderung: F)
where
    F: FnOnce(&mut Benutzer),
{
    match state.cache.aendern(ziel, aenderung) {
        Some(benutzer) => state
            .schreiber
            .einreihen(SchreibAuftrag::BenutzerSpeichern(benutzer)),
        None => tracing::warn!(user_id = %ziel, "Ziel nicht mehr im Cache, Aenderung nicht persistiert"),
    }
}

pub async fn handle_ban(
    req: TargetRequest,
    ctx: &BefehlsKontext,
    state: &SignalingState,
) -> BefehlsResult<ServerMessage> {
    ziel_laden(state, req.user).await?;
    state.gate.bannen(ctx.user_id, req.user)?;
    ziel_speichern(state, req.user, |b| b.gebannt = true);
    state.benutzer_trennen(req.user, "Gebannt");
    Ok(ServerMessage::ok("adminBan"))
}

pub async fn handle_unban(
    req: TargetRequest,
    ctx: &BefehlsKontext,
    state: &SignalingState,
) -> BefehlsResult<ServerMessage> {
    ziel_laden(state, req.user).await?;
    state.gate.entbannen(ctx.user_id, req.user)?;
    ziel_speichern(state, req.user, |b| b.gebannt = false);
    Ok(ServerMessage::ok("adminUnban"))
}

pub fn handle_ban_ip(
    req: IpRequest,
    ctx: &BefehlsKontext,
    state: &SignalingState,
) -> BefehlsResult<ServerMessage> {
    if req.ip == ctx.adresse {
        return Err(BefehlsFehler::ungueltig("Eigene Adresse kann nicht gebannt werden"));
    }
    if state.gate.ip_bannen(ctx.user_id, req.ip)? {
        state
            .schreiber
            .einreihen(SchreibAuftrag::IpBanSpeichern(req.ip));
    }
    for handle in state.registry.handles_von_adresse(req.ip) {
        handle.senden(ServerMessage::Disconnecting {
            reason: "Adresse gebannt".to_string(),
        });
        handle.schliessen();
    }
    Ok(ServerMessage::ok("adminBanIP"))
}

pub fn handle_unban_ip(
    req: IpRequest,
    ctx: &BefehlsKontext,
    state: &SignalingState,
) -> BefehlsResult<ServerMessage> {
    if state.gate.ip_entbannen(ctx.user_id, req.ip)? {
        state
            .schreiber
            .einreihen(SchreibAuftrag::IpBanEntfernen(req.ip));
    }
    Ok(ServerMessage::ok("adminUnbanIP"))
}

pub async fn handle_squelch(
    req: TargetRequest,
    ctx: &BefehlsKontext,
    state: &SignalingState,
) -> BefehlsResult<ServerMessage> {
    ziel_laden(state, req.user).await?;
    state.gate.stummschalten(ctx.user_id, req.user)?;
    ziel_speichern(state, req.user, |b| b.stummgeschaltet = true);
    Ok(ServerMessage::ok("adminSquelch"))
}

pub async fn handle_unsquelch(
    req: TargetRequest,
    ctx: &BefehlsKontext,
    state: &SignalingState,
) -> BefehlsResult<ServerMessage> {
    ziel_laden(state, req.user).await?;
    state.gate.stummschaltung_aufheben(ctx.user_id, req.user)?;
    ziel_speichern(state, req.user, |b| b.stummgeschaltet = false);
    Ok(ServerMessage::ok("adminUnsquelch"))
}

pub async fn handle_promote(
    req: TargetRequest,
    ctx: &BefehlsKontext,
    state: &SignalingState,
) -> BefehlsResult<ServerMessage> {
    ziel_laden(state, req.user).await?;
    let rolle = state.gate.befoerdern(ctx.user_id, req.user)?;
    ziel_speichern(state, req.user, |b| b.rolle = rolle);
    Ok(ServerMessage::ok("adminPromote"))
}

pub async fn handle_demote(
    req: TargetRequest,
    ctx: &BefehlsKontext,
    state: &SignalingState,
) -> BefehlsResult<ServerMessage> {
    ziel_laden(state, req.user).await?;
    let rolle = state.gate.degradieren(ctx.user_id, req.user)?;
    ziel_speichern(state, req.user, |b| b.rolle = rolle);
    Ok(ServerMessage::ok("adminDemote"))
}
