//! Profil-Handler – Profil abfragen und eigene Einstellungen aendern
//!
//! Aenderungen landen sofort im Cache und gehen ueber den
//! `StoreSchreiber` in den Store.

use startblock_core::types::UserId;
use startblock_db::{Benutzer, SchreibAuftrag};
use startblock_protocol::command::{
    ProfileRequest, StreamRequest, TwitchBotDelayRequest, TwitchBotRequest, UsernameRequest,
};
use startblock_protocol::ServerMessage;

use crate::dispatcher::BefehlsKontext;
use crate::error::{BefehlsFehler, BefehlsResult};
use crate::server_state::SignalingState;

pub const BENUTZERNAME_MIN_LAENGE: usize = 2;
pub const BENUTZERNAME_MAX_LAENGE: usize = 20;
pub const BOT_VERZOEGERUNG_MAX: u32 = 60;
const TWITCH_PRAEFIX: &str = "https://www.twitch.tv/";

/// Prueft eine Stream-URL; leer entfernt den Stream
fn stream_url_pruefen(url: &str) -> BefehlsResult<String> {
    let url = url.trim();
    if url.is_empty() {
        return Ok(String::new());
    }
    let kanal = url
        .strip_prefix(TWITCH_PRAEFIX)
        .ok_or_else(|| BefehlsFehler::ungueltig(format!("Stream-URL muss mit {TWITCH_PRAEFIX} beginnen")))?;
    let gueltig = (4..=25).contains(&kanal.len())
        && kanal.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !gueltig {
        return Err(BefehlsFehler::ungueltig("Ungueltiger Twitch-Kanalname"));
    }
    Ok(url.to_string())
}

/// Aendert den eigenen Benutzer und persistiert ihn
fn eigenes_profil_aendern<F>(
    state: &SignalingState,
    user_id: UserId,
    aenderung: F,
) -> BefehlsResult<ServerMessage>
where
    F: FnOnce(&mut Benutzer),
{
    let benutzer = state
        .cache
        .aendern(user_id, aenderung)
        .ok_or_else(|| BefehlsFehler::intern("Angemeldeter Benutzer fehlt im Cache"))?;
    let profile = benutzer.profil();
    state
        .schreiber
        .einreihen(SchreibAuftrag::BenutzerSpeichern(benutzer));
    Ok(ServerMessage::Profile { profile })
}

pub async fn handle_profile_get(
    req: ProfileRequest,
    state: &SignalingState,
) -> BefehlsResult<ServerMessage> {
    let benutzer = state
        .cache
        .laden_oder_holen(state.store.as_ref(), req.user)
        .await?
        .ok_or_else(|| BefehlsFehler::ungueltig(format!("Unbekannter Benutzer {}", req.user)))?;
    Ok(ServerMessage::Profile {
        profile: benutzer.profil(),
    })
}

/// Nur die Gross-/Kleinschreibung des eigenen Namens darf sich aendern
pub fn handle_set_username(
    req: UsernameRequest,
    ctx: &BefehlsKontext,
    state: &SignalingState,
) -> BefehlsResult<ServerMessage> {
    let neu = req.name.trim();
    let laenge = neu.chars().count();
    if !(BENUTZERNAME_MIN_LAENGE..=BENUTZERNAME_MAX_LAENGE).contains(&laenge) {
        return Err(BefehlsFehler::ungueltig(format!(
            "Benutzername muss {BENUTZERNAME_MIN_LAENGE} bis {BENUTZERNAME_MAX_LAENGE} Zeichen lang sein"
        )));
    }
    let aktuell = state.cache.name_von(ctx.user_id);
    if aktuell.to_lowercase() != neu.to_lowercase() {
        return Err(BefehlsFehler::ungueltig(
            "Nur die Gross-/Kleinschreibung des Namens kann geaendert werden",
        ));
    }
    let neu = neu.to_string();
    eigenes_profil_aendern(state, ctx.user_id, |b| b.name = neu)
}

pub fn handle_set_stream(
    req: StreamRequest,
    ctx: &BefehlsKontext,
    state: &SignalingState,
) -> BefehlsResult<ServerMessage> {
    let url = stream_url_pruefen(&req.url)?;
    eigenes_profil_aendern(state, ctx.user_id, |b| {
        if url.is_empty() {
            b.twitch_bot_aktiv = false;
        }
        b.stream_url = url;
    })
}

pub fn handle_set_twitch_bot(
    req: TwitchBotRequest,
    ctx: &BefehlsKontext,
    state: &SignalingState,
) -> BefehlsResult<ServerMessage> {
    if req.enabled {
        let hat_stream = state
            .cache
            .holen(ctx.user_id)
            .is_some_and(|b| !b.stream_url.is_empty());
        if !hat_stream {
            return Err(BefehlsFehler::Konflikt {
                nachricht: "Twitch-Bot erfordert eine Stream-URL".to_string(),
                zustand: Some("no_stream".to_string()),
            });
        }
    }
    eigenes_profil_aendern(state, ctx.user_id, |b| b.twitch_bot_aktiv = req.enabled)
}

pub fn handle_set_twitch_bot_delay(
    req: TwitchBotDelayRequest,
    ctx: &BefehlsKontext,
    state: &SignalingState,
) -> BefehlsResult<ServerMessage> {
    if req.delay > BOT_VERZOEGERUNG_MAX {
        return Err(BefehlsFehler::ungueltig(format!(
            "Verzoegerung muss 0 bis {BOT_VERZOEGERUNG_MAX} Sekunden sein"
        )));
    }
    eigenes_profil_aendern(state, ctx.user_id, |b| b.twitch_bot_verzoegerung = req.delay)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_urls() {
        assert_eq!(stream_url_pruefen("").unwrap(), "");
        assert_eq!(
            stream_url_pruefen(" https://www.twitch.tv/zamiel ").unwrap(),
            "https://www.twitch.tv/zamiel"
        );
        assert!(stream_url_pruefen("https://twitch.tv/zamiel").is_err());
        assert!(stream_url_pruefen("https://www.twitch.tv/ab").is_err());
        assert!(stream_url_pruefen("https://www.twitch.tv/kanal/../x").is_err());
    }
}
