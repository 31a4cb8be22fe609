//! Command-Dispatcher – Routet Client-Befehle an die richtigen Handler
//!
//! Ablauf pro eingehendem Frame:
//!
//! ```text
//! Frame -> Rate-Limit -> JSON parsen -> Handler -> Antwort
//!             |              |             |
//!             v              v             v
//!         Throttled     Validation    Fehler/Ok/Daten
//! ```
//!
//! Ein gedrosselter Befehl wird nicht geparst und veraendert keinen
//! Zustand. Fehler gehen nur an die ausloesende Verbindung zurueck.

use startblock_core::types::{ConnectionId, UserId};
use startblock_protocol::{ClientCommand, ServerMessage};
use std::net::IpAddr;
use std::sync::Arc;

use crate::error::{BefehlsFehler, BefehlsResult};
use crate::handlers::{admin_handler, profile_handler, race_handler, room_handler};
use crate::server_state::SignalingState;

/// Name fuer Antworten auf Frames die nicht geparst werden konnten
const UNBEKANNTER_BEFEHL: &str = "unknown";

/// Informationen ueber die ausloesende Verbindung
#[derive(Debug, Clone, Copy)]
pub struct BefehlsKontext {
    pub verbindung: ConnectionId,
    /// Peer-IP-Adresse fuer Rate-Limit und Ban-Pruefungen
    pub adresse: IpAddr,
    pub user_id: UserId,
}

/// Ergebnis eines verarbeiteten Frames
#[derive(Debug, Clone)]
pub struct Verarbeitung {
    /// Antwort an die ausloesende Verbindung
    pub antwort: ServerMessage,
    /// Verbindung nach dem Senden der Antwort schliessen
    pub trennen: bool,
}

impl Verarbeitung {
    fn antwort(antwort: ServerMessage) -> Self {
        Self {
            antwort,
            trennen: false,
        }
    }
}

/// Zentraler Command-Dispatcher
pub struct CommandDispatcher {
    state: Arc<SignalingState>,
}

impl CommandDispatcher {
    /// Erstellt einen neuen Dispatcher
    pub fn neu(state: Arc<SignalingState>) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &Arc<SignalingState> {
        &self.state
    }

    /// Verarbeitet einen Text-Frame und liefert die Antwort
    pub async fn verarbeiten(&self, text: &str, ctx: &BefehlsKontext) -> Verarbeitung {
        let state = &self.state;

        if !state
            .rate_limiter
            .befehl_erlauben(ctx.adresse, Some(ctx.user_id))
        {
            state.metriken.befehle_gedrosselt_total.inc();
            tracing::debug!(user_id = %ctx.user_id, adresse = %ctx.adresse, "Befehl gedrosselt");
            return Verarbeitung::antwort(BefehlsFehler::Gedrosselt.antwort(UNBEKANNTER_BEFEHL));
        }

        let befehl = match ClientCommand::from_json(text) {
            Ok(b) => b,
            Err(e) => {
                tracing::debug!(user_id = %ctx.user_id, fehler = %e, "Ungueltiger Befehl");
                return Verarbeitung::antwort(
                    BefehlsFehler::ungueltig(format!("Ungueltiger Befehl: {e}"))
                        .antwort(UNBEKANNTER_BEFEHL),
                );
            }
        };

        let name = befehl.name();
        state.registry.aktivitaet_merken(ctx.verbindung);
        state.metriken.befehl_zaehlen(name);
        tracing::trace!(user_id = %ctx.user_id, befehl = name, "Befehl empfangen");

        if matches!(befehl, ClientCommand::Logout) {
            tracing::info!(user_id = %ctx.user_id, "Logout");
            return Verarbeitung {
                antwort: ServerMessage::ok(name),
                trennen: true,
            };
        }

        match self.ausfuehren(befehl, ctx).await {
            Ok(antwort) => Verarbeitung::antwort(antwort),
            Err(fehler) => {
                if fehler.art().ist_serverseitig() {
                    tracing::error!(user_id = %ctx.user_id, befehl = name, fehler = %fehler, "Befehl fehlgeschlagen");
                } else {
                    tracing::debug!(user_id = %ctx.user_id, befehl = name, fehler = %fehler, "Befehl abgelehnt");
                }
                Verarbeitung::antwort(fehler.antwort(name))
            }
        }
    }

    async fn ausfuehren(
        &self,
        befehl: ClientCommand,
        ctx: &BefehlsKontext,
    ) -> BefehlsResult<ServerMessage> {
        let state = self.state.as_ref();
        match befehl {
            // -------------------------------------------------------------------
            // Raeume
            // -------------------------------------------------------------------
            ClientCommand::RoomJoin(req) => room_handler::handle_room_join(req, ctx, state),
            ClientCommand::RoomLeave(req) => room_handler::handle_room_leave(req, ctx, state),
            ClientCommand::RoomMessage(req) => room_handler::handle_room_message(req, ctx, state),
            ClientCommand::PrivateMessage(req) => {
                room_handler::handle_private_message(req, ctx, state)
            }
            ClientCommand::RoomListAll => Ok(room_handler::handle_room_list(state)),

            // -------------------------------------------------------------------
            // Rennen
            // -------------------------------------------------------------------
            ClientCommand::RaceCreate(req) => race_handler::handle_race_create(req, ctx, state),
            ClientCommand::RaceJoin(req) => race_handler::handle_race_join(req, ctx, state),
            ClientCommand::RaceLeave(req) => race_handler::handle_race_leave(req, ctx, state),
            ClientCommand::RaceReady(req) => race_handler::handle_race_ready(req, ctx, state),
            ClientCommand::RaceUnready(req) => race_handler::handle_race_unready(req, ctx, state),
            ClientCommand::RaceRuleset(req) => race_handler::handle_race_ruleset(req, ctx, state),
            ClientCommand::RaceFinish(req) => race_handler::handle_race_finish(req, ctx, state),
            ClientCommand::RaceQuit(req) => race_handler::handle_race_quit(req, ctx, state),
            ClientCommand::RaceComment(req) => race_handler::handle_race_comment(req, ctx, state),
            ClientCommand::RaceItem(req) => race_handler::handle_race_item(req, ctx, state),
            ClientCommand::RaceFloor(req) => race_handler::handle_race_floor(req, ctx, state),

            // -------------------------------------------------------------------
            // Profil
            // -------------------------------------------------------------------
            ClientCommand::ProfileGet(req) => profile_handler::handle_profile_get(req, state).await,
            ClientCommand::ProfileSetUsername(req) => {
                profile_handler::handle_set_username(req, ctx, state)
            }
            ClientCommand::ProfileSetStream(req) => {
                profile_handler::handle_set_stream(req, ctx, state)
            }
            ClientCommand::ProfileSetTwitchBotEnabled(req) => {
                profile_handler::handle_set_twitch_bot(req, ctx, state)
            }
            ClientCommand::ProfileSetTwitchBotDelay(req) => {
                profile_handler::handle_set_twitch_bot_delay(req, ctx, state)
            }

            // -------------------------------------------------------------------
            // Administration
            // -------------------------------------------------------------------
            ClientCommand::AdminBan(req) => admin_handler::handle_ban(req, ctx, state).await,
            ClientCommand::AdminUnban(req) => admin_handler::handle_unban(req, ctx, state).await,
            ClientCommand::AdminBanIp(req) => admin_handler::handle_ban_ip(req, ctx, state),
            ClientCommand::AdminUnbanIp(req) => admin_handler::handle_unban_ip(req, ctx, state),
            ClientCommand::AdminSquelch(req) => {
                admin_handler::handle_squelch(req, ctx, state).await
            }
            ClientCommand::AdminUnsquelch(req) => {
                admin_handler::handle_unsquelch(req, ctx, state).await
            }
            ClientCommand::AdminPromote(req) => {
                admin_handler::handle_promote(req, ctx, state).await
            }
            ClientCommand::AdminDemote(req) => admin_handler::handle_demote(req, ctx, state).await,

            ClientCommand::Logout => Ok(ServerMessage::ok("logout")),
        }
    }
}
