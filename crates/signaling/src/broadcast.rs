//! RoomBroadcaster – Raeume und Fan-out an ihre Mitglieder
//!
//! Raeume sind benannte Mitgliedergruppen von Verbindungen:
//!
//! - `lobby`        – dauerhaft, jede Verbindung tritt beim Start bei
//! - `<name>`       – Chatraum, entsteht beim ersten Beitritt
//! - `_race_<id>`   – Raum eines Rennens (Teilnehmer und Zuschauer)
//!
//! Nicht dauerhafte Raeume verschwinden, sobald das letzte Mitglied geht.
//!
//! ## Zustellung
//! Die Mitgliederliste wird unter dem Shard-Lock kopiert und ohne Lock
//! beliefert. Jede Zustellung ist ein `try_send` auf die begrenzte Queue
//! der Verbindung; eine volle Queue schliesst die Verbindung.

use chrono::Utc;
use dashmap::DashMap;
use startblock_auth::ModerationGate;
use startblock_core::types::{ConnectionId, UserId};
use startblock_db::BenutzerCache;
use startblock_protocol::{MemberInfo, RoomInfo, RoomKind, ServerMessage};
use std::collections::HashSet;
use std::sync::Arc;

use crate::error::{BefehlsFehler, BefehlsResult};
use crate::registry::ConnectionRegistry;

/// Name des dauerhaften Lobby-Raums
pub const LOBBY: &str = "lobby";

/// Praefix der Rennraeume
pub const RENNRAUM_PRAEFIX: &str = "_race_";

#[derive(Debug)]
struct Raum {
    art: RoomKind,
    mitglieder: HashSet<ConnectionId>,
}

impl Raum {
    fn neu(name: &str) -> Self {
        Self {
            art: raum_art(name),
            mitglieder: HashSet::new(),
        }
    }

    fn ist_dauerhaft(&self) -> bool {
        self.art == RoomKind::Lobby
    }
}

/// Bestimmt die Art eines Raums anhand seines Namens
pub fn raum_art(name: &str) -> RoomKind {
    if name == LOBBY {
        RoomKind::Lobby
    } else if name.starts_with(RENNRAUM_PRAEFIX) {
        RoomKind::Race
    } else {
        RoomKind::Chat
    }
}

/// Raumverwaltung und Nachrichtenverteilung
pub struct RoomBroadcaster {
    registry: Arc<ConnectionRegistry>,
    cache: Arc<BenutzerCache>,
    gate: Arc<ModerationGate>,
    raeume: DashMap<String, Raum>,
}

impl RoomBroadcaster {
    pub fn neu(
        registry: Arc<ConnectionRegistry>,
        cache: Arc<BenutzerCache>,
        gate: Arc<ModerationGate>,
    ) -> Self {
        let raeume = DashMap::new();
        raeume.insert(LOBBY.to_string(), Raum::neu(LOBBY));
        Self {
            registry,
            cache,
            gate,
            raeume,
        }
    }

    fn mitglied_info(&self, user_id: UserId) -> MemberInfo {
        MemberInfo {
            user_id,
            name: self.cache.name_von(user_id),
        }
    }

    // -----------------------------------------------------------------------
    // Mitgliedschaft
    // -----------------------------------------------------------------------

    /// Tritt einem Raum bei (idempotent)
    ///
    /// Gibt `true` zurueck wenn die Verbindung neu hinzugekommen ist.
    pub fn beitreten(&self, verbindung: ConnectionId, raum: &str) -> BefehlsResult<bool> {
        let user_id = self
            .registry
            .benutzer_von(verbindung)
            .ok_or_else(|| BefehlsFehler::ungueltig("Verbindung nicht angemeldet"))?;

        let (neu, andere) = {
            let mut eintrag = self
                .raeume
                .entry(raum.to_string())
                .or_insert_with(|| Raum::neu(raum));
            let neu = eintrag.mitglieder.insert(verbindung);
            let andere: Vec<ConnectionId> = eintrag
                .mitglieder
                .iter()
                .filter(|c| **c != verbindung)
                .copied()
                .collect();
            (neu, andere)
        };

        // Ein paralleles Abmelden darf keine verwaiste Mitgliedschaft hinterlassen
        if !self.registry.raum_merken(verbindung, raum) {
            self.austragen(verbindung, raum, None);
            return Err(BefehlsFehler::ungueltig("Verbindung wurde getrennt"));
        }

        if neu {
            let mitglied = self.mitglied_info(user_id);
            self.an_verbindungen(
                &andere,
                ServerMessage::RoomJoined {
                    room: raum.to_string(),
                    member: mitglied,
                },
            );
            tracing::debug!(verbindung = %verbindung, raum, "Raum beigetreten");
        }

        let mitglieder = self.mitglieder_infos(raum);
        self.an_verbindung_senden(
            verbindung,
            ServerMessage::RoomMembers {
                room: raum.to_string(),
                members: mitglieder,
            },
        );
        Ok(neu)
    }

    /// Verlaesst einen Raum; `false` wenn die Verbindung nicht Mitglied war
    pub fn verlassen(&self, verbindung: ConnectionId, raum: &str) -> bool {
        let mitglied = self
            .registry
            .benutzer_von(verbindung)
            .map(|uid| self.mitglied_info(uid));
        self.registry.raum_vergessen(verbindung, raum);
        self.austragen(verbindung, raum, mitglied)
    }

    /// Entfernt eine (ggf. bereits abgemeldete) Verbindung aus allen Raeumen
    pub fn alle_verlassen<I>(&self, verbindung: ConnectionId, user_id: Option<UserId>, raeume: I)
    where
        I: IntoIterator<Item = String>,
    {
        let mitglied = user_id.map(|uid| self.mitglied_info(uid));
        for raum in raeume {
            self.registry.raum_vergessen(verbindung, &raum);
            self.austragen(verbindung, &raum, mitglied.clone());
        }
    }

    fn austragen(
        &self,
        verbindung: ConnectionId,
        raum: &str,
        mitglied: Option<MemberInfo>,
    ) -> bool {
        let verbleibend = {
            let Some(mut eintrag) = self.raeume.get_mut(raum) else {
                return false;
            };
            if !eintrag.mitglieder.remove(&verbindung) {
                return false;
            }
            eintrag.mitglieder.iter().copied().collect::<Vec<_>>()
        };

        if verbleibend.is_empty() {
            self.raeume
                .remove_if(raum, |_, r| r.mitglieder.is_empty() && !r.ist_dauerhaft());
        }

        if let Some(mitglied) = mitglied {
            self.an_verbindungen(
                &verbleibend,
                ServerMessage::RoomLeft {
                    room: raum.to_string(),
                    member: mitglied,
                },
            );
        }
        tracing::debug!(verbindung = %verbindung, raum, "Raum verlassen");
        true
    }

    // -----------------------------------------------------------------------
    // Zustellung
    // -----------------------------------------------------------------------

    fn an_verbindungen(&self, verbindungen: &[ConnectionId], nachricht: ServerMessage) -> usize {
        verbindungen
            .iter()
            .filter_map(|c| self.registry.handle(*c))
            .filter(|h| h.senden(nachricht.clone()))
            .count()
    }

    /// Sendet an alle Mitglieder eines Raums, optional ohne eine Verbindung
    pub fn an_raum_senden(
        &self,
        raum: &str,
        nachricht: ServerMessage,
        ausser: Option<ConnectionId>,
    ) -> usize {
        let empfaenger: Vec<ConnectionId> = match self.raeume.get(raum) {
            Some(r) => r
                .mitglieder
                .iter()
                .filter(|c| Some(**c) != ausser)
                .copied()
                .collect(),
            None => return 0,
        };
        self.an_verbindungen(&empfaenger, nachricht)
    }

    pub fn an_verbindung_senden(&self, verbindung: ConnectionId, nachricht: ServerMessage) -> bool {
        match self.registry.handle(verbindung) {
            Some(handle) => handle.senden(nachricht),
            None => false,
        }
    }

    pub fn an_benutzer_senden(&self, user_id: UserId, nachricht: ServerMessage) -> bool {
        match self.registry.handle_von_benutzer(user_id) {
            Some(handle) => handle.senden(nachricht),
            None => false,
        }
    }

    /// Sendet an alle angemeldeten Verbindungen
    pub fn an_alle_senden(&self, nachricht: ServerMessage) -> usize {
        self.registry
            .gebundene_handles()
            .into_iter()
            .filter(|h| h.senden(nachricht.clone()))
            .count()
    }

    /// Chatnachricht an einen Raum
    ///
    /// Stummgeschaltete Absender erhalten eine Bestaetigung, die Nachricht
    /// wird aber nicht verteilt.
    pub fn chat_senden(
        &self,
        verbindung: ConnectionId,
        raum: &str,
        text: &str,
    ) -> BefehlsResult<()> {
        let user_id = self
            .registry
            .benutzer_von(verbindung)
            .ok_or_else(|| BefehlsFehler::ungueltig("Verbindung nicht angemeldet"))?;
        if !self.ist_mitglied(verbindung, raum) {
            return Err(BefehlsFehler::ungueltig(format!(
                "Nicht Mitglied von Raum {raum}"
            )));
        }
        if !self.gate.darf_sprechen(user_id) {
            tracing::debug!(user_id = %user_id, raum, "Nachricht eines stummgeschalteten Benutzers verworfen");
            return Ok(());
        }

        self.an_raum_senden(
            raum,
            ServerMessage::RoomMessage {
                room: raum.to_string(),
                from: self.mitglied_info(user_id),
                message: text.to_string(),
                time: Utc::now(),
            },
            None,
        );
        Ok(())
    }

    /// Private Nachricht direkt an die Verbindung des Empfaengers
    pub fn privat_senden(
        &self,
        verbindung: ConnectionId,
        empfaenger: UserId,
        text: &str,
    ) -> BefehlsResult<()> {
        let user_id = self
            .registry
            .benutzer_von(verbindung)
            .ok_or_else(|| BefehlsFehler::ungueltig("Verbindung nicht angemeldet"))?;
        if user_id == empfaenger {
            return Err(BefehlsFehler::ungueltig("Nachricht an sich selbst"));
        }
        let ziel = self
            .registry
            .handle_von_benutzer(empfaenger)
            .ok_or_else(|| BefehlsFehler::ungueltig("Empfaenger ist nicht verbunden"))?;
        if !self.gate.darf_sprechen(user_id) {
            tracing::debug!(user_id = %user_id, "Private Nachricht eines stummgeschalteten Benutzers verworfen");
            return Ok(());
        }

        ziel.senden(ServerMessage::PrivateMessage {
            from: self.mitglied_info(user_id),
            message: text.to_string(),
            time: Utc::now(),
        });
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Abfragen
    // -----------------------------------------------------------------------

    pub fn ist_mitglied(&self, verbindung: ConnectionId, raum: &str) -> bool {
        self.raeume
            .get(raum)
            .map(|r| r.mitglieder.contains(&verbindung))
            .unwrap_or(false)
    }

    pub fn existiert(&self, raum: &str) -> bool {
        self.raeume.contains_key(raum)
    }

    pub fn mitglieder(&self, raum: &str) -> Vec<ConnectionId> {
        self.raeume
            .get(raum)
            .map(|r| r.mitglieder.iter().copied().collect())
            .unwrap_or_default()
    }

    fn mitglieder_infos(&self, raum: &str) -> Vec<MemberInfo> {
        let mut infos: Vec<MemberInfo> = self
            .mitglieder(raum)
            .into_iter()
            .filter_map(|c| self.registry.benutzer_von(c))
            .map(|uid| self.mitglied_info(uid))
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    /// Alle Raeume mit Art und Mitgliederzahl, nach Namen sortiert
    pub fn raeume_auflisten(&self) -> Vec<RoomInfo> {
        let mut liste: Vec<RoomInfo> = self
            .raeume
            .iter()
            .map(|r| RoomInfo {
                name: r.key().clone(),
                kind: r.art,
                members: r.mitglieder.len(),
            })
            .collect();
        liste.sort_by(|a, b| a.name.cmp(&b.name));
        liste
    }
}
