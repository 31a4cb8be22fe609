//! RaceEngine – Zustandsuebergaenge, Timer und Zustellung
//!
//! Jedes Rennen liegt hinter einem eigenen Mutex. Ein Uebergang sammelt
//! seine Auswirkungen (`Wirkung`) unter dem Lock; zugestellt wird erst
//! nach dem Freigeben. Die Zustellungs-Sperre des Rennens wird noch unter
//! dem Zustands-Lock genommen, damit Nachrichten eines Rennens in der
//! Reihenfolge der Uebergaenge ankommen.
//!
//! Lock-Reihenfolge: Rennen -> Zustellung, Rennen -> Benutzer-Index.
//! Kein Codepfad sperrt ein Rennen waehrend er einen Index-Eintrag haelt.

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use startblock_core::event::{Notifier, RennEreignis};
use startblock_core::types::{RaceId, UserId};
use startblock_db::{RennDatensatz, SchreibAuftrag, StoreSchreiber};
use startblock_observability::StartblockMetriken;
use startblock_protocol::{
    AchievementInfo, ParticipantStatus, ProgressEntry, ProgressEvent, RaceInfo, RaceStatus,
    Ruleset, ServerMessage,
};
use startblock_rating::{ErfolgsService, RatingService, RennErgebnis};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::time::Instant;

use super::error::{RennFehler, RennResult};
use super::state::{Rennen, Teilnehmer};
use super::timer::{self, TimerHandle};
use crate::broadcast::{RoomBroadcaster, LOBBY, RENNRAUM_PRAEFIX};
use crate::registry::ConnectionRegistry;

/// Maximale Laenge eines Rennnamens
pub const NAME_MAX_LAENGE: usize = 50;
/// Maximale Laenge eines Kommentars
pub const KOMMENTAR_MAX_LAENGE: usize = 150;

/// Zeitparameter und Grenzen der Rennen
#[derive(Debug, Clone)]
pub struct RennKonfig {
    /// Standard-Mindestanzahl fuer den Start (Solo-Rennen: 1)
    pub min_teilnehmer: usize,
    /// Sekundenmarken des Countdowns, absteigend; die erste ist die Gesamtdauer
    pub countdown_stufen: Vec<u64>,
    /// Maximale Renndauer bis alle Offenen als DNF gewertet werden
    pub watchdog: Duration,
    /// Wartezeit fuer getrennte Teilnehmer
    pub gnadenfrist: Duration,
}

impl Default for RennKonfig {
    fn default() -> Self {
        Self {
            min_teilnehmer: 2,
            countdown_stufen: vec![10, 5, 3, 2, 1],
            watchdog: Duration::from_secs(30 * 60),
            gnadenfrist: Duration::from_secs(60),
        }
    }
}

/// Dienste die die Engine zum Zustellen und Persistieren braucht
#[derive(Clone)]
pub struct RennDienste {
    pub registry: Arc<ConnectionRegistry>,
    pub broadcaster: Arc<RoomBroadcaster>,
    pub rating: RatingService,
    pub erfolge: ErfolgsService,
    pub notifier: Arc<dyn Notifier>,
    pub schreiber: StoreSchreiber,
    pub metriken: StartblockMetriken,
}

/// Auswirkung eines Uebergangs, ausgefuehrt nach dem Freigeben des Locks
#[derive(Debug)]
enum Wirkung {
    /// An den Rennraum `_race_<id>`
    Raum(RaceId, ServerMessage),
    Lobby(ServerMessage),
    /// Verbindung des Benutzers tritt dem Rennraum bei (und verlaesst andere)
    RaumBeitreten(UserId, RaceId),
    RaumVerlassen(UserId, RaceId),
    Speichern(SchreibAuftrag),
    Melden(RennEreignis),
    Bewerten(RennErgebnis),
    Abgeschlossen {
        status: RaceStatus,
        dauer: Option<Duration>,
    },
}

struct RennEintrag {
    rennen: Mutex<Rennen>,
    zustellung: Mutex<()>,
}

impl RennEintrag {
    fn neu(rennen: Rennen) -> Arc<Self> {
        Arc::new(Self {
            rennen: Mutex::new(rennen),
            zustellung: Mutex::new(()),
        })
    }
}

struct Inner {
    konfig: RennKonfig,
    aktive: DashMap<RaceId, Arc<RennEintrag>>,
    archiv: DashMap<RaceId, RaceInfo>,
    /// Benutzer -> sein einziges nicht-terminales Rennen
    benutzer_rennen: DashMap<UserId, RaceId>,
    dienste: RennDienste,
}

/// Zustandsmaschine aller Rennen
#[derive(Clone)]
pub struct RaceEngine {
    inner: Arc<Inner>,
}

impl RaceEngine {
    pub fn neu(mut konfig: RennKonfig, dienste: RennDienste) -> Self {
        konfig.countdown_stufen.sort_unstable_by(|a, b| b.cmp(a));
        konfig.countdown_stufen.dedup();
        Self {
            inner: Arc::new(Inner {
                konfig,
                aktive: DashMap::new(),
                archiv: DashMap::new(),
                benutzer_rennen: DashMap::new(),
                dienste,
            }),
        }
    }

    pub fn konfig(&self) -> &RennKonfig {
        &self.inner.konfig
    }

    fn aus_schwach(inner: &Weak<Inner>) -> Option<Self> {
        inner.upgrade().map(|inner| Self { inner })
    }

    // -----------------------------------------------------------------------
    // Abfragen
    // -----------------------------------------------------------------------

    fn eintrag(&self, id: RaceId) -> RennResult<Arc<RennEintrag>> {
        // Klonen, damit der Shard-Lock vor dem Rennen-Lock freigegeben ist
        if let Some(eintrag) = self.inner.aktive.get(&id).map(|e| Arc::clone(e.value())) {
            return Ok(eintrag);
        }
        match self.inner.archiv.get(&id) {
            Some(info) => Err(RennFehler::Archiviert {
                id,
                status: info.status,
            }),
            None => Err(RennFehler::Unbekannt(id)),
        }
    }

    /// Alle nicht archivierten Rennen, aelteste zuerst
    pub fn aktive_rennen(&self) -> Vec<RaceInfo> {
        let eintraege: Vec<Arc<RennEintrag>> = self
            .inner
            .aktive
            .iter()
            .map(|e| Arc::clone(e.value()))
            .collect();
        let mut liste: Vec<RaceInfo> = eintraege
            .iter()
            .map(|e| e.rennen.lock())
            .filter(|r| !r.status.ist_terminal())
            .map(|r| r.info())
            .collect();
        liste.sort_by_key(|r| r.created_at);
        liste
    }

    /// Zustand eines aktiven oder archivierten Rennens
    pub fn rennen_abfragen(&self, id: RaceId) -> RennResult<RaceInfo> {
        match self.eintrag(id) {
            Ok(eintrag) => Ok(eintrag.rennen.lock().info()),
            Err(RennFehler::Archiviert { .. }) => self
                .inner
                .archiv
                .get(&id)
                .map(|info| info.clone())
                .ok_or(RennFehler::Unbekannt(id)),
            Err(e) => Err(e),
        }
    }

    /// Nicht-terminales Rennen eines Benutzers
    pub fn rennen_von(&self, user_id: UserId) -> Option<RaceId> {
        self.inner.benutzer_rennen.get(&user_id).map(|e| *e.value())
    }

    pub fn aktive_anzahl(&self) -> usize {
        self.inner.aktive.len()
    }

    // -----------------------------------------------------------------------
    // Befehle
    // -----------------------------------------------------------------------

    /// Erstellt ein Rennen; der Ersteller ist erster Teilnehmer
    pub fn rennen_erstellen(
        &self,
        user_id: UserId,
        benutzername: &str,
        name: &str,
        regelwerk: Ruleset,
    ) -> RennResult<RaceInfo> {
        let name = name.trim();
        let laenge = name.chars().count();
        if laenge == 0 || laenge > NAME_MAX_LAENGE {
            return Err(RennFehler::Ungueltig(format!(
                "Rennname muss 1 bis {NAME_MAX_LAENGE} Zeichen lang sein"
            )));
        }
        regelwerk.validieren().map_err(RennFehler::Ungueltig)?;

        let id = RaceId::new();
        let eintrag = RennEintrag::neu(Rennen::neu(
            id,
            name.to_string(),
            regelwerk,
            Teilnehmer::neu(user_id, benutzername),
        ));

        self.im_rennen(&eintrag, |r, w| {
            match self.inner.benutzer_rennen.entry(user_id) {
                Entry::Occupied(e) => return Err(RennFehler::AnderesRennen(*e.get())),
                Entry::Vacant(e) => {
                    e.insert(id);
                }
            }
            self.inner.aktive.insert(id, Arc::clone(&eintrag));

            let info = r.info();
            w.push(Wirkung::RaumBeitreten(user_id, id));
            w.push(Wirkung::Lobby(ServerMessage::RaceCreated { race: info.clone() }));
            w.push(Wirkung::Speichern(SchreibAuftrag::RennenErstellen(
                r.datensatz(),
            )));
            w.push(Wirkung::Melden(RennEreignis::Erstellt {
                rennen_id: id,
                name: r.name.clone(),
                ersteller: user_id,
            }));
            tracing::info!(rennen_id = %id, user_id = %user_id, "Rennen erstellt");
            Ok(info)
        })
    }

    pub fn beitreten(&self, user_id: UserId, benutzername: &str, id: RaceId) -> RennResult<RaceInfo> {
        self.mit_rennen(id, |r, w| {
            r.status_pruefen(&[RaceStatus::Open], "raceJoin")?;
            if r.ist_teilnehmer(user_id) {
                return Err(RennFehler::BereitsTeilnehmer);
            }
            match self.inner.benutzer_rennen.entry(user_id) {
                Entry::Occupied(e) => return Err(RennFehler::AnderesRennen(*e.get())),
                Entry::Vacant(e) => {
                    e.insert(id);
                }
            }

            let teilnehmer = Teilnehmer::neu(user_id, benutzername);
            let participant = teilnehmer.info();
            r.teilnehmer.push(teilnehmer);

            w.push(Wirkung::RaumBeitreten(user_id, id));
            w.push(Wirkung::Raum(id, ServerMessage::RaceJoined { id, participant }));
            self.aenderung_melden(r, w);
            tracing::info!(rennen_id = %id, user_id = %user_id, "Teilnehmer beigetreten");
            Ok(r.info())
        })
    }

    /// Verlaesst ein Rennen vor dem Start
    pub fn verlassen(&self, user_id: UserId, id: RaceId) -> RennResult<()> {
        self.mit_rennen(id, |r, w| {
            r.status_pruefen(&[RaceStatus::Open, RaceStatus::Starting], "raceLeave")?;
            self.teilnehmer_entfernen(r, user_id, w)
        })
    }

    pub fn bereit(&self, user_id: UserId, id: RaceId) -> RennResult<()> {
        self.mit_rennen(id, |r, w| {
            r.status_pruefen(&[RaceStatus::Open, RaceStatus::Starting], "raceReady")?;
            let t = r.teilnehmer_mut(user_id)?;
            match t.status {
                ParticipantStatus::Ready => return Ok(()),
                ParticipantStatus::NotReady => t.status = ParticipantStatus::Ready,
                status => {
                    return Err(RennFehler::FalscherTeilnehmerStatus {
                        status,
                        aktion: "raceReady",
                    })
                }
            }
            w.push(Self::status_nachricht(id, t));
            self.start_pruefen(r, w);
            Ok(())
        })
    }

    /// Nimmt die Bereitschaft zurueck; waehrend des Countdowns zurueck nach Open
    pub fn nicht_bereit(&self, user_id: UserId, id: RaceId) -> RennResult<()> {
        self.mit_rennen(id, |r, w| {
            r.status_pruefen(&[RaceStatus::Open, RaceStatus::Starting], "raceUnready")?;
            let rennstatus = r.status;
            let t = r.teilnehmer_mut(user_id)?;
            match t.status {
                ParticipantStatus::NotReady => return Ok(()),
                ParticipantStatus::Ready => {}
                status => {
                    return Err(RennFehler::FalscherTeilnehmerStatus {
                        status,
                        aktion: "raceUnready",
                    })
                }
            }
            if rennstatus == RaceStatus::Starting {
                self.countdown_abbrechen(r, w);
            } else {
                t.status = ParticipantStatus::NotReady;
                w.push(Self::status_nachricht(id, t));
            }
            Ok(())
        })
    }

    /// Aendert das Regelwerk (nur Ersteller, nur vor dem Countdown)
    pub fn regelwerk_setzen(&self, user_id: UserId, id: RaceId, regelwerk: Ruleset) -> RennResult<()> {
        self.mit_rennen(id, |r, w| {
            r.status_pruefen(&[RaceStatus::Open], "raceRuleset")?;
            if !r.ist_teilnehmer(user_id) {
                return Err(RennFehler::KeinTeilnehmer(user_id));
            }
            if r.ersteller != user_id {
                return Err(RennFehler::NurErsteller);
            }
            regelwerk.validieren().map_err(RennFehler::Ungueltig)?;
            if r.regelwerk == regelwerk {
                return Ok(());
            }

            r.regelwerk = regelwerk.clone();
            r.alle_zuruecksetzen();
            w.push(Wirkung::Raum(
                id,
                ServerMessage::RulesetChanged {
                    id,
                    ruleset: regelwerk,
                },
            ));
            w.push(Wirkung::Raum(id, ServerMessage::RaceState { race: r.info() }));
            self.aenderung_melden(r, w);
            Ok(())
        })
    }

    /// Meldet das Erreichen des Ziels und vergibt den naechsten Platz
    pub fn ziel_erreicht(&self, user_id: UserId, id: RaceId) -> RennResult<u32> {
        self.mit_rennen(id, |r, w| {
            r.status_pruefen(&[RaceStatus::InProgress], "raceFinish")?;
            let vergangen = r.vergangen_ms();
            let status = r.teilnehmer_mut(user_id)?.status;
            if status != ParticipantStatus::Racing {
                return Err(RennFehler::FalscherTeilnehmerStatus {
                    status,
                    aktion: "raceFinish",
                });
            }

            r.zielzaehler += 1;
            let platz = r.zielzaehler;
            let t = r.teilnehmer_mut(user_id)?;
            t.status = ParticipantStatus::Finished;
            t.platz = Some(platz);
            t.zielzeit_ms = Some(vergangen);
            w.push(Self::status_nachricht(id, t));
            tracing::info!(rennen_id = %id, user_id = %user_id, platz, zeit_ms = vergangen, "Ziel erreicht");

            self.abschluss_pruefen(r, w);
            Ok(platz)
        })
    }

    pub fn aufgeben(&self, user_id: UserId, id: RaceId) -> RennResult<()> {
        self.mit_rennen(id, |r, w| {
            r.status_pruefen(&[RaceStatus::InProgress], "raceQuit")?;
            let t = r.teilnehmer_mut(user_id)?;
            if !t.ist_unterwegs() {
                return Err(RennFehler::FalscherTeilnehmerStatus {
                    status: t.status,
                    aktion: "raceQuit",
                });
            }
            timer::abbrechen(&mut t.gnadenfrist);
            t.status = ParticipantStatus::Quit;
            w.push(Self::status_nachricht(id, t));
            tracing::info!(rennen_id = %id, user_id = %user_id, "Teilnehmer aufgegeben");

            self.abschluss_pruefen(r, w);
            Ok(())
        })
    }

    /// Kommentar (auch nach dem Zieleinlauf erlaubt)
    pub fn kommentar(&self, user_id: UserId, id: RaceId, text: &str) -> RennResult<()> {
        let text = text.trim();
        let laenge = text.chars().count();
        if laenge == 0 || laenge > KOMMENTAR_MAX_LAENGE {
            return Err(RennFehler::Ungueltig(format!(
                "Kommentar muss 1 bis {KOMMENTAR_MAX_LAENGE} Zeichen lang sein"
            )));
        }
        self.fortschritt(
            user_id,
            id,
            ProgressEvent::Comment {
                text: text.to_string(),
            },
            "raceComment",
        )
    }

    pub fn item(&self, user_id: UserId, id: RaceId, item: u32) -> RennResult<()> {
        self.fortschritt(user_id, id, ProgressEvent::Item { item }, "raceItem")
    }

    pub fn etage(&self, user_id: UserId, id: RaceId, etage: u32) -> RennResult<()> {
        if etage == 0 {
            return Err(RennFehler::Ungueltig("Etage beginnt bei 1".into()));
        }
        self.fortschritt(user_id, id, ProgressEvent::Floor { floor: etage }, "raceFloor")
    }

    fn fortschritt(
        &self,
        user_id: UserId,
        id: RaceId,
        event: ProgressEvent,
        aktion: &'static str,
    ) -> RennResult<()> {
        self.mit_rennen(id, |r, w| {
            r.status_pruefen(&[RaceStatus::InProgress], aktion)?;
            let time_ms = r.vergangen_ms();
            let t = r.teilnehmer_mut(user_id)?;
            let erlaubt = match event {
                ProgressEvent::Comment { .. } => matches!(
                    t.status,
                    ParticipantStatus::Racing | ParticipantStatus::Finished
                ),
                _ => t.status == ParticipantStatus::Racing,
            };
            if !erlaubt {
                return Err(RennFehler::FalscherTeilnehmerStatus {
                    status: t.status,
                    aktion,
                });
            }
            let entry = ProgressEntry { time_ms, event };
            t.fortschritt.push(entry.clone());
            w.push(Wirkung::Raum(
                id,
                ServerMessage::RaceProgress { id, user_id, entry },
            ));
            // Protokoll ueberlebt einen Neustart
            w.push(Wirkung::Speichern(SchreibAuftrag::RennenAktualisieren(
                r.datensatz(),
            )));
            Ok(())
        })
    }

    // -----------------------------------------------------------------------
    // Verbindungsereignisse
    // -----------------------------------------------------------------------

    /// Verbindung eines Teilnehmers ist weg
    ///
    /// Vor dem Start zaehlt das wie Verlassen, waehrend des Rennens beginnt
    /// die Gnadenfrist. Ist der Benutzer bereits wieder gebunden, passiert
    /// nichts.
    pub fn verbindung_verloren(&self, user_id: UserId) {
        let Some(id) = self.rennen_von(user_id) else {
            return;
        };
        let eintrag = match self.eintrag(id) {
            Ok(e) => e,
            Err(_) => {
                self.inner
                    .benutzer_rennen
                    .remove_if(&user_id, |_, rid| *rid == id);
                return;
            }
        };

        let _ = self.im_rennen(&eintrag, |r, w| {
            // Index unter dem Rennen-Lock erneut lesen: nur wenn er noch auf
            // dieses Rennen zeigt, muss der Benutzer Teilnehmer sein
            if self.rennen_von(user_id) != Some(id) || r.status.ist_terminal() {
                return Ok(());
            }
            // Inzwischen neu verbunden: `wieder_verbunden` hat dieses Lock
            // schon gehabt oder nimmt es als naechstes
            if self.inner.dienste.registry.verbindung_von(user_id).is_some() {
                tracing::debug!(rennen_id = %id, user_id = %user_id, "Benutzer bereits neu verbunden");
                return Ok(());
            }
            if !r.ist_teilnehmer(user_id) {
                tracing::error!(
                    rennen_id = %id,
                    user_id = %user_id,
                    "Benutzer-Index zeigt auf Rennen ohne Teilnehmer"
                );
                self.interner_abbruch(r, w);
                return Ok(());
            }

            match r.status {
                RaceStatus::Open | RaceStatus::Starting => {
                    self.teilnehmer_entfernen(r, user_id, w)
                }
                RaceStatus::InProgress => {
                    let epoche = r.naechste_epoche();
                    let t = r.teilnehmer_mut(user_id)?;
                    if t.status != ParticipantStatus::Racing {
                        return Ok(());
                    }
                    t.status = ParticipantStatus::Disconnected;
                    t.gnadenfrist = Some(self.gnadenfrist_starten(id, user_id, epoche));
                    w.push(Self::status_nachricht(id, t));
                    tracing::info!(rennen_id = %id, user_id = %user_id, "Teilnehmer getrennt, Gnadenfrist laeuft");
                    Ok(())
                }
                _ => Ok(()),
            }
        });
    }

    /// Benutzer hat sich wieder verbunden; gibt sein laufendes Rennen zurueck
    pub fn wieder_verbunden(&self, user_id: UserId) -> Option<RaceId> {
        let id = self.rennen_von(user_id)?;
        let eintrag = self.eintrag(id).ok()?;
        self.im_rennen(&eintrag, |r, w| {
            if let Ok(t) = r.teilnehmer_mut(user_id) {
                if t.status == ParticipantStatus::Disconnected {
                    timer::abbrechen(&mut t.gnadenfrist);
                    t.status = ParticipantStatus::Racing;
                    w.push(Self::status_nachricht(id, t));
                    tracing::info!(rennen_id = %id, user_id = %user_id, "Teilnehmer wieder verbunden");
                }
            }
            Ok(())
        })
        .ok()?;
        Some(id)
    }

    // -----------------------------------------------------------------------
    // Wiederherstellung
    // -----------------------------------------------------------------------

    /// Uebernimmt nicht-terminale Rennen aus dem Store
    ///
    /// Laufende Rennen werden fortgesetzt, alle anderen als Cancelled
    /// zurueckgeschrieben. Gibt (fortgesetzt, verworfen) zurueck.
    pub fn wiederherstellen(&self, datensaetze: Vec<RennDatensatz>) -> (usize, usize) {
        let mut fortgesetzt = 0;
        let mut verworfen = 0;

        for mut datensatz in datensaetze {
            match datensatz.status {
                RaceStatus::InProgress => {
                    let mut rennen = Rennen::aus_datensatz(datensatz);
                    for t in &mut rennen.teilnehmer {
                        if t.status == ParticipantStatus::Disconnected {
                            t.status = ParticipantStatus::Racing;
                        }
                    }
                    let id = rennen.id;
                    let eintrag = RennEintrag::neu(rennen);
                    let _ = self.im_rennen(&eintrag, |r, w| {
                        for t in &r.teilnehmer {
                            if let Some(alt) = self.inner.benutzer_rennen.insert(t.user_id, id) {
                                tracing::warn!(user_id = %t.user_id, alt = %alt, "Benutzer in mehreren Rennen gespeichert");
                            }
                        }
                        self.inner.aktive.insert(id, Arc::clone(&eintrag));

                        let rest = self.inner.konfig.watchdog.saturating_sub(r.laufzeit());
                        self.watchdog_starten(r, rest);
                        self.abschluss_pruefen(r, w);
                        Ok(())
                    });
                    fortgesetzt += 1;
                }
                RaceStatus::Open | RaceStatus::Starting => {
                    datensatz.status = RaceStatus::Cancelled;
                    self.inner
                        .dienste
                        .schreiber
                        .einreihen(SchreibAuftrag::RennenAktualisieren(datensatz));
                    verworfen += 1;
                }
                _ => {}
            }
        }

        tracing::info!(fortgesetzt, verworfen, "Rennen wiederhergestellt");
        self.inner
            .dienste
            .metriken
            .rennen_aktiv
            .set(self.inner.aktive.len() as i64);
        (fortgesetzt, verworfen)
    }

    // -----------------------------------------------------------------------
    // Uebergaenge (unter dem Rennen-Lock)
    // -----------------------------------------------------------------------

    fn status_nachricht(id: RaceId, t: &Teilnehmer) -> Wirkung {
        Wirkung::Raum(
            id,
            ServerMessage::ParticipantStatusChanged {
                id,
                user_id: t.user_id,
                status: t.status,
                place: t.platz,
            },
        )
    }

    /// Lobby-Sicht und Store nachziehen
    fn aenderung_melden(&self, r: &Rennen, w: &mut Vec<Wirkung>) {
        w.push(Wirkung::Lobby(ServerMessage::RaceState { race: r.info() }));
        w.push(Wirkung::Speichern(SchreibAuftrag::RennenAktualisieren(
            r.datensatz(),
        )));
    }

    fn teilnehmer_entfernen(&self, r: &mut Rennen, user_id: UserId, w: &mut Vec<Wirkung>) -> RennResult<()> {
        let pos = r
            .teilnehmer
            .iter()
            .position(|t| t.user_id == user_id)
            .ok_or(RennFehler::KeinTeilnehmer(user_id))?;
        let mut t = r.teilnehmer.remove(pos);
        timer::abbrechen(&mut t.gnadenfrist);
        self.inner
            .benutzer_rennen
            .remove_if(&user_id, |_, rid| *rid == r.id);

        w.push(Wirkung::Raum(r.id, ServerMessage::RaceLeft { id: r.id, user_id }));
        w.push(Wirkung::RaumVerlassen(user_id, r.id));
        tracing::info!(rennen_id = %r.id, user_id = %user_id, "Teilnehmer hat das Rennen verlassen");

        if r.teilnehmer.is_empty() {
            self.abbrechen(r, "Alle Teilnehmer haben das Rennen verlassen", w);
            return Ok(());
        }
        if r.ersteller == user_id {
            r.ersteller = r.teilnehmer[0].user_id;
            tracing::debug!(rennen_id = %r.id, ersteller = %r.ersteller, "Neuer Ersteller");
        }

        if r.status == RaceStatus::Starting {
            self.countdown_abbrechen(r, w);
        } else {
            self.aenderung_melden(r, w);
            self.start_pruefen(r, w);
        }
        Ok(())
    }

    fn start_pruefen(&self, r: &mut Rennen, w: &mut Vec<Wirkung>) {
        let minimum = r.regelwerk.min_teilnehmer(self.inner.konfig.min_teilnehmer);
        if r.status == RaceStatus::Open && r.alle_bereit(minimum) {
            self.countdown_starten(r, w);
        }
    }

    fn countdown_starten(&self, r: &mut Rennen, w: &mut Vec<Wirkung>) {
        r.status = RaceStatus::Starting;
        let epoche = r.naechste_epoche();
        let engine = Arc::downgrade(&self.inner);
        let stufen = self.inner.konfig.countdown_stufen.clone();
        let id = r.id;
        let task = tokio::spawn(countdown_laufen(engine, id, epoche, stufen));
        r.countdown = Some(TimerHandle::neu(epoche, task));

        w.push(Wirkung::Raum(r.id, ServerMessage::RaceState { race: r.info() }));
        self.aenderung_melden(r, w);
        tracing::info!(rennen_id = %r.id, teilnehmer = r.teilnehmer.len(), "Countdown gestartet");
    }

    /// Starting -> Open, alle wieder nicht bereit
    fn countdown_abbrechen(&self, r: &mut Rennen, w: &mut Vec<Wirkung>) {
        timer::abbrechen(&mut r.countdown);
        r.status = RaceStatus::Open;
        r.alle_zuruecksetzen();
        w.push(Wirkung::Raum(r.id, ServerMessage::CountdownAborted { id: r.id }));
        w.push(Wirkung::Raum(r.id, ServerMessage::RaceState { race: r.info() }));
        self.aenderung_melden(r, w);
        tracing::info!(rennen_id = %r.id, "Countdown abgebrochen");
    }

    fn watchdog_starten(&self, r: &mut Rennen, dauer: Duration) {
        let epoche = r.naechste_epoche();
        let engine = Arc::downgrade(&self.inner);
        let id = r.id;
        let task = tokio::spawn(async move {
            tokio::time::sleep(dauer).await;
            if let Some(engine) = Self::aus_schwach(&engine) {
                engine.watchdog_abgelaufen(id, epoche);
            }
        });
        r.watchdog = Some(TimerHandle::neu(epoche, task));
    }

    fn gnadenfrist_starten(&self, id: RaceId, user_id: UserId, epoche: u64) -> TimerHandle {
        let engine = Arc::downgrade(&self.inner);
        let dauer = self.inner.konfig.gnadenfrist;
        let task = tokio::spawn(async move {
            tokio::time::sleep(dauer).await;
            if let Some(engine) = Self::aus_schwach(&engine) {
                engine.gnadenfrist_abgelaufen(id, user_id, epoche);
            }
        });
        TimerHandle::neu(epoche, task)
    }

    fn abschluss_pruefen(&self, r: &mut Rennen, w: &mut Vec<Wirkung>) {
        if r.status == RaceStatus::InProgress && r.niemand_unterwegs() {
            self.beenden(r, w);
        }
    }

    fn beenden(&self, r: &mut Rennen, w: &mut Vec<Wirkung>) {
        if !r.plaetze_lueckenlos() {
            tracing::error!(rennen_id = %r.id, zielzaehler = r.zielzaehler, "Platzvergabe inkonsistent");
            self.interner_abbruch(r, w);
            return;
        }

        r.status = RaceStatus::Finished;
        w.push(Wirkung::Raum(
            r.id,
            ServerMessage::RaceFinished {
                id: r.id,
                results: r.ergebnisliste(),
            },
        ));
        w.push(Wirkung::Melden(RennEreignis::Beendet {
            rennen_id: r.id,
            platzierungen: r.platzierungen(),
        }));
        if !r.bewertet {
            r.bewertet = true;
            w.push(Wirkung::Bewerten(r.ergebnis()));
        }
        tracing::info!(rennen_id = %r.id, platziert = r.zielzaehler, "Rennen beendet");
        self.abschliessen(r, w);
    }

    /// Einziger Weg, ein laufendes Rennen abzubrechen: verletzte
    /// Engine-Invariante. Gewertet wird nicht.
    fn interner_abbruch(&self, r: &mut Rennen, w: &mut Vec<Wirkung>) {
        tracing::warn!(rennen_id = %r.id, status = %r.status, "Rennen wird wegen internem Fehler abgebrochen");
        self.abbrechen(r, "Interner Fehler", w);
    }

    fn abbrechen(&self, r: &mut Rennen, grund: &str, w: &mut Vec<Wirkung>) {
        r.status = RaceStatus::Cancelled;
        w.push(Wirkung::Raum(
            r.id,
            ServerMessage::RaceCancelled {
                id: r.id,
                reason: grund.to_string(),
            },
        ));
        tracing::info!(rennen_id = %r.id, grund, "Rennen abgebrochen");
        self.abschliessen(r, w);
    }

    /// Terminaler Status ist gesetzt: Timer stoppen, archivieren, Index leeren
    fn abschliessen(&self, r: &mut Rennen, w: &mut Vec<Wirkung>) {
        r.timer_abbrechen();
        let info = r.info();
        w.push(Wirkung::Lobby(ServerMessage::RaceState { race: info.clone() }));
        w.push(Wirkung::Speichern(SchreibAuftrag::RennenAktualisieren(
            r.datensatz(),
        )));
        w.push(Wirkung::Abgeschlossen {
            status: r.status,
            dauer: r.start.map(|_| r.laufzeit()),
        });

        self.inner.archiv.insert(r.id, info);
        self.inner.aktive.remove(&r.id);
        for t in &r.teilnehmer {
            self.inner
                .benutzer_rennen
                .remove_if(&t.user_id, |_, rid| *rid == r.id);
        }
    }

    // -----------------------------------------------------------------------
    // Timer-Callbacks
    // -----------------------------------------------------------------------

    /// Gibt `false` zurueck wenn der Countdown ersetzt oder abgebrochen wurde
    fn countdown_stufe(&self, id: RaceId, epoche: u64, sekunden: u64) -> bool {
        self.mit_rennen(id, |r, w| {
            let gueltig = r.status == RaceStatus::Starting
                && r.countdown.as_ref().is_some_and(|t| t.epoche == epoche);
            if gueltig {
                w.push(Wirkung::Raum(id, ServerMessage::Countdown { id, seconds: sekunden }));
            }
            Ok(gueltig)
        })
        .unwrap_or(false)
    }

    fn countdown_ende(&self, id: RaceId, epoche: u64) {
        let _ = self.mit_rennen(id, |r, w| {
            if r.status != RaceStatus::Starting || !timer::nehmen_wenn(&mut r.countdown, epoche) {
                return Ok(());
            }

            let gestartet_am = Utc::now();
            r.status = RaceStatus::InProgress;
            r.gestartet_am = Some(gestartet_am);
            r.start = Some(Instant::now());
            for t in &mut r.teilnehmer {
                t.status = ParticipantStatus::Racing;
            }
            let watchdog = self.inner.konfig.watchdog;
            self.watchdog_starten(r, watchdog);

            w.push(Wirkung::Raum(
                id,
                ServerMessage::RaceStarted {
                    id,
                    started_at: gestartet_am,
                },
            ));
            w.push(Wirkung::Raum(id, ServerMessage::RaceState { race: r.info() }));
            w.push(Wirkung::Melden(RennEreignis::Gestartet {
                rennen_id: id,
                teilnehmer: r.teilnehmer.iter().map(|t| t.user_id).collect(),
            }));
            self.aenderung_melden(r, w);
            tracing::info!(rennen_id = %id, teilnehmer = r.teilnehmer.len(), "Rennen gestartet");
            Ok(())
        });
    }

    fn watchdog_abgelaufen(&self, id: RaceId, epoche: u64) {
        let _ = self.mit_rennen(id, |r, w| {
            if r.status != RaceStatus::InProgress || !timer::nehmen_wenn(&mut r.watchdog, epoche) {
                return Ok(());
            }
            tracing::warn!(rennen_id = %id, "Watchdog abgelaufen, offene Teilnehmer werden als DNF gewertet");
            for t in r.teilnehmer.iter_mut().filter(|t| t.ist_unterwegs()) {
                timer::abbrechen(&mut t.gnadenfrist);
                t.status = ParticipantStatus::Finished;
                t.dnf = true;
                t.platz = None;
                w.push(Self::status_nachricht(id, t));
            }
            self.beenden(r, w);
            Ok(())
        });
    }

    fn gnadenfrist_abgelaufen(&self, id: RaceId, user_id: UserId, epoche: u64) {
        let _ = self.mit_rennen(id, |r, w| {
            let Ok(t) = r.teilnehmer_mut(user_id) else {
                return Ok(());
            };
            if t.status != ParticipantStatus::Disconnected
                || !timer::nehmen_wenn(&mut t.gnadenfrist, epoche)
            {
                return Ok(());
            }
            t.status = ParticipantStatus::Quit;
            w.push(Self::status_nachricht(id, t));
            tracing::info!(rennen_id = %id, user_id = %user_id, "Gnadenfrist abgelaufen, Teilnehmer gilt als aufgegeben");
            self.abschluss_pruefen(r, w);
            Ok(())
        });
    }

    // -----------------------------------------------------------------------
    // Ausfuehrung
    // -----------------------------------------------------------------------

    fn mit_rennen<T>(
        &self,
        id: RaceId,
        f: impl FnOnce(&mut Rennen, &mut Vec<Wirkung>) -> RennResult<T>,
    ) -> RennResult<T> {
        let eintrag = self.eintrag(id)?;
        self.im_rennen(&eintrag, f)
    }

    fn im_rennen<T>(
        &self,
        eintrag: &RennEintrag,
        f: impl FnOnce(&mut Rennen, &mut Vec<Wirkung>) -> RennResult<T>,
    ) -> RennResult<T> {
        let mut wirkungen = Vec::new();
        let mut rennen = eintrag.rennen.lock();
        let ergebnis = f(&mut *rennen, &mut wirkungen);
        if wirkungen.is_empty() {
            return ergebnis;
        }
        let _zustellung = eintrag.zustellung.lock();
        drop(rennen);
        self.ausfuehren(wirkungen);
        ergebnis
    }

    fn ausfuehren(&self, wirkungen: Vec<Wirkung>) {
        let d = &self.inner.dienste;
        for wirkung in wirkungen {
            match wirkung {
                Wirkung::Raum(id, nachricht) => {
                    d.broadcaster.an_raum_senden(&id.raum_name(), nachricht, None);
                }
                Wirkung::Lobby(nachricht) => {
                    d.broadcaster.an_raum_senden(LOBBY, nachricht, None);
                }
                Wirkung::RaumBeitreten(user_id, id) => {
                    let Some(verbindung) = d.registry.verbindung_von(user_id) else {
                        continue;
                    };
                    let raum = id.raum_name();
                    for alt in d.registry.raeume_von(verbindung) {
                        if alt.starts_with(RENNRAUM_PRAEFIX) && alt != raum {
                            d.broadcaster.verlassen(verbindung, &alt);
                        }
                    }
                    if let Err(e) = d.broadcaster.beitreten(verbindung, &raum) {
                        tracing::debug!(user_id = %user_id, fehler = %e, "Rennraum nicht betreten");
                    }
                }
                Wirkung::RaumVerlassen(user_id, id) => {
                    if let Some(verbindung) = d.registry.verbindung_von(user_id) {
                        d.broadcaster.verlassen(verbindung, &id.raum_name());
                    }
                }
                Wirkung::Speichern(auftrag) => d.schreiber.einreihen(auftrag),
                Wirkung::Melden(ereignis) => {
                    let notifier = Arc::clone(&d.notifier);
                    tokio::spawn(async move {
                        if let Err(e) = notifier.melden(&ereignis).await {
                            tracing::warn!(rennen_id = %ereignis.rennen_id(), fehler = %e, "Notifier fehlgeschlagen");
                        }
                    });
                }
                Wirkung::Bewerten(ergebnis) => {
                    // Fehlende Teilnehmer werden aus dem Store nachgeladen.
                    // Erfolge erst nach dem Rating: sie lesen den Rennzaehler.
                    let rating = d.rating.clone();
                    let erfolge = d.erfolge.clone();
                    let broadcaster = Arc::clone(&d.broadcaster);
                    tokio::spawn(async move {
                        let id = ergebnis.rennen_id;
                        let raum = id.raum_name();
                        let ratings = rating.anwenden(&ergebnis).await;
                        if !ratings.is_empty() {
                            broadcaster.an_raum_senden(
                                &raum,
                                ServerMessage::RatingsUpdated { id, ratings },
                                None,
                            );
                        }
                        for (user_id, neu) in erfolge.vergeben(&ergebnis).await {
                            broadcaster.an_raum_senden(
                                &raum,
                                ServerMessage::AchievementsUnlocked {
                                    id,
                                    user_id,
                                    achievements: neu.into_iter().map(AchievementInfo::from).collect(),
                                },
                                None,
                            );
                        }
                    });
                }
                Wirkung::Abgeschlossen { status, dauer } => {
                    let label = status.to_string();
                    d.metriken
                        .rennen_abgeschlossen_total
                        .with_label_values(&[label.as_str()])
                        .inc();
                    if let (RaceStatus::Finished, Some(dauer)) = (status, dauer) {
                        d.metriken.renndauer_sekunden.observe(dauer.as_secs_f64());
                    }
                }
            }
        }
        d.metriken.rennen_aktiv.set(self.inner.aktive.len() as i64);
    }
}

/// Countdown-Task: eine Nachricht pro Stufe, danach der Start
async fn countdown_laufen(engine: Weak<Inner>, id: RaceId, epoche: u64, stufen: Vec<u64>) {
    let gesamt = stufen.first().copied().unwrap_or(0);
    let beginn = Instant::now();
    for stufe in stufen {
        tokio::time::sleep_until(beginn + Duration::from_secs(gesamt - stufe)).await;
        let Some(engine) = RaceEngine::aus_schwach(&engine) else {
            return;
        };
        if !engine.countdown_stufe(id, epoche, stufe) {
            return;
        }
    }
    tokio::time::sleep_until(beginn + Duration::from_secs(gesamt)).await;
    if let Some(engine) = RaceEngine::aus_schwach(&engine) {
        engine.countdown_ende(id, epoche);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use startblock_auth::ModerationGate;
    use startblock_core::event::LogNotifier;
    use startblock_core::types::{Achievement, Rating};
    use startblock_db::{Benutzer, BenutzerCache, MemoryStore, SchreiberKonfig, Store};
    use crate::registry::VerbindungsHandle;
    use tokio::sync::mpsc;

    struct Aufbau {
        engine: RaceEngine,
        registry: Arc<ConnectionRegistry>,
        broadcaster: Arc<RoomBroadcaster>,
        cache: Arc<BenutzerCache>,
        store: Arc<MemoryStore>,
        schreiber: StoreSchreiber,
    }

    fn aufbau(konfig: RennKonfig) -> Aufbau {
        let registry = Arc::new(ConnectionRegistry::neu());
        let cache = BenutzerCache::neu();
        let gate = ModerationGate::neu();
        let broadcaster = Arc::new(RoomBroadcaster::neu(
            Arc::clone(&registry),
            Arc::clone(&cache),
            gate,
        ));
        let store = Arc::new(MemoryStore::neu());
        let (schreiber, _task) = StoreSchreiber::starten(store.clone(), SchreiberKonfig::default());
        let rating = RatingService::neu(Arc::clone(&cache), store.clone(), schreiber.clone());
        let erfolge = ErfolgsService::neu(Arc::clone(&cache), store.clone(), schreiber.clone());
        let engine = RaceEngine::neu(
            konfig,
            RennDienste {
                registry: Arc::clone(&registry),
                broadcaster: Arc::clone(&broadcaster),
                rating,
                erfolge,
                notifier: Arc::new(LogNotifier),
                schreiber: schreiber.clone(),
                metriken: StartblockMetriken::neu().unwrap(),
            },
        );
        Aufbau {
            engine,
            registry,
            broadcaster,
            cache,
            store,
            schreiber,
        }
    }

    fn kurz() -> RennKonfig {
        RennKonfig {
            min_teilnehmer: 2,
            countdown_stufen: vec![3, 2, 1],
            watchdog: Duration::from_secs(600),
            gnadenfrist: Duration::from_secs(30),
        }
    }

    impl Aufbau {
        fn benutzer(&self, name: &str) -> (UserId, mpsc::Receiver<ServerMessage>) {
            let id = UserId::new();
            self.cache.einfuegen(Benutzer::neu(id, name));
            let (handle, rx) = VerbindungsHandle::neu(256);
            let conn = self.registry.registrieren(handle, "127.0.0.1".parse().unwrap());
            self.registry.binden(conn, id).unwrap();
            self.broadcaster.beitreten(conn, LOBBY).unwrap();
            (id, rx)
        }

        /// Verbindung abmelden und die Engine informieren
        fn trennen(&self, user_id: UserId) {
            if let Some(verbindung) = self.registry.verbindung_von(user_id) {
                self.registry.abmelden(verbindung);
            }
            self.engine.verbindung_verloren(user_id);
        }

        /// Zwei Teilnehmer, beide bereit, Countdown durchlaufen
        async fn laufendes_rennen(&self) -> (RaceId, UserId, UserId) {
            let (a, _) = self.benutzer("alice");
            let (b, _) = self.benutzer("bob");
            let info = self
                .engine
                .rennen_erstellen(a, "alice", "Daily", Ruleset::default())
                .unwrap();
            self.engine.beitreten(b, "bob", info.id).unwrap();
            self.engine.bereit(a, info.id).unwrap();
            self.engine.bereit(b, info.id).unwrap();
            tokio::time::sleep(Duration::from_secs(4)).await;
            assert_eq!(
                self.engine.rennen_abfragen(info.id).unwrap().status,
                RaceStatus::InProgress
            );
            (info.id, a, b)
        }
    }

    fn nachrichten(rx: &mut mpsc::Receiver<ServerMessage>) -> Vec<ServerMessage> {
        let mut liste = Vec::new();
        while let Ok(n) = rx.try_recv() {
            liste.push(n);
        }
        liste
    }

    #[tokio::test(start_paused = true)]
    async fn zweites_rennen_wird_abgelehnt() {
        let a = aufbau(kurz());
        let (uid, _rx) = a.benutzer("alice");
        let erstes = a
            .engine
            .rennen_erstellen(uid, "alice", "eins", Ruleset::default())
            .unwrap();
        let fehler = a
            .engine
            .rennen_erstellen(uid, "alice", "zwei", Ruleset::default())
            .unwrap_err();
        assert_eq!(fehler, RennFehler::AnderesRennen(erstes.id));
        assert_eq!(a.engine.aktive_anzahl(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn ungueltiger_name_wird_abgelehnt() {
        let a = aufbau(kurz());
        let (uid, _rx) = a.benutzer("alice");
        assert!(matches!(
            a.engine.rennen_erstellen(uid, "alice", "   ", Ruleset::default()),
            Err(RennFehler::Ungueltig(_))
        ));
        assert_eq!(a.engine.rennen_von(uid), None);
    }

    #[tokio::test(start_paused = true)]
    async fn countdown_sendet_alle_stufen_und_startet() {
        let a = aufbau(kurz());
        let (x, mut rx) = a.benutzer("alice");
        let (y, _ry) = a.benutzer("bob");
        let info = a
            .engine
            .rennen_erstellen(x, "alice", "Daily", Ruleset::default())
            .unwrap();
        a.engine.beitreten(y, "bob", info.id).unwrap();
        a.engine.bereit(x, info.id).unwrap();
        a.engine.bereit(y, info.id).unwrap();
        assert_eq!(
            a.engine.rennen_abfragen(info.id).unwrap().status,
            RaceStatus::Starting
        );

        tokio::time::sleep(Duration::from_secs(4)).await;
        let sekunden: Vec<u64> = nachrichten(&mut rx)
            .into_iter()
            .filter_map(|n| match n {
                ServerMessage::Countdown { seconds, .. } => Some(seconds),
                _ => None,
            })
            .collect();
        assert_eq!(sekunden, vec![3, 2, 1]);

        let info = a.engine.rennen_abfragen(info.id).unwrap();
        assert_eq!(info.status, RaceStatus::InProgress);
        assert!(info
            .participants
            .iter()
            .all(|p| p.status == ParticipantStatus::Racing));
    }

    #[tokio::test(start_paused = true)]
    async fn nicht_bereit_im_countdown_setzt_zurueck() {
        let a = aufbau(kurz());
        let (x, mut rx) = a.benutzer("alice");
        let (y, _ry) = a.benutzer("bob");
        let info = a
            .engine
            .rennen_erstellen(x, "alice", "Daily", Ruleset::default())
            .unwrap();
        a.engine.beitreten(y, "bob", info.id).unwrap();
        a.engine.bereit(x, info.id).unwrap();
        a.engine.bereit(y, info.id).unwrap();

        tokio::time::sleep(Duration::from_millis(1500)).await;
        a.engine.nicht_bereit(y, info.id).unwrap();
        nachrichten(&mut rx);

        tokio::time::sleep(Duration::from_secs(10)).await;
        let info = a.engine.rennen_abfragen(info.id).unwrap();
        assert_eq!(info.status, RaceStatus::Open);
        assert!(info
            .participants
            .iter()
            .all(|p| p.status == ParticipantStatus::NotReady));
        assert!(!nachrichten(&mut rx)
            .iter()
            .any(|n| matches!(n, ServerMessage::Countdown { .. } | ServerMessage::RaceStarted { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn zieleinlauf_vergibt_plaetze_und_wertet() {
        let a = aufbau(kurz());
        let (id, x, y) = a.laufendes_rennen().await;

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(a.engine.ziel_erreicht(x, id).unwrap(), 1);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(a.engine.ziel_erreicht(y, id).unwrap(), 2);

        let info = a.engine.rennen_abfragen(id).unwrap();
        assert_eq!(info.status, RaceStatus::Finished);
        let zeiten: Vec<Option<u64>> = info.participants.iter().map(|p| p.finish_time_ms).collect();
        // Start bei t=3s, Zieleinlauf bei t=124s und t=184s
        assert_eq!(zeiten, vec![Some(121_000), Some(181_000)]);

        // Wertung laeuft als eigener Task
        tokio::time::sleep(Duration::from_millis(10)).await;
        let sieger = a.cache.rating_von(x).unwrap();
        let verlierer = a.cache.rating_von(y).unwrap();
        assert!(sieger.mu > 25.0);
        assert!(verlierer.mu < 25.0);
        assert_eq!(sieger.rennen, 1);
        assert_eq!(a.engine.rennen_von(x), None);
        assert_eq!(a.engine.aktive_anzahl(), 0);

        a.schreiber.synchronisieren().await;
        assert_eq!(
            a.store.rennen(id).map(|d| d.status),
            Some(RaceStatus::Finished)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn zieleinlauf_schaltet_erfolge_frei() {
        let a = aufbau(kurz());
        let (x, mut rx) = a.benutzer("alice");
        let (y, _ry) = a.benutzer("bob");
        let info = a.engine.rennen_erstellen(x, "alice", "Daily", Ruleset::default()).unwrap();
        a.engine.beitreten(y, "bob", info.id).unwrap();
        a.engine.bereit(x, info.id).unwrap();
        a.engine.bereit(y, info.id).unwrap();
        tokio::time::sleep(Duration::from_secs(4)).await;

        a.engine.ziel_erreicht(x, info.id).unwrap();
        a.engine.aufgeben(y, info.id).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let erfolge = a.cache.holen(x).unwrap().erfolge;
        assert!(erfolge.contains(&Achievement::ErstesZiel));
        assert!(erfolge.contains(&Achievement::ErsterSieg));
        assert!(a.cache.holen(y).unwrap().erfolge.is_empty());

        let freigeschaltet: Vec<_> = nachrichten(&mut rx)
            .into_iter()
            .filter_map(|n| match n {
                ServerMessage::AchievementsUnlocked { user_id, achievements, .. } => {
                    Some((user_id, achievements.len()))
                }
                _ => None,
            })
            .collect();
        assert_eq!(freigeschaltet, vec![(x, 2)]);

        a.schreiber.synchronisieren().await;
        let gespeichert = a.store.benutzer_laden(x).await.unwrap().unwrap();
        assert_eq!(gespeichert.erfolge, erfolge);
    }

    #[tokio::test(start_paused = true)]
    async fn doppeltes_ziel_wird_abgelehnt() {
        let a = aufbau(kurz());
        let (id, x, _y) = a.laufendes_rennen().await;
        a.engine.ziel_erreicht(x, id).unwrap();
        assert!(matches!(
            a.engine.ziel_erreicht(x, id),
            Err(RennFehler::FalscherTeilnehmerStatus { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn watchdog_wertet_offene_als_dnf() {
        let a = aufbau(kurz());
        let (id, x, y) = a.laufendes_rennen().await;
        a.engine.ziel_erreicht(x, id).unwrap();

        tokio::time::sleep(Duration::from_secs(601)).await;
        let info = a.engine.rennen_abfragen(id).unwrap();
        assert_eq!(info.status, RaceStatus::Finished);
        let bob = info.participants.iter().find(|p| p.user_id == y).unwrap();
        assert!(bob.dnf);
        assert_eq!(bob.place, None);
        assert_eq!(bob.status, ParticipantStatus::Finished);
        assert_eq!(a.cache.rating_von(x).unwrap().rennen, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn gnadenfrist_endet_als_aufgabe() {
        let a = aufbau(kurz());
        let (id, x, y) = a.laufendes_rennen().await;

        a.trennen(y);
        let bob = |info: &RaceInfo| info.participants.iter().find(|p| p.user_id == y).map(|p| p.status);
        assert_eq!(
            bob(&a.engine.rennen_abfragen(id).unwrap()),
            Some(ParticipantStatus::Disconnected)
        );

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(
            bob(&a.engine.rennen_abfragen(id).unwrap()),
            Some(ParticipantStatus::Quit)
        );

        a.engine.ziel_erreicht(x, id).unwrap();
        assert_eq!(a.engine.rennen_abfragen(id).unwrap().status, RaceStatus::Finished);
    }

    #[tokio::test(start_paused = true)]
    async fn wiederverbinden_stoppt_gnadenfrist() {
        let a = aufbau(kurz());
        let (id, _x, y) = a.laufendes_rennen().await;

        a.trennen(y);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(a.engine.wieder_verbunden(y), Some(id));
        tokio::time::sleep(Duration::from_secs(60)).await;

        let info = a.engine.rennen_abfragen(id).unwrap();
        let bob = info.participants.iter().find(|p| p.user_id == y).unwrap();
        assert_eq!(bob.status, ParticipantStatus::Racing);
    }

    #[tokio::test(start_paused = true)]
    async fn spaetes_verbindungsende_nach_neuer_bindung_bleibt_folgenlos() {
        let a = aufbau(kurz());
        let (id, _x, y) = a.laufendes_rennen().await;

        // Alte Verbindung weg, neue schon gebunden, bevor deren Aufraeumen
        // die Engine erreicht
        if let Some(alt) = a.registry.verbindung_von(y) {
            a.registry.abmelden(alt);
        }
        let (handle, _rx) = VerbindungsHandle::neu(256);
        let neu = a.registry.registrieren(handle, "127.0.0.1".parse().unwrap());
        a.registry.binden(neu, y).unwrap();
        assert_eq!(a.engine.wieder_verbunden(y), Some(id));
        a.engine.verbindung_verloren(y);

        let bob = |info: &RaceInfo| info.participants.iter().find(|p| p.user_id == y).map(|p| p.status);
        assert_eq!(
            bob(&a.engine.rennen_abfragen(id).unwrap()),
            Some(ParticipantStatus::Racing)
        );
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(
            bob(&a.engine.rennen_abfragen(id).unwrap()),
            Some(ParticipantStatus::Racing)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn letzter_teilnehmer_geht_bricht_ab() {
        let a = aufbau(kurz());
        let (x, _rx) = a.benutzer("alice");
        let info = a
            .engine
            .rennen_erstellen(x, "alice", "Daily", Ruleset::default())
            .unwrap();
        a.engine.verlassen(x, info.id).unwrap();

        assert_eq!(
            a.engine.rennen_abfragen(info.id).unwrap().status,
            RaceStatus::Cancelled
        );
        assert_eq!(a.engine.rennen_von(x), None);
        assert!(matches!(
            a.engine.beitreten(x, "alice", info.id),
            Err(RennFehler::Archiviert { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn ersteller_geht_und_uebergibt() {
        let a = aufbau(kurz());
        let (x, _rx) = a.benutzer("alice");
        let (y, _ry) = a.benutzer("bob");
        let info = a
            .engine
            .rennen_erstellen(x, "alice", "Daily", Ruleset::default())
            .unwrap();
        a.engine.beitreten(y, "bob", info.id).unwrap();
        a.engine.verlassen(x, info.id).unwrap();

        let info = a.engine.rennen_abfragen(info.id).unwrap();
        assert_eq!(info.creator, y);
        assert_eq!(info.status, RaceStatus::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn regelwerk_nur_durch_ersteller() {
        let a = aufbau(kurz());
        let (x, _rx) = a.benutzer("alice");
        let (y, _ry) = a.benutzer("bob");
        let info = a
            .engine
            .rennen_erstellen(x, "alice", "Daily", Ruleset::default())
            .unwrap();
        a.engine.beitreten(y, "bob", info.id).unwrap();
        a.engine.bereit(y, info.id).unwrap();

        let neu = Ruleset {
            ranked: false,
            ..Ruleset::default()
        };
        assert_eq!(
            a.engine.regelwerk_setzen(y, info.id, neu.clone()),
            Err(RennFehler::NurErsteller)
        );
        a.engine.regelwerk_setzen(x, info.id, neu).unwrap();

        let info = a.engine.rennen_abfragen(info.id).unwrap();
        assert!(!info.ruleset.ranked);
        assert!(info
            .participants
            .iter()
            .all(|p| p.status == ParticipantStatus::NotReady));
    }

    #[tokio::test(start_paused = true)]
    async fn kommentar_nach_zieleinlauf_erlaubt_item_nicht() {
        let a = aufbau(kurz());
        let (id, x, _y) = a.laufendes_rennen().await;
        a.engine.item(x, id, 42).unwrap();
        a.engine.ziel_erreicht(x, id).unwrap();

        a.engine.kommentar(x, id, "gg").unwrap();
        assert!(matches!(
            a.engine.item(x, id, 7),
            Err(RennFehler::FalscherTeilnehmerStatus { .. })
        ));

        let info = a.engine.rennen_abfragen(id).unwrap();
        let alice = info.participants.iter().find(|p| p.user_id == x).unwrap();
        assert_eq!(alice.progress.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn inkonsistenter_index_bricht_laufendes_rennen_ohne_wertung_ab() {
        let a = aufbau(kurz());
        let (id, x, _y) = a.laufendes_rennen().await;
        a.engine.ziel_erreicht(x, id).unwrap();

        // Fremder Benutzer ohne Verbindung zeigt im Index auf das Rennen
        let fremder = UserId::new();
        a.engine.inner.benutzer_rennen.insert(fremder, id);
        a.engine.verbindung_verloren(fremder);
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(a.engine.rennen_abfragen(id).unwrap().status, RaceStatus::Cancelled);
        assert!(a.engine.rennen_von(x).is_none());
        assert!(a.cache.rating_von(x).map(|r| r.rennen == 0).unwrap_or(true));
    }

    #[tokio::test(start_paused = true)]
    async fn wiederherstellung_setzt_laufende_fort() {
        let a = aufbau(kurz());
        let (x, _rx) = a.benutzer("alice");
        let (y, _ry) = a.benutzer("bob");

        let mut laufend = Rennen::neu(
            RaceId::new(),
            "alt".into(),
            Ruleset::default(),
            Teilnehmer::neu(x, "alice"),
        );
        laufend.teilnehmer.push(Teilnehmer::neu(y, "bob"));
        laufend.status = RaceStatus::InProgress;
        laufend.gestartet_am = Some(Utc::now());
        for t in &mut laufend.teilnehmer {
            t.status = ParticipantStatus::Racing;
        }
        let offen = Rennen::neu(
            RaceId::new(),
            "offen".into(),
            Ruleset::default(),
            Teilnehmer::neu(UserId::new(), "carol"),
        );

        let (fortgesetzt, verworfen) = a
            .engine
            .wiederherstellen(vec![laufend.datensatz(), offen.datensatz()]);
        assert_eq!((fortgesetzt, verworfen), (1, 1));
        assert_eq!(a.engine.rennen_von(x), Some(laufend.id));

        a.engine.ziel_erreicht(x, laufend.id).unwrap();
        a.engine.aufgeben(y, laufend.id).unwrap();
        assert_eq!(
            a.engine.rennen_abfragen(laufend.id).unwrap().status,
            RaceStatus::Finished
        );

        a.schreiber.synchronisieren().await;
        assert_eq!(
            a.store.rennen(offen.id).map(|d| d.status),
            Some(RaceStatus::Cancelled)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn fortschritt_ueberlebt_neustart() {
        let a = aufbau(kurz());
        let (id, x, _y) = a.laufendes_rennen().await;
        a.engine.item(x, id, 105).unwrap();
        a.engine.etage(x, id, 2).unwrap();
        a.schreiber.synchronisieren().await;

        let gespeichert = a.store.rennen(id).unwrap();
        let alice = gespeichert.teilnehmer.iter().find(|t| t.user_id == x).unwrap();
        assert_eq!(alice.fortschritt.len(), 2);

        let neu = aufbau(kurz());
        assert_eq!(neu.engine.wiederherstellen(vec![gespeichert]), (1, 0));
        let info = neu.engine.rennen_abfragen(id).unwrap();
        let alice = info.participants.iter().find(|p| p.user_id == x).unwrap();
        assert_eq!(
            alice.progress.iter().map(|e| e.event.clone()).collect::<Vec<_>>(),
            vec![ProgressEvent::Item { item: 105 }, ProgressEvent::Floor { floor: 2 }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn wiederhergestelltes_rennen_wertet_mit_gespeicherten_ratings() {
        let a = aufbau(kurz());
        let erfahren = Rating {
            mu: 40.0,
            sigma: 2.0,
            rennen: 50,
        };
        // Beide Teilnehmer nur im Store, nicht im Cache (keine Verbindung seit dem Neustart)
        let (x, y) = (UserId::new(), UserId::new());
        for (id, name) in [(x, "alice"), (y, "bob")] {
            let mut benutzer = Benutzer::neu(id, name);
            benutzer.rating = erfahren;
            a.store.benutzer_speichern(&benutzer).await.unwrap();
        }

        let mut laufend = Rennen::neu(
            RaceId::new(),
            "alt".into(),
            Ruleset::default(),
            Teilnehmer::neu(x, "alice"),
        );
        laufend.teilnehmer.push(Teilnehmer::neu(y, "bob"));
        laufend.status = RaceStatus::InProgress;
        laufend.gestartet_am = Some(Utc::now());
        for t in &mut laufend.teilnehmer {
            t.status = ParticipantStatus::Racing;
        }
        a.engine.wiederherstellen(vec![laufend.datensatz()]);

        a.engine.ziel_erreicht(x, laufend.id).unwrap();
        a.engine.ziel_erreicht(y, laufend.id).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        a.schreiber.synchronisieren().await;

        let sieger = a.store.benutzer_laden(x).await.unwrap().unwrap().rating;
        let zweiter = a.store.benutzer_laden(y).await.unwrap().unwrap().rating;
        assert_eq!(sieger.rennen, 51);
        assert_eq!(zweiter.rennen, 51);
        assert!(sieger.mu > erfahren.mu);
        assert!(zweiter.mu < erfahren.mu);
        assert!(sieger.sigma < erfahren.sigma);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn gleichzeitige_zieleinlaeufe_luckenlos() {
        let a = aufbau(RennKonfig {
            countdown_stufen: vec![],
            ..kurz()
        });
        let mut teilnehmer = Vec::new();
        for i in 0..8 {
            let (uid, rx) = a.benutzer(&format!("r{i}"));
            teilnehmer.push((uid, rx));
        }
        let (erster, _) = &teilnehmer[0];
        let info = a
            .engine
            .rennen_erstellen(*erster, "r0", "Massenstart", Ruleset::default())
            .unwrap();
        for (uid, _) in teilnehmer.iter().skip(1) {
            a.engine.beitreten(*uid, "r", info.id).unwrap();
        }
        for (uid, _) in &teilnehmer {
            a.engine.bereit(*uid, info.id).unwrap();
        }
        for _ in 0..100 {
            if a.engine.rennen_abfragen(info.id).unwrap().status == RaceStatus::InProgress {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let aufgaben: Vec<_> = teilnehmer
            .iter()
            .map(|(uid, _)| {
                let engine = a.engine.clone();
                let uid = *uid;
                let id = info.id;
                tokio::spawn(async move { engine.ziel_erreicht(uid, id) })
            })
            .collect();
        let mut plaetze = Vec::new();
        for aufgabe in aufgaben {
            plaetze.push(aufgabe.await.unwrap().unwrap());
        }
        plaetze.sort_unstable();
        assert_eq!(plaetze, (1..=8).collect::<Vec<u32>>());
        assert_eq!(
            a.engine.rennen_abfragen(info.id).unwrap().status,
            RaceStatus::Finished
        );
    }
}
