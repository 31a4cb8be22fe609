//! ConnectionRegistry – Lebende Verbindungen und ihre Identitaet
//!
//! Jede Verbindung bekommt beim Accept eine `ConnectionId` und einen
//! `VerbindungsHandle` (begrenzte Send-Queue + Schliess-Token). Nach der
//! Session-Validierung wird sie an eine `UserId` gebunden.
//!
//! ## Invariante
//! Eine `UserId` zeigt auf hoechstens eine lebende Verbindung. Bindet sich
//! derselbe Benutzer erneut, wird die alte Verbindung entfernt, geschlossen
//! und dem Aufrufer zum Aufraeumen zurueckgegeben.
//!
//! ```text
//! verbindungen: ConnectionId -> Verbindung { handle, user_id, raeume, ... }
//! benutzer:     UserId       -> ConnectionId
//! ```

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use startblock_core::error::FehlerArt;
use startblock_core::types::{ConnectionId, UserId};
use startblock_protocol::ServerMessage;
use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Standardgroesse der Send-Queue pro Verbindung
pub const SEND_QUEUE_GROESSE: usize = 64;

// ---------------------------------------------------------------------------
// Fehler
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryFehler {
    #[error("Unbekannte Verbindung: {0}")]
    Unbekannt(ConnectionId),

    #[error("Verbindung {0} ist bereits gebunden")]
    BereitsGebunden(ConnectionId),
}

impl RegistryFehler {
    pub fn art(&self) -> FehlerArt {
        match self {
            Self::Unbekannt(_) => FehlerArt::Validation,
            Self::BereitsGebunden(_) => FehlerArt::Conflict,
        }
    }
}

// ---------------------------------------------------------------------------
// VerbindungsHandle
// ---------------------------------------------------------------------------

/// Sende-Handle einer Verbindung
///
/// Senden blockiert nie. Ist die Queue voll, gilt der Client als zu
/// langsam und die Verbindung wird geschlossen.
#[derive(Debug, Clone)]
pub struct VerbindungsHandle {
    tx: mpsc::Sender<ServerMessage>,
    schliessen: CancellationToken,
    /// Gesetzt wenn die Queue uebergelaufen ist
    ueberlaufen: Arc<AtomicBool>,
}

impl VerbindungsHandle {
    /// Erstellt Handle und zugehoerige Empfangs-Queue
    pub fn neu(kapazitaet: usize) -> (Self, mpsc::Receiver<ServerMessage>) {
        let (tx, rx) = mpsc::channel(kapazitaet.max(1));
        (
            Self {
                tx,
                schliessen: CancellationToken::new(),
                ueberlaufen: Arc::new(AtomicBool::new(false)),
            },
            rx,
        )
    }

    /// Reiht eine Nachricht ein; `false` wenn sie verworfen wurde
    pub fn senden(&self, nachricht: ServerMessage) -> bool {
        match self.tx.try_send(nachricht) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!("Send-Queue voll, Verbindung wird geschlossen");
                self.ueberlaufen.store(true, Ordering::Relaxed);
                self.schliessen.cancel();
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!("Send-Queue geschlossen (Client getrennt)");
                false
            }
        }
    }

    /// Fordert das Schliessen der Verbindung an
    pub fn schliessen(&self) {
        self.schliessen.cancel();
    }

    pub fn ist_geschlossen(&self) -> bool {
        self.schliessen.is_cancelled()
    }

    /// Client war zu langsam; ausstehende Nachrichten werden nicht mehr zugestellt
    pub fn ist_ueberlaufen(&self) -> bool {
        self.ueberlaufen.load(Ordering::Relaxed)
    }

    /// Token auf das der Verbindungs-Task wartet
    pub fn schliess_token(&self) -> CancellationToken {
        self.schliessen.clone()
    }
}

// ---------------------------------------------------------------------------
// Verbindung
// ---------------------------------------------------------------------------

/// Eine lebende Verbindung
#[derive(Debug, Clone)]
pub struct Verbindung {
    pub id: ConnectionId,
    pub handle: VerbindungsHandle,
    pub user_id: Option<UserId>,
    pub adresse: IpAddr,
    /// Namen aller Raeume in denen die Verbindung Mitglied ist
    pub raeume: HashSet<String>,
    pub letzte_aktivitaet: Instant,
    pub verbunden_am: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// ConnectionRegistry
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    verbindungen: DashMap<ConnectionId, Verbindung>,
    benutzer: DashMap<UserId, ConnectionId>,
}

impl ConnectionRegistry {
    pub fn neu() -> Self {
        Self::default()
    }

    /// Registriert eine neue, noch ungebundene Verbindung
    pub fn registrieren(&self, handle: VerbindungsHandle, adresse: IpAddr) -> ConnectionId {
        let id = ConnectionId::new();
        self.verbindungen.insert(
            id,
            Verbindung {
                id,
                handle,
                user_id: None,
                adresse,
                raeume: HashSet::new(),
                letzte_aktivitaet: Instant::now(),
                verbunden_am: Utc::now(),
            },
        );
        tracing::debug!(verbindung = %id, adresse = %adresse, "Verbindung registriert");
        id
    }

    /// Bindet eine Verbindung an einen Benutzer
    ///
    /// Gibt die verdraengte fruehere Verbindung desselben Benutzers zurueck.
    /// Sie ist bereits entfernt und geschlossen; Raum- und Rennzustand
    /// werden nicht uebernommen.
    pub fn binden(
        &self,
        verbindung: ConnectionId,
        user_id: UserId,
    ) -> Result<Option<Verbindung>, RegistryFehler> {
        {
            let mut eintrag = self
                .verbindungen
                .get_mut(&verbindung)
                .ok_or(RegistryFehler::Unbekannt(verbindung))?;
            if eintrag.user_id.is_some() {
                return Err(RegistryFehler::BereitsGebunden(verbindung));
            }
            eintrag.user_id = Some(user_id);
        }

        let vorher = self.benutzer.insert(user_id, verbindung);

        // Wurde die Verbindung zwischenzeitlich abgemeldet, darf kein
        // Index-Eintrag auf sie zurueckbleiben
        if !self.verbindungen.contains_key(&verbindung) {
            self.benutzer.remove_if(&user_id, |_, c| *c == verbindung);
            return Err(RegistryFehler::Unbekannt(verbindung));
        }

        let verdraengt = vorher
            .filter(|alt| *alt != verbindung)
            .and_then(|alt| self.verbindungen.remove(&alt))
            .map(|(_, alt)| {
                alt.handle.schliessen();
                alt
            });

        if let Some(ref alt) = verdraengt {
            tracing::info!(
                user_id = %user_id,
                alt = %alt.id,
                neu = %verbindung,
                "Fruehere Verbindung verdraengt"
            );
        }
        tracing::debug!(verbindung = %verbindung, user_id = %user_id, "Verbindung gebunden");
        Ok(verdraengt)
    }

    /// Entfernt eine Verbindung
    ///
    /// Der Benutzer-Index wird nur geloescht, wenn er noch auf diese
    /// Verbindung zeigt.
    pub fn abmelden(&self, verbindung: ConnectionId) -> Option<Verbindung> {
        let (_, entfernt) = self.verbindungen.remove(&verbindung)?;
        if let Some(uid) = entfernt.user_id {
            self.benutzer.remove_if(&uid, |_, c| *c == verbindung);
        }
        tracing::debug!(verbindung = %verbindung, "Verbindung abgemeldet");
        Some(entfernt)
    }

    // -----------------------------------------------------------------------
    // Abfragen
    // -----------------------------------------------------------------------

    pub fn verbindung_von(&self, user_id: UserId) -> Option<ConnectionId> {
        self.benutzer.get(&user_id).map(|c| *c)
    }

    pub fn benutzer_von(&self, verbindung: ConnectionId) -> Option<UserId> {
        self.verbindungen.get(&verbindung).and_then(|v| v.user_id)
    }

    pub fn handle(&self, verbindung: ConnectionId) -> Option<VerbindungsHandle> {
        self.verbindungen.get(&verbindung).map(|v| v.handle.clone())
    }

    pub fn handle_von_benutzer(&self, user_id: UserId) -> Option<VerbindungsHandle> {
        let verbindung = self.verbindung_von(user_id)?;
        self.handle(verbindung)
    }

    pub fn adresse(&self, verbindung: ConnectionId) -> Option<IpAddr> {
        self.verbindungen.get(&verbindung).map(|v| v.adresse)
    }

    pub fn ist_registriert(&self, verbindung: ConnectionId) -> bool {
        self.verbindungen.contains_key(&verbindung)
    }

    /// Handles aller gebundenen Verbindungen
    pub fn gebundene_handles(&self) -> Vec<VerbindungsHandle> {
        self.verbindungen
            .iter()
            .filter(|v| v.user_id.is_some())
            .map(|v| v.handle.clone())
            .collect()
    }

    /// Handles aller Verbindungen einer Adresse (fuer IP-Bans)
    pub fn handles_von_adresse(&self, adresse: IpAddr) -> Vec<VerbindungsHandle> {
        self.verbindungen
            .iter()
            .filter(|v| v.adresse == adresse)
            .map(|v| v.handle.clone())
            .collect()
    }

    pub fn anzahl(&self) -> usize {
        self.verbindungen.len()
    }

    // -----------------------------------------------------------------------
    // Raum-Zugehoerigkeit und Aktivitaet
    // -----------------------------------------------------------------------

    /// Merkt sich einen Raum; `false` wenn die Verbindung nicht mehr existiert
    pub fn raum_merken(&self, verbindung: ConnectionId, raum: &str) -> bool {
        match self.verbindungen.get_mut(&verbindung) {
            Some(mut v) => {
                v.raeume.insert(raum.to_string());
                true
            }
            None => false,
        }
    }

    pub fn raum_vergessen(&self, verbindung: ConnectionId, raum: &str) {
        if let Some(mut v) = self.verbindungen.get_mut(&verbindung) {
            v.raeume.remove(raum);
        }
    }

    pub fn raeume_von(&self, verbindung: ConnectionId) -> Vec<String> {
        self.verbindungen
            .get(&verbindung)
            .map(|v| v.raeume.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn aktivitaet_merken(&self, verbindung: ConnectionId) {
        if let Some(mut v) = self.verbindungen.get_mut(&verbindung) {
            v.letzte_aktivitaet = Instant::now();
        }
    }

    /// Verbindungen ohne Aktivitaet seit mindestens `schwelle`
    pub fn inaktive(&self, schwelle: Duration) -> Vec<ConnectionId> {
        let jetzt = Instant::now();
        self.verbindungen
            .iter()
            .filter(|v| jetzt.duration_since(v.letzte_aktivitaet) >= schwelle)
            .map(|v| v.id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adresse() -> IpAddr {
        "127.0.0.1".parse().unwrap()
    }

    #[test]
    fn registrieren_und_binden() {
        let registry = ConnectionRegistry::neu();
        let (handle, _rx) = VerbindungsHandle::neu(4);
        let conn = registry.registrieren(handle, adresse());
        let uid = UserId::new();

        assert!(registry.binden(conn, uid).unwrap().is_none());
        assert_eq!(registry.verbindung_von(uid), Some(conn));
        assert_eq!(registry.benutzer_von(conn), Some(uid));
    }

    #[test]
    fn doppeltes_binden_scheitert() {
        let registry = ConnectionRegistry::neu();
        let (handle, _rx) = VerbindungsHandle::neu(4);
        let conn = registry.registrieren(handle, adresse());
        registry.binden(conn, UserId::new()).unwrap();

        assert_eq!(
            registry.binden(conn, UserId::new()).unwrap_err(),
            RegistryFehler::BereitsGebunden(conn)
        );
    }

    #[test]
    fn neue_anmeldung_verdraengt_alte_verbindung() {
        let registry = ConnectionRegistry::neu();
        let uid = UserId::new();
        let (h1, _rx1) = VerbindungsHandle::neu(4);
        let (h2, _rx2) = VerbindungsHandle::neu(4);
        let alt = registry.registrieren(h1.clone(), adresse());
        let neu = registry.registrieren(h2, adresse());

        registry.binden(alt, uid).unwrap();
        let verdraengt = registry.binden(neu, uid).unwrap().unwrap();

        assert_eq!(verdraengt.id, alt);
        assert!(h1.ist_geschlossen());
        assert!(!registry.ist_registriert(alt));
        assert_eq!(registry.verbindung_von(uid), Some(neu));

        // Spaetes Abmelden der alten Verbindung laesst den Index unberuehrt
        assert!(registry.abmelden(alt).is_none());
        assert_eq!(registry.verbindung_von(uid), Some(neu));
    }

    #[test]
    fn abmelden_entfernt_index() {
        let registry = ConnectionRegistry::neu();
        let uid = UserId::new();
        let (handle, _rx) = VerbindungsHandle::neu(4);
        let conn = registry.registrieren(handle, adresse());
        registry.binden(conn, uid).unwrap();
        registry.raum_merken(conn, "lobby");

        let entfernt = registry.abmelden(conn).unwrap();
        assert!(entfernt.raeume.contains("lobby"));
        assert_eq!(registry.verbindung_von(uid), None);
        assert_eq!(registry.anzahl(), 0);
        assert!(!registry.raum_merken(conn, "lobby"));
    }

    #[tokio::test]
    async fn volle_queue_schliesst_verbindung() {
        let (handle, _rx) = VerbindungsHandle::neu(1);
        assert!(handle.senden(ServerMessage::ok("a")));
        assert!(!handle.senden(ServerMessage::ok("b")));
        assert!(handle.ist_geschlossen());
        assert!(handle.ist_ueberlaufen());

        // Regulaeres Schliessen ist kein Ueberlauf
        let (anderes, _rx) = VerbindungsHandle::neu(4);
        anderes.schliessen();
        assert!(anderes.ist_geschlossen());
        assert!(!anderes.ist_ueberlaufen());
    }

    #[tokio::test(start_paused = true)]
    async fn inaktive_verbindungen() {
        let registry = ConnectionRegistry::neu();
        let (h1, _rx1) = VerbindungsHandle::neu(4);
        let (h2, _rx2) = VerbindungsHandle::neu(4);
        let ruhig = registry.registrieren(h1, adresse());
        let aktiv = registry.registrieren(h2, adresse());

        tokio::time::advance(Duration::from_secs(120)).await;
        registry.aktivitaet_merken(aktiv);

        assert_eq!(registry.inaktive(Duration::from_secs(60)), vec![ruhig]);
    }
}
