//! Asynchroner Store-Schreiber
//!
//! Alle Schreibzugriffe auf den Store laufen ueber eine Queue und werden
//! von einem einzelnen Hintergrund-Task in Einreihungsreihenfolge
//! ausgefuehrt. Fehlgeschlagene Auftraege werden mit exponentiellem
//! Backoff wiederholt; nach dem letzten Versuch wird der Auftrag verworfen
//! und als Infrastrukturfehler geloggt. Der In-Memory-Zustand bleibt davon
//! unberuehrt.

use startblock_core::types::{Rating, UserId};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::DbResult;
use crate::models::{Benutzer, RennDatensatz};
use crate::store::Store;

/// Konfiguration des Schreibers
#[derive(Debug, Clone)]
pub struct SchreiberKonfig {
    /// Maximale Anzahl Versuche pro Auftrag
    pub max_versuche: u32,
    /// Wartezeit vor dem zweiten Versuch; verdoppelt sich je Versuch
    pub basis_backoff: Duration,
}

impl Default for SchreiberKonfig {
    fn default() -> Self {
        Self {
            max_versuche: 5,
            basis_backoff: Duration::from_millis(200),
        }
    }
}

/// Ein einzelner Schreibauftrag
#[derive(Debug, Clone)]
pub enum SchreibAuftrag {
    BenutzerSpeichern(Benutzer),
    RennenErstellen(RennDatensatz),
    RennenAktualisieren(RennDatensatz),
    RatingSpeichern(UserId, Rating),
    IpBanSpeichern(IpAddr),
    IpBanEntfernen(IpAddr),
}

impl SchreibAuftrag {
    fn bezeichnung(&self) -> &'static str {
        match self {
            Self::BenutzerSpeichern(_) => "benutzer_speichern",
            Self::RennenErstellen(_) => "rennen_erstellen",
            Self::RennenAktualisieren(_) => "rennen_aktualisieren",
            Self::RatingSpeichern(..) => "rating_speichern",
            Self::IpBanSpeichern(_) => "ip_ban_speichern",
            Self::IpBanEntfernen(_) => "ip_ban_entfernen",
        }
    }

    async fn ausfuehren(&self, store: &dyn Store) -> DbResult<()> {
        match self {
            Self::BenutzerSpeichern(b) => store.benutzer_speichern(b).await,
            Self::RennenErstellen(r) => store.rennen_erstellen(r).await,
            Self::RennenAktualisieren(r) => store.rennen_aktualisieren(r).await,
            Self::RatingSpeichern(id, rating) => store.rating_speichern(*id, *rating).await,
            Self::IpBanSpeichern(ip) => store.ip_ban_speichern(*ip).await,
            Self::IpBanEntfernen(ip) => store.ip_ban_entfernen(*ip).await,
        }
    }
}

enum QueueEintrag {
    Auftrag(SchreibAuftrag),
    /// Wird bestaetigt sobald alle vorherigen Auftraege abgearbeitet sind
    Markierung(oneshot::Sender<()>),
}

/// Handle auf die Schreib-Queue
///
/// Clone teilt dieselbe Queue.
#[derive(Clone)]
pub struct StoreSchreiber {
    tx: mpsc::UnboundedSender<QueueEintrag>,
}

impl StoreSchreiber {
    /// Startet den Worker-Task und gibt das Handle zurueck
    ///
    /// Der Worker endet, sobald alle Handles gedroppt wurden und die Queue
    /// leer ist.
    pub fn starten(store: Arc<dyn Store>, konfig: SchreiberKonfig) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<QueueEintrag>();
        let task = tokio::spawn(async move {
            while let Some(eintrag) = rx.recv().await {
                match eintrag {
                    QueueEintrag::Auftrag(auftrag) => {
                        mit_wiederholung(store.as_ref(), &auftrag, &konfig).await;
                    }
                    QueueEintrag::Markierung(antwort) => {
                        let _ = antwort.send(());
                    }
                }
            }
            tracing::debug!("Store-Schreiber beendet");
        });
        (Self { tx }, task)
    }

    /// Reiht einen Auftrag ein (blockiert nie)
    pub fn einreihen(&self, auftrag: SchreibAuftrag) {
        if let Err(e) = self.tx.send(QueueEintrag::Auftrag(auftrag)) {
            if let QueueEintrag::Auftrag(verloren) = e.0 {
                tracing::error!(
                    auftrag = verloren.bezeichnung(),
                    "Store-Schreiber laeuft nicht mehr, Auftrag verworfen"
                );
            }
        }
    }

    /// Wartet bis alle bisher eingereihten Auftraege abgearbeitet sind
    pub async fn synchronisieren(&self) {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(QueueEintrag::Markierung(tx)).is_ok() {
            let _ = rx.await;
        }
    }
}

async fn mit_wiederholung(store: &dyn Store, auftrag: &SchreibAuftrag, konfig: &SchreiberKonfig) {
    let mut wartezeit = konfig.basis_backoff;
    for versuch in 1..=konfig.max_versuche.max(1) {
        match auftrag.ausfuehren(store).await {
            Ok(()) => {
                if versuch > 1 {
                    tracing::info!(
                        auftrag = auftrag.bezeichnung(),
                        versuch,
                        "Store-Auftrag nach Wiederholung erfolgreich"
                    );
                }
                return;
            }
            Err(e) if e.ist_wiederholbar() && versuch < konfig.max_versuche => {
                tracing::warn!(
                    auftrag = auftrag.bezeichnung(),
                    versuch,
                    fehler = %e,
                    art = %e.art(),
                    "Store-Auftrag fehlgeschlagen, neuer Versuch folgt"
                );
                tokio::time::sleep(wartezeit).await;
                wartezeit = wartezeit.saturating_mul(2);
            }
            Err(e) => {
                tracing::error!(
                    auftrag = auftrag.bezeichnung(),
                    versuch,
                    fehler = %e,
                    art = %e.art(),
                    "Store-Auftrag endgueltig fehlgeschlagen"
                );
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;

    #[tokio::test(start_paused = true)]
    async fn auftrag_wird_nach_fehlern_wiederholt() {
        let store = Arc::new(MemoryStore::neu());
        store.fehler_injizieren(3);
        let (schreiber, _task) = StoreSchreiber::starten(store.clone(), SchreiberKonfig::default());

        let benutzer = Benutzer::neu(UserId::new(), "Racer");
        schreiber.einreihen(SchreibAuftrag::BenutzerSpeichern(benutzer.clone()));
        schreiber.synchronisieren().await;

        let geladen = store.benutzer_laden(benutzer.id).await.unwrap();
        assert_eq!(geladen, Some(benutzer));
    }

    #[tokio::test(start_paused = true)]
    async fn auftrag_wird_nach_max_versuchen_verworfen() {
        let store = Arc::new(MemoryStore::neu());
        store.fehler_injizieren(10);
        let konfig = SchreiberKonfig {
            max_versuche: 3,
            basis_backoff: Duration::from_millis(10),
        };
        let (schreiber, _task) = StoreSchreiber::starten(store.clone(), konfig);

        let benutzer = Benutzer::neu(UserId::new(), "Pech");
        schreiber.einreihen(SchreibAuftrag::BenutzerSpeichern(benutzer.clone()));
        schreiber.synchronisieren().await;

        assert!(store.benutzer_laden(benutzer.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn auftraege_in_reihenfolge() {
        let store = Arc::new(MemoryStore::neu());
        let (schreiber, _task) = StoreSchreiber::starten(store.clone(), SchreiberKonfig::default());

        let mut benutzer = Benutzer::neu(UserId::new(), "erst");
        schreiber.einreihen(SchreibAuftrag::BenutzerSpeichern(benutzer.clone()));
        benutzer.name = "dann".into();
        schreiber.einreihen(SchreibAuftrag::BenutzerSpeichern(benutzer.clone()));
        let rating = Rating {
            mu: 27.0,
            sigma: 7.5,
            rennen: 1,
        };
        schreiber.einreihen(SchreibAuftrag::RatingSpeichern(benutzer.id, rating));
        schreiber.synchronisieren().await;

        let geladen = store.benutzer_laden(benutzer.id).await.unwrap().unwrap();
        assert_eq!(geladen.name, "dann");
        assert_eq!(geladen.rating, rating);
    }
}
