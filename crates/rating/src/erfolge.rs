//! Erfolge – werden nach dem Zieleinlauf vergeben
//!
//! Die Regeln sind rein und haengen nur vom Rennergebnis und dem
//! bisherigen Benutzerstand ab. Der `ErfolgsService` laeuft nach dem
//! `RatingService`, damit Zaehler-Erfolge den neuen Rennzaehler sehen.

use startblock_core::types::{Achievement, UserId};
use startblock_db::{Benutzer, BenutzerCache, SchreibAuftrag, Store, StoreSchreiber};
use startblock_protocol::{ParticipantStatus, RaceStatus};
use std::sync::Arc;

use crate::ergebnis::{ErgebnisEintrag, RennErgebnis};

/// Erfolge, die `eintrag` mit diesem Rennen neu verdient
pub fn neue_erfolge(
    ergebnis: &RennErgebnis,
    eintrag: &ErgebnisEintrag,
    benutzer: &Benutzer,
) -> Vec<Achievement> {
    if ergebnis.status != RaceStatus::Finished {
        return Vec::new();
    }
    let im_ziel = eintrag.status == ParticipantStatus::Finished && !eintrag.dnf && eintrag.platz.is_some();
    let solo = ergebnis.regelwerk.solo;

    Achievement::ALLE
        .into_iter()
        .filter(|erfolg| !benutzer.erfolge.contains(erfolg))
        .filter(|erfolg| match erfolg {
            Achievement::ErstesZiel => im_ziel,
            Achievement::ErsterSieg => {
                !solo && ergebnis.teilnehmer.len() >= 2 && !eintrag.dnf && eintrag.platz == Some(1)
            }
            Achievement::Solist => solo && im_ziel,
            Achievement::ZehnRennen => benutzer.rating.rennen >= 10,
            Achievement::HundertRennen => benutzer.rating.rennen >= 100,
        })
        .collect()
}

/// Vergibt Erfolge und persistiert sie mit dem Benutzer-Datensatz
#[derive(Clone)]
pub struct ErfolgsService {
    cache: Arc<BenutzerCache>,
    store: Arc<dyn Store>,
    schreiber: StoreSchreiber,
}

impl ErfolgsService {
    pub fn neu(cache: Arc<BenutzerCache>, store: Arc<dyn Store>, schreiber: StoreSchreiber) -> Self {
        Self {
            cache,
            store,
            schreiber,
        }
    }

    /// Gibt je Benutzer die neu freigeschalteten Erfolge zurueck
    ///
    /// Benutzer ohne neue Erfolge fehlen in der Liste.
    pub async fn vergeben(&self, ergebnis: &RennErgebnis) -> Vec<(UserId, Vec<Achievement>)> {
        let mut vergeben = Vec::new();
        for eintrag in &ergebnis.teilnehmer {
            let benutzer = match self.cache.laden_oder_holen(self.store.as_ref(), eintrag.user_id).await {
                Ok(Some(b)) => b,
                Ok(None) => continue,
                Err(e) => {
                    tracing::error!(rennen_id = %ergebnis.rennen_id, user_id = %eintrag.user_id, fehler = %e, "Erfolge nicht pruefbar");
                    continue;
                }
            };

            let neu = neue_erfolge(ergebnis, eintrag, &benutzer);
            if neu.is_empty() {
                continue;
            }
            let aktualisiert = self.cache.aendern(eintrag.user_id, |b| {
                b.erfolge.extend(neu.iter().copied());
            });
            if let Some(b) = aktualisiert {
                self.schreiber.einreihen(SchreibAuftrag::BenutzerSpeichern(b));
            }
            tracing::info!(
                rennen_id = %ergebnis.rennen_id,
                user_id = %eintrag.user_id,
                erfolge = ?neu,
                "Erfolge freigeschaltet"
            );
            vergeben.push((eintrag.user_id, neu));
        }
        vergeben
    }
}
