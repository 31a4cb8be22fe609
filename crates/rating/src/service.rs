//! RatingService – wendet die Wertung auf Cache und Store an

use skillratings::weng_lin::WengLinConfig;
use startblock_core::types::{Rating, UserId};
use startblock_db::{BenutzerCache, SchreibAuftrag, Store, StoreSchreiber};
use std::sync::Arc;

use crate::berechnung::berechnen;
use crate::ergebnis::RennErgebnis;

/// Aktualisiert Ratings nach einem beendeten Rennen
///
/// Der Cache wird sofort aktualisiert, damit nachfolgende Befehle
/// (z.B. `profileGet`) den neuen Wert sehen. Teilnehmer ohne Cache-Eintrag
/// (z.B. nach einer Wiederherstellung) werden vorher aus dem Store geladen.
/// Die Persistenz laeuft ueber den `StoreSchreiber`.
#[derive(Clone)]
pub struct RatingService {
    cache: Arc<BenutzerCache>,
    store: Arc<dyn Store>,
    schreiber: StoreSchreiber,
    konfig: WengLinConfig,
}

impl RatingService {
    pub fn neu(cache: Arc<BenutzerCache>, store: Arc<dyn Store>, schreiber: StoreSchreiber) -> Self {
        Self {
            cache,
            store,
            schreiber,
            konfig: WengLinConfig::new(),
        }
    }

    /// Wertet ein Rennen und gibt die neuen Ratings zurueck
    ///
    /// Nicht bewertbare Rennen liefern eine leere Liste. Ein Teilnehmer
    /// dessen Rating nicht geladen werden kann, wird nicht gewertet. Der
    /// Aufrufer stellt sicher, dass jedes Rennen hoechstens einmal gewertet
    /// wird.
    pub async fn anwenden(&self, ergebnis: &RennErgebnis) -> Vec<(UserId, Rating)> {
        if !ergebnis.ist_bewertbar() {
            tracing::debug!(rennen_id = %ergebnis.rennen_id, "Rennen wird nicht gewertet");
            return Vec::new();
        }

        let mut eingabe: Vec<(UserId, Rating, usize)> = Vec::new();
        for (id, rang) in ergebnis.raenge() {
            match self.cache.laden_oder_holen(self.store.as_ref(), id).await {
                Ok(Some(benutzer)) => eingabe.push((id, benutzer.rating, rang)),
                Ok(None) => {
                    tracing::warn!(rennen_id = %ergebnis.rennen_id, user_id = %id, "Benutzer unbekannt, wird nicht gewertet");
                }
                Err(e) => {
                    tracing::error!(rennen_id = %ergebnis.rennen_id, user_id = %id, fehler = %e, "Rating nicht ladbar, Benutzer wird nicht gewertet");
                }
            }
        }

        let neu = berechnen(&eingabe, &self.konfig);
        for (id, rating) in &neu {
            if !self.cache.rating_setzen(*id, *rating) {
                tracing::warn!(user_id = %id, "Benutzer nicht im Cache, Rating nur im Store");
            }
            self.schreiber
                .einreihen(SchreibAuftrag::RatingSpeichern(*id, *rating));
        }

        tracing::info!(
            rennen_id = %ergebnis.rennen_id,
            teilnehmer = neu.len(),
            "Ratings aktualisiert"
        );
        neu
    }
}
