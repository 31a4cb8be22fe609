//! Benutzer-Cache
//!
//! Haelt geladene Benutzer im Speicher. Aenderungen (Profil, Rating,
//! Rolle) werden zuerst hier wirksam und danach asynchron persistiert;
//! nachfolgende Befehle sehen den neuen Wert sofort.

use dashmap::DashMap;
use startblock_core::types::{Rating, UserId};
use std::sync::Arc;

use crate::error::DbResult;
use crate::models::Benutzer;
use crate::store::Store;

/// Thread-sicherer Benutzer-Cache
#[derive(Debug, Default)]
pub struct BenutzerCache {
    benutzer: DashMap<UserId, Benutzer>,
}

impl BenutzerCache {
    pub fn neu() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Gibt eine Kopie des Benutzers zurueck
    pub fn holen(&self, id: UserId) -> Option<Benutzer> {
        self.benutzer.get(&id).map(|b| b.clone())
    }

    /// Fuegt einen Benutzer ein oder ersetzt ihn
    pub fn einfuegen(&self, benutzer: Benutzer) {
        self.benutzer.insert(benutzer.id, benutzer);
    }

    /// Aendert einen Benutzer und gibt den neuen Stand zurueck
    pub fn aendern<F>(&self, id: UserId, aenderung: F) -> Option<Benutzer>
    where
        F: FnOnce(&mut Benutzer),
    {
        let mut eintrag = self.benutzer.get_mut(&id)?;
        aenderung(eintrag.value_mut());
        Some(eintrag.clone())
    }

    /// Anzeigename oder eine Kurzform der ID
    pub fn name_von(&self, id: UserId) -> String {
        self.benutzer
            .get(&id)
            .map(|b| b.name.clone())
            .unwrap_or_else(|| id.to_string())
    }

    pub fn rating_von(&self, id: UserId) -> Option<Rating> {
        self.benutzer.get(&id).map(|b| b.rating)
    }

    /// Setzt das Rating, falls der Benutzer im Cache ist
    pub fn rating_setzen(&self, id: UserId, rating: Rating) -> bool {
        match self.benutzer.get_mut(&id) {
            Some(mut b) => {
                b.rating = rating;
                true
            }
            None => false,
        }
    }

    /// Liefert den Benutzer aus dem Cache oder laedt ihn aus dem Store
    pub async fn laden_oder_holen(
        &self,
        store: &dyn Store,
        id: UserId,
    ) -> DbResult<Option<Benutzer>> {
        if let Some(b) = self.holen(id) {
            return Ok(Some(b));
        }
        let geladen = store.benutzer_laden(id).await?;
        if let Some(ref b) = geladen {
            // Ein paralleler Ladevorgang darf einen neueren Stand nicht ueberschreiben
            self.benutzer.entry(id).or_insert_with(|| b.clone());
        }
        Ok(geladen.and_then(|_| self.holen(id)))
    }

    pub fn anzahl(&self) -> usize {
        self.benutzer.len()
    }
}
