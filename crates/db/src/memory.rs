//! In-Memory-Store
//!
//! Vollstaendige `Store`-Implementierung ohne externe Engine. Dient als
//! Standard-Backend fuer Einzelinstanzen und als Test-Double; ueber
//! `fehler_injizieren` lassen sich Ausfaelle simulieren.

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use startblock_core::types::{RaceId, Rating, UserId};
use std::net::IpAddr;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::error::{DbError, DbResult};
use crate::models::{BanListe, Benutzer, RennDatensatz};
use crate::store::Store;

/// Store der alle Daten im Prozessspeicher haelt
#[derive(Debug, Default)]
pub struct MemoryStore {
    benutzer: DashMap<UserId, Benutzer>,
    rennen: DashMap<RaceId, RennDatensatz>,
    ip_bans: DashSet<IpAddr>,
    /// Anzahl der naechsten Schreibzugriffe die fehlschlagen sollen
    fehlschlaege: AtomicU32,
}

impl MemoryStore {
    /// Erstellt einen leeren Store
    pub fn neu() -> Self {
        Self::default()
    }

    /// Laesst die naechsten `anzahl` Schreibzugriffe fehlschlagen
    pub fn fehler_injizieren(&self, anzahl: u32) {
        self.fehlschlaege.store(anzahl, Ordering::SeqCst);
    }

    /// Gibt einen gespeicherten Renn-Datensatz zurueck (fuer Tests und Abfragen)
    pub fn rennen(&self, id: RaceId) -> Option<RennDatensatz> {
        self.rennen.get(&id).map(|r| r.clone())
    }

    /// Anzahl gespeicherter Rennen
    pub fn rennen_anzahl(&self) -> usize {
        self.rennen.len()
    }

    fn schreiben_pruefen(&self) -> DbResult<()> {
        let vorher = self
            .fehlschlaege
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match vorher {
            Ok(_) => Err(DbError::NichtVerfuegbar("injizierter Fehler".into())),
            Err(_) => Ok(()),
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn benutzer_laden(&self, id: UserId) -> DbResult<Option<Benutzer>> {
        Ok(self.benutzer.get(&id).map(|b| b.clone()))
    }

    async fn benutzer_speichern(&self, benutzer: &Benutzer) -> DbResult<()> {
        self.schreiben_pruefen()?;
        self.benutzer.insert(benutzer.id, benutzer.clone());
        Ok(())
    }

    async fn rennen_erstellen(&self, rennen: &RennDatensatz) -> DbResult<()> {
        self.schreiben_pruefen()?;
        if self.rennen.contains_key(&rennen.id) {
            return Err(DbError::UngueltigeDaten(format!(
                "Rennen {} existiert bereits",
                rennen.id
            )));
        }
        self.rennen.insert(rennen.id, rennen.clone());
        Ok(())
    }

    async fn rennen_aktualisieren(&self, rennen: &RennDatensatz) -> DbResult<()> {
        self.schreiben_pruefen()?;
        match self.rennen.get_mut(&rennen.id) {
            Some(mut eintrag) => {
                *eintrag = rennen.clone();
                Ok(())
            }
            None => Err(DbError::nicht_gefunden(rennen.id.to_string())),
        }
    }

    async fn aktive_rennen_laden(&self) -> DbResult<Vec<RennDatensatz>> {
        Ok(self
            .rennen
            .iter()
            .filter(|r| r.status.ist_aktiv())
            .map(|r| r.clone())
            .collect())
    }

    async fn rating_speichern(&self, id: UserId, rating: Rating) -> DbResult<()> {
        self.schreiben_pruefen()?;
        match self.benutzer.get_mut(&id) {
            Some(mut benutzer) => {
                benutzer.rating = rating;
                Ok(())
            }
            None => Err(DbError::nicht_gefunden(id.to_string())),
        }
    }

    async fn bans_laden(&self) -> DbResult<BanListe> {
        Ok(BanListe {
            benutzer: self
                .benutzer
                .iter()
                .filter(|b| b.gebannt)
                .map(|b| b.id)
                .collect(),
            ips: self.ip_bans.iter().map(|ip| *ip).collect(),
        })
    }

    async fn ip_ban_speichern(&self, ip: IpAddr) -> DbResult<()> {
        self.schreiben_pruefen()?;
        self.ip_bans.insert(ip);
        Ok(())
    }

    async fn ip_ban_entfernen(&self, ip: IpAddr) -> DbResult<()> {
        self.schreiben_pruefen()?;
        self.ip_bans.remove(&ip);
        Ok(())
    }
}
