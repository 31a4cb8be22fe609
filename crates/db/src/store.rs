//! Store-Trait
//!
//! Das Repository-Pattern entkoppelt die Renn- und Benutzerlogik von der
//! konkreten Speicher-Engine. Implementierungen muessen `Send + Sync` sein,
//! da der Store aus beliebigen tokio-Tasks angesprochen wird.

use async_trait::async_trait;
use startblock_core::types::{Rating, UserId};
use std::net::IpAddr;

use crate::error::DbResult;
use crate::models::{BanListe, Benutzer, RennDatensatz};

/// Persistenz-Schnittstelle des Servers
#[async_trait]
pub trait Store: Send + Sync + 'static {
    /// Laedt einen Benutzer anhand seiner ID
    async fn benutzer_laden(&self, id: UserId) -> DbResult<Option<Benutzer>>;

    /// Speichert einen Benutzer (Insert oder Update)
    async fn benutzer_speichern(&self, benutzer: &Benutzer) -> DbResult<()>;

    /// Legt ein neues Rennen an
    async fn rennen_erstellen(&self, rennen: &RennDatensatz) -> DbResult<()>;

    /// Aktualisiert ein bestehendes Rennen
    async fn rennen_aktualisieren(&self, rennen: &RennDatensatz) -> DbResult<()>;

    /// Alle Rennen die nicht Finished oder Cancelled sind
    ///
    /// Wird beim Start genutzt um Rennen eines frueheren Laufs
    /// wiederherzustellen oder zu verwerfen.
    async fn aktive_rennen_laden(&self) -> DbResult<Vec<RennDatensatz>>;

    /// Speichert das Rating eines Benutzers
    async fn rating_speichern(&self, id: UserId, rating: Rating) -> DbResult<()>;

    /// Laedt alle Benutzer- und IP-Bans
    async fn bans_laden(&self) -> DbResult<BanListe>;

    async fn ip_ban_speichern(&self, ip: IpAddr) -> DbResult<()>;

    async fn ip_ban_entfernen(&self, ip: IpAddr) -> DbResult<()>;
}
