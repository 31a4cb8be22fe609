//! ModerationGate – Bans, Stummschaltung und Rollen
//!
//! Haelt den gesamten Moderationszustand im Speicher und beantwortet die
//! Fragen "darf verbinden", "darf sprechen" und "darf moderieren".
//!
//! ## Rangregel
//! Ein Akteur darf nur auf Ziele einwirken, deren Rolle er echt
//! uebertrifft (`Normal < Moderator < Admin`), und nie auf sich selbst.
//! Jede Mutation wird vor dem Schreiben geprueft; scheitert die Pruefung,
//! bleibt der Zustand unveraendert.
//!
//! Pruefung und Schreiben laufen unter einer gemeinsamen Sperre, damit
//! zwei gleichzeitige Admin-Aktionen nicht auf einem veralteten Rang
//! entscheiden.

use dashmap::{DashMap, DashSet};
use parking_lot::Mutex;
use startblock_core::types::{Rolle, UserId};
use startblock_db::models::{BanListe, Benutzer};
use std::net::IpAddr;
use std::sync::Arc;

use crate::error::{AuthError, AuthResult};

/// Moderationszustand und Berechtigungspruefung
#[derive(Debug, Default)]
pub struct ModerationGate {
    gebannt: DashSet<UserId>,
    ip_gebannt: DashSet<IpAddr>,
    stumm: DashSet<UserId>,
    rollen: DashMap<UserId, Rolle>,
    schreibsperre: Mutex<()>,
}

impl ModerationGate {
    /// Erstellt ein leeres Gate
    pub fn neu() -> Arc<Self> {
        Arc::new(Self::default())
    }

    // -----------------------------------------------------------------------
    // Zustand laden
    // -----------------------------------------------------------------------

    /// Uebernimmt die beim Start geladenen Ban-Listen
    pub fn bans_uebernehmen(&self, liste: &BanListe) {
        for id in &liste.benutzer {
            self.gebannt.insert(*id);
        }
        for ip in &liste.ips {
            self.ip_gebannt.insert(*ip);
        }
        tracing::info!(
            benutzer = liste.benutzer.len(),
            ips = liste.ips.len(),
            "Ban-Listen geladen"
        );
    }

    /// Uebernimmt Rolle, Ban- und Stumm-Flag eines geladenen Benutzers
    pub fn benutzer_uebernehmen(&self, benutzer: &Benutzer) {
        let _sperre = self.schreibsperre.lock();
        self.rollen.insert(benutzer.id, benutzer.rolle);
        if benutzer.gebannt {
            self.gebannt.insert(benutzer.id);
        }
        if benutzer.stummgeschaltet {
            self.stumm.insert(benutzer.id);
        }
    }

    /// Rolle eines Benutzers (unbekannt = Normal)
    pub fn rolle(&self, id: UserId) -> Rolle {
        self.rollen.get(&id).map(|r| *r).unwrap_or_default()
    }

    pub fn ist_gebannt(&self, id: UserId) -> bool {
        self.gebannt.contains(&id)
    }

    pub fn ist_ip_gebannt(&self, ip: IpAddr) -> bool {
        self.ip_gebannt.contains(&ip)
    }

    pub fn ist_stumm(&self, id: UserId) -> bool {
        self.stumm.contains(&id)
    }

    // -----------------------------------------------------------------------
    // Pruefungen
    // -----------------------------------------------------------------------

    /// Prueft ob eine Verbindung zugelassen wird
    ///
    /// Wird zweimal aufgerufen: vor der Session-Validierung nur mit der
    /// Adresse, danach zusaetzlich mit der Benutzer-ID.
    pub fn darf_verbinden(&self, adresse: IpAddr, benutzer: Option<UserId>) -> AuthResult<()> {
        if self.ist_ip_gebannt(adresse) {
            return Err(AuthError::IpGebannt(adresse.to_string()));
        }
        if let Some(id) = benutzer {
            if self.ist_gebannt(id) {
                return Err(AuthError::BenutzerGebannt(id.to_string()));
            }
        }
        Ok(())
    }

    /// `false` wenn der Benutzer stummgeschaltet ist
    pub fn darf_sprechen(&self, id: UserId) -> bool {
        !self.ist_stumm(id)
    }

    /// Rangregel fuer Moderationsaktionen
    pub fn darf_moderieren(
        akteur_rolle: Rolle,
        akteur: UserId,
        ziel_rolle: Rolle,
        ziel: UserId,
    ) -> bool {
        akteur != ziel && akteur_rolle.uebertrifft(ziel_rolle)
    }

    fn pruefen(&self, akteur: UserId, ziel: UserId, aktion: &str) -> AuthResult<()> {
        let akteur_rolle = self.rolle(akteur);
        let ziel_rolle = self.rolle(ziel);
        if Self::darf_moderieren(akteur_rolle, akteur, ziel_rolle, ziel) {
            Ok(())
        } else {
            tracing::warn!(
                akteur = %akteur,
                ziel = %ziel,
                akteur_rolle = %akteur_rolle,
                ziel_rolle = %ziel_rolle,
                aktion,
                "Moderationsaktion abgelehnt"
            );
            Err(AuthError::verweigert(format!(
                "{aktion}: {akteur_rolle} darf nicht auf {ziel_rolle} einwirken"
            )))
        }
    }

    fn mindestens_moderator(&self, akteur: UserId, aktion: &str) -> AuthResult<()> {
        if self.rolle(akteur) >= Rolle::Moderator {
            Ok(())
        } else {
            Err(AuthError::verweigert(format!(
                "{aktion}: erfordert mindestens die Rolle moderator"
            )))
        }
    }

    // -----------------------------------------------------------------------
    // Mutationen
    // -----------------------------------------------------------------------

    /// Bannt einen Benutzer. Gibt `true` zurueck wenn er neu gebannt wurde.
    pub fn bannen(&self, akteur: UserId, ziel: UserId) -> AuthResult<bool> {
        let _sperre = self.schreibsperre.lock();
        self.pruefen(akteur, ziel, "ban")?;
        let neu = self.gebannt.insert(ziel);
        tracing::info!(akteur = %akteur, ziel = %ziel, "Benutzer gebannt");
        Ok(neu)
    }

    pub fn entbannen(&self, akteur: UserId, ziel: UserId) -> AuthResult<bool> {
        let _sperre = self.schreibsperre.lock();
        self.pruefen(akteur, ziel, "unban")?;
        let entfernt = self.gebannt.remove(&ziel).is_some();
        tracing::info!(akteur = %akteur, ziel = %ziel, "Benutzer entbannt");
        Ok(entfernt)
    }

    pub fn ip_bannen(&self, akteur: UserId, ip: IpAddr) -> AuthResult<bool> {
        let _sperre = self.schreibsperre.lock();
        self.mindestens_moderator(akteur, "ban_ip")?;
        let neu = self.ip_gebannt.insert(ip);
        tracing::info!(akteur = %akteur, ip = %ip, "IP gebannt");
        Ok(neu)
    }

    pub fn ip_entbannen(&self, akteur: UserId, ip: IpAddr) -> AuthResult<bool> {
        let _sperre = self.schreibsperre.lock();
        self.mindestens_moderator(akteur, "unban_ip")?;
        let entfernt = self.ip_gebannt.remove(&ip).is_some();
        tracing::info!(akteur = %akteur, ip = %ip, "IP entbannt");
        Ok(entfernt)
    }

    pub fn stummschalten(&self, akteur: UserId, ziel: UserId) -> AuthResult<bool> {
        let _sperre = self.schreibsperre.lock();
        self.pruefen(akteur, ziel, "squelch")?;
        Ok(self.stumm.insert(ziel))
    }

    pub fn stummschaltung_aufheben(&self, akteur: UserId, ziel: UserId) -> AuthResult<bool> {
        let _sperre = self.schreibsperre.lock();
        self.pruefen(akteur, ziel, "unsquelch")?;
        Ok(self.stumm.remove(&ziel).is_some())
    }

    /// Befoerdert das Ziel um eine Stufe
    ///
    /// Die neue Rolle muss selbst noch unter der Rolle des Akteurs liegen,
    /// sonst koennte ein Moderator weitere Moderatoren ernennen.
    pub fn befoerdern(&self, akteur: UserId, ziel: UserId) -> AuthResult<Rolle> {
        let _sperre = self.schreibsperre.lock();
        self.pruefen(akteur, ziel, "promote")?;
        let neue_rolle = self.rolle(ziel).hoeher();
        if !self.rolle(akteur).uebertrifft(neue_rolle) {
            return Err(AuthError::verweigert(format!(
                "promote: {} kann nicht zu {neue_rolle} ernennen",
                self.rolle(akteur)
            )));
        }
        self.rollen.insert(ziel, neue_rolle);
        tracing::info!(akteur = %akteur, ziel = %ziel, rolle = %neue_rolle, "Benutzer befoerdert");
        Ok(neue_rolle)
    }

    /// Stuft das Ziel um eine Stufe herab
    pub fn degradieren(&self, akteur: UserId, ziel: UserId) -> AuthResult<Rolle> {
        let _sperre = self.schreibsperre.lock();
        self.pruefen(akteur, ziel, "demote")?;
        let neue_rolle = self.rolle(ziel).niedriger();
        self.rollen.insert(ziel, neue_rolle);
        tracing::info!(akteur = %akteur, ziel = %ziel, rolle = %neue_rolle, "Benutzer herabgestuft");
        Ok(neue_rolle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate_mit(rollen: &[(UserId, Rolle)]) -> Arc<ModerationGate> {
        let gate = ModerationGate::neu();
        for (id, rolle) in rollen {
            gate.benutzer_uebernehmen(&Benutzer::neu(*id, "x").mit_rolle(*rolle));
        }
        gate
    }

    #[test]
    fn moderator_kann_moderator_nicht_bannen() {
        let (m1, m2) = (UserId::new(), UserId::new());
        let gate = gate_mit(&[(m1, Rolle::Moderator), (m2, Rolle::Moderator)]);

        let ergebnis = gate.bannen(m1, m2);
        assert!(matches!(ergebnis, Err(AuthError::ZugriffVerweigert(_))));
        assert!(!gate.ist_gebannt(m2));
    }

    #[test]
    fn moderator_bannt_normalen_benutzer() {
        let (m, n) = (UserId::new(), UserId::new());
        let gate = gate_mit(&[(m, Rolle::Moderator), (n, Rolle::Normal)]);

        assert!(gate.bannen(m, n).unwrap());
        assert!(gate.ist_gebannt(n));
        assert!(gate.darf_verbinden("10.0.0.1".parse().unwrap(), Some(n)).is_err());

        assert!(gate.entbannen(m, n).unwrap());
        assert!(gate.darf_verbinden("10.0.0.1".parse().unwrap(), Some(n)).is_ok());
    }

    #[test]
    fn niemand_moderiert_sich_selbst() {
        let admin = UserId::new();
        assert!(!ModerationGate::darf_moderieren(
            Rolle::Admin,
            admin,
            Rolle::Admin,
            admin
        ));
        let gate = gate_mit(&[(admin, Rolle::Admin)]);
        assert!(gate.degradieren(admin, admin).is_err());
        assert_eq!(gate.rolle(admin), Rolle::Admin);
    }

    #[test]
    fn normaler_benutzer_darf_nicht_ip_bannen() {
        let n = UserId::new();
        let gate = gate_mit(&[(n, Rolle::Normal)]);
        let ip: IpAddr = "198.51.100.4".parse().unwrap();
        assert!(gate.ip_bannen(n, ip).is_err());
        assert!(!gate.ist_ip_gebannt(ip));
    }

    #[test]
    fn ip_ban_verhindert_verbindung_ohne_benutzer() {
        let m = UserId::new();
        let gate = gate_mit(&[(m, Rolle::Moderator)]);
        let ip: IpAddr = "198.51.100.4".parse().unwrap();
        assert!(gate.ip_bannen(m, ip).unwrap());
        assert!(matches!(
            gate.darf_verbinden(ip, None),
            Err(AuthError::IpGebannt(_))
        ));
        assert!(gate.ip_entbannen(m, ip).unwrap());
        assert!(gate.darf_verbinden(ip, None).is_ok());
    }

    #[test]
    fn stummschaltung() {
        let (m, n) = (UserId::new(), UserId::new());
        let gate = gate_mit(&[(m, Rolle::Moderator)]);
        assert!(gate.darf_sprechen(n));
        gate.stummschalten(m, n).unwrap();
        assert!(!gate.darf_sprechen(n));
        gate.stummschaltung_aufheben(m, n).unwrap();
        assert!(gate.darf_sprechen(n));
    }

    #[test]
    fn nur_admin_ernennt_moderatoren() {
        let (admin, m, n) = (UserId::new(), UserId::new(), UserId::new());
        let gate = gate_mit(&[(admin, Rolle::Admin), (m, Rolle::Moderator)]);

        // Moderator darf niemanden auf die eigene Stufe heben
        assert!(gate.befoerdern(m, n).is_err());
        assert_eq!(gate.rolle(n), Rolle::Normal);

        assert_eq!(gate.befoerdern(admin, n).unwrap(), Rolle::Moderator);
        // Admin kann nicht zum Admin ernennen
        assert!(gate.befoerdern(admin, n).is_err());
        assert_eq!(gate.degradieren(admin, n).unwrap(), Rolle::Normal);
    }

    #[test]
    fn bans_aus_liste_uebernehmen() {
        let gate = ModerationGate::neu();
        let id = UserId::new();
        let ip: IpAddr = "192.0.2.1".parse().unwrap();
        gate.bans_uebernehmen(&BanListe {
            benutzer: vec![id],
            ips: vec![ip],
        });
        assert!(gate.ist_gebannt(id));
        assert!(gate.ist_ip_gebannt(ip));
    }
}
