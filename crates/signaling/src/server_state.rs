//! Gemeinsamer Server-Zustand fuer den Signaling-Service
//!
//! Haelt alle geteilten Services als Arc-Referenzen und kapselt den
//! Lebenszyklus einer Verbindung: Handshake pruefen, annehmen, trennen.

use startblock_auth::{AuthError, AuthResult, Handshake, ModerationGate, SessionValidator};
use startblock_core::event::Notifier;
use startblock_core::types::{ConnectionId, UserId};
use startblock_db::{Benutzer, BenutzerCache, Store, StoreSchreiber};
use startblock_observability::StartblockMetriken;
use startblock_protocol::ServerMessage;
use startblock_rating::{ErfolgsService, RatingService};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::broadcast::{RoomBroadcaster, LOBBY};
use crate::error::BefehlsResult;
use crate::race::{RaceEngine, RennDienste, RennKonfig};
use crate::rate_limit::{RateLimitKonfig, RateLimiter};
use crate::registry::{ConnectionRegistry, VerbindungsHandle, SEND_QUEUE_GROESSE};

/// Konfiguration fuer den Signaling-Service
#[derive(Debug, Clone)]
pub struct SignalingConfig {
    /// Anzeigename des Servers
    pub server_name: String,
    /// Verbindungen ohne Befehl werden nach dieser Zeit getrennt
    pub verbindungs_timeout: Duration,
    /// Kapazitaet der Send-Queue pro Verbindung
    pub send_queue_groesse: usize,
    pub ratelimit: RateLimitKonfig,
    pub rennen: RennKonfig,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            server_name: "Startblock".to_string(),
            verbindungs_timeout: Duration::from_secs(15 * 60),
            send_queue_groesse: SEND_QUEUE_GROESSE,
            ratelimit: RateLimitKonfig::default(),
            rennen: RennKonfig::default(),
        }
    }
}

/// Geteilte Abhaengigkeiten von aussen (Store, Sessions, Notifier, ...)
pub struct SignalingDienste {
    pub store: Arc<dyn Store>,
    pub schreiber: StoreSchreiber,
    pub sessions: Arc<dyn SessionValidator>,
    pub gate: Arc<ModerationGate>,
    pub cache: Arc<BenutzerCache>,
    pub notifier: Arc<dyn Notifier>,
    pub metriken: StartblockMetriken,
}

/// Gemeinsamer Server-Zustand (thread-safe, Arc-geteilt)
pub struct SignalingState {
    pub config: Arc<SignalingConfig>,
    pub registry: Arc<ConnectionRegistry>,
    pub broadcaster: Arc<RoomBroadcaster>,
    pub rate_limiter: RateLimiter,
    pub gate: Arc<ModerationGate>,
    pub cache: Arc<BenutzerCache>,
    pub store: Arc<dyn Store>,
    pub schreiber: StoreSchreiber,
    pub sessions: Arc<dyn SessionValidator>,
    pub engine: RaceEngine,
    pub metriken: StartblockMetriken,
    /// Startzeitpunkt des Servers (fuer Uptime-Berechnung)
    pub start_time: Instant,
}

impl SignalingState {
    /// Erstellt einen neuen SignalingState
    pub fn neu(config: SignalingConfig, dienste: SignalingDienste) -> Arc<Self> {
        let registry = Arc::new(ConnectionRegistry::neu());
        let broadcaster = Arc::new(RoomBroadcaster::neu(
            Arc::clone(&registry),
            Arc::clone(&dienste.cache),
            Arc::clone(&dienste.gate),
        ));
        let rating = RatingService::neu(
            Arc::clone(&dienste.cache),
            Arc::clone(&dienste.store),
            dienste.schreiber.clone(),
        );
        let erfolge = ErfolgsService::neu(
            Arc::clone(&dienste.cache),
            Arc::clone(&dienste.store),
            dienste.schreiber.clone(),
        );
        let engine = RaceEngine::neu(
            config.rennen.clone(),
            RennDienste {
                registry: Arc::clone(&registry),
                broadcaster: Arc::clone(&broadcaster),
                rating,
                erfolge,
                notifier: dienste.notifier,
                schreiber: dienste.schreiber.clone(),
                metriken: dienste.metriken.clone(),
            },
        );

        Arc::new(Self {
            rate_limiter: RateLimiter::neu(config.ratelimit.clone()),
            config: Arc::new(config),
            registry,
            broadcaster,
            gate: dienste.gate,
            cache: dienste.cache,
            store: dienste.store,
            schreiber: dienste.schreiber,
            sessions: dienste.sessions,
            engine,
            metriken: dienste.metriken,
            start_time: Instant::now(),
        })
    }

    /// Server-Uptime in Sekunden
    pub fn uptime_sekunden(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    // -----------------------------------------------------------------------
    // Verbindungsaufbau
    // -----------------------------------------------------------------------

    /// Prueft einen Verbindungsversuch vor dem WebSocket-Upgrade
    ///
    /// Reihenfolge: IP-Ban, Session, Benutzer laden, Benutzer-Ban. Ein
    /// abgelehnter Versuch hinterlaesst keinen Zustand in der Registry.
    pub async fn handshake_pruefen(
        &self,
        adresse: IpAddr,
        handshake: &Handshake,
    ) -> AuthResult<Benutzer> {
        self.gate.darf_verbinden(adresse, None)?;
        let user_id = self.sessions.validieren(handshake).await?;

        let benutzer = self
            .cache
            .laden_oder_holen(self.store.as_ref(), user_id)
            .await?
            .ok_or_else(|| {
                tracing::warn!(user_id = %user_id, "Session verweist auf unbekannten Benutzer");
                AuthError::SessionUngueltig
            })?;
        self.gate.benutzer_uebernehmen(&benutzer);
        self.gate.darf_verbinden(adresse, Some(user_id))?;
        Ok(benutzer)
    }

    /// Nimmt eine gepruefte Verbindung an
    ///
    /// Registriert und bindet sie, raeumt eine verdraengte fruehere
    /// Verbindung desselben Benutzers auf, tritt der Lobby (und ggf. dem
    /// laufenden Rennen) bei und sendet die Willkommensnachricht.
    pub fn verbindung_annehmen(
        &self,
        benutzer: &Benutzer,
        adresse: IpAddr,
        handle: VerbindungsHandle,
    ) -> BefehlsResult<ConnectionId> {
        let user_id = benutzer.id;
        let verbindung = self.registry.registrieren(handle.clone(), adresse);

        match self.registry.binden(verbindung, user_id) {
            Ok(Some(alt)) => {
                alt.handle.senden(ServerMessage::Disconnecting {
                    reason: "Neue Verbindung desselben Benutzers".to_string(),
                });
                self.broadcaster
                    .alle_verlassen(alt.id, Some(user_id), alt.raeume);
            }
            Ok(None) => {}
            Err(e) => {
                self.registry.abmelden(verbindung);
                return Err(e.into());
            }
        }

        if let Err(e) = self.raeume_betreten(verbindung, user_id) {
            self.verbindung_trennen(verbindung);
            return Err(e);
        }

        handle.senden(ServerMessage::Welcome {
            profile: benutzer.profil(),
            races: self.engine.aktive_rennen(),
        });
        self.metriken
            .verbindungen_aktiv
            .set(self.registry.anzahl() as i64);
        tracing::info!(verbindung = %verbindung, user_id = %user_id, adresse = %adresse, "Verbindung angenommen");
        Ok(verbindung)
    }

    /// Lobby und ggf. der Raum des laufenden Rennens
    fn raeume_betreten(&self, verbindung: ConnectionId, user_id: UserId) -> BefehlsResult<()> {
        self.broadcaster.beitreten(verbindung, LOBBY)?;
        if let Some(rennen) = self.engine.wieder_verbunden(user_id) {
            self.broadcaster.beitreten(verbindung, &rennen.raum_name())?;
        }
        Ok(())
    }

    /// Raeumt eine beendete Verbindung auf
    ///
    /// Wurde der Benutzer inzwischen neu gebunden (Verdraengung), bleibt
    /// sein Rennzustand unberuehrt.
    pub fn verbindung_trennen(&self, verbindung: ConnectionId) {
        let Some(v) = self.registry.abmelden(verbindung) else {
            return;
        };
        self.broadcaster
            .alle_verlassen(verbindung, v.user_id, v.raeume);

        if let Some(user_id) = v.user_id {
            if self.registry.verbindung_von(user_id).is_none() {
                self.engine.verbindung_verloren(user_id);
            }
        }
        self.metriken
            .verbindungen_aktiv
            .set(self.registry.anzahl() as i64);
        tracing::info!(verbindung = %verbindung, "Verbindung getrennt");
    }

    /// Trennt einen Benutzer (Ban, Logout) mit Begruendung
    pub fn benutzer_trennen(&self, user_id: UserId, grund: &str) -> bool {
        match self.registry.handle_von_benutzer(user_id) {
            Some(handle) => {
                handle.senden(ServerMessage::Disconnecting {
                    reason: grund.to_string(),
                });
                handle.schliessen();
                true
            }
            None => false,
        }
    }

    /// Schliesst Verbindungen ohne Aktivitaet
    pub fn inaktive_trennen(&self) -> usize {
        let inaktive = self.registry.inaktive(self.config.verbindungs_timeout);
        for verbindung in &inaktive {
            if let Some(handle) = self.registry.handle(*verbindung) {
                handle.senden(ServerMessage::Disconnecting {
                    reason: "Zeitueberschreitung".to_string(),
                });
                handle.schliessen();
            }
        }
        if !inaktive.is_empty() {
            tracing::info!(anzahl = inaktive.len(), "Inaktive Verbindungen geschlossen");
        }
        inaktive.len()
    }
}
