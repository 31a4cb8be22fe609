//! startblock-server – Bibliotheks-Root
//!
//! Deklariert alle Server-Module und stellt den oeffentlichen Einstiegspunkt
//! fuer Integrationstests bereit.

pub mod config;

use anyhow::Result;
use config::ServerConfig;
use startblock_auth::{ModerationGate, SessionStore};
use startblock_core::event::LogNotifier;
use startblock_core::types::UserId;
use startblock_db::{Benutzer, BenutzerCache, MemoryStore, SchreiberKonfig, Store, StoreSchreiber};
use startblock_observability::{observability_server_starten, HealthState, StartblockMetriken};
use startblock_signaling::{
    ws_server_starten, CommandDispatcher, SignalingDienste, SignalingState,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Intervall fuer Wartungsaufgaben (Rate-Limit-Buckets, inaktive Verbindungen)
const WARTUNG_INTERVALL: Duration = Duration::from_secs(30);

/// Statische Sessions laufen praktisch nicht ab
const STATISCHE_SESSION_TTL_TAGE: i64 = 3650;

/// Haelt den laufenden Server-Zustand zusammen
pub struct Server {
    pub config: ServerConfig,
}

impl Server {
    /// Erstellt einen neuen Server aus der gegebenen Konfiguration
    pub fn neu(config: ServerConfig) -> Self {
        Self { config }
    }

    /// Startet alle Server-Subsysteme und laeuft bis zum Shutdown-Signal
    ///
    /// Reihenfolge:
    /// 1. Store oeffnen, statische Konten anlegen, Bans laden
    /// 2. Unterbrochene Rennen wiederherstellen
    /// 3. Wartungs-Tasks starten
    /// 4. WebSocket- und Observability-Server starten
    /// 5. Auf Ctrl-C warten, dann geordnet herunterfahren
    pub async fn starten(self) -> Result<()> {
        let ws_addr: SocketAddr = self.config.ws_bind_adresse().parse()?;
        tracing::info!(
            server_name = %self.config.server.name,
            ws = %ws_addr,
            "Server startet"
        );

        let metriken = StartblockMetriken::neu()?;
        let store: Arc<dyn Store> = Arc::new(MemoryStore::neu());
        let sessions = SessionStore::neu();
        konten_anlegen(&self.config, store.as_ref(), &sessions).await?;

        let gate = ModerationGate::neu();
        let bans = store.bans_laden().await?;
        gate.bans_uebernehmen(&bans);
        tracing::info!(
            benutzer = bans.benutzer.len(),
            ips = bans.ips.len(),
            "Bans geladen"
        );

        let (schreiber, schreiber_task) =
            StoreSchreiber::starten(Arc::clone(&store), SchreiberKonfig::default());

        let state = SignalingState::neu(
            self.config.signaling_config(),
            SignalingDienste {
                store: Arc::clone(&store),
                schreiber: schreiber.clone(),
                sessions: sessions.clone(),
                gate,
                cache: BenutzerCache::neu(),
                notifier: Arc::new(LogNotifier),
                metriken: metriken.clone(),
            },
        );

        // Vor dem ersten Client: Rennen des vorherigen Laufs uebernehmen
        let offene = store.aktive_rennen_laden().await?;
        let (fortgesetzt, verworfen) = state.engine.wiederherstellen(offene);
        tracing::info!(fortgesetzt, verworfen, "Rennen wiederhergestellt");

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let health = HealthState::neu();

        let session_cleanup = SessionStore::cleanup_starten(&sessions);
        let wartung = wartung_starten(Arc::clone(&state), health.clone(), shutdown_rx.clone());

        let observability = if self.config.observability.aktiviert {
            let addr: SocketAddr = self.config.observability_bind_adresse().parse()?;
            let mut signal = shutdown_rx.clone();
            Some(tokio::spawn(observability_server_starten(
                addr,
                metriken,
                health,
                async move {
                    while signal.changed().await.is_ok() {
                        if *signal.borrow() {
                            break;
                        }
                    }
                },
            )))
        } else {
            None
        };

        let dispatcher = Arc::new(CommandDispatcher::neu(Arc::clone(&state)));
        let mut ws = tokio::spawn(ws_server_starten(ws_addr, dispatcher, shutdown_rx));

        tracing::info!("Server laeuft. Warte auf Shutdown-Signal (Ctrl-C)...");
        let ws_ergebnis = tokio::select! {
            ergebnis = tokio::signal::ctrl_c() => {
                ergebnis?;
                tracing::info!("Shutdown-Signal empfangen, Server wird beendet");
                let _ = shutdown_tx.send(true);
                (&mut ws).await
            }
            // Der WebSocket-Server endet vor dem Signal nur mit Fehler
            ergebnis = &mut ws => {
                let _ = shutdown_tx.send(true);
                ergebnis
            }
        };
        match ws_ergebnis {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!(fehler = %e, "WebSocket-Server fehlgeschlagen"),
            Err(e) => tracing::error!(fehler = %e, "WebSocket-Task abgebrochen"),
        }

        let _ = wartung.await;
        if let Some(task) = observability {
            match task.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::error!(fehler = %e, "Observability-Server fehlgeschlagen"),
                Err(e) => tracing::error!(fehler = %e, "Observability-Task abgebrochen"),
            }
        }
        session_cleanup.abort();

        // Ausstehende Schreibauftraege noch abarbeiten
        schreiber.synchronisieren().await;
        schreiber_task.abort();

        tracing::info!("Server beendet");
        Ok(())
    }
}

/// Legt die statischen Konten im Store an und registriert ihre Tokens
async fn konten_anlegen(
    config: &ServerConfig,
    store: &dyn Store,
    sessions: &SessionStore,
) -> Result<()> {
    for konto in &config.auth.konten {
        let id = konto.user_id.map(UserId).unwrap_or_default();
        let benutzer = match store.benutzer_laden(id).await? {
            Some(b) => b,
            None => {
                let b = Benutzer::neu(id, konto.name.clone()).mit_rolle(konto.rolle);
                store.benutzer_speichern(&b).await?;
                b
            }
        };
        sessions
            .mit_token(
                konto.token.clone(),
                benutzer.id,
                chrono::Duration::days(STATISCHE_SESSION_TTL_TAGE),
            )
            .await;
        tracing::info!(user_id = %benutzer.id, name = %benutzer.name, rolle = %benutzer.rolle, "Statisches Konto angelegt");
    }
    Ok(())
}

/// Periodische Wartung bis zum Shutdown
fn wartung_starten(
    state: Arc<SignalingState>,
    health: HealthState,
    mut shutdown_rx: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut intervall = tokio::time::interval(WARTUNG_INTERVALL);
        intervall.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = intervall.tick() => {
                    let entfernt = state.rate_limiter.bereinigen();
                    if entfernt > 0 {
                        tracing::debug!(anzahl = entfernt, "Rate-Limit-Buckets bereinigt");
                    }
                    state.inaktive_trennen();
                    health.store_status_setzen(state.store.bans_laden().await.is_ok());
                }
                Ok(()) = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::debug!("Wartungs-Task beendet");
    })
}
