//! Gemeinsamer Aufbau fuer die Integration-Tests

#![allow(dead_code)]

use startblock_auth::{ModerationGate, SessionStore};
use startblock_core::event::LogNotifier;
use startblock_core::types::{Rolle, UserId};
use startblock_db::{BenutzerCache, Benutzer, MemoryStore, SchreiberKonfig, Store, StoreSchreiber};
use startblock_observability::StartblockMetriken;
use startblock_protocol::ServerMessage;
use startblock_signaling::registry::SEND_QUEUE_GROESSE;
use startblock_signaling::{
    BefehlsKontext, CommandDispatcher, RennKonfig, SignalingConfig, SignalingDienste,
    SignalingState, VerbindungsHandle, Verarbeitung,
};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

pub struct Aufbau {
    pub state: Arc<SignalingState>,
    pub dispatcher: CommandDispatcher,
    pub store: Arc<MemoryStore>,
    pub sessions: Arc<SessionStore>,
}

/// Ein verbundener Test-Client
pub struct Client {
    pub ctx: BefehlsKontext,
    pub handle: VerbindungsHandle,
    pub rx: mpsc::Receiver<ServerMessage>,
}

impl Client {
    /// Alle bisher zugestellten Nachrichten
    pub fn nachrichten(&mut self) -> Vec<ServerMessage> {
        let mut liste = Vec::new();
        while let Ok(n) = self.rx.try_recv() {
            liste.push(n);
        }
        liste
    }
}

pub fn kurze_rennen() -> RennKonfig {
    RennKonfig {
        min_teilnehmer: 2,
        countdown_stufen: vec![3, 2, 1],
        watchdog: Duration::from_secs(600),
        gnadenfrist: Duration::from_secs(30),
    }
}

pub fn aufbau(config: SignalingConfig) -> Aufbau {
    let store = Arc::new(MemoryStore::neu());
    let (schreiber, _task) = StoreSchreiber::starten(store.clone(), SchreiberKonfig::default());
    let sessions = SessionStore::neu();
    let state = SignalingState::neu(
        config,
        SignalingDienste {
            store: store.clone(),
            schreiber,
            sessions: sessions.clone(),
            gate: ModerationGate::neu(),
            cache: BenutzerCache::neu(),
            notifier: Arc::new(LogNotifier),
            metriken: StartblockMetriken::neu().unwrap(),
        },
    );
    Aufbau {
        dispatcher: CommandDispatcher::neu(Arc::clone(&state)),
        state,
        store,
        sessions,
    }
}

pub fn standard_aufbau() -> Aufbau {
    aufbau(SignalingConfig {
        rennen: kurze_rennen(),
        ..SignalingConfig::default()
    })
}

pub fn adresse(letztes_oktett: u8) -> IpAddr {
    IpAddr::from([10, 0, 0, letztes_oktett])
}

impl Aufbau {
    /// Legt einen Benutzer im Store an und gibt sein Session-Token zurueck
    pub async fn benutzer_anlegen(&self, name: &str, rolle: Rolle) -> (Benutzer, String) {
        let benutzer = Benutzer::neu(UserId::new(), name).mit_rolle(rolle);
        self.store.benutzer_speichern(&benutzer).await.unwrap();
        let session = self.sessions.erstellen(benutzer.id).await;
        (benutzer, session.token)
    }

    /// Handshake und Annahme wie beim WebSocket-Upgrade
    pub async fn verbinden(&self, token: &str, ip: IpAddr) -> Client {
        let benutzer = self
            .state
            .handshake_pruefen(ip, &startblock_auth::Handshake::mit_token(token))
            .await
            .unwrap();
        let (handle, rx) = VerbindungsHandle::neu(SEND_QUEUE_GROESSE * 4);
        let verbindung = self
            .state
            .verbindung_annehmen(&benutzer, ip, handle.clone())
            .unwrap();
        Client {
            ctx: BefehlsKontext {
                verbindung,
                adresse: ip,
                user_id: benutzer.id,
            },
            handle,
            rx,
        }
    }

    pub async fn befehl(&self, client: &Client, json: &str) -> Verarbeitung {
        self.dispatcher.verarbeiten(json, &client.ctx).await
    }

    /// Sendet einen Befehl und erwartet eine Nicht-Fehler-Antwort
    pub async fn befehl_ok(&self, client: &Client, json: &str) -> ServerMessage {
        let ergebnis = self.befehl(client, json).await;
        if let ServerMessage::Error { .. } = &ergebnis.antwort {
            panic!("Befehl {json} fehlgeschlagen: {:?}", ergebnis.antwort);
        }
        ergebnis.antwort
    }
}
