//! WebSocket-Transport – Handshake, Verbindungs-Task, Accept-Loop
//!
//! ## Verbindungsablauf
//! ```text
//! HTTP GET /ws?token=...  ──> handshake_pruefen ──(Fehler)──> 401/403/503
//!                                   │
//!                                   v
//!                              Upgrade ──> verbindung_annehmen ──> Welcome
//!                                   │
//!                                   v
//!            select! { Frame | Send-Queue | Schliessen | Shutdown }
//!                                   │
//!                                   v
//!                     Queue leeren ──> verbindung_trennen
//! ```
//!
//! Antworten laufen ueber dieselbe Send-Queue wie Broadcasts, damit ein
//! Client Ereignisse und Bestaetigungen in Entstehungsreihenfolge sieht.
//!
//! Jeder Frame an den Client hat eine Frist (`SENDE_FRIST`), das Leeren der
//! Queue beim Schliessen ebenfalls (`LEEREN_FRIST`). Nach einem Ueberlauf
//! wird die Queue verworfen.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use futures_util::{Sink, SinkExt};
use serde::Deserialize;
use startblock_auth::{AuthError, Handshake};
use startblock_db::Benutzer;
use startblock_protocol::ServerMessage;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};

use crate::dispatcher::{BefehlsKontext, CommandDispatcher};
use crate::error::BefehlsFehler;
use crate::registry::VerbindungsHandle;

/// Maximale Groesse eines eingehenden Frames
pub const MAX_FRAME_GROESSE: usize = 64 * 1024;

/// Frist fuer einen einzelnen Frame an den Client
pub const SENDE_FRIST: Duration = Duration::from_secs(10);

/// Gesamtfrist fuer das Zustellen ausstehender Nachrichten beim Schliessen
pub const LEEREN_FRIST: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum SendeFehler {
    #[error("Frist fuer das Senden ueberschritten")]
    Frist,
    #[error("WebSocket-Fehler: {0}")]
    Socket(String),
}

/// Zustand des WebSocket-Routers
#[derive(Clone)]
pub struct WsState {
    pub dispatcher: Arc<CommandDispatcher>,
    pub shutdown: watch::Receiver<bool>,
}

#[derive(Debug, Default, Deserialize)]
pub struct WsParameter {
    pub token: Option<String>,
}

/// Baut den Router mit dem `/ws`-Endpunkt
pub fn ws_router(dispatcher: Arc<CommandDispatcher>, shutdown: watch::Receiver<bool>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .with_state(WsState {
            dispatcher,
            shutdown,
        })
}

/// HTTP-Status fuer einen abgelehnten Handshake
pub fn ablehnung_status(fehler: &AuthError) -> StatusCode {
    match fehler {
        AuthError::IpGebannt(_) | AuthError::BenutzerGebannt(_) | AuthError::ZugriffVerweigert(_) => {
            StatusCode::FORBIDDEN
        }
        AuthError::SessionUngueltig | AuthError::SessionAbgelaufen => StatusCode::UNAUTHORIZED,
        AuthError::Datenbank(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(ws_state): State<WsState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Query(parameter): Query<WsParameter>,
    headers: HeaderMap,
) -> Response {
    let handshake = Handshake {
        token: parameter.token,
        cookie: headers
            .get(header::COOKIE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
    };
    let adresse = peer.ip();

    let benutzer = match ws_state
        .dispatcher
        .state()
        .handshake_pruefen(adresse, &handshake)
        .await
    {
        Ok(b) => b,
        Err(e) => {
            let status = ablehnung_status(&e);
            tracing::info!(adresse = %adresse, status = %status, fehler = %e, "Handshake abgelehnt");
            return (status, e.to_string()).into_response();
        }
    };

    ws.max_message_size(MAX_FRAME_GROESSE)
        .on_upgrade(move |socket| verbindung_verarbeiten(socket, ws_state, benutzer, adresse))
}

/// Verbindungs-Task fuer einen angenommenen WebSocket
async fn verbindung_verarbeiten(
    mut socket: WebSocket,
    ws_state: WsState,
    benutzer: Benutzer,
    adresse: IpAddr,
) {
    let WsState {
        dispatcher,
        mut shutdown,
    } = ws_state;
    let state = Arc::clone(dispatcher.state());

    let (handle, mut rx) = VerbindungsHandle::neu(state.config.send_queue_groesse);
    let verbindung = match state.verbindung_annehmen(&benutzer, adresse, handle.clone()) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(user_id = %benutzer.id, fehler = %e, "Verbindung konnte nicht angenommen werden");
            let _ = senden(&mut socket, &e.antwort("connect")).await;
            let _ = tokio::time::timeout(SENDE_FRIST, SinkExt::close(&mut socket)).await;
            return;
        }
    };

    let ctx = BefehlsKontext {
        verbindung,
        adresse,
        user_id: benutzer.id,
    };
    let schliessen = handle.schliess_token();

    loop {
        tokio::select! {
            frame = socket.recv() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        let ergebnis = dispatcher.verarbeiten(&text, &ctx).await;
                        handle.senden(ergebnis.antwort);
                        if ergebnis.trennen {
                            break;
                        }
                    }
                    Some(Ok(Message::Binary(_))) => {
                        handle.senden(
                            BefehlsFehler::ungueltig("Nur Text-Frames werden unterstuetzt")
                                .antwort("unknown"),
                        );
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    // Ping/Pong beantwortet axum selbst
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::debug!(verbindung = %verbindung, fehler = %e, "WebSocket-Lesefehler");
                        break;
                    }
                }
            }

            Some(nachricht) = rx.recv() => {
                if let Err(e) = senden(&mut socket, &nachricht).await {
                    tracing::debug!(verbindung = %verbindung, fehler = %e, "WebSocket-Schreibfehler");
                    break;
                }
            }

            _ = schliessen.cancelled() => break,

            Ok(()) = shutdown.changed() => {
                if *shutdown.borrow() {
                    handle.senden(ServerMessage::Disconnecting {
                        reason: "Server wird beendet".to_string(),
                    });
                    break;
                }
            }
        }
    }

    if handle.ist_ueberlaufen() {
        tracing::info!(verbindung = %verbindung, "Client zu langsam, ausstehende Nachrichten verworfen");
        rx.close();
    } else {
        // Bereits eingereihte Nachrichten (Antwort, Disconnecting) noch zustellen
        queue_leeren(&mut socket, &mut rx).await;
    }
    let _ = tokio::time::timeout(SENDE_FRIST, SinkExt::close(&mut socket)).await;
    state.verbindung_trennen(verbindung);
}

/// Sendet eine Nachricht als Text-Frame, hoechstens `SENDE_FRIST` lang
async fn senden<S>(socket: &mut S, nachricht: &ServerMessage) -> Result<(), SendeFehler>
where
    S: Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    let json = match nachricht.to_json() {
        Ok(j) => j,
        Err(e) => {
            tracing::error!(fehler = %e, "Nachricht nicht serialisierbar");
            return Ok(());
        }
    };
    match tokio::time::timeout(SENDE_FRIST, socket.send(Message::Text(json))).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(SendeFehler::Socket(e.to_string())),
        Err(_) => Err(SendeFehler::Frist),
    }
}

/// Stellt ausstehende Nachrichten zu, hoechstens `LEEREN_FRIST` lang
async fn queue_leeren<S>(socket: &mut S, rx: &mut mpsc::Receiver<ServerMessage>)
where
    S: Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    rx.close();
    let leeren = async {
        while let Ok(nachricht) = rx.try_recv() {
            if let Err(e) = senden(&mut *socket, &nachricht).await {
                tracing::debug!(fehler = %e, "Queue nicht vollstaendig zugestellt");
                break;
            }
        }
    };
    if tokio::time::timeout(LEEREN_FRIST, leeren).await.is_err() {
        tracing::debug!("Frist fuer das Leeren der Queue ueberschritten");
    }
}

/// Startet den WebSocket-Server
///
/// Laeuft bis `shutdown_rx` ein `true`-Signal empfaengt.
pub async fn ws_server_starten(
    bind_addr: SocketAddr,
    dispatcher: Arc<CommandDispatcher>,
    shutdown_rx: watch::Receiver<bool>,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    tracing::info!(adresse = %listener.local_addr()?, "WebSocket-Server gestartet");

    let app = ws_router(dispatcher, shutdown_rx.clone());
    let mut signal = shutdown_rx;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        while signal.changed().await.is_ok() {
            if *signal.borrow() {
                break;
            }
        }
    })
    .await?;

    tracing::info!("WebSocket-Server gestoppt");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use startblock_db::DbError;
    use tokio::time::Instant;
    use tokio_util::sync::PollSender;

    /// Client der nichts mehr liest: jeder Frame bleibt haengen
    fn blockierter_client() -> impl Sink<Message, Error = axum::Error> + Unpin {
        Box::pin(futures_util::sink::unfold((), |(), _: Message| {
            std::future::pending::<Result<(), axum::Error>>()
        }))
    }

    fn gefuellte_queue(anzahl: usize) -> mpsc::Receiver<ServerMessage> {
        let (handle, rx) = VerbindungsHandle::neu(anzahl);
        for i in 0..anzahl {
            assert!(handle.senden(ServerMessage::ok(&format!("befehl{i}"))));
        }
        rx
    }

    #[tokio::test(start_paused = true)]
    async fn senden_an_blockierten_client_endet_nach_frist() {
        let mut client = blockierter_client();
        let beginn = Instant::now();
        let ergebnis = senden(&mut client, &ServerMessage::ok("raceJoin")).await;
        assert!(matches!(ergebnis, Err(SendeFehler::Frist)));
        assert!(beginn.elapsed() >= SENDE_FRIST);
        assert!(beginn.elapsed() < SENDE_FRIST + Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn leeren_haengt_nicht_an_blockiertem_client() {
        let mut client = blockierter_client();
        let mut rx = gefuellte_queue(64);
        let beginn = Instant::now();
        queue_leeren(&mut client, &mut rx).await;
        assert!(beginn.elapsed() <= LEEREN_FRIST);
    }

    #[tokio::test(start_paused = true)]
    async fn leeren_stellt_in_reihenfolge_zu() {
        let (tx, mut empfangen) = mpsc::channel::<Message>(16);
        let mut client = Box::pin(PollSender::new(tx));
        let mut rx = gefuellte_queue(3);

        queue_leeren(&mut client, &mut rx).await;
        let mut befehle = Vec::new();
        while let Ok(Message::Text(json)) = empfangen.try_recv() {
            match ServerMessage::from_json(&json) {
                Ok(ServerMessage::Ok { command }) => befehle.push(command),
                andere => panic!("unerwartete Nachricht: {andere:?}"),
            }
        }
        assert_eq!(befehle, vec!["befehl0", "befehl1", "befehl2"]);
    }

    #[test]
    fn ablehnungen_werden_auf_http_status_abgebildet() {
        assert_eq!(
            ablehnung_status(&AuthError::IpGebannt("10.0.0.1".into())),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ablehnung_status(&AuthError::BenutzerGebannt("x".into())),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ablehnung_status(&AuthError::SessionUngueltig),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ablehnung_status(&AuthError::SessionAbgelaufen),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ablehnung_status(&AuthError::Datenbank(DbError::intern("weg"))),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
