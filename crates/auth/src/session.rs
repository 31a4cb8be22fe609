//! Session-Validierung fuer Startblock
//!
//! Beim Verbindungsaufbau liefert der Client ein Session-Token entweder als
//! Query-Parameter `token` oder im Cookie `isaac.sid`. Der `SessionValidator`
//! loest das Token in eine Benutzer-ID auf.
//!
//! `SessionStore` ist die mitgelieferte In-Memory-Implementierung mit TTL.
//! Ein Hintergrund-Task bereinigt abgelaufene Sessions.

use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use startblock_core::types::UserId;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{AuthError, AuthResult};

/// Name des Session-Cookies
pub const SESSION_COOKIE: &str = "isaac.sid";

/// Standard-Session-Lebensdauer: 24 Stunden
const SESSION_TTL_SEKUNDEN: i64 = 24 * 60 * 60;

/// Intervall fuer den automatischen Cleanup-Task: 15 Minuten
const CLEANUP_INTERVALL: Duration = Duration::from_secs(15 * 60);

// ---------------------------------------------------------------------------
// Handshake
// ---------------------------------------------------------------------------

/// Anmeldedaten aus dem HTTP-Upgrade-Request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Handshake {
    /// Wert des Query-Parameters `token`
    pub token: Option<String>,
    /// Roher `Cookie`-Header
    pub cookie: Option<String>,
}

impl Handshake {
    pub fn mit_token(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
            cookie: None,
        }
    }

    /// Session-Token: Query-Parameter vor Cookie
    pub fn session_token(&self) -> Option<String> {
        if let Some(t) = self.token.as_deref().filter(|t| !t.is_empty()) {
            return Some(t.to_string());
        }
        self.cookie.as_deref().and_then(cookie_wert)
    }
}

/// Sucht `isaac.sid=<wert>` in einem Cookie-Header
fn cookie_wert(header: &str) -> Option<String> {
    header
        .split(';')
        .filter_map(|teil| teil.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, wert)| wert.trim_matches('"').to_string())
        .filter(|wert| !wert.is_empty())
}

/// Loest Anmeldedaten in eine Benutzer-ID auf
#[async_trait]
pub trait SessionValidator: Send + Sync + 'static {
    async fn validieren(&self, handshake: &Handshake) -> AuthResult<UserId>;
}

// ---------------------------------------------------------------------------
// SessionStore
// ---------------------------------------------------------------------------

/// Ein aktives Session-Token
#[derive(Debug, Clone)]
pub struct Session {
    pub token: String,
    pub user_id: UserId,
    pub erstellt_am: DateTime<Utc>,
    pub laeuft_ab_am: DateTime<Utc>,
}

impl Session {
    /// Gibt `true` zurueck wenn die Session noch gueltig ist
    pub fn ist_gueltig(&self) -> bool {
        Utc::now() < self.laeuft_ab_am
    }
}

/// In-Memory Session-Store mit TTL-Unterstuetzung
#[derive(Debug, Default)]
pub struct SessionStore {
    /// token -> Session
    sessions: RwLock<HashMap<String, Session>>,
}

impl SessionStore {
    pub fn neu() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Startet den periodischen Cleanup-Task fuer den Store
    pub fn cleanup_starten(store: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let store = Arc::clone(store);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(CLEANUP_INTERVALL).await;
                let entfernt = store.cleanup_abgelaufene().await;
                if entfernt > 0 {
                    tracing::debug!(anzahl = entfernt, "Abgelaufene Sessions bereinigt");
                }
            }
        })
    }

    /// Erstellt eine neue Session mit zufaelligem Token
    pub async fn erstellen(&self, user_id: UserId) -> Session {
        let token = Uuid::new_v4().simple().to_string();
        self.mit_token(token, user_id, chrono::Duration::seconds(SESSION_TTL_SEKUNDEN))
            .await
    }

    /// Registriert ein vorgegebenes Token (statische Entwicklungs-Accounts)
    pub async fn mit_token(
        &self,
        token: impl Into<String>,
        user_id: UserId,
        ttl: chrono::Duration,
    ) -> Session {
        let jetzt = Utc::now();
        let session = Session {
            token: token.into(),
            user_id,
            erstellt_am: jetzt,
            laeuft_ab_am: jetzt + ttl,
        };
        self.sessions
            .write()
            .await
            .insert(session.token.clone(), session.clone());
        tracing::debug!(user_id = %user_id, "Neue Session erstellt");
        session
    }

    /// Prueft ein Token und gibt die Session zurueck
    pub async fn token_pruefen(&self, token: &str) -> AuthResult<Session> {
        let sessions = self.sessions.read().await;
        match sessions.get(token) {
            None => Err(AuthError::SessionUngueltig),
            Some(session) if !session.ist_gueltig() => Err(AuthError::SessionAbgelaufen),
            Some(session) => Ok(session.clone()),
        }
    }

    /// Entfernt eine Session; `true` wenn sie existierte
    pub async fn invalidieren(&self, token: &str) -> bool {
        let entfernt = self.sessions.write().await.remove(token).is_some();
        if entfernt {
            tracing::debug!("Session invalidiert");
        }
        entfernt
    }

    /// Bereinigt abgelaufene Sessions
    pub async fn cleanup_abgelaufene(&self) -> usize {
        let jetzt = Utc::now();
        let mut sessions = self.sessions.write().await;
        let vorher = sessions.len();
        sessions.retain(|_, s| s.laeuft_ab_am > jetzt);
        vorher - sessions.len()
    }

    pub async fn anzahl_aktive(&self) -> usize {
        let jetzt = Utc::now();
        let sessions = self.sessions.read().await;
        sessions.values().filter(|s| s.laeuft_ab_am > jetzt).count()
    }
}

#[async_trait]
impl SessionValidator for SessionStore {
    async fn validieren(&self, handshake: &Handshake) -> AuthResult<UserId> {
        let token = handshake
            .session_token()
            .ok_or(AuthError::SessionUngueltig)?;
        Ok(self.token_pruefen(&token).await?.user_id)
    }
}
