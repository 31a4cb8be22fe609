//! Health-Check-Endpunkt fuer Startblock
//!
//! Endpoint: `GET /health`
//! Response: JSON mit Status, Version, Uptime und Store-Status

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Status des Health-Checks
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
}

/// Antwort des Health-Check-Endpunkts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub version: String,
    pub uptime_seconds: u64,
    pub store_verfuegbar: bool,
}

/// Geteilter Zustand fuer den Health-Check-Handler
///
/// Der Store-Status wird vom `StoreSchreiber` nicht direkt gesetzt;
/// der Server meldet Ausfaelle ueber `store_status_setzen`.
#[derive(Clone)]
pub struct HealthState {
    start_time: Arc<Instant>,
    store_verfuegbar: Arc<AtomicBool>,
}

impl Default for HealthState {
    fn default() -> Self {
        Self::neu()
    }
}

impl HealthState {
    pub fn neu() -> Self {
        Self {
            start_time: Arc::new(Instant::now()),
            store_verfuegbar: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    pub fn store_verfuegbar(&self) -> bool {
        self.store_verfuegbar.load(Ordering::Relaxed)
    }

    pub fn store_status_setzen(&self, verfuegbar: bool) {
        self.store_verfuegbar.store(verfuegbar, Ordering::Relaxed);
    }

    fn antwort(&self) -> HealthResponse {
        let store_verfuegbar = self.store_verfuegbar();
        HealthResponse {
            // Ohne Store laeuft der Server aus dem Speicher weiter
            status: if store_verfuegbar {
                HealthStatus::Healthy
            } else {
                HealthStatus::Degraded
            },
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: self.uptime_seconds(),
            store_verfuegbar,
        }
    }
}

/// Axum-Router fuer den `/health`-Endpunkt
pub fn health_router(state: HealthState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .with_state(state)
}

/// `GET /health` – gibt den Serverstatus zurueck
async fn health_handler(State(state): State<HealthState>) -> impl IntoResponse {
    (StatusCode::OK, Json(state.antwort()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_status_umschalten() {
        let state = HealthState::neu();
        assert!(state.store_verfuegbar());
        assert_eq!(state.antwort().status, HealthStatus::Healthy);

        state.store_status_setzen(false);
        assert_eq!(state.antwort().status, HealthStatus::Degraded);
    }

    #[test]
    fn health_response_serialisierung() {
        let response = HealthResponse {
            status: HealthStatus::Degraded,
            version: "0.1.0".to_string(),
            uptime_seconds: 120,
            store_verfuegbar: false,
        };

        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"status\":\"degraded\""));
        assert!(json.contains("\"store_verfuegbar\":false"));
    }
}
