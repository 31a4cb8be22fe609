//! Prometheus-kompatible Metriken fuer Startblock
//!
//! Registrierte Metriken:
//! - `startblock_verbindungen_aktiv` – Gauge: Angemeldete WebSocket-Verbindungen
//! - `startblock_rennen_aktiv` – Gauge: Nicht archivierte Rennen
//! - `startblock_befehle_total` – Counter: Verarbeitete Befehle (befehl)
//! - `startblock_befehle_gedrosselt_total` – Counter: Vom Rate Limiter abgelehnte Befehle
//! - `startblock_rennen_abgeschlossen_total` – Counter: Archivierte Rennen (status)
//! - `startblock_renndauer_sekunden` – Histogram: Dauer beendeter Rennen

use anyhow::Result;
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Router};
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;

/// Alle Startblock-Prometheus-Metriken
#[derive(Clone)]
pub struct StartblockMetriken {
    pub registry: Arc<Registry>,

    // Verbindungen
    pub verbindungen_aktiv: IntGauge,

    // Befehle
    pub befehle_total: IntCounterVec,
    pub befehle_gedrosselt_total: IntCounter,

    // Rennen
    pub rennen_aktiv: IntGauge,
    pub rennen_abgeschlossen_total: IntCounterVec,
    pub renndauer_sekunden: Histogram,
}

impl StartblockMetriken {
    /// Erstellt und registriert alle Metriken in einer neuen Registry
    pub fn neu() -> Result<Self> {
        let registry = Registry::new();

        let verbindungen_aktiv = IntGauge::with_opts(Opts::new(
            "startblock_verbindungen_aktiv",
            "Anzahl angemeldeter WebSocket-Verbindungen",
        ))?;
        registry.register(Box::new(verbindungen_aktiv.clone()))?;

        // --- Befehle ---
        let befehle_total = IntCounterVec::new(
            Opts::new("startblock_befehle_total", "Gesamtanzahl verarbeiteter Befehle"),
            &["befehl"],
        )?;
        registry.register(Box::new(befehle_total.clone()))?;

        let befehle_gedrosselt_total = IntCounter::with_opts(Opts::new(
            "startblock_befehle_gedrosselt_total",
            "Vom Rate Limiter abgelehnte Befehle",
        ))?;
        registry.register(Box::new(befehle_gedrosselt_total.clone()))?;

        // --- Rennen ---
        let rennen_aktiv = IntGauge::with_opts(Opts::new(
            "startblock_rennen_aktiv",
            "Anzahl nicht archivierter Rennen",
        ))?;
        registry.register(Box::new(rennen_aktiv.clone()))?;

        let rennen_abgeschlossen_total = IntCounterVec::new(
            Opts::new(
                "startblock_rennen_abgeschlossen_total",
                "Archivierte Rennen nach Endstatus",
            ),
            &["status"],
        )?;
        registry.register(Box::new(rennen_abgeschlossen_total.clone()))?;

        let renndauer_sekunden = Histogram::with_opts(
            HistogramOpts::new(
                "startblock_renndauer_sekunden",
                "Dauer beendeter Rennen in Sekunden",
            )
            .buckets(vec![
                60.0, 120.0, 300.0, 600.0, 900.0, 1200.0, 1800.0, 3600.0,
            ]),
        )?;
        registry.register(Box::new(renndauer_sekunden.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            verbindungen_aktiv,
            befehle_total,
            befehle_gedrosselt_total,
            rennen_aktiv,
            rennen_abgeschlossen_total,
            renndauer_sekunden,
        })
    }

    /// Zaehlt einen verarbeiteten Befehl
    pub fn befehl_zaehlen(&self, befehl: &str) {
        self.befehle_total.with_label_values(&[befehl]).inc();
    }

    /// Exportiert alle Metriken im Prometheus-Textformat
    pub fn exportieren(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

/// Axum-Router fuer den `/metrics`-Endpunkt
pub fn metrics_router(metriken: StartblockMetriken) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metriken)
}

async fn metrics_handler(State(metriken): State<StartblockMetriken>) -> impl IntoResponse {
    match metriken.exportieren() {
        Ok(text) => (
            StatusCode::OK,
            [(
                axum::http::header::CONTENT_TYPE,
                "text/plain; version=0.0.4",
            )],
            text,
        )
            .into_response(),
        Err(err) => {
            tracing::error!("Metriken-Export fehlgeschlagen: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn befehle_werden_pro_label_gezaehlt() {
        let metriken = StartblockMetriken::neu().unwrap();
        metriken.befehl_zaehlen("raceReady");
        metriken.befehl_zaehlen("raceReady");
        metriken.befehl_zaehlen("roomJoin");
        assert_eq!(
            metriken.befehle_total.with_label_values(&["raceReady"]).get(),
            2
        );
        assert_eq!(
            metriken.befehle_total.with_label_values(&["roomJoin"]).get(),
            1
        );
    }

    #[test]
    fn gauges_setzen() {
        let metriken = StartblockMetriken::neu().unwrap();
        metriken.verbindungen_aktiv.set(3);
        metriken.rennen_aktiv.inc();
        assert_eq!(metriken.verbindungen_aktiv.get(), 3);
        assert_eq!(metriken.rennen_aktiv.get(), 1);
    }

    #[test]
    fn export_im_prometheus_format() {
        let metriken = StartblockMetriken::neu().unwrap();
        metriken.befehle_gedrosselt_total.inc();
        metriken
            .rennen_abgeschlossen_total
            .with_label_values(&["finished"])
            .inc();

        let output = metriken.exportieren().unwrap();
        assert!(output.contains("startblock_befehle_gedrosselt_total 1"));
        assert!(output.contains("startblock_rennen_abgeschlossen_total{status=\"finished\"} 1"));
        assert!(output.contains("# HELP"));
        assert!(output.contains("# TYPE"));
    }
}
