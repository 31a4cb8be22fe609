//! Server-Konfiguration
//!
//! Wird beim Start aus einer TOML-Datei geladen. Alle Felder haben
//! sinnvolle Standardwerte, sodass der Server ohne Konfigurationsdatei
//! lauffaehig ist.

use serde::{Deserialize, Serialize};
use startblock_core::types::Rolle;
use startblock_signaling::registry::SEND_QUEUE_GROESSE;
use startblock_signaling::{RateLimitKonfig, RennKonfig, SignalingConfig};
use std::time::Duration;
use uuid::Uuid;

/// Vollstaendige Server-Konfiguration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Allgemeine Server-Einstellungen
    pub server: ServerEinstellungen,
    /// Netzwerk-Einstellungen
    pub netzwerk: NetzwerkEinstellungen,
    /// Rennablauf (Countdown, Watchdog, Gnadenfrist)
    pub rennen: RennEinstellungen,
    /// Befehls-Drosselung
    pub ratelimit: RateLimitEinstellungen,
    /// Verbindungs-Einstellungen
    pub verbindung: VerbindungsEinstellungen,
    /// Logging-Einstellungen
    pub logging: LoggingEinstellungen,
    /// Observability-Einstellungen (Metriken, Health)
    pub observability: ObservabilityEinstellungen,
    /// Statische Konten fuer Entwicklung und Tests
    pub auth: AuthEinstellungen,
}

/// Allgemeine Server-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerEinstellungen {
    /// Anzeigename des Servers
    pub name: String,
}

impl Default for ServerEinstellungen {
    fn default() -> Self {
        Self {
            name: "Startblock".into(),
        }
    }
}

/// Netzwerk-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetzwerkEinstellungen {
    /// Bind-Adresse fuer alle Listener
    pub bind_adresse: String,
    /// Port des WebSocket-Endpunkts (`/ws`)
    pub ws_port: u16,
}

impl Default for NetzwerkEinstellungen {
    fn default() -> Self {
        Self {
            bind_adresse: "0.0.0.0".into(),
            ws_port: 8080,
        }
    }
}

/// Rennablauf
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RennEinstellungen {
    /// Mindestanzahl Teilnehmer fuer nicht-solo Rennen
    pub min_teilnehmer: usize,
    /// Sekundenwerte die waehrend des Countdowns angesagt werden
    pub countdown_stufen: Vec<u64>,
    /// Laufende Rennen werden nach dieser Zeit zwangsweise beendet
    pub watchdog_sek: u64,
    /// Zeit bis ein getrennter Teilnehmer als aufgegeben gilt
    pub gnadenfrist_sek: u64,
}

impl Default for RennEinstellungen {
    fn default() -> Self {
        let standard = RennKonfig::default();
        Self {
            min_teilnehmer: standard.min_teilnehmer,
            countdown_stufen: standard.countdown_stufen,
            watchdog_sek: standard.watchdog.as_secs(),
            gnadenfrist_sek: standard.gnadenfrist.as_secs(),
        }
    }
}

/// Befehls-Drosselung pro Adresse und Benutzer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitEinstellungen {
    pub befehle: u32,
    pub periode_sek: u64,
}

impl Default for RateLimitEinstellungen {
    fn default() -> Self {
        let standard = RateLimitKonfig::default();
        Self {
            befehle: standard.befehle,
            periode_sek: standard.periode.as_secs(),
        }
    }
}

/// Verbindungs-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VerbindungsEinstellungen {
    /// Groesse der Send-Queue pro Client
    pub send_queue: usize,
    /// Verbindungen ohne Befehl werden nach dieser Zeit getrennt
    pub timeout_sek: u64,
}

impl Default for VerbindungsEinstellungen {
    fn default() -> Self {
        Self {
            send_queue: SEND_QUEUE_GROESSE,
            timeout_sek: 15 * 60,
        }
    }
}

/// Logging-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingEinstellungen {
    /// Log-Level bzw. Filter-Direktive
    pub level: String,
    /// Format: "json" oder "text"
    pub format: String,
}

impl Default for LoggingEinstellungen {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

/// Observability-Einstellungen (Metriken + Health-Check)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityEinstellungen {
    /// Aktiviert den Observability-Server
    pub aktiviert: bool,
    /// Port fuer Metriken und Health (Standard: 9300)
    pub port: u16,
}

impl Default for ObservabilityEinstellungen {
    fn default() -> Self {
        Self {
            aktiviert: true,
            port: 9300,
        }
    }
}

/// Statische Konten
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthEinstellungen {
    pub konten: Vec<StatischesKonto>,
}

/// Konto mit festem Session-Token (ohne Ablauf)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatischesKonto {
    pub token: String,
    pub name: String,
    #[serde(default)]
    pub rolle: Rolle,
    /// Feste ID; fehlt sie, wird bei jedem Start eine neue vergeben
    #[serde(default)]
    pub user_id: Option<Uuid>,
}

impl ServerConfig {
    /// Laedt die Konfiguration aus einer TOML-Datei.
    /// Gibt die Standardkonfiguration zurueck wenn die Datei nicht existiert.
    pub fn laden(pfad: &str) -> anyhow::Result<Self> {
        match std::fs::read_to_string(pfad) {
            Ok(inhalt) => {
                let config: Self = toml::from_str(&inhalt)
                    .map_err(|e| anyhow::anyhow!("Konfigurationsfehler in '{pfad}': {e}"))?;
                config.pruefen()?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    pfad = pfad,
                    "Konfigurationsdatei nicht gefunden, verwende Standardwerte"
                );
                Ok(Self::default())
            }
            Err(e) => Err(anyhow::anyhow!(
                "Konfigurationsdatei '{pfad}' nicht lesbar: {e}"
            )),
        }
    }

    /// Plausibilitaetspruefung der geladenen Werte
    pub fn pruefen(&self) -> anyhow::Result<()> {
        if self.rennen.countdown_stufen.is_empty() {
            anyhow::bail!("rennen.countdown_stufen darf nicht leer sein");
        }
        if self.ratelimit.befehle == 0 || self.ratelimit.periode_sek == 0 {
            anyhow::bail!("ratelimit.befehle und ratelimit.periode_sek muessen groesser 0 sein");
        }
        if self.verbindung.send_queue == 0 {
            anyhow::bail!("verbindung.send_queue muss groesser 0 sein");
        }
        if !startblock_observability::logging::log_format_gueltig(&self.logging.format) {
            anyhow::bail!("logging.format muss 'text' oder 'json' sein");
        }
        Ok(())
    }

    /// Gibt die Bind-Adresse fuer den WebSocket-Server zurueck
    pub fn ws_bind_adresse(&self) -> String {
        format!("{}:{}", self.netzwerk.bind_adresse, self.netzwerk.ws_port)
    }

    /// Gibt die Bind-Adresse fuer den Observability-Server zurueck
    pub fn observability_bind_adresse(&self) -> String {
        format!("{}:{}", self.netzwerk.bind_adresse, self.observability.port)
    }

    /// Abbildung auf die Konfiguration des Signaling-Service
    pub fn signaling_config(&self) -> SignalingConfig {
        SignalingConfig {
            server_name: self.server.name.clone(),
            verbindungs_timeout: Duration::from_secs(self.verbindung.timeout_sek),
            send_queue_groesse: self.verbindung.send_queue,
            ratelimit: RateLimitKonfig {
                befehle: self.ratelimit.befehle,
                periode: Duration::from_secs(self.ratelimit.periode_sek),
            },
            rennen: RennKonfig {
                min_teilnehmer: self.rennen.min_teilnehmer,
                countdown_stufen: self.rennen.countdown_stufen.clone(),
                watchdog: Duration::from_secs(self.rennen.watchdog_sek),
                gnadenfrist: Duration::from_secs(self.rennen.gnadenfrist_sek),
            },
        }
    }
}
