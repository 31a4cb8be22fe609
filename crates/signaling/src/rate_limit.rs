//! Rate Limiter fuer eingehende Befehle
//!
//! Token-Bucket pro Quelle. Jeder Befehl wird sowohl gegen die
//! Quell-Adresse als auch gegen den angemeldeten Benutzer geprueft.
//! Ein erschoepfter Bucket lehnt sofort ab; es wird nichts eingereiht.

use parking_lot::Mutex;
use startblock_core::types::UserId;
use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Duration;
use tokio::time::Instant;

/// Konfiguration fuer den Rate Limiter
#[derive(Debug, Clone)]
pub struct RateLimitKonfig {
    /// Erlaubte Befehle pro Periode (= Burst-Limit)
    pub befehle: u32,
    /// Laenge der Periode
    pub periode: Duration,
}

impl Default for RateLimitKonfig {
    fn default() -> Self {
        Self {
            befehle: 120,
            periode: Duration::from_secs(60),
        }
    }
}

/// Quelle eines Befehls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Schluessel {
    Adresse(IpAddr),
    Benutzer(UserId),
}

#[derive(Debug)]
struct TokenBucket {
    /// Aktuelle Token-Anzahl (als f64 fuer Bruchteil-Auffuellung)
    token: f64,
    max_token: f64,
    /// Token pro Sekunde
    fuellrate: f64,
    letzte_auffuellung: Instant,
}

impl TokenBucket {
    fn neu(konfig: &RateLimitKonfig) -> Self {
        let max = konfig.befehle.max(1) as f64;
        let sekunden = konfig.periode.as_secs_f64().max(f64::EPSILON);
        Self {
            token: max,
            max_token: max,
            fuellrate: max / sekunden,
            letzte_auffuellung: Instant::now(),
        }
    }

    fn verbrauchen(&mut self) -> bool {
        self.auffuellen();
        if self.token >= 1.0 {
            self.token -= 1.0;
            true
        } else {
            false
        }
    }

    fn auffuellen(&mut self) {
        let jetzt = Instant::now();
        let vergangen = jetzt.duration_since(self.letzte_auffuellung).as_secs_f64();
        self.token = (self.token + vergangen * self.fuellrate).min(self.max_token);
        self.letzte_auffuellung = jetzt;
    }

    fn ist_voll(&self, jetzt: Instant) -> bool {
        let vergangen = jetzt.duration_since(self.letzte_auffuellung).as_secs_f64();
        self.token + vergangen * self.fuellrate >= self.max_token
    }
}

/// Token-Bucket Rate Limiter
pub struct RateLimiter {
    konfig: RateLimitKonfig,
    buckets: Mutex<HashMap<Schluessel, TokenBucket>>,
}

impl RateLimiter {
    pub fn neu(konfig: RateLimitKonfig) -> Self {
        Self {
            konfig,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Prueft und verbraucht ein Token fuer eine Quelle
    pub fn erlauben(&self, schluessel: Schluessel) -> bool {
        let mut buckets = self.buckets.lock();
        buckets
            .entry(schluessel)
            .or_insert_with(|| TokenBucket::neu(&self.konfig))
            .verbrauchen()
    }

    /// Prueft Adresse und Benutzer eines Befehls
    pub fn befehl_erlauben(&self, adresse: IpAddr, benutzer: Option<UserId>) -> bool {
        if !self.erlauben(Schluessel::Adresse(adresse)) {
            return false;
        }
        match benutzer {
            Some(uid) => self.erlauben(Schluessel::Benutzer(uid)),
            None => true,
        }
    }

    /// Entfernt Buckets die vollstaendig aufgefuellt sind
    ///
    /// Ein voller Bucket ist von einem neuen nicht zu unterscheiden.
    pub fn bereinigen(&self) -> usize {
        let jetzt = Instant::now();
        let mut buckets = self.buckets.lock();
        let vorher = buckets.len();
        buckets.retain(|_, b| !b.ist_voll(jetzt));
        vorher - buckets.len()
    }

    pub fn anzahl_buckets(&self) -> usize {
        self.buckets.lock().len()
    }
}
