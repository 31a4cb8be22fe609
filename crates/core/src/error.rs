//! Fehler-Taxonomie fuer Startblock
//!
//! Jeder Fehler, der bei der Befehlsverarbeitung entsteht, wird auf genau
//! eine `FehlerArt` abgebildet. Die Art geht maschinenlesbar an den Client;
//! die Crates definieren ihre eigenen Fehler-Enums und liefern die Art
//! ueber `art()`.

use serde::{Deserialize, Serialize};

/// Maschinenlesbare Fehlerart fuer Antworten an den Client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FehlerArt {
    /// Ungueltige Nutzdaten oder verletzte Vorbedingung
    Validation,
    /// Gebannt, stummgeschaltet oder unzureichende Rolle
    Authorization,
    /// Rate-Limit ueberschritten
    Throttled,
    /// Zustand hat sich zwischenzeitlich geaendert
    Conflict,
    /// Store- oder Notifier-Fehler
    Infrastructure,
}

impl FehlerArt {
    /// Gibt `true` zurueck wenn der Fehler auf Server-Seite liegt
    pub fn ist_serverseitig(self) -> bool {
        matches!(self, Self::Infrastructure)
    }
}

impl std::fmt::Display for FehlerArt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Validation => "validation",
            Self::Authorization => "authorization",
            Self::Throttled => "throttled",
            Self::Conflict => "conflict",
            Self::Infrastructure => "infrastructure",
        };
        f.write_str(name)
    }
}
