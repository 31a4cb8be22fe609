//! startblock-rating – Skill-Ratings und Erfolge fuer abgeschlossene Rennen
//!
//! Ein beendetes Rennen wird als Free-for-all gewertet:
//!
//! ```text
//! Platz 1, Platz 2, ..., Platz k      (Ziel erreicht)
//! Rang k+1 (geteilt)                  (DNF und Aufgegeben)
//! ```
//!
//! Die Aktualisierung folgt dem Weng-Lin-Verfahren (Bradley-Terry), bereitgestellt
//! vom `skillratings`-Crate. Gleichstaende werden dabei gleich behandelt.
//!
//! Danach vergibt der `ErfolgsService` die Erfolge aus dem festen Katalog
//! (`startblock_core::Achievement`).

pub mod berechnung;
pub mod erfolge;
pub mod ergebnis;
pub mod service;

pub use berechnung::berechnen;
pub use erfolge::{neue_erfolge, ErfolgsService};
pub use ergebnis::{ErgebnisEintrag, RennErgebnis};
pub use service::RatingService;
