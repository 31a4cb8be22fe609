//! RaceEngine – Lebenszyklus der Rennen
//!
//! ```text
//!            alle bereit            Countdown abgelaufen
//!   Open ------------------> Starting -----------------> InProgress
//!    ^  \                       |                            |
//!    |   \ letzter geht         | nicht bereit / verlassen   | niemand mehr unterwegs
//!    |    v                     |                            | oder Watchdog
//!    | Cancelled <--------------+--(letzter geht)            v
//!    +--------------------------+                         Finished
//! ```
//!
//! Finished und Cancelled sind endgueltig; das Rennen wandert dann ins
//! Archiv.

mod engine;
mod error;
mod state;
mod timer;

pub use engine::{RaceEngine, RennDienste, RennKonfig};
pub use error::{RennFehler, RennResult};
