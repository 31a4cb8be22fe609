//! Abbrechbare Timer fuer Countdown, Watchdog und Gnadenfrist
//!
//! Jeder Timer ist ein eigener tokio-Task. Beim Feuern sperrt er das Rennen
//! erneut und vergleicht seine Epoche mit dem am Rennen (bzw. Teilnehmer)
//! gespeicherten Handle. Stimmt sie nicht ueberein, wurde er inzwischen
//! ersetzt und tut nichts.

use tokio::task::JoinHandle;

#[derive(Debug)]
pub(crate) struct TimerHandle {
    pub epoche: u64,
    task: JoinHandle<()>,
}

impl TimerHandle {
    pub fn neu(epoche: u64, task: JoinHandle<()>) -> Self {
        Self { epoche, task }
    }

    /// Bricht den Task ab
    ///
    /// Darf nicht aus dem Task selbst aufgerufen werden; ein feuernder
    /// Timer nimmt sein Handle nur aus dem Rennen heraus.
    pub fn abbrechen(self) {
        self.task.abort();
    }
}

/// Bricht einen optionalen Timer ab und leert den Platz
pub(crate) fn abbrechen(platz: &mut Option<TimerHandle>) {
    if let Some(timer) = platz.take() {
        timer.abbrechen();
    }
}

/// Nimmt das Handle heraus, falls es zur Epoche gehoert
///
/// Das herausgenommene Handle wird nur verworfen; der `JoinHandle` wird
/// damit geloest, nicht abgebrochen.
pub(crate) fn nehmen_wenn(platz: &mut Option<TimerHandle>, epoche: u64) -> bool {
    if platz.as_ref().is_some_and(|t| t.epoche == epoche) {
        platz.take();
        true
    } else {
        false
    }
}
