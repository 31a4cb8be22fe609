//! Handler fuer alle Client-Befehle
//!
//! Jeder Handler ist fuer eine Befehlsgruppe zustaendig und hat Zugriff
//! auf den gemeinsamen SignalingState. Handler liefern die Antwort fuer
//! den ausloesenden Client; Broadcasts erledigen Broadcaster und Engine.

pub mod admin_handler;
pub mod profile_handler;
pub mod race_handler;
pub mod room_handler;

use crate::error::{BefehlsFehler, BefehlsResult};

/// Kuerzt und prueft die Laenge eines Freitexts (in Zeichen)
pub(crate) fn text_pruefen<'a>(
    text: &'a str,
    min: usize,
    max: usize,
    was: &str,
) -> BefehlsResult<&'a str> {
    let text = text.trim();
    let laenge = text.chars().count();
    if laenge < min || laenge > max {
        return Err(BefehlsFehler::ungueltig(format!(
            "{was} muss {min} bis {max} Zeichen lang sein"
        )));
    }
    Ok(text)
}
