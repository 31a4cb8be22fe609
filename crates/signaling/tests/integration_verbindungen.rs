//! Integration-Tests fuer Verbindungsaufbau, Verdraengung und Bans

mod common;

use common::{adresse, standard_aufbau};
use startblock_auth::{AuthError, Handshake};
use startblock_core::error::FehlerArt;
use startblock_core::types::Rolle;
use startblock_protocol::{ParticipantStatus, ServerMessage};
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn ip_gebannter_handshake_hinterlaesst_keinen_zustand() {
    let a = standard_aufbau();
    let (_, t_admin) = a.benutzer_anlegen("admin", Rolle::Admin).await;
    let (_, t_bob) = a.benutzer_anlegen("bob", Rolle::Normal).await;
    let admin = a.verbinden(&t_admin, adresse(1)).await;

    a.befehl_ok(&admin, r#"{"command":"adminBanIP","data":{"ip":"10.0.0.9"}}"#)
        .await;
    assert_eq!(a.state.registry.anzahl(), 1);

    let ergebnis = a
        .state
        .handshake_pruefen(adresse(9), &Handshake::mit_token(&t_bob))
        .await;
    assert!(matches!(ergebnis, Err(AuthError::IpGebannt(_))));
    assert_eq!(a.state.registry.anzahl(), 1);

    // Ungueltiges Token wird unabhaengig vom Ban abgelehnt
    let ergebnis = a
        .state
        .handshake_pruefen(adresse(3), &Handshake::mit_token("falsch"))
        .await;
    assert!(matches!(ergebnis, Err(AuthError::SessionUngueltig)));

    a.befehl_ok(&admin, r#"{"command":"adminUnbanIP","data":{"ip":"10.0.0.9"}}"#)
        .await;
    assert!(a
        .state
        .handshake_pruefen(adresse(9), &Handshake::mit_token(&t_bob))
        .await
        .is_ok());
}

#[tokio::test(start_paused = true)]
async fn ip_ban_schliesst_bestehende_verbindungen() {
    let a = standard_aufbau();
    let (_, t_admin) = a.benutzer_anlegen("admin", Rolle::Admin).await;
    let (_, t_bob) = a.benutzer_anlegen("bob", Rolle::Normal).await;
    let admin = a.verbinden(&t_admin, adresse(1)).await;
    let bob = a.verbinden(&t_bob, adresse(7)).await;

    a.befehl_ok(&admin, r#"{"command":"adminBanIP","data":{"ip":"10.0.0.7"}}"#)
        .await;
    assert!(bob.handle.ist_geschlossen());
    assert!(!admin.handle.ist_geschlossen());

    // Die eigene Adresse ist tabu
    let ergebnis = a
        .befehl(&admin, r#"{"command":"adminBanIP","data":{"ip":"10.0.0.1"}}"#)
        .await;
    assert!(matches!(ergebnis.antwort, ServerMessage::Error { kind: FehlerArt::Validation, .. }));
}

#[tokio::test(start_paused = true)]
async fn neue_verbindung_verdraengt_alte() {
    let a = standard_aufbau();
    let (bob_b, token) = a.benutzer_anlegen("bob", Rolle::Normal).await;
    let mut alt = a.verbinden(&token, adresse(2)).await;

    a.befehl_ok(&alt, r#"{"command":"raceCreate","data":{"name":"Abend"}}"#)
        .await;
    let id = a.state.engine.rennen_von(bob_b.id).unwrap();

    let neu = a.verbinden(&token, adresse(3)).await;
    assert!(alt.handle.ist_geschlossen());
    assert!(alt
        .nachrichten()
        .iter()
        .any(|n| matches!(n, ServerMessage::Disconnecting { .. })));
    assert_eq!(a.state.registry.anzahl(), 1);
    assert_eq!(
        a.state.registry.verbindung_von(bob_b.id),
        Some(neu.ctx.verbindung)
    );

    // Der spaete Abbau der alten Verbindung beruehrt das Rennen nicht
    a.state.verbindung_trennen(alt.ctx.verbindung);
    assert_eq!(a.state.engine.rennen_von(bob_b.id), Some(id));
    let info = a.state.engine.rennen_abfragen(id).unwrap();
    assert_eq!(info.participants[0].status, ParticipantStatus::NotReady);
    assert!(a
        .state
        .broadcaster
        .ist_mitglied(neu.ctx.verbindung, &id.raum_name()));
}

#[tokio::test(start_paused = true)]
async fn ban_trennt_und_sperrt_wiederverbindung() {
    let a = standard_aufbau();
    let (_, t_mod) = a.benutzer_anlegen("moderatorin", Rolle::Moderator).await;
    let (_, t_admin) = a.benutzer_anlegen("admin", Rolle::Admin).await;
    let (bob_b, t_bob) = a.benutzer_anlegen("bob", Rolle::Normal).await;
    let moderatorin = a.verbinden(&t_mod, adresse(1)).await;
    let admin = a.verbinden(&t_admin, adresse(2)).await;
    let mut bob = a.verbinden(&t_bob, adresse(3)).await;

    // Moderatoren duerfen keine Admins bannen
    let ergebnis = a
        .befehl(
            &moderatorin,
            &format!(
                r#"{{"command":"adminBan","data":{{"user":"{}"}}}}"#,
                admin.ctx.user_id.inner()
            ),
        )
        .await;
    assert!(matches!(ergebnis.antwort, ServerMessage::Error { kind: FehlerArt::Authorization, .. }));
    assert!(!admin.handle.ist_geschlossen());

    a.befehl_ok(
        &moderatorin,
        &format!(
            r#"{{"command":"adminBan","data":{{"user":"{}"}}}}"#,
            bob_b.id.inner()
        ),
    )
    .await;
    assert!(bob.handle.ist_geschlossen());
    assert!(bob
        .nachrichten()
        .iter()
        .any(|n| matches!(n, ServerMessage::Disconnecting { .. })));
    assert!(a.state.cache.holen(bob_b.id).unwrap().gebannt);

    let ergebnis = a
        .state
        .handshake_pruefen(adresse(3), &Handshake::mit_token(&t_bob))
        .await;
    assert!(matches!(ergebnis, Err(AuthError::BenutzerGebannt(_))));

    a.state.schreiber.synchronisieren().await;
    use startblock_db::Store;
    assert!(a.store.benutzer_laden(bob_b.id).await.unwrap().unwrap().gebannt);
}

#[tokio::test(start_paused = true)]
async fn befoerderung_nur_durch_hoeheren_rang() {
    let a = standard_aufbau();
    let (_, t_admin) = a.benutzer_anlegen("admin", Rolle::Admin).await;
    let (bob_b, t_bob) = a.benutzer_anlegen("bob", Rolle::Normal).await;
    let admin = a.verbinden(&t_admin, adresse(1)).await;
    let bob = a.verbinden(&t_bob, adresse(2)).await;

    let befehl = |name: &str, ziel: startblock_core::types::UserId| {
        format!(r#"{{"command":"{name}","data":{{"user":"{}"}}}}"#, ziel.inner())
    };

    let ergebnis = a.befehl(&bob, &befehl("adminPromote", bob_b.id)).await;
    assert!(matches!(ergebnis.antwort, ServerMessage::Error { kind: FehlerArt::Authorization, .. }));

    a.befehl_ok(&admin, &befehl("adminPromote", bob_b.id)).await;
    assert_eq!(a.state.gate.rolle(bob_b.id), Rolle::Moderator);
    assert_eq!(a.state.cache.holen(bob_b.id).unwrap().rolle, Rolle::Moderator);

    a.befehl_ok(&admin, &befehl("adminDemote", bob_b.id)).await;
    assert_eq!(a.state.gate.rolle(bob_b.id), Rolle::Normal);
}

#[tokio::test(start_paused = true)]
async fn inaktive_verbindungen_werden_geschlossen() {
    let a = standard_aufbau();
    let (_, t1) = a.benutzer_anlegen("alice", Rolle::Normal).await;
    let (_, t2) = a.benutzer_anlegen("bob", Rolle::Normal).await;
    let alice = a.verbinden(&t1, adresse(1)).await;
    let bob = a.verbinden(&t2, adresse(2)).await;

    tokio::time::sleep(Duration::from_secs(10 * 60)).await;
    a.befehl_ok(&alice, r#"{"command":"roomListAll"}"#).await;
    tokio::time::sleep(Duration::from_secs(6 * 60)).await;

    assert_eq!(a.state.inaktive_trennen(), 1);
    assert!(bob.handle.ist_geschlossen());
    assert!(!alice.handle.ist_geschlossen());
}

#[tokio::test(start_paused = true)]
async fn getrennter_teilnehmer_kann_zurueckkehren() {
    let a = standard_aufbau();
    let (alice_b, t1) = a.benutzer_anlegen("alice", Rolle::Normal).await;
    let (_, t2) = a.benutzer_anlegen("bob", Rolle::Normal).await;
    let alice = a.verbinden(&t1, adresse(1)).await;
    let bob = a.verbinden(&t2, adresse(2)).await;

    a.befehl_ok(&alice, r#"{"command":"raceCreate","data":{"name":"Abend"}}"#)
        .await;
    let id = a.state.engine.rennen_von(alice_b.id).unwrap();
    let join = format!(r#"{{"command":"raceJoin","data":{{"id":"{}"}}}}"#, id.inner());
    a.befehl_ok(&bob, &join).await;
    for client in [&alice, &bob] {
        a.befehl_ok(
            client,
            &format!(r#"{{"command":"raceReady","data":{{"id":"{}"}}}}"#, id.inner()),
        )
        .await;
    }
    tokio::time::sleep(Duration::from_secs(4)).await;

    a.state.verbindung_trennen(alice.ctx.verbindung);
    let info = a.state.engine.rennen_abfragen(id).unwrap();
    let status = |info: &startblock_protocol::RaceInfo| {
        info.participants
            .iter()
            .find(|p| p.user_id == alice_b.id)
            .map(|p| p.status)
    };
    assert_eq!(status(&info), Some(ParticipantStatus::Disconnected));

    let mut zurueck = a.verbinden(&t1, adresse(1)).await;
    let info = a.state.engine.rennen_abfragen(id).unwrap();
    assert_eq!(status(&info), Some(ParticipantStatus::Racing));
    assert!(zurueck
        .nachrichten()
        .iter()
        .any(|n| matches!(n, ServerMessage::Welcome { races, .. } if races.iter().any(|r| r.id == id))));
}
