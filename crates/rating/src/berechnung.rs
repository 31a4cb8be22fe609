//! Reine Rating-Berechnung ohne Seiteneffekte

use skillratings::weng_lin::{weng_lin_multi_team, WengLinConfig, WengLinRating};
use skillratings::MultiTeamOutcome;
use startblock_core::types::{Rating, UserId};

/// Berechnet neue Ratings fuer ein Free-for-all
///
/// Jeder Teilnehmer ist ein Ein-Personen-Team. `rang` ist 1-basiert,
/// gleiche Raenge gelten als Unentschieden. Die Rennzahl steigt fuer jeden
/// gewerteten Teilnehmer um eins.
pub fn berechnen(
    teilnehmer: &[(UserId, Rating, usize)],
    konfig: &WengLinConfig,
) -> Vec<(UserId, Rating)> {
    if teilnehmer.len() < 2 {
        return Vec::new();
    }

    let teams: Vec<[WengLinRating; 1]> = teilnehmer
        .iter()
        .map(|(_, r, _)| {
            [WengLinRating {
                rating: r.mu,
                uncertainty: r.sigma,
            }]
        })
        .collect();
    let eingabe: Vec<(&[WengLinRating], MultiTeamOutcome)> = teams
        .iter()
        .zip(teilnehmer)
        .map(|(team, (_, _, rang))| (&team[..], MultiTeamOutcome::new(*rang)))
        .collect();

    let neu = weng_lin_multi_team(&eingabe, konfig);

    teilnehmer
        .iter()
        .zip(neu)
        .filter_map(|((id, alt, _), team)| {
            team.first().map(|r| {
                (
                    *id,
                    Rating {
                        mu: r.rating,
                        sigma: r.uncertainty,
                        rennen: alt.rennen + 1,
                    },
                )
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sieger_steigt_verlierer_faellt() {
        let (a, b) = (UserId::new(), UserId::new());
        let start = Rating::default();
        let neu = berechnen(&[(a, start, 1), (b, start, 2)], &WengLinConfig::new());

        assert_eq!(neu.len(), 2);
        let (ra, rb) = (neu[0].1, neu[1].1);
        assert!(ra.mu > start.mu);
        assert!(rb.mu < start.mu);
        assert!(ra.sigma < start.sigma);
        assert_eq!(ra.rennen, 1);
        assert_eq!(rb.rennen, 1);
    }

    #[test]
    fn gleichstand_bei_gleichem_rating_aendert_mu_nicht() {
        let (a, b) = (UserId::new(), UserId::new());
        let start = Rating::default();
        let neu = berechnen(&[(a, start, 1), (b, start, 1)], &WengLinConfig::new());

        assert!((neu[0].1.mu - start.mu).abs() < 1e-9);
        assert!((neu[0].1.mu - neu[1].1.mu).abs() < 1e-9);
    }

    #[test]
    fn geteilter_letzter_rang() {
        let ids: Vec<UserId> = (0..3).map(|_| UserId::new()).collect();
        let start = Rating::default();
        let neu = berechnen(
            &[(ids[0], start, 1), (ids[1], start, 2), (ids[2], start, 2)],
            &WengLinConfig::new(),
        );
        assert!(neu[0].1.mu > start.mu);
        assert!((neu[1].1.mu - neu[2].1.mu).abs() < 1e-9);
        assert!(neu[1].1.mu < start.mu);
    }

    #[test]
    fn einzelner_teilnehmer_wird_nicht_gewertet() {
        let neu = berechnen(&[(UserId::new(), Rating::default(), 1)], &WengLinConfig::new());
        assert!(neu.is_empty());
    }
}
