//! Regelwerk eines Rennens
//!
//! Das Regelwerk wird vor dem Start vom Ersteller festgelegt und ist ab
//! dem Countdown gesperrt.

use serde::{Deserialize, Serialize};

/// Maximale Laenge eines Seeds
const SEED_MAX_LAENGE: usize = 32;

/// Spielformat
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RaceFormat {
    #[default]
    Unseeded,
    Seeded,
    Diversity,
    Custom,
}

/// Rennziel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RaceGoal {
    #[default]
    BlueBaby,
    TheLamb,
    MegaSatan,
    Everything,
    Custom,
}

/// Vollstaendiges Regelwerk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Ruleset {
    pub format: RaceFormat,
    pub goal: RaceGoal,
    /// Nur bei `RaceFormat::Seeded`
    pub seed: Option<String>,
    /// Einzelrennen (Uebung); zaehlt nie fuer das Rating
    pub solo: bool,
    /// Rennen fliesst in das Rating ein
    pub ranked: bool,
}

impl Default for Ruleset {
    fn default() -> Self {
        Self {
            format: RaceFormat::Unseeded,
            goal: RaceGoal::BlueBaby,
            seed: None,
            solo: false,
            ranked: true,
        }
    }
}

impl Ruleset {
    /// Prueft das Regelwerk auf Konsistenz
    pub fn validieren(&self) -> Result<(), String> {
        match (&self.format, &self.seed) {
            (RaceFormat::Seeded, None) => {
                return Err("Seeded-Rennen benoetigen einen Seed".into());
            }
            (RaceFormat::Seeded, Some(seed)) => {
                let seed = seed.trim();
                if seed.is_empty() || seed.len() > SEED_MAX_LAENGE {
                    return Err(format!(
                        "Seed muss 1 bis {SEED_MAX_LAENGE} Zeichen lang sein"
                    ));
                }
            }
            (_, Some(_)) => {
                return Err("Seed ist nur bei Seeded-Rennen erlaubt".into());
            }
            (_, None) => {}
        }
        if self.solo && self.ranked {
            return Err("Solo-Rennen koennen nicht gewertet werden".into());
        }
        Ok(())
    }

    /// Gibt `true` zurueck wenn das Rennen fuer das Rating zaehlt
    pub fn ist_bewertbar(&self) -> bool {
        self.ranked && !self.solo
    }

    /// Mindestanzahl Teilnehmer fuer den Start
    pub fn min_teilnehmer(&self, standard: usize) -> usize {
        if self.solo {
            1
        } else {
            standard.max(1)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_regelwerk_ist_gueltig_und_bewertbar() {
        let regelwerk = Ruleset::default();
        assert!(regelwerk.validieren().is_ok());
        assert!(regelwerk.ist_bewertbar());
        assert_eq!(regelwerk.min_teilnehmer(2), 2);
    }

    #[test]
    fn seeded_ohne_seed_ungueltig() {
        let regelwerk = Ruleset {
            format: RaceFormat::Seeded,
            ..Ruleset::default()
        };
        assert!(regelwerk.validieren().is_err());
    }

    #[test]
    fn seed_bei_unseeded_ungueltig() {
        let regelwerk = Ruleset {
            seed: Some("ABCD 1234".into()),
            ..Ruleset::default()
        };
        assert!(regelwerk.validieren().is_err());
    }

    #[test]
    fn solo_rennen() {
        let regelwerk = Ruleset {
            solo: true,
            ranked: false,
            ..Ruleset::default()
        };
        assert!(regelwerk.validieren().is_ok());
        assert!(!regelwerk.ist_bewertbar());
        assert_eq!(regelwerk.min_teilnehmer(2), 1);

        let gewertet = Ruleset {
            solo: true,
            ..Ruleset::default()
        };
        assert!(gewertet.validieren().is_err());
    }

    #[test]
    fn fehlende_felder_nutzen_standardwerte() {
        let regelwerk: Ruleset = serde_json::from_str(r#"{"goal": "mega_satan"}"#).unwrap();
        assert_eq!(regelwerk.goal, RaceGoal::MegaSatan);
        assert_eq!(regelwerk.format, RaceFormat::Unseeded);
        assert!(regelwerk.ranked);
    }
}
