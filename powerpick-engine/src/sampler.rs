use chrono::{Datelike, NaiveDate};
use rand::distr::weighted::WeightedIndex;
use rand::prelude::Distribution;
use rand::rngs::StdRng;
use rand::seq::{IndexedRandom, SliceRandom};
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use powerpick_db::models::{ComboKey, Draw, Pool};

use crate::assistants::{Assistant, AssistantId};
use crate::error::{EngineError, Result};

/// Seuils des contraintes « hautes » / « basses ».
pub const HIGH_FROM: u8 = 50;
pub const LOW_UPTO: u8 = 20;

/// Graine par défaut : la date cible au format YYYYMMDD.
pub fn date_seed(date: NaiveDate) -> u64 {
    let y = date.year().max(0) as u64;
    y * 10_000 + date.month() as u64 * 100 + date.day() as u64
}

/// Graine propre à un assistant, stable quel que soit le filtre d'assistants.
pub fn assistant_seed(seed: u64, id: AssistantId) -> u64 {
    seed.wrapping_add(id.ordinal().wrapping_mul(7919))
}

pub fn assistant_rng(seed: u64, id: AssistantId) -> StdRng {
    StdRng::seed_from_u64(assistant_seed(seed, id))
}

/// Contraintes telles que reçues.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct Constraints {
    pub fixed_first: Option<u8>,
    pub fixed_numbers: Vec<u8>,
    pub exclude_numbers: Vec<u8>,
    pub fixed_powerball: Option<u8>,
    pub exclude_powerballs: Vec<u8>,
    pub whites_min: Option<u8>,
    pub whites_max: Option<u8>,
    /// Nombre minimal de blanches ≥ 50.
    pub min_high: Option<usize>,
    /// Nombre minimal de blanches ≤ 20.
    pub min_low: Option<usize>,
    pub max_overlap_last_draw: Option<usize>,
    pub pb_not_in_last_n: Option<usize>,
}

impl Constraints {
    pub fn is_empty(&self) -> bool {
        *self == Constraints::default()
    }

    /// Vérifie la cohérence et prépare les ensembles utilisés au tirage.
    /// `recent_desc` : tirages récents, plus récent en premier.
    pub fn resolve(&self, recent_desc: &[Draw]) -> Result<ConstraintSet> {
        let white_range = Pool::Whites.size() as u8;
        let pb_range = Pool::Powerball.size() as u8;

        let check_white = |n: u8, what: &str| -> Result<()> {
            if Pool::Whites.contains(n) {
                Ok(())
            } else {
                Err(EngineError::constraint(format!("{} {} hors limites (1-{})", what, n, white_range)))
            }
        };

        let mut locked: Vec<u8> = Vec::with_capacity(5);
        if let Some(first) = self.fixed_first {
            check_white(first, "fixed_first")?;
            locked.push(first);
        }
        for &n in &self.fixed_numbers {
            check_white(n, "fixed_numbers")?;
            if !locked.contains(&n) {
                locked.push(n);
            }
        }
        if locked.len() > Pool::Whites.pick_count() {
            return Err(EngineError::constraint(format!(
                "{} blanches fixées, 5 au maximum",
                locked.len()
            )));
        }

        let mut excluded = vec![false; Pool::Whites.size()];
        for &n in &self.exclude_numbers {
            check_white(n, "exclude_numbers")?;
            excluded[(n - 1) as usize] = true;
        }
        if let Some(&n) = locked.iter().find(|&&n| excluded[(n - 1) as usize]) {
            return Err(EngineError::constraint(format!("{} est à la fois fixé et exclu", n)));
        }

        let lo = self.whites_min.unwrap_or(1);
        let hi = self.whites_max.unwrap_or(white_range);
        check_white(lo, "whites_min")?;
        check_white(hi, "whites_max")?;
        if lo > hi {
            return Err(EngineError::constraint(format!("whites_min {} > whites_max {}", lo, hi)));
        }
        if let Some(&n) = locked.iter().find(|&&n| n < lo || n > hi) {
            return Err(EngineError::constraint(format!(
                "blanche fixée {} hors de l'intervalle [{}, {}]",
                n, lo, hi
            )));
        }

        let eligible: Vec<u8> = (lo..=hi).filter(|&n| !excluded[(n - 1) as usize]).collect();
        if eligible.len() < Pool::Whites.pick_count() {
            return Err(EngineError::constraint(format!(
                "seulement {} blanche(s) éligible(s), 5 nécessaires",
                eligible.len()
            )));
        }

        let min_high = self.min_high.unwrap_or(0);
        let min_low = self.min_low.unwrap_or(0);
        if min_high + min_low > Pool::Whites.pick_count() {
            return Err(EngineError::constraint(format!(
                "min_high ({}) + min_low ({}) dépasse 5",
                min_high, min_low
            )));
        }
        if eligible.iter().filter(|&&n| n >= HIGH_FROM).count() < min_high {
            return Err(EngineError::constraint(format!("pas assez de blanches ≥ {} pour min_high", HIGH_FROM)));
        }
        if eligible.iter().filter(|&&n| n <= LOW_UPTO).count() < min_low {
            return Err(EngineError::constraint(format!("pas assez de blanches ≤ {} pour min_low", LOW_UPTO)));
        }

        let last_whites: Vec<u8> = recent_desc.first().map(|d| d.whites.to_vec()).unwrap_or_default();
        if let Some(max_overlap) = self.max_overlap_last_draw {
            let locked_overlap = locked.iter().filter(|n| last_whites.contains(n)).count();
            if locked_overlap > max_overlap {
                return Err(EngineError::constraint(format!(
                    "les blanches fixées recoupent déjà {} numéros du dernier tirage (max {})",
                    locked_overlap, max_overlap
                )));
            }
        }

        let mut pb_allowed = vec![true; Pool::Powerball.size()];
        for &pb in &self.exclude_powerballs {
            if !Pool::Powerball.contains(pb) {
                return Err(EngineError::constraint(format!(
                    "exclude_powerballs {} hors limites (1-{})",
                    pb, pb_range
                )));
            }
            pb_allowed[(pb - 1) as usize] = false;
        }

        let recent_pbs: Vec<u8> = match self.pb_not_in_last_n {
            Some(n) if n > 0 => recent_desc.iter().take(n).map(|d| d.powerball).collect(),
            _ => Vec::new(),
        };

        if let Some(pb) = self.fixed_powerball {
            if !Pool::Powerball.contains(pb) {
                return Err(EngineError::constraint(format!(
                    "fixed_powerball {} hors limites (1-{})",
                    pb, pb_range
                )));
            }
            if !pb_allowed[(pb - 1) as usize] {
                return Err(EngineError::constraint(format!("powerball {} à la fois fixé et exclu", pb)));
            }
            if recent_pbs.contains(&pb) {
                return Err(EngineError::constraint(format!(
                    "powerball {} sorti dans les {} derniers tirages",
                    pb,
                    recent_pbs.len()
                )));
            }
        }
        if !pb_allowed.iter().any(|&a| a) {
            return Err(EngineError::constraint("tous les powerballs sont exclus"));
        }
        let pb_survivors = (1..=pb_range)
            .filter(|&pb| pb_allowed[(pb - 1) as usize] && !recent_pbs.contains(&pb))
            .count();
        if pb_survivors == 0 {
            return Err(EngineError::constraint(
                "aucun powerball autorisé hors des derniers tirages",
            ));
        }

        Ok(ConstraintSet {
            fixed_first: self.fixed_first,
            locked,
            excluded,
            eligible,
            fixed_powerball: self.fixed_powerball,
            pb_allowed,
            min_high,
            min_low,
            max_overlap_last_draw: self.max_overlap_last_draw,
            last_whites,
            recent_pbs,
        })
    }
}

/// Contraintes validées, prêtes pour l'échantillonneur.
#[derive(Debug, Clone)]
pub struct ConstraintSet {
    pub fixed_first: Option<u8>,
    /// `fixed_first` en tête, puis les autres blanches fixées.
    pub locked: Vec<u8>,
    excluded: Vec<bool>,
    eligible: Vec<u8>,
    pub fixed_powerball: Option<u8>,
    pb_allowed: Vec<bool>,
    min_high: usize,
    min_low: usize,
    max_overlap_last_draw: Option<usize>,
    last_whites: Vec<u8>,
    recent_pbs: Vec<u8>,
}

impl ConstraintSet {
    pub fn is_excluded(&self, n: u8) -> bool {
        Pool::Whites.contains(n) && self.excluded[(n - 1) as usize]
    }

    pub fn is_eligible(&self, n: u8) -> bool {
        self.eligible.binary_search(&n).is_ok()
    }

    /// Motif de rejet d'un candidat par les filtres de forme, `None` s'il passe.
    pub fn rejects(&self, candidate: &Candidate) -> Option<&'static str> {
        let whites = &candidate.whites;
        if self.min_high > 0 && whites.iter().filter(|&&n| n >= HIGH_FROM).count() < self.min_high {
            return Some("min_high");
        }
        if self.min_low > 0 && whites.iter().filter(|&&n| n <= LOW_UPTO).count() < self.min_low {
            return Some("min_low");
        }
        if let Some(max) = self.max_overlap_last_draw {
            if whites.iter().filter(|n| self.last_whites.contains(n)).count() > max {
                return Some("max_overlap_last_draw");
            }
        }
        if self.recent_pbs.contains(&candidate.powerball) {
            return Some("pb_not_in_last_n");
        }
        None
    }
}

/// Grille candidate : `whites[0]` vaut `fixed_first` s'il est fixé, le
/// reste est croissant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Candidate {
    pub whites: [u8; 5],
    pub powerball: u8,
}

impl Candidate {
    pub fn key(&self) -> ComboKey {
        ComboKey::new(&self.whites, self.powerball)
    }

    pub fn overlap(&self, other: &[u8]) -> usize {
        self.whites.iter().filter(|n| other.contains(n)).count()
    }
}

/// Tire une grille sous contraintes à partir des distributions d'un assistant.
pub struct ComboSampler<'a> {
    assistant: &'a Assistant,
    rules: &'a ConstraintSet,
}

impl<'a> ComboSampler<'a> {
    pub fn new(assistant: &'a Assistant, rules: &'a ConstraintSet) -> Self {
        Self { assistant, rules }
    }

    pub fn sample(&self, rng: &mut StdRng) -> Result<Candidate> {
        let pick = Pool::Whites.pick_count();
        let mut chosen: Vec<u8> = self.rules.locked.clone();

        while chosen.len() < pick {
            let dist = self.assistant.white_dist_for_slot(chosen.len());
            let weights: Vec<f64> = (1..=Pool::Whites.size() as u8)
                .map(|n| {
                    if self.rules.is_eligible(n) && !chosen.contains(&n) {
                        dist[(n - 1) as usize]
                    } else {
                        0.0
                    }
                })
                .collect();
            match WeightedIndex::new(&weights) {
                Ok(index) => chosen.push((index.sample(rng) + 1) as u8),
                Err(_) => break,
            }
        }

        if chosen.len() < pick {
            // plus de masse : complément uniforme sur tout le domaine hors exclusions
            let mut rest: Vec<u8> = (1..=Pool::Whites.size() as u8)
                .filter(|&n| !self.rules.is_excluded(n) && !chosen.contains(&n))
                .collect();
            rest.shuffle(rng);
            let missing = pick - chosen.len();
            chosen.extend(rest.into_iter().take(missing));
        }

        if chosen.len() < pick {
            return Err(EngineError::constraint("pas assez de blanches disponibles"));
        }

        let powerball = self.sample_powerball(rng)?;
        Ok(Candidate {
            whites: self.order(&chosen),
            powerball,
        })
    }

    fn sample_powerball(&self, rng: &mut StdRng) -> Result<u8> {
        if let Some(pb) = self.rules.fixed_powerball {
            return Ok(pb);
        }
        let weights: Vec<f64> = self
            .assistant
            .dist_powerball
            .iter()
            .zip(&self.rules.pb_allowed)
            .map(|(&w, &allowed)| if allowed { w } else { 0.0 })
            .collect();
        if let Ok(index) = WeightedIndex::new(&weights) {
            return Ok((index.sample(rng) + 1) as u8);
        }
        let allowed: Vec<u8> = (1..=Pool::Powerball.size() as u8)
            .filter(|&pb| self.rules.pb_allowed[(pb - 1) as usize])
            .collect();
        allowed
            .choose(rng)
            .copied()
            .ok_or_else(|| EngineError::constraint("tous les powerballs sont exclus"))
    }

    fn order(&self, chosen: &[u8]) -> [u8; 5] {
        let mut whites = [0u8; 5];
        match self.rules.fixed_first {
            Some(first) => {
                let mut rest: Vec<u8> = chosen.iter().copied().filter(|&n| n != first).collect();
                rest.sort_unstable();
                whites[0] = first;
                whites[1..].copy_from_slice(&rest[..4]);
            }
            None => {
                whites.copy_from_slice(&chosen[..5]);
                whites.sort_unstable();
            }
        }
        whites
    }
}
