use std::collections::BTreeMap;

use chrono::NaiveDate;
use rand::distr::weighted::WeightedIndex;
use rand::prelude::Distribution;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;

use powerpick_db::models::{ComboKey, Pool};
use powerpick_db::source::DrawSource;

use crate::assistants::explain::{explain, Explanation};
use crate::assistants::AssistantId;
use crate::config::GuardConfig;
use crate::context::Context;
use crate::engine::{Prepared, RecommendReport, RecommendRequest, RecommendationEngine};
use crate::error::{EngineError, Result};
use crate::guard::{BlockReason, DuplicateGuard, Verdict};
use crate::weights::ranked;

/// Votes par numéro, indexés par `n - 1`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tally {
    pub whites: Vec<u32>,
    pub powerball: Vec<u32>,
}

impl Tally {
    pub fn from_report(report: &RecommendReport) -> Self {
        let mut whites = vec![0u32; Pool::Whites.size()];
        let mut powerball = vec![0u32; Pool::Powerball.size()];
        for s in report.all_suggestions() {
            for &n in &s.whites {
                whites[(n - 1) as usize] += 1;
            }
            powerball[(s.powerball - 1) as usize] += 1;
        }
        Self { whites, powerball }
    }

    pub fn total_whites(&self) -> u32 {
        self.whites.iter().sum()
    }

    pub fn white_votes(&self, n: u8) -> u32 {
        self.whites[(n - 1) as usize]
    }

    pub fn powerball_votes(&self, n: u8) -> u32 {
        self.powerball[(n - 1) as usize]
    }
}

/// Pool pondéré dont le poids d'un numéro tiré décroît à chaque tirage.
#[derive(Debug, Clone)]
pub struct VotePool {
    numbers: Vec<u8>,
    weights: Vec<f64>,
    decay: f64,
    floor: f64,
}

impl VotePool {
    /// Les `limit` numéros les plus votés (votes > 0).
    pub fn top(votes: &[u32], limit: usize, decay: f64, floor: f64) -> Self {
        let as_f64: Vec<f64> = votes.iter().map(|&v| v as f64).collect();
        let (numbers, weights): (Vec<u8>, Vec<f64>) = ranked(&as_f64)
            .into_iter()
            .filter(|(_, w)| *w > 0.0)
            .take(limit)
            .unzip();
        Self {
            numbers,
            weights,
            decay,
            floor,
        }
    }

    pub fn len(&self) -> usize {
        self.numbers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.numbers.is_empty()
    }

    pub fn numbers(&self) -> &[u8] {
        &self.numbers
    }

    pub fn draw(&mut self, rng: &mut StdRng) -> Option<u8> {
        let index = WeightedIndex::new(&self.weights).ok()?.sample(rng);
        let w = self.weights[index];
        self.weights[index] = (w * self.decay).max(self.floor);
        Some(self.numbers[index])
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConsensusCombo {
    pub status: &'static str,
    pub target_date: NaiveDate,
    pub seed: u64,
    pub whites: [u8; 5],
    pub powerball: u8,
    pub score: f64,
    /// Portance moyenne de chaque signal sur les assistants qui l'emploient.
    pub signals_used: BTreeMap<String, f64>,
    /// Score de la grille sous chaque assistant.
    pub assistant_scores: BTreeMap<String, f64>,
    pub why: Vec<String>,
    pub rationale_tags: Vec<String>,
    pub votes_whites: Vec<u32>,
    pub votes_powerball: u32,
    pub total_suggestions: usize,
    pub mutations: usize,
    /// Faux si seule la correspondance exacte a pu être évitée.
    pub guard_passed: bool,
    pub near_duplicate: Option<BlockReason>,
}

pub fn build_consensus(
    engine: &RecommendationEngine,
    source: &dyn DrawSource,
    request: &RecommendRequest,
) -> Result<ConsensusCombo> {
    let (report, prepared) = engine.recommend_prepared(source, request)?;
    let total = report.accepted();
    if total == 0 {
        log::warn!("Consensus {} : aucune suggestion acceptée", report.target_date);
        return Err(EngineError::NoVotes);
    }
    let guard_config = request.guard.unwrap_or(engine.config().guard);
    // rapport servi par le cache : le contexte est reconstruit
    let prepared = match prepared {
        Some(p) => p,
        None => engine.prepare(source, report.target_date, &request.windows, guard_config.lookback)?,
    };
    combine(engine, &report, &prepared, guard_config)
}

fn combine(
    engine: &RecommendationEngine,
    report: &RecommendReport,
    prepared: &Prepared,
    guard_config: GuardConfig,
) -> Result<ConsensusCombo> {
    let config = engine.config();
    let tally = Tally::from_report(report);
    let mut rng = StdRng::seed_from_u64(report.seed);

    let mut white_pool = VotePool::top(
        &tally.whites,
        config.consensus_top_whites,
        config.consensus_decay,
        config.consensus_decay_floor,
    );
    let mut pb_pool = VotePool::top(
        &tally.powerball,
        config.consensus_top_powerballs,
        config.consensus_decay,
        config.consensus_decay_floor,
    );
    if white_pool.is_empty() || pb_pool.is_empty() {
        return Err(EngineError::NoVotes);
    }

    let mut chosen: Vec<u8> = Vec::with_capacity(5);
    let max_rounds = white_pool.len() * 10 + 50;
    for _ in 0..max_rounds {
        if chosen.len() == 5 {
            break;
        }
        if let Some(n) = white_pool.draw(&mut rng) {
            if !chosen.contains(&n) {
                chosen.push(n);
            }
        }
    }
    // complément par rang de vote puis par numéro
    let fill: Vec<u8> = white_pool
        .numbers()
        .iter()
        .copied()
        .chain(1..=Pool::Whites.size() as u8)
        .collect();
    for n in fill {
        if chosen.len() == 5 {
            break;
        }
        if !chosen.contains(&n) {
            chosen.push(n);
        }
    }
    let powerball = pb_pool.draw(&mut rng).ok_or(EngineError::NoVotes)?;

    let mut whites = [0u8; 5];
    whites.copy_from_slice(&chosen[..5]);
    whites.sort_unstable();

    let ctx = &prepared.ctx;
    let guard = DuplicateGuard::new(ctx, guard_config);
    let mut mutations = 0usize;
    let mut near_duplicate = None;
    let mut guard_passed = true;

    if let Verdict::Blocked(first) = guard.check_combo(&whites, powerball) {
        log::debug!("Consensus bloqué ({}), mutations", first.rule.as_str());
        let mut accepted = false;
        while mutations < config.consensus_mutations {
            mutations += 1;
            let mut candidate = whites;
            let slot = rng.random_range(0..5);
            let replacement = white_pool.numbers()[rng.random_range(0..white_pool.len())];
            if candidate.contains(&replacement) {
                continue;
            }
            candidate[slot] = replacement;
            candidate.sort_unstable();
            if guard.check_combo(&candidate, powerball).is_accept() {
                whites = candidate;
                accepted = true;
                break;
            }
        }
        if !accepted {
            let (fixed, verdict) = repair(&whites, powerball, &tally, &guard, ctx);
            whites = fixed;
            if let Verdict::Blocked(reason) = verdict {
                guard_passed = false;
                near_duplicate = Some(reason);
            }
        }
    }

    let key = ComboKey::new(&whites, powerball);
    if ctx.is_historical(&key) {
        return Err(EngineError::InvalidCombo(format!("consensus {} déjà sorti", key)));
    }

    let ids: Vec<_> = report.results.keys().copied().collect();
    let assistants = engine.registry().build(&ids, &prepared.book)?;
    let explanations: Vec<(AssistantId, Explanation)> = assistants
        .iter()
        .map(|a| (a.id, explain(a, ctx, &whites, powerball)))
        .collect();

    let assistant_scores: BTreeMap<String, f64> = explanations
        .iter()
        .map(|(id, e)| (id.as_str().to_string(), e.score))
        .collect();
    let mean_score = if assistant_scores.is_empty() {
        0.0
    } else {
        assistant_scores.values().sum::<f64>() / assistant_scores.len() as f64
    };

    let mut lifts: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    for (_, e) in &explanations {
        for (name, lift) in &e.signals_used {
            lifts.entry(name.clone()).or_default().push(*lift);
        }
    }
    let signals_used: BTreeMap<String, f64> = lifts
        .into_iter()
        .map(|(name, v)| {
            let mean = v.iter().sum::<f64>() / v.len() as f64;
            (name, round4(mean))
        })
        .collect();

    let votes_whites: Vec<u32> = whites.iter().map(|&n| tally.white_votes(n)).collect();
    let votes_powerball = tally.powerball_votes(powerball);
    let mut why = vec![
        format!(
            "{} suggestions de {} assistant(s)",
            report.accepted(),
            report.results.len()
        ),
        format!(
            "Votes : {}",
            whites
                .iter()
                .zip(&votes_whites)
                .map(|(n, v)| format!("{} ({})", n, v))
                .collect::<Vec<_>>()
                .join(", ")
        ),
        format!("Powerball {} ({} votes)", powerball, votes_powerball),
    ];
    let best = explanations
        .iter()
        .max_by(|a, b| a.1.score.total_cmp(&b.1.score));
    if let Some((id, e)) = best {
        why.extend(e.why.iter().map(|line| format!("{} : {}", id.label(), line)));
    }
    if mutations > 0 {
        why.push(format!("{} mutation(s) pour écarter un doublon", mutations));
    }

    Ok(ConsensusCombo {
        status: "ok",
        target_date: report.target_date,
        seed: report.seed,
        whites,
        powerball,
        score: round4(mean_score),
        signals_used,
        assistant_scores,
        why,
        rationale_tags: vec!["consensus".to_string(), "vote_ensemble".to_string()],
        votes_whites,
        votes_powerball,
        total_suggestions: report.accepted(),
        mutations,
        guard_passed,
        near_duplicate,
    })
}

/// Remplacement déterministe de la blanche la moins votée jusqu'à obtenir
/// une grille acceptée, à défaut au moins absente de l'historique.
fn repair(
    whites: &[u8; 5],
    powerball: u8,
    tally: &Tally,
    guard: &DuplicateGuard<'_>,
    ctx: &Context,
) -> ([u8; 5], Verdict) {
    let mut slots: Vec<usize> = (0..5).collect();
    slots.sort_by_key(|&i| (tally.white_votes(whites[i]), whites[i]));

    let as_f64: Vec<f64> = tally.whites.iter().map(|&v| v as f64).collect();
    let by_votes: Vec<u8> = ranked(&as_f64).into_iter().map(|(n, _)| n).collect();

    let mut fallback: Option<([u8; 5], Verdict)> = None;
    for &slot in &slots {
        for &n in &by_votes {
            if whites.contains(&n) {
                continue;
            }
            let mut candidate = *whites;
            candidate[slot] = n;
            candidate.sort_unstable();
            match guard.check_combo(&candidate, powerball) {
                Verdict::Accept => return (candidate, Verdict::Accept),
                blocked => {
                    if fallback.is_none() && !ctx.is_historical(&ComboKey::new(&candidate, powerball)) {
                        fallback = Some((candidate, blocked));
                    }
                }
            }
        }
    }
    let original = guard.check_combo(whites, powerball);
    fallback.unwrap_or((*whites, original))
}

fn round4(x: f64) -> f64 {
    (x * 10_000.0).round() / 10_000.0
}
