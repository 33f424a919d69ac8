use std::collections::BTreeMap;

use powerpick_db::models::{Draw, Pool};

use crate::config::EngineConfig;
use crate::context::Context;
use crate::error::{EngineError, Result};
use crate::signals::{exponential_recency_weights, momentum, window_freq};
use crate::weights::{layer, layer_counts, merge, uniform};

use super::{Assistant, AssistantId, SignalKind};

/// Tous les signaux d'un contexte, calculés une seule fois et partagés par
/// les recettes. Chaque vecteur a déjà son plancher à 1.
#[derive(Debug, Clone)]
pub struct SignalBook {
    pub base: Vec<f64>,
    pub recency: Vec<f64>,
    pub overdue: Vec<f64>,
    pub markov: Vec<f64>,
    pub momentum: Vec<f64>,
    pub positional: Vec<f64>,
    pub slots: Vec<Vec<f64>>,
    pub same_mmdd: Vec<f64>,
    pub same_weekday: Vec<f64>,
    pub base_pb: Vec<f64>,
    pub recency_pb: Vec<f64>,
    pub same_mmdd_pb: Vec<f64>,
    pub same_weekday_pb: Vec<f64>,
}

impl SignalBook {
    pub fn build(ctx: &Context, config: &EngineConfig) -> Self {
        let reference = ctx.reference_window();
        let window_draws: &[Draw] = &ctx.last_draws_desc[..reference.draws_used];

        let base = layer_counts(&reference.frequency.counts_whites, 1.0);
        let base_pb = layer_counts(&reference.frequency.counts_powerball, 1.0);

        let recency = layer(
            &exponential_recency_weights(window_draws, config.recency_half_life, Pool::Whites),
            1.0,
        );
        let recency_pb = layer(
            &exponential_recency_weights(window_draws, config.recency_half_life, Pool::Powerball),
            1.0,
        );

        let gaps: Vec<f64> = reference.white_gaps.iter().map(|&g| g as f64).collect();
        let overdue = layer(&gaps, config.overdue_multiplier);

        let last = ctx.last_draw();
        let follow: Vec<f64> = (1..=Pool::Whites.size() as u8)
            .map(|x| last.whites.iter().map(|&y| ctx.transitions.follow_rate(y, x)).sum())
            .collect();
        let markov = layer(&follow, config.transition_scale);

        let momentum = layer(
            &momentum(ctx.signal_draws(), config.momentum_short, config.momentum_long),
            config.momentum_scale,
        );

        // positions calculées sur toute la profondeur des signaux
        let deep = window_freq(ctx.signal_draws());
        let positional = layer_counts(&deep.counts_whites, config.positional_scale);
        let slots = deep
            .counts_by_position
            .iter()
            .map(|counts| merge(&[&layer_counts(counts, config.positional_scale), &base]))
            .collect();

        let mmdd = window_freq(&ctx.same_mmdd);
        let weekday = window_freq(&ctx.same_weekday);

        Self {
            base,
            recency,
            overdue,
            markov,
            momentum,
            positional,
            slots,
            same_mmdd: layer_counts(&mmdd.counts_whites, 1.0),
            same_weekday: layer_counts(&weekday.counts_whites, 1.0),
            base_pb,
            recency_pb,
            same_mmdd_pb: layer_counts(&mmdd.counts_powerball, 1.0),
            same_weekday_pb: layer_counts(&weekday.counts_powerball, 1.0),
        }
    }

    fn white(&self, kind: SignalKind) -> (SignalKind, Vec<f64>) {
        let v = match kind {
            SignalKind::BaseFreq => &self.base,
            SignalKind::Recency => &self.recency,
            SignalKind::Overdue => &self.overdue,
            SignalKind::Markov => &self.markov,
            SignalKind::Momentum => &self.momentum,
            SignalKind::Positional => &self.positional,
            SignalKind::SameMmdd => &self.same_mmdd,
            SignalKind::SameWeekday => &self.same_weekday,
            SignalKind::Uniform => return (kind, uniform(Pool::Whites)),
        };
        (kind, v.clone())
    }

    fn powerball(&self, kind: SignalKind) -> (SignalKind, Vec<f64>) {
        let v = match kind {
            SignalKind::BaseFreq => &self.base_pb,
            SignalKind::Recency => &self.recency_pb,
            SignalKind::SameMmdd => &self.same_mmdd_pb,
            SignalKind::SameWeekday => &self.same_weekday_pb,
            _ => return (SignalKind::Uniform, uniform(Pool::Powerball)),
        };
        (kind, v.clone())
    }

    /// Assemble un assistant dont les poids sont la somme des signaux listés.
    fn blend(
        &self,
        id: AssistantId,
        whites: &[SignalKind],
        powerball: &[SignalKind],
    ) -> Assistant {
        let signals_whites: Vec<(SignalKind, Vec<f64>)> = whites.iter().map(|&k| self.white(k)).collect();
        let signals_powerball: Vec<(SignalKind, Vec<f64>)> =
            powerball.iter().map(|&k| self.powerball(k)).collect();

        let w_refs: Vec<&[f64]> = signals_whites.iter().map(|(_, v)| v.as_slice()).collect();
        let pb_refs: Vec<&[f64]> = signals_powerball.iter().map(|(_, v)| v.as_slice()).collect();

        Assistant::new(
            id,
            merge(&w_refs),
            merge(&pb_refs),
            rationale_tags(id).to_vec(),
            signals_whites,
            signals_powerball,
        )
    }
}

pub fn rationale_tags(id: AssistantId) -> &'static [&'static str] {
    match id {
        AssistantId::HotColdStatistician => &["hot", "cold", "recency", "overdue", "shape_filter"],
        AssistantId::SequenceHunter => &[
            "continuity",
            "active_chains",
            "markov_empirical",
            "momentum",
            "shape_filter",
        ],
        AssistantId::PositionalTactician => &["positional", "slot_sampling", "shape_filter"],
        AssistantId::DateHistorian => &["same_mmdd", "same_weekday", "seasonality", "shape_filter"],
        AssistantId::ProbabilityPurist => &["monte_carlo", "acceptance_filter", "neutral"],
        AssistantId::DiversityOptimizer => &["pool_then_select", "max_diversity", "blend_signals", "shape_filter"],
    }
}

const PB_DEFAULT: [SignalKind; 2] = [SignalKind::BaseFreq, SignalKind::Recency];
const PB_DATED: [SignalKind; 4] = [
    SignalKind::BaseFreq,
    SignalKind::SameMmdd,
    SignalKind::SameWeekday,
    SignalKind::Recency,
];

fn hot_cold(book: &SignalBook) -> Assistant {
    book.blend(
        AssistantId::HotColdStatistician,
        &[SignalKind::BaseFreq, SignalKind::Recency, SignalKind::Overdue],
        &PB_DEFAULT,
    )
}

fn sequence_hunter(book: &SignalBook) -> Assistant {
    book.blend(
        AssistantId::SequenceHunter,
        &[
            SignalKind::BaseFreq,
            SignalKind::Markov,
            SignalKind::Momentum,
            SignalKind::Recency,
        ],
        &PB_DEFAULT,
    )
}

fn positional_tactician(book: &SignalBook) -> Assistant {
    book.blend(
        AssistantId::PositionalTactician,
        &[SignalKind::Positional, SignalKind::BaseFreq],
        &PB_DEFAULT,
    )
    .with_slots(book.slots.clone())
}

fn date_historian(book: &SignalBook) -> Assistant {
    book.blend(
        AssistantId::DateHistorian,
        &[
            SignalKind::BaseFreq,
            SignalKind::SameMmdd,
            SignalKind::SameWeekday,
            SignalKind::Recency,
        ],
        &PB_DATED,
    )
}

fn probability_purist(book: &SignalBook) -> Assistant {
    book.blend(
        AssistantId::ProbabilityPurist,
        &[SignalKind::Uniform],
        &[SignalKind::Uniform],
    )
}

fn diversity_optimizer(book: &SignalBook) -> Assistant {
    book.blend(
        AssistantId::DiversityOptimizer,
        &[
            SignalKind::BaseFreq,
            SignalKind::Recency,
            SignalKind::Overdue,
            SignalKind::Markov,
            SignalKind::Momentum,
            SignalKind::Positional,
            SignalKind::SameMmdd,
            SignalKind::SameWeekday,
        ],
        &PB_DATED,
    )
}

pub type Recipe = fn(&SignalBook) -> Assistant;

/// Table identifiant -> recette.
pub struct AssistantRegistry {
    recipes: BTreeMap<AssistantId, Recipe>,
}

impl AssistantRegistry {
    pub fn standard() -> Self {
        let mut recipes: BTreeMap<AssistantId, Recipe> = BTreeMap::new();
        recipes.insert(AssistantId::HotColdStatistician, hot_cold);
        recipes.insert(AssistantId::SequenceHunter, sequence_hunter);
        recipes.insert(AssistantId::PositionalTactician, positional_tactician);
        recipes.insert(AssistantId::DateHistorian, date_historian);
        recipes.insert(AssistantId::ProbabilityPurist, probability_purist);
        recipes.insert(AssistantId::DiversityOptimizer, diversity_optimizer);
        Self { recipes }
    }

    pub fn ids(&self) -> Vec<AssistantId> {
        self.recipes.keys().copied().collect()
    }

    pub fn build_one(&self, id: AssistantId, book: &SignalBook) -> Result<Assistant> {
        let recipe = self
            .recipes
            .get(&id)
            .ok_or_else(|| EngineError::constraint(format!("assistant non enregistré : {}", id)))?;
        Ok(recipe(book))
    }

    pub fn build(&self, ids: &[AssistantId], book: &SignalBook) -> Result<Vec<Assistant>> {
        ids.iter().map(|&id| self.build_one(id, book)).collect()
    }
}

impl Default for AssistantRegistry {
    fn default() -> Self {
        Self::standard()
    }
}
