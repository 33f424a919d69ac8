use chrono::NaiveDate;
use serde::Serialize;

use powerpick_db::models::ComboKey;

use crate::config::GuardConfig;
use crate::context::Context;
use crate::sampler::Candidate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockRule {
    ExactHistorical,
    NearDuplicateHard,
    NearDuplicateSoft,
}

impl BlockRule {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockRule::ExactHistorical => "exact_historical",
            BlockRule::NearDuplicateHard => "near_duplicate_hard",
            BlockRule::NearDuplicateSoft => "near_duplicate_soft",
        }
    }
}

/// Trace d'un candidat écarté.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockReason {
    pub rule: BlockRule,
    pub key: String,
    /// Tirage déclencheur (absent pour une correspondance exacte hors fenêtre).
    pub draw_date: Option<NaiveDate>,
    pub overlap: usize,
    pub same_powerball: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Accept,
    Blocked(BlockReason),
}

impl Verdict {
    pub fn is_accept(&self) -> bool {
        matches!(self, Verdict::Accept)
    }
}

/// Rejette les grilles déjà sorties ou trop proches d'un tirage récent.
pub struct DuplicateGuard<'a> {
    ctx: &'a Context,
    config: GuardConfig,
}

impl<'a> DuplicateGuard<'a> {
    pub fn new(ctx: &'a Context, config: GuardConfig) -> Self {
        Self { ctx, config }
    }

    pub fn check(&self, candidate: &Candidate) -> Verdict {
        self.check_combo(&candidate.whites, candidate.powerball)
    }

    pub fn check_combo(&self, whites: &[u8; 5], powerball: u8) -> Verdict {
        let key = ComboKey::new(whites, powerball);
        // l'exactitude est vérifiée même garde désactivée
        if self.ctx.is_historical(&key) {
            let draw_date = self
                .ctx
                .last_draws_desc
                .iter()
                .find(|d| d.key() == key)
                .map(|d| d.date);
            return Verdict::Blocked(BlockReason {
                rule: BlockRule::ExactHistorical,
                key: key.to_string(),
                draw_date,
                overlap: 5,
                same_powerball: true,
            });
        }
        if !self.config.enabled {
            return Verdict::Accept;
        }

        let mut strongest: Option<BlockReason> = None;
        for draw in self.ctx.last_draws_desc.iter().take(self.config.lookback) {
            let overlap = whites.iter().filter(|n| draw.whites.contains(n)).count();
            let same_powerball = draw.powerball == powerball;
            let rule = if overlap >= self.config.hard_overlap {
                BlockRule::NearDuplicateHard
            } else if overlap >= self.config.soft_overlap && same_powerball {
                BlockRule::NearDuplicateSoft
            } else {
                continue;
            };
            let stronger = match &strongest {
                None => true,
                Some(best) => (overlap, same_powerball) > (best.overlap, best.same_powerball),
            };
            if stronger {
                strongest = Some(BlockReason {
                    rule,
                    key: key.to_string(),
                    draw_date: Some(draw.date),
                    overlap,
                    same_powerball,
                });
            }
        }

        match strongest {
            Some(reason) => Verdict::Blocked(reason),
            None => Verdict::Accept,
        }
    }
}
