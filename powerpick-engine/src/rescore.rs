use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::Serialize;

use powerpick_db::models::{validate_draw, ComboKey};
use powerpick_db::source::DrawSource;

use crate::assistants::explain::{explain, Explanation};
use crate::assistants::AssistantId;
use crate::context::check_windows;
use crate::engine::RecommendationEngine;
use crate::error::{EngineError, Result};
use crate::guard::{BlockReason, DuplicateGuard, Verdict};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RescoreReport {
    pub target_date: NaiveDate,
    pub whites: [u8; 5],
    pub powerball: u8,
    pub key: String,
    pub is_historical: bool,
    pub valid: bool,
    pub near_duplicate: Option<BlockReason>,
    pub results: BTreeMap<AssistantId, Explanation>,
}

/// Évalue une grille arbitraire sous chaque assistant.
pub fn rescore(
    engine: &RecommendationEngine,
    source: &dyn DrawSource,
    date: NaiveDate,
    windows: &[usize],
    assistant_ids: Option<&[AssistantId]>,
    whites: [u8; 5],
    powerball: u8,
) -> Result<RescoreReport> {
    validate_draw(&whites, powerball).map_err(|e| EngineError::InvalidCombo(e.to_string()))?;
    check_windows(windows)?;

    let mut sorted = whites;
    sorted.sort_unstable();
    let key = ComboKey::new(&sorted, powerball);

    let guard = engine.config().guard;
    let prepared = engine.prepare(source, date, windows, guard.lookback)?;
    let ctx = &prepared.ctx;
    let is_historical = ctx.is_historical(&key);
    let near_duplicate = match DuplicateGuard::new(ctx, guard).check_combo(&sorted, powerball) {
        Verdict::Blocked(reason) => Some(reason),
        Verdict::Accept => None,
    };

    let ids = AssistantId::resolve(assistant_ids);
    let assistants = engine.registry().build(&ids, &prepared.book)?;
    let results = assistants
        .iter()
        .map(|a| (a.id, explain(a, ctx, &sorted, powerball)))
        .collect();

    log::debug!("Rescore {} pour le {} : historique={}", key, date, is_historical);

    Ok(RescoreReport {
        target_date: date,
        whites: sorted,
        powerball,
        key: key.to_string(),
        is_historical,
        valid: !is_historical,
        near_duplicate,
        results,
    })
}
