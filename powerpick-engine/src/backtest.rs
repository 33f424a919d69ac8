//! Rejoue le moteur sur des dates passées pour caractériser les assistants.
//! Chaque date ne voit que les tirages qui la précèdent.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use powerpick_db::models::Draw;
use powerpick_db::source::DrawSource;

use crate::assistants::AssistantId;
use crate::config::GuardConfig;
use crate::engine::{AssistantRun, RecommendRequest, RecommendationEngine};
use crate::error::{EngineError, Result};
use crate::sampler::Constraints;

pub const DEFAULT_LIMIT_DATES: usize = 30;
pub const MAX_LIMIT_DATES: usize = 120;
pub const DEFAULT_BASE_SEED: u64 = 1000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestRequest {
    pub start: NaiveDate,
    pub end: NaiveDate,
    #[serde(default)]
    pub windows: Vec<usize>,
    #[serde(default = "default_n")]
    pub n_suggestions: usize,
    #[serde(default = "default_limit")]
    pub limit_dates: usize,
    #[serde(default = "default_seed")]
    pub base_seed: u64,
    #[serde(default)]
    pub assistant_ids: Option<Vec<AssistantId>>,
    #[serde(default)]
    pub constraints: Constraints,
    #[serde(default)]
    pub guard: Option<GuardConfig>,
}

fn default_n() -> usize {
    5
}

fn default_limit() -> usize {
    DEFAULT_LIMIT_DATES
}

fn default_seed() -> u64 {
    DEFAULT_BASE_SEED
}

impl BacktestRequest {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            start,
            end,
            windows: Vec::new(),
            n_suggestions: default_n(),
            limit_dates: DEFAULT_LIMIT_DATES,
            base_seed: DEFAULT_BASE_SEED,
            assistant_ids: None,
            constraints: Constraints::default(),
            guard: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssistantDateRow {
    pub count: usize,
    pub avg_score: f64,
    pub internal_overlap: f64,
    /// Meilleur recoupement de blanches avec le tirage réel.
    pub best_match: usize,
    pub powerball_hits: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DateRow {
    pub date: NaiveDate,
    pub seed: u64,
    pub actual: Draw,
    pub assistants: BTreeMap<AssistantId, AssistantDateRow>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssistantSummary {
    pub dates: usize,
    pub avg_score: f64,
    pub avg_internal_overlap: f64,
    pub avg_suggestions: f64,
    pub avg_best_match: f64,
    pub powerball_hits: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BacktestReport {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub rows: Vec<DateRow>,
    /// Dates sans historique antérieur.
    pub skipped_dates: Vec<NaiveDate>,
    pub summary: BTreeMap<AssistantId, AssistantSummary>,
}

/// Recoupement moyen de blanches entre toutes les paires de suggestions.
pub fn internal_overlap(sets: &[[u8; 5]]) -> f64 {
    let mut total = 0usize;
    let mut pairs = 0usize;
    for i in 0..sets.len() {
        for j in (i + 1)..sets.len() {
            total += sets[i].iter().filter(|n| sets[j].contains(n)).count();
            pairs += 1;
        }
    }
    if pairs == 0 {
        0.0
    } else {
        total as f64 / pairs as f64
    }
}

fn date_row(run: &AssistantRun, actual: &Draw) -> AssistantDateRow {
    let whites: Vec<[u8; 5]> = run.suggestions.iter().map(|s| s.whites).collect();
    let count = run.suggestions.len();
    let avg_score = if count == 0 {
        0.0
    } else {
        run.suggestions.iter().map(|s| s.score()).sum::<f64>() / count as f64
    };
    AssistantDateRow {
        count,
        avg_score,
        internal_overlap: internal_overlap(&whites),
        best_match: whites
            .iter()
            .map(|w| w.iter().filter(|n| actual.whites.contains(n)).count())
            .max()
            .unwrap_or(0),
        powerball_hits: run.suggestions.iter().filter(|s| s.powerball == actual.powerball).count(),
    }
}

fn mean_of(rows: &[&AssistantDateRow], f: impl Fn(&AssistantDateRow) -> f64) -> f64 {
    if rows.is_empty() {
        return 0.0;
    }
    rows.iter().map(|&r| f(r)).sum::<f64>() / rows.len() as f64
}

fn summarize(rows: &[DateRow]) -> BTreeMap<AssistantId, AssistantSummary> {
    let mut per: BTreeMap<AssistantId, Vec<&AssistantDateRow>> = BTreeMap::new();
    for row in rows {
        for (id, r) in &row.assistants {
            per.entry(*id).or_default().push(r);
        }
    }
    per.into_iter()
        .map(|(id, rs)| {
            let summary = AssistantSummary {
                dates: rs.len(),
                avg_score: mean_of(&rs, |r| r.avg_score),
                avg_internal_overlap: mean_of(&rs, |r| r.internal_overlap),
                avg_suggestions: mean_of(&rs, |r| r.count as f64),
                avg_best_match: mean_of(&rs, |r| r.best_match as f64),
                powerball_hits: rs.iter().map(|r| r.powerball_hits).sum(),
            };
            (id, summary)
        })
        .collect()
}

pub fn run_backtest(
    engine: &RecommendationEngine,
    source: &dyn DrawSource,
    request: &BacktestRequest,
    progress: Option<&dyn Fn(usize, usize)>,
) -> Result<BacktestReport> {
    if request.start > request.end {
        return Err(EngineError::constraint(format!(
            "début {} après fin {}",
            request.start, request.end
        )));
    }
    let limit = request.limit_dates.clamp(1, MAX_LIMIT_DATES);

    let mut draws = source.draws_between(request.start, request.end)?;
    draws.reverse();
    draws.truncate(limit);
    if draws.is_empty() {
        return Err(EngineError::NoData);
    }

    log::info!(
        "Backtest {} -> {} : {} date(s)",
        request.start,
        request.end,
        draws.len()
    );

    let total = draws.len();
    let mut rows = Vec::with_capacity(total);
    let mut skipped_dates = Vec::new();

    for (i, actual) in draws.iter().enumerate() {
        let seed = request.base_seed.wrapping_add(i as u64);
        let run = RecommendRequest {
            date: Some(actual.date),
            windows: request.windows.clone(),
            n_suggestions: request.n_suggestions,
            bulk: false,
            seed: Some(seed),
            assistant_ids: request.assistant_ids.clone(),
            constraints: request.constraints.clone(),
            guard: request.guard,
        };
        match engine.recommend(source, &run) {
            Ok(report) => {
                let assistants = report
                    .results
                    .iter()
                    .map(|(id, r)| (*id, date_row(r, actual)))
                    .collect();
                rows.push(DateRow {
                    date: actual.date,
                    seed,
                    actual: actual.clone(),
                    assistants,
                });
            }
            Err(EngineError::NoData) => {
                log::debug!("Backtest {} : pas d'historique antérieur", actual.date);
                skipped_dates.push(actual.date);
            }
            Err(e) => return Err(e),
        }
        if let Some(cb) = progress {
            cb(i + 1, total);
        }
    }

    Ok(BacktestReport {
        start: request.start,
        end: request.end,
        summary: summarize(&rows),
        rows,
        skipped_dates,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use powerpick_db::memory::{make_test_draws, MemoryStore};
    use powerpick_db::models::parse_date;
    use std::cell::Cell;

    fn store() -> MemoryStore {
        MemoryStore::new(make_test_draws(100))
    }

    #[test]
    fn test_internal_overlap() {
        assert_eq!(internal_overlap(&[]), 0.0);
        assert_eq!(internal_overlap(&[[1, 2, 3, 4, 5]]), 0.0);
        let sets = [[1, 2, 3, 4, 5], [1, 2, 3, 10, 11], [20, 21, 22, 23, 24]];
        assert!((internal_overlap(&sets) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_backtest_rows_and_summary() {
        let s = store();
        let all = s.all_draws(true).unwrap();
        let start = all[50].date;
        let end = all[99].date;
        let mut req = BacktestRequest::new(start, end);
        req.limit_dates = 5;
        req.n_suggestions = 3;
        let engine = RecommendationEngine::new(EngineConfig::default());
        let report = run_backtest(&engine, &s, &req, None).unwrap();

        assert_eq!(report.rows.len(), 5);
        assert_eq!(report.rows[0].date, end, "plus récent d'abord");
        assert_eq!(report.rows[0].seed, 1000);
        assert_eq!(report.rows[4].seed, 1004);
        assert_eq!(report.summary.len(), 6);
        for summary in report.summary.values() {
            assert_eq!(summary.dates, 5);
            assert!((summary.avg_suggestions - 3.0).abs() < 1e-12);
            assert!(summary.avg_best_match <= 5.0);
        }
    }

    #[test]
    fn test_backtest_progress_and_skips() {
        let s = store();
        let all = s.all_draws(true).unwrap();
        let mut req = BacktestRequest::new(all[0].date, all[2].date);
        req.assistant_ids = Some(vec![AssistantId::ProbabilityPurist]);
        let calls = Cell::new(0usize);
        let cb = |done: usize, total: usize| {
            assert!(done <= total);
            calls.set(calls.get() + 1);
        };
        let engine = RecommendationEngine::new(EngineConfig::default());
        let report = run_backtest(&engine, &s, &req, Some(&cb)).unwrap();
        assert_eq!(calls.get(), 3);
        assert_eq!(report.skipped_dates, vec![all[0].date], "premier tirage : rien avant");
        assert_eq!(report.rows.len(), 2);
    }

    #[test]
    fn test_backtest_empty_range() {
        let req = BacktestRequest::new(parse_date("1990-01-01").unwrap(), parse_date("1990-12-31").unwrap());
        let engine = RecommendationEngine::new(EngineConfig::default());
        let err = run_backtest(&engine, &store(), &req, None).unwrap_err();
        assert_eq!(err.code(), "NO_DATA");
    }

    #[test]
    fn test_backtest_deterministic() {
        let s = store();
        let all = s.all_draws(true).unwrap();
        let mut req = BacktestRequest::new(all[80].date, all[99].date);
        req.limit_dates = 3;
        let engine = RecommendationEngine::new(EngineConfig::default());
        let a = run_backtest(&engine, &s, &req, None).unwrap();
        let b = run_backtest(&engine, &s, &req, None).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_backtest_seed_wraps() {
        let s = store();
        let all = s.all_draws(true).unwrap();
        let mut req = BacktestRequest::new(all[97].date, all[99].date);
        req.base_seed = u64::MAX;
        req.n_suggestions = 1;
        req.assistant_ids = Some(vec![AssistantId::ProbabilityPurist]);
        let engine = RecommendationEngine::new(EngineConfig::default());
        let report = run_backtest(&engine, &s, &req, None).unwrap();
        let seeds: Vec<u64> = report.rows.iter().map(|r| r.seed).collect();
        assert_eq!(seeds, vec![u64::MAX, 0, 1]);
    }
}
