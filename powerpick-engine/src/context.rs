use std::collections::{BTreeMap, HashSet};

use chrono::NaiveDate;
use serde::Serialize;

use powerpick_db::models::{ComboKey, Draw};
use powerpick_db::source::DrawSource;

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::signals::{
    self, shape_reference, transition_matrix, window_freq, ShapeReference, TransitionTable, WindowFrequency,
};
use crate::weights::ranked;

pub const DEFAULT_WINDOWS: [usize; 5] = [2, 5, 10, 15, 20];

/// Profondeur du profil de forme de référence.
const SHAPE_DEPTH: usize = 20;

#[derive(Debug, Clone, Serialize)]
pub struct WindowStats {
    pub window: usize,
    pub draws_used: usize,
    pub frequency: WindowFrequency,
    pub white_gaps: Vec<u32>,
}

impl WindowStats {
    fn build(window: usize, draws_desc: &[Draw]) -> Self {
        let slice = &draws_desc[..window.min(draws_desc.len())];
        Self {
            window,
            draws_used: slice.len(),
            frequency: window_freq(slice),
            white_gaps: signals::white_gaps(slice),
        }
    }

    /// Fréquence moyenne d'une blanche sur la fenêtre.
    pub fn mean_white_count(&self) -> f64 {
        let total: u32 = self.frequency.counts_whites.iter().sum();
        total as f64 / self.frequency.counts_whites.len() as f64
    }

    pub fn summary(&self) -> WindowSummary {
        let as_f64 = |v: &[u32]| v.iter().map(|&c| c as f64).collect::<Vec<_>>();
        let hot = ranked(&as_f64(&self.frequency.counts_whites));
        let cold = ranked(&as_f64(&self.white_gaps));
        let pbs = ranked(&as_f64(&self.frequency.counts_powerball));
        WindowSummary {
            window: self.window,
            draws_used: self.draws_used,
            hot_whites: hot.iter().take(5).map(|(n, _)| *n).collect(),
            overdue_whites: cold.iter().take(3).map(|(n, _)| *n).collect(),
            top_powerballs: pbs.iter().take(3).map(|(n, _)| *n).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WindowSummary {
    pub window: usize,
    pub draws_used: usize,
    pub hot_whites: Vec<u8>,
    pub overdue_whites: Vec<u8>,
    pub top_powerballs: Vec<u8>,
}

/// Tout ce que les assistants lisent pour une date cible. Construit une fois
/// par appel puis uniquement lu.
#[derive(Debug, Clone)]
pub struct Context {
    pub target_date: NaiveDate,
    pub windows: Vec<usize>,
    pub by_window: BTreeMap<usize, WindowStats>,
    pub same_mmdd: Vec<Draw>,
    pub same_weekday: Vec<Draw>,
    /// Tirages complets antérieurs à la date cible, plus récent en premier.
    /// Couvre à la fois les signaux et le garde-fou.
    pub last_draws_desc: Vec<Draw>,
    /// Nombre de tirages de `last_draws_desc` lus par les signaux.
    pub signal_depth: usize,
    pub transitions: TransitionTable,
    pub historical_keys: HashSet<ComboKey>,
    pub shape_ref: ShapeReference,
    /// Lignes d'historique ignorées car incomplètes ou invalides.
    pub skipped_rows: usize,
}

impl Context {
    pub fn last_draw(&self) -> &Draw {
        &self.last_draws_desc[0]
    }

    /// Tirages récents vus par les signaux, plus récent en premier.
    pub fn signal_draws(&self) -> &[Draw] {
        &self.last_draws_desc[..self.signal_depth.min(self.last_draws_desc.len())]
    }

    pub fn is_historical(&self, key: &ComboKey) -> bool {
        self.historical_keys.contains(key)
    }

    /// Fenêtre la plus large : base des fréquences des assistants.
    pub fn reference_window(&self) -> &WindowStats {
        let largest = self.windows.iter().copied().max().unwrap_or(0);
        &self.by_window[&largest]
    }

    pub fn window_summaries(&self) -> Vec<WindowSummary> {
        self.by_window.values().map(|w| w.summary()).collect()
    }
}

/// Une fenêtre vide ne contient aucun tirage : refusée plutôt qu'ignorée.
pub fn check_windows(windows: &[usize]) -> Result<()> {
    if windows.contains(&0) {
        return Err(EngineError::constraint("une fenêtre doit contenir au moins 1 tirage"));
    }
    Ok(())
}

/// Trie, dédoublonne et filtre les fenêtres ; liste vide -> fenêtres par défaut.
pub fn normalize_windows(windows: &[usize]) -> Vec<usize> {
    let mut w: Vec<usize> = windows.iter().copied().filter(|&w| w > 0).collect();
    w.sort_unstable();
    w.dedup();
    if w.is_empty() {
        DEFAULT_WINDOWS.to_vec()
    } else {
        w
    }
}

/// `guard_lookback` : profondeur scannée par le garde-fou, qui peut dépasser
/// celle des signaux.
pub fn build_context(
    source: &dyn DrawSource,
    target_date: NaiveDate,
    windows: &[usize],
    config: &EngineConfig,
    guard_lookback: usize,
) -> Result<Context> {
    let windows = normalize_windows(windows);
    let largest = windows.iter().copied().max().unwrap_or(0);
    let signal_depth = largest.max(config.context_lookback).max(config.momentum_long);
    let until = target_date.pred_opt().unwrap_or(target_date);

    let last_draws_desc = source.last_draws(signal_depth.max(guard_lookback), Some(until), true)?;

    let history = source.all_draws(false)?;
    let mut skipped_rows = 0usize;
    let mut historical_keys = HashSet::with_capacity(history.len());
    for draw in &history {
        if draw.is_complete() {
            historical_keys.insert(draw.key());
        } else if draw.date < target_date {
            skipped_rows += 1;
        }
    }
    if skipped_rows > 0 {
        log::warn!(
            "{} tirage(s) incomplet(s) ou invalide(s) avant le {} ignoré(s)",
            skipped_rows,
            target_date
        );
    }

    if last_draws_desc.is_empty() {
        log::debug!("Aucun tirage complet avant le {}", target_date);
        return Err(EngineError::NoData);
    }

    let before_target = |draws: Vec<Draw>| -> Vec<Draw> {
        draws.into_iter().filter(|d| d.date < target_date).collect()
    };
    let same_mmdd = before_target(source.same_month_day(target_date, true)?);
    let same_weekday = before_target(source.same_weekday(target_date, true)?);

    let signal_draws = &last_draws_desc[..signal_depth.min(last_draws_desc.len())];
    let by_window = windows
        .iter()
        .map(|&w| (w, WindowStats::build(w, &last_draws_desc)))
        .collect();

    let transitions = transition_matrix(signal_draws);
    let shape_ref = shape_reference(signal_draws, SHAPE_DEPTH);

    log::debug!(
        "Contexte {} : {} tirages récents, {} même jour, {} même jour de semaine, {} clés",
        target_date,
        last_draws_desc.len(),
        same_mmdd.len(),
        same_weekday.len(),
        historical_keys.len()
    );

    Ok(Context {
        target_date,
        windows,
        by_window,
        same_mmdd,
        same_weekday,
        last_draws_desc,
        signal_depth,
        transitions,
        historical_keys,
        shape_ref,
        skipped_rows,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use powerpick_db::memory::{make_test_draws, MemoryStore};
    use powerpick_db::models::parse_date;

    fn date(s: &str) -> NaiveDate {
        parse_date(s).unwrap()
    }

    #[test]
    fn test_no_data_on_empty_store() {
        let store = MemoryStore::default();
        let err = build_context(&store, date("2024-01-08"), &[5], &EngineConfig::default(), 200).unwrap_err();
        assert_eq!(err.code(), "NO_DATA");
    }

    #[test]
    fn test_no_data_when_only_future_draws() {
        let store = MemoryStore::new(make_test_draws(10));
        let err = build_context(&store, date("2022-01-01"), &[5], &EngineConfig::default(), 200).unwrap_err();
        assert!(matches!(err, EngineError::NoData));
    }

    #[test]
    fn test_context_excludes_target_day() {
        let draws = make_test_draws(10);
        let target = draws[5].date;
        let store = MemoryStore::new(draws);
        let ctx = build_context(&store, target, &[5], &EngineConfig::default(), 200).unwrap();
        assert_eq!(ctx.last_draws_desc.len(), 5);
        assert!(ctx.last_draws_desc.iter().all(|d| d.date < target));
        assert_eq!(ctx.historical_keys.len(), 10, "toutes les clés, sans borne de date");
    }

    #[test]
    fn test_windows_stats_built_per_window() {
        let store = MemoryStore::new(make_test_draws(40));
        let ctx = build_context(&store, date("2025-01-01"), &[20, 5, 5, 0], &EngineConfig::default(), 200).unwrap();
        assert_eq!(ctx.windows, vec![5, 20]);
        assert_eq!(ctx.by_window[&5].draws_used, 5);
        assert_eq!(ctx.by_window[&20].draws_used, 20);
        assert_eq!(ctx.reference_window().window, 20);
        let total: u32 = ctx.by_window[&5].frequency.counts_whites.iter().sum();
        assert_eq!(total, 25);
    }

    #[test]
    fn test_malformed_rows_counted() {
        let mut draws = make_test_draws(12);
        draws[3].whites[1] = draws[3].whites[0];
        draws[7].powerball = 0;
        let store = MemoryStore::new(draws);
        let ctx = build_context(&store, date("2025-01-01"), &[10], &EngineConfig::default(), 200).unwrap();
        assert_eq!(ctx.skipped_rows, 2);
        assert_eq!(ctx.last_draws_desc.len(), 10);
        assert_eq!(ctx.historical_keys.len(), 10);
    }

    #[test]
    fn test_default_windows_when_empty() {
        assert_eq!(normalize_windows(&[]), DEFAULT_WINDOWS.to_vec());
    }

    #[test]
    fn test_window_summary() {
        let store = MemoryStore::new(make_test_draws(30));
        let ctx = build_context(&store, date("2025-01-01"), &[10], &EngineConfig::default(), 200).unwrap();
        let summaries = ctx.window_summaries();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].hot_whites.len(), 5);
        assert_eq!(summaries[0].overdue_whites.len(), 3);
    }

    #[test]
    fn test_incomplete_rows_do_not_consume_depth() {
        let mut draws = make_test_draws(30);
        for i in [25, 27, 29] {
            draws[i].powerball = 0;
        }
        let store = MemoryStore::new(draws);
        let mut config = EngineConfig::default();
        config.context_lookback = 10;
        config.momentum_long = 10;
        let ctx = build_context(&store, date("2025-01-01"), &[10], &config, 10).unwrap();
        assert_eq!(ctx.last_draws_desc.len(), 10, "10 tirages complets malgré 3 lignes invalides");
        assert!(ctx.last_draws_desc.iter().all(|d| d.is_complete()));
        assert_eq!(ctx.by_window[&10].draws_used, 10);
    }

    #[test]
    fn test_skipped_rows_only_before_target() {
        let mut draws = make_test_draws(20);
        let target = draws[10].date;
        draws[4].whites[0] = 0;
        draws[15].powerball = 0;
        let store = MemoryStore::new(draws);
        let ctx = build_context(&store, target, &[5], &EngineConfig::default(), 200).unwrap();
        assert_eq!(ctx.skipped_rows, 1, "la ligne postérieure à la date cible n'est pas comptée");
    }

    #[test]
    fn test_guard_lookback_extends_depth() {
        let store = MemoryStore::new(make_test_draws(300));
        let config = EngineConfig::default();
        let ctx = build_context(&store, date("2026-01-01"), &[], &config, 400).unwrap();
        assert_eq!(ctx.last_draws_desc.len(), 300);
        assert_eq!(ctx.signal_depth, 200);
        assert_eq!(ctx.signal_draws().len(), 200);
    }

    #[test]
    fn test_sqlite_malformed_row_is_skipped() {
        use powerpick_db::db::{insert_draw, migrate};
        use powerpick_db::rusqlite::Connection;

        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        insert_draw(&conn, &Draw::new(date("2024-01-01"), [1, 2, 3, 4, 5], 6)).unwrap();
        conn.execute("INSERT INTO draws VALUES ('2024-01-04', 7, 8, 9, 10, 300, 2)", [])
            .unwrap();

        let ctx = build_context(&conn, date("2024-01-08"), &[5], &EngineConfig::default(), 200).unwrap();
        assert_eq!(ctx.skipped_rows, 1);
        assert_eq!(ctx.last_draws_desc.len(), 1);
        assert_eq!(ctx.historical_keys.len(), 1);
    }
}
