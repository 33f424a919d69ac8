use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use powerpick_db::models::{ComboKey, Draw};
use powerpick_db::source::DrawSource;

use crate::assistants::explain::{explain, Explanation};
use crate::assistants::{Assistant, AssistantId, AssistantRegistry, SignalBook};
use crate::cache::ResultCache;
use crate::config::{EngineConfig, GuardConfig};
use crate::context::{build_context, check_windows, normalize_windows, Context, WindowSummary};
use crate::error::{EngineError, Result};
use crate::guard::{BlockReason, DuplicateGuard, Verdict};
use crate::sampler::{assistant_rng, date_seed, ComboSampler, ConstraintSet, Constraints};
use crate::signals::ShapeReference;

pub const MAX_SUGGESTIONS: usize = 50;
pub const MAX_BULK_SUGGESTIONS: usize = 500;
/// Nombre de rejets détaillés conservés par assistant.
const MAX_BLOCKED_KEPT: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecommendRequest {
    /// `None` : date du jour.
    pub date: Option<NaiveDate>,
    pub windows: Vec<usize>,
    pub n_suggestions: usize,
    pub bulk: bool,
    pub seed: Option<u64>,
    pub assistant_ids: Option<Vec<AssistantId>>,
    pub constraints: Constraints,
    /// `None` : réglages du moteur.
    pub guard: Option<GuardConfig>,
}

impl Default for RecommendRequest {
    fn default() -> Self {
        Self {
            date: None,
            windows: Vec::new(),
            n_suggestions: 5,
            bulk: false,
            seed: None,
            assistant_ids: None,
            constraints: Constraints::default(),
            guard: None,
        }
    }
}

impl RecommendRequest {
    pub fn for_date(date: NaiveDate) -> Self {
        Self {
            date: Some(date),
            ..Default::default()
        }
    }

    fn validate(&self) -> Result<()> {
        let max = if self.bulk { MAX_BULK_SUGGESTIONS } else { MAX_SUGGESTIONS };
        if self.n_suggestions == 0 || self.n_suggestions > max {
            return Err(EngineError::constraint(format!(
                "n_suggestions doit être entre 1 et {} (reçu {})",
                max, self.n_suggestions
            )));
        }
        check_windows(&self.windows)
    }
}

/// Requête normalisée : clé du cache de résultats.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
    date: NaiveDate,
    windows: Vec<usize>,
    n_suggestions: usize,
    seed: u64,
    assistant_ids: Vec<AssistantId>,
    constraints: Constraints,
    guard: GuardConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Suggestion {
    pub whites: [u8; 5],
    pub powerball: u8,
    #[serde(flatten)]
    pub explanation: Explanation,
}

impl Suggestion {
    pub fn key(&self) -> ComboKey {
        ComboKey::new(&self.whites, self.powerball)
    }

    pub fn score(&self) -> f64 {
        self.explanation.score
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssistantRun {
    pub assistant: AssistantId,
    pub label: &'static str,
    pub suggestions: Vec<Suggestion>,
    pub requested: usize,
    pub attempts: usize,
    /// Budget épuisé avant d'atteindre `requested`.
    pub exhausted: bool,
    pub filtered: usize,
    pub blocked_count: usize,
    pub blocked: Vec<BlockReason>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecommendReport {
    pub status: &'static str,
    pub target_date: NaiveDate,
    pub seed: u64,
    pub last_draw_used: Draw,
    pub analysis: Vec<WindowSummary>,
    pub same_mmdd_count: usize,
    pub same_weekday_count: usize,
    pub shape_ref: ShapeReference,
    pub skipped_rows: usize,
    pub results: BTreeMap<AssistantId, AssistantRun>,
}

impl RecommendReport {
    pub fn all_suggestions(&self) -> impl Iterator<Item = &Suggestion> {
        self.results.values().flat_map(|r| r.suggestions.iter())
    }

    pub fn accepted(&self) -> usize {
        self.results.values().map(|r| r.suggestions.len()).sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    BuildContext,
    RunAssistants,
    ScoreAndExplain,
    Done,
}

impl Phase {
    fn as_str(&self) -> &'static str {
        match self {
            Phase::BuildContext => "BUILD_CONTEXT",
            Phase::RunAssistants => "RUN_ASSISTANTS",
            Phase::ScoreAndExplain => "SCORE_AND_EXPLAIN",
            Phase::Done => "DONE",
        }
    }
}

fn enter(phase: Phase, date: NaiveDate) {
    log::debug!("[{}] {}", date, phase.as_str());
}

/// Contexte et signaux prêts pour une date.
pub struct Prepared {
    pub ctx: Context,
    pub book: SignalBook,
}

pub type ReportCache = ResultCache<RequestKey, RecommendReport>;

pub struct RecommendationEngine {
    config: EngineConfig,
    registry: AssistantRegistry,
    cache: Option<Arc<ReportCache>>,
}

impl RecommendationEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            registry: AssistantRegistry::standard(),
            cache: None,
        }
    }

    /// Moteur avec un cache dimensionné d'après la configuration.
    pub fn with_default_cache(config: EngineConfig) -> Self {
        let cache = Arc::new(ResultCache::new(
            config.cache_capacity,
            Duration::from_secs(config.cache_ttl_secs),
        ));
        Self::new(config).with_cache(cache)
    }

    pub fn with_cache(mut self, cache: Arc<ReportCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &AssistantRegistry {
        &self.registry
    }

    /// `guard_lookback` : profondeur que le garde-fou devra pouvoir scanner.
    pub fn prepare(
        &self,
        source: &dyn DrawSource,
        date: NaiveDate,
        windows: &[usize],
        guard_lookback: usize,
    ) -> Result<Prepared> {
        let ctx = build_context(source, date, windows, &self.config, guard_lookback)?;
        let book = SignalBook::build(&ctx, &self.config);
        Ok(Prepared { ctx, book })
    }

    pub fn recommend(&self, source: &dyn DrawSource, request: &RecommendRequest) -> Result<RecommendReport> {
        self.recommend_prepared(source, request).map(|(report, _)| report)
    }

    /// Comme `recommend`, en rendant aussi le contexte construit pour
    /// l'occasion (`None` quand le rapport vient du cache).
    pub fn recommend_prepared(
        &self,
        source: &dyn DrawSource,
        request: &RecommendRequest,
    ) -> Result<(RecommendReport, Option<Prepared>)> {
        request.validate()?;
        // contradictions indépendantes de l'historique : avant toute lecture
        request.constraints.resolve(&[])?;

        let date = request
            .date
            .unwrap_or_else(|| chrono::Local::now().date_naive());
        let seed = request.seed.unwrap_or_else(|| date_seed(date));
        let ids = AssistantId::resolve(request.assistant_ids.as_deref());
        let guard = request.guard.unwrap_or(self.config.guard);

        let key = RequestKey {
            date,
            windows: normalize_windows(&request.windows),
            n_suggestions: request.n_suggestions,
            seed,
            assistant_ids: ids.clone(),
            constraints: request.constraints.clone(),
            guard,
        };
        if let Some(cache) = &self.cache {
            if let Some(report) = cache.get(&key) {
                log::info!("Résultat en cache pour le {} (seed {})", date, seed);
                return Ok((report, None));
            }
        }

        enter(Phase::BuildContext, date);
        let Prepared { ctx, book } = match self.prepare(source, date, &request.windows, guard.lookback) {
            Ok(p) => p,
            Err(EngineError::NoData) => {
                log::warn!("[{}] NO_DATA : aucun tirage complet", date);
                return Err(EngineError::NoData);
            }
            Err(e) => return Err(e),
        };
        let rules = request.constraints.resolve(&ctx.last_draws_desc)?;

        enter(Phase::RunAssistants, date);
        let assistants = self.registry.build(&ids, &book)?;
        let mut runs = Vec::with_capacity(assistants.len());
        for assistant in &assistants {
            runs.push(self.sample_assistant(&ctx, assistant, &rules, guard, request.n_suggestions, seed)?);
        }

        enter(Phase::ScoreAndExplain, date);
        let mut results = BTreeMap::new();
        for (assistant, sampled) in assistants.iter().zip(runs) {
            let suggestions = sampled
                .accepted
                .iter()
                .map(|&(whites, powerball)| Suggestion {
                    whites,
                    powerball,
                    explanation: explain(assistant, &ctx, &whites, powerball),
                })
                .collect();
            results.insert(
                assistant.id,
                AssistantRun {
                    assistant: assistant.id,
                    label: assistant.id.label(),
                    suggestions,
                    requested: request.n_suggestions,
                    attempts: sampled.attempts,
                    exhausted: sampled.accepted.len() < request.n_suggestions,
                    filtered: sampled.filtered,
                    blocked_count: sampled.blocked_count,
                    blocked: sampled.blocked,
                },
            );
        }

        let report = RecommendReport {
            status: "ok",
            target_date: date,
            seed,
            last_draw_used: ctx.last_draw().clone(),
            analysis: ctx.window_summaries(),
            same_mmdd_count: ctx.same_mmdd.len(),
            same_weekday_count: ctx.same_weekday.len(),
            shape_ref: ctx.shape_ref,
            skipped_rows: ctx.skipped_rows,
            results,
        };
        enter(Phase::Done, date);

        if let Some(cache) = &self.cache {
            cache.insert(key, report.clone());
        }
        Ok((report, Some(Prepared { ctx, book })))
    }

    fn sample_assistant(
        &self,
        ctx: &Context,
        assistant: &Assistant,
        rules: &ConstraintSet,
        guard: GuardConfig,
        requested: usize,
        seed: u64,
    ) -> Result<Sampled> {
        let mut rng = assistant_rng(seed, assistant.id);
        let sampler = ComboSampler::new(assistant, rules);
        let guard = DuplicateGuard::new(ctx, guard);
        let budget = self.config.attempt_budget(requested);

        let mut out = Sampled::default();
        let mut seen: HashSet<ComboKey> = HashSet::new();

        while out.accepted.len() < requested && out.attempts < budget {
            out.attempts += 1;
            let candidate = sampler.sample(&mut rng)?;
            if rules.rejects(&candidate).is_some() {
                out.filtered += 1;
                continue;
            }
            if !seen.insert(candidate.key()) {
                continue;
            }
            match guard.check(&candidate) {
                Verdict::Accept => out.accepted.push((candidate.whites, candidate.powerball)),
                Verdict::Blocked(reason) => {
                    out.blocked_count += 1;
                    if out.blocked.len() < MAX_BLOCKED_KEPT {
                        out.blocked.push(reason);
                    }
                }
            }
        }

        log::debug!(
            "{} : {}/{} acceptées en {} tentatives ({} filtrées, {} bloquées)",
            assistant.id,
            out.accepted.len(),
            requested,
            out.attempts,
            out.filtered,
            out.blocked_count
        );
        if out.accepted.len() < requested {
            log::warn!(
                "{} : budget de {} tentatives épuisé, {}/{} suggestions",
                assistant.id,
                budget,
                out.accepted.len(),
                requested
            );
        }
        Ok(out)
    }
}

#[derive(Debug, Default)]
struct Sampled {
    accepted: Vec<([u8; 5], u8)>,
    attempts: usize,
    filtered: usize,
    blocked_count: usize,
    blocked: Vec<BlockReason>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use powerpick_db::memory::{make_test_draws, MemoryStore};
    use powerpick_db::models::{parse_date, validate_draw};

    fn date(s: &str) -> NaiveDate {
        parse_date(s).unwrap()
    }

    fn history() -> MemoryStore {
        MemoryStore::new(make_test_draws(120))
    }

    fn request(n: usize, seed: u64) -> RecommendRequest {
        RecommendRequest {
            date: Some(date("2025-01-01")),
            n_suggestions: n,
            seed: Some(seed),
            ..Default::default()
        }
    }

    fn engine() -> RecommendationEngine {
        RecommendationEngine::new(EngineConfig::default())
    }

    #[test]
    fn test_single_draw_never_reproduced() {
        let store = MemoryStore::new(vec![Draw::new(date("2024-01-01"), [1, 2, 3, 4, 5], 6)]);
        let req = RecommendRequest {
            date: Some(date("2024-01-08")),
            windows: vec![5],
            n_suggestions: 50,
            seed: Some(1),
            ..Default::default()
        };
        let report = engine().recommend(&store, &req).unwrap();
        assert_eq!(report.last_draw_used.whites, [1, 2, 3, 4, 5]);
        for s in report.all_suggestions() {
            assert_ne!(s.key(), ComboKey::new(&[1, 2, 3, 4, 5], 6));
        }
        assert!(report.accepted() > 0);
    }

    #[test]
    fn test_all_assistants_fill_request() {
        let report = engine().recommend(&history(), &request(10, 42)).unwrap();
        assert_eq!(report.status, "ok");
        assert_eq!(report.results.len(), 6);
        for run in report.results.values() {
            assert_eq!(run.suggestions.len(), 10, "{}", run.assistant);
            assert!(!run.exhausted);
            for s in &run.suggestions {
                assert!(validate_draw(&s.whites, s.powerball).is_ok());
                assert!(s.whites.windows(2).all(|w| w[0] < w[1]));
                assert!(!s.explanation.why.is_empty());
            }
        }
    }

    #[test]
    fn test_no_duplicates_of_recent_draws() {
        let store = history();
        let e = engine();
        let report = e.recommend(&store, &request(30, 7)).unwrap();
        let ctx = build_context(&store, date("2025-01-01"), &[], e.config(), e.config().guard.lookback).unwrap();
        let guard = e.config().guard;
        for s in report.all_suggestions() {
            assert!(!ctx.is_historical(&s.key()));
            for d in ctx.last_draws_desc.iter().take(guard.lookback) {
                let overlap = s.whites.iter().filter(|n| d.whites.contains(n)).count();
                assert!(overlap < guard.hard_overlap);
                assert!(!(overlap >= guard.soft_overlap && d.powerball == s.powerball));
            }
        }
    }

    #[test]
    fn test_same_seed_same_report() {
        let a = engine().recommend(&history(), &request(8, 99)).unwrap();
        let b = engine().recommend(&history(), &request(8, 99)).unwrap();
        assert_eq!(a, b);
        let c = engine().recommend(&history(), &request(8, 100)).unwrap();
        assert_ne!(a.results, c.results);
    }

    #[test]
    fn test_filtering_assistants_keeps_their_output() {
        let all = engine().recommend(&history(), &request(5, 3)).unwrap();
        let mut req = request(5, 3);
        req.assistant_ids = Some(vec![AssistantId::DateHistorian]);
        let one = engine().recommend(&history(), &req).unwrap();
        assert_eq!(one.results.len(), 1);
        assert_eq!(
            one.results[&AssistantId::DateHistorian].suggestions,
            all.results[&AssistantId::DateHistorian].suggestions
        );
    }

    #[test]
    fn test_fixed_first_and_exclusions() {
        let mut req = request(10, 5);
        req.constraints = Constraints {
            fixed_first: Some(7),
            exclude_numbers: vec![1, 2, 3],
            ..Default::default()
        };
        let report = engine().recommend(&history(), &req).unwrap();
        for s in report.all_suggestions() {
            assert_eq!(s.whites[0], 7);
            assert!(!s.whites.iter().any(|n| [1, 2, 3].contains(n)));
        }
    }

    #[test]
    fn test_five_fixed_numbers_every_assistant() {
        let mut req = request(3, 5);
        req.constraints = Constraints {
            fixed_numbers: vec![10, 20, 30, 40, 50],
            ..Default::default()
        };
        let report = engine().recommend(&history(), &req).unwrap();
        for s in report.all_suggestions() {
            assert_eq!(s.whites, [10, 20, 30, 40, 50]);
        }
    }

    #[test]
    fn test_exhaustion_is_partial_not_error() {
        let mut req = request(30, 5);
        req.constraints = Constraints {
            fixed_numbers: vec![10, 20, 30, 40, 50],
            fixed_powerball: Some(3),
            ..Default::default()
        };
        req.assistant_ids = Some(vec![AssistantId::ProbabilityPurist]);
        let report = engine().recommend(&history(), &req).unwrap();
        let run = &report.results[&AssistantId::ProbabilityPurist];
        assert_eq!(run.suggestions.len(), 1, "une seule grille possible");
        assert!(run.exhausted);
        assert_eq!(run.attempts, EngineConfig::default().attempt_budget(30));
    }

    #[test]
    fn test_no_data() {
        let err = engine()
            .recommend(&MemoryStore::default(), &request(5, 1))
            .unwrap_err();
        assert_eq!(err.code(), "NO_DATA");
    }

    #[test]
    fn test_request_bounds() {
        let e = engine();
        assert!(e.recommend(&history(), &request(0, 1)).is_err());
        assert!(e.recommend(&history(), &request(51, 1)).is_err());
        let mut bulk = request(120, 1);
        bulk.bulk = true;
        bulk.assistant_ids = Some(vec![AssistantId::ProbabilityPurist]);
        assert!(e.recommend(&history(), &bulk).is_ok());
        let mut bad = request(5, 1);
        bad.windows = vec![5, 0];
        assert_eq!(e.recommend(&history(), &bad).unwrap_err().code(), "CONSTRAINT_VIOLATION");
    }

    #[test]
    fn test_constraint_error_before_reading() {
        let mut req = request(5, 1);
        req.constraints = Constraints {
            fixed_numbers: vec![4],
            exclude_numbers: vec![4],
            ..Default::default()
        };
        // pas d'historique : la contradiction est signalée en premier
        let err = engine().recommend(&MemoryStore::default(), &req).unwrap_err();
        assert_eq!(err.code(), "CONSTRAINT_VIOLATION");
    }

    #[test]
    fn test_cache_returns_same_report() {
        let e = RecommendationEngine::with_default_cache(EngineConfig::default());
        let store = history();
        let a = e.recommend(&store, &request(4, 11)).unwrap();
        // base vidée : seul le cache peut répondre
        let b = e.recommend(&MemoryStore::default(), &request(4, 11)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_default_seed_from_date() {
        let mut req = request(2, 0);
        req.seed = None;
        let report = engine().recommend(&history(), &req).unwrap();
        assert_eq!(report.seed, 20_250_101);
    }

    fn purist_request(date_str: &str, fixed: Vec<u8>, guard: GuardConfig) -> RecommendRequest {
        RecommendRequest {
            date: Some(date(date_str)),
            n_suggestions: 5,
            seed: Some(11),
            assistant_ids: Some(vec![AssistantId::ProbabilityPurist]),
            constraints: Constraints {
                fixed_numbers: fixed,
                ..Default::default()
            },
            guard: Some(guard),
            ..Default::default()
        }
    }

    #[test]
    fn test_guard_lookback_beyond_context_depth() {
        let mut draws = make_test_draws(300);
        draws[0].whites = [1, 2, 3, 4, 60];
        draws[0].powerball = 9;
        let store = MemoryStore::new(draws);
        let e = engine();
        assert!(e.config().context_lookback < 300);

        let short = GuardConfig { lookback: 200, ..GuardConfig::default() };
        let report = e
            .recommend(&store, &purist_request("2026-01-01", vec![1, 2, 3, 4], short))
            .unwrap();
        assert_eq!(report.accepted(), 5, "le plus ancien tirage est hors de portée");

        let long = GuardConfig { lookback: 400, ..GuardConfig::default() };
        let report = e
            .recommend(&store, &purist_request("2026-01-01", vec![1, 2, 3, 4], long))
            .unwrap();
        let run = &report.results[&AssistantId::ProbabilityPurist];
        assert_eq!(report.accepted(), 0, "4 blanches communes avec le tirage le plus ancien");
        assert!(run.exhausted);
        assert!(run.blocked_count > 0);
    }

    #[test]
    fn test_guard_custom_thresholds() {
        let store = MemoryStore::new(vec![Draw::new(date("2024-01-01"), [1, 2, 3, 4, 5], 6)]);
        let lenient = GuardConfig {
            hard_overlap: 5,
            soft_overlap: 2,
            ..GuardConfig::default()
        };

        let mut req = purist_request("2024-01-08", vec![1, 2, 3, 4], lenient);
        req.constraints.fixed_powerball = Some(7);
        let report = e_recommend(&store, &req);
        assert_eq!(report.accepted(), 5, "4 communes tolérées avec hard_overlap = 5");
        for s in report.all_suggestions() {
            let overlap = s.whites.iter().filter(|n| [1, 2, 3, 4, 5].contains(*n)).count();
            assert_eq!(overlap, 4);
        }

        let mut req = purist_request("2024-01-08", vec![1, 2], lenient);
        req.constraints.fixed_powerball = Some(6);
        let report = e_recommend(&store, &req);
        assert_eq!(report.accepted(), 0, "2 communes + même powerball bloquées avec soft_overlap = 2");

        let mut req = purist_request("2024-01-08", vec![1, 2], GuardConfig::default());
        req.constraints.fixed_powerball = Some(6);
        let report = e_recommend(&store, &req);
        assert_eq!(report.accepted(), 5, "réglages par défaut : 2 communes passent");
    }

    fn e_recommend(store: &MemoryStore, req: &RecommendRequest) -> RecommendReport {
        engine().recommend(store, req).unwrap()
    }
}
