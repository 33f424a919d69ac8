use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Réglages du garde-fou anti-doublon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    pub enabled: bool,
    /// Nombre de tirages récents comparés pour le quasi-doublon.
    pub lookback: usize,
    /// Blanches communes à partir desquelles le candidat est bloqué.
    pub hard_overlap: usize,
    /// Blanches communes qui bloquent si le powerball coïncide aussi.
    pub soft_overlap: usize,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            lookback: 200,
            hard_overlap: 4,
            soft_overlap: 3,
        }
    }
}

/// Constantes empiriques du moteur. Aucune n'a été validée sur des résultats
/// réels ; elles sont exposées telles quelles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub recency_half_life: f64,
    pub overdue_multiplier: f64,
    pub transition_scale: f64,
    pub momentum_scale: f64,
    pub momentum_short: usize,
    pub momentum_long: usize,
    pub positional_scale: f64,
    /// Profondeur minimale de `last_draws_desc`.
    pub context_lookback: usize,
    pub min_attempts: usize,
    pub attempts_per_suggestion: usize,
    pub consensus_top_whites: usize,
    pub consensus_top_powerballs: usize,
    pub consensus_decay: f64,
    pub consensus_decay_floor: f64,
    pub consensus_mutations: usize,
    pub cache_capacity: usize,
    pub cache_ttl_secs: u64,
    pub guard: GuardConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            recency_half_life: 6.0,
            overdue_multiplier: 0.15,
            transition_scale: 10.0,
            momentum_scale: 2.0,
            momentum_short: 5,
            momentum_long: 20,
            positional_scale: 0.25,
            context_lookback: 200,
            min_attempts: 5000,
            attempts_per_suggestion: 50,
            consensus_top_whites: 40,
            consensus_top_powerballs: 20,
            consensus_decay: 0.25,
            consensus_decay_floor: 0.1,
            consensus_mutations: 80,
            cache_capacity: 128,
            cache_ttl_secs: 600,
            guard: GuardConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Budget de tentatives pour `requested` suggestions.
    pub fn attempt_budget(&self, requested: usize) -> usize {
        self.min_attempts.max(requested * self.attempts_per_suggestion)
    }
}

pub fn save_config(config: &EngineConfig, path: &Path) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(config)?;
    std::fs::write(path, json).with_context(|| format!("Impossible d'écrire {:?}", path))?;
    Ok(())
}

/// Charge la configuration ; un fichier absent donne les valeurs par défaut.
pub fn load_config(path: &Path) -> anyhow::Result<EngineConfig> {
    if !path.exists() {
        return Ok(EngineConfig::default());
    }
    let json = std::fs::read_to_string(path).with_context(|| format!("Impossible de lire {:?}", path))?;
    let config: EngineConfig =
        serde_json::from_str(&json).with_context(|| format!("Configuration invalide dans {:?}", path))?;
    Ok(config)
}
