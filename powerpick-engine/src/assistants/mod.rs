pub mod explain;
pub mod registry;

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::weights::normalize;

pub use registry::{AssistantRegistry, SignalBook};

/// Catalogue fermé des stratégies de pondération.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssistantId {
    HotColdStatistician,
    SequenceHunter,
    PositionalTactician,
    DateHistorian,
    ProbabilityPurist,
    DiversityOptimizer,
}

impl AssistantId {
    pub const ALL: [AssistantId; 6] = [
        AssistantId::HotColdStatistician,
        AssistantId::SequenceHunter,
        AssistantId::PositionalTactician,
        AssistantId::DateHistorian,
        AssistantId::ProbabilityPurist,
        AssistantId::DiversityOptimizer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AssistantId::HotColdStatistician => "hot_cold_statistician",
            AssistantId::SequenceHunter => "sequence_hunter",
            AssistantId::PositionalTactician => "positional_tactician",
            AssistantId::DateHistorian => "date_historian",
            AssistantId::ProbabilityPurist => "probability_purist",
            AssistantId::DiversityOptimizer => "diversity_optimizer",
        }
    }

    /// Rang stable dans le catalogue, sert à dériver la graine par assistant.
    pub fn ordinal(&self) -> u64 {
        Self::ALL.iter().position(|id| id == self).unwrap_or(0) as u64
    }

    pub fn label(&self) -> &'static str {
        match self {
            AssistantId::HotColdStatistician => "Statisticien chaud/froid",
            AssistantId::SequenceHunter => "Chasseur de séquences",
            AssistantId::PositionalTactician => "Tacticien positionnel",
            AssistantId::DateHistorian => "Historien des dates",
            AssistantId::ProbabilityPurist => "Puriste des probabilités",
            AssistantId::DiversityOptimizer => "Optimiseur de diversité",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            AssistantId::HotColdStatistician => "Fréquence de base, récence et numéros en retard.",
            AssistantId::SequenceHunter => {
                "Transitions empiriques depuis le dernier tirage, momentum court terme et récence."
            }
            AssistantId::PositionalTactician => "Fréquences par position (P1..P5) mêlées à la fréquence de base.",
            AssistantId::DateHistorian => "Tirages du même jour de l'année et du même jour de semaine.",
            AssistantId::ProbabilityPurist => "Poids uniformes : référence neutre.",
            AssistantId::DiversityOptimizer => "Mélange de tous les signaux, privilégie la couverture.",
        }
    }

    /// Liste d'assistants demandée ; `None` ou vide -> tout le catalogue.
    pub fn resolve(ids: Option<&[AssistantId]>) -> Vec<AssistantId> {
        match ids {
            Some(ids) if !ids.is_empty() => {
                let mut v = ids.to_vec();
                v.sort();
                v.dedup();
                v
            }
            _ => Self::ALL.to_vec(),
        }
    }

    pub fn parse_list(raw: &str) -> Result<Vec<AssistantId>, EngineError> {
        raw.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(AssistantId::from_str)
            .collect()
    }
}

impl std::fmt::Display for AssistantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AssistantId {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|id| id.as_str() == s.trim())
            .ok_or_else(|| EngineError::constraint(format!("assistant inconnu : '{}'", s.trim())))
    }
}

/// Source d'un signal, reprise dans les explications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    BaseFreq,
    Recency,
    Overdue,
    Markov,
    Momentum,
    Positional,
    SameMmdd,
    SameWeekday,
    Uniform,
}

impl SignalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalKind::BaseFreq => "base_freq",
            SignalKind::Recency => "recency",
            SignalKind::Overdue => "overdue",
            SignalKind::Markov => "markov",
            SignalKind::Momentum => "momentum",
            SignalKind::Positional => "positional",
            SignalKind::SameMmdd => "same_mmdd",
            SignalKind::SameWeekday => "same_weekday",
            SignalKind::Uniform => "uniform",
        }
    }
}

/// Une stratégie instanciée pour un contexte donné.
#[derive(Debug, Clone)]
pub struct Assistant {
    pub id: AssistantId,
    /// Poids fusionnés, non normalisés.
    pub weights_whites: Vec<f64>,
    pub weights_powerball: Vec<f64>,
    pub dist_whites: Vec<f64>,
    pub dist_powerball: Vec<f64>,
    /// Distributions par position, utilisées à la place de `dist_whites`
    /// pour le tirage de la k-ième blanche.
    pub slot_dists: Option<Vec<Vec<f64>>>,
    pub rationale_tags: Vec<&'static str>,
    pub signals_whites: Vec<(SignalKind, Vec<f64>)>,
    pub signals_powerball: Vec<(SignalKind, Vec<f64>)>,
}

impl Assistant {
    pub fn new(
        id: AssistantId,
        weights_whites: Vec<f64>,
        weights_powerball: Vec<f64>,
        rationale_tags: Vec<&'static str>,
        signals_whites: Vec<(SignalKind, Vec<f64>)>,
        signals_powerball: Vec<(SignalKind, Vec<f64>)>,
    ) -> Self {
        let dist_whites = normalize(&weights_whites);
        let dist_powerball = normalize(&weights_powerball);
        Self {
            id,
            weights_whites,
            weights_powerball,
            dist_whites,
            dist_powerball,
            slot_dists: None,
            rationale_tags,
            signals_whites,
            signals_powerball,
        }
    }

    pub fn with_slots(mut self, slots: Vec<Vec<f64>>) -> Self {
        self.slot_dists = Some(slots.iter().map(|s| normalize(s)).collect());
        self
    }

    /// Distribution à utiliser pour la blanche d'indice `slot`.
    pub fn white_dist_for_slot(&self, slot: usize) -> &[f64] {
        match &self.slot_dists {
            Some(slots) if slot < slots.len() => &slots[slot],
            _ => &self.dist_whites,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CatalogEntry {
    pub id: AssistantId,
    pub label: &'static str,
    pub description: &'static str,
    pub rationale_tags: Vec<&'static str>,
}

pub fn catalog() -> Vec<CatalogEntry> {
    AssistantId::ALL
        .iter()
        .map(|&id| CatalogEntry {
            id,
            label: id.label(),
            description: id.description(),
            rationale_tags: registry::rationale_tags(id).to_vec(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_roundtrip_str() {
        for id in AssistantId::ALL {
            assert_eq!(id.as_str().parse::<AssistantId>().unwrap(), id);
        }
    }

    #[test]
    fn test_unknown_id_is_constraint_violation() {
        let err = "oracle".parse::<AssistantId>().unwrap_err();
        assert_eq!(err.code(), "CONSTRAINT_VIOLATION");
        assert!(err.to_string().contains("oracle"));
    }

    #[test]
    fn test_parse_list() {
        let ids = AssistantId::parse_list("sequence_hunter, probability_purist").unwrap();
        assert_eq!(ids, vec![AssistantId::SequenceHunter, AssistantId::ProbabilityPurist]);
    }

    #[test]
    fn test_resolve_defaults_to_all() {
        assert_eq!(AssistantId::resolve(None).len(), 6);
        assert_eq!(AssistantId::resolve(Some(&[])).len(), 6);
        let one = AssistantId::resolve(Some(&[AssistantId::DateHistorian, AssistantId::DateHistorian]));
        assert_eq!(one, vec![AssistantId::DateHistorian]);
    }

    #[test]
    fn test_serde_snake_case() {
        let json = serde_json::to_string(&AssistantId::HotColdStatistician).unwrap();
        assert_eq!(json, "\"hot_cold_statistician\"");
    }

    #[test]
    fn test_catalog_complete() {
        let c = catalog();
        assert_eq!(c.len(), 6);
        assert!(c.iter().all(|e| !e.rationale_tags.is_empty()));
    }
}
