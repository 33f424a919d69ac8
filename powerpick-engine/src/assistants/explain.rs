use std::collections::BTreeMap;

use serde::Serialize;

use powerpick_db::models::Pool;

use crate::context::Context;
use crate::signals::shape_metrics;
use crate::weights::normalize;

use super::{Assistant, SignalKind};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Explanation {
    pub score: f64,
    /// Portance de chaque signal aux numéros choisis (1.0 = neutre).
    pub signals_used: BTreeMap<String, f64>,
    pub why: Vec<String>,
    pub rationale_tags: Vec<String>,
}

fn round4(x: f64) -> f64 {
    (x * 10_000.0).round() / 10_000.0
}

/// Score d'une grille : somme des probabilités normalisées aux numéros choisis.
pub fn score(assistant: &Assistant, whites: &[u8], powerball: u8) -> f64 {
    let w: f64 = whites
        .iter()
        .filter(|&&n| Pool::Whites.contains(n))
        .map(|&n| assistant.dist_whites[(n - 1) as usize])
        .sum();
    let pb = if Pool::Powerball.contains(powerball) {
        assistant.dist_powerball[(powerball - 1) as usize]
    } else {
        0.0
    };
    w + pb
}

/// Rapport entre la masse du signal aux numéros choisis et la masse attendue
/// sous un tirage uniforme.
fn lift(signal: &[f64], picks: &[u8], pool: Pool) -> f64 {
    let dist = normalize(signal);
    let mass: f64 = picks
        .iter()
        .filter(|&&n| pool.contains(n))
        .map(|&n| dist[(n - 1) as usize])
        .sum();
    let expected = picks.len() as f64 / pool.size() as f64;
    if expected > 0.0 {
        mass / expected
    } else {
        0.0
    }
}

/// Numéros choisis dont la valeur de signal dépasse la moyenne du signal.
fn above_mean(signal: &[f64], picks: &[u8]) -> Vec<u8> {
    if signal.is_empty() {
        return Vec::new();
    }
    let mean = signal.iter().sum::<f64>() / signal.len() as f64;
    picks
        .iter()
        .copied()
        .filter(|&n| n >= 1 && (n as usize) <= signal.len() && signal[(n - 1) as usize] > mean + 1e-12)
        .collect()
}

fn join(nums: &[u8]) -> String {
    nums.iter().map(|n| n.to_string()).collect::<Vec<_>>().join(", ")
}

fn describe(kind: SignalKind, nums: &[u8], ctx: &Context) -> String {
    let list = join(nums);
    match kind {
        SignalKind::BaseFreq => format!(
            "{} au-dessus de la moyenne sur les {} derniers tirages",
            list,
            ctx.reference_window().draws_used
        ),
        SignalKind::Recency => format!("{} sortis récemment", list),
        SignalKind::Overdue => format!("{} en retard", list),
        SignalKind::Markov => format!("{} prolongent une séquence récente", list),
        SignalKind::Momentum => format!("{} en accélération sur les derniers tirages", list),
        SignalKind::Positional => format!("{} fréquents à leur position", list),
        SignalKind::SameMmdd => format!(
            "{} déjà sortis un {}",
            list,
            ctx.target_date.format("%d/%m")
        ),
        SignalKind::SameWeekday => format!(
            "{} fréquents ce jour de semaine ({})",
            list,
            ctx.target_date.format("%A")
        ),
        SignalKind::Uniform => "Tirage neutre, aucun biais".to_string(),
    }
}

pub fn explain(assistant: &Assistant, ctx: &Context, whites: &[u8], powerball: u8) -> Explanation {
    let mut signals_used = BTreeMap::new();
    let mut lines: Vec<(f64, String)> = Vec::new();

    for (kind, signal) in &assistant.signals_whites {
        let l = lift(signal, whites, Pool::Whites);
        signals_used.insert(kind.as_str().to_string(), round4(l));
        if *kind == SignalKind::Uniform {
            lines.push((0.0, describe(*kind, whites, ctx)));
            continue;
        }
        let hits = above_mean(signal, whites);
        if !hits.is_empty() {
            lines.push((l, describe(*kind, &hits, ctx)));
        }
    }

    let mut pb_kinds = Vec::new();
    for (kind, signal) in &assistant.signals_powerball {
        let l = lift(signal, &[powerball], Pool::Powerball);
        signals_used.insert(format!("pb_{}", kind.as_str()), round4(l));
        if !above_mean(signal, &[powerball]).is_empty() {
            pb_kinds.push(kind.as_str());
        }
    }

    lines.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    let mut why: Vec<String> = lines.into_iter().map(|(_, s)| s).collect();
    if why.is_empty() {
        why.push("Aucun signal dominant".to_string());
    }
    if !pb_kinds.is_empty() {
        why.push(format!("Powerball {} porté par {}", powerball, pb_kinds.join(" + ")));
    }

    let shape = shape_metrics(whites);
    let reference = &ctx.shape_ref;
    why.push(format!(
        "Profil : {} impairs, {} hauts, somme {} (réf. {:.1} / {:.1} / {:.0})",
        shape.odd, shape.high, shape.sum, reference.avg_odd, reference.avg_high, reference.avg_sum
    ));

    Explanation {
        score: round4(score(assistant, whites, powerball)),
        signals_used,
        why,
        rationale_tags: assistant.rationale_tags.iter().map(|t| t.to_string()).collect(),
    }
}
