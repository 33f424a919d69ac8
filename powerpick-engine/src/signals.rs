//! Statistiques pures sur un ensemble de tirages. Les vecteurs sont indexés
//! par `numéro - 1` et ont la taille du pool concerné.

use powerpick_db::models::{Draw, Pool};
use serde::Serialize;

/// Seuil « haute » des profils de grille.
pub const HIGH_THRESHOLD: u8 = 35;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WindowFrequency {
    pub counts_whites: Vec<u32>,
    pub counts_powerball: Vec<u32>,
    /// `counts_by_position[slot][n - 1]`, slot 0..5 sur les blanches triées.
    pub counts_by_position: Vec<Vec<u32>>,
}

pub fn window_freq(draws: &[Draw]) -> WindowFrequency {
    let white_size = Pool::Whites.size();
    let mut counts_whites = vec![0u32; white_size];
    let mut counts_powerball = vec![0u32; Pool::Powerball.size()];
    let mut counts_by_position = vec![vec![0u32; white_size]; Pool::Whites.pick_count()];

    for draw in draws {
        for (slot, &n) in draw.sorted_whites().iter().enumerate() {
            if Pool::Whites.contains(n) {
                let idx = (n - 1) as usize;
                counts_whites[idx] += 1;
                counts_by_position[slot][idx] += 1;
            }
        }
        if Pool::Powerball.contains(draw.powerball) {
            counts_powerball[(draw.powerball - 1) as usize] += 1;
        }
    }

    WindowFrequency {
        counts_whites,
        counts_powerball,
        counts_by_position,
    }
}

/// Tirages écoulés depuis la dernière sortie de chaque blanche.
/// 0 si elle figure dans le dernier tirage, `draws_desc.len()` si absente.
pub fn white_gaps(draws_desc: &[Draw]) -> Vec<u32> {
    let size = Pool::Whites.size();
    let mut gaps = vec![draws_desc.len() as u32; size];
    let mut seen = vec![false; size];
    for (t, draw) in draws_desc.iter().enumerate() {
        for &n in &draw.whites {
            if Pool::Whites.contains(n) {
                let idx = (n - 1) as usize;
                if !seen[idx] {
                    seen[idx] = true;
                    gaps[idx] = t as u32;
                }
            }
        }
    }
    gaps
}

/// Table de transition empirique : `trans[y - 1][x - 1]` compte les fois où
/// `x` est sorti dans le tirage suivant un tirage contenant `y`.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionTable {
    pub trans: Vec<Vec<u32>>,
    pub prev_count: Vec<u32>,
}

impl TransitionTable {
    /// Fréquence à laquelle `x` suit `y`, dans [0, 1].
    pub fn follow_rate(&self, y: u8, x: u8) -> f64 {
        if !Pool::Whites.contains(y) || !Pool::Whites.contains(x) {
            return 0.0;
        }
        let yi = (y - 1) as usize;
        let denom = self.prev_count[yi].max(1) as f64;
        self.trans[yi][(x - 1) as usize] as f64 / denom
    }

    pub fn pairs(&self) -> u32 {
        self.prev_count.iter().sum::<u32>() / Pool::Whites.pick_count() as u32
    }
}

pub fn transition_matrix(draws_desc: &[Draw]) -> TransitionTable {
    let size = Pool::Whites.size();
    let mut trans = vec![vec![0u32; size]; size];
    let mut prev_count = vec![0u32; size];

    // draws_desc[t] est plus récent que draws_desc[t + 1]
    for pair in draws_desc.windows(2) {
        let (newer, older) = (&pair[0], &pair[1]);
        for &y in &older.whites {
            if !Pool::Whites.contains(y) {
                continue;
            }
            let yi = (y - 1) as usize;
            prev_count[yi] += 1;
            for &x in &newer.whites {
                if Pool::Whites.contains(x) {
                    trans[yi][(x - 1) as usize] += 1;
                }
            }
        }
    }

    TransitionTable { trans, prev_count }
}

/// Poids de récence : somme de `2^(-age / half_life)` sur les apparitions,
/// `age` étant le rang (0 = plus récent) dans `draws_desc`.
pub fn exponential_recency_weights(draws_desc: &[Draw], half_life: f64, pool: Pool) -> Vec<f64> {
    let size = pool.size();
    let mut weights = vec![0.0f64; size];
    let half_life = if half_life > 0.0 { half_life } else { 1.0 };

    for (age, draw) in draws_desc.iter().enumerate() {
        let w = 2f64.powf(-(age as f64) / half_life);
        for &n in pool.numbers_from(draw) {
            if pool.contains(n) {
                weights[(n - 1) as usize] += w;
            }
        }
    }

    weights
}

/// Excès de sorties récentes : `count_short - count_long * short / long`,
/// tronqué à 0.
pub fn momentum(draws_desc: &[Draw], short: usize, long: usize) -> Vec<f64> {
    let size = Pool::Whites.size();
    let short = short.min(draws_desc.len());
    let long = long.max(1).min(draws_desc.len());
    if short == 0 || long == 0 {
        return vec![0.0; size];
    }

    let c_short = window_freq(&draws_desc[..short]).counts_whites;
    let c_long = window_freq(&draws_desc[..long]).counts_whites;
    let ratio = short as f64 / long as f64;

    (0..size)
        .map(|i| (c_short[i] as f64 - c_long[i] as f64 * ratio).max(0.0))
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Shape {
    pub odd: usize,
    pub high: usize,
    pub low: usize,
    pub sum: u32,
}

pub fn shape_metrics(whites: &[u8]) -> Shape {
    let odd = whites.iter().filter(|&&n| n % 2 == 1).count();
    let high = whites.iter().filter(|&&n| n >= HIGH_THRESHOLD).count();
    Shape {
        odd,
        high,
        low: whites.len() - high,
        sum: whites.iter().map(|&n| n as u32).sum(),
    }
}

/// Profil moyen des tirages récents.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Default)]
pub struct ShapeReference {
    pub draws: usize,
    pub avg_odd: f64,
    pub avg_high: f64,
    pub avg_sum: f64,
}

pub fn shape_reference(draws_desc: &[Draw], depth: usize) -> ShapeReference {
    let recent = &draws_desc[..depth.min(draws_desc.len())];
    if recent.is_empty() {
        return ShapeReference::default();
    }
    let n = recent.len() as f64;
    let shapes: Vec<Shape> = recent.iter().map(|d| shape_metrics(&d.whites)).collect();
    ShapeReference {
        draws: recent.len(),
        avg_odd: shapes.iter().map(|s| s.odd as f64).sum::<f64>() / n,
        avg_high: shapes.iter().map(|s| s.high as f64).sum::<f64>() / n,
        avg_sum: shapes.iter().map(|s| s.sum as f64).sum::<f64>() / n,
    }
}
