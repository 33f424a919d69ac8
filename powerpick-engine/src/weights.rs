//! Combinaison de signaux nommés en distributions d'échantillonnage.

use powerpick_db::models::Pool;

/// Vecteur uniforme à 1.0 : la base de toute couche de poids.
pub fn uniform(pool: Pool) -> Vec<f64> {
    vec![1.0; pool.size()]
}

/// `1 + scale * signal[i]` : garantit un poids ≥ 1 pour chaque numéro.
pub fn layer(signal: &[f64], scale: f64) -> Vec<f64> {
    signal.iter().map(|&s| 1.0 + (s * scale).max(0.0)).collect()
}

pub fn layer_counts(counts: &[u32], scale: f64) -> Vec<f64> {
    counts.iter().map(|&c| 1.0 + c as f64 * scale).collect()
}

/// Somme élément par élément de plusieurs signaux du même domaine.
pub fn merge(signals: &[&[f64]]) -> Vec<f64> {
    let size = signals.iter().map(|s| s.len()).max().unwrap_or(0);
    let mut merged = vec![0.0f64; size];
    for signal in signals {
        for (m, &v) in merged.iter_mut().zip(signal.iter()) {
            *m += v;
        }
    }
    merged
}

/// Divise par la masse totale ; uniforme si la masse est nulle.
pub fn normalize(weights: &[f64]) -> Vec<f64> {
    let total: f64 = weights.iter().filter(|w| w.is_finite() && **w > 0.0).sum();
    if total > 0.0 {
        weights
            .iter()
            .map(|&w| if w.is_finite() && w > 0.0 { w / total } else { 0.0 })
            .collect()
    } else if weights.is_empty() {
        Vec::new()
    } else {
        vec![1.0 / weights.len() as f64; weights.len()]
    }
}

pub fn validate_distribution(dist: &[f64], pool: Pool) -> bool {
    if dist.len() != pool.size() {
        return false;
    }
    if dist.iter().any(|&p| p < 0.0) {
        return false;
    }
    let sum: f64 = dist.iter().sum();
    (sum - 1.0).abs() < 1e-9
}

/// Numéros triés par poids décroissant (à poids égal, le plus petit d'abord).
pub fn ranked(weights: &[f64]) -> Vec<(u8, f64)> {
    let mut items: Vec<(u8, f64)> = weights
        .iter()
        .enumerate()
        .map(|(i, &w)| ((i + 1) as u8, w))
        .collect();
    items.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.0.cmp(&b.0))
    });
    items
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_sums() {
        let a = vec![1.0, 2.0, 3.0];
        let b = vec![1.0, 1.0, 1.0];
        assert_eq!(merge(&[&a, &b]), vec![2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_normalize_sums_to_one() {
        let w = layer_counts(&vec![3u32; 69], 1.0);
        let n = normalize(&w);
        assert!(validate_distribution(&n, Pool::Whites));
    }

    #[test]
    fn test_normalize_zero_mass_is_uniform() {
        let n = normalize(&[0.0; 26]);
        assert!(validate_distribution(&n, Pool::Powerball));
        assert!((n[0] - 1.0 / 26.0).abs() < 1e-12);
    }

    #[test]
    fn test_layer_floor_is_one() {
        let l = layer(&[0.0, 2.0, -5.0], 0.5);
        assert_eq!(l, vec![1.0, 2.0, 1.0]);
    }

    #[test]
    fn test_ranked_order() {
        let r = ranked(&[1.0, 3.0, 3.0, 0.5]);
        assert_eq!(r.iter().map(|(n, _)| *n).collect::<Vec<_>>(), vec![2, 3, 1, 4]);
    }
}
