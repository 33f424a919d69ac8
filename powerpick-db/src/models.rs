use anyhow::{bail, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

pub const WHITE_MIN: u8 = 1;
pub const WHITE_MAX: u8 = 69;
pub const PB_MIN: u8 = 1;
pub const PB_MAX: u8 = 26;

/// Un tirage historique. Une valeur absente en base est lue comme 0,
/// ce qui rend le tirage incomplet (voir `is_complete`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Draw {
    pub date: NaiveDate,
    pub whites: [u8; 5],
    pub powerball: u8,
}

impl Draw {
    pub fn new(date: NaiveDate, whites: [u8; 5], powerball: u8) -> Self {
        Self { date, whites, powerball }
    }

    /// Vrai si les six valeurs sont renseignées et valides.
    pub fn is_complete(&self) -> bool {
        validate_draw(&self.whites, self.powerball).is_ok()
    }

    pub fn sorted_whites(&self) -> [u8; 5] {
        let mut w = self.whites;
        w.sort();
        w
    }

    pub fn key(&self) -> ComboKey {
        ComboKey::new(&self.whites, self.powerball)
    }
}

/// Clé canonique d'une combinaison : blanches triées + powerball.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ComboKey {
    pub whites: [u8; 5],
    pub powerball: u8,
}

impl ComboKey {
    pub fn new(whites: &[u8; 5], powerball: u8) -> Self {
        let mut sorted = *whites;
        sorted.sort();
        Self { whites: sorted, powerball }
    }
}

impl std::fmt::Display for ComboKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let w = self.whites;
        write!(f, "{}-{}-{}-{}-{}|{}", w[0], w[1], w[2], w[3], w[4], self.powerball)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Pool {
    Whites,
    Powerball,
}

impl Pool {
    pub fn size(&self) -> usize {
        match self {
            Pool::Whites => WHITE_MAX as usize,
            Pool::Powerball => PB_MAX as usize,
        }
    }

    pub fn pick_count(&self) -> usize {
        match self {
            Pool::Whites => 5,
            Pool::Powerball => 1,
        }
    }

    pub fn contains(&self, n: u8) -> bool {
        n >= 1 && (n as usize) <= self.size()
    }

    pub fn numbers_from<'a>(&self, draw: &'a Draw) -> &'a [u8] {
        match self {
            Pool::Whites => &draw.whites,
            Pool::Powerball => std::slice::from_ref(&draw.powerball),
        }
    }
}

pub fn validate_draw(whites: &[u8; 5], powerball: u8) -> Result<()> {
    for &w in whites {
        if !(WHITE_MIN..=WHITE_MAX).contains(&w) {
            bail!("Blanche {} hors limites ({}-{})", w, WHITE_MIN, WHITE_MAX);
        }
    }
    if !(PB_MIN..=PB_MAX).contains(&powerball) {
        bail!("Powerball {} hors limites ({}-{})", powerball, PB_MIN, PB_MAX);
    }
    for i in 0..whites.len() {
        for j in (i + 1)..whites.len() {
            if whites[i] == whites[j] {
                bail!("Blanche en double : {}", whites[i]);
            }
        }
    }
    Ok(())
}

pub fn parse_date(raw: &str) -> Result<NaiveDate> {
    match NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d") {
        Ok(d) => Ok(d),
        Err(_) => bail!("Format de date invalide (AAAA-MM-JJ attendu) : '{}'", raw),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        parse_date(s).unwrap()
    }

    #[test]
    fn test_validate_draw_ok() {
        assert!(validate_draw(&[1, 2, 3, 4, 5], 1).is_ok());
        assert!(validate_draw(&[69, 68, 67, 66, 65], 26).is_ok());
    }

    #[test]
    fn test_validate_draw_white_out_of_range() {
        assert!(validate_draw(&[0, 2, 3, 4, 5], 1).is_err());
        assert!(validate_draw(&[1, 2, 3, 4, 70], 1).is_err());
    }

    #[test]
    fn test_validate_draw_powerball_out_of_range() {
        assert!(validate_draw(&[1, 2, 3, 4, 5], 0).is_err());
        assert!(validate_draw(&[1, 2, 3, 4, 5], 27).is_err());
    }

    #[test]
    fn test_validate_draw_duplicate_whites() {
        assert!(validate_draw(&[1, 1, 3, 4, 5], 2).is_err());
    }

    #[test]
    fn test_missing_value_is_incomplete() {
        let draw = Draw::new(date("2024-01-01"), [1, 2, 0, 4, 5], 6);
        assert!(!draw.is_complete());
        let draw = Draw::new(date("2024-01-01"), [1, 2, 3, 4, 5], 0);
        assert!(!draw.is_complete());
    }

    #[test]
    fn test_combo_key_is_order_independent() {
        let a = ComboKey::new(&[5, 4, 3, 2, 1], 9);
        let b = ComboKey::new(&[1, 2, 3, 4, 5], 9);
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "1-2-3-4-5|9");
        assert_ne!(a, ComboKey::new(&[1, 2, 3, 4, 5], 10));
    }

    #[test]
    fn test_pool_size_and_pick() {
        assert_eq!(Pool::Whites.size(), 69);
        assert_eq!(Pool::Powerball.size(), 26);
        assert_eq!(Pool::Whites.pick_count(), 5);
        assert_eq!(Pool::Powerball.pick_count(), 1);
    }

    #[test]
    fn test_pool_numbers_from() {
        let draw = Draw::new(date("2024-01-01"), [1, 2, 3, 4, 5], 6);
        assert_eq!(Pool::Whites.numbers_from(&draw), &[1, 2, 3, 4, 5]);
        assert_eq!(Pool::Powerball.numbers_from(&draw), &[6]);
    }

    #[test]
    fn test_parse_date() {
        assert!(parse_date("2024-02-29").is_ok());
        assert!(parse_date("29/02/2024").is_err());
    }
}
