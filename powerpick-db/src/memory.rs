use anyhow::Result;
use chrono::{Datelike, Duration, NaiveDate};

use crate::models::Draw;
use crate::source::DrawSource;

/// Historique tenu en mémoire, trié par date croissante.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    draws: Vec<Draw>,
}

impl MemoryStore {
    pub fn new(mut draws: Vec<Draw>) -> Self {
        draws.sort_by_key(|d| d.date);
        Self { draws }
    }

    pub fn push(&mut self, draw: Draw) {
        self.draws.push(draw);
        self.draws.sort_by_key(|d| d.date);
    }

    pub fn len(&self) -> usize {
        self.draws.len()
    }

    pub fn is_empty(&self) -> bool {
        self.draws.is_empty()
    }

    fn filtered<'a>(&'a self, complete_only: bool) -> impl DoubleEndedIterator<Item = &'a Draw> + 'a {
        self.draws.iter().filter(move |d| !complete_only || d.is_complete())
    }
}

impl DrawSource for MemoryStore {
    fn last_draws(&self, n: usize, until: Option<NaiveDate>, complete_only: bool) -> Result<Vec<Draw>> {
        Ok(self
            .filtered(complete_only)
            .rev()
            .filter(|d| until.map_or(true, |u| d.date <= u))
            .take(n)
            .cloned()
            .collect())
    }

    fn all_draws(&self, complete_only: bool) -> Result<Vec<Draw>> {
        Ok(self.filtered(complete_only).cloned().collect())
    }

    fn same_month_day(&self, date: NaiveDate, complete_only: bool) -> Result<Vec<Draw>> {
        Ok(self
            .filtered(complete_only)
            .filter(|d| d.date.month() == date.month() && d.date.day() == date.day())
            .cloned()
            .collect())
    }

    fn same_weekday(&self, date: NaiveDate, complete_only: bool) -> Result<Vec<Draw>> {
        Ok(self
            .filtered(complete_only)
            .filter(|d| d.date.weekday() == date.weekday())
            .cloned()
            .collect())
    }

    fn draws_between(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<Draw>> {
        Ok(self
            .filtered(true)
            .filter(|d| d.date >= start && d.date <= end)
            .cloned()
            .collect())
    }
}

/// Historique synthétique déterministe : un tirage tous les 3 jours à partir
/// du 2023-01-02, ordre chronologique.
pub fn make_test_draws(n: usize) -> Vec<Draw> {
    let start = NaiveDate::from_ymd_opt(2023, 1, 2).unwrap_or_default();
    (0..n)
        .map(|i| {
            let mut whites = [0u8; 5];
            for (k, w) in whites.iter_mut().enumerate() {
                // 13 est premier avec 69 : les 5 valeurs restent distinctes
                *w = ((i * 7 + k * 13) % 69 + 1) as u8;
            }
            Draw {
                date: start + Duration::days(3 * i as i64),
                whites,
                powerball: ((i * 5) % 26 + 1) as u8,
            }
        })
        .collect()
}
