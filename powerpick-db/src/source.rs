use anyhow::Result;
use chrono::NaiveDate;

use crate::models::Draw;

/// Surface de lecture de l'historique. Toutes les méthodes renvoient des
/// `Draw` ; `complete_only` écarte les tirages incomplets ou invalides.
pub trait DrawSource {
    /// Les `n` derniers tirages (plus récent en premier), jusqu'à `until` inclus.
    fn last_draws(&self, n: usize, until: Option<NaiveDate>, complete_only: bool) -> Result<Vec<Draw>>;

    /// Tout l'historique, ordre chronologique.
    fn all_draws(&self, complete_only: bool) -> Result<Vec<Draw>>;

    /// Tirages tombés le même jour du mois (MM-JJ), toutes années confondues.
    fn same_month_day(&self, date: NaiveDate, complete_only: bool) -> Result<Vec<Draw>>;

    fn same_weekday(&self, date: NaiveDate, complete_only: bool) -> Result<Vec<Draw>>;

    /// Tirages complets entre `start` et `end` inclus, ordre chronologique.
    fn draws_between(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<Draw>>;
}
