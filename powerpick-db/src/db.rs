use anyhow::{Context, Result};
use chrono::{Datelike, NaiveDate};
use rusqlite::types::Value;
use rusqlite::{Connection, Row, ToSql};
use std::path::Path;

use crate::models::Draw;
use crate::source::DrawSource;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS draws (
    draw_date  TEXT PRIMARY KEY,
    white1     INTEGER,
    white2     INTEGER,
    white3     INTEGER,
    white4     INTEGER,
    white5     INTEGER,
    powerball  INTEGER
);
CREATE INDEX IF NOT EXISTS idx_draws_mmdd ON draws (substr(draw_date, 6, 5));
";

const COLUMNS: &str = "draw_date, white1, white2, white3, white4, white5, powerball";

const COMPLETE_FILTER: &str = "white1 BETWEEN 1 AND 69 AND white2 BETWEEN 1 AND 69 \
     AND white3 BETWEEN 1 AND 69 AND white4 BETWEEN 1 AND 69 \
     AND white5 BETWEEN 1 AND 69 AND powerball BETWEEN 1 AND 26";

pub fn db_path() -> std::path::PathBuf {
    if let Ok(p) = std::env::var("POWERPICK_DB") {
        if !p.trim().is_empty() {
            return std::path::PathBuf::from(p);
        }
    }
    let mut path = std::env::current_dir().unwrap_or_default();
    path.push("data");
    path.push("powerpick.db");
    path
}

pub fn open_db(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Impossible de créer le répertoire {:?}", parent))?;
    }
    let conn = Connection::open(path)
        .with_context(|| format!("Impossible d'ouvrir la base {:?}", path))?;
    Ok(conn)
}

pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA).context("Échec de la migration")?;
    Ok(())
}

fn nullable(n: u8) -> Option<u8> {
    if n == 0 {
        None
    } else {
        Some(n)
    }
}

pub fn insert_draw(conn: &Connection, draw: &Draw) -> Result<bool> {
    let changed = conn
        .execute(
            "INSERT OR IGNORE INTO draws (draw_date, white1, white2, white3, white4, white5, powerball)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                draw.date,
                nullable(draw.whites[0]),
                nullable(draw.whites[1]),
                nullable(draw.whites[2]),
                nullable(draw.whites[3]),
                nullable(draw.whites[4]),
                nullable(draw.powerball),
            ],
        )
        .context("Échec de l'insertion")?;
    Ok(changed > 0)
}

pub fn count_draws(conn: &Connection) -> Result<u32> {
    let count: u32 = conn.query_row("SELECT COUNT(*) FROM draws", [], |row| row.get(0))?;
    Ok(count)
}

/// Une cellule illisible (texte, réel, entier hors 1..=255) est lue comme 0 :
/// le tirage devient incomplet au lieu de faire échouer toute la requête.
fn cell_number(value: Value) -> u8 {
    match value {
        Value::Integer(n) if (1..=255).contains(&n) => n as u8,
        _ => 0,
    }
}

fn row_to_draw(row: &Row<'_>) -> rusqlite::Result<Draw> {
    let get = |idx: usize| -> rusqlite::Result<u8> { Ok(cell_number(row.get::<_, Value>(idx)?)) };
    Ok(Draw {
        date: row.get(0)?,
        whites: [get(1)?, get(2)?, get(3)?, get(4)?, get(5)?],
        powerball: get(6)?,
    })
}

/// Exécute une requête sur `draws`. Les doublons de blanches passent le filtre
/// SQL ; ils sont retirés ici quand seuls les tirages complets sont demandés.
fn query_draws(
    conn: &Connection,
    mut clauses: Vec<String>,
    params: &[&dyn ToSql],
    order: &str,
    limit: Option<usize>,
    complete_only: bool,
) -> Result<Vec<Draw>> {
    if complete_only {
        clauses.push(COMPLETE_FILTER.to_string());
    }
    let mut sql = format!("SELECT {COLUMNS} FROM draws");
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    sql.push_str(&format!(" ORDER BY draw_date {order}"));
    if let Some(n) = limit {
        sql.push_str(&format!(" LIMIT {n}"));
    }

    let mut stmt = conn.prepare(&sql).context("Requête invalide")?;
    let draws = stmt
        .query_map(params, row_to_draw)?
        .collect::<Result<Vec<_>, _>>()
        .context("Échec de lecture des tirages")?;

    Ok(draws
        .into_iter()
        .filter(|d| !complete_only || d.is_complete())
        .collect())
}

pub fn fetch_last_draws(
    conn: &Connection,
    limit: usize,
    until: Option<NaiveDate>,
    complete_only: bool,
) -> Result<Vec<Draw>> {
    match until {
        Some(date) => query_draws(
            conn,
            vec!["draw_date <= ?1".to_string()],
            &[&date],
            "DESC",
            Some(limit),
            complete_only,
        ),
        None => query_draws(conn, vec![], &[], "DESC", Some(limit), complete_only),
    }
}

pub fn fetch_all_draws(conn: &Connection, complete_only: bool) -> Result<Vec<Draw>> {
    query_draws(conn, vec![], &[], "ASC", None, complete_only)
}

pub fn fetch_same_month_day(conn: &Connection, date: NaiveDate, complete_only: bool) -> Result<Vec<Draw>> {
    let mmdd = date.format("%m-%d").to_string();
    query_draws(
        conn,
        vec!["substr(draw_date, 6, 5) = ?1".to_string()],
        &[&mmdd],
        "ASC",
        None,
        complete_only,
    )
}

/// strftime('%w') : 0 = dimanche .. 6 = samedi.
pub fn fetch_same_weekday(conn: &Connection, date: NaiveDate, complete_only: bool) -> Result<Vec<Draw>> {
    let wd = date.weekday().num_days_from_sunday().to_string();
    query_draws(
        conn,
        vec!["strftime('%w', draw_date) = ?1".to_string()],
        &[&wd],
        "ASC",
        None,
        complete_only,
    )
}

pub fn fetch_draws_between(conn: &Connection, start: NaiveDate, end: NaiveDate) -> Result<Vec<Draw>> {
    query_draws(
        conn,
        vec!["draw_date >= ?1".to_string(), "draw_date <= ?2".to_string()],
        &[&start, &end],
        "ASC",
        None,
        true,
    )
}

impl DrawSource for Connection {
    fn last_draws(&self, n: usize, until: Option<NaiveDate>, complete_only: bool) -> Result<Vec<Draw>> {
        fetch_last_draws(self, n, until, complete_only)
    }

    fn all_draws(&self, complete_only: bool) -> Result<Vec<Draw>> {
        fetch_all_draws(self, complete_only)
    }

    fn same_month_day(&self, date: NaiveDate, complete_only: bool) -> Result<Vec<Draw>> {
        fetch_same_month_day(self, date, complete_only)
    }

    fn same_weekday(&self, date: NaiveDate, complete_only: bool) -> Result<Vec<Draw>> {
        fetch_same_weekday(self, date, complete_only)
    }

    fn draws_between(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<Draw>> {
        fetch_draws_between(self, start, end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::parse_date;

    fn test_draw(date: &str, whites: [u8; 5], pb: u8) -> Draw {
        Draw::new(parse_date(date).unwrap(), whites, pb)
    }

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        conn
    }

    #[test]
    fn test_insert_and_count() {
        let conn = test_conn();
        assert_eq!(count_draws(&conn).unwrap(), 0);

        insert_draw(&conn, &test_draw("2024-01-01", [1, 2, 3, 4, 5], 6)).unwrap();
        assert_eq!(count_draws(&conn).unwrap(), 1);
    }

    #[test]
    fn test_duplicate_ignored() {
        let conn = test_conn();
        let draw = test_draw("2024-01-01", [1, 2, 3, 4, 5], 6);
        assert!(insert_draw(&conn, &draw).unwrap());
        assert!(!insert_draw(&conn, &draw).unwrap());
        assert_eq!(count_draws(&conn).unwrap(), 1);
    }

    #[test]
    fn test_fetch_order_and_until() {
        let conn = test_conn();
        insert_draw(&conn, &test_draw("2024-01-01", [1, 2, 3, 4, 5], 6)).unwrap();
        insert_draw(&conn, &test_draw("2024-01-06", [6, 7, 8, 9, 10], 7)).unwrap();
        insert_draw(&conn, &test_draw("2024-01-03", [11, 12, 13, 14, 15], 8)).unwrap();

        let draws = fetch_last_draws(&conn, 10, None, true).unwrap();
        assert_eq!(draws.len(), 3);
        assert_eq!(draws[0].date, parse_date("2024-01-06").unwrap());
        assert_eq!(draws[2].date, parse_date("2024-01-01").unwrap());

        let until = parse_date("2024-01-05").unwrap();
        let draws = fetch_last_draws(&conn, 10, Some(until), true).unwrap();
        assert_eq!(draws.len(), 2);
        assert_eq!(draws[0].date, parse_date("2024-01-03").unwrap());

        let all = fetch_all_draws(&conn, true).unwrap();
        assert_eq!(all[0].date, parse_date("2024-01-01").unwrap());
    }

    #[test]
    fn test_incomplete_rows_filtered() {
        let conn = test_conn();
        insert_draw(&conn, &test_draw("2024-01-01", [1, 2, 3, 4, 5], 6)).unwrap();
        insert_draw(&conn, &test_draw("2024-01-03", [1, 2, 0, 4, 5], 6)).unwrap();
        insert_draw(&conn, &test_draw("2024-01-06", [1, 1, 3, 4, 5], 6)).unwrap();

        let complete = fetch_all_draws(&conn, true).unwrap();
        assert_eq!(complete.len(), 1);

        let raw = fetch_all_draws(&conn, false).unwrap();
        assert_eq!(raw.len(), 3);
        assert_eq!(raw[1].whites[2], 0, "NULL doit être lu comme 0");
    }

    #[test]
    fn test_out_of_range_cells_read_as_incomplete() {
        let conn = test_conn();
        insert_draw(&conn, &test_draw("2024-01-01", [1, 2, 3, 4, 5], 6)).unwrap();
        conn.execute("INSERT INTO draws VALUES ('2024-01-04', 7, 8, 9, 10, 300, 2)", [])
            .unwrap();
        conn.execute("INSERT INTO draws VALUES ('2024-01-06', 7, 8, 'x', 10, 11, -3)", [])
            .unwrap();

        let raw = fetch_all_draws(&conn, false).unwrap();
        assert_eq!(raw.len(), 3);
        assert_eq!(raw[1].whites[4], 0);
        assert_eq!(raw[2].whites[2], 0);
        assert_eq!(raw[2].powerball, 0);
        assert!(!raw[1].is_complete() && !raw[2].is_complete());

        let last = fetch_last_draws(&conn, 10, None, false).unwrap();
        assert_eq!(last.len(), 3);
        assert_eq!(fetch_last_draws(&conn, 10, None, true).unwrap().len(), 1);
    }

    #[test]
    fn test_same_month_day_and_weekday() {
        let conn = test_conn();
        // 2022-03-15 mardi, 2023-03-15 mercredi, 2023-03-14 mardi
        insert_draw(&conn, &test_draw("2022-03-15", [1, 2, 3, 4, 5], 6)).unwrap();
        insert_draw(&conn, &test_draw("2023-03-15", [6, 7, 8, 9, 10], 7)).unwrap();
        insert_draw(&conn, &test_draw("2023-03-14", [11, 12, 13, 14, 15], 8)).unwrap();

        let target = parse_date("2024-03-15").unwrap(); // vendredi
        let mmdd = fetch_same_month_day(&conn, target, true).unwrap();
        assert_eq!(mmdd.len(), 2);

        let tuesday = parse_date("2024-03-12").unwrap();
        let wd = fetch_same_weekday(&conn, tuesday, true).unwrap();
        assert_eq!(wd.len(), 2);
        assert!(wd.iter().all(|d| d.date.weekday() == chrono::Weekday::Tue));
    }

    #[test]
    fn test_draws_between_inclusive() {
        let conn = test_conn();
        insert_draw(&conn, &test_draw("2024-01-01", [1, 2, 3, 4, 5], 6)).unwrap();
        insert_draw(&conn, &test_draw("2024-01-03", [6, 7, 8, 9, 10], 7)).unwrap();
        insert_draw(&conn, &test_draw("2024-01-06", [11, 12, 13, 14, 15], 8)).unwrap();

        let draws = fetch_draws_between(
            &conn,
            parse_date("2024-01-01").unwrap(),
            parse_date("2024-01-03").unwrap(),
        )
        .unwrap();
        assert_eq!(draws.len(), 2);
        assert!(draws[0].date < draws[1].date);
    }
}
