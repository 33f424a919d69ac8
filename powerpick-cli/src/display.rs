use comfy_table::{presets::UTF8_FULL, Cell, Color, ContentArrangement, Table};

use powerpick_db::models::Draw;
use powerpick_engine::assistants::CatalogEntry;
use powerpick_engine::backtest::BacktestReport;
use powerpick_engine::consensus::ConsensusCombo;
use powerpick_engine::engine::AssistantRun;
use powerpick_engine::guard::BlockReason;
use powerpick_engine::jobs::JobStatus;
use powerpick_engine::rescore::RescoreReport;
use powerpick_engine::{EngineError, RecommendReport};

fn new_table(header: Vec<&str>) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header);
    table
}

fn join_numbers(numbers: &[u8]) -> String {
    numbers
        .iter()
        .map(|n| format!("{:2}", n))
        .collect::<Vec<_>>()
        .join(" - ")
}

fn describe_block(reason: &BlockReason) -> String {
    let when = reason
        .draw_date
        .map(|d| d.to_string())
        .unwrap_or_else(|| "hors fenêtre".to_string());
    format!(
        "{} ({} communes{}, tirage {})",
        reason.rule.as_str(),
        reason.overlap,
        if reason.same_powerball { " + PB" } else { "" },
        when
    )
}

pub fn display_error(err: &EngineError) {
    let report = err.report();
    eprintln!("[{}] {}", report.code, report.message);
}

pub fn display_draws(draws: &[Draw]) {
    if draws.is_empty() {
        println!("Aucun tirage à afficher.");
        return;
    }

    let mut table = new_table(vec!["Date", "Jour", "Blanches", "Powerball"]);
    for draw in draws {
        let (whites, pb) = if draw.is_complete() {
            (join_numbers(&draw.sorted_whites()), draw.powerball.to_string())
        } else {
            ("incomplet".to_string(), "—".to_string())
        };
        table.add_row(vec![
            draw.date.to_string(),
            draw.date.format("%a").to_string(),
            whites,
            pb,
        ]);
    }
    println!("{table}");
}

fn display_run(run: &AssistantRun) {
    println!(
        "\n── {} ({}/{} grilles, {} tentatives) ──",
        run.label,
        run.suggestions.len(),
        run.requested,
        run.attempts
    );
    if run.suggestions.is_empty() {
        println!("Aucune grille acceptée.");
    } else {
        let mut table = new_table(vec!["#", "Blanches", "PB", "Score", "Pourquoi"]);
        for (i, s) in run.suggestions.iter().enumerate() {
            table.add_row(vec![
                Cell::new(i + 1),
                Cell::new(join_numbers(&s.whites)),
                Cell::new(s.powerball).fg(Color::Yellow),
                Cell::new(format!("{:.4}", s.score())),
                Cell::new(s.explanation.why.join("\n")),
            ]);
        }
        println!("{table}");
    }
    if run.exhausted {
        println!("  Budget épuisé avant d'atteindre {} grilles.", run.requested);
    }
    if run.filtered > 0 || run.blocked_count > 0 {
        println!(
            "  Écartées : {} par le profil, {} par le garde-fou",
            run.filtered, run.blocked_count
        );
    }
}

pub fn display_report(report: &RecommendReport) {
    println!(
        "Suggestions pour le {} (graine {}, dernier tirage {} : {} + {})",
        report.target_date,
        report.seed,
        report.last_draw_used.date,
        join_numbers(&report.last_draw_used.sorted_whites()),
        report.last_draw_used.powerball
    );

    let mut table = new_table(vec!["Fenêtre", "Tirages", "Chaudes", "En retard", "PB fréquents"]);
    for w in &report.analysis {
        table.add_row(vec![
            w.window.to_string(),
            w.draws_used.to_string(),
            join_numbers(&w.hot_whites),
            join_numbers(&w.overdue_whites),
            join_numbers(&w.top_powerballs),
        ]);
    }
    println!("{table}");
    println!(
        "Même jour/mois : {} tirage(s), même jour de semaine : {} tirage(s)",
        report.same_mmdd_count, report.same_weekday_count
    );
    println!(
        "Profil de référence ({} tirages) : {:.2} impairs, {:.2} hautes, somme {:.1}",
        report.shape_ref.draws, report.shape_ref.avg_odd, report.shape_ref.avg_high, report.shape_ref.avg_sum
    );
    if report.skipped_rows > 0 {
        println!("{} tirage(s) incomplet(s) ignoré(s).", report.skipped_rows);
    }

    for run in report.results.values() {
        display_run(run);
    }
}

pub fn display_consensus(combo: &ConsensusCombo) {
    println!(
        "\nGrille consensus pour le {} (graine {}, {} suggestions votantes)",
        combo.target_date, combo.seed, combo.total_suggestions
    );
    let mut table = new_table(vec!["Numéro", "Votes"]);
    for (n, v) in combo.whites.iter().zip(&combo.votes_whites) {
        table.add_row(vec![Cell::new(n), Cell::new(v)]);
    }
    table.add_row(vec![
        Cell::new(format!("PB {}", combo.powerball)).fg(Color::Yellow),
        Cell::new(combo.votes_powerball),
    ]);
    println!("{table}");
    println!("Score moyen : {:.4}", combo.score);
    let per_assistant = combo
        .assistant_scores
        .iter()
        .map(|(id, s)| format!("{}={:.3}", id, s))
        .collect::<Vec<_>>()
        .join(" ");
    println!("Par assistant : {}", per_assistant);
    for line in &combo.why {
        println!("  • {}", line);
    }
    if combo.mutations > 0 {
        println!("{} mutation(s) pour passer le garde-fou.", combo.mutations);
    }
    if let Some(reason) = &combo.near_duplicate {
        println!("Attention, quasi-doublon : {}", describe_block(reason));
    }
}

pub fn display_rescore(report: &RescoreReport) {
    println!(
        "Grille {} pour le {}",
        report.key, report.target_date
    );
    if report.is_historical {
        println!("Cette combinaison est déjà sortie.");
    }
    if let Some(reason) = &report.near_duplicate {
        println!("Quasi-doublon : {}", describe_block(reason));
    }

    let mut table = new_table(vec!["Assistant", "Score", "Signaux", "Pourquoi"]);
    for (id, e) in &report.results {
        let signals = e
            .signals_used
            .iter()
            .map(|(k, v)| format!("{}={:.2}", k, v))
            .collect::<Vec<_>>()
            .join(" ");
        table.add_row(vec![
            id.label().to_string(),
            format!("{:.4}", e.score),
            signals,
            e.why.join("\n"),
        ]);
    }
    println!("{table}");
}

pub fn display_backtest(report: &BacktestReport) {
    println!(
        "\nBacktest {} → {} : {} date(s), {} ignorée(s)",
        report.start,
        report.end,
        report.rows.len(),
        report.skipped_dates.len()
    );
    let mut table = new_table(vec![
        "Assistant",
        "Dates",
        "Score moy.",
        "Recoupement interne",
        "Grilles moy.",
        "Meilleur match moy.",
        "PB trouvés",
    ]);
    for (id, s) in &report.summary {
        table.add_row(vec![
            Cell::new(id.label()),
            Cell::new(s.dates),
            Cell::new(format!("{:.4}", s.avg_score)),
            Cell::new(format!("{:.2}", s.avg_internal_overlap)),
            Cell::new(format!("{:.1}", s.avg_suggestions)),
            Cell::new(format!("{:.2}", s.avg_best_match)),
            Cell::new(s.powerball_hits),
        ]);
    }
    println!("{table}");
}

pub fn display_catalog(entries: &Vec<CatalogEntry>) {
    let mut table = new_table(vec!["Id", "Assistant", "Description", "Tags"]);
    for e in entries {
        table.add_row(vec![
            e.id.as_str().to_string(),
            e.label.to_string(),
            e.description.to_string(),
            e.rationale_tags.join(", "),
        ]);
    }
    println!("{table}");
}

pub fn display_job(status: &JobStatus) {
    println!("Job {} ({}) terminé.", status.id, status.kind);
    let Some(serde_json::Value::Object(results)) = &status.result else {
        return;
    };
    let mut table = new_table(vec!["Assistant", "Grilles", "Tentatives", "Épuisé"]);
    for (id, run) in results {
        let count = run
            .get("suggestions")
            .and_then(|s| s.as_array())
            .map(|a| a.len())
            .unwrap_or(0);
        let attempts = run.get("attempts").and_then(|a| a.as_u64()).unwrap_or(0);
        let exhausted = run.get("exhausted").and_then(|e| e.as_bool()).unwrap_or(false);
        table.add_row(vec![
            Cell::new(id),
            Cell::new(count),
            Cell::new(attempts),
            Cell::new(if exhausted { "oui" } else { "non" }),
        ]);
    }
    println!("{table}");
    println!("Détail complet avec --json.");
}
