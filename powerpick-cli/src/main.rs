mod display;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};

use powerpick_db::db::{count_draws, db_path, fetch_last_draws, insert_draw, migrate, open_db};
use powerpick_db::models::{parse_date, validate_draw, Draw};
use powerpick_db::rusqlite::Connection;
use powerpick_engine::assistants::{catalog, AssistantId};
use powerpick_engine::backtest::{run_backtest, BacktestRequest};
use powerpick_engine::config::{load_config, save_config, EngineConfig, GuardConfig};
use powerpick_engine::consensus::build_consensus;
use powerpick_engine::engine::MAX_BULK_SUGGESTIONS;
use powerpick_engine::jobs::{JobRegistry, JobState};
use powerpick_engine::rescore::rescore;
use powerpick_engine::sampler::Constraints;
use powerpick_engine::{EngineError, RecommendRequest, RecommendationEngine};

#[derive(Parser)]
#[command(name = "powerpick", about = "Suggestions Powerball explicables et sans doublon historique")]
struct Cli {
    /// Fichier de configuration du moteur (JSON)
    #[arg(long, global = true, default_value = "powerpick.json")]
    config: PathBuf,

    /// Sortie JSON au lieu des tableaux
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Afficher le chemin de la base de données
    DbPath,

    /// Ajouter un tirage
    Add {
        /// Date du tirage (AAAA-MM-JJ)
        #[arg(short, long)]
        date: String,

        /// Les 5 blanches (1-69)
        #[arg(short, long, num_args = 5, required = true)]
        whites: Vec<u8>,

        /// Powerball (1-26)
        #[arg(short, long)]
        powerball: u8,
    },

    /// Lister les derniers tirages
    List {
        #[arg(short, long, default_value = "10")]
        last: usize,
    },

    /// Catalogue des assistants
    Assistants,

    /// Suggestions par assistant
    Suggest(RunArgs),

    /// Grille unique issue du vote de tous les assistants
    Consensus(RunArgs),

    /// Évaluer une grille existante
    Rescore {
        #[arg(short, long)]
        date: Option<String>,

        #[arg(short, long, num_args = 5, required = true)]
        whites: Vec<u8>,

        #[arg(short, long)]
        powerball: u8,

        /// Fenêtres d'analyse, séparées par des virgules
        #[arg(long, value_delimiter = ',')]
        windows: Vec<usize>,

        /// Assistants, séparés par des virgules
        #[arg(short, long)]
        assistants: Option<String>,
    },

    /// Rejouer le moteur sur des dates passées
    Backtest {
        #[arg(long)]
        start: String,

        #[arg(long)]
        end: String,

        /// Nombre maximal de dates (les plus récentes)
        #[arg(long, default_value = "30")]
        limit: usize,

        #[arg(short, long, default_value = "5")]
        count: usize,

        #[arg(long, default_value = "1000")]
        base_seed: u64,

        #[arg(long, value_delimiter = ',')]
        windows: Vec<usize>,

        #[arg(short, long)]
        assistants: Option<String>,
    },

    /// Génération massive en tâche de fond
    Bulk(RunArgs),

    /// Afficher ou écrire la configuration
    Config {
        /// Écrire la configuration par défaut dans le fichier
        #[arg(long)]
        init: bool,
    },
}

#[derive(Args, Clone)]
struct RunArgs {
    /// Date cible (AAAA-MM-JJ), aujourd'hui par défaut
    #[arg(short, long)]
    date: Option<String>,

    /// Fenêtres d'analyse, séparées par des virgules
    #[arg(long, value_delimiter = ',')]
    windows: Vec<usize>,

    /// Suggestions par assistant
    #[arg(short, long, default_value = "5")]
    count: usize,

    #[arg(long)]
    seed: Option<u64>,

    /// Assistants, séparés par des virgules
    #[arg(short, long)]
    assistants: Option<String>,

    #[arg(long)]
    fixed_first: Option<u8>,

    #[arg(long, value_delimiter = ',')]
    fixed: Vec<u8>,

    #[arg(long, value_delimiter = ',')]
    exclude: Vec<u8>,

    #[arg(long)]
    fixed_pb: Option<u8>,

    #[arg(long, value_delimiter = ',')]
    exclude_pb: Vec<u8>,

    #[arg(long)]
    whites_min: Option<u8>,

    #[arg(long)]
    whites_max: Option<u8>,

    /// Nombre minimal de blanches ≥ 50
    #[arg(long)]
    min_high: Option<usize>,

    /// Nombre minimal de blanches ≤ 20
    #[arg(long)]
    min_low: Option<usize>,

    #[arg(long)]
    max_overlap_last: Option<usize>,

    #[arg(long)]
    pb_not_in_last: Option<usize>,

    /// Désactiver le contrôle de quasi-doublon (l'exact reste vérifié)
    #[arg(long)]
    no_guard: bool,

    #[arg(long)]
    guard_lookback: Option<usize>,
}

impl RunArgs {
    fn to_request(&self, config: &EngineConfig, bulk: bool) -> Result<RecommendRequest> {
        let date = self.date.as_deref().map(parse_date).transpose()?;
        let assistant_ids = parse_assistants(self.assistants.as_deref())?;
        let guard = if self.no_guard || self.guard_lookback.is_some() {
            Some(GuardConfig {
                enabled: !self.no_guard,
                lookback: self.guard_lookback.unwrap_or(config.guard.lookback),
                ..config.guard
            })
        } else {
            None
        };
        Ok(RecommendRequest {
            date,
            windows: self.windows.clone(),
            n_suggestions: self.count,
            bulk,
            seed: self.seed,
            assistant_ids,
            constraints: Constraints {
                fixed_first: self.fixed_first,
                fixed_numbers: self.fixed.clone(),
                exclude_numbers: self.exclude.clone(),
                fixed_powerball: self.fixed_pb,
                exclude_powerballs: self.exclude_pb.clone(),
                whites_min: self.whites_min,
                whites_max: self.whites_max,
                min_high: self.min_high,
                min_low: self.min_low,
                max_overlap_last_draw: self.max_overlap_last,
                pb_not_in_last_n: self.pb_not_in_last,
            },
            guard,
        })
    }
}

fn parse_assistants(raw: Option<&str>) -> Result<Option<Vec<AssistantId>>> {
    match raw {
        Some(list) => Ok(Some(AssistantId::parse_list(list)?)),
        None => Ok(None),
    }
}

fn to_whites(values: &[u8]) -> Result<[u8; 5]> {
    if values.len() != 5 {
        bail!("5 blanches attendues, {} reçues", values.len());
    }
    let mut whites = [0u8; 5];
    whites.copy_from_slice(values);
    Ok(whites)
}

fn target_date(raw: Option<&str>) -> Result<NaiveDate> {
    match raw {
        Some(d) => parse_date(d),
        None => Ok(chrono::Local::now().date_naive()),
    }
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    let json = cli.json;

    if let Err(err) = run(cli) {
        if let Some(engine_err) = err.downcast_ref::<EngineError>() {
            if json {
                println!("{}", serde_json::to_string_pretty(&engine_err.report())?);
            } else {
                display::display_error(engine_err);
            }
            std::process::exit(1);
        }
        return Err(err);
    }
    Ok(())
}

fn run(cli: Cli) -> Result<()> {
    let path = db_path();
    let config = load_config(&cli.config)?;

    if let Command::Config { init } = cli.command {
        return cmd_config(&cli.config, &config, init);
    }
    if let Command::DbPath = cli.command {
        println!("{}", path.display());
        return Ok(());
    }
    if let Command::Assistants = cli.command {
        return print_or(cli.json, &catalog(), display::display_catalog);
    }

    let conn = open_db(&path)?;
    migrate(&conn)?;
    log::info!("Base : {}", path.display());
    let engine = RecommendationEngine::with_default_cache(config);

    match cli.command {
        Command::Add { date, whites, powerball } => cmd_add(&conn, &date, &whites, powerball),
        Command::List { last } => cmd_list(&conn, last),
        Command::Suggest(args) => {
            let request = args.to_request(engine.config(), false)?;
            let report = engine.recommend(&conn, &request)?;
            print_or(cli.json, &report, display::display_report)
        }
        Command::Consensus(args) => {
            let request = args.to_request(engine.config(), false)?;
            let combo = build_consensus(&engine, &conn, &request)?;
            print_or(cli.json, &combo, display::display_consensus)
        }
        Command::Rescore {
            date,
            whites,
            powerball,
            windows,
            assistants,
        } => {
            let date = target_date(date.as_deref())?;
            let ids = parse_assistants(assistants.as_deref())?;
            let report = rescore(
                &engine,
                &conn,
                date,
                &windows,
                ids.as_deref(),
                to_whites(&whites)?,
                powerball,
            )?;
            print_or(cli.json, &report, display::display_rescore)
        }
        Command::Backtest {
            start,
            end,
            limit,
            count,
            base_seed,
            windows,
            assistants,
        } => {
            let mut request = BacktestRequest::new(parse_date(&start)?, parse_date(&end)?);
            request.limit_dates = limit;
            request.n_suggestions = count;
            request.base_seed = base_seed;
            request.windows = windows;
            request.assistant_ids = parse_assistants(assistants.as_deref())?;
            cmd_backtest(&engine, &conn, &request, cli.json)
        }
        Command::Bulk(args) => cmd_bulk(engine.config(), &path, &args, cli.json),
        Command::Config { .. } | Command::DbPath | Command::Assistants => Ok(()),
    }
}

fn print_or<T: serde::Serialize>(json: bool, value: &T, show: fn(&T)) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        show(value);
    }
    Ok(())
}

fn cmd_config(path: &Path, config: &EngineConfig, init: bool) -> Result<()> {
    if init {
        save_config(&EngineConfig::default(), path)?;
        println!("Configuration par défaut écrite dans {}", path.display());
    } else {
        println!("{}", serde_json::to_string_pretty(config)?);
    }
    Ok(())
}

fn cmd_add(conn: &Connection, date: &str, whites: &[u8], powerball: u8) -> Result<()> {
    let date = parse_date(date)?;
    let whites = to_whites(whites)?;
    validate_draw(&whites, powerball)?;
    let draw = Draw::new(date, whites, powerball);
    if insert_draw(conn, &draw)? {
        println!("Tirage du {} inséré.", date);
    } else {
        println!("Un tirage existe déjà pour le {} (doublon ignoré).", date);
    }
    Ok(())
}

fn cmd_list(conn: &Connection, last: usize) -> Result<()> {
    if count_draws(conn)? == 0 {
        println!("Base vide. Ajoutez d'abord des tirages : powerpick add");
        return Ok(());
    }
    let draws = fetch_last_draws(conn, last, None, false)?;
    display::display_draws(&draws);
    Ok(())
}

fn cmd_backtest(
    engine: &RecommendationEngine,
    conn: &Connection,
    request: &BacktestRequest,
    json: bool,
) -> Result<()> {
    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .context("Gabarit de progression invalide")?
            .progress_chars("=> "),
    );
    pb.set_message("backtest");
    let progress = |done: usize, total: usize| {
        pb.set_length(total as u64);
        pb.set_position(done as u64);
    };
    let report = run_backtest(engine, conn, request, Some(&progress));
    pb.finish_and_clear();
    print_or(json, &report?, display::display_backtest)
}

fn cmd_bulk(config: &EngineConfig, db: &Path, args: &RunArgs, json: bool) -> Result<()> {
    if args.count > MAX_BULK_SUGGESTIONS {
        bail!("{} suggestions maximum en mode bulk", MAX_BULK_SUGGESTIONS);
    }
    let request = args.to_request(config, true)?;
    let ids = AssistantId::resolve(request.assistant_ids.as_deref());
    let registry = JobRegistry::new(8);

    let task_config = config.clone();
    let task_db = db.to_path_buf();
    let id = registry.spawn("bulk", move |progress| {
        let conn = open_db(&task_db).map_err(|e| e.to_string())?;
        let engine = RecommendationEngine::new(task_config);
        let mut results = serde_json::Map::new();
        for (i, assistant) in ids.iter().enumerate() {
            let mut one = request.clone();
            one.assistant_ids = Some(vec![*assistant]);
            let report = engine
                .recommend(&conn, &one)
                .map_err(|e| format!("{}: {}", e.code(), e))?;
            for (aid, run) in report.results {
                let value = serde_json::to_value(&run).map_err(|e| e.to_string())?;
                results.insert(aid.as_str().to_string(), value);
            }
            progress.set(i + 1, ids.len());
        }
        Ok(serde_json::Value::Object(results))
    })?;

    let pb = ProgressBar::new(100);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}% {msg}")
            .context("Gabarit de progression invalide")?
            .progress_chars("=> "),
    );
    pb.set_message(format!("job {}", id));
    let status = loop {
        let Some(status) = registry.get(&id) else {
            bail!("Job {} introuvable", id);
        };
        pb.set_position((status.progress * 100.0) as u64);
        if status.state.is_finished() {
            break status;
        }
        std::thread::sleep(Duration::from_millis(100));
    };
    pb.finish_and_clear();

    match status.state {
        JobState::Done => print_or(json, &status, display::display_job),
        _ => bail!(
            "Job {} en erreur : {}",
            status.id,
            status.error.unwrap_or_default()
        ),
    }
}
