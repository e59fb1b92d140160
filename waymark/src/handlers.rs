use anyhow::{Context, Result, bail};
use clap::ArgMatches;
use colored::Colorize;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;
use waymark_core::data::{Database, SessionSummary};
use waymark_core::explore::{ExploreOptions, execute_exploration};
use waymark_core::report::{
    ReportData, ReportFormat, gather_report_data, generate_json_report, generate_markdown_report,
    generate_text_report, save_report,
};
use waymark_scanner::explorer::ExplorerConfig;

pub const DEFAULT_DATA_DIR: &str = "~/.config/waymark/";
pub const DATABASE_FILE: &str = "waymark.db";

pub fn print_banner() {
    print_divider();
    println!(
        "  {} {}  {}",
        "WAYMARK".bright_cyan().bold(),
        env!("CARGO_PKG_VERSION").dimmed(),
        "maps the entity pages of a web application".bright_white()
    );
    print_divider();
    println!();
}

/// Logs go to stderr so reports on stdout stay clean. `RUST_LOG` overrides
/// the default `warn` level.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

fn print_divider() {
    println!("{}", "═".repeat(60).bright_blue().bold());
}

fn print_prompt(msg: &str) -> io::Result<String> {
    print!("{} ", msg.bright_cyan().bold());
    io::stdout().flush()?;
    let mut response = String::new();
    io::stdin().read_line(&mut response)?;
    Ok(response.trim().to_lowercase())
}

/// `--db` when given, otherwise the database inside the default data directory.
pub fn resolve_db_path(explicit: Option<&PathBuf>) -> PathBuf {
    match explicit {
        Some(path) => PathBuf::from(shellexpand::tilde(&path.to_string_lossy()).as_ref()),
        None => Path::new(shellexpand::tilde(DEFAULT_DATA_DIR).as_ref()).join(DATABASE_FILE),
    }
}

fn open_database(args: &ArgMatches) -> Result<Database> {
    let db_path = resolve_db_path(args.get_one::<PathBuf>("db"));
    if !Database::exists(&db_path) {
        bail!(
            "no database at {} (run `waymark init` first)",
            db_path.display()
        );
    }
    debug!(path = %db_path.display(), "Opening database");
    Database::new(&db_path).with_context(|| format!("cannot open {}", db_path.display()))
}

/// Build the explorer configuration from the `explore` flags.
pub fn explorer_config_from_args(args: &ArgMatches) -> ExplorerConfig {
    let config = ExplorerConfig::default();
    let max_depth = args
        .get_one::<usize>("max-depth")
        .copied()
        .unwrap_or(config.max_depth);
    let max_entities = args
        .get_one::<usize>("max-entities")
        .copied()
        .unwrap_or(config.max_entities);
    let max_repairs = args
        .get_one::<usize>("max-repairs")
        .copied()
        .unwrap_or(config.max_repairs);
    let targets: Vec<String> = args
        .get_many::<String>("target")
        .map(|values| values.cloned().collect())
        .unwrap_or_default();

    config
        .with_max_depth(max_depth)
        .with_max_entities(max_entities)
        .with_max_repairs(max_repairs)
        .with_verify_paths(args.get_flag("verify-paths"))
        .with_expand_each_address_once(args.get_flag("expand-once"))
        .with_target_names(targets)
}

pub fn report_format(args: &ArgMatches) -> ReportFormat {
    args.get_one::<String>("format")
        .and_then(|f| ReportFormat::from_str(f))
        .unwrap_or(ReportFormat::Text)
}

pub fn render_report(data: &ReportData, format: ReportFormat) -> Result<String> {
    Ok(match format {
        ReportFormat::Text => generate_text_report(data),
        ReportFormat::Json => generate_json_report(data)?,
        ReportFormat::Markdown => generate_markdown_report(data),
    })
}

fn emit_report(content: &str, output: Option<&PathBuf>) -> Result<()> {
    match output {
        Some(path) => {
            save_report(content, path)
                .with_context(|| format!("cannot write report to {}", path.display()))?;
            println!(
                "{} Report saved to {}",
                "✓".green().bold(),
                path.display().to_string().bright_white()
            );
        }
        None => print!("{}", content),
    }
    Ok(())
}

/// One line of `waymark sessions` output.
pub fn format_session_row(session: &SessionSummary) -> String {
    let padded = format!("{:<14}", session.status);
    let status = match session.status.as_str() {
        "completed" => padded.green(),
        "bound_reached" => padded.cyan(),
        "running" => padded.blue(),
        "cancelled" => padded.yellow(),
        _ => padded.red(),
    };
    format!(
        "{}  {} {:>4} entities  {}",
        session.id.bright_white(),
        status,
        session.entity_count,
        session.seed_url
    )
}

pub fn handle_init(args: &ArgMatches) -> Result<()> {
    print_divider();
    println!("{}", "  WAYMARK INITIALIZATION".bright_white().bold());
    print_divider();
    println!();

    let data_dir = args
        .get_one::<String>("PATH")
        .map(String::as_str)
        .unwrap_or(DEFAULT_DATA_DIR);
    let force = args.get_flag("force");
    let expanded_data_dir = shellexpand::tilde(data_dir);
    let data_dir = Path::new(expanded_data_dir.as_ref());
    let db_loc = data_dir.join(DATABASE_FILE);
    let db_path = db_loc.as_path();

    println!(
        "{} Target: {}",
        "→".blue(),
        data_dir.display().to_string().bright_white()
    );
    println!();

    if !data_dir.exists() {
        println!("{} Creating directory structure...", "→".blue());
        fs::create_dir_all(data_dir)
            .with_context(|| format!("cannot create {}", data_dir.display()))?;
        println!(
            "  {} {}",
            "✓".green(),
            data_dir.display().to_string().bright_white()
        );
    }

    if Database::exists(db_path) {
        let overwrite = if force {
            println!(
                "{} Deleting existing database (force mode)",
                "→".yellow().bold()
            );
            true
        } else {
            println!("{}", "⚠ WARNING".yellow().bold());
            println!("Database already exists at:");
            println!(
                "  {} {}",
                "•".yellow(),
                db_path.display().to_string().bright_white()
            );
            println!();
            let response = print_prompt("Would you like to overwrite it? [y/N]:")?;
            println!();
            response == "y" || response == "yes"
        };

        if overwrite {
            Database::remove(db_path)
                .with_context(|| format!("cannot remove {}", db_path.display()))?;
            println!("{} Existing database removed", "✓".green().bold());
        } else {
            println!("{} Keeping existing database", "→".blue());
        }
        println!();
    }

    if !Database::exists(db_path) {
        println!("{} Creating database...", "→".blue());
        Database::new(db_path)
            .with_context(|| format!("cannot create database at {}", db_path.display()))?;
        println!(
            "{} Database initialized: {}",
            "✓".green().bold(),
            db_path.display().to_string().bright_white()
        );
    }

    println!();
    print_divider();
    println!("{}", "  INITIALIZATION COMPLETE".green().bold());
    print_divider();
    println!();
    println!(
        "{} Database: {}",
        "✓".green().bold(),
        db_path.display().to_string().bright_white()
    );
    println!();
    Ok(())
}

pub async fn handle_explore(args: &ArgMatches) -> Result<()> {
    let url = args
        .get_one::<Url>("url")
        .context("--url is required")?;
    let db = open_database(args)?;
    let config = explorer_config_from_args(args);

    println!("\n🧭 Exploring {}", url.as_str().bright_white());
    println!("Max depth: {}", config.max_depth);
    println!("Max entities: {}", config.max_entities);
    if !config.target_names.is_empty() {
        println!("Targets: {}", config.target_names.join(", "));
    }
    println!();

    let mut options = ExploreOptions::new(url.as_str());
    options.config = config;
    options.skip_known = !args.get_flag("include-known");
    options.show_progress = true;

    let cancel = options.cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping after the current state");
            cancel.cancel();
        }
    });

    let progress_callback = Arc::new(|msg: String| {
        println!("{} {}", "→".blue(), msg);
    });

    let run = execute_exploration(options, &db, Some(progress_callback))
        .await
        .context("exploration failed")?;

    if run.outcome.is_partial() {
        println!(
            "\n{} Exploration stopped early ({}), results are partial\n",
            "⚠".yellow().bold(),
            run.outcome.termination.as_str().replace('_', " ")
        );
    } else {
        println!("\n{} Exploration complete!\n", "✓".green().bold());
    }

    let data = gather_report_data(&db, &run.session_id)?;
    let report = render_report(&data, report_format(args))?;
    emit_report(&report, args.get_one::<PathBuf>("output"))
}

pub fn handle_report(args: &ArgMatches) -> Result<()> {
    let session_id = args
        .get_one::<String>("session")
        .context("--session is required")?;
    let db = open_database(args)?;

    if db.get_session(session_id)?.is_none() {
        bail!("no session with id {}", session_id);
    }
    let data = gather_report_data(&db, session_id)?;
    let report = render_report(&data, report_format(args))?;
    emit_report(&report, args.get_one::<PathBuf>("output"))
}

pub fn handle_sessions(args: &ArgMatches) -> Result<()> {
    let db = open_database(args)?;
    let sessions = db.list_sessions()?;

    if sessions.is_empty() {
        println!("No exploration sessions yet. Run `waymark explore --url URL` to start one.");
        return Ok(());
    }

    print_divider();
    println!("{}", "  EXPLORATION SESSIONS".bright_white().bold());
    print_divider();
    for session in &sessions {
        println!("{}", format_session_row(session));
    }
    println!();
    Ok(())
}
