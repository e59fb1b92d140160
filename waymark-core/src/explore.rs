use crate::cache::CachedClassifier;
use crate::data::Database;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use waymark_scanner::explorer::{
    CancelFlag, EntityCallback, ExplorationOutcome, Explorer, ExplorerConfig, ProgressCallback,
};
use waymark_scanner::{DiscoveredEntity, ExplorationPath, HtmlClassifier, HttpDriver, ScanError};

/// Options for configuring an exploration run
pub struct ExploreOptions {
    pub url: String,
    pub config: ExplorerConfig,
    /// Skip entity addresses saved by earlier runs
    pub skip_known: bool,
    pub show_progress: bool,
    pub cancel: CancelFlag,
}

impl ExploreOptions {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            config: ExplorerConfig::default(),
            skip_known: true,
            show_progress: false,
            cancel: CancelFlag::new(),
        }
    }
}

/// Callback for reporting exploration progress
pub type ExploreProgressCallback = Arc<dyn Fn(String) + Send + Sync>;

#[derive(Error, Debug)]
pub enum ExploreError {
    #[error(transparent)]
    Scan(#[from] ScanError),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("cannot serialize configuration: {0}")]
    Config(#[from] serde_json::Error),
}

pub struct ExplorationRun {
    pub session_id: String,
    pub outcome: ExplorationOutcome,
}

/// Run one exploration against `options.url` and persist it.
///
/// The outcome is saved whatever the termination, so an aborted run still
/// leaves its partial results in the database.
pub async fn execute_exploration(
    options: ExploreOptions,
    db: &Database,
    progress_callback: Option<ExploreProgressCallback>,
) -> Result<ExplorationRun, ExploreError> {
    let ExploreOptions {
        url,
        config,
        skip_known,
        show_progress,
        cancel,
    } = options;

    let driver = HttpDriver::with_timeout(&url, config.timeouts.navigation)?;
    let classifier = CachedClassifier::new(HtmlClassifier::new());

    let known = if skip_known {
        db.known_addresses()?
    } else {
        Vec::new()
    };
    if !known.is_empty() {
        info!(count = known.len(), "Skipping addresses from earlier runs");
    }

    let session_id = db.create_session(&url, &serde_json::to_string(&config)?)?;
    if let Some(ref callback) = progress_callback {
        callback(format!("Session {} started for {}", session_id, url));
    }

    let progress_bar = if show_progress {
        let pb = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
            pb.set_style(style);
        }
        pb.set_message("Starting exploration...");
        Some(Arc::new(pb))
    } else {
        None
    };

    let mut explorer = Explorer::new(driver, classifier, config)
        .with_known_addresses(known)
        .with_cancel_flag(cancel);

    if let Some(ref pb) = progress_bar {
        let pb_progress = pb.clone();
        let on_progress: ProgressCallback = Arc::new(move |count: usize, path: &ExplorationPath| {
            pb_progress.set_message(format!("Exploring... {} states | {}", count, path));
            pb_progress.tick();
        });

        let pb_entity = pb.clone();
        let on_entity: EntityCallback = Arc::new(move |entity: &DiscoveredEntity| {
            pb_entity.println(format!(
                "  {} {} {}",
                "+".green().bold(),
                entity.name.bold(),
                entity.address.dimmed()
            ));
        });

        explorer = explorer
            .with_progress_callback(on_progress)
            .with_entity_callback(on_entity);
    }

    let outcome = explorer.run().await;

    if let Some(ref pb) = progress_bar {
        pb.finish_with_message(format!(
            "Exploration {}: {} entities, {} states",
            outcome.termination.as_str().replace('_', " "),
            outcome.entities.len(),
            outcome.stats.states_explored
        ));
    }

    if let Err(e) = db.save_outcome(&session_id, &outcome) {
        warn!("Could not save exploration {}: {}", session_id, e);
        if let Err(e) = db.fail_session(&session_id) {
            warn!("Could not mark session {} failed: {}", session_id, e);
        }
        return Err(e.into());
    }

    if let Some(ref callback) = progress_callback {
        let note = if outcome.is_partial() { " (partial)" } else { "" };
        callback(format!(
            "Saved {} entities{}",
            outcome.entities.len(),
            note
        ));
    }

    Ok(ExplorationRun {
        session_id,
        outcome,
    })
}
