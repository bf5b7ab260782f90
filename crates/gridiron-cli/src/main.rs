use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use gridiron_core::WeekKey;
use gridiron_recap::{RecapConfig, RecapService};
use gridiron_sync::{connect_pool, run_migrations, validate_week, ImportPipeline, ImportRequest, SyncConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "gridiron-cli")]
#[command(about = "Fantasy league warehouse: imports, promotion, recaps")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Stage and promote one league-week.
    Import {
        #[arg(long)]
        season: i32,
        #[arg(long)]
        week: i32,
        #[arg(long)]
        league: Option<String>,
        /// Also stage and promote the season's draft picks.
        #[arg(long)]
        draft: bool,
    },
    /// Import the most recently completed week.
    Latest,
    /// Promote rows already staged for a week.
    Promote {
        #[arg(long)]
        season: i32,
        #[arg(long)]
        week: i32,
        #[arg(long)]
        league: Option<String>,
    },
    /// Apply database migrations.
    Migrate,
    /// Serve the HTTP API.
    Serve {
        #[arg(long)]
        port: Option<u16>,
    },
    /// Run the cron import schedule until interrupted.
    Schedule,
    /// Print the point-in-time snapshot for a week as JSON.
    Snapshot {
        #[arg(long)]
        season: i32,
        #[arg(long)]
        week: i32,
    },
    /// Generate and store the recap text for a week.
    Recap {
        #[arg(long)]
        season: i32,
        #[arg(long)]
        week: i32,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).with_target(false).try_init();
}

async fn pipeline_from_env() -> Result<ImportPipeline> {
    let config = SyncConfig::load()?;
    let pool = connect_pool(&config.database_url).await?;
    ImportPipeline::postgres(config, pool)
}

async fn recaps_from_env() -> Result<RecapService> {
    let config = SyncConfig::load()?;
    let pool = connect_pool(&config.database_url).await?;
    Ok(RecapService::postgres(pool, &RecapConfig::from_env())?)
}

fn target(season: i32, week: i32) -> Result<WeekKey> {
    validate_week(season, week)?;
    Ok(WeekKey::new(season, week))
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Latest) {
        Commands::Import {
            season,
            week,
            league,
            draft,
        } => {
            let request = ImportRequest {
                league_id: league,
                include_draft: draft,
                ..ImportRequest::new(season, week)
            };
            let summary = gridiron_sync::run_import_once_from_env(request).await?;
            println!(
                "import complete: run_id={} league={} week={}-{} staged_rosters={} processed={} skipped={}",
                summary.run_id,
                summary.league_id,
                summary.season_year,
                summary.week,
                summary.staged.rosters,
                summary.promoted.processed(),
                summary.promoted.skipped_rows
            );
        }
        Commands::Latest => match pipeline_from_env().await?.run_latest_completed_week().await? {
            Some(summary) => println!(
                "import complete: run_id={} week={}-{} processed={}",
                summary.run_id,
                summary.season_year,
                summary.week,
                summary.promoted.processed()
            ),
            None => println!("no completed week to import yet"),
        },
        Commands::Promote { season, week, league } => {
            let counts = pipeline_from_env()
                .await?
                .promote(league.as_deref(), season, week)
                .await?;
            println!("{}", serde_json::to_string_pretty(&counts)?);
        }
        Commands::Migrate => {
            let config = SyncConfig::from_env();
            let pool = connect_pool(&config.database_url).await?;
            run_migrations(&pool).await?;
            println!("migrations applied");
        }
        Commands::Serve { port } => match port {
            Some(port) => gridiron_web::serve(gridiron_web::state_from_env().await?, port).await?,
            None => gridiron_web::serve_from_env().await?,
        },
        Commands::Schedule => {
            let mut config = SyncConfig::load()?;
            config.scheduler_enabled = true;
            let pool = connect_pool(&config.database_url).await?;
            let pipeline = Arc::new(ImportPipeline::postgres(config, pool)?);
            let mut sched = pipeline
                .maybe_build_scheduler()
                .await?
                .context("scheduler was not built")?;
            sched.start().await?;
            info!(cron = %pipeline.config().import_cron, "scheduler running; ctrl-c to stop");
            tokio::signal::ctrl_c().await?;
            sched.shutdown().await?;
        }
        Commands::Snapshot { season, week } => {
            let snapshot = recaps_from_env().await?.snapshot(target(season, week)?).await?;
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
        }
        Commands::Recap { season, week } => {
            let recap = recaps_from_env().await?.generate_recap(target(season, week)?).await?;
            println!("{}", recap.recap_text);
        }
    }

    Ok(())
}
