// biweeklybudget - web server
// REST API and single-page UI with Axum

use anyhow::{Context, Result};
use biweeklybudget::config::Settings;
use biweeklybudget::web::{router, AppState};
use biweeklybudget::{db, logging, migrations};
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "budget-server")]
#[command(about = "Serve the biweeklybudget web front end", long_about = None)]
#[command(version)]
struct Cli {
    /// SQLite database (overrides BIWEEKLYBUDGET_DB)
    #[arg(long)]
    db: Option<PathBuf>,

    /// Listen address (overrides BIWEEKLYBUDGET_BIND)
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = Settings::from_env();
    if let Some(db) = cli.db {
        settings.db_path = db;
    }
    if let Some(bind) = cli.bind {
        settings.bind_addr = bind;
    }
    logging::init(&settings.log_filter);

    let mut conn = db::open(&settings.db_path)
        .with_context(|| format!("opening {}", settings.db_path.display()))?;
    let applied = migrations::upgrade_to_head(&mut conn)?;
    tracing::info!(db = %settings.db_path.display(), ?applied, "database ready");

    let app = router(AppState::new(conn));

    let listener = tokio::net::TcpListener::bind(&settings.bind_addr)
        .await
        .with_context(|| format!("binding {}", settings.bind_addr))?;

    tracing::info!("server running on http://{}", settings.bind_addr);
    tracing::info!("API: http://{}/api/accounts", settings.bind_addr);

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}
