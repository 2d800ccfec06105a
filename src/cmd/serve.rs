//! Server commands: `cadnlp serve` and `cadnlp init-db`.

use anyhow::Result;

use cadnlp::config::Settings;
use cadnlp::server::server::{open_database, start_server};

pub async fn cmd_serve(settings: Settings) -> Result<()> {
    for warning in settings.validate() {
        tracing::warn!("{}", warning);
    }
    start_server(settings).await
}

pub async fn cmd_init_db(mut settings: Settings, no_seed: bool) -> Result<()> {
    if no_seed {
        settings.seed_defaults = false;
    }
    let db = open_database(&settings).await?;
    let users = db.call(|db| db.count_users()).await?;
    println!("Database initialized at {}", settings.db_path.display());
    println!("  users: {}", users);
    Ok(())
}
