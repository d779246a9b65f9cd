use chrono::Utc;
use clap::Subcommand;
use serde_json::json;

use crate::audit::{age_cutoff, HistoryStore};
use crate::cli::{utils, OutputFormat};
use crate::config::AppConfig;
use crate::database::PgHistoryStore;

#[derive(Subcommand, Debug)]
pub enum HistoryCommands {
    #[command(about = "Delete query history older than the expiry period")]
    Purge {
        #[arg(long, help = "Maximum age in days (defaults to AUDIT_HISTORY_EXPIRY_DAYS)")]
        days: Option<u32>,
    },
}

pub async fn handle(cmd: HistoryCommands, config: &AppConfig, output_format: OutputFormat) -> anyhow::Result<()> {
    let manager = utils::connect(config).await?;
    let store = PgHistoryStore::new(manager.pool().clone(), config.audit.history_per_actor);

    let result = match cmd {
        HistoryCommands::Purge { days } => {
            let days = days.unwrap_or(config.audit.history_expiry_days);
            let removed = match age_cutoff(Utc::now(), days) {
                Some(cutoff) => store.purge_before(cutoff).await?,
                None => 0,
            };
            utils::output_success(
                output_format,
                &format!("Removed {} history entries older than {} days", removed, days),
                Some(json!({ "removed": removed, "days": days })),
            )
        }
    };

    manager.close().await;
    result
}
