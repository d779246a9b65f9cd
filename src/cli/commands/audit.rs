use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::Subcommand;
use serde_json::json;

use crate::audit::{AuditFilter, AuditTrail, Category, Severity};
use crate::cli::{utils, OutputFormat};
use crate::config::AppConfig;
use crate::database::PgAuditStore;

#[derive(Subcommand, Debug)]
pub enum AuditCommands {
    #[command(about = "Delete audit entries older than the retention period")]
    Prune {
        #[arg(long, help = "Maximum age in days (defaults to AUDIT_RETENTION_DAYS)")]
        days: Option<u32>,
    },

    #[command(about = "Export matching audit entries as a JSON array")]
    Export {
        #[arg(long, help = "Case-insensitive substring of the action")]
        action: Option<String>,
        #[arg(long, help = "Exact username")]
        user: Option<String>,
        #[arg(long, help = "authentication, data, security, system or user")]
        category: Option<Category>,
        #[arg(long, help = "info, warning, error or critical")]
        severity: Option<Severity>,
        #[arg(long, help = "Earliest timestamp (RFC 3339)")]
        from: Option<DateTime<Utc>>,
        #[arg(long, help = "Latest timestamp (RFC 3339)")]
        to: Option<DateTime<Utc>>,
        #[arg(long, short, help = "Write to this file instead of stdout")]
        output: Option<PathBuf>,
    },
}

pub async fn handle(cmd: AuditCommands, config: &AppConfig, output_format: OutputFormat) -> anyhow::Result<()> {
    let manager = utils::connect(config).await?;
    let store = Arc::new(PgAuditStore::new(manager.pool().clone()));
    let trail = AuditTrail::new(store, config.audit.fallback_capacity);

    let result = match cmd {
        AuditCommands::Prune { days } => {
            let days = days.unwrap_or(config.audit.retention_days);
            let removed = trail.prune(days).await?;
            utils::output_success(
                output_format,
                &format!("Removed {} audit entries older than {} days", removed, days),
                Some(json!({ "removed": removed, "days": days })),
            )
        }
        AuditCommands::Export { action, user, category, severity, from, to, output } => {
            let filter = AuditFilter {
                action,
                username: user,
                category,
                severity,
                from,
                to,
            };
            let body = trail.export(&filter).await?;
            match output {
                Some(path) => {
                    std::fs::write(&path, &body).with_context(|| format!("writing {}", path.display()))?;
                    utils::output_success(
                        output_format,
                        &format!("Exported audit log to {}", path.display()),
                        Some(json!({ "path": path, "bytes": body.len() })),
                    )
                }
                None => {
                    println!("{}", body);
                    Ok(())
                }
            }
        }
    };

    manager.close().await;
    result
}
