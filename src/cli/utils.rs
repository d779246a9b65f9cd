use anyhow::Context;
use serde_json::{json, Value};

use crate::cli::OutputFormat;
use crate::config::AppConfig;
use crate::database::DatabaseManager;

/// Output a success message in the appropriate format
pub fn output_success(output_format: OutputFormat, message: &str, data: Option<Value>) -> anyhow::Result<()> {
    match output_format {
        OutputFormat::Json => {
            let mut response = json!({
                "success": true,
                "message": message
            });

            if let (Some(Value::Object(extra)), Some(target)) = (data, response.as_object_mut()) {
                target.extend(extra);
            }

            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        OutputFormat::Text => {
            println!("✓ {}", message);
        }
    }
    Ok(())
}

/// Maintenance commands only make sense against the durable stores
pub async fn connect(config: &AppConfig) -> anyhow::Result<DatabaseManager> {
    if config.database.url.is_none() {
        anyhow::bail!("DATABASE_URL is required for this command");
    }
    let manager = DatabaseManager::connect(&config.database)
        .await
        .context("connecting to the database")?;
    manager.migrate().await.context("preparing the schema")?;
    Ok(manager)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connect_without_url_fails_fast() {
        let err = connect(&AppConfig::development()).await.unwrap_err();
        assert!(err.to_string().contains("DATABASE_URL"));
    }
}
