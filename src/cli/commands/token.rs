use chrono::{DateTime, Utc};
use clap::Args;
use serde_json::json;

use crate::auth::{generate_jwt, Claims};
use crate::cli::{utils, OutputFormat};
use crate::config::AppConfig;

#[derive(Args, Debug)]
pub struct TokenArgs {
    #[arg(long, help = "Operator username")]
    pub user: String,
    #[arg(long, help = "Role: admin, editor or viewer")]
    pub role: String,
    #[arg(long, help = "Lifetime in hours (defaults to JWT expiry setting)")]
    pub hours: Option<u64>,
}

pub fn handle(args: TokenArgs, config: &AppConfig, output_format: OutputFormat) -> anyhow::Result<()> {
    let hours = args.hours.unwrap_or(config.security.jwt_expiry_hours);
    let claims = Claims::new(args.user, args.role, hours, Utc::now());
    let token = generate_jwt(&claims, &config.security.jwt_secret)?;

    match output_format {
        OutputFormat::Text => println!("{}", token),
        OutputFormat::Json => {
            let expires_at = DateTime::<Utc>::from_timestamp(claims.exp, 0);
            utils::output_success(
                output_format,
                "Token issued",
                Some(json!({
                    "token": token,
                    "user": claims.sub,
                    "role": claims.role,
                    "session_id": claims.sid,
                    "expires_at": expires_at,
                })),
            )?;
        }
    }
    Ok(())
}
