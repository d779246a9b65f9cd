use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub environment: Environment,
    pub query: QueryConfig,
    pub database: DatabaseConfig,
    pub api: ApiConfig,
    pub security: SecurityConfig,
    pub audit: AuditConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Environment {
    Development,
    Staging,
    Production,
}

/// Bounds applied to every query plan before it reaches the store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    pub default_limit: u32,
    pub min_limit: u32,
    pub max_limit: u32,
    pub default_timeout_ms: u64,
    pub min_timeout_ms: u64,
    pub max_timeout_ms: u64,
    pub max_nested_depth: u32,
    pub debug_logging: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// When absent the server runs on in-memory stores
    pub url: Option<String>,
    pub max_connections: u32,
    pub connection_timeout: u64,
    pub slow_query_threshold_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub port: u16,
    pub enable_request_logging: bool,
    pub max_request_size_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    pub csrf_enabled: bool,
    pub csrf_token_ttl_secs: u64,
    pub session_binding_enabled: bool,
    pub bind_ip: bool,
    pub idle_timeout_enabled: bool,
    pub idle_timeout_secs: u64,
    pub idle_timeout_min_secs: u64,
    pub idle_timeout_max_secs: u64,
    pub rate_limit_enabled: bool,
    pub rate_limit_requests: u32,
    pub rate_limit_window_secs: u64,
    pub rate_limit_lockout_secs: u64,
    pub jwt_secret: String,
    pub jwt_expiry_hours: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    pub fallback_capacity: usize,
    pub retention_days: u32,
    pub history_per_actor: usize,
    pub history_expiry_days: u32,
}

impl QueryConfig {
    /// Clamp a caller-supplied limit into `[min_limit, max_limit]`
    pub fn clamp_limit(&self, requested: Option<u32>) -> u32 {
        let floor = self.min_limit.max(1);
        let ceiling = self.max_limit.max(floor);
        requested.unwrap_or(self.default_limit).clamp(floor, ceiling)
    }

    /// Clamp a caller-supplied timeout into `[min_timeout_ms, max_timeout_ms]`
    pub fn clamp_timeout(&self, requested: Option<Duration>) -> Duration {
        let floor = self.min_timeout_ms.max(1);
        let ceiling = self.max_timeout_ms.max(floor);
        let ms = requested
            .map(|d| d.as_millis().min(u64::MAX as u128) as u64)
            .unwrap_or(self.default_timeout_ms);
        Duration::from_millis(ms.clamp(floor, ceiling))
    }
}

impl SecurityConfig {
    pub fn idle_timeout(&self) -> chrono::Duration {
        let ceiling = self.idle_timeout_max_secs.max(self.idle_timeout_min_secs);
        let secs = self.idle_timeout_secs.clamp(self.idle_timeout_min_secs, ceiling);
        chrono::Duration::seconds(secs.min(i64::MAX as u64) as i64)
    }

    pub fn csrf_token_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.csrf_token_ttl_secs.min(i64::MAX as u64) as i64)
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let environment = match env::var("APP_ENV").as_deref() {
            Ok("production") | Ok("prod") => Environment::Production,
            Ok("staging") | Ok("stage") => Environment::Staging,
            _ => Environment::Development,
        };

        // Set defaults based on environment, then override with specific env vars
        match environment {
            Environment::Production => Self::production(),
            Environment::Staging => Self::staging(),
            Environment::Development => Self::development(),
        }
        .with_env_overrides()
    }

    fn with_env_overrides(mut self) -> Self {
        // Query overrides
        override_parsed("QUERY_DEFAULT_LIMIT", &mut self.query.default_limit);
        override_parsed("QUERY_MIN_LIMIT", &mut self.query.min_limit);
        override_parsed("QUERY_MAX_LIMIT", &mut self.query.max_limit);
        override_parsed("QUERY_DEFAULT_TIMEOUT_MS", &mut self.query.default_timeout_ms);
        override_parsed("QUERY_MIN_TIMEOUT_MS", &mut self.query.min_timeout_ms);
        override_parsed("QUERY_MAX_TIMEOUT_MS", &mut self.query.max_timeout_ms);
        override_parsed("QUERY_MAX_NESTED_DEPTH", &mut self.query.max_nested_depth);
        override_parsed("QUERY_DEBUG_LOGGING", &mut self.query.debug_logging);

        // Database overrides
        if let Ok(v) = env::var("DATABASE_URL") {
            if !v.trim().is_empty() {
                self.database.url = Some(v);
            }
        }
        override_parsed("DATABASE_MAX_CONNECTIONS", &mut self.database.max_connections);
        override_parsed("DATABASE_CONNECTION_TIMEOUT", &mut self.database.connection_timeout);
        override_parsed("DATABASE_SLOW_QUERY_THRESHOLD_MS", &mut self.database.slow_query_threshold_ms);

        // API overrides
        if let Some(port) = env::var("CONSOLE_PORT")
            .ok()
            .or_else(|| env::var("PORT").ok())
            .and_then(|s| s.parse::<u16>().ok())
        {
            self.api.port = port;
        }
        override_parsed("API_ENABLE_REQUEST_LOGGING", &mut self.api.enable_request_logging);
        override_parsed("API_MAX_REQUEST_SIZE_BYTES", &mut self.api.max_request_size_bytes);

        // Security overrides
        override_parsed("SECURITY_CSRF_ENABLED", &mut self.security.csrf_enabled);
        override_parsed("SECURITY_CSRF_TOKEN_TTL_SECS", &mut self.security.csrf_token_ttl_secs);
        override_parsed("SECURITY_SESSION_BINDING_ENABLED", &mut self.security.session_binding_enabled);
        override_parsed("SECURITY_BIND_IP", &mut self.security.bind_ip);
        override_parsed("SECURITY_IDLE_TIMEOUT_ENABLED", &mut self.security.idle_timeout_enabled);
        override_parsed("SECURITY_IDLE_TIMEOUT_SECS", &mut self.security.idle_timeout_secs);
        override_parsed("SECURITY_IDLE_TIMEOUT_MIN_SECS", &mut self.security.idle_timeout_min_secs);
        override_parsed("SECURITY_IDLE_TIMEOUT_MAX_SECS", &mut self.security.idle_timeout_max_secs);
        override_parsed("SECURITY_RATE_LIMIT_ENABLED", &mut self.security.rate_limit_enabled);
        override_parsed("SECURITY_RATE_LIMIT_REQUESTS", &mut self.security.rate_limit_requests);
        override_parsed("SECURITY_RATE_LIMIT_WINDOW_SECS", &mut self.security.rate_limit_window_secs);
        override_parsed("SECURITY_RATE_LIMIT_LOCKOUT_SECS", &mut self.security.rate_limit_lockout_secs);
        if let Ok(v) = env::var("JWT_SECRET") {
            self.security.jwt_secret = v;
        }
        override_parsed("SECURITY_JWT_EXPIRY_HOURS", &mut self.security.jwt_expiry_hours);

        // Audit overrides
        override_parsed("AUDIT_FALLBACK_CAPACITY", &mut self.audit.fallback_capacity);
        override_parsed("AUDIT_RETENTION_DAYS", &mut self.audit.retention_days);
        override_parsed("AUDIT_HISTORY_PER_ACTOR", &mut self.audit.history_per_actor);
        override_parsed("AUDIT_HISTORY_EXPIRY_DAYS", &mut self.audit.history_expiry_days);

        self
    }

    pub fn development() -> Self {
        Self {
            environment: Environment::Development,
            query: QueryConfig {
                default_limit: 50,
                min_limit: 1,
                max_limit: 1000,
                default_timeout_ms: 5_000,
                min_timeout_ms: 100,
                max_timeout_ms: 30_000,
                max_nested_depth: 10,
                debug_logging: true,
            },
            database: DatabaseConfig {
                url: None,
                max_connections: 10,
                connection_timeout: 30,
                slow_query_threshold_ms: 100,
            },
            api: ApiConfig {
                port: 3000,
                enable_request_logging: true,
                max_request_size_bytes: 10 * 1024 * 1024, // 10MB
            },
            security: SecurityConfig {
                csrf_enabled: true,
                csrf_token_ttl_secs: 60 * 60 * 8,
                session_binding_enabled: true,
                bind_ip: false,
                idle_timeout_enabled: false,
                idle_timeout_secs: 60 * 60,
                idle_timeout_min_secs: 60,
                idle_timeout_max_secs: 60 * 60 * 24,
                rate_limit_enabled: false,
                rate_limit_requests: 1000,
                rate_limit_window_secs: 60,
                rate_limit_lockout_secs: 60,
                jwt_secret: "development-only-secret".to_string(),
                jwt_expiry_hours: 24 * 7, // 1 week
            },
            audit: AuditConfig {
                fallback_capacity: 1000,
                retention_days: 90,
                history_per_actor: 100,
                history_expiry_days: 30,
            },
        }
    }

    pub fn staging() -> Self {
        Self {
            environment: Environment::Staging,
            query: QueryConfig {
                default_limit: 50,
                min_limit: 1,
                max_limit: 500,
                default_timeout_ms: 5_000,
                min_timeout_ms: 100,
                max_timeout_ms: 15_000,
                max_nested_depth: 6,
                debug_logging: false,
            },
            database: DatabaseConfig {
                url: None,
                max_connections: 20,
                connection_timeout: 10,
                slow_query_threshold_ms: 500,
            },
            api: ApiConfig {
                port: 3000,
                enable_request_logging: true,
                max_request_size_bytes: 5 * 1024 * 1024, // 5MB
            },
            security: SecurityConfig {
                csrf_enabled: true,
                csrf_token_ttl_secs: 60 * 60 * 2,
                session_binding_enabled: true,
                bind_ip: true,
                idle_timeout_enabled: true,
                idle_timeout_secs: 60 * 30,
                idle_timeout_min_secs: 60,
                idle_timeout_max_secs: 60 * 60 * 8,
                rate_limit_enabled: true,
                rate_limit_requests: 120,
                rate_limit_window_secs: 60,
                rate_limit_lockout_secs: 120,
                jwt_secret: String::new(),
                jwt_expiry_hours: 24,
            },
            audit: AuditConfig {
                fallback_capacity: 5000,
                retention_days: 90,
                history_per_actor: 100,
                history_expiry_days: 30,
            },
        }
    }

    pub fn production() -> Self {
        Self {
            environment: Environment::Production,
            query: QueryConfig {
                default_limit: 25,
                min_limit: 1,
                max_limit: 200,
                default_timeout_ms: 3_000,
                min_timeout_ms: 100,
                max_timeout_ms: 10_000,
                max_nested_depth: 5,
                debug_logging: false,
            },
            database: DatabaseConfig {
                url: None,
                max_connections: 50,
                connection_timeout: 5,
                slow_query_threshold_ms: 1000,
            },
            api: ApiConfig {
                port: 3000,
                enable_request_logging: false,
                max_request_size_bytes: 2 * 1024 * 1024, // 2MB
            },
            security: SecurityConfig {
                csrf_enabled: true,
                csrf_token_ttl_secs: 60 * 60,
                session_binding_enabled: true,
                bind_ip: true,
                idle_timeout_enabled: true,
                idle_timeout_secs: 60 * 15,
                idle_timeout_min_secs: 60,
                idle_timeout_max_secs: 60 * 60 * 2,
                rate_limit_enabled: true,
                rate_limit_requests: 60,
                rate_limit_window_secs: 60,
                rate_limit_lockout_secs: 300,
                jwt_secret: String::new(),
                jwt_expiry_hours: 4,
            },
            audit: AuditConfig {
                fallback_capacity: 10_000,
                retention_days: 365,
                history_per_actor: 50,
                history_expiry_days: 30,
            },
        }
    }
}

fn override_parsed<T: std::str::FromStr>(key: &str, target: &mut T) {
    if let Ok(v) = env::var(key) {
        match v.trim().parse() {
            Ok(parsed) => *target = parsed,
            Err(_) => tracing::warn!(key, value = %v, "ignoring unparsable config override"),
        }
    }
}

// Global singleton config - initialized once at startup
pub static CONFIG: Lazy<AppConfig> = Lazy::new(AppConfig::from_env);

// Convenience function for accessing config
pub fn config() -> &'static AppConfig {
    &CONFIG
}
