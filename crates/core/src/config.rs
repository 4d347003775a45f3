use std::env;

use serde::{Deserialize, Serialize};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

fn env_u16(key: &str, default: u16) -> u16 {
    env_opt(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    env_opt(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    env_opt(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    env_opt(key)
        .map(|v| v == "true" || v == "1")
        .unwrap_or(default)
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub queue: QueueConfig,
    pub broker: BrokerConfig,
    pub identity: IdentityConfig,
    pub services: ServicesConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    pub fn from_env() -> Self {
        Self {
            server: ServerConfig::from_env(),
            database: DatabaseConfig::from_env(),
            queue: QueueConfig::from_env(),
            broker: BrokerConfig::from_env(),
            identity: IdentityConfig::from_env(),
            services: ServicesConfig::from_env(),
        }
    }

    /// Print a redacted summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded:");
        tracing::info!(
            "  server:    host={}, rest_port={}, api_authn={}",
            self.server.host,
            self.server.rest_port,
            self.server.api_authn_enabled
        );
        tracing::info!(
            "  database:  host={}, keyspace={}, migrate={}",
            self.database.host,
            self.database.keyspace,
            self.database.migrations_enabled
        );
        tracing::info!(
            "  queue:     input={}, dispatch={}, dcm={}, watch_delay={}s",
            self.queue.input_queue,
            self.queue.dispatch_queue,
            self.queue.dcm_queue,
            self.queue.watch_delay_secs
        );
        tracing::info!(
            "  broker:    type={}, host={}, qos={}, keep_alive={}s",
            self.broker.broker_type,
            self.broker.host,
            self.broker.qos,
            self.broker.keep_alive_secs
        );
        tracing::info!(
            "  identity:  host={}, rpc_port={}, app_id={}",
            self.identity.host,
            self.identity.rpc_port,
            self.identity.app_id
        );
        tracing::info!("  services:  registrations={}", self.services.registrations_path);
    }
}

// ── Server ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub rest_port: u16,
    /// Require a bearer app token on all /api/v1 routes.
    pub api_authn_enabled: bool,
    pub cors_origin: String,
}

impl ServerConfig {
    fn from_env() -> Self {
        Self {
            host: env_or("SCHED_HOST", "0.0.0.0"),
            rest_port: env_u16("SCHED_REST_PORT", 7900),
            api_authn_enabled: env_bool("SCHED_API_AUTHN_ENABLED", false),
            cors_origin: env_or("SCHED_CORS_ORIGIN", "*"),
        }
    }
}

// ── Database ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    /// Database name holding the scheduler tables.
    pub keyspace: String,
    pub user: Option<String>,
    pub password: Option<String>,
    pub max_connections: u32,
    pub connect_timeout_secs: u64,
    /// Apply migrations from `migrations_path` at startup.
    pub migrations_enabled: bool,
    pub migrations_path: String,
    /// Full connection URL (preferred by sqlx when set).
    pub url: Option<String>,
}

impl DatabaseConfig {
    fn from_env() -> Self {
        Self {
            host: env_or("SCHED_DB_HOST", "localhost"),
            port: env_u16("SCHED_DB_PORT", 5432),
            keyspace: env_or("SCHED_DB_KEYSPACE", "fahrplan"),
            user: env_opt("SCHED_DB_USER"),
            password: env_opt("SCHED_DB_PASSWORD"),
            max_connections: env_u32("SCHED_DB_MAX_CONNECTIONS", 10),
            connect_timeout_secs: env_u64("SCHED_DB_CONNECT_TIMEOUT_SECS", 60),
            migrations_enabled: env_bool("SCHED_DB_MIGRATE", true),
            migrations_path: env_or("SCHED_DB_MIGRATIONS_PATH", "migrations"),
            url: env_opt("SCHED_DB_URL"),
        }
    }

    /// Connection URL for sqlx; prefers SCHED_DB_URL and falls back to parts.
    pub fn database_url(&self) -> String {
        self.url.clone().unwrap_or_else(|| {
            let user = self.user.as_deref().unwrap_or("postgres");
            let pass = self.password.as_deref().unwrap_or("");
            format!(
                "postgres://{}:{}@{}:{}/{}",
                user, pass, self.host, self.port, self.keyspace
            )
        })
    }
}

// ── Queues ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Custom SQS endpoint for local runs; cloud runs resolve from region.
    pub endpoint: Option<String>,
    pub region: String,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub session_token: Option<String>,
    /// Queue carrying inbound scheduling events.
    pub input_queue: String,
    /// Queue carrying fired tasks toward the broker.
    pub dispatch_queue: String,
    /// Queue carrying device-configuration events.
    pub dcm_queue: String,
    /// Long-poll wait, seconds.
    pub watch_delay_secs: u32,
    pub visibility_timeout_secs: u32,
}

impl QueueConfig {
    fn from_env() -> Self {
        Self {
            endpoint: env_opt("SCHED_QUEUE_ENDPOINT"),
            region: env_or("SCHED_QUEUE_REGION", "us-west-2"),
            access_key_id: env_opt("SCHED_QUEUE_ACCESS_KEY_ID"),
            secret_access_key: env_opt("SCHED_QUEUE_SECRET_ACCESS_KEY"),
            session_token: env_opt("SCHED_QUEUE_SESSION_TOKEN"),
            input_queue: env_or("SCHED_INPUT_QUEUE", "scheduler-input"),
            dispatch_queue: env_or("SCHED_DISPATCH_QUEUE", "scheduler-dispatch"),
            dcm_queue: env_or("SCHED_DCM_QUEUE", "dcm-input"),
            watch_delay_secs: env_u32("SCHED_QUEUE_WATCH_DELAY_SECS", 20),
            visibility_timeout_secs: env_u32("SCHED_QUEUE_VISIBILITY_TIMEOUT_SECS", 60),
        }
    }
}

// ── Broker ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// "local" (ipc socket) or "tcp".
    pub broker_type: String,
    pub host: String,
    pub port: u16,
    pub keep_alive_secs: u16,
    pub qos: u8,
    pub reconnect_delay_secs: u64,
    /// Bound wait for an active connection before a publish fails.
    pub connect_timeout_secs: u64,
}

impl BrokerConfig {
    fn from_env() -> Self {
        Self {
            broker_type: env_or("SCHED_BROKER_TYPE", "tcp"),
            host: env_or("SCHED_BROKER_HOST", "127.0.0.1"),
            port: env_u16("SCHED_BROKER_PORT", 1883),
            keep_alive_secs: env_u16("SCHED_BROKER_KEEP_ALIVE_SECS", 30),
            qos: env_u16("SCHED_BROKER_QOS", 0) as u8,
            reconnect_delay_secs: env_u64("SCHED_BROKER_RECONNECT_DELAY_SECS", 5),
            connect_timeout_secs: env_u64("SCHED_BROKER_CONNECT_TIMEOUT_SECS", 5),
        }
    }
}

// ── Identity service ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    pub host: String,
    pub rpc_port: u16,
    /// App ID under which the scheduler authenticates itself.
    pub app_id: String,
    /// Name of the env var holding the scheduler's PEM private key.
    pub private_key_env: String,
    /// App-credential refresh interval, seconds (default 3h).
    pub refresh_interval_secs: u64,
}

impl IdentityConfig {
    fn from_env() -> Self {
        Self {
            host: env_or("SCHED_IDENTITY_HOST", "localhost"),
            rpc_port: env_u16("SCHED_IDENTITY_RPC_PORT", 7001),
            app_id: env_or("SCHED_IDENTITY_APP_ID", "fahrplan-scheduler"),
            private_key_env: env_or("SCHED_IDENTITY_PRIVATE_KEY_ENV", "SCHED_APP_PRIVATE_KEY"),
            refresh_interval_secs: env_u64("SCHED_IDENTITY_REFRESH_INTERVAL_SECS", 3 * 3600),
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.rpc_port)
    }
}

// ── Registered services ───────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServicesConfig {
    /// Path to the YAML file listing registered services.
    pub registrations_path: String,
}

impl ServicesConfig {
    fn from_env() -> Self {
        Self {
            registrations_path: env_or("SCHED_SERVICES_CONFIG", "config/registered_services.yaml"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn database_url_prefers_explicit_url() {
        let mut cfg = DatabaseConfig {
            host: "db".into(),
            port: 5432,
            keyspace: "fahrplan".into(),
            user: Some("sched".into()),
            password: Some("secret".into()),
            max_connections: 10,
            connect_timeout_secs: 60,
            migrations_enabled: true,
            migrations_path: "migrations".into(),
            url: None,
        };
        assert_eq!(
            cfg.database_url(),
            "postgres://sched:secret@db:5432/fahrplan"
        );
        cfg.url = Some("postgres://other/u".into());
        assert_eq!(cfg.database_url(), "postgres://other/u");
    }
}
