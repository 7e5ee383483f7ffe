use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::templates::RoutingPolicy;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub engine: EngineConfig,
    pub routing: RoutingPolicy,
    pub server: ServerConfig,
    pub notifications: NotificationsConfig,
    pub audit: AuditConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub lock_retry_attempts: u32,
    pub lock_retry_base_delay_ms: u64,
    pub sweep_interval_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub health_check_port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct NotificationsConfig {
    pub enabled: bool,
    pub webhook_url: Option<String>,
    pub bearer_token: Option<SecretString>,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct AuditConfig {
    pub signing_key: SecretString,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub notifications_enabled: Option<bool>,
    pub webhook_url: Option<String>,
    pub audit_signing_key: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://opsgate.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            engine: EngineConfig {
                lock_retry_attempts: 5,
                lock_retry_base_delay_ms: 25,
                sweep_interval_secs: 300,
            },
            routing: RoutingPolicy::default(),
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                health_check_port: 8080,
                graceful_shutdown_secs: 15,
            },
            notifications: NotificationsConfig {
                enabled: false,
                webhook_url: None,
                bearer_token: None,
                timeout_secs: 10,
            },
            audit: AuditConfig { signing_key: "opsgate-dev-signing-key".to_string().into() },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("opsgate.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(engine) = patch.engine {
            if let Some(lock_retry_attempts) = engine.lock_retry_attempts {
                self.engine.lock_retry_attempts = lock_retry_attempts;
            }
            if let Some(lock_retry_base_delay_ms) = engine.lock_retry_base_delay_ms {
                self.engine.lock_retry_base_delay_ms = lock_retry_base_delay_ms;
            }
            if let Some(sweep_interval_secs) = engine.sweep_interval_secs {
                self.engine.sweep_interval_secs = sweep_interval_secs;
            }
        }

        if let Some(routing) = patch.routing {
            if let Some(auto_execute_below) = routing.auto_execute_below {
                self.routing.auto_execute_below = auto_execute_below;
            }
            if let Some(impact_review_min_risk) = routing.impact_review_min_risk {
                self.routing.impact_review_min_risk = impact_review_min_risk;
            }
            if let Some(compliance_min_risk) = routing.compliance_min_risk {
                self.routing.compliance_min_risk = compliance_min_risk;
            }
            if let Some(security_min_risk) = routing.security_min_risk {
                self.routing.security_min_risk = security_min_risk;
            }
            if let Some(basic_timeout_hours) = routing.basic_timeout_hours {
                self.routing.basic_timeout_hours = basic_timeout_hours;
            }
            if let Some(impact_timeout_hours) = routing.impact_timeout_hours {
                self.routing.impact_timeout_hours = impact_timeout_hours;
            }
            if let Some(compliance_timeout_hours) = routing.compliance_timeout_hours {
                self.routing.compliance_timeout_hours = compliance_timeout_hours;
            }
            if let Some(security_timeout_hours) = routing.security_timeout_hours {
                self.routing.security_timeout_hours = security_timeout_hours;
            }
            if let Some(change_board_timeout_hours) = routing.change_board_timeout_hours {
                self.routing.change_board_timeout_hours = change_board_timeout_hours;
            }
            if let Some(change_board_quorum) = routing.change_board_quorum {
                self.routing.change_board_quorum = change_board_quorum;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(health_check_port) = server.health_check_port {
                self.server.health_check_port = health_check_port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(notifications) = patch.notifications {
            if let Some(enabled) = notifications.enabled {
                self.notifications.enabled = enabled;
            }
            if let Some(webhook_url) = notifications.webhook_url {
                self.notifications.webhook_url = Some(webhook_url);
            }
            if let Some(bearer_token_value) = notifications.bearer_token {
                self.notifications.bearer_token = Some(secret_value(bearer_token_value));
            }
            if let Some(timeout_secs) = notifications.timeout_secs {
                self.notifications.timeout_secs = timeout_secs;
            }
        }

        if let Some(audit) = patch.audit {
            if let Some(signing_key_value) = audit.signing_key {
                self.audit.signing_key = secret_value(signing_key_value);
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("OPSGATE_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("OPSGATE_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = parse_u32("OPSGATE_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("OPSGATE_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("OPSGATE_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("OPSGATE_ENGINE_LOCK_RETRY_ATTEMPTS") {
            self.engine.lock_retry_attempts =
                parse_u32("OPSGATE_ENGINE_LOCK_RETRY_ATTEMPTS", &value)?;
        }
        if let Some(value) = read_env("OPSGATE_ENGINE_LOCK_RETRY_BASE_DELAY_MS") {
            self.engine.lock_retry_base_delay_ms =
                parse_u64("OPSGATE_ENGINE_LOCK_RETRY_BASE_DELAY_MS", &value)?;
        }
        if let Some(value) = read_env("OPSGATE_ENGINE_SWEEP_INTERVAL_SECS") {
            self.engine.sweep_interval_secs =
                parse_u64("OPSGATE_ENGINE_SWEEP_INTERVAL_SECS", &value)?;
        }

        if let Some(value) = read_env("OPSGATE_ROUTING_AUTO_EXECUTE_BELOW") {
            self.routing.auto_execute_below =
                parse_u8("OPSGATE_ROUTING_AUTO_EXECUTE_BELOW", &value)?;
        }
        if let Some(value) = read_env("OPSGATE_ROUTING_IMPACT_REVIEW_MIN_RISK") {
            self.routing.impact_review_min_risk =
                parse_u8("OPSGATE_ROUTING_IMPACT_REVIEW_MIN_RISK", &value)?;
        }
        if let Some(value) = read_env("OPSGATE_ROUTING_COMPLIANCE_MIN_RISK") {
            self.routing.compliance_min_risk =
                parse_u8("OPSGATE_ROUTING_COMPLIANCE_MIN_RISK", &value)?;
        }
        if let Some(value) = read_env("OPSGATE_ROUTING_SECURITY_MIN_RISK") {
            self.routing.security_min_risk = parse_u8("OPSGATE_ROUTING_SECURITY_MIN_RISK", &value)?;
        }
        if let Some(value) = read_env("OPSGATE_ROUTING_CHANGE_BOARD_QUORUM") {
            self.routing.change_board_quorum =
                parse_u32("OPSGATE_ROUTING_CHANGE_BOARD_QUORUM", &value)?;
        }

        if let Some(value) = read_env("OPSGATE_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("OPSGATE_SERVER_HEALTH_CHECK_PORT") {
            self.server.health_check_port = parse_u16("OPSGATE_SERVER_HEALTH_CHECK_PORT", &value)?;
        }
        if let Some(value) = read_env("OPSGATE_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("OPSGATE_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        if let Some(value) = read_env("OPSGATE_NOTIFICATIONS_ENABLED") {
            self.notifications.enabled = parse_bool("OPSGATE_NOTIFICATIONS_ENABLED", &value)?;
        }
        if let Some(value) = read_env("OPSGATE_NOTIFICATIONS_WEBHOOK_URL") {
            self.notifications.webhook_url = Some(value);
        }
        if let Some(value) = read_env("OPSGATE_NOTIFICATIONS_BEARER_TOKEN") {
            self.notifications.bearer_token = Some(secret_value(value));
        }
        if let Some(value) = read_env("OPSGATE_NOTIFICATIONS_TIMEOUT_SECS") {
            self.notifications.timeout_secs =
                parse_u64("OPSGATE_NOTIFICATIONS_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("OPSGATE_AUDIT_SIGNING_KEY") {
            self.audit.signing_key = secret_value(value);
        }

        let log_level = read_env("OPSGATE_LOGGING_LEVEL").or_else(|| read_env("OPSGATE_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("OPSGATE_LOGGING_FORMAT").or_else(|| read_env("OPSGATE_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(enabled) = overrides.notifications_enabled {
            self.notifications.enabled = enabled;
        }
        if let Some(webhook_url) = overrides.webhook_url {
            self.notifications.webhook_url = Some(webhook_url);
        }
        if let Some(signing_key) = overrides.audit_signing_key {
            self.audit.signing_key = secret_value(signing_key);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_engine(&self.engine)?;
        self.routing.validate().map_err(|err| ConfigError::Validation(err.to_string()))?;
        validate_server(&self.server)?;
        validate_notifications(&self.notifications)?;
        validate_audit(&self.audit)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("opsgate.toml"), PathBuf::from("config/opsgate.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_engine(engine: &EngineConfig) -> Result<(), ConfigError> {
    if engine.lock_retry_attempts == 0 {
        return Err(ConfigError::Validation(
            "engine.lock_retry_attempts must be greater than zero".to_string(),
        ));
    }

    if engine.lock_retry_base_delay_ms == 0 || engine.lock_retry_base_delay_ms > 5_000 {
        return Err(ConfigError::Validation(
            "engine.lock_retry_base_delay_ms must be in range 1..=5000".to_string(),
        ));
    }

    if engine.sweep_interval_secs == 0 || engine.sweep_interval_secs > 86_400 {
        return Err(ConfigError::Validation(
            "engine.sweep_interval_secs must be in range 1..=86400".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.health_check_port == 0 {
        return Err(ConfigError::Validation(
            "server.health_check_port must be greater than zero".to_string(),
        ));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_notifications(notifications: &NotificationsConfig) -> Result<(), ConfigError> {
    if notifications.enabled && notifications.webhook_url.is_none() {
        return Err(ConfigError::Validation(
            "notifications.enabled is true but notifications.webhook_url is not set".to_string(),
        ));
    }

    if let Some(webhook_url) = &notifications.webhook_url {
        if !webhook_url.starts_with("http://") && !webhook_url.starts_with("https://") {
            return Err(ConfigError::Validation(
                "notifications.webhook_url must start with http:// or https://".to_string(),
            ));
        }
    }

    if notifications.timeout_secs == 0 || notifications.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "notifications.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_audit(audit: &AuditConfig) -> Result<(), ConfigError> {
    if audit.signing_key.expose_secret().trim().is_empty() {
        return Err(ConfigError::Validation("audit.signing_key must not be empty".to_string()));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u8(key: &str, value: &str) -> Result<u8, ConfigError> {
    value.parse::<u8>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.parse::<bool>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    engine: Option<EnginePatch>,
    routing: Option<RoutingPatch>,
    server: Option<ServerPatch>,
    notifications: Option<NotificationsPatch>,
    audit: Option<AuditPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct EnginePatch {
    lock_retry_attempts: Option<u32>,
    lock_retry_base_delay_ms: Option<u64>,
    sweep_interval_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct RoutingPatch {
    auto_execute_below: Option<u8>,
    impact_review_min_risk: Option<u8>,
    compliance_min_risk: Option<u8>,
    security_min_risk: Option<u8>,
    basic_timeout_hours: Option<i64>,
    impact_timeout_hours: Option<i64>,
    compliance_timeout_hours: Option<i64>,
    security_timeout_hours: Option<i64>,
    change_board_timeout_hours: Option<i64>,
    change_board_quorum: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    health_check_port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct NotificationsPatch {
    enabled: Option<bool>,
    webhook_url: Option<String>,
    bearer_token: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct AuditPatch {
    signing_key: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
