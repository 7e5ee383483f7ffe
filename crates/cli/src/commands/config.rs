use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use opsgate_core::config::{AppConfig, LoadOptions};
use toml::Value;

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for (key, value, env_keys) in effective_rows(&config) {
        let source =
            field_source(key, env_keys, config_file_doc.as_ref(), config_file_path.as_deref());
        lines.push(render_line(key, &value, source));
    }

    lines.join("\n")
}

/// Every effective field with its display value and the env keys that can
/// override it. Secrets render as fixed markers and are never echoed.
fn effective_rows(config: &AppConfig) -> Vec<(&'static str, String, &'static [&'static str])> {
    let webhook_url =
        config.notifications.webhook_url.clone().unwrap_or_else(|| "<unset>".to_string());
    let bearer_token =
        if config.notifications.bearer_token.is_some() { "<redacted>" } else { "<unset>" };

    vec![
        ("database.url", config.database.url.clone(), &["OPSGATE_DATABASE_URL"]),
        (
            "database.max_connections",
            config.database.max_connections.to_string(),
            &["OPSGATE_DATABASE_MAX_CONNECTIONS"],
        ),
        (
            "database.timeout_secs",
            config.database.timeout_secs.to_string(),
            &["OPSGATE_DATABASE_TIMEOUT_SECS"],
        ),
        (
            "engine.lock_retry_attempts",
            config.engine.lock_retry_attempts.to_string(),
            &["OPSGATE_ENGINE_LOCK_RETRY_ATTEMPTS"],
        ),
        (
            "engine.lock_retry_base_delay_ms",
            config.engine.lock_retry_base_delay_ms.to_string(),
            &["OPSGATE_ENGINE_LOCK_RETRY_BASE_DELAY_MS"],
        ),
        (
            "engine.sweep_interval_secs",
            config.engine.sweep_interval_secs.to_string(),
            &["OPSGATE_ENGINE_SWEEP_INTERVAL_SECS"],
        ),
        (
            "routing.auto_execute_below",
            config.routing.auto_execute_below.to_string(),
            &["OPSGATE_ROUTING_AUTO_EXECUTE_BELOW"],
        ),
        (
            "routing.impact_review_min_risk",
            config.routing.impact_review_min_risk.to_string(),
            &["OPSGATE_ROUTING_IMPACT_REVIEW_MIN_RISK"],
        ),
        (
            "routing.compliance_min_risk",
            config.routing.compliance_min_risk.to_string(),
            &["OPSGATE_ROUTING_COMPLIANCE_MIN_RISK"],
        ),
        (
            "routing.security_min_risk",
            config.routing.security_min_risk.to_string(),
            &["OPSGATE_ROUTING_SECURITY_MIN_RISK"],
        ),
        ("routing.basic_timeout_hours", config.routing.basic_timeout_hours.to_string(), &[]),
        ("routing.impact_timeout_hours", config.routing.impact_timeout_hours.to_string(), &[]),
        (
            "routing.compliance_timeout_hours",
            config.routing.compliance_timeout_hours.to_string(),
            &[],
        ),
        ("routing.security_timeout_hours", config.routing.security_timeout_hours.to_string(), &[]),
        (
            "routing.change_board_timeout_hours",
            config.routing.change_board_timeout_hours.to_string(),
            &[],
        ),
        (
            "routing.change_board_quorum",
            config.routing.change_board_quorum.to_string(),
            &["OPSGATE_ROUTING_CHANGE_BOARD_QUORUM"],
        ),
        ("server.bind_address", config.server.bind_address.clone(), &["OPSGATE_SERVER_BIND_ADDRESS"]),
        (
            "server.health_check_port",
            config.server.health_check_port.to_string(),
            &["OPSGATE_SERVER_HEALTH_CHECK_PORT"],
        ),
        (
            "server.graceful_shutdown_secs",
            config.server.graceful_shutdown_secs.to_string(),
            &["OPSGATE_SERVER_GRACEFUL_SHUTDOWN_SECS"],
        ),
        (
            "notifications.enabled",
            config.notifications.enabled.to_string(),
            &["OPSGATE_NOTIFICATIONS_ENABLED"],
        ),
        ("notifications.webhook_url", webhook_url, &["OPSGATE_NOTIFICATIONS_WEBHOOK_URL"]),
        (
            "notifications.bearer_token",
            bearer_token.to_string(),
            &["OPSGATE_NOTIFICATIONS_BEARER_TOKEN"],
        ),
        (
            "notifications.timeout_secs",
            config.notifications.timeout_secs.to_string(),
            &["OPSGATE_NOTIFICATIONS_TIMEOUT_SECS"],
        ),
        ("audit.signing_key", "<redacted>".to_string(), &["OPSGATE_AUDIT_SIGNING_KEY"]),
        (
            "logging.level",
            config.logging.level.clone(),
            &["OPSGATE_LOGGING_LEVEL", "OPSGATE_LOG_LEVEL"],
        ),
        (
            "logging.format",
            format!("{:?}", config.logging.format),
            &["OPSGATE_LOGGING_FORMAT", "OPSGATE_LOG_FORMAT"],
        ),
    ]
}

fn detect_config_path() -> Option<PathBuf> {
    let root = PathBuf::from("opsgate.toml");
    if root.exists() {
        return Some(root);
    }

    let nested = PathBuf::from("config/opsgate.toml");
    if nested.exists() {
        return Some(nested);
    }

    None
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    for env_key in env_keys {
        if env::var_os(env_key).is_some() {
            return format!("env ({env_key})");
        }
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}
