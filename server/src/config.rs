use clap::{parser::ValueSource, CommandFactory, FromArgMatches, Parser};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Direct messaging server
#[derive(Parser, Serialize, Deserialize, Clone, Debug)]
#[command(name = "dmhub-server", version, about = "Real-time direct messaging server")]
pub struct Config {
    /// Port to listen on
    #[arg(long, env = "DMHUB_PORT", default_value = "8080")]
    pub port: u16,

    /// Bind address
    #[arg(long, env = "DMHUB_BIND_ADDRESS", default_value = "0.0.0.0")]
    pub bind_address: String,

    /// Path to TOML config file
    #[arg(long, default_value = "./dmhub.toml")]
    pub config: String,

    /// Enable structured JSON logging (for Docker/production)
    #[arg(long, env = "DMHUB_JSON_LOGS")]
    pub json_logs: bool,

    /// Output a commented TOML config template and exit
    #[arg(long)]
    pub generate_config: bool,

    /// Data directory for persistent state (DB, keys)
    #[arg(long, env = "DMHUB_DATA_DIR", default_value = "./data")]
    pub data_dir: String,

    /// Shared HS256 secret for access tokens. When unset a random key is
    /// kept in data_dir/jwt_secret.
    #[arg(long, env = "DMHUB_JWT_SECRET", hide_env_values = true)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwt_secret: Option<String>,

    /// WebSocket tuning (loaded from [ws] section in TOML)
    #[arg(skip)]
    #[serde(default, skip_serializing)]
    pub ws: WsConfig,

    /// Presence writer tuning (loaded from [presence] section in TOML)
    #[arg(skip)]
    #[serde(default, skip_serializing)]
    pub presence: PresenceConfig,
}

/// Connection and hub limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsConfig {
    /// Per-connection outbound queue capacity (default: 256)
    #[serde(default = "default_outbound_capacity")]
    pub outbound_capacity: usize,

    /// Seconds between server pings (default: 54)
    #[serde(default = "default_ping_interval")]
    pub ping_interval_secs: u64,

    /// Read deadline in seconds, refreshed on every pong (default: 60)
    #[serde(default = "default_pong_wait")]
    pub pong_wait_secs: u64,

    /// Deadline for a single socket write (default: 10)
    #[serde(default = "default_write_wait")]
    pub write_wait_secs: u64,

    /// Concurrent connections allowed per client IP, 0 = unlimited (default: 3)
    #[serde(default = "default_max_connections_per_ip")]
    pub max_connections_per_ip: usize,

    /// Capacity of the hub event queue (default: 1024)
    #[serde(default = "default_hub_queue_capacity")]
    pub hub_queue_capacity: usize,

    /// Maximum message content length in characters (default: 1000)
    #[serde(default = "default_max_content_len")]
    pub max_content_len: usize,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            outbound_capacity: default_outbound_capacity(),
            ping_interval_secs: default_ping_interval(),
            pong_wait_secs: default_pong_wait(),
            write_wait_secs: default_write_wait(),
            max_connections_per_ip: default_max_connections_per_ip(),
            hub_queue_capacity: default_hub_queue_capacity(),
            max_content_len: default_max_content_len(),
        }
    }
}

impl WsConfig {
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }

    pub fn pong_wait(&self) -> Duration {
        Duration::from_secs(self.pong_wait_secs)
    }

    pub fn write_wait(&self) -> Duration {
        Duration::from_secs(self.write_wait_secs)
    }
}

fn default_outbound_capacity() -> usize {
    256
}

fn default_ping_interval() -> u64 {
    54
}

fn default_pong_wait() -> u64 {
    60
}

fn default_write_wait() -> u64 {
    10
}

fn default_max_connections_per_ip() -> usize {
    3
}

fn default_hub_queue_capacity() -> usize {
    1024
}

fn default_max_content_len() -> usize {
    1000
}

/// Configuration for the background presence writer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceConfig {
    /// Pending presence updates before new ones are dropped (default: 1024)
    #[serde(default = "default_presence_queue")]
    pub queue_capacity: usize,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_presence_queue(),
        }
    }
}

fn default_presence_queue() -> usize {
    1024
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            bind_address: "0.0.0.0".to_string(),
            config: "./dmhub.toml".to_string(),
            json_logs: false,
            generate_config: false,
            data_dir: "./data".to_string(),
            jwt_secret: None,
            ws: WsConfig::default(),
            presence: PresenceConfig::default(),
        }
    }
}

impl Config {
    /// Load config with layered precedence:
    /// built-in defaults < TOML file < env vars (DMHUB_*) < CLI args
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        let matches = Config::command().get_matches();
        let cli = Config::from_arg_matches(&matches)?;
        let config_path = cli.config.clone();

        // clap fills every field; only values the operator actually set
        // (flag or env var) may shadow the TOML file.
        let mut overrides = serde_json::to_value(&cli)?;
        if let Some(map) = overrides.as_object_mut() {
            map.retain(|key, _| {
                matches!(
                    matches.value_source(key),
                    Some(ValueSource::CommandLine) | Some(ValueSource::EnvVariable)
                )
            });
        }

        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_path))
            .merge(Env::prefixed("DMHUB_").split("__"))
            .merge(Serialized::defaults(overrides))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would make every connection time out.
    pub fn validate(&self) -> Result<(), String> {
        let ws = &self.ws;
        if ws.ping_interval_secs == 0 || ws.ping_interval_secs >= ws.pong_wait_secs {
            return Err(format!(
                "ws.ping_interval_secs ({}) must be non-zero and below ws.pong_wait_secs ({})",
                ws.ping_interval_secs, ws.pong_wait_secs
            ));
        }
        if ws.write_wait_secs == 0 {
            return Err("ws.write_wait_secs must be non-zero".to_string());
        }
        if ws.outbound_capacity == 0 || ws.hub_queue_capacity == 0 {
            return Err("ws queue capacities must be non-zero".to_string());
        }
        if self.presence.queue_capacity == 0 {
            return Err("presence.queue_capacity must be non-zero".to_string());
        }
        Ok(())
    }
}

/// Generate a commented TOML config template
pub fn generate_config_template() -> String {
    r#"# Direct messaging server configuration
# Place this file at ./dmhub.toml or specify with --config <path>
# All settings can be overridden via environment variables (DMHUB_PORT, etc.)
# or CLI flags (--port, etc.)

# Server port (default: 8080)
# port = 8080

# Bind address (default: 0.0.0.0, all interfaces)
# bind_address = "0.0.0.0"

# Enable structured JSON logging for Docker/production
# json_logs = false

# Data directory for the SQLite database and generated JWT key
# data_dir = "./data"

# Shared HS256 secret used to verify access tokens.
# Leave unset to generate a random key in data_dir/jwt_secret.
# jwt_secret = ""

# ---- WebSocket ----
# [ws]
# outbound_capacity = 256       # queued messages per connection before eviction
# ping_interval_secs = 54       # must be below pong_wait_secs
# pong_wait_secs = 60
# write_wait_secs = 10
# max_connections_per_ip = 3    # 0 = unlimited
# hub_queue_capacity = 1024
# max_content_len = 1000

# ---- Presence ----
# [presence]
# queue_capacity = 1024
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_pass_validation() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.ws.outbound_capacity, 256);
        assert_eq!(config.ws.ping_interval(), Duration::from_secs(54));
        assert_eq!(config.ws.pong_wait(), Duration::from_secs(60));
    }

    #[test]
    fn ping_interval_must_be_below_pong_wait() {
        let mut config = Config::default();
        config.ws.ping_interval_secs = 60;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_write_wait_is_rejected() {
        let mut config = Config::default();
        config.ws.write_wait_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn toml_sections_override_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dmhub.toml");
        std::fs::write(
            &path,
            "port = 9000\n[ws]\noutbound_capacity = 8\n[presence]\nqueue_capacity = 4\n",
        )
        .unwrap();

        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&path))
            .extract()
            .unwrap();

        assert_eq!(config.port, 9000);
        assert_eq!(config.ws.outbound_capacity, 8);
        assert_eq!(config.ws.write_wait_secs, 10);
        assert_eq!(config.presence.queue_capacity, 4);
    }

    #[test]
    fn template_mentions_every_section() {
        let template = generate_config_template();
        assert!(template.contains("[ws]"));
        assert!(template.contains("[presence]"));
    }
}
