use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Command line flags. Only flags actually given on the command line
/// override the lower layers.
#[derive(Parser, Serialize, Debug, Default)]
#[command(name = "parley-server", version, about = "Parley presence and message relay gateway")]
struct Cli {
    /// Port to listen on
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    port: Option<u16>,

    /// Bind address
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    bind_address: Option<String>,

    /// Path to TOML config file
    #[arg(long, default_value = "./parley.toml")]
    #[serde(skip)]
    config: String,

    /// Enable structured JSON logging (for Docker/production)
    #[arg(long)]
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    json_logs: bool,

    /// Output a commented TOML config template and exit
    #[arg(long)]
    #[serde(skip)]
    generate_config: bool,

    /// Data directory for the SQLite history database
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    data_dir: Option<String>,
}

/// Parley server configuration.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub bind_address: String,
    pub json_logs: bool,
    pub data_dir: String,

    /// WebSocket keepalive settings ([ws] section)
    #[serde(default)]
    pub ws: WsConfig,

    /// History store settings ([history] section)
    #[serde(default)]
    pub history: HistoryConfig,

    #[serde(skip)]
    pub generate_config: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsConfig {
    /// Seconds between server pings; 0 disables keepalive (default: 30)
    #[serde(default = "default_ping_interval")]
    pub ping_interval_secs: u64,

    /// Seconds to wait for a pong before closing (default: 10)
    #[serde(default = "default_pong_timeout")]
    pub pong_timeout_secs: u64,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            ping_interval_secs: default_ping_interval(),
            pong_timeout_secs: default_pong_timeout(),
        }
    }
}

fn default_ping_interval() -> u64 {
    30
}

fn default_pong_timeout() -> u64 {
    10
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryBackend {
    Sqlite,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// "sqlite" (durable, default) or "memory"
    #[serde(default = "default_backend")]
    pub backend: HistoryBackend,

    /// Longest accepted message, in characters (default: 2000)
    #[serde(default = "default_max_message_len")]
    pub max_message_len: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            max_message_len: default_max_message_len(),
        }
    }
}

fn default_backend() -> HistoryBackend {
    HistoryBackend::Sqlite
}

fn default_max_message_len() -> usize {
    2000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 5000,
            bind_address: "0.0.0.0".to_string(),
            json_logs: false,
            data_dir: "./data".to_string(),
            ws: WsConfig::default(),
            history: HistoryConfig::default(),
            generate_config: false,
        }
    }
}

impl Config {
    /// Load config with layered precedence:
    /// built-in defaults < TOML file < env vars (PARLEY_*) < CLI args
    pub fn load() -> Result<Self, figment::Error> {
        let cli = Cli::parse();
        let mut config: Config = Self::figment(&cli).extract()?;
        config.generate_config = cli.generate_config;
        Ok(config)
    }

    fn figment(cli: &Cli) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&cli.config))
            // Nested keys use a double underscore: PARLEY_WS__PING_INTERVAL_SECS
            .merge(Env::prefixed("PARLEY_").split("__"))
            .merge(Serialized::defaults(cli))
    }
}

/// Generate a commented TOML config template
pub fn generate_config_template() -> String {
    r#"# Parley Server Configuration
# Place this file at ./parley.toml or specify with --config <path>
# All settings can be overridden via environment variables (PARLEY_PORT,
# PARLEY_WS__PING_INTERVAL_SECS, etc.) or CLI flags (--port, etc.)

# Server port (default: 5000)
# port = 5000

# Bind address (default: 0.0.0.0, all interfaces)
# bind_address = "0.0.0.0"

# Enable structured JSON logging for Docker/production
# json_logs = false

# Data directory for the SQLite history database
# data_dir = "./data"

# ---- WebSocket keepalive ----
# [ws]
# ping_interval_secs = 30   # 0 disables server pings
# pong_timeout_secs = 10

# ---- Conversation history ----
# [history]
# backend = "sqlite"        # or "memory" (lost on restart)
# max_message_len = 2000    # characters
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    fn cli_with_file(path: &str) -> Cli {
        Cli {
            config: path.to_string(),
            ..Cli::default()
        }
    }

    #[test]
    fn test_defaults_without_file() {
        Jail::expect_with(|_jail| {
            let config: Config = Config::figment(&cli_with_file("missing.toml")).extract()?;
            assert_eq!(config.port, 5000);
            assert_eq!(config.ws.ping_interval_secs, 30);
            assert_eq!(config.history.backend, HistoryBackend::Sqlite);
            Ok(())
        });
    }

    #[test]
    fn test_layers_override_in_order() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "parley.toml",
                r#"
                port = 7000
                data_dir = "/var/lib/parley"

                [ws]
                ping_interval_secs = 5

                [history]
                max_message_len = 100
                "#,
            )?;
            jail.set_env("PARLEY_PORT", "7100");
            jail.set_env("PARLEY_HISTORY__BACKEND", "memory");

            let cli = Cli {
                data_dir: Some("/tmp/parley".to_string()),
                ..cli_with_file("parley.toml")
            };
            let config: Config = Config::figment(&cli).extract()?;

            assert_eq!(config.port, 7100);
            assert_eq!(config.data_dir, "/tmp/parley");
            assert_eq!(config.ws.ping_interval_secs, 5);
            assert_eq!(config.ws.pong_timeout_secs, 10);
            assert_eq!(config.history.backend, HistoryBackend::Memory);
            assert_eq!(config.history.max_message_len, 100);
            Ok(())
        });
    }

    #[test]
    fn test_template_parses() {
        let parsed: Result<figment::value::Dict, _> =
            Figment::from(Toml::string(&generate_config_template())).extract();
        assert!(parsed.is_ok());
    }
}
