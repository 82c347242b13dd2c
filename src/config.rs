use anyhow::{Context, Result};
use serde::Deserialize;
use std::{env, fs, path::Path};

const CONFIG_FILE: &str = "config.toml";

#[derive(Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub listen: ListenConfig,
    /// Secret identifier as a UUID string. Required; there is no default.
    pub secret: Option<String>,
    #[serde(default)]
    pub agent: AgentConfig,
}

#[derive(Deserialize)]
pub struct ListenConfig {
    #[serde(default = "default_listen_ip")]
    pub ip: String,
    #[serde(default = "default_listen_port")]
    pub port: u16,
    pub tls: Option<TlsConfig>,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            ip: default_listen_ip(),
            port: default_listen_port(),
            tls: None,
        }
    }
}

#[derive(Deserialize)]
pub struct TlsConfig {
    pub cert_file: String,
    pub key_file: String,
}

#[derive(Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_agent_binary")]
    pub binary: String,
    pub token: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            binary: default_agent_binary(),
            token: None,
        }
    }
}

fn default_listen_ip() -> String {
    "0.0.0.0".to_string()
}

fn default_listen_port() -> u16 {
    3000
}

fn default_agent_binary() -> String {
    "./agent".to_string()
}

/// Loads `config.toml` when present and applies the `UUID`, `PORT`, and
/// `AGENT_TOKEN` environment overrides on top.
pub fn load_config() -> Result<Config> {
    let mut config = if Path::new(CONFIG_FILE).exists() {
        let content =
            fs::read_to_string(CONFIG_FILE).context("Failed to read config.toml file")?;
        toml::from_str(&content).context("Failed to parse config.toml as valid TOML")?
    } else {
        Config::default()
    };

    if let Ok(secret) = env::var("UUID") {
        config.secret = Some(secret);
    }
    if let Ok(port) = env::var("PORT") {
        config.listen.port = port
            .parse()
            .context("PORT environment variable must be a TCP port number")?;
    }
    if let Ok(token) = env::var("AGENT_TOKEN") {
        config.agent.token = Some(token);
    }

    Ok(config)
}

/// Read-only state shared by every accepted connection.
pub struct ServerContext {
    /// The configured secret identifier, already parsed to raw bytes.
    pub secret: [u8; 16],
    /// The advertised listening port, reported by the config descriptor.
    pub port: u16,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.listen.ip, "0.0.0.0");
        assert_eq!(config.listen.port, 3000);
        assert!(config.listen.tls.is_none());
        assert!(config.secret.is_none());
        assert_eq!(config.agent.binary, "./agent");
        assert!(config.agent.token.is_none());
    }

    #[test]
    fn parses_full_config() {
        let config: Config = toml::from_str(
            r#"
            secret = "36a58feb-57c1-4baa-bf49-023ed216fa5b"

            [listen]
            ip = "127.0.0.1"
            port = 8443

            [listen.tls]
            cert_file = "cert.pem"
            key_file = "key.pem"

            [agent]
            binary = "./tunnel-agent"
            token = "abc123"
            "#,
        )
        .unwrap();

        assert_eq!(config.listen.ip, "127.0.0.1");
        assert_eq!(config.listen.port, 8443);
        assert_eq!(config.listen.tls.as_ref().unwrap().cert_file, "cert.pem");
        assert_eq!(
            config.secret.as_deref(),
            Some("36a58feb-57c1-4baa-bf49-023ed216fa5b")
        );
        assert_eq!(config.agent.binary, "./tunnel-agent");
        assert_eq!(config.agent.token.as_deref(), Some("abc123"));
    }

    #[test]
    fn partial_listen_section_fills_missing_fields() {
        let config: Config = toml::from_str("[listen]\nport = 9000\n").unwrap();
        assert_eq!(config.listen.ip, "0.0.0.0");
        assert_eq!(config.listen.port, 9000);
    }
}
