use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClientConfig {
    pub client: ClientSettings,
    #[serde(default)]
    pub credentials: CredentialSettings,
    #[serde(default)]
    pub session: SessionSettings,
    #[serde(default)]
    pub timeouts: TimeoutSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClientSettings {
    pub broker_addr: String,
    pub broker_port: u16,
    /// Virtual host for the `host` header; defaults to `broker_addr`
    #[serde(default)]
    pub virtual_host: Option<String>,
    /// Open with a STOMP frame instead of CONNECT
    #[serde(default)]
    pub use_stomp_frame: bool,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CredentialSettings {
    #[serde(default)]
    pub login: Option<String>,
    #[serde(default)]
    pub passcode: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionSettings {
    /// Declared heartbeat interval in milliseconds, 0 disables heartbeats
    #[serde(default)]
    pub heartbeat_ms: u64,
    /// Receive buffer size in bytes; bounds the largest inbound frame
    #[serde(default = "default_rx_buffer_size")]
    pub rx_buffer_size: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TimeoutSettings {
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_write_timeout")]
    pub write_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingSettings {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Output logs as JSON
    #[serde(default)]
    pub json_logs: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            heartbeat_ms: 0,
            rx_buffer_size: default_rx_buffer_size(),
        }
    }
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout(),
            write_timeout_secs: default_write_timeout(),
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logs: false,
        }
    }
}

fn default_rx_buffer_size() -> usize {
    stomp_proto::DEFAULT_RX_BUFFER_SIZE
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_write_timeout() -> u64 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}

impl ClientConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: ClientConfig = toml::from_str(&contents)?;
        Ok(config)
    }

    pub fn default_config() -> Self {
        Self {
            client: ClientSettings {
                broker_addr: "127.0.0.1".to_string(),
                broker_port: 61613,
                virtual_host: None,
                use_stomp_frame: false,
            },
            credentials: CredentialSettings::default(),
            session: SessionSettings::default(),
            timeouts: TimeoutSettings::default(),
            logging: LoggingSettings::default(),
        }
    }

    /// `host:port` to dial
    pub fn broker_endpoint(&self) -> String {
        format!("{}:{}", self.client.broker_addr, self.client.broker_port)
    }

    /// Value for the CONNECT `host` header
    pub fn virtual_host(&self) -> &str {
        self.client
            .virtual_host
            .as_deref()
            .unwrap_or(&self.client.broker_addr)
    }
}
