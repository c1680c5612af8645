use crate::transport::TransportKind;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    /// Which transport implementation a new session acquires.
    pub transport: TransportKind,
    /// WebSocket endpoint for the streaming gateway transport.
    pub gateway_url: String,
    /// HTTPS endpoint that answers SDP offers for the peer media transport.
    pub signaling_url: String,
    pub gateway_api_key: Option<String>,
    pub peer_api_key: Option<String>,
    /// Window within which identical consecutive transcript entries are
    /// treated as duplicates, in milliseconds.
    pub dedup_window_ms: u64,
    pub log_level: Level,
}

const DEFAULT_GATEWAY_URL: &str = "wss://agent.easel.dev/v1/session";
const DEFAULT_SIGNALING_URL: &str = "https://agent.easel.dev/v1/peer";
const DEFAULT_DEDUP_WINDOW_MS: u64 = 2000;

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let transport_str =
            std::env::var("VOICE_TRANSPORT").unwrap_or_else(|_| "realtime_ws".to_string());
        let transport = match transport_str.to_lowercase().as_str() {
            "peer_media" => TransportKind::PeerMedia,
            _ => TransportKind::RealtimeWs,
        };

        let gateway_url =
            std::env::var("GATEWAY_URL").unwrap_or_else(|_| DEFAULT_GATEWAY_URL.to_string());
        let signaling_url =
            std::env::var("SIGNALING_URL").unwrap_or_else(|_| DEFAULT_SIGNALING_URL.to_string());

        let gateway_api_key = std::env::var("GATEWAY_API_KEY").ok();
        let peer_api_key = std::env::var("PEER_API_KEY").ok();

        let dedup_window_str = std::env::var("DEDUP_WINDOW_MS")
            .unwrap_or_else(|_| DEFAULT_DEDUP_WINDOW_MS.to_string());
        let dedup_window_ms = dedup_window_str.parse::<u64>().map_err(|_| {
            ConfigError::InvalidValue(
                "DEDUP_WINDOW_MS".to_string(),
                format!("'{}' is not a valid duration in milliseconds", dedup_window_str),
            )
        })?;

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        match transport {
            TransportKind::RealtimeWs => {
                if gateway_api_key.is_none() {
                    return Err(ConfigError::MissingVar(
                        "GATEWAY_API_KEY must be set for the 'realtime_ws' transport".to_string(),
                    ));
                }
            }
            TransportKind::PeerMedia => {
                if peer_api_key.is_none() {
                    return Err(ConfigError::MissingVar(
                        "PEER_API_KEY must be set for the 'peer_media' transport".to_string(),
                    ));
                }
            }
        }

        Ok(Self {
            transport,
            gateway_url,
            signaling_url,
            gateway_api_key,
            peer_api_key,
            dedup_window_ms,
            log_level,
        })
    }
}

/// A fixed configuration for unit tests, independent of the environment.
#[cfg(test)]
pub(crate) fn test_config(transport: TransportKind) -> Config {
    Config {
        transport,
        gateway_url: "wss://localhost:9443/v1/session".to_string(),
        signaling_url: "https://localhost:9443/v1/peer".to_string(),
        gateway_api_key: Some("test-gateway-key".to_string()),
        peer_api_key: Some("test-peer-key".to_string()),
        dedup_window_ms: DEFAULT_DEDUP_WINDOW_MS,
        log_level: Level::INFO,
    }
}
