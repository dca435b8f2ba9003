use crate::playback::{PlaybackTrigger, DEFAULT_THRESHOLD};
use crate::stream_buffer::DEFAULT_CAPACITY;
use log::warn;
use snap_protocol::DEFAULT_PORT;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use url::Url;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid server URL '{url}': {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("Unsupported URL scheme '{0}', expected tcp")]
    UnsupportedScheme(String),

    #[error("Server URL '{0}' has no host")]
    MissingHost(String),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// Settings for one client session
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    pub client_name: String,
    /// Distinguishes several clients on the same host, starts at 1
    pub instance: u32,
    pub mac: Option<String>,
    /// Stream buffer size in bytes
    pub buffer_capacity: usize,
    /// Buffered bytes required before the decoder is opened
    pub playback_threshold: usize,
    pub codec_thresholds: HashMap<String, usize>,
    /// Applied to socket reads. `None` blocks until data or disconnect.
    pub read_timeout: Option<Duration>,
    pub stats_interval: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_PORT,
            client_name: env!("CARGO_PKG_NAME").to_string(),
            instance: 1,
            mac: None,
            buffer_capacity: DEFAULT_CAPACITY,
            playback_threshold: DEFAULT_THRESHOLD,
            // FLAC frames are large, give the decoder more to look at
            codec_thresholds: HashMap::from([("flac".to_string(), 51_200)]),
            read_timeout: None,
            stats_interval: Duration::from_secs(5),
        }
    }
}

impl ClientConfig {
    /// Defaults pointed at the server in `url`
    pub fn from_url(url: &str) -> Result<Self, ConfigError> {
        let (host, port) = parse_server_url(url)?;
        Ok(Self {
            host,
            port,
            ..Default::default()
        })
    }

    pub fn server_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn playback_trigger(&self) -> PlaybackTrigger {
        self.codec_thresholds.iter().fold(
            PlaybackTrigger::new(self.playback_threshold),
            |trigger, (codec, threshold)| trigger.with_codec_threshold(codec.clone(), *threshold),
        )
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.buffer_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "buffer_capacity",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.instance == 0 {
            return Err(ConfigError::InvalidValue {
                field: "instance",
                reason: "instances are numbered from 1".to_string(),
            });
        }

        let thresholds =
            std::iter::once(self.playback_threshold).chain(self.codec_thresholds.values().copied());
        for threshold in thresholds {
            if threshold >= self.buffer_capacity {
                return Err(ConfigError::InvalidValue {
                    field: "playback_threshold",
                    reason: format!(
                        "{} bytes can never be exceeded in a {} byte buffer",
                        threshold, self.buffer_capacity
                    ),
                });
            }
        }
        Ok(())
    }
}

/// Parse `tcp://host[:port]`. A bare `host[:port]` is accepted as well and
/// the port defaults to the snapcast stream port.
pub fn parse_server_url(input: &str) -> Result<(String, u16), ConfigError> {
    let normalized = if input.contains("://") {
        input.to_string()
    } else {
        format!("tcp://{}", input)
    };

    let url = match Url::parse(&normalized) {
        Err(url::ParseError::InvalidPort) => {
            warn!("Ignoring invalid port in '{}', using {}", input, DEFAULT_PORT);
            Url::parse(&strip_port(&normalized))
        }
        parsed => parsed,
    }
    .map_err(|source| ConfigError::InvalidUrl {
        url: input.to_string(),
        source,
    })?;

    if url.scheme() != "tcp" {
        return Err(ConfigError::UnsupportedScheme(url.scheme().to_string()));
    }

    let host = url
        .host_str()
        .filter(|host| !host.is_empty())
        .ok_or_else(|| ConfigError::MissingHost(input.to_string()))?;

    Ok((host.to_string(), url.port().unwrap_or(DEFAULT_PORT)))
}

fn strip_port(url: &str) -> String {
    let (scheme, rest) = url.split_once("://").unwrap_or(("tcp", url));
    let (authority, path) = rest.split_at(rest.find('/').unwrap_or(rest.len()));
    let host = match authority.rsplit_once(':') {
        // Keep bracketed IPv6 hosts intact
        Some((host, _)) if !host.is_empty() && !authority.ends_with(']') => host,
        _ => authority,
    };
    format!("{}://{}{}", scheme, host, path)
}
