use crate::config::ClientConfig;
use snap_protocol::{Hello, PROTOCOL_VERSION};
use std::env;
use std::fs;

/// How this client introduces itself in the hello message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity {
    pub host_name: String,
    pub os: String,
    pub arch: String,
    /// Unique per running client
    pub id: String,
    pub client_name: String,
    pub version: String,
    pub instance: u32,
    pub mac: Option<String>,
}

impl ClientIdentity {
    /// Identity of the current process with default naming
    pub fn detect() -> Self {
        Self {
            host_name: detect_hostname(),
            os: env::consts::OS.to_string(),
            arch: env::consts::ARCH.to_string(),
            id: std::process::id().to_string(),
            client_name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            instance: 1,
            mac: None,
        }
    }

    /// Detected identity with naming taken from `config`
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            client_name: config.client_name.clone(),
            instance: config.instance,
            mac: config.mac.clone(),
            ..Self::detect()
        }
    }

    pub fn to_hello(&self) -> Hello {
        Hello {
            arch: self.arch.clone(),
            client_name: self.client_name.clone(),
            host_name: self.host_name.clone(),
            id: self.id.clone(),
            instance: self.instance,
            mac: self.mac.clone(),
            os: self.os.clone(),
            snap_stream_protocol_version: PROTOCOL_VERSION,
            version: self.version.clone(),
        }
    }
}

fn detect_hostname() -> String {
    if let Ok(name) = env::var("HOSTNAME") {
        if !name.trim().is_empty() {
            return name.trim().to_string();
        }
    }

    fs::read_to_string("/etc/hostname")
        .ok()
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}
