use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyProtocol {
    Http,
    Https,
    Socks5,
}

impl ProxyProtocol {
    fn from_url(url: &str) -> Option<Self> {
        let scheme = url.split_once("://")?.0.to_ascii_lowercase();
        match scheme.as_str() {
            "http" => Some(ProxyProtocol::Http),
            "https" => Some(ProxyProtocol::Https),
            "socks5" | "socks5h" => Some(ProxyProtocol::Socks5),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyHealth {
    Healthy,
    Unhealthy,
    /// Not probed yet.
    Unknown,
}

/// Outbound proxy endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Proxy {
    pub url: String,
    pub protocol: ProxyProtocol,
    pub health: ProxyHealth,
    pub last_checked: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
}

impl Proxy {
    pub fn parse(url: &str) -> Result<Self> {
        let url = url.trim();
        let Some(protocol) = ProxyProtocol::from_url(url) else {
            bail!(
                "Unsupported proxy url '{}': expected http://, https:// or socks5://",
                url
            );
        };
        Ok(Self {
            url: url.to_string(),
            protocol,
            health: ProxyHealth::Unknown,
            last_checked: None,
            consecutive_failures: 0,
        })
    }

    /// Healthy proxies, and proxies not probed yet, may be handed out.
    pub fn is_selectable(&self) -> bool {
        self.health != ProxyHealth::Unhealthy
    }
}
