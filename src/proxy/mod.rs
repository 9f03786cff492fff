//! Outbound proxy pool: round-robin selection, failure feedback and periodic probes.

mod manager;
mod models;
mod prober;

pub use manager::ProxyManager;
pub use models::{Proxy, ProxyHealth, ProxyProtocol};
pub use prober::{HttpProxyProber, ProxyProber};
