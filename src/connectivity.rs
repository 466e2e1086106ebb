//! Network availability checks.

use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use url::Url;

/// Tells whether the network is currently usable.
#[async_trait]
pub trait ConnectivityOracle: Send + Sync {
    async fn is_network_available(&self) -> bool;
}

/// Probes connectivity by opening a TCP connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TcpProbe {
    addr: String,
    timeout: Duration,
}

impl TcpProbe {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

    /// Probes `addr`, given as `host:port`.
    #[must_use]
    pub fn new(addr: impl Into<String>, timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            timeout,
        }
    }

    /// Probes the host serving `url`.
    ///
    /// Returns `None` if the URL has no host or no known port.
    #[must_use]
    pub fn for_url(url: &Url, timeout: Duration) -> Option<Self> {
        let host = url.host_str()?;
        let port = url.port_or_known_default()?;
        Some(Self::new(format!("{host}:{port}"), timeout))
    }
}

#[async_trait]
impl ConnectivityOracle for TcpProbe {
    async fn is_network_available(&self) -> bool {
        match tokio::time::timeout(self.timeout, TcpStream::connect(&self.addr)).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                debug!("connectivity probe to {} failed: {e}", self.addr);
                false
            }
            Err(_) => {
                debug!("connectivity probe to {} timed out", self.addr);
                false
            }
        }
    }
}
