use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use thiserror::Error;

/// Remote end of the measured connections: an address and, optionally, a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Destination {
    pub addr: IpAddr,
    pub port: Option<u16>,
}

impl Destination {
    pub fn new(addr: IpAddr, port: Option<u16>) -> Self {
        Self { addr, port }
    }
}

impl FromStr for Destination {
    type Err = SourceError;

    /// Accepts `10.0.0.3`, `10.0.0.3:5201`, `::1` and `[::1]:5201`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(sock) = s.parse::<SocketAddr>() {
            return Ok(Self::new(sock.ip(), Some(sock.port())));
        }
        s.trim_start_matches('[')
            .trim_end_matches(']')
            .parse::<IpAddr>()
            .map(|addr| Self::new(addr, None))
            .map_err(|_| SourceError::InvalidDestination(s.to_string()))
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.addr, self.port) {
            (IpAddr::V6(addr), Some(port)) => write!(f, "[{addr}]:{port}"),
            (addr, Some(port)) => write!(f, "{addr}:{port}"),
            (addr, None) => write!(f, "{addr}"),
        }
    }
}

/// An established connection as reported by a sample source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    pub local_port: u16,
    /// Congestion window in segments, if the source reported one.
    pub cwnd: Option<u64>,
}

/// "Established connections to `destination`, optionally excluding the one
/// bound to local port `exclude_local_port`."
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionQuery {
    pub destination: Destination,
    pub exclude_local_port: Option<u16>,
}

impl ConnectionQuery {
    pub fn all(destination: Destination) -> Self {
        Self {
            destination,
            exclude_local_port: None,
        }
    }

    pub fn excluding(destination: Destination, local_port: u16) -> Self {
        Self {
            destination,
            exclude_local_port: Some(local_port),
        }
    }
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("invalid destination {0:?}")]
    InvalidDestination(String),
    #[error("failed to run {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{command} exited with {status}: {stderr}")]
    Failed {
        command: String,
        status: String,
        stderr: String,
    },
    #[error("scripted source exhausted")]
    Exhausted,
}

/// Kernel-side view of per-connection TCP state.
///
/// Ordering precondition: for a fixed set of connections, `established` must
/// return them in the same order on every call, with the longest-lived
/// (control) connection first. The sampler relies on this to tell the control
/// channel apart from the data channels.
pub trait SampleSource: Send {
    fn established(
        &mut self,
        query: &ConnectionQuery,
    ) -> impl Future<Output = Result<Vec<Connection>, SourceError>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn parse_destinations() {
        let d: Destination = "10.0.0.3:5201".parse().unwrap();
        assert_eq!(d.addr, IpAddr::V4(Ipv4Addr::new(10, 0, 0, 3)));
        assert_eq!(d.port, Some(5201));

        let d: Destination = "10.0.0.3".parse().unwrap();
        assert_eq!(d.port, None);

        let d: Destination = "[::1]:5201".parse().unwrap();
        assert_eq!(d.to_string(), "[::1]:5201");

        assert!("not-an-ip".parse::<Destination>().is_err());
    }
}
