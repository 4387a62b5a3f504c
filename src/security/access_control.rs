//! IP ranges and source whitelisting.

use std::net::IpAddr;
use std::str::FromStr;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use futures_util::future::BoxFuture;

use crate::http::middleware::{Middleware, Next};
use crate::http::request::peer_addr;
use crate::http::response::status_response;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid IP or CIDR range {0:?}")]
pub struct IpRangeError(pub String);

/// A single address or a CIDR block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpRange {
    network: IpAddr,
    prefix: u8,
}

impl IpRange {
    pub fn contains(&self, ip: IpAddr) -> bool {
        // IPv4-mapped IPv6 peers are compared as IPv4.
        let ip = match ip {
            IpAddr::V6(v6) => v6.to_ipv4_mapped().map(IpAddr::V4).unwrap_or(ip),
            v4 => v4,
        };
        match (self.network, ip) {
            (IpAddr::V4(net), IpAddr::V4(ip)) => {
                let mask = prefix_mask_v4(self.prefix);
                u32::from(net) & mask == u32::from(ip) & mask
            }
            (IpAddr::V6(net), IpAddr::V6(ip)) => {
                let mask = prefix_mask_v6(self.prefix);
                u128::from(net) & mask == u128::from(ip) & mask
            }
            _ => false,
        }
    }
}

fn prefix_mask_v4(prefix: u8) -> u32 {
    if prefix == 0 {
        0
    } else {
        u32::MAX << (32 - u32::from(prefix))
    }
}

fn prefix_mask_v6(prefix: u8) -> u128 {
    if prefix == 0 {
        0
    } else {
        u128::MAX << (128 - u32::from(prefix))
    }
}

impl FromStr for IpRange {
    type Err = IpRangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || IpRangeError(s.to_string());
        let (addr, prefix) = match s.trim().split_once('/') {
            Some((addr, prefix)) => (addr, Some(prefix.parse::<u8>().map_err(|_| err())?)),
            None => (s.trim(), None),
        };
        let network: IpAddr = addr.parse().map_err(|_| err())?;
        let max = match network {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        let prefix = prefix.unwrap_or(max);
        if prefix > max {
            return Err(err());
        }
        Ok(Self { network, prefix })
    }
}

/// Rejects requests whose direct peer is outside every range (403).
#[derive(Debug, Clone)]
pub struct IpWhiteList {
    ranges: Vec<IpRange>,
}

impl IpWhiteList {
    pub fn new(source_range: &[String]) -> Result<Self, IpRangeError> {
        let ranges = source_range
            .iter()
            .map(|entry| entry.parse())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { ranges })
    }

    pub fn allows(&self, ip: IpAddr) -> bool {
        self.ranges.iter().any(|range| range.contains(ip))
    }
}

impl Middleware for IpWhiteList {
    fn handle<'a>(&'a self, req: Request<Body>, next: Next<'a>) -> BoxFuture<'a, Response> {
        match peer_addr(&req) {
            Some(peer) if self.allows(peer.ip()) => next.run(req),
            peer => {
                tracing::debug!(peer = ?peer, "Rejected by IP whitelist");
                Box::pin(async { status_response(StatusCode::FORBIDDEN) })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::middleware::test_support::{run, Recorder};
    use axum::extract::ConnectInfo;
    use std::net::SocketAddr;

    #[test]
    fn parses_and_matches_ranges() {
        let range: IpRange = "192.168.0.0/16".parse().unwrap();
        assert!(range.contains("192.168.44.1".parse().unwrap()));
        assert!(!range.contains("192.169.0.1".parse().unwrap()));
        assert!(range.contains("::ffff:192.168.1.1".parse().unwrap()));

        let single: IpRange = "10.0.0.7".parse().unwrap();
        assert!(single.contains("10.0.0.7".parse().unwrap()));
        assert!(!single.contains("10.0.0.8".parse().unwrap()));

        let v6: IpRange = "2001:db8::/32".parse().unwrap();
        assert!(v6.contains("2001:db8::1".parse().unwrap()));

        assert!("0.0.0.0/0".parse::<IpRange>().unwrap().contains("8.8.8.8".parse().unwrap()));
    }

    #[test]
    fn rejects_invalid_ranges() {
        assert!("10.0.0.0/33".parse::<IpRange>().is_err());
        assert!("not-an-ip".parse::<IpRange>().is_err());
        assert!("10.0.0.0/x".parse::<IpRange>().is_err());
    }

    #[tokio::test]
    async fn whitelist_checks_peer_address() {
        let stage = IpWhiteList::new(&["10.0.0.0/8".to_string()]).unwrap();
        let endpoint = Recorder::default();

        let mut allowed = Request::new(Body::empty());
        allowed
            .extensions_mut()
            .insert(ConnectInfo("10.2.3.4:1000".parse::<SocketAddr>().unwrap()));
        assert_eq!(run(&stage, &endpoint, allowed).await.status(), StatusCode::OK);

        let mut denied = Request::new(Body::empty());
        denied
            .extensions_mut()
            .insert(ConnectInfo("11.0.0.1:1000".parse::<SocketAddr>().unwrap()));
        assert_eq!(run(&stage, &endpoint, denied).await.status(), StatusCode::FORBIDDEN);

        let unknown = Request::new(Body::empty());
        assert_eq!(run(&stage, &endpoint, unknown).await.status(), StatusCode::FORBIDDEN);
        assert_eq!(endpoint.calls(), 1);
    }
}
