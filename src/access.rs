use crate::error::{AppError, RelayError};
use axum::extract::{ConnectInfo, Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::Response;
use ipnetwork::IpNetwork;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

/// Subnets in configuration order. Parsed once; never re-validated per request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubnetAllowList {
    networks: Vec<IpNetwork>,
}

impl SubnetAllowList {
    /// Parses a comma-separated CIDR list. Blank entries are skipped; one bad
    /// entry rejects the whole list.
    pub fn parse(raw: &str) -> Result<Self, RelayError> {
        let mut networks = Vec::new();
        for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            if !entry.contains('/') {
                return Err(RelayError::InvalidSubnet {
                    entry: entry.to_string(),
                    reason: "missing prefix length".to_string(),
                });
            }
            let network = entry
                .parse::<IpNetwork>()
                .map_err(|err| RelayError::InvalidSubnet {
                    entry: entry.to_string(),
                    reason: err.to_string(),
                })?;
            networks.push(network);
        }
        Ok(Self { networks })
    }

    pub fn is_empty(&self) -> bool {
        self.networks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.networks.len()
    }

    pub fn contains(&self, ip: IpAddr) -> bool {
        let ip = canonical_ip(ip);
        self.networks.iter().any(|network| network.contains(ip))
    }
}

/// IPv4-mapped IPv6 peers (dual-stack listeners) are matched as IPv4.
fn canonical_ip(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => v6.to_ipv4_mapped().map(IpAddr::V4).unwrap_or(ip),
        v4 => v4,
    }
}

pub async fn enforce_allow_list(
    State(allow_list): State<Arc<SubnetAllowList>>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    match peer {
        Some(ip) if allow_list.contains(ip) => Ok(next.run(req).await),
        Some(ip) => {
            tracing::warn!(%ip, "client address outside allowed subnets");
            Err(forbidden())
        }
        None => {
            tracing::warn!("peer address unavailable, rejecting request");
            Err(forbidden())
        }
    }
}

fn forbidden() -> AppError {
    AppError::new(
        StatusCode::FORBIDDEN,
        "ip_not_allowed",
        "client address is not in an allowed subnet",
    )
    .with_type("permission_error")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_mixed_families() {
        let list = SubnetAllowList::parse("10.0.0.0/8, 192.168.1.0/24,fd00::/8").unwrap();
        assert_eq!(list.len(), 3);
        assert!(list.contains("10.20.30.40".parse().unwrap()));
        assert!(list.contains("192.168.1.200".parse().unwrap()));
        assert!(!list.contains("192.168.2.1".parse().unwrap()));
        assert!(list.contains("fd12::1".parse().unwrap()));
    }

    #[test]
    fn one_bad_entry_rejects_the_list() {
        let err = SubnetAllowList::parse("10.0.0.0/8,10.0.0.0/33").unwrap_err();
        assert!(matches!(err, RelayError::InvalidSubnet { entry, .. } if entry == "10.0.0.0/33"));
        assert!(SubnetAllowList::parse("not-a-cidr").is_err());
        let err = SubnetAllowList::parse("10.0.0.0/8, 10.0.0.1").unwrap_err();
        assert!(matches!(err, RelayError::InvalidSubnet { entry, .. } if entry == "10.0.0.1"));
        assert!(SubnetAllowList::parse("fd00::1").is_err());
    }

    #[test]
    fn empty_input_yields_empty_list() {
        let list = SubnetAllowList::parse(" , ").unwrap();
        assert!(list.is_empty());
        assert!(!list.contains("127.0.0.1".parse().unwrap()));
    }

    #[test]
    fn mapped_ipv4_matches_ipv4_subnet() {
        let list = SubnetAllowList::parse("127.0.0.0/8").unwrap();
        assert!(list.contains("::ffff:127.0.0.1".parse().unwrap()));
    }
}
