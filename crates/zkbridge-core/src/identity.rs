//! Host identity advertised to remote consumers.
//!
//! Browser clients on an overlay network need to know which workstation a
//! template came from, so every status snapshot and capture carries the
//! host name and the address the host is reachable on.

use crate::constants::OVERLAY_PROBE_ADDR;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, UdpSocket};
use tracing::{debug, warn};

/// Host name and reachable address of the machine running the bridge.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientIdentity {
    pub hostname: String,
    pub ip: IpAddr,
}

impl ClientIdentity {
    /// Identity bound to the loopback address.
    #[must_use]
    pub fn local(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
        }
    }

    /// Resolve the identity once at startup.
    ///
    /// An explicitly advertised address wins. Otherwise the address the OS
    /// would use to route toward the overlay range is taken, falling back to
    /// loopback when the host has no route at all.
    #[must_use]
    pub fn resolve(advertise: Option<IpAddr>) -> Self {
        let hostname = match hostname::get() {
            Ok(name) => name.to_string_lossy().into_owned(),
            Err(e) => {
                warn!(error = %e, "Failed to read host name");
                "unknown".to_string()
            }
        };

        let ip = advertise.or_else(routed_local_ip).unwrap_or_else(|| {
            warn!("No routable address found, advertising loopback");
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        });

        debug!(hostname = %hostname, ip = %ip, "Resolved client identity");
        Self { hostname, ip }
    }
}

/// Local address selected by the routing table. A UDP `connect` sends no
/// packets, it only binds the socket to the outgoing interface.
fn routed_local_ip() -> Option<IpAddr> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).ok()?;
    socket.connect(OVERLAY_PROBE_ADDR).ok()?;
    let ip = socket.local_addr().ok()?.ip();
    (!ip.is_unspecified()).then_some(ip)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advertised_address_wins() {
        let ip: IpAddr = "100.101.102.103".parse().unwrap();
        let identity = ClientIdentity::resolve(Some(ip));
        assert_eq!(identity.ip, ip);
        assert!(!identity.hostname.is_empty());
    }

    #[test]
    fn test_local_identity_uses_loopback() {
        let identity = ClientIdentity::local("bench-01");
        assert_eq!(identity.hostname, "bench-01");
        assert!(identity.ip.is_loopback());
    }

    #[test]
    fn test_resolve_always_yields_an_address() {
        let identity = ClientIdentity::resolve(None);
        assert!(!identity.ip.is_unspecified());
    }
}
