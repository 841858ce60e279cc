//! Peer addressing and discovery types.
//!
//! A [`PeerAddress`] is whatever the transport uses to name a remote radio
//! (a BLE MAC, an `ip:port` pair, a simulator node name).  The rest of the
//! system treats it as an opaque, hashable key.
//!
//! # Connection lifecycle
//!
//! ```text
//! Discovered  ──►  Connecting  ──►  Connected
//!                       │               │
//!                       ▼               ▼
//!                    (failed)      Disconnected
//! ```

use std::fmt;
use std::net::SocketAddr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Service identifier every Chirp node advertises.
pub const DEFAULT_SERVICE_UUID: Uuid = Uuid::from_u128(0x4fafc201_1fb5_459e_8fcc_c5c9c331914b);

/// Read / write / notify characteristic inside the Chirp service.
pub const DEFAULT_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0xbeb5483e_36e1_4688_b7f5_ea07361b26a8);

/// Transport-opaque name of a remote radio.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerAddress(String);

impl PeerAddress {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<SocketAddr> for PeerAddress {
    fn from(addr: SocketAddr) -> Self {
        Self(addr.to_string())
    }
}

impl From<&str> for PeerAddress {
    fn from(addr: &str) -> Self {
        Self(addr.to_string())
    }
}

impl From<String> for PeerAddress {
    fn from(addr: String) -> Self {
        Self(addr)
    }
}

/// The pair of well-known identifiers a peer must expose to speak Chirp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceIds {
    pub service: Uuid,
    pub characteristic: Uuid,
}

impl Default for ServiceIds {
    fn default() -> Self {
        Self {
            service: DEFAULT_SERVICE_UUID,
            characteristic: DEFAULT_CHARACTERISTIC_UUID,
        }
    }
}

/// Connection state of a peer as tracked by the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeerState {
    /// Seen in a scan; no link yet.
    Discovered,
    /// Outbound connect in progress.
    Connecting,
    /// Link open; commands flow both ways.
    Connected,
    /// Link closed by either side.
    Disconnected,
}

/// Which side opened the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeerRole {
    /// The remote connected to our listener (server role).
    Inbound,
    /// We connected to the remote's listener (client role).
    Outbound,
}

/// One advertisement observed during a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    pub address: PeerAddress,
    /// Service identifiers listed in the advertisement.
    pub services: Vec<Uuid>,
    /// Advertised local name, if any.
    pub name: Option<String>,
}

impl Advertisement {
    /// Returns `true` if the advertisement lists `service`.
    pub fn advertises(&self, service: &Uuid) -> bool {
        self.services.contains(service)
    }
}

/// A discovery result handed from the scanner to the connection manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTarget {
    pub candidate: PeerAddress,
    pub service_match: bool,
}

impl PendingTarget {
    /// Builds a target from an advertisement, evaluating the service predicate.
    pub fn from_advertisement(ad: &Advertisement, service: &Uuid) -> Self {
        Self {
            candidate: ad.address.clone(),
            service_match: ad.advertises(service),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_service_ids_are_well_known_values() {
        let ids = ServiceIds::default();
        assert_eq!(
            ids.service.to_string(),
            "4fafc201-1fb5-459e-8fcc-c5c9c331914b"
        );
        assert_eq!(
            ids.characteristic.to_string(),
            "beb5483e-36e1-4688-b7f5-ea07361b26a8"
        );
    }

    #[test]
    fn test_peer_address_from_socket_addr() {
        let addr: SocketAddr = "192.168.4.2:47801".parse().unwrap();
        assert_eq!(PeerAddress::from(addr).as_str(), "192.168.4.2:47801");
    }

    #[test]
    fn test_pending_target_service_match() {
        // Arrange
        let ad = Advertisement {
            address: PeerAddress::new("node-b"),
            services: vec![DEFAULT_SERVICE_UUID],
            name: Some("chirp-1892".to_string()),
        };

        // Act
        let hit = PendingTarget::from_advertisement(&ad, &DEFAULT_SERVICE_UUID);
        let miss = PendingTarget::from_advertisement(&ad, &Uuid::nil());

        // Assert
        assert!(hit.service_match);
        assert!(!miss.service_match);
        assert_eq!(hit.candidate, PeerAddress::new("node-b"));
    }
}
