//! Local identity and discovery broadcast targets.
//!
//! Discovery probes fan out to the subnet broadcast address plus any
//! operator-configured per-interface broadcast addresses. Inbound
//! datagrams are screened against self-origin two ways: by sender
//! address (loopback or any address this host is known to own) and
//! by the embedded instance id, which catches our own broadcast
//! echoes regardless of which interface they looped back on.

use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use crate::state::PeerId;

// ── LocalIdentity ────────────────────────────────────────────────

/// Who this instance is: id, nickname, and the set of addresses that
/// count as "self" for datagram screening.
pub struct LocalIdentity {
    id: PeerId,
    nickname: String,
    local_addrs: HashSet<IpAddr>,
    accept_loopback: bool,
}

impl LocalIdentity {
    /// Create an identity with a fresh instance id. An empty nickname
    /// gets a generated `user-XXXXXXXX` one, as the original UI did
    /// with its random `User_N` names.
    pub fn new(nickname: &str) -> Self {
        let id = PeerId::generate();
        let nickname = if nickname.trim().is_empty() {
            format!("user-{}", id.short())
        } else {
            // Clamp to the wire limit on a char boundary.
            let trimmed = nickname.trim();
            let mut end = trimmed.len().min(crate::packet::MAX_NICKNAME_LEN);
            while !trimmed.is_char_boundary(end) {
                end -= 1;
            }
            trimmed[..end].to_string()
        };
        Self {
            id,
            nickname,
            local_addrs: HashSet::new(),
            accept_loopback: false,
        }
    }

    pub fn id(&self) -> PeerId {
        self.id
    }

    pub fn nickname(&self) -> &str {
        &self.nickname
    }

    /// Record an address this host owns (e.g. the bound socket's
    /// detected outbound address) so broadcasts echoed back from it
    /// are discarded.
    pub fn register_local_addr(&mut self, addr: IpAddr) {
        self.local_addrs.insert(addr);
    }

    /// Accept datagrams from loopback/self addresses. Needed when two
    /// instances share one host; the id check still screens echoes.
    pub fn set_accept_loopback(&mut self, accept: bool) {
        self.accept_loopback = accept;
    }

    /// Whether a datagram from this address should be screened as
    /// self-origin.
    pub fn is_self_addr(&self, addr: IpAddr) -> bool {
        if self.accept_loopback {
            return false;
        }
        addr.is_loopback() || self.local_addrs.contains(&addr)
    }

    /// Full self-origin screen: address or embedded id.
    pub fn is_self(&self, sender: PeerId, from: SocketAddr) -> bool {
        sender == self.id || self.is_self_addr(from.ip())
    }
}

// ── DiscoveryTargets ─────────────────────────────────────────────

/// The set of addresses discovery probes are sent to.
#[derive(Debug, Clone)]
pub struct DiscoveryTargets {
    targets: Vec<SocketAddr>,
}

impl DiscoveryTargets {
    /// Build the fan-out list: the configured broadcast addresses on
    /// the session port, defaulting to the global broadcast address
    /// when none are configured. Duplicates are dropped.
    pub fn new(port: u16, configured: &[IpAddr]) -> Self {
        let mut targets: Vec<SocketAddr> = Vec::new();
        let mut push = |addr: SocketAddr| {
            if !targets.contains(&addr) {
                targets.push(addr);
            }
        };

        if configured.is_empty() {
            push(SocketAddr::new(IpAddr::V4(Ipv4Addr::BROADCAST), port));
        } else {
            for ip in configured {
                push(SocketAddr::new(*ip, port));
            }
        }

        Self { targets }
    }

    /// Explicit target list, used by tests and point-to-point setups.
    pub fn explicit(targets: Vec<SocketAddr>) -> Self {
        Self { targets }
    }

    pub fn iter(&self) -> impl Iterator<Item = SocketAddr> + '_ {
        self.targets.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_nickname_is_generated() {
        let identity = LocalIdentity::new("  ");
        assert!(identity.nickname().starts_with("user-"));

        let identity = LocalIdentity::new("alice");
        assert_eq!(identity.nickname(), "alice");
    }

    #[test]
    fn long_nickname_is_clamped_to_wire_limit() {
        let identity = LocalIdentity::new(&"я".repeat(200));
        assert!(identity.nickname().len() <= crate::packet::MAX_NICKNAME_LEN);
        assert!(!identity.nickname().is_empty());
    }

    #[test]
    fn loopback_is_self() {
        let identity = LocalIdentity::new("a");
        assert!(identity.is_self_addr("127.0.0.1".parse().unwrap()));
        assert!(identity.is_self_addr("::1".parse().unwrap()));
        assert!(!identity.is_self_addr("192.168.1.20".parse().unwrap()));
    }

    #[test]
    fn registered_addr_is_self() {
        let mut identity = LocalIdentity::new("a");
        let ip: IpAddr = "192.168.1.10".parse().unwrap();
        assert!(!identity.is_self_addr(ip));
        identity.register_local_addr(ip);
        assert!(identity.is_self_addr(ip));
    }

    #[test]
    fn own_id_is_self_regardless_of_address() {
        let identity = LocalIdentity::new("a");
        let from: SocketAddr = "192.168.1.99:45454".parse().unwrap();
        assert!(identity.is_self(identity.id(), from));
        assert!(!identity.is_self(PeerId::generate(), from));
    }

    #[test]
    fn accept_loopback_disables_address_screen_only() {
        let mut identity = LocalIdentity::new("a");
        identity.set_accept_loopback(true);
        let from: SocketAddr = "127.0.0.1:45454".parse().unwrap();
        assert!(!identity.is_self_addr(from.ip()));
        // Id screening still applies.
        assert!(identity.is_self(identity.id(), from));
    }

    #[test]
    fn default_target_is_global_broadcast() {
        let targets = DiscoveryTargets::new(45454, &[]);
        let all: Vec<_> = targets.iter().collect();
        assert_eq!(all, vec!["255.255.255.255:45454".parse().unwrap()]);
    }

    #[test]
    fn configured_targets_deduplicated() {
        let ips: Vec<IpAddr> = vec![
            "192.168.1.255".parse().unwrap(),
            "10.0.0.255".parse().unwrap(),
            "192.168.1.255".parse().unwrap(),
        ];
        let targets = DiscoveryTargets::new(45454, &ips);
        assert_eq!(targets.len(), 2);
    }
}
