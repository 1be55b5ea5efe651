use std::collections::HashMap;

use crate::PeerId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    pub display_name: String,
    pub reachable: bool,
}

/// Display names and last known reachability of paired peers, as
/// reported by the discovery / reachability collaborator
#[derive(Debug, Default)]
pub struct PeerDirectory {
    peers: HashMap<PeerId, PeerInfo>,
}

impl PeerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a peer as seen under `display_name`. A newly seen peer is
    /// assumed reachable; an existing one keeps its reachability.
    pub fn upsert(&mut self, peer: impl Into<PeerId>, display_name: impl Into<String>) {
        let display_name = display_name.into();
        self.peers
            .entry(peer.into())
            .and_modify(|p| p.display_name.clone_from(&display_name))
            .or_insert(PeerInfo {
                display_name,
                reachable: true,
            });
    }

    pub fn display_name(&self, peer: &str) -> Option<&str> {
        self.peers.get(peer).map(|p| p.display_name.as_str())
    }

    pub fn is_reachable(&self, peer: &str) -> bool {
        self.peers.get(peer).is_some_and(|p| p.reachable)
    }

    /// Update reachability, returning true only when the value actually
    /// changed. Unknown peers are ignored.
    pub fn set_reachable(&mut self, peer: &str, reachable: bool) -> bool {
        match self.peers.get_mut(peer) {
            Some(info) if info.reachable != reachable => {
                info.reachable = reachable;
                true
            }
            Some(_) => false,
            None => {
                log::warn!("Reachability update for unknown peer {peer:}");
                false
            }
        }
    }

    pub fn get(&self, peer: &str) -> Option<&PeerInfo> {
        self.peers.get(peer)
    }
}
