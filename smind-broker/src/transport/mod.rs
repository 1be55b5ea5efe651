//! Transport abstraction consumed by the hub and remote sides. The core
//! only needs to address a message to a peer by id; discovery and
//! reachability probing live with whoever implements [`Transport`].
//!
//! Two implementations ship with the crate: [`MemoryTransport`] which
//! links peers through in-process channels (tests, demos), and
//! [`UdpTransport`] which sends one JSON [`Envelope`] per datagram.

mod memory;
mod udp;

pub use memory::{MemoryNetwork, MemoryTransport};
pub use udp::{Envelope, UdpReceiver, UdpTransport, MAX_DATAGRAM_SIZE};

use thiserror::Error;

use crate::{MessagePath, PeerId};

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("I/O Error {0}")]
    Io(#[from] std::io::Error),
    #[error("Envelope encoding Error {0}")]
    Encode(#[from] serde_json::Error),
    #[error("Unknown peer {0}")]
    UnknownPeer(PeerId),
    #[error("Peer {0} is unreachable")]
    Unreachable(PeerId),
    #[error("Message of {0} bytes is too large for the transport")]
    TooLarge(usize),
}

/// Message based, at-most-once transport. Sends are synchronous and are
/// expected to either complete without blocking or fail fast.
pub trait Transport: Send + Sync {
    /// Id of the device this transport sends from
    fn local_id(&self) -> &PeerId;

    /// Ids of the peers this transport can currently address
    fn peers(&self) -> Vec<PeerId>;

    fn send(&self, path: MessagePath, payload: &[u8], target: &PeerId)
        -> Result<(), TransportError>;

    /// Send to every known peer. Failures are collected per peer and never
    /// stop the remaining sends.
    fn send_broadcast(&self, path: MessagePath, payload: &[u8]) -> Vec<(PeerId, TransportError)> {
        self.peers()
            .into_iter()
            .filter_map(|peer| {
                self.send(path, payload, &peer)
                    .map_err(|e| {
                        log::warn!("Failure to send {path:} to {peer:}: {e:}");
                        e
                    })
                    .err()
                    .map(|e| (peer, e))
            })
            .collect()
    }
}
