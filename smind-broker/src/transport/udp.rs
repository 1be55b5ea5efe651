use serde::{Deserialize, Serialize};
use std::{collections::HashMap, net::SocketAddr, sync::Arc};
use tokio::net::UdpSocket;

use super::{Transport, TransportError};
use crate::{Dispatcher, Message, MessagePath, PeerId};

/// Largest payload a single UDP datagram can carry
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

/// What goes into each datagram: the message path, the sender's peer id
/// and the payload as a string (every payload in the protocol is text)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub path: String,
    pub source: PeerId,
    pub payload: String,
}

impl Envelope {
    pub fn decode(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    pub fn into_message(self) -> Message {
        Message::raw(self.path, self.payload.into_bytes(), self.source)
    }
}

/// UDP datagram transport. Peers are addressed through a static id to
/// socket address table; there is no discovery.
pub struct UdpTransport {
    id: PeerId,
    socket: Arc<UdpSocket>,
    peers: HashMap<PeerId, SocketAddr>,
}

impl UdpTransport {
    pub async fn bind(
        id: impl Into<PeerId>,
        listen: SocketAddr,
        peers: HashMap<PeerId, SocketAddr>,
    ) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind(listen).await.map_err(|e| {
            log::error!("Unable to bind to socket {listen:}");
            e
        })?;
        log::info!("UDP transport listening on {:?}", socket.local_addr());

        Ok(Self {
            id: id.into(),
            socket: Arc::new(socket),
            peers,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.socket.local_addr()?)
    }

    /// Add or move a peer
    pub fn set_peer_addr(&mut self, peer: impl Into<PeerId>, addr: SocketAddr) {
        self.peers.insert(peer.into(), addr);
    }

    /// Start the receive loop, decoding each datagram into a [`Message`]
    /// and handing it to `dispatcher`. The loop stops when the returned
    /// [`UdpReceiver`] is dropped.
    pub fn spawn_receiver(&self, dispatcher: Arc<Dispatcher>) -> UdpReceiver {
        let socket = self.socket.clone();
        let handle = tokio::spawn(async move {
            let mut buffer = vec![0u8; MAX_DATAGRAM_SIZE];
            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, from)) => {
                        if let Ok(envelope) = Envelope::decode(&buffer[..len]).map_err(|e| {
                            log::warn!("Dropping undecodable datagram from {from:}: {e:}");
                        }) {
                            log::trace!("Datagram {} from {from:}", envelope.path);
                            dispatcher.dispatch(&envelope.into_message());
                        }
                    }
                    Err(e) => {
                        // ICMP unreachable from an earlier send can surface
                        // here, the socket itself is still usable
                        log::warn!("Socket receive error {e:}");
                    }
                }
            }
        });
        UdpReceiver { handle }
    }
}

impl Transport for UdpTransport {
    fn local_id(&self) -> &PeerId {
        &self.id
    }

    fn peers(&self) -> Vec<PeerId> {
        let mut peers = self.peers.keys().cloned().collect::<Vec<_>>();
        peers.sort();
        peers
    }

    fn send(
        &self,
        path: MessagePath,
        payload: &[u8],
        target: &PeerId,
    ) -> Result<(), TransportError> {
        let addr = self
            .peers
            .get(target)
            .ok_or_else(|| TransportError::UnknownPeer(target.clone()))?;

        let envelope = Envelope {
            path: path.as_str().to_string(),
            source: self.id.clone(),
            payload: String::from_utf8_lossy(payload).into_owned(),
        };
        let bytes = serde_json::to_vec(&envelope)?;
        if bytes.len() > MAX_DATAGRAM_SIZE {
            return Err(TransportError::TooLarge(bytes.len()));
        }

        self.socket.try_send_to(&bytes, *addr)?;
        Ok(())
    }
}

pub struct UdpReceiver {
    handle: tokio::task::JoinHandle<()>,
}

impl Drop for UdpReceiver {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
