use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio_stream::{wrappers::UnboundedReceiverStream, StreamExt};

use super::{Transport, TransportError};
use crate::{Dispatcher, Message, MessagePath, PeerId};

struct MemoryPeer {
    inbox: UnboundedSender<Message>,
    reachable: bool,
}

/// In-process network linking any number of [`MemoryTransport`]s. Peers
/// can be flagged unreachable to exercise send failures.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    peers: Arc<Mutex<HashMap<PeerId, MemoryPeer>>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a peer to the network, returning its transport and the inbox
    /// on which messages addressed to it arrive. Joining again with the
    /// same id replaces the old inbox.
    pub fn join(&self, id: impl Into<PeerId>) -> (MemoryTransport, UnboundedReceiver<Message>) {
        let id = id.into();
        let (inbox, receiver) = unbounded_channel();
        self.lock().insert(
            id.clone(),
            MemoryPeer {
                inbox,
                reachable: true,
            },
        );
        (
            MemoryTransport {
                id,
                network: self.clone(),
            },
            receiver,
        )
    }

    pub fn set_reachable(&self, id: &str, reachable: bool) {
        if let Some(peer) = self.lock().get_mut(id) {
            peer.reachable = reachable;
        } else {
            log::warn!("Setting reachability of unknown peer {id:}");
        }
    }

    pub fn leave(&self, id: &str) {
        self.lock().remove(id);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<PeerId, MemoryPeer>> {
        self.peers.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[derive(Clone)]
pub struct MemoryTransport {
    id: PeerId,
    network: MemoryNetwork,
}

impl MemoryTransport {
    /// Feed every message arriving in `inbox` to `dispatcher`, on a
    /// dedicated task, the way a real transport's receive thread would
    pub fn spawn_delivery(
        inbox: UnboundedReceiver<Message>,
        dispatcher: Arc<Dispatcher>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut stream = UnboundedReceiverStream::new(inbox);
            while let Some(msg) = stream.next().await {
                dispatcher.dispatch(&msg);
            }
            log::debug!("Memory transport delivery task closing");
        })
    }
}

impl Transport for MemoryTransport {
    fn local_id(&self) -> &PeerId {
        &self.id
    }

    fn peers(&self) -> Vec<PeerId> {
        let mut peers = self
            .network
            .lock()
            .keys()
            .filter(|k| **k != self.id)
            .cloned()
            .collect::<Vec<_>>();
        peers.sort();
        peers
    }

    fn send(
        &self,
        path: MessagePath,
        payload: &[u8],
        target: &PeerId,
    ) -> Result<(), TransportError> {
        let peers = self.network.lock();
        let peer = peers
            .get(target)
            .ok_or_else(|| TransportError::UnknownPeer(target.clone()))?;
        if !peer.reachable {
            return Err(TransportError::Unreachable(target.clone()));
        }
        peer.inbox
            .send(Message::new(path, payload, self.id.clone()))
            .map_err(|_| TransportError::Unreachable(target.clone()))
    }
}
