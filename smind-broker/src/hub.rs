use actix::{prelude::*, Actor, Addr};
use smind_sensor::{DataBatch, DeviceSensor};
use std::{collections::HashMap, sync::Arc};
use tokio::sync::mpsc::UnboundedSender;

use crate::{
    aggregate::{AggregationStore, Card, CardKey, IngestOutcome},
    worker::ResponseWorker,
    ClientId, Dispatcher, FnHandler, Message as TransportMessage, MessageHandler, MessagePath,
    PeerDirectory, PeerId, RequestManager, Transport,
};

/// Everything the hub reports to its subscribers (e.g. a visualization
/// front end)
#[derive(Debug, Clone)]
pub enum HubEvent {
    CardCreated {
        key: CardKey,
        heading: String,
        sub_heading: String,
    },
    /// New readings were merged into the card for `key`; `batch` holds
    /// only the newly arrived readings
    DataChanged { key: CardKey, batch: DataBatch },
    CardRemoved(CardKey),
    StatusReceived { peer: PeerId, status: String },
    PeerClosing { peer: PeerId, label: String },
    ReachabilityChanged { peer: PeerId, reachable: bool },
}

/// The single owner of request and aggregation state on the hub device.
///
/// All mutations of the [`RequestManager`] and [`AggregationStore`] go
/// through this actor's mailbox, so they are applied serially no matter
/// which thread the transport delivers on. Message handlers registered with
/// the [`Dispatcher`] only forward into the mailbox.
pub struct Hub {
    local_node_id: PeerId,
    label: String,
    transport: Arc<dyn Transport>,
    requests: RequestManager,
    cards: AggregationStore,
    directory: PeerDirectory,
    subscribers: HashMap<ClientId, UnboundedSender<HubEvent>>,
}

impl Hub {
    pub fn new(transport: Arc<dyn Transport>, label: impl Into<String>) -> Self {
        Self {
            local_node_id: transport.local_id().clone(),
            label: label.into(),
            transport,
            requests: RequestManager::new(),
            cards: AggregationStore::new(),
            directory: PeerDirectory::new(),
            subscribers: HashMap::new(),
        }
    }

    fn publish(&mut self, event: HubEvent) {
        self.subscribers.retain(|id, sender| {
            sender
                .send(event.clone())
                .map_err(|e| {
                    log::error!("Failure to send to subscriber {id:}, dropping it: {e:}");
                })
                .is_ok()
        });
    }

    /// Send every tracked request, returning the peers that could not be
    /// reached
    fn send_requests(&self) -> Vec<PeerId> {
        let transport = self.transport.clone();
        self.requests
            .send_all(|peer, payload| transport.send(MessagePath::SensorDataRequest, payload, peer))
            .into_iter()
            .map(|(peer, _)| peer)
            .collect()
    }

    fn evict(&mut self) -> Vec<CardKey> {
        let removed = self.cards.evict_unwanted(&self.requests);
        for key in &removed {
            self.publish(HubEvent::CardRemoved(key.clone()));
        }
        removed
    }

    fn ingest(&mut self, batch: DataBatch, source_peer: &str) {
        let delta = (!self.subscribers.is_empty()).then(|| batch.clone());

        match self
            .cards
            .ingest(batch, source_peer, &self.requests, &self.directory)
        {
            Ok((_, IngestOutcome::Discarded)) => {}
            Ok((key, outcome)) => {
                if outcome == IngestOutcome::Created {
                    if let Some(card) = self.cards.card(&key) {
                        let event = HubEvent::CardCreated {
                            key: key.clone(),
                            heading: card.heading.clone(),
                            sub_heading: card.sub_heading.clone(),
                        };
                        self.publish(event);
                    }
                }
                if let Some(batch) = delta {
                    self.publish(HubEvent::DataChanged { key, batch });
                }
            }
            Err(e) => {
                log::warn!("Unable to aggregate data batch: {e:}");
            }
        }
    }
}

impl Actor for Hub {
    type Context = Context<Self>;

    fn started(&mut self, _ctx: &mut Self::Context) {
        log::info!("Hub {} started", self.local_node_id);
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        log::warn!("Hub {} stopped", self.local_node_id);
    }
}

/// Running hub: the actor address plus the dispatcher the transport should
/// deliver inbound messages to. Dropping the handle unregisters the hub's
/// message handlers and stops the response worker.
pub struct HubHandle {
    pub addr: Addr<Hub>,
    dispatcher: Arc<Dispatcher>,
    handlers: Vec<Arc<dyn MessageHandler>>,
    _worker: ResponseWorker,
}

impl HubHandle {
    pub fn dispatcher(&self) -> Arc<Dispatcher> {
        self.dispatcher.clone()
    }
}

impl Drop for HubHandle {
    fn drop(&mut self) {
        for handler in &self.handlers {
            self.dispatcher.unregister(handler);
        }
    }
}

/// Start a [`Hub`] on the current actix system and wire its message
/// handlers into a fresh [`Dispatcher`]. Responses wait in a queue of
/// `worker_queue` entries for parsing.
pub fn start(
    transport: Arc<dyn Transport>,
    label: impl Into<String>,
    worker_queue: usize,
) -> HubHandle {
    let addr = Hub::new(transport, label).start();
    let dispatcher = Arc::new(Dispatcher::new());

    let (response_handler, worker) = ResponseWorker::spawn(worker_queue, addr.clone().recipient());

    let status_addr = addr.clone();
    let status_handler = FnHandler::new(MessagePath::SetStatus, move |msg: &TransportMessage| {
        log::debug!("Received status from {}", msg.source_node_id);
        status_addr.do_send(StatusReceived {
            peer: msg.source_node_id.clone(),
            status: msg.payload_str().into_owned(),
        });
        Ok(())
    });

    let closing_addr = addr.clone();
    let closing_handler = FnHandler::new(MessagePath::Closing, move |msg: &TransportMessage| {
        closing_addr.do_send(PeerClosing {
            peer: msg.source_node_id.clone(),
            label: msg.payload_str().into_owned(),
        });
        Ok(())
    });

    let handlers: Vec<Arc<dyn MessageHandler>> = vec![
        Arc::new(status_handler),
        Arc::new(response_handler),
        Arc::new(closing_handler),
    ];
    for handler in &handlers {
        dispatcher.register(handler.clone());
    }

    HubHandle {
        addr,
        dispatcher,
        handlers,
        _worker: worker,
    }
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct Subscribe {
    pub id: ClientId,
    pub events: UnboundedSender<HubEvent>,
}

impl Handler<Subscribe> for Hub {
    type Result = ();

    fn handle(&mut self, msg: Subscribe, _ctx: &mut Self::Context) -> Self::Result {
        self.subscribers.insert(msg.id, msg.events);
        log::debug!("Subscribed client ID {}", msg.id);
    }
}

#[derive(Message)]
#[rtype(result = "bool")]
pub struct Unsubscribe {
    pub id: ClientId,
}

impl Handler<Unsubscribe> for Hub {
    type Result = bool;

    fn handle(&mut self, msg: Unsubscribe, _ctx: &mut Self::Context) -> Self::Result {
        if self.subscribers.remove(&msg.id).is_none() {
            log::warn!("Removing non-existent subscriber ID {}", msg.id);
            false
        } else {
            log::debug!("Unsubscribed client ID {}", msg.id);
            true
        }
    }
}

/// The selection collaborator finalized the sensors wanted from `peer`.
/// Replaces the peer's request, re-sends all requests and evicts cards
/// that are no longer backed by a request. Returns peers that could not
/// be sent to.
#[derive(Message)]
#[rtype(result = "Vec<PeerId>")]
pub struct SelectSensors {
    pub peer: PeerId,
    pub sensors: Vec<DeviceSensor>,
}

impl Handler<SelectSensors> for Hub {
    type Result = Vec<PeerId>;

    fn handle(&mut self, msg: SelectSensors, _ctx: &mut Self::Context) -> Self::Result {
        self.requests
            .set_request(msg.peer, msg.sensors, self.local_node_id.clone());
        let failed = self.send_requests();
        self.evict();
        failed
    }
}

/// (Re)send every tracked request, e.g. when the hub comes to the
/// foreground
#[derive(Message)]
#[rtype(result = "Vec<PeerId>")]
pub struct StartStreaming;

impl Handler<StartStreaming> for Hub {
    type Result = Vec<PeerId>;

    fn handle(&mut self, _msg: StartStreaming, _ctx: &mut Self::Context) -> Self::Result {
        log::debug!("Updating sensor data requests");
        self.send_requests()
    }
}

/// End every active request and tell the peers. Does nothing, and sends
/// nothing, if no request is active. Returns whether anything was stopped.
#[derive(Message)]
#[rtype(result = "bool")]
pub struct StopStreaming;

impl Handler<StopStreaming> for Hub {
    type Result = bool;

    fn handle(&mut self, _msg: StopStreaming, _ctx: &mut Self::Context) -> Self::Result {
        if !self.requests.stop_all() {
            log::debug!("No active requests to stop");
            return false;
        }
        log::info!("Stopped requesting sensor data");
        self.send_requests();
        self.evict();
        true
    }
}

/// Best effort notice to every peer that this device is going away
#[derive(Message)]
#[rtype(result = "()")]
pub struct AnnounceClosing;

impl Handler<AnnounceClosing> for Hub {
    type Result = ();

    fn handle(&mut self, _msg: AnnounceClosing, _ctx: &mut Self::Context) -> Self::Result {
        self.transport
            .send_broadcast(MessagePath::Closing, self.label.as_bytes());
    }
}

/// Ask every peer for its status; replies arrive as
/// [`HubEvent::StatusReceived`]
#[derive(Message)]
#[rtype(result = "Vec<PeerId>")]
pub struct RequestStatus;

impl Handler<RequestStatus> for Hub {
    type Result = Vec<PeerId>;

    fn handle(&mut self, _msg: RequestStatus, _ctx: &mut Self::Context) -> Self::Result {
        log::trace!("Sending a status update request");
        self.transport
            .send_broadcast(MessagePath::GetStatus, b"")
            .into_iter()
            .map(|(peer, _)| peer)
            .collect()
    }
}

/// Parsed response handed over by the response worker. Batches are
/// applied in order.
#[derive(Message, Debug)]
#[rtype(result = "()")]
pub struct IngestResponse {
    pub source_peer: PeerId,
    pub batches: Vec<DataBatch>,
}

impl Handler<IngestResponse> for Hub {
    type Result = ();

    fn handle(&mut self, msg: IngestResponse, _ctx: &mut Self::Context) -> Self::Result {
        for batch in msg.batches {
            self.ingest(batch, &msg.source_peer);
        }
    }
}

#[derive(Message)]
#[rtype(result = "Vec<CardKey>")]
pub struct EvictUnwanted;

impl Handler<EvictUnwanted> for Hub {
    type Result = Vec<CardKey>;

    fn handle(&mut self, _msg: EvictUnwanted, _ctx: &mut Self::Context) -> Self::Result {
        self.evict()
    }
}

/// Discovery collaborator saw `peer`
#[derive(Message)]
#[rtype(result = "()")]
pub struct PeerSeen {
    pub peer: PeerId,
    pub display_name: String,
}

impl Handler<PeerSeen> for Hub {
    type Result = ();

    fn handle(&mut self, msg: PeerSeen, _ctx: &mut Self::Context) -> Self::Result {
        if self.directory.get(&msg.peer).is_none() {
            log::info!("New peer {} ({})", msg.peer, msg.display_name);
        }
        self.directory.upsert(msg.peer, msg.display_name);
    }
}

/// Reachability collaborator reports the current state of `peer`.
/// Returns true if this changed the known state. No request is re-sent
/// when a peer becomes reachable again.
#[derive(Message)]
#[rtype(result = "bool")]
pub struct ReachabilityChanged {
    pub peer: PeerId,
    pub reachable: bool,
}

impl Handler<ReachabilityChanged> for Hub {
    type Result = bool;

    fn handle(&mut self, msg: ReachabilityChanged, _ctx: &mut Self::Context) -> Self::Result {
        if !self.directory.set_reachable(&msg.peer, msg.reachable) {
            return false;
        }
        let name = self
            .directory
            .display_name(&msg.peer)
            .unwrap_or(msg.peer.as_str());
        if msg.reachable {
            log::info!("{name:} connected");
        } else {
            log::warn!("{name:} disconnected");
        }
        self.publish(HubEvent::ReachabilityChanged {
            peer: msg.peer,
            reachable: msg.reachable,
        });
        true
    }
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct StatusReceived {
    pub peer: PeerId,
    pub status: String,
}

impl Handler<StatusReceived> for Hub {
    type Result = ();

    fn handle(&mut self, msg: StatusReceived, _ctx: &mut Self::Context) -> Self::Result {
        log::debug!("Status from {}: {}", msg.peer, msg.status);
        self.publish(HubEvent::StatusReceived {
            peer: msg.peer,
            status: msg.status,
        });
    }
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct PeerClosing {
    pub peer: PeerId,
    pub label: String,
}

impl Handler<PeerClosing> for Hub {
    type Result = ();

    fn handle(&mut self, msg: PeerClosing, _ctx: &mut Self::Context) -> Self::Result {
        log::info!("{} ({}) is closing", msg.peer, msg.label);
        if self.directory.set_reachable(&msg.peer, false) {
            self.publish(HubEvent::ReachabilityChanged {
                peer: msg.peer.clone(),
                reachable: false,
            });
        }
        self.publish(HubEvent::PeerClosing {
            peer: msg.peer,
            label: msg.label,
        });
    }
}

#[derive(Message)]
#[rtype(result = "bool")]
pub struct IsSensorWanted {
    pub peer: PeerId,
    pub source: String,
}

impl Handler<IsSensorWanted> for Hub {
    type Result = bool;

    fn handle(&mut self, msg: IsSensorWanted, _ctx: &mut Self::Context) -> Self::Result {
        self.requests.is_sensor_wanted(&msg.peer, &msg.source)
    }
}

#[derive(Message)]
#[rtype(result = "Option<Card>")]
pub struct GetCard(pub CardKey);

impl Handler<GetCard> for Hub {
    type Result = Option<Card>;

    fn handle(&mut self, msg: GetCard, _ctx: &mut Self::Context) -> Self::Result {
        self.cards.card(&msg.0).cloned()
    }
}

#[derive(Message)]
#[rtype(result = "Vec<CardKey>")]
pub struct CardKeys;

impl Handler<CardKeys> for Hub {
    type Result = Vec<CardKey>;

    fn handle(&mut self, _msg: CardKeys, _ctx: &mut Self::Context) -> Self::Result {
        self.cards.keys()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, MessageResponse)]
pub struct HubSummary {
    /// Peers with an active request
    pub active_peers: Vec<PeerId>,
    /// Readings held per card
    pub cards: Vec<(CardKey, usize)>,
}

#[derive(Message)]
#[rtype(result = "HubSummary")]
pub struct GetSummary;

impl Handler<GetSummary> for Hub {
    type Result = HubSummary;

    fn handle(&mut self, _msg: GetSummary, _ctx: &mut Self::Context) -> Self::Result {
        HubSummary {
            active_peers: self
                .requests
                .peers()
                .into_iter()
                .filter(|p| self.requests.is_active(p))
                .collect(),
            cards: self.cards.cards().map(|c| (c.key.clone(), c.len())).collect(),
        }
    }
}
