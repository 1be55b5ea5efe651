//! The `smind-broker` crate defines the messaging layer of the sensor-minder
//! system: a hub device asks paired remote devices (watches, boards) to
//! stream sensor data, and aggregates what comes back into per sensor
//! "cards" for display. The crate is composed of [`actix::Actor`] objects
//! that own all mutable state, plus the plumbing that moves messages
//! between them and the transport.
//!
//! On the hub side, [`Hub`] is the single owner of
//! 1. the per peer sensor data requests ([`RequestManager`]): at most one
//!    request per peer, replaced wholesale when the selection changes and
//!    stopped (never deleted) when streaming ends, and
//! 2. the aggregated data ([`AggregationStore`]): one [`Card`] per
//!    (peer, sensor), created on the first wanted batch, merged into on
//!    every later one and evicted once its sensor is no longer requested.
//!
//! Inbound messages are routed by path through a [`Dispatcher`]. Data
//! responses are queued for a [`ResponseWorker`] which parses them off the
//! receive path and hands the result back to the hub's mailbox.
//!
//! On the remote side, [`RemoteNode`] answers data requests by streaming
//! readings from a [`SensorSource`].
//!
//! # Examples
//! ```no_run
//! use std::sync::Arc;
//! use smind_broker::{MemoryNetwork, MemoryTransport, SelectSensors};
//! use smind_sensor::DeviceSensor;
//!
//! #[actix::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let network = MemoryNetwork::new();
//!     let (transport, inbox) = network.join("phone");
//!
//!     let hub = smind_broker::hub::start(Arc::new(transport), "Pixel", 64);
//!     let _delivery = MemoryTransport::spawn_delivery(inbox, hub.dispatcher());
//!
//!     let (events_tx, _events_rx) = tokio::sync::mpsc::unbounded_channel();
//!     hub.addr
//!         .send(smind_broker::Subscribe { id: 0, events: events_tx })
//!         .await?;
//!
//!     hub.addr
//!         .send(SelectSensors {
//!             peer: "watch1".to_string(),
//!             sensors: vec![DeviceSensor::new(DeviceSensor::HEART_RATE, "HEART_RATE")],
//!         })
//!         .await?;
//!     Ok(())
//! }
//! ```

mod aggregate;
pub mod config;
mod dispatch;
pub mod hub;
mod message;
mod path;
mod peers;
pub mod remote;
mod requests;
pub mod transport;
mod worker;

pub use aggregate::{AggregationStore, Card, CardKey, IngestError, IngestOutcome};
pub use config::{ConfigError, HubConfig, NodeConfig, PeerConfig, SelectionConfig, SensorConfig};
pub use dispatch::{Dispatcher, FnHandler, HandlerError, MessageHandler};
pub use hub::{
    AnnounceClosing, CardKeys, EvictUnwanted, GetCard, GetSummary, Hub, HubEvent, HubHandle,
    HubSummary, IngestResponse, IsSensorWanted, PeerClosing, PeerSeen, ReachabilityChanged,
    RequestStatus, SelectSensors, StartStreaming, StatusReceived, StopStreaming, Subscribe,
    Unsubscribe,
};
pub use message::Message;
pub use path::{MessagePath, UnknownPath};
pub use peers::{PeerDirectory, PeerInfo};
pub use remote::{RemoteError, RemoteHandle, RemoteNode, SensorSource, SyntheticSource};
pub use requests::RequestManager;
pub use transport::{
    Envelope, MemoryNetwork, MemoryTransport, Transport, TransportError, UdpReceiver, UdpTransport,
};
pub use worker::{parse_response, ResponseError, ResponseHandler, ResponseWorker};

/// Opaque identifier of a device on the transport
pub type PeerId = String;

/// [`ClientId`] is used with subscribing to hub events
pub type ClientId = u32;
