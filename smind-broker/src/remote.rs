use actix::{prelude::*, Actor, Addr, SpawnHandle};
use smind_sensor::{
    now_millis, Capacity, DataBatch, DataRequestResponse, DeviceSensor, SensorDataRequest,
    SensorReading, SensorType,
};
use std::{collections::HashMap, sync::Arc, time::Duration};
use thiserror::Error;

use crate::{
    Dispatcher, FnHandler, HandlerError, Message as TransportMessage, MessageHandler, MessagePath,
    PeerId, Transport, TransportError,
};

#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("Wire Error {0}")]
    Wire(#[from] smind_sensor::WireError),
    #[error("Transport Error {0}")]
    Transport(#[from] TransportError),
}

/// Where a remote device gets its readings from
pub trait SensorSource {
    /// Sensors this device can serve
    fn sensors(&self) -> Vec<DeviceSensor>;
    /// Take one reading, or `None` if the sensor is absent or has nothing
    /// new
    fn read(&mut self, sensor_type: SensorType) -> Option<Vec<f64>>;
}

/// Deterministic waveforms standing in for real hardware
pub struct SyntheticSource {
    sensors: Vec<DeviceSensor>,
    steps: HashMap<SensorType, u64>,
}

impl SyntheticSource {
    pub fn new(sensors: Vec<DeviceSensor>) -> Self {
        Self {
            sensors,
            steps: HashMap::new(),
        }
    }
}

impl SensorSource for SyntheticSource {
    fn sensors(&self) -> Vec<DeviceSensor> {
        self.sensors.clone()
    }

    fn read(&mut self, sensor_type: SensorType) -> Option<Vec<f64>> {
        if !self.sensors.iter().any(|s| s.sensor_type == sensor_type) {
            return None;
        }
        let step = self.steps.entry(sensor_type).or_insert(0);
        let t = *step as f64 / 10.0;
        *step += 1;

        let values = match sensor_type {
            DeviceSensor::ACCELEROMETER
            | DeviceSensor::GYROSCOPE
            | DeviceSensor::MAGNETIC_FIELD => {
                vec![t.sin(), t.cos(), (t / 2.0).sin()]
            }
            DeviceSensor::HEART_RATE => vec![70.0 + 8.0 * t.sin()],
            DeviceSensor::LIGHT => vec![300.0 + 250.0 * (t / 4.0).sin()],
            DeviceSensor::PRESSURE => vec![1013.25 + (t / 8.0).sin()],
            _ => vec![t.sin()],
        };
        Some(values)
    }
}

struct Session {
    request: SensorDataRequest,
    batches: Vec<(SensorType, DataBatch)>,
    timer: SpawnHandle,
}

/// Responder side of the streaming protocol, running on a remote device.
///
/// Keeps one streaming session per requesting hub. Each interval the
/// session samples every requested sensor the source has and sends the
/// accumulated batches. If a send fails the readings are kept (bounded by
/// `batch_capacity`, oldest dropped first) and go out with the next send.
pub struct RemoteNode {
    transport: Arc<dyn Transport>,
    source: Box<dyn SensorSource>,
    interval: Duration,
    batch_capacity: usize,
    sessions: HashMap<PeerId, Session>,
}

impl RemoteNode {
    pub fn new(
        transport: Arc<dyn Transport>,
        source: Box<dyn SensorSource>,
        interval: Duration,
        batch_capacity: usize,
    ) -> Self {
        Self {
            transport,
            source,
            interval,
            batch_capacity,
            sessions: HashMap::new(),
        }
    }

    fn sensor_name(&self, sensor_type: SensorType) -> String {
        self.source
            .sensors()
            .into_iter()
            .find(|s| s.sensor_type == sensor_type)
            .map(|s| s.name)
            .unwrap_or_else(|| sensor_type.to_string())
    }

    fn end_session(&mut self, hub: &str, ctx: &mut Context<Self>) -> bool {
        match self.sessions.remove(hub) {
            Some(session) => {
                ctx.cancel_future(session.timer);
                log::info!("Stopped streaming to {hub:}");
                true
            }
            None => false,
        }
    }

    fn begin_session(&mut self, hub: PeerId, request: SensorDataRequest, ctx: &mut Context<Self>) {
        self.end_session(&hub, ctx);

        let batches = request
            .sensor_types
            .iter()
            .map(|t| {
                let batch = DataBatch::with_capacity(
                    self.sensor_name(*t),
                    Capacity::Bounded(self.batch_capacity),
                );
                (*t, batch)
            })
            .collect();

        let peer = hub.clone();
        let timer = ctx.run_interval(self.interval, move |act, _ctx| {
            if let Err(e) = act.sample_and_send(&peer) {
                log::warn!("Failed to stream to {peer:}: {e:}");
            }
        });

        log::info!(
            "Streaming sensor types {:?} to {hub:} every {:?}",
            request.sensor_types,
            self.interval
        );
        self.sessions.insert(
            hub,
            Session {
                request,
                batches,
                timer,
            },
        );
    }

    fn sample_and_send(&mut self, hub: &PeerId) -> Result<(), RemoteError> {
        let Some(session) = self.sessions.get_mut(hub) else {
            return Ok(());
        };

        let timestamp = now_millis();
        for (sensor_type, batch) in session.batches.iter_mut() {
            if let Some(values) = self.source.read(*sensor_type) {
                batch.add_reading(SensorReading::new(timestamp, values));
            }
        }

        let pending = session
            .batches
            .iter()
            .filter(|(_, b)| !b.is_empty())
            .map(|(_, b)| b.clone())
            .collect::<Vec<_>>();
        if pending.is_empty() {
            return Ok(());
        }

        let response =
            DataRequestResponse::with_batches(self.transport.local_id().clone(), pending);
        let payload = response.to_json()?;
        self.transport
            .send(MessagePath::SensorDataRequestResponse, payload.as_bytes(), hub)?;

        for (_, batch) in session.batches.iter_mut() {
            batch.drain();
        }
        Ok(())
    }

    fn status(&self) -> String {
        serde_json::json!({
            "nodeId": self.transport.local_id(),
            "streaming": !self.sessions.is_empty(),
            "activeRequests": self.sessions.len(),
        })
        .to_string()
    }
}

impl Actor for RemoteNode {
    type Context = Context<Self>;

    fn started(&mut self, _ctx: &mut Self::Context) {
        log::info!(
            "Remote node {} serving {} sensors",
            self.transport.local_id(),
            self.source.sensors().len()
        );
    }
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct DataRequestReceived {
    pub hub: PeerId,
    pub request: SensorDataRequest,
}

impl Handler<DataRequestReceived> for RemoteNode {
    type Result = ();

    fn handle(&mut self, msg: DataRequestReceived, ctx: &mut Self::Context) -> Self::Result {
        if msg.request.is_active() {
            self.begin_session(msg.hub, msg.request, ctx);
        } else if !self.end_session(&msg.hub, ctx) {
            log::debug!("Stop request from {} with no session", msg.hub);
        }
    }
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct StatusRequested {
    pub hub: PeerId,
}

impl Handler<StatusRequested> for RemoteNode {
    type Result = ();

    fn handle(&mut self, msg: StatusRequested, _ctx: &mut Self::Context) -> Self::Result {
        let status = self.status();
        if let Err(e) = self
            .transport
            .send(MessagePath::SetStatus, status.as_bytes(), &msg.hub)
        {
            log::warn!("Unable to send status to {}: {e:}", msg.hub);
        }
    }
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct HubClosing {
    pub hub: PeerId,
    pub label: String,
}

impl Handler<HubClosing> for RemoteNode {
    type Result = ();

    fn handle(&mut self, msg: HubClosing, ctx: &mut Self::Context) -> Self::Result {
        log::info!("Hub {} ({}) is closing", msg.hub, msg.label);
        self.end_session(&msg.hub, ctx);
    }
}

/// Hubs currently being streamed to, with their requests
#[derive(Message)]
#[rtype(result = "Vec<(PeerId, SensorDataRequest)>")]
pub struct GetSessions;

impl Handler<GetSessions> for RemoteNode {
    type Result = Vec<(PeerId, SensorDataRequest)>;

    fn handle(&mut self, _msg: GetSessions, _ctx: &mut Self::Context) -> Self::Result {
        let mut sessions = self
            .sessions
            .iter()
            .map(|(hub, s)| (hub.clone(), s.request.clone()))
            .collect::<Vec<_>>();
        sessions.sort_by(|a, b| a.0.cmp(&b.0));
        sessions
    }
}

/// Running remote node, see [`crate::HubHandle`]
pub struct RemoteHandle {
    pub addr: Addr<RemoteNode>,
    dispatcher: Arc<Dispatcher>,
    handlers: Vec<Arc<dyn MessageHandler>>,
}

impl RemoteHandle {
    pub fn dispatcher(&self) -> Arc<Dispatcher> {
        self.dispatcher.clone()
    }
}

impl Drop for RemoteHandle {
    fn drop(&mut self) {
        for handler in &self.handlers {
            self.dispatcher.unregister(handler);
        }
    }
}

/// Queue `msg` for the node. The mailbox is not bounded for messages
/// arriving from the transport, so only a stopped node refuses them.
fn forward<M>(addr: &Addr<RemoteNode>, msg: M) -> Result<(), HandlerError>
where
    M: actix::Message + Send + 'static,
    M::Result: Send,
    RemoteNode: Handler<M>,
{
    if !addr.connected() {
        return Err(HandlerError::OwnerGone);
    }
    addr.do_send(msg);
    Ok(())
}

/// Start a [`RemoteNode`] on the current actix system and register its
/// message handlers with a fresh [`Dispatcher`]
pub fn start(
    transport: Arc<dyn Transport>,
    source: Box<dyn SensorSource>,
    interval: Duration,
    batch_capacity: usize,
) -> RemoteHandle {
    let addr = RemoteNode::new(transport, source, interval, batch_capacity).start();
    let dispatcher = Arc::new(Dispatcher::new());

    let request_addr = addr.clone();
    let request_handler = FnHandler::new(
        MessagePath::SensorDataRequest,
        move |msg: &TransportMessage| {
            let request = SensorDataRequest::from_slice(&msg.payload)?;
            forward(
                &request_addr,
                DataRequestReceived {
                    hub: msg.source_node_id.clone(),
                    request,
                },
            )
        },
    );

    let status_addr = addr.clone();
    let status_handler = FnHandler::new(MessagePath::GetStatus, move |msg: &TransportMessage| {
        forward(
            &status_addr,
            StatusRequested {
                hub: msg.source_node_id.clone(),
            },
        )
    });

    let closing_addr = addr.clone();
    let closing_handler = FnHandler::new(MessagePath::Closing, move |msg: &TransportMessage| {
        forward(
            &closing_addr,
            HubClosing {
                hub: msg.source_node_id.clone(),
                label: msg.payload_str().into_owned(),
            },
        )
    });

    let handlers: Vec<Arc<dyn MessageHandler>> = vec![
        Arc::new(request_handler),
        Arc::new(status_handler),
        Arc::new(closing_handler),
    ];
    for handler in &handlers {
        dispatcher.register(handler.clone());
    }

    RemoteHandle {
        addr,
        dispatcher,
        handlers,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryNetwork;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn sensors() -> Vec<DeviceSensor> {
        vec![
            DeviceSensor::new(DeviceSensor::ACCELEROMETER, "ACCELEROMETER"),
            DeviceSensor::new(DeviceSensor::HEART_RATE, "HEART_RATE"),
        ]
    }

    fn setup() -> (RemoteHandle, UnboundedReceiver<TransportMessage>, MemoryNetwork) {
        let _ = env_logger::builder().is_test(true).try_init();
        let network = MemoryNetwork::new();
        let (transport, _inbox) = network.join("watch1");
        let (_hub, hub_inbox) = network.join("phone");
        let handle = start(
            Arc::new(transport),
            Box::new(SyntheticSource::new(sensors())),
            Duration::from_millis(10),
            16,
        );
        (handle, hub_inbox, network)
    }

    fn request_message(request: &SensorDataRequest) -> TransportMessage {
        TransportMessage::new(
            MessagePath::SensorDataRequest,
            request.to_json().unwrap(),
            "phone",
        )
    }

    async fn next_message(inbox: &mut UnboundedReceiver<TransportMessage>) -> TransportMessage {
        tokio::time::timeout(Duration::from_secs(2), inbox.recv())
            .await
            .expect("message within timeout")
            .expect("network alive")
    }

    #[test]
    fn synthetic_source_is_deterministic() {
        let mut a = SyntheticSource::new(sensors());
        let mut b = SyntheticSource::new(sensors());
        for _ in 0..5 {
            assert_eq!(
                a.read(DeviceSensor::HEART_RATE),
                b.read(DeviceSensor::HEART_RATE)
            );
        }
        assert_eq!(a.read(DeviceSensor::ACCELEROMETER).map(|v| v.len()), Some(3));
        assert_eq!(a.read(DeviceSensor::LIGHT), None);
    }

    #[actix::test]
    async fn active_request_starts_streaming() {
        let (handle, mut hub_inbox, _network) = setup();
        let request = SensorDataRequest::new("phone", vec![DeviceSensor::HEART_RATE]);
        handle.dispatcher().dispatch(&request_message(&request));

        let msg = next_message(&mut hub_inbox).await;
        assert_eq!(msg.message_path(), Ok(MessagePath::SensorDataRequestResponse));
        let response = DataRequestResponse::from_slice(&msg.payload).unwrap();
        assert_eq!(response.source_node_id, "watch1");
        assert_eq!(response.data_batches.len(), 1);
        assert_eq!(response.data_batches[0].source(), "HEART_RATE");
        assert!(!response.data_batches[0].is_empty());
    }

    #[actix::test]
    async fn stop_request_ends_session() {
        let (handle, mut hub_inbox, _network) = setup();
        let mut request = SensorDataRequest::new("phone", vec![DeviceSensor::ACCELEROMETER]);
        handle.dispatcher().dispatch(&request_message(&request));
        next_message(&mut hub_inbox).await;

        request.stop();
        handle.dispatcher().dispatch(&request_message(&request));
        let sessions = handle.addr.send(GetSessions).await.unwrap();
        assert!(sessions.is_empty());
    }

    #[actix::test]
    async fn new_request_replaces_session() {
        let (handle, _hub_inbox, _network) = setup();
        let dispatcher = handle.dispatcher();
        dispatcher.dispatch(&request_message(&SensorDataRequest::new(
            "phone",
            vec![DeviceSensor::ACCELEROMETER],
        )));
        dispatcher.dispatch(&request_message(&SensorDataRequest::new(
            "phone",
            vec![DeviceSensor::HEART_RATE],
        )));

        let sessions = handle.addr.send(GetSessions).await.unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].1.sensor_types, vec![DeviceSensor::HEART_RATE]);
    }

    #[actix::test]
    async fn status_reports_sessions() {
        let (handle, mut hub_inbox, _network) = setup();
        let dispatcher = handle.dispatcher();
        dispatcher.dispatch(&TransportMessage::new(MessagePath::GetStatus, "", "phone"));

        let msg = next_message(&mut hub_inbox).await;
        assert_eq!(msg.message_path(), Ok(MessagePath::SetStatus));
        let status: serde_json::Value = serde_json::from_slice(&msg.payload).unwrap();
        assert_eq!(status["nodeId"], "watch1");
        assert_eq!(status["streaming"], false);
        assert_eq!(status["activeRequests"], 0);
    }

    #[actix::test]
    async fn status_burst_is_not_dropped() {
        let (handle, mut hub_inbox, _network) = setup();
        let dispatcher = handle.dispatcher();
        let msg = TransportMessage::new(MessagePath::GetStatus, "", "phone");
        for _ in 0..40 {
            assert_eq!(dispatcher.dispatch(&msg), 1);
        }

        for _ in 0..40 {
            let reply = next_message(&mut hub_inbox).await;
            assert_eq!(reply.message_path(), Ok(MessagePath::SetStatus));
        }
    }

    #[actix::test]
    async fn request_after_burst_still_applies() {
        let (handle, _hub_inbox, _network) = setup();
        let dispatcher = handle.dispatcher();
        let status = TransportMessage::new(MessagePath::GetStatus, "", "phone");
        for _ in 0..32 {
            dispatcher.dispatch(&status);
        }
        dispatcher.dispatch(&request_message(&SensorDataRequest::new(
            "phone",
            vec![DeviceSensor::HEART_RATE],
        )));

        let sessions = handle.addr.send(GetSessions).await.unwrap();
        assert_eq!(sessions.len(), 1);
    }

    #[actix::test]
    async fn closing_hub_ends_session() {
        let (handle, _hub_inbox, _network) = setup();
        let dispatcher = handle.dispatcher();
        dispatcher.dispatch(&request_message(&SensorDataRequest::new(
            "phone",
            vec![DeviceSensor::HEART_RATE],
        )));
        dispatcher.dispatch(&TransportMessage::new(MessagePath::Closing, "Pixel", "phone"));

        assert!(handle.addr.send(GetSessions).await.unwrap().is_empty());
    }

    #[actix::test]
    async fn unsent_readings_are_kept_bounded() {
        let (handle, mut hub_inbox, network) = setup();
        network.set_reachable("phone", false);
        handle.dispatcher().dispatch(&request_message(&SensorDataRequest::new(
            "phone",
            vec![DeviceSensor::HEART_RATE],
        )));

        // let more ticks pass than the batch can hold
        tokio::time::sleep(Duration::from_millis(300)).await;
        network.set_reachable("phone", true);

        let msg = next_message(&mut hub_inbox).await;
        let response = DataRequestResponse::from_slice(&msg.payload).unwrap();
        let held = response.data_batches[0].len();
        assert!(held > 1 && held <= 16, "held {held} readings");
    }
}
