use std::{collections::HashMap, net::SocketAddr, sync::Arc, time::Duration};

use smind_broker::{
    GetSummary, HubEvent, PeerSeen, SelectSensors, StopStreaming, Subscribe, SyntheticSource,
    UdpTransport,
};
use smind_sensor::DeviceSensor;

// Runs a hub and one remote node over UDP on localhost, streams for a few
// seconds and then stops
#[actix::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let any: SocketAddr = "127.0.0.1:0".parse()?;
    let mut hub_transport = UdpTransport::bind("hub", any, HashMap::new()).await?;
    let mut node_transport = UdpTransport::bind("node", any, HashMap::new()).await?;
    hub_transport.set_peer_addr("node", node_transport.local_addr()?);
    node_transport.set_peer_addr("hub", hub_transport.local_addr()?);
    let hub_transport = Arc::new(hub_transport);
    let node_transport = Arc::new(node_transport);

    log::info!("Initializing hub and node");
    let hub = smind_broker::hub::start(hub_transport.clone(), "loopback hub", 16);
    let _hub_rx = hub_transport.spawn_receiver(hub.dispatcher());

    let sensors = vec![
        DeviceSensor::new(DeviceSensor::ACCELEROMETER, "ACCELEROMETER"),
        DeviceSensor::new(DeviceSensor::HEART_RATE, "HEART_RATE"),
    ];
    let node = smind_broker::remote::start(
        node_transport.clone(),
        Box::new(SyntheticSource::new(sensors.clone())),
        Duration::from_millis(200),
        50,
    );
    let _node_rx = node_transport.spawn_receiver(node.dispatcher());

    let (events_tx, mut events_rx) = tokio::sync::mpsc::unbounded_channel();
    hub.addr
        .send(Subscribe {
            id: 0,
            events: events_tx,
        })
        .await?;
    hub.addr
        .send(PeerSeen {
            peer: "node".to_string(),
            display_name: "Loopback node".to_string(),
        })
        .await?;
    hub.addr
        .send(SelectSensors {
            peer: "node".to_string(),
            sensors,
        })
        .await
        .map_err(|e| {
            log::error!("Error sending selection {e:}");
            e
        })?;

    let deadline = tokio::time::sleep(Duration::from_secs(3));
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            _ = &mut deadline => break,
            Some(evt) = events_rx.recv() => {
                if let HubEvent::DataChanged { key, batch } = evt {
                    log::info!("{key:} +{} readings", batch.len());
                }
            }
        }
    }

    let summary = hub.addr.send(GetSummary).await?;
    for (key, readings) in &summary.cards {
        log::info!("{key:} holds {readings} readings");
    }
    hub.addr.send(StopStreaming).await?;

    if summary.cards.is_empty() {
        return Err("no data reached the hub".into());
    }
    Ok(())
}
