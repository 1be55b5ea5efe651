use std::{path::PathBuf, sync::Arc};
use tokio::sync::mpsc::unbounded_channel;

use smind_broker::{
    AnnounceClosing, ConfigError, HubConfig, PeerSeen, RequestStatus, SelectSensors,
    StopStreaming, Subscribe, UdpTransport,
};
use smindd::{
    event::{Event, EventHandler},
    minder::{SensorMinder, SensorMinderResult},
};
use tracing_appender::rolling;
use tracing_subscriber::{filter::LevelFilter, FmtSubscriber};

use tracing_log::LogTracer;

// Ticks between status requests to the paired devices
const STATUS_EVERY_TICKS: u64 = 10;

#[actix::main]
async fn main() -> SensorMinderResult<()> {
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = HubConfig::load(config_path.as_deref())?;

    let level: LevelFilter = config.log_level.parse().map_err(|_| ConfigError::Override {
        key: "log_level",
        value: config.log_level.clone(),
    })?;

    LogTracer::init().expect("Unable to set up log tracer");

    let log = rolling::daily(&config.log_dir, "sensor-minder");
    let (nb, _guard) = tracing_appender::non_blocking(log);

    let sub = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(nb)
        .finish();

    tracing::subscriber::set_global_default(sub).expect("Unable to set up tracing subscriber");

    let transport = Arc::new(
        UdpTransport::bind(config.node_id.clone(), config.listen, config.peer_addrs()).await?,
    );
    let hub =
        smind_broker::hub::start(transport.clone(), config.label.clone(), config.worker_queue);
    let _receiver = transport.spawn_receiver(hub.dispatcher());

    let (events_tx, events_rx) = unbounded_channel();
    hub.addr
        .send(Subscribe {
            id: 0,
            events: events_tx,
        })
        .await?;

    for peer in &config.peers {
        hub.addr
            .send(PeerSeen {
                peer: peer.id.clone(),
                display_name: peer.display_name().to_string(),
            })
            .await?;
    }

    for selection in &config.selections {
        let failed = hub
            .addr
            .send(SelectSensors {
                peer: selection.peer.clone(),
                sensors: selection.device_sensors(),
            })
            .await?;
        if !failed.is_empty() {
            log::warn!("Sensor data requests not delivered to {failed:?}");
        }
    }

    let mut app = SensorMinder::new(STATUS_EVERY_TICKS);
    let mut events = EventHandler::new(config.tick_millis, events_rx);

    while app.running {
        match events.next().await {
            Ok(Event::Tick) => {
                if app.tick() {
                    hub.addr.do_send(RequestStatus);
                }
            }
            Ok(Event::Hub(evt)) => app.apply(evt),
            Ok(Event::Shutdown) => {
                log::info!("Shutting down");
                app.quit();
            }
            Err(e) => {
                log::error!("Error in app event loop {e:}, exiting");
                break;
            }
        }
    }

    hub.addr.send(StopStreaming).await?;
    hub.addr.send(AnnounceClosing).await?;

    Ok(())
}
