use std::{path::PathBuf, sync::Arc, time::Duration};

use smind_broker::{MessagePath, NodeConfig, SyntheticSource, Transport, UdpTransport};

#[actix::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = NodeConfig::load(config_path.as_deref())?;

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&config.log_level))
        .init();

    log::info!("Initializing sensor node {}", config.node_id);

    let transport = Arc::new(
        UdpTransport::bind(config.node_id.clone(), config.listen, config.peer_addrs())
            .await
            .map_err(|e| {
                log::error!("Error binding transport {e:}");
                e
            })?,
    );

    let node = smind_broker::remote::start(
        transport.clone(),
        Box::new(SyntheticSource::new(config.device_sensors())),
        Duration::from_millis(config.interval_millis),
        config.batch_capacity,
    );
    let _receiver = transport.spawn_receiver(node.dispatcher());

    tokio::signal::ctrl_c().await?;
    log::info!("Sensor node {} shutting down", config.node_id);

    for (peer, e) in transport.send_broadcast(MessagePath::Closing, config.node_id.as_bytes()) {
        log::warn!("Unable to notify {peer:} of shutdown: {e:}");
    }

    Ok(())
}
