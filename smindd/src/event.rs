use futures::{FutureExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio_stream::wrappers::UnboundedReceiverStream;

use smind_broker::HubEvent;

use crate::{minder::SensorMinderResult, SensorMinderError};

#[derive(Debug)]
pub enum Event {
    Tick,
    Hub(HubEvent),
    Shutdown,
}

/// Merges the periodic tick, hub events and the shutdown signal into one
/// queue for the daemon's main loop
#[allow(dead_code)]
#[derive(Debug)]
pub struct EventHandler {
    sender: mpsc::UnboundedSender<Event>,
    receiver: mpsc::UnboundedReceiver<Event>,
    handler: tokio::task::JoinHandle<()>,
}

impl EventHandler {
    pub fn new(tick_millis: u64, hub_events: UnboundedReceiver<HubEvent>) -> Self {
        let tick_rate = Duration::from_millis(tick_millis.max(1));
        let (sender, receiver) = mpsc::unbounded_channel();
        let _sender = sender.clone();

        let mut hub_event_stream = UnboundedReceiverStream::new(hub_events);

        let handler = tokio::spawn(async move {
            let mut tick = tokio::time::interval(tick_rate);
            let mut shutdown = Box::pin(tokio::signal::ctrl_c());

            loop {
                let tick_delay = tick.tick();
                let hub_event = hub_event_stream.next().fuse();

                let event = tokio::select! {
                  _ = _sender.closed() => {
                    break;
                  }
                  _ = tick_delay => Event::Tick,
                  Some(evt) = hub_event => {
                    log::trace!("Hub event {evt:?}");
                    Event::Hub(evt)
                  }
                  res = &mut shutdown => {
                    if let Err(e) = res {
                        log::error!("Unable to listen for shutdown signal {e:}");
                    }
                    Event::Shutdown
                  }
                };

                let last = matches!(event, Event::Shutdown);
                if _sender.send(event).is_err() || last {
                    break;
                }
            }
            log::debug!("Event handler exiting");
        });

        Self {
            sender,
            receiver,
            handler,
        }
    }

    pub async fn next(&mut self) -> SensorMinderResult<Event> {
        self.receiver
            .recv()
            .await
            .ok_or(SensorMinderError::EventError)
    }
}
