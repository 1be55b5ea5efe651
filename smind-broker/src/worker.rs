use actix::Recipient;
use smind_sensor::{DataRequestResponse, WireError};
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::{HandlerError, IngestResponse, Message, MessageHandler, MessagePath, PeerId};

#[derive(Error, Debug)]
pub enum ResponseError {
    #[error("Malformed response from {peer}: {source}")]
    MalformedResponse {
        peer: PeerId,
        #[source]
        source: WireError,
    },
}

/// Parse a `SENSOR_DATA_REQUEST_RESPONSE` message. The batches are
/// attributed to the peer the transport says sent the message.
pub fn parse_response(msg: &Message) -> Result<IngestResponse, ResponseError> {
    let response = DataRequestResponse::from_slice(&msg.payload).map_err(|source| {
        ResponseError::MalformedResponse {
            peer: msg.source_node_id.clone(),
            source,
        }
    })?;

    if response.source_node_id != msg.source_node_id {
        log::debug!(
            "Response claims source {} but arrived from {}",
            response.source_node_id,
            msg.source_node_id
        );
    }

    Ok(IngestResponse {
        source_peer: msg.source_node_id.clone(),
        batches: response.data_batches,
    })
}

/// Dispatcher side of the response pipeline: queues raw responses for the
/// worker without ever blocking the transport's receive path
pub struct ResponseHandler {
    queue: mpsc::Sender<Message>,
}

impl MessageHandler for ResponseHandler {
    fn path(&self) -> MessagePath {
        MessagePath::SensorDataRequestResponse
    }

    fn handle(&self, msg: &Message) -> Result<(), HandlerError> {
        self.queue.try_send(msg.clone()).map_err(|e| match e {
            TrySendError::Full(_) => {
                log::warn!("Response queue full, dropping response from {}", msg.source_node_id);
                HandlerError::QueueFull
            }
            TrySendError::Closed(_) => HandlerError::OwnerGone,
        })
    }
}

/// Parses queued responses on the blocking pool and delivers the result
/// to the owning actor. The task stops when the owner disconnects or when
/// this handle is dropped.
pub struct ResponseWorker {
    handle: tokio::task::JoinHandle<()>,
}

impl ResponseWorker {
    /// Spawn the worker with a queue bounded to `capacity` responses
    pub fn spawn(capacity: usize, owner: Recipient<IngestResponse>) -> (ResponseHandler, Self) {
        let (queue, mut receiver) = mpsc::channel::<Message>(capacity.max(1));

        let handle = tokio::spawn(async move {
            while let Some(msg) = receiver.recv().await {
                let parsed = match tokio::task::spawn_blocking(move || parse_response(&msg)).await {
                    Ok(parsed) => parsed,
                    Err(e) => {
                        log::error!("Response parse task failed {e:}");
                        continue;
                    }
                };

                let ingest = match parsed {
                    Ok(ingest) => ingest,
                    Err(e) => {
                        log::warn!("{e:}, dropping message");
                        continue;
                    }
                };

                if !owner.connected() {
                    log::warn!("Owner gone, response worker exiting");
                    break;
                }
                log::trace!(
                    "Handing {} batches from {} to owner",
                    ingest.batches.len(),
                    ingest.source_peer
                );
                owner.do_send(ingest);
            }
            log::debug!("Response worker closing");
        });

        (ResponseHandler { queue }, Self { handle })
    }
}

impl Drop for ResponseWorker {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
