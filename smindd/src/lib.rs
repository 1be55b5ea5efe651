//! Hub daemon of the sensor-minder system: drives a [`smind_broker::Hub`]
//! from configuration, requests the configured sensors from each paired
//! device and keeps a rolling summary of what is streaming in

pub mod event;
pub mod minder;

use smind_broker::{ConfigError, TransportError};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SensorMinderError {
    #[error("I/O Error")]
    Io(#[from] std::io::Error),
    #[error("Config Error {0}")]
    Config(#[from] ConfigError),
    #[error("Transport Error {0}")]
    Transport(#[from] TransportError),
    #[error("Hub mailbox Error {0}")]
    Mailbox(#[from] actix::MailboxError),
    #[error("Event Handling Error")]
    EventError,
}
