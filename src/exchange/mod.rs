// src/exchange/mod.rs
// Single-message exchange over AMQP 1.0

pub mod backoff;
pub mod errors;
pub mod fe2o3;
pub mod session;
pub mod state;
pub mod transport;

use std::time::Duration;

pub use backoff::ReconnectPolicy;
pub use errors::{ExchangeError, Result, TransportError};
pub use fe2o3::Fe2o3Transport;
pub use session::ExchangeSession;
pub use state::{Role, SessionEvent, SessionState};
pub use transport::{AmqpTransport, DeliveryOutcome};

use crate::config::ConnectionConfig;
use crate::message::{Ack, DestinationRef, Message};

/// Connects, sends `message` once, waits for the broker's verdict and closes.
pub async fn send(
    config: &ConnectionConfig,
    destination: &DestinationRef,
    message: Message,
) -> Result<Ack> {
    let mut session = ExchangeSession::new(
        config.clone(),
        destination.clone(),
        Role::Sender,
        Fe2o3Transport::new(),
    )?;
    session.send(message).await
}

/// Connects, waits for one message (optionally bounded by `receive_timeout`),
/// accepts it and closes.
pub async fn receive(
    config: &ConnectionConfig,
    destination: &DestinationRef,
    receive_timeout: Option<Duration>,
) -> Result<Message> {
    let mut session = ExchangeSession::new(
        config.clone(),
        destination.clone(),
        Role::Receiver,
        Fe2o3Transport::new(),
    )?
    .with_receive_timeout(receive_timeout);
    session.receive().await
}
