// src/exchange/transport.rs

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use super::errors::TransportError;
use super::state::Role;
use crate::config::ConnectionConfig;
use crate::message::{DestinationRef, Message};

/// Broker verdict on a transmitted delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Accepted,
    Rejected(String),
}

/// The AMQP client the session drives.
///
/// Implementations own the wire protocol; the session only sequences these
/// calls. `close` must tolerate being called when nothing is open.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait AmqpTransport: Send {
    async fn connect(&mut self, config: &ConnectionConfig) -> Result<(), TransportError>;

    async fn open_link(
        &mut self,
        role: Role,
        destination: &DestinationRef,
    ) -> Result<(), TransportError>;

    async fn send(&mut self, message: &Message) -> Result<DeliveryOutcome, TransportError>;

    /// Resolves once one inbound message has arrived on the receiving link.
    async fn receive(&mut self) -> Result<Message, TransportError>;

    /// Accepts and settles the last received delivery.
    async fn accept(&mut self) -> Result<(), TransportError>;

    async fn close(&mut self) -> Result<(), TransportError>;
}
