// src/exchange/errors.rs

use std::time::Duration;
use thiserror::Error;
use tokio::time::error::Elapsed;

use super::state::SessionState;

/// Failures reported by the AMQP transport collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("AMQP connection error: {0}")]
    Connect(String),

    #[error("AMQP link error: {0}")]
    Link(String),

    #[error("AMQP delivery error: {0}")]
    Delivery(String),

    #[error("AMQP close error: {0}")]
    Close(String),
}

impl TransportError {
    /// Connection-level failures are the only ones covered by the reconnect budget.
    pub fn is_connection_level(&self) -> bool {
        matches!(self, TransportError::Connect(_) | TransportError::Link(_))
    }
}

impl From<Elapsed> for TransportError {
    fn from(_: Elapsed) -> Self {
        TransportError::Connect("Connection timed out".to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExchangeError {
    #[error("Failed to connect after {attempts} attempt(s): {last_error}")]
    ConnectionExhausted {
        attempts: u32,
        last_error: TransportError,
    },

    #[error("Message was rejected by the broker: {0}")]
    ProtocolRejected(String),

    #[error("No message received within {0:?}")]
    Timeout(Duration),

    #[error("Cannot {operation} while session is {state}")]
    InvalidState {
        state: SessionState,
        operation: &'static str,
    },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

// Custom Result type for exchange operations
pub type Result<T> = std::result::Result<T, ExchangeError>;
