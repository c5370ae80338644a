//! Reliable single-message exchange with an AMQP 1.0 broker.
//!
//! Each call connects, sends or receives exactly one message, settles it and
//! closes again. Connection establishment is retried with exponential backoff;
//! the delivery itself is attempted at most once.

pub mod config;
pub mod env;
pub mod exchange;
pub mod message;

pub use config::ConnectionConfig;
pub use exchange::{receive, send, ExchangeError, ExchangeSession, Role, SessionState};
pub use message::{Ack, DestinationKind, DestinationRef, DurabilityMode, Message};
