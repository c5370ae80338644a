use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

use crate::exchange::errors::{ExchangeError, Result};

/// Terminus/message durability requested from the broker.
///
/// The numeric codes follow the AMQP 1.0 `terminus-durability` values.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DurabilityMode {
    None,
    Configuration,
    #[default]
    UnsettledState,
}

impl DurabilityMode {
    pub fn code(self) -> u32 {
        match self {
            DurabilityMode::None => 0,
            DurabilityMode::Configuration => 1,
            DurabilityMode::UnsettledState => 2,
        }
    }

    /// Whether the message header should carry `durable = true`.
    pub fn is_durable(self) -> bool {
        self != DurabilityMode::None
    }
}

impl FromStr for DurabilityMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "0" | "none" => Ok(DurabilityMode::None),
            "1" | "configuration" => Ok(DurabilityMode::Configuration),
            "2" | "unsettled-state" | "unsettled_state" => Ok(DurabilityMode::UnsettledState),
            other => Err(format!("unknown durability mode '{}'", other)),
        }
    }
}

/// A single message crossing the link. Never mutated once built.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    body: Vec<u8>,
    durability: DurabilityMode,
    priority: Option<u8>,
}

impl Message {
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        Message {
            body: body.into(),
            durability: DurabilityMode::default(),
            priority: None,
        }
    }

    pub fn with_durability(mut self, durability: DurabilityMode) -> Self {
        self.durability = durability;
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// The body as text, if it is valid UTF-8.
    pub fn body_text(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }

    pub fn durability(&self) -> DurabilityMode {
        self.durability
    }

    pub fn priority(&self) -> Option<u8> {
        self.priority
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.body_text() {
            Some(text) => write!(f, "{}", text),
            None => write!(f, "<{} bytes of binary data>", self.body.len()),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DestinationKind {
    Queue,
    Topic,
}

impl fmt::Display for DestinationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DestinationKind::Queue => write!(f, "queue"),
            DestinationKind::Topic => write!(f, "topic"),
        }
    }
}

/// Names the AMQP source/target address a link is attached to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DestinationRef {
    name: String,
    kind: DestinationKind,
    durable: bool,
}

impl DestinationRef {
    /// Queues default to a durable terminus, topics do not.
    pub fn new(name: impl Into<String>, kind: DestinationKind) -> Result<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(ExchangeError::InvalidConfig(format!(
                "{} name cannot be empty",
                kind
            )));
        }

        Ok(DestinationRef {
            name,
            durable: kind == DestinationKind::Queue,
            kind,
        })
    }

    pub fn queue(name: impl Into<String>) -> Result<Self> {
        Self::new(name, DestinationKind::Queue)
    }

    pub fn topic(name: impl Into<String>) -> Result<Self> {
        Self::new(name, DestinationKind::Topic)
    }

    pub fn with_durable(mut self, durable: bool) -> Self {
        self.durable = durable;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The address used verbatim on the link; no subject prefix is added.
    pub fn address(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> DestinationKind {
        self.kind
    }

    pub fn is_durable(&self) -> bool {
        self.durable
    }
}

impl fmt::Display for DestinationRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} '{}'", self.kind, self.name)
    }
}

/// Broker acknowledgment of an accepted send.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Ack {
    pub destination: String,
    pub timestamp: DateTime<Utc>,
    pub attempts: u32,
}

impl Ack {
    pub fn new(destination: &DestinationRef, attempts: u32) -> Self {
        Ack {
            destination: destination.address().to_string(),
            timestamp: Utc::now(),
            attempts,
        }
    }
}
