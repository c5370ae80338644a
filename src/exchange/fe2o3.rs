// src/exchange/fe2o3.rs
// AMQP 1.0 transport backed by fe2o3-amqp

use async_trait::async_trait;
use fe2o3_amqp::{
    connection::ConnectionHandle,
    link::receiver::CreditMode,
    sasl_profile::SaslProfile,
    session::SessionHandle,
    types::{
        messaging::{
            AmqpValue, Body, Header, Message as AmqpMessage, Outcome, Priority, Source, Target,
            TerminusDurability, TerminusExpiryPolicy,
        },
        primitives::{Binary, Value},
    },
    Connection, Delivery, Receiver, Sender, Session,
};
use tokio::time::timeout;
use tracing::{debug, warn};
use uuid::Uuid;

use super::errors::TransportError;
use super::state::Role;
use super::transport::{AmqpTransport, DeliveryOutcome};
use crate::config::ConnectionConfig;
use crate::message::{DestinationRef, DurabilityMode, Message};

const CONTAINER_PREFIX: &str = "amqp-exchange";

enum Link {
    Sender(Sender),
    Receiver(Receiver),
}

/// One connection, one session and at most one link.
#[derive(Default)]
pub struct Fe2o3Transport {
    connection: Option<ConnectionHandle<()>>,
    session: Option<SessionHandle<()>>,
    link: Option<Link>,
    last_delivery: Option<Delivery<Body<Value>>>,
}

impl Fe2o3Transport {
    pub fn new() -> Self {
        Self::default()
    }
}

fn terminus_durability(durable: bool) -> TerminusDurability {
    if durable {
        TerminusDurability::UnsettledState
    } else {
        TerminusDurability::None
    }
}

fn to_amqp_message(message: &Message) -> AmqpMessage<AmqpValue<Value>> {
    let value = match message.body_text() {
        Some(text) => Value::String(text.to_string()),
        None => Value::Binary(Binary::from(message.body().to_vec())),
    };

    let mut header = Header {
        durable: message.durability().is_durable(),
        ..Default::default()
    };
    if let Some(priority) = message.priority() {
        header.priority = Priority(priority);
    }

    AmqpMessage::builder().header(header).value(value).build()
}

/// Maps the body sections this client exchanges to raw bytes.
///
/// Sequence sections and non-string/binary values have no byte form and are
/// reported instead of being re-encoded.
fn body_bytes(body: &Body<Value>) -> Result<Vec<u8>, TransportError> {
    match body {
        Body::Value(AmqpValue(Value::String(text))) => Ok(text.as_bytes().to_vec()),
        Body::Value(AmqpValue(Value::Binary(bytes))) => Ok(bytes.to_vec()),
        Body::Value(AmqpValue(Value::Null)) | Body::Empty => Ok(Vec::new()),
        Body::Data(batch) => Ok(batch
            .iter()
            .flat_map(|data| data.0.iter().copied())
            .collect()),
        Body::Value(AmqpValue(other)) => Err(TransportError::Delivery(format!(
            "unsupported amqp-value body: {:?}",
            other
        ))),
        _ => Err(TransportError::Delivery(
            "unsupported body section".to_string(),
        )),
    }
}

fn from_delivery(delivery: &Delivery<Body<Value>>) -> Result<Message, TransportError> {
    let mut message = Message::new(body_bytes(delivery.body())?);
    if let Some(header) = delivery.message().header.as_ref() {
        let durability = if header.durable {
            DurabilityMode::UnsettledState
        } else {
            DurabilityMode::None
        };
        message = message
            .with_durability(durability)
            .with_priority(header.priority.0);
    }
    Ok(message)
}

#[async_trait]
impl AmqpTransport for Fe2o3Transport {
    async fn connect(&mut self, config: &ConnectionConfig) -> Result<(), TransportError> {
        if self.connection.is_some() {
            debug!("Discarding previous connection before reconnecting");
            if let Err(e) = self.close().await {
                debug!(error = %e, "Error discarding previous connection");
            }
        }

        let container_id = format!("{}-{}", CONTAINER_PREFIX, Uuid::new_v4());
        let url = config.broker_url();
        let idle_time_out = u32::try_from(config.connection_timeout_ms).unwrap_or(u32::MAX);

        let mut builder = Connection::builder()
            .container_id(container_id)
            .idle_time_out(idle_time_out)
            .sasl_profile(SaslProfile::Plain {
                username: config.username.clone(),
                password: config.password.clone(),
            });
        if let Some(vhost) = config.virtual_host() {
            builder = builder.hostname(vhost);
        }

        let mut connection = timeout(config.connection_timeout(), builder.open(url.as_str()))
            .await?
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        match Session::begin(&mut connection).await {
            Ok(session) => {
                self.session = Some(session);
                self.connection = Some(connection);
                Ok(())
            }
            Err(e) => {
                if let Err(close_err) = connection.close().await {
                    debug!(error = %close_err, "Error closing connection after failed begin");
                }
                Err(TransportError::Connect(format!("Failed to begin session: {}", e)))
            }
        }
    }

    async fn open_link(
        &mut self,
        role: Role,
        destination: &DestinationRef,
    ) -> Result<(), TransportError> {
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| TransportError::Link("No active session".to_string()))?;
        let link_name = format!("{}-{}-{}", CONTAINER_PREFIX, role, Uuid::new_v4());
        let durability = terminus_durability(destination.is_durable());

        let link = match role {
            Role::Sender => {
                let target = Target::builder()
                    .address(destination.address())
                    .durable(durability)
                    .expiry_policy(TerminusExpiryPolicy::Never)
                    .build();
                let sender = Sender::builder()
                    .name(link_name)
                    .target(target)
                    .attach(session)
                    .await
                    .map_err(|e| TransportError::Link(e.to_string()))?;
                Link::Sender(sender)
            }
            Role::Receiver => {
                let source = Source::builder()
                    .address(destination.address())
                    .durable(durability)
                    .expiry_policy(TerminusExpiryPolicy::Never)
                    .build();
                let receiver = Receiver::builder()
                    .name(link_name)
                    .source(source)
                    .credit_mode(CreditMode::Auto(1))
                    .attach(session)
                    .await
                    .map_err(|e| TransportError::Link(e.to_string()))?;
                Link::Receiver(receiver)
            }
        };

        self.link = Some(link);
        Ok(())
    }

    async fn send(&mut self, message: &Message) -> Result<DeliveryOutcome, TransportError> {
        let Some(Link::Sender(sender)) = self.link.as_mut() else {
            return Err(TransportError::Link("No sending link open".to_string()));
        };

        let outcome = sender
            .send(to_amqp_message(message))
            .await
            .map_err(|e| TransportError::Delivery(e.to_string()))?;

        Ok(match outcome {
            Outcome::Accepted(_) => DeliveryOutcome::Accepted,
            Outcome::Rejected(rejected) => DeliveryOutcome::Rejected(format!("{:?}", rejected)),
            other => DeliveryOutcome::Rejected(format!("unexpected outcome {:?}", other)),
        })
    }

    async fn receive(&mut self) -> Result<Message, TransportError> {
        let Some(Link::Receiver(receiver)) = self.link.as_mut() else {
            return Err(TransportError::Link("No receiving link open".to_string()));
        };

        let delivery: Delivery<Body<Value>> = receiver
            .recv()
            .await
            .map_err(|e| TransportError::Delivery(e.to_string()))?;

        let message = from_delivery(&delivery)?;
        self.last_delivery = Some(delivery);
        Ok(message)
    }

    async fn accept(&mut self) -> Result<(), TransportError> {
        let delivery = self
            .last_delivery
            .take()
            .ok_or_else(|| TransportError::Delivery("No delivery to accept".to_string()))?;
        let Some(Link::Receiver(receiver)) = self.link.as_mut() else {
            return Err(TransportError::Link("No receiving link open".to_string()));
        };

        receiver
            .accept(&delivery)
            .await
            .map_err(|e| TransportError::Delivery(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.last_delivery = None;
        let mut failures = Vec::new();

        match self.link.take() {
            Some(Link::Sender(mut sender)) => {
                if let Err(e) = sender.close().await {
                    failures.push(format!("sender: {}", e));
                }
            }
            Some(Link::Receiver(mut receiver)) => {
                if let Err(e) = receiver.close().await {
                    failures.push(format!("receiver: {}", e));
                }
            }
            None => {}
        }

        if let Some(mut session) = self.session.take() {
            if let Err(e) = session.end().await {
                failures.push(format!("session: {}", e));
            }
        }

        if let Some(mut connection) = self.connection.take() {
            if let Err(e) = connection.close().await {
                failures.push(format!("connection: {}", e));
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            warn!(failures = ?failures, "AMQP resources did not close cleanly");
            Err(TransportError::Close(failures.join("; ")))
        }
    }
}
