// In-memory broker shared by the integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

use amqp_exchange::config::ConnectionConfig;
use amqp_exchange::exchange::{AmqpTransport, DeliveryOutcome, Role, TransportError};
use amqp_exchange::message::{DestinationRef, Message};

#[derive(Default)]
struct BrokerState {
    queues: HashMap<String, VecDeque<Message>>,
    refuse_connections: u32,
    reject_reason: Option<String>,
    connect_attempts: u32,
    sends: u32,
    accepts: u32,
    close_calls: u32,
}

#[derive(Clone, Default)]
pub struct FakeBroker {
    state: Arc<Mutex<BrokerState>>,
    arrivals: Arc<Notify>,
}

impl FakeBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse the first `count` connection attempts.
    pub fn refuse_first(&self, count: u32) {
        self.state.lock().unwrap().refuse_connections = count;
    }

    pub fn reject_sends(&self, reason: &str) {
        self.state.lock().unwrap().reject_reason = Some(reason.to_string());
    }

    pub fn publish(&self, address: &str, message: Message) {
        self.state
            .lock()
            .unwrap()
            .queues
            .entry(address.to_string())
            .or_default()
            .push_back(message);
        self.arrivals.notify_one();
    }

    pub fn depth(&self, address: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .queues
            .get(address)
            .map_or(0, |queue| queue.len())
    }

    pub fn connect_attempts(&self) -> u32 {
        self.state.lock().unwrap().connect_attempts
    }

    pub fn sends(&self) -> u32 {
        self.state.lock().unwrap().sends
    }

    pub fn accepts(&self) -> u32 {
        self.state.lock().unwrap().accepts
    }

    pub fn close_calls(&self) -> u32 {
        self.state.lock().unwrap().close_calls
    }

    pub fn transport(&self) -> FakeTransport {
        FakeTransport {
            broker: self.clone(),
            connected: false,
            link: None,
            inflight: None,
        }
    }

    fn take(&self, address: &str) -> Option<Message> {
        self.state
            .lock()
            .unwrap()
            .queues
            .get_mut(address)
            .and_then(|queue| queue.pop_front())
    }

    fn release(&self, address: &str, message: Message) {
        self.state
            .lock()
            .unwrap()
            .queues
            .entry(address.to_string())
            .or_default()
            .push_front(message);
    }
}

pub struct FakeTransport {
    broker: FakeBroker,
    connected: bool,
    link: Option<(Role, String)>,
    inflight: Option<Message>,
}

impl FakeTransport {
    fn link_address(&self, role: Role) -> Result<String, TransportError> {
        match &self.link {
            Some((link_role, address)) if *link_role == role => Ok(address.clone()),
            _ => Err(TransportError::Link(format!("no {} link open", role))),
        }
    }
}

#[async_trait]
impl AmqpTransport for FakeTransport {
    async fn connect(&mut self, _config: &ConnectionConfig) -> Result<(), TransportError> {
        let mut state = self.broker.state.lock().unwrap();
        state.connect_attempts += 1;
        if state.connect_attempts <= state.refuse_connections {
            return Err(TransportError::Connect("connection refused".to_string()));
        }
        self.connected = true;
        Ok(())
    }

    async fn open_link(
        &mut self,
        role: Role,
        destination: &DestinationRef,
    ) -> Result<(), TransportError> {
        if !self.connected {
            return Err(TransportError::Link("not connected".to_string()));
        }
        self.link = Some((role, destination.address().to_string()));
        Ok(())
    }

    async fn send(&mut self, message: &Message) -> Result<DeliveryOutcome, TransportError> {
        let address = self.link_address(Role::Sender)?;
        let rejection = {
            let mut state = self.broker.state.lock().unwrap();
            state.sends += 1;
            state.reject_reason.clone()
        };
        if let Some(reason) = rejection {
            return Ok(DeliveryOutcome::Rejected(reason));
        }
        self.broker.publish(&address, message.clone());
        Ok(DeliveryOutcome::Accepted)
    }

    async fn receive(&mut self) -> Result<Message, TransportError> {
        let address = self.link_address(Role::Receiver)?;
        loop {
            if let Some(message) = self.broker.take(&address) {
                self.inflight = Some(message.clone());
                return Ok(message);
            }
            self.broker.arrivals.notified().await;
        }
    }

    async fn accept(&mut self) -> Result<(), TransportError> {
        match self.inflight.take() {
            Some(_) => {
                self.broker.state.lock().unwrap().accepts += 1;
                Ok(())
            }
            None => Err(TransportError::Delivery("nothing to accept".to_string())),
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.broker.state.lock().unwrap().close_calls += 1;
        if let (Some(message), Some((_, address))) = (self.inflight.take(), &self.link) {
            self.broker.release(address, message);
        }
        self.link = None;
        self.connected = false;
        Ok(())
    }
}
