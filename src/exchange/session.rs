use std::future::Future;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

use super::backoff::ReconnectPolicy;
use super::errors::{ExchangeError, Result, TransportError};
use super::state::{Role, SessionEvent, SessionState};
use super::transport::{AmqpTransport, DeliveryOutcome};
use crate::config::ConnectionConfig;
use crate::message::{Ack, DestinationRef, Message};

pub const DEFAULT_DRAIN_DELAY_MS: u64 = 2000;

/// Drives one connection and one link through exactly one send or receive.
///
/// A session is single-use: after `send`/`receive` returns, successfully or
/// not, the link and connection have been closed and further calls fail with
/// [`ExchangeError::InvalidState`].
pub struct ExchangeSession<T: AmqpTransport> {
    config: ConnectionConfig,
    destination: DestinationRef,
    role: Role,
    state: SessionState,
    attempt_count: u32,
    pending_outcome: Option<Message>,
    policy: ReconnectPolicy,
    drain_delay: Duration,
    receive_timeout: Option<Duration>,
    cancel: Option<oneshot::Receiver<()>>,
    settled: bool,
    transport: T,
}

enum Raced<R> {
    Done(R),
    Cancelled,
    SignalDropped,
}

/// Runs `fut` unless the cancel signal fires first.
///
/// A dropped cancel sender disarms cancellation instead of triggering it.
async fn until_cancelled<F: Future>(
    cancel: &mut Option<oneshot::Receiver<()>>,
    fut: F,
) -> Option<F::Output> {
    let Some(signal) = cancel.as_mut() else {
        return Some(fut.await);
    };

    tokio::pin!(fut);
    let raced = tokio::select! {
        biased;
        fired = signal => match fired {
            Ok(()) => Raced::Cancelled,
            Err(_) => Raced::SignalDropped,
        },
        out = &mut fut => Raced::Done(out),
    };

    match raced {
        Raced::Done(out) => Some(out),
        Raced::Cancelled => {
            *cancel = None;
            None
        }
        Raced::SignalDropped => {
            *cancel = None;
            Some(fut.await)
        }
    }
}

impl<T: AmqpTransport> ExchangeSession<T> {
    pub fn new(
        config: ConnectionConfig,
        destination: DestinationRef,
        role: Role,
        transport: T,
    ) -> Result<Self> {
        config.validate()?;
        Ok(ExchangeSession {
            config,
            destination,
            role,
            state: SessionState::Idle,
            attempt_count: 0,
            pending_outcome: None,
            policy: ReconnectPolicy::default(),
            drain_delay: Duration::from_millis(DEFAULT_DRAIN_DELAY_MS),
            receive_timeout: None,
            cancel: None,
            settled: false,
            transport,
        })
    }

    pub fn with_reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_drain_delay(mut self, drain_delay: Duration) -> Self {
        self.drain_delay = drain_delay;
        self
    }

    /// Without a timeout, `receive` waits indefinitely.
    pub fn with_receive_timeout(mut self, receive_timeout: Option<Duration>) -> Self {
        self.receive_timeout = receive_timeout;
        self
    }

    /// Firing `signal` aborts whatever the session is waiting on and closes it.
    pub fn with_cancellation(mut self, signal: oneshot::Receiver<()>) -> Self {
        self.cancel = Some(signal);
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    pub fn destination(&self) -> &DestinationRef {
        &self.destination
    }

    /// The message that was sent or received, once the exchange succeeded.
    pub fn pending_outcome(&self) -> Option<&Message> {
        self.pending_outcome.as_ref()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Establishes the connection only, retrying with backoff.
    ///
    /// On failure the session is closed before the error is returned.
    pub async fn connect(&mut self) -> Result<()> {
        if self.state != SessionState::Idle {
            return Err(self.invalid("connect"));
        }
        let result = self.establish().await;
        match result {
            Ok(()) => Ok(()),
            Err(err) => self.finish(Err(err)).await,
        }
    }

    pub async fn send(&mut self, message: Message) -> Result<Ack> {
        self.ensure_ready(Role::Sender, "send")?;
        let result = self.exchange_outbound(message).await;
        self.finish(result).await
    }

    pub async fn receive(&mut self) -> Result<Message> {
        self.ensure_ready(Role::Receiver, "receive")?;
        let result = self.exchange_inbound().await;
        self.finish(result).await
    }

    /// Releases the link and connection. Closing a closed session is a no-op.
    pub async fn close(&mut self) {
        match self.state {
            state if state.is_terminal() => {
                debug!("Session already closed");
                return;
            }
            SessionState::Closing => {}
            _ => {
                let _ = self.apply(SessionEvent::BeginClose);
            }
        }

        info!(destination = %self.destination, "Closing connection");
        if let Err(e) = self.transport.close().await {
            warn!(error = %e, "Error while closing connection");
        }
        let _ = self.apply(SessionEvent::Closed);
        info!("Connection closed.");
    }

    fn ensure_ready(&self, role: Role, operation: &'static str) -> Result<()> {
        let startable = matches!(self.state, SessionState::Idle | SessionState::Connected);
        if self.role != role || !startable {
            return Err(self.invalid(operation));
        }
        Ok(())
    }

    fn invalid(&self, operation: &'static str) -> ExchangeError {
        ExchangeError::InvalidState {
            state: self.state,
            operation,
        }
    }

    fn apply(&mut self, event: SessionEvent) -> Result<()> {
        let next = self
            .state
            .on(self.role, event)
            .ok_or_else(|| self.invalid(event.as_str()))?;
        info!(from = %self.state, to = %next, event = ?event, "State transition");
        self.state = next;
        Ok(())
    }

    fn cancelled<R>(&mut self) -> Result<R> {
        warn!(state = %self.state, "Cancellation requested");
        self.apply(SessionEvent::Cancel)?;
        Err(ExchangeError::Cancelled)
    }

    async fn establish(&mut self) -> Result<()> {
        let max_attempts = self.config.max_connection_attempts;

        loop {
            self.apply(SessionEvent::StartConnect)?;
            self.attempt_count += 1;
            info!(
                attempt = self.attempt_count,
                max_attempts,
                url = %self.config.broker_url(),
                "Connecting to broker"
            );

            let attempt = until_cancelled(&mut self.cancel, self.transport.connect(&self.config)).await;
            let error = match attempt {
                None => return self.cancelled(),
                Some(Ok(())) => {
                    self.apply(SessionEvent::ConnectionOpened)?;
                    info!(
                        host = %self.config.host,
                        port = self.config.port,
                        "Successfully connected"
                    );
                    return Ok(());
                }
                Some(Err(err)) if err.is_connection_level() => err,
                Some(Err(err)) => {
                    self.apply(SessionEvent::Fail)?;
                    return Err(err.into());
                }
            };

            self.apply(SessionEvent::ConnectionFailed)?;
            self.back_off(error).await?;
        }
    }

    async fn back_off(&mut self, last_error: TransportError) -> Result<()> {
        let max_attempts = self.config.max_connection_attempts;
        if self.attempt_count >= max_attempts {
            error!(
                attempts = self.attempt_count,
                error = %last_error,
                "Max connection attempts reached. Giving up."
            );
            self.apply(SessionEvent::GiveUp)?;
            return Err(ExchangeError::ConnectionExhausted {
                attempts: self.attempt_count,
                last_error,
            });
        }

        let delay = self.policy.delay_for(self.attempt_count);
        warn!(
            error = %last_error,
            "Connection attempt {}/{} failed. Retrying in {}ms...",
            self.attempt_count,
            max_attempts,
            delay.as_millis()
        );
        if until_cancelled(&mut self.cancel, sleep(delay)).await.is_none() {
            return self.cancelled();
        }
        Ok(())
    }

    async fn open_link(&mut self) -> Result<()> {
        loop {
            if self.state != SessionState::Connected {
                self.establish().await?;
            }

            self.apply(SessionEvent::OpenLink)?;
            let opened = until_cancelled(
                &mut self.cancel,
                self.transport.open_link(self.role, &self.destination),
            )
            .await;

            match opened {
                None => return self.cancelled(),
                Some(Ok(())) => {
                    self.apply(SessionEvent::LinkOpened)?;
                    info!(role = %self.role, destination = %self.destination, "Link opened");
                    return Ok(());
                }
                Some(Err(err)) if err.is_connection_level() => {
                    self.apply(SessionEvent::ConnectionFailed)?;
                    // Drop the half-open connection before trying again.
                    if let Err(e) = self.transport.close().await {
                        debug!(error = %e, "Error discarding failed connection");
                    }
                    self.back_off(err).await?;
                }
                Some(Err(err)) => {
                    self.apply(SessionEvent::Fail)?;
                    return Err(err.into());
                }
            }
        }
    }

    async fn exchange_outbound(&mut self, message: Message) -> Result<Ack> {
        self.open_link().await?;
        self.apply(SessionEvent::StartSend)?;
        info!(destination = %self.destination, "Sending message '{}'...", message);

        let sent = until_cancelled(&mut self.cancel, self.transport.send(&message)).await;
        let outcome = match sent {
            None => return self.cancelled(),
            Some(Ok(outcome)) => outcome,
            Some(Err(err)) => {
                self.apply(SessionEvent::Disconnected)?;
                return Err(err.into());
            }
        };

        match outcome {
            DeliveryOutcome::Accepted => {
                self.apply(SessionEvent::DeliveryAccepted)?;
                info!("Message accepted by the broker");
                self.pending_outcome = Some(message);
                Ok(Ack::new(&self.destination, self.attempt_count))
            }
            DeliveryOutcome::Rejected(reason) => {
                self.apply(SessionEvent::DeliveryRejected)?;
                Err(ExchangeError::ProtocolRejected(reason))
            }
        }
    }

    async fn exchange_inbound(&mut self) -> Result<Message> {
        self.open_link().await?;
        self.apply(SessionEvent::StartWait)?;
        info!(destination = %self.destination, "Waiting for messages...");

        let limit = self.receive_timeout;
        let transport = &mut self.transport;
        let wait = async move {
            match limit {
                Some(limit) => match timeout(limit, transport.receive()).await {
                    Ok(received) => received.map_err(ExchangeError::from),
                    Err(_) => Err(ExchangeError::Timeout(limit)),
                },
                None => transport.receive().await.map_err(ExchangeError::from),
            }
        };

        let message = match until_cancelled(&mut self.cancel, wait).await {
            None => return self.cancelled(),
            Some(Ok(message)) => message,
            Some(Err(err @ ExchangeError::Timeout(_))) => {
                self.apply(SessionEvent::Fail)?;
                return Err(err);
            }
            Some(Err(err)) => {
                self.apply(SessionEvent::Disconnected)?;
                return Err(err);
            }
        };

        self.apply(SessionEvent::MessageArrived)?;
        info!("Received message: '{}'.", message);
        self.accept_delivery().await?;
        self.pending_outcome = Some(message.clone());
        Ok(message)
    }

    async fn accept_delivery(&mut self) -> Result<()> {
        if self.state != SessionState::Accepting || self.settled {
            return Err(self.invalid("accept"));
        }
        self.transport.accept().await?;
        self.settled = true;
        debug!("Delivery accepted and settled");
        Ok(())
    }

    /// Every exit path ends here: drain on success, then close exactly once.
    ///
    /// Cancelling during the drain cuts it short. The delivery is already
    /// settled by then, so the result stays `Ok`.
    async fn finish<R>(&mut self, result: Result<R>) -> Result<R> {
        match &result {
            Ok(_) => {
                debug!(drain_ms = self.drain_delay.as_millis() as u64, "Draining before close");
                if until_cancelled(&mut self.cancel, sleep(self.drain_delay)).await.is_none() {
                    warn!(state = %self.state, "Cancellation requested during drain");
                    let _ = self.apply(SessionEvent::Cancel);
                }
            }
            Err(ExchangeError::Cancelled) => {}
            Err(err) => {
                error!(error = %err, state = %self.state, "Exchange failed");
                if !matches!(
                    self.state,
                    SessionState::Failed | SessionState::Closing | SessionState::Closed
                ) {
                    let _ = self.apply(SessionEvent::Fail);
                }
            }
        }

        self.close().await;
        if result.is_ok() {
            info!("Finished.");
        }
        result
    }
}
