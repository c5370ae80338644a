//! Explicit lifecycle of a single-shot exchange.
//!
//! ```text
//! Idle → Connecting → Connected → LinkOpening → LinkOpen
//!   → (Sender: Sending → Settling) | (Receiver: Waiting → Accepting)
//!   → Closing → Closed
//! ```
//!
//! `Connecting` and `LinkOpening` fall back to `Reconnecting` on connection-level
//! failures; any active state may fail, and every state except `Closing` and
//! `Closed` may begin closing.

use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Sender,
    Receiver,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Sender => write!(f, "sender"),
            Role::Receiver => write!(f, "receiver"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Reconnecting,
    Connected,
    LinkOpening,
    LinkOpen,
    Sending,
    Settling,
    Waiting,
    Accepting,
    Failed,
    Closing,
    Closed,
}

impl SessionState {
    /// No further transitions are possible once closed.
    pub fn is_terminal(self) -> bool {
        self == SessionState::Closed
    }

    /// Next state for `event`, or `None` when the event is illegal here.
    pub fn on(self, role: Role, event: SessionEvent) -> Option<SessionState> {
        use SessionEvent as E;
        use SessionState as S;

        match (self, event) {
            (S::Idle | S::Reconnecting, E::StartConnect) => Some(S::Connecting),
            (S::Connecting, E::ConnectionOpened) => Some(S::Connected),
            (S::Connecting | S::LinkOpening, E::ConnectionFailed) => Some(S::Reconnecting),
            (S::Reconnecting, E::GiveUp) => Some(S::Failed),
            (S::Connected, E::OpenLink) => Some(S::LinkOpening),
            (S::LinkOpening, E::LinkOpened) => Some(S::LinkOpen),
            (S::LinkOpen, E::StartSend) if role == Role::Sender => Some(S::Sending),
            (S::LinkOpen, E::StartWait) if role == Role::Receiver => Some(S::Waiting),
            (S::Sending, E::DeliveryAccepted) => Some(S::Settling),
            (S::Sending, E::DeliveryRejected) => Some(S::Failed),
            (S::Waiting, E::MessageArrived) => Some(S::Accepting),
            (
                S::Connected | S::LinkOpen | S::Sending | S::Waiting | S::Settling | S::Accepting,
                E::Disconnected,
            ) => Some(S::Failed),
            (S::Closing | S::Closed | S::Failed, E::Fail) => None,
            (_, E::Fail) => Some(S::Failed),
            (S::Closing | S::Closed, E::BeginClose | E::Cancel) => None,
            (_, E::BeginClose | E::Cancel) => Some(S::Closing),
            (S::Closing, E::Closed) => Some(S::Closed),
            _ => None,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// The closed set of events that drive [`SessionState`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionEvent {
    StartConnect,
    ConnectionOpened,
    ConnectionFailed,
    GiveUp,
    OpenLink,
    LinkOpened,
    StartSend,
    StartWait,
    MessageArrived,
    DeliveryAccepted,
    DeliveryRejected,
    Disconnected,
    Fail,
    Cancel,
    BeginClose,
    Closed,
}

impl SessionEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionEvent::StartConnect => "connect",
            SessionEvent::ConnectionOpened => "complete connection",
            SessionEvent::ConnectionFailed => "handle connection failure",
            SessionEvent::GiveUp => "give up reconnecting",
            SessionEvent::OpenLink => "open link",
            SessionEvent::LinkOpened => "complete link",
            SessionEvent::StartSend => "send",
            SessionEvent::StartWait => "receive",
            SessionEvent::MessageArrived => "accept arrival",
            SessionEvent::DeliveryAccepted => "settle accepted delivery",
            SessionEvent::DeliveryRejected => "settle rejected delivery",
            SessionEvent::Disconnected => "handle disconnect",
            SessionEvent::Fail => "fail",
            SessionEvent::Cancel => "cancel",
            SessionEvent::BeginClose => "close",
            SessionEvent::Closed => "finish closing",
        }
    }
}
