//! Abstract characteristic-operation capability consumed by sessions.
//!
//! A transport provider owns the radio. Sessions drive it through the
//! fire-and-forget [`TransportLink`] methods and observe every outcome as a
//! [`LinkEvent`] on a single channel, so each session processes its whole
//! protocol in one place.

use crate::error::TransportFailure;
use tokio::sync::mpsc;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    WriteCharacteristic,
    WriteDescriptor,
    ReadCharacteristic,
}

/// A queued half-duplex request. Issuing one performs exactly one transport
/// call; the matching [`LinkEvent::Completed`] ends it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingOperation {
    WriteCharacteristic { characteristic: Uuid, value: Vec<u8> },
    /// Write to the client configuration descriptor of a characteristic.
    WriteDescriptor { characteristic: Uuid, value: Vec<u8> },
    ReadCharacteristic { characteristic: Uuid },
}

impl PendingOperation {
    pub fn kind(&self) -> OpKind {
        match self {
            Self::WriteCharacteristic { .. } => OpKind::WriteCharacteristic,
            Self::WriteDescriptor { .. } => OpKind::WriteDescriptor,
            Self::ReadCharacteristic { .. } => OpKind::ReadCharacteristic,
        }
    }

    pub fn characteristic(&self) -> Uuid {
        match self {
            Self::WriteCharacteristic { characteristic, .. }
            | Self::WriteDescriptor { characteristic, .. }
            | Self::ReadCharacteristic { characteristic } => *characteristic,
        }
    }

    pub(crate) fn issue(&self, link: &dyn TransportLink) {
        match self {
            Self::WriteCharacteristic {
                characteristic,
                value,
            } => link.write_characteristic(*characteristic, value),
            Self::WriteDescriptor {
                characteristic,
                value,
            } => link.write_descriptor(*characteristic, value),
            Self::ReadCharacteristic { characteristic } => {
                link.read_characteristic(*characteristic)
            }
        }
    }
}

/// Everything a link reports back, delivered in arrival order on the
/// session's event channel.
#[derive(Debug, Clone)]
pub enum LinkEvent {
    /// Physical link established; discovery may begin.
    Up,
    /// Link dropped, either by the peripheral or the local stack.
    Down,
    /// Service discovery finished with the characteristics found.
    Discovered(Result<Vec<Uuid>, TransportFailure>),
    /// Outcome of the operation most recently issued. Reads carry the bytes.
    Completed {
        kind: OpKind,
        characteristic: Uuid,
        status: Result<Vec<u8>, TransportFailure>,
    },
    /// Unsolicited notification payload from a subscribed characteristic.
    Notified { characteristic: Uuid, value: Vec<u8> },
}

pub type LinkEventSender = mpsc::UnboundedSender<LinkEvent>;
pub type LinkEventReceiver = mpsc::UnboundedReceiver<LinkEvent>;

pub fn link_channel() -> (LinkEventSender, LinkEventReceiver) {
    mpsc::unbounded_channel()
}

/// Characteristic operations against one connected peripheral.
///
/// Methods return immediately; the provider performs the radio work
/// asynchronously and reports through the event channel handed out next to
/// this link. The transport is half duplex, so callers serialize
/// write-class operations through an [`crate::queue::OperationQueue`].
pub trait TransportLink: Send + Sync {
    fn connect(&self);
    fn disconnect(&self);
    fn discover(&self);
    fn write_characteristic(&self, characteristic: Uuid, value: &[u8]);
    fn write_descriptor(&self, characteristic: Uuid, value: &[u8]);
    fn read_characteristic(&self, characteristic: Uuid);
    fn set_notify(&self, characteristic: Uuid, enabled: bool);
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub(crate) enum MockCall {
        Connect,
        Disconnect,
        Discover,
        WriteCharacteristic(Uuid, Vec<u8>),
        WriteDescriptor(Uuid, Vec<u8>),
        ReadCharacteristic(Uuid),
        SetNotify(Uuid, bool),
    }

    /// Records every issued operation so tests can assert ordering and
    /// outstanding-count invariants.
    #[derive(Default)]
    pub(crate) struct MockLink {
        calls: Mutex<Vec<MockCall>>,
    }

    impl MockLink {
        pub(crate) fn new() -> Self {
            Self::default()
        }

        pub(crate) fn calls(&self) -> Vec<MockCall> {
            self.calls.lock().clone()
        }

        pub(crate) fn take_calls(&self) -> Vec<MockCall> {
            std::mem::take(&mut self.calls.lock())
        }

        fn record(&self, call: MockCall) {
            self.calls.lock().push(call);
        }
    }

    impl TransportLink for MockLink {
        fn connect(&self) {
            self.record(MockCall::Connect);
        }

        fn disconnect(&self) {
            self.record(MockCall::Disconnect);
        }

        fn discover(&self) {
            self.record(MockCall::Discover);
        }

        fn write_characteristic(&self, characteristic: Uuid, value: &[u8]) {
            self.record(MockCall::WriteCharacteristic(characteristic, value.to_vec()));
        }

        fn write_descriptor(&self, characteristic: Uuid, value: &[u8]) {
            self.record(MockCall::WriteDescriptor(characteristic, value.to_vec()));
        }

        fn read_characteristic(&self, characteristic: Uuid) {
            self.record(MockCall::ReadCharacteristic(characteristic));
        }

        fn set_notify(&self, characteristic: Uuid, enabled: bool) {
            self.record(MockCall::SetNotify(characteristic, enabled));
        }
    }
}
