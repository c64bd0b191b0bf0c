//! FIFO serialization of half-duplex characteristic operations.

use crate::transport::{OpKind, PendingOperation, TransportLink};
use log::warn;
use std::collections::VecDeque;
use uuid::Uuid;

/// Keeps at most one operation in flight against a link.
///
/// The head of the queue is the outstanding operation. Enqueueing into an
/// empty queue issues immediately; completing the head issues the next one.
/// Failures are not retried here, the owning session decides what a failed
/// operation means.
#[derive(Default)]
pub struct OperationQueue {
    pending: VecDeque<PendingOperation>,
}

impl OperationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Append an operation, issuing it right away if nothing is in flight.
    pub fn enqueue(&mut self, link: &dyn TransportLink, op: PendingOperation) {
        self.pending.push_back(op);
        if self.pending.len() == 1 {
            self.pending[0].issue(link);
        }
    }

    /// Handle a completion callback and issue the next queued operation.
    ///
    /// Completions must arrive for the current head. Anything else is a
    /// protocol violation: it is logged and the head is advanced anyway so
    /// the queue cannot stall forever.
    pub fn on_complete(
        &mut self,
        link: &dyn TransportLink,
        kind: OpKind,
        characteristic: Uuid,
    ) -> Option<PendingOperation> {
        let head_matches = self
            .pending
            .front()
            .map(|op| op.kind() == kind && op.characteristic() == characteristic)
            .unwrap_or(false);
        if !head_matches {
            warn!(
                "out-of-order completion: {kind:?} on {characteristic} is not the queue head, advancing anyway"
            );
        }
        let done = self.pending.pop_front();
        if let Some(next) = self.pending.front() {
            next.issue(link);
        }
        done
    }

    /// Drop everything, including the in-flight head. Used on teardown when
    /// the link is going away and completions will never arrive.
    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testing::{MockCall, MockLink};

    fn write(n: u128) -> PendingOperation {
        PendingOperation::WriteCharacteristic {
            characteristic: Uuid::from_u128(n),
            value: vec![n as u8],
        }
    }

    #[test]
    fn drains_in_fifo_order_with_one_outstanding() {
        let link = MockLink::new();
        let mut queue = OperationQueue::new();

        queue.enqueue(&link, write(1));
        queue.enqueue(&link, write(2));
        queue.enqueue(&link, write(3));
        // Only the head went out.
        assert_eq!(
            link.take_calls(),
            vec![MockCall::WriteCharacteristic(Uuid::from_u128(1), vec![1])]
        );

        let done = queue.on_complete(&link, OpKind::WriteCharacteristic, Uuid::from_u128(1));
        assert_eq!(done, Some(write(1)));
        assert_eq!(
            link.take_calls(),
            vec![MockCall::WriteCharacteristic(Uuid::from_u128(2), vec![2])]
        );

        queue.on_complete(&link, OpKind::WriteCharacteristic, Uuid::from_u128(2));
        assert_eq!(
            link.take_calls(),
            vec![MockCall::WriteCharacteristic(Uuid::from_u128(3), vec![3])]
        );

        queue.on_complete(&link, OpKind::WriteCharacteristic, Uuid::from_u128(3));
        assert!(queue.is_empty());
        assert!(link.take_calls().is_empty());
    }

    #[test]
    fn mismatched_completion_still_advances() {
        let link = MockLink::new();
        let mut queue = OperationQueue::new();

        queue.enqueue(&link, write(1));
        queue.enqueue(&link, write(2));
        link.take_calls();

        // Completion for something that is not the head.
        let done = queue.on_complete(&link, OpKind::ReadCharacteristic, Uuid::from_u128(9));
        assert_eq!(done, Some(write(1)));
        // The queue did not stall, the next operation went out.
        assert_eq!(
            link.take_calls(),
            vec![MockCall::WriteCharacteristic(Uuid::from_u128(2), vec![2])]
        );
    }

    #[test]
    fn completion_on_empty_queue_is_harmless() {
        let link = MockLink::new();
        let mut queue = OperationQueue::new();
        let done = queue.on_complete(&link, OpKind::WriteDescriptor, Uuid::from_u128(7));
        assert_eq!(done, None);
        assert!(link.take_calls().is_empty());
    }

    #[test]
    fn mixed_operation_kinds_keep_order() {
        let link = MockLink::new();
        let mut queue = OperationQueue::new();
        let id = Uuid::from_u128(42);

        queue.enqueue(
            &link,
            PendingOperation::WriteDescriptor {
                characteristic: id,
                value: vec![1, 0],
            },
        );
        queue.enqueue(&link, PendingOperation::ReadCharacteristic { characteristic: id });
        assert_eq!(
            link.take_calls(),
            vec![MockCall::WriteDescriptor(id, vec![1, 0])]
        );

        queue.on_complete(&link, OpKind::WriteDescriptor, id);
        assert_eq!(link.take_calls(), vec![MockCall::ReadCharacteristic(id)]);
    }
}
