//! Subscriptions and response delivery handles.
//!
//! A subscription holds a cloned producer handle to its connection's bounded
//! outbound queue, never a pointer back into the connection or the table;
//! the cycle between table, subscription, and connection is broken by
//! message passing. Closure is observed through the channel itself.

use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::response::Response;
use pubsub_parser::Filter;

/// Process-global monotonic pubsubid source; ids start at 1.
static NEXT_PUBSUBID: AtomicU64 = AtomicU64::new(1);

/// Allocates the next pubsubid.
pub fn next_pubsubid() -> u64 {
    NEXT_PUBSUBID.fetch_add(1, Ordering::Relaxed)
}

/// One message on a connection's outbound queue.
///
/// `request_id == 0` marks a server-pushed pubsub event.
#[derive(Debug)]
pub struct OutboundMessage {
    pub request_id: u32,
    pub response: Response,
}

/// The sender half of a connection's outbound queue, bound to one request id.
///
/// Synchronous responses go through [`send`](Self::send); the actor awaits
/// queue space (the channel slot is the only lock). Events never block: see
/// [`EventSender`].
#[derive(Clone, Debug)]
pub struct ResponseSender {
    request_id: u32,
    tx: mpsc::Sender<OutboundMessage>,
}

impl ResponseSender {
    pub fn new(request_id: u32, tx: mpsc::Sender<OutboundMessage>) -> Self {
        Self { request_id, tx }
    }

    /// The request id responses are tagged with.
    pub fn request_id(&self) -> u32 {
        self.request_id
    }

    /// Queues a synchronous response; returns false if the connection is
    /// gone.
    pub async fn send(&self, response: Response) -> bool {
        self.tx
            .send(OutboundMessage {
                request_id: self.request_id,
                response,
            })
            .await
            .is_ok()
    }

    /// A pubsub delivery handle over the same outbound queue.
    pub fn event_sender(&self) -> EventSender {
        EventSender {
            tx: self.tx.clone(),
        }
    }
}

/// Outcome of a non-blocking event push.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventPush {
    Sent,
    /// Queue full: the subscriber is too slow and must be dropped.
    Full,
    /// Connection closed.
    Closed,
}

/// Delivery handle held by a subscription; pushes with `request_id = 0` and
/// never blocks the table actor.
#[derive(Clone, Debug)]
pub struct EventSender {
    tx: mpsc::Sender<OutboundMessage>,
}

impl EventSender {
    /// Pushes one event without waiting for queue space.
    pub fn try_send(&self, response: Response) -> EventPush {
        match self.tx.try_send(OutboundMessage {
            request_id: 0,
            response,
        }) {
            Ok(()) => EventPush::Sent,
            Err(TrySendError::Full(_)) => EventPush::Full,
            Err(TrySendError::Closed(_)) => EventPush::Closed,
        }
    }

    /// True once the receiving connection dropped its queue.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// A standing interest in one table, held by the table by value.
#[derive(Debug)]
pub struct Subscription {
    pub pubsubid: u64,
    pub filter: Option<Filter>,
    pub sender: EventSender,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel(capacity: usize) -> (EventSender, mpsc::Receiver<OutboundMessage>) {
        let (tx, rx) = mpsc::channel(capacity);
        let sender = ResponseSender::new(7, tx).event_sender();
        (sender, rx)
    }

    #[test]
    fn test_pubsubids_are_monotonic() {
        let a = next_pubsubid();
        let b = next_pubsubid();
        assert!(b > a);
    }

    #[test]
    fn test_event_is_tagged_with_request_id_zero() {
        let (sender, mut rx) = channel(4);
        assert_eq!(sender.try_send(Response::Ok), EventPush::Sent);
        let msg = rx.try_recv().unwrap();
        assert_eq!(msg.request_id, 0);
    }

    #[tokio::test]
    async fn test_response_keeps_request_id() {
        let (tx, mut rx) = mpsc::channel(4);
        let sender = ResponseSender::new(7, tx);
        assert!(sender.send(Response::Ok).await);
        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.request_id, 7);
    }

    #[test]
    fn test_try_send_full() {
        let (sender, _rx) = channel(1);
        assert_eq!(sender.try_send(Response::Ok), EventPush::Sent);
        assert_eq!(sender.try_send(Response::Ok), EventPush::Full);
    }

    #[test]
    fn test_try_send_closed() {
        let (sender, rx) = channel(1);
        drop(rx);
        assert_eq!(sender.try_send(Response::Ok), EventPush::Closed);
        assert!(sender.is_closed());
    }
}
