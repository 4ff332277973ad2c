//! The typed events a streaming subscription connection emits.

use ewsline_protocol::{EwsError, NotificationEvent, Subscription};
use tokio::sync::mpsc;

use super::hanging::DisconnectReason;

/// Everything a [`StreamingSubscriptionConnection`](super::StreamingSubscriptionConnection)
/// reports, delivered through one [`StreamingEventHandler`].
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum StreamingEvent {
    /// Events for one live subscription, in server order. Never empty.
    Notification {
        /// The subscription the events belong to.
        subscription: Subscription,
        /// The events.
        events: Vec<NotificationEvent>,
    },

    /// The server reported an error for one subscription.
    ///
    /// Unless the code is `ErrorMissedNotificationEvents`, the subscription
    /// has already been removed from the live set when this is delivered.
    SubscriptionError {
        /// The affected subscription.
        subscription: Subscription,
        /// The reported error.
        error: EwsError,
    },

    /// The server reported an error for the connection as a whole. The
    /// connection stays open.
    ConnectionError {
        /// The reported error.
        error: EwsError,
    },

    /// The hanging connection ended. Nothing reconnects automatically.
    Disconnected {
        /// Why the connection ended.
        reason: DisconnectReason,
        /// The failure behind a `Timeout` or `Exception` disconnect, when known.
        cause: Option<EwsError>,
    },
}

/// Receives [`StreamingEvent`]s on the connection's reader task.
///
/// The next document is not read until `handle` returns, so a slow handler
/// slows the stream down.
pub trait StreamingEventHandler: Send + Sync {
    /// Handles one event.
    fn handle(&self, event: StreamingEvent);
}

impl<F> StreamingEventHandler for F
where
    F: Fn(StreamingEvent) + Send + Sync,
{
    fn handle(&self, event: StreamingEvent) {
        self(event);
    }
}

/// A handler that forwards every event into an unbounded channel.
///
/// Events sent after the receiver is dropped are discarded.
pub fn channel_handler() -> (
    impl StreamingEventHandler + 'static,
    mpsc::UnboundedReceiver<StreamingEvent>,
) {
    let (sender, receiver) = mpsc::unbounded_channel();
    let handler = move |event: StreamingEvent| {
        if sender.send(event).is_err() {
            tracing::trace!("Streaming event receiver dropped");
        }
    };
    (handler, receiver)
}
