//! Many streaming subscriptions sharing one hanging connection.

use std::collections::BTreeMap;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use ewsline_protocol::notification::CONNECTION_LIFETIME_MINUTES;
use ewsline_protocol::{
    ConnectionStatus, EwsError, EwsResult, ResponseCollection, ServiceError, StreamingResponse,
    Subscription, SubscriptionKind, codes, get_streaming_events_operation,
};
use ewsline_transport_traits::Transport;

use super::events::{StreamingEvent, StreamingEventHandler, channel_handler};
use super::hanging::{
    ConnectionState, Disconnect, DisconnectListener, HangingConnection, HangingSettings,
    ResponseHandler,
};
use crate::client::ServiceClient;

/// Settings for a [`StreamingSubscriptionConnection`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamingConnectionConfig {
    /// How long the server keeps the connection open, in minutes (1 to 30).
    pub lifetime_minutes: u32,

    /// How often the server is expected to send something, a status event
    /// at least.
    pub heartbeat_frequency: Duration,

    /// Extra time allowed on top of `heartbeat_frequency` before the
    /// connection is considered dead.
    pub heartbeat_slack: Duration,

    /// Upper bound on one streamed envelope.
    pub max_document_size: Option<usize>,
}

impl Default for StreamingConnectionConfig {
    fn default() -> Self {
        Self {
            lifetime_minutes: *CONNECTION_LIFETIME_MINUTES.end(),
            heartbeat_frequency: Duration::from_secs(45),
            heartbeat_slack: Duration::from_secs(15),
            max_document_size: Some(4 * 1024 * 1024),
        }
    }
}

impl StreamingConnectionConfig {
    /// Checks the settings.
    ///
    /// # Errors
    ///
    /// Returns a validation error for a lifetime outside 1 to 30 minutes or
    /// a zero heartbeat frequency.
    pub fn validate(&self) -> EwsResult<()> {
        if !CONNECTION_LIFETIME_MINUTES.contains(&self.lifetime_minutes) {
            return Err(EwsError::validation(format!(
                "connection lifetime must be {}..={} minutes, got {}",
                CONNECTION_LIFETIME_MINUTES.start(),
                CONNECTION_LIFETIME_MINUTES.end(),
                self.lifetime_minutes
            )));
        }
        if self.heartbeat_frequency.is_zero() {
            return Err(EwsError::validation("heartbeat frequency must be positive"));
        }
        Ok(())
    }

    /// The longest the reader waits for the next envelope.
    pub fn read_timeout(&self) -> Duration {
        self.heartbeat_frequency + self.heartbeat_slack
    }
}

type Subscriptions = Arc<Mutex<BTreeMap<String, Subscription>>>;

/// Delivers the events of a set of streaming subscriptions over one
/// `GetStreamingEvents` connection.
///
/// Subscriptions can only be added or removed while the connection is
/// closed. Nothing reconnects on its own: after a
/// [`StreamingEvent::Disconnected`], call [`open`](Self::open) again to
/// resume.
pub struct StreamingSubscriptionConnection<T: Transport> {
    client: ServiceClient<T>,
    config: StreamingConnectionConfig,
    subscriptions: Subscriptions,
    handler: Arc<dyn StreamingEventHandler>,
    connection: Mutex<CurrentConnection<T>>,
}

impl<T: Transport> std::fmt::Debug for StreamingSubscriptionConnection<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingSubscriptionConnection")
            .field("config", &self.config)
            .field("subscriptions", &self.subscriptions.lock().len())
            .field("open", &self.connection.lock().is_some())
            .finish()
    }
}

impl<T: Transport + 'static> StreamingSubscriptionConnection<T> {
    /// Creates a closed connection with no subscriptions.
    ///
    /// # Errors
    ///
    /// Returns a validation error for invalid settings.
    pub fn new(
        client: ServiceClient<T>,
        config: StreamingConnectionConfig,
        handler: impl StreamingEventHandler + 'static,
    ) -> EwsResult<Self> {
        config.validate()?;
        Ok(Self {
            client,
            config,
            subscriptions: Arc::new(Mutex::new(BTreeMap::new())),
            handler: Arc::new(handler),
            connection: Mutex::new(None),
        })
    }

    /// Creates a closed connection whose events arrive on a channel.
    ///
    /// # Errors
    ///
    /// Returns a validation error for invalid settings.
    pub fn with_channel(
        client: ServiceClient<T>,
        config: StreamingConnectionConfig,
    ) -> EwsResult<(Self, mpsc::UnboundedReceiver<StreamingEvent>)> {
        let (handler, receiver) = channel_handler();
        Ok((Self::new(client, config, handler)?, receiver))
    }

    /// The connection settings.
    pub fn config(&self) -> &StreamingConnectionConfig {
        &self.config
    }

    /// Adds a subscription. Adding an id that is already present does
    /// nothing.
    ///
    /// # Errors
    ///
    /// Fails while the connection is open, and for subscriptions that are
    /// not streaming subscriptions.
    pub fn add_subscription(&self, subscription: Subscription) -> EwsResult<()> {
        let current = self.connection.lock();
        ensure_closed(&current, "add a subscription")?;
        if subscription.kind != SubscriptionKind::Streaming {
            return Err(EwsError::validation(format!(
                "subscription {} is a {:?} subscription, not a streaming one",
                subscription.id, subscription.kind
            )));
        }
        if subscription.id.trim().is_empty() {
            return Err(EwsError::validation("subscription id is empty"));
        }

        let mut subscriptions = self.subscriptions.lock();
        if subscriptions.contains_key(&subscription.id) {
            trace!(subscription_id = %subscription.id, "Subscription already present");
            return Ok(());
        }
        debug!(subscription_id = %subscription.id, "Subscription added");
        subscriptions.insert(subscription.id.clone(), subscription);
        Ok(())
    }

    /// Removes a subscription. Removing an unknown id does nothing.
    ///
    /// # Errors
    ///
    /// Fails while the connection is open.
    pub fn remove_subscription(&self, subscription_id: &str) -> EwsResult<()> {
        let current = self.connection.lock();
        ensure_closed(&current, "remove a subscription")?;
        if self.subscriptions.lock().remove(subscription_id).is_some() {
            debug!(subscription_id, "Subscription removed");
        }
        Ok(())
    }

    /// The live subscriptions, ordered by id.
    pub fn subscriptions(&self) -> Vec<Subscription> {
        self.subscriptions.lock().values().cloned().collect()
    }

    /// Whether a hanging connection is open or opening.
    pub fn is_open(&self) -> bool {
        is_live(&self.connection.lock())
    }

    /// State of the current hanging connection.
    pub fn state(&self) -> ConnectionState {
        self.connection
            .lock()
            .as_ref()
            .map_or(ConnectionState::Disconnected, |connection| connection.state())
    }

    /// Opens the hanging connection for the current subscriptions.
    ///
    /// # Errors
    ///
    /// Fails when already open, when there are no subscriptions, and with
    /// any error the `GetStreamingEvents` request produces.
    pub async fn open(&self) -> EwsResult<()> {
        let (connection, generation) = {
            let mut current = self.connection.lock();
            if is_live(&current) {
                return Err(EwsError::validation("streaming connection is already open"));
            }

            let ids: Vec<String> = self.subscriptions.lock().keys().cloned().collect();
            if ids.is_empty() {
                return Err(EwsError::validation(
                    "cannot open a streaming connection without subscriptions",
                ));
            }
            let operation = get_streaming_events_operation(ids, self.config.lifetime_minutes)?;

            let settings = HangingSettings {
                read_timeout: self.config.read_timeout(),
                max_document_size: self.config.max_document_size,
            };
            let connection = Arc::new(HangingConnection::new(
                self.client.clone(),
                operation,
                settings,
                self.dispatcher(),
                self.disconnect_forwarder(),
            ));
            // Connecting before the lock is released, so the id set above
            // stays the one the request carries.
            let generation = connection.begin_open()?;
            *current = Some(Arc::clone(&connection));
            (connection, generation)
        };

        info!(
            subscriptions = self.subscriptions.lock().len(),
            lifetime_minutes = self.config.lifetime_minutes,
            "Opening streaming subscription connection"
        );
        connection.complete_open(generation).await
    }

    /// Closes the connection and waits for the reader to release it.
    /// Closing a closed connection does nothing.
    pub async fn close(&self) {
        let connection = self.connection.lock().take();
        if let Some(connection) = connection {
            connection.disconnect().await;
        }
    }

    fn dispatcher(&self) -> ResponseHandler<StreamingResponse> {
        let subscriptions = Arc::clone(&self.subscriptions);
        let handler = Arc::clone(&self.handler);
        Arc::new(
            move |batch: ResponseCollection<StreamingResponse>| -> EwsResult<ControlFlow<()>> {
                Ok(dispatch(&subscriptions, handler.as_ref(), batch))
            },
        )
    }

    fn disconnect_forwarder(&self) -> DisconnectListener {
        let handler = Arc::clone(&self.handler);
        Arc::new(move |disconnect: Disconnect| {
            handler.handle(StreamingEvent::Disconnected {
                reason: disconnect.reason,
                cause: disconnect.cause,
            });
        })
    }
}

type CurrentConnection<T> = Option<Arc<HangingConnection<T, StreamingResponse>>>;

fn is_live<T: Transport>(current: &CurrentConnection<T>) -> bool {
    current
        .as_ref()
        .is_some_and(|connection| connection.state() != ConnectionState::Disconnected)
}

/// The subscription map changes only under the connection lock, which
/// `open()` also holds while it takes the id set.
fn ensure_closed<T: Transport>(current: &CurrentConnection<T>, action: &str) -> EwsResult<()> {
    if is_live(current) {
        return Err(EwsError::validation(format!(
            "cannot {action} while the streaming connection is open"
        )));
    }
    Ok(())
}

/// Routes one decoded streaming envelope to the event handler.
///
/// The subscription map lock is never held while the handler runs.
fn dispatch(
    subscriptions: &Mutex<BTreeMap<String, Subscription>>,
    handler: &dyn StreamingEventHandler,
    batch: ResponseCollection<StreamingResponse>,
) -> ControlFlow<()> {
    let mut flow = ControlFlow::Continue(());

    for message in batch.into_messages() {
        let error = message.error();
        let response = message.payload;

        for group in response.notifications {
            if !group.has_events() {
                continue;
            }
            let subscription = subscriptions.lock().get(&group.subscription_id).cloned();
            match subscription {
                Some(subscription) => handler.handle(StreamingEvent::Notification {
                    subscription,
                    events: group.events,
                }),
                None => trace!(
                    subscription_id = %group.subscription_id,
                    "Dropping events for an unknown subscription"
                ),
            }
        }

        if let Some(error) = error {
            if response.error_subscription_ids.is_empty() {
                warn!(response_code = %error.response_code, "Streaming connection error");
                handler.handle(StreamingEvent::ConnectionError {
                    error: EwsError::Response(error),
                });
            } else {
                for id in &response.error_subscription_ids {
                    report_subscription_error(subscriptions, handler, id, &error);
                }
            }
        }

        if response.connection_status == Some(ConnectionStatus::Closed) {
            debug!("Server closed the streaming connection");
            flow = ControlFlow::Break(());
        }
    }

    flow
}

fn report_subscription_error(
    subscriptions: &Mutex<BTreeMap<String, Subscription>>,
    handler: &dyn StreamingEventHandler,
    subscription_id: &str,
    error: &ServiceError,
) {
    let recoverable = error.response_code == codes::MISSED_NOTIFICATION_EVENTS;
    let subscription = {
        let mut subscriptions = subscriptions.lock();
        if recoverable {
            subscriptions.get(subscription_id).cloned()
        } else {
            subscriptions.remove(subscription_id)
        }
    };

    let Some(subscription) = subscription else {
        trace!(subscription_id, "Error for an unknown subscription");
        return;
    };
    warn!(
        subscription_id,
        response_code = %error.response_code,
        removed = !recoverable,
        "Subscription error"
    );
    handler.handle(StreamingEvent::SubscriptionError {
        subscription,
        error: EwsError::Response(error.clone()),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use ewsline_protocol::{ResponseClass, ResponseMessage};

    fn recorder() -> (Arc<Mutex<Vec<StreamingEvent>>>, impl StreamingEventHandler) {
        let events = Arc::new(Mutex::new(Vec::<StreamingEvent>::new()));
        let sink = Arc::clone(&events);
        (events, move |event: StreamingEvent| sink.lock().push(event))
    }

    fn live(ids: &[&str]) -> Mutex<BTreeMap<String, Subscription>> {
        Mutex::new(
            ids.iter()
                .map(|id| (id.to_string(), Subscription::streaming(*id)))
                .collect(),
        )
    }

    fn error_message(code: &str, ids: &[&str]) -> ResponseMessage<StreamingResponse> {
        ResponseMessage {
            class: ResponseClass::Error,
            response_code: code.to_string(),
            message_text: Some("failed".to_string()),
            descriptive_link_key: None,
            message_xml: Vec::new(),
            payload: StreamingResponse {
                error_subscription_ids: ids.iter().map(ToString::to_string).collect(),
                ..StreamingResponse::default()
            },
        }
    }

    #[test]
    fn test_config_validation() {
        assert!(StreamingConnectionConfig::default().validate().is_ok());
        let config = StreamingConnectionConfig {
            lifetime_minutes: 31,
            ..StreamingConnectionConfig::default()
        };
        assert!(config.validate().is_err());
        assert_eq!(
            StreamingConnectionConfig::default().read_timeout(),
            Duration::from_secs(60)
        );
    }

    #[test]
    fn test_error_for_unknown_subscription_is_ignored() {
        let (events, handler) = recorder();
        let subscriptions = live(&["A"]);
        let batch = ResponseCollection::new(vec![error_message("ErrorSubscriptionNotFound", &["Z"])]);

        let flow = dispatch(&subscriptions, &handler, batch);
        assert_eq!(flow, ControlFlow::Continue(()));
        assert!(events.lock().is_empty());
        assert_eq!(subscriptions.lock().len(), 1);
    }

    #[test]
    fn test_subscription_error_removes_then_reports() {
        let (events, handler) = recorder();
        let subscriptions = live(&["A", "B"]);
        let batch = ResponseCollection::new(vec![error_message("ErrorSubscriptionNotFound", &["A"])]);

        dispatch(&subscriptions, &handler, batch);
        let keys: Vec<String> = subscriptions.lock().keys().cloned().collect();
        assert_eq!(keys, vec!["B".to_string()]);
        let events = events.lock();
        assert_eq!(events.len(), 1);
        match &events[0] {
            StreamingEvent::SubscriptionError { subscription, error } => {
                assert_eq!(subscription.id, "A");
                assert_eq!(error.response_code(), Some("ErrorSubscriptionNotFound"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_service_error_clone_is_reported() {
        let error = ServiceError {
            response_code: codes::SERVER_BUSY.to_string(),
            message: "busy".to_string(),
            descriptive_link_key: None,
            details: Vec::new(),
        };
        let (events, handler) = recorder();
        let subscriptions = live(&["A"]);
        report_subscription_error(&subscriptions, &handler, "A", &error);
        assert_eq!(events.lock().len(), 1);
        assert!(subscriptions.lock().is_empty());
    }
}
