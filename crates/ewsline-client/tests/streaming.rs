//! Hanging connections and streaming subscriptions over a scripted body.

use std::future::Future;
use std::ops::ControlFlow;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use ewsline_client::{
    ClientConfig, ConnectionState, Disconnect, DisconnectListener, DisconnectReason,
    HangingConnection, HangingSettings, ResponseHandler, ServiceClient,
    StreamingConnectionConfig, StreamingEvent, StreamingSubscriptionConnection,
};
use ewsline_protocol::{
    ErrorKind, EventType, EwsError, EwsResult, NotificationEvent, ResponseCollection,
    StreamingResponse, Subscription, get_streaming_events_operation,
};
use ewsline_transport_traits::mock::ScriptedTransport;
use ewsline_transport_traits::{
    Transport, TransportError, TransportMetrics, TransportRequest, TransportResponse,
    TransportResult,
};
use pretty_assertions::assert_eq;
use tokio::sync::{Semaphore, mpsc};

const SOAP_NS: &str = "http://schemas.xmlsoap.org/soap/envelope/";
const MESSAGES_NS: &str = "http://schemas.microsoft.com/exchange/services/2006/messages";
const TYPES_NS: &str = "http://schemas.microsoft.com/exchange/services/2006/types";

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn document(message: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="utf-8"?><s:Envelope xmlns:s="{SOAP_NS}"><s:Body xmlns:m="{MESSAGES_NS}" xmlns:t="{TYPES_NS}"><m:GetStreamingEventsResponse><m:ResponseMessages>{message}</m:ResponseMessages></m:GetStreamingEventsResponse></s:Body></s:Envelope>
"#
    )
}

fn notifications(status: &str, groups: &[String]) -> String {
    document(&format!(
        r#"<m:GetStreamingEventsResponseMessage ResponseClass="Success"><m:ResponseCode>NoError</m:ResponseCode><m:Notifications>{}</m:Notifications><m:ConnectionStatus>{status}</m:ConnectionStatus></m:GetStreamingEventsResponseMessage>"#,
        groups.concat()
    ))
}

fn group(subscription_id: &str, events: &str) -> String {
    format!(
        r#"<m:Notification><t:SubscriptionId>{subscription_id}</t:SubscriptionId><t:PreviousWatermark>AQAAAA==</t:PreviousWatermark><t:MoreEvents>false</t:MoreEvents>{events}</m:Notification>"#
    )
}

fn created(item_id: &str) -> String {
    format!(
        r#"<t:CreatedEvent><t:Watermark>AQAAAB==</t:Watermark><t:TimeStamp>2024-05-01T10:00:00Z</t:TimeStamp><t:ItemId Id="{item_id}" ChangeKey="CQAAAA=="/><t:ParentFolderId Id="inbox" ChangeKey="AQAAAA=="/></t:CreatedEvent>"#
    )
}

fn status_event() -> String {
    "<t:StatusEvent><t:Watermark>AQAAAC==</t:Watermark></t:StatusEvent>".to_string()
}

fn closed() -> String {
    document(
        r#"<m:GetStreamingEventsResponseMessage ResponseClass="Success"><m:ResponseCode>NoError</m:ResponseCode><m:ConnectionStatus>Closed</m:ConnectionStatus></m:GetStreamingEventsResponseMessage>"#,
    )
}

fn error_document(code: &str, subscription_ids: &[&str]) -> String {
    let ids = if subscription_ids.is_empty() {
        String::new()
    } else {
        let ids: String = subscription_ids
            .iter()
            .map(|id| format!("<m:SubscriptionId>{id}</m:SubscriptionId>"))
            .collect();
        format!("<m:ErrorSubscriptionIds>{ids}</m:ErrorSubscriptionIds>")
    };
    document(&format!(
        r#"<m:GetStreamingEventsResponseMessage ResponseClass="Error"><m:MessageText>Streaming failed.</m:MessageText><m:ResponseCode>{code}</m:ResponseCode><m:DescriptiveLinkKey>0</m:DescriptiveLinkKey>{ids}<m:ConnectionStatus>OK</m:ConnectionStatus></m:GetStreamingEventsResponseMessage>"#
    ))
}

fn client<T: Transport>(transport: T) -> ServiceClient<T> {
    ServiceClient::new(transport, ClientConfig::default())
}

fn multiplexer<T: Transport + 'static>(
    transport: T,
    ids: &[&str],
) -> (
    StreamingSubscriptionConnection<T>,
    mpsc::UnboundedReceiver<StreamingEvent>,
) {
    let (connection, events) =
        StreamingSubscriptionConnection::with_channel(client(transport), StreamingConnectionConfig::default())
            .unwrap();
    for id in ids {
        connection
            .add_subscription(Subscription::streaming(*id))
            .unwrap();
    }
    (connection, events)
}

async fn next_event(events: &mut mpsc::UnboundedReceiver<StreamingEvent>) -> StreamingEvent {
    tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("no streaming event within 5s")
        .expect("event channel closed")
}

fn subscription_ids(connection: &StreamingSubscriptionConnection<ScriptedTransport>) -> Vec<String> {
    connection
        .subscriptions()
        .into_iter()
        .map(|subscription| subscription.id)
        .collect()
}

/// Holds every request until a permit is released.
#[derive(Debug, Clone)]
struct GatedTransport {
    inner: ScriptedTransport,
    gate: Arc<Semaphore>,
}

impl Transport for GatedTransport {
    fn send(
        &self,
        request: TransportRequest,
    ) -> Pin<Box<dyn Future<Output = TransportResult<TransportResponse>> + Send + '_>> {
        Box::pin(async move {
            let _permit = self
                .gate
                .acquire()
                .await
                .map_err(|_| TransportError::ConnectionFailed("gate closed".into()))?;
            self.inner.send(request).await
        })
    }

    fn metrics(&self) -> TransportMetrics {
        self.inner.metrics()
    }
}

#[tokio::test]
async fn test_open_then_disconnect_walks_the_state_machine() {
    init_tracing();
    let inner = ScriptedTransport::new();
    let feed = inner.push_stream(200);
    let gate = Arc::new(Semaphore::new(0));
    let transport = GatedTransport {
        inner: inner.clone(),
        gate: Arc::clone(&gate),
    };
    let (connection, mut events) = multiplexer(transport, &["S1"]);
    let connection = Arc::new(connection);
    assert_eq!(connection.state(), ConnectionState::Disconnected);

    let opening = tokio::spawn({
        let connection = Arc::clone(&connection);
        async move { connection.open().await }
    });
    while connection.state() != ConnectionState::Connecting {
        tokio::task::yield_now().await;
    }
    assert!(connection.is_open());

    gate.add_permits(1);
    opening.await.unwrap().unwrap();
    assert_eq!(connection.state(), ConnectionState::Connected);

    connection.close().await;
    assert_eq!(connection.state(), ConnectionState::Disconnected);
    assert!(feed.is_released());
    match next_event(&mut events).await {
        StreamingEvent::Disconnected { reason, cause } => {
            assert_eq!(reason, DisconnectReason::UserInitiated);
            assert!(cause.is_none());
        }
        other => panic!("unexpected event: {other:?}"),
    }

    connection.close().await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn test_streaming_request_shape() {
    let transport = ScriptedTransport::new();
    let _feed = transport.push_stream(200);
    let (connection, _events) = multiplexer(transport.clone(), &["S2", "S1"]);

    connection.open().await.unwrap();
    let request = &transport.requests()[0];
    assert_eq!(request.operation, "GetStreamingEvents");
    assert!(request.streaming);
    assert_eq!(request.timeout, None);

    let body = transport.last_body().unwrap();
    assert!(body.contains("<t:SubscriptionId>S1</t:SubscriptionId><t:SubscriptionId>S2</t:SubscriptionId>"));
    assert!(body.contains("<m:ConnectionTimeout>30</m:ConnectionTimeout>"));
    connection.close().await;
}

#[tokio::test]
async fn test_subscription_map_is_frozen_while_open() {
    let transport = ScriptedTransport::new();
    let _feed = transport.push_stream(200);
    let (connection, _events) = multiplexer(transport, &["S1"]);

    connection
        .add_subscription(Subscription::streaming("S1"))
        .unwrap();
    connection.remove_subscription("unknown").unwrap();
    assert_eq!(subscription_ids(&connection), vec!["S1".to_string()]);

    let pull = connection
        .add_subscription(Subscription::pull("P1", "AQ=="))
        .unwrap_err();
    assert_eq!(pull.kind(), ErrorKind::Validation);

    connection.open().await.unwrap();
    let err = connection
        .add_subscription(Subscription::streaming("S2"))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert!(connection.remove_subscription("S1").is_err());
    assert!(connection.open().await.is_err());

    connection.close().await;
    connection
        .add_subscription(Subscription::streaming("S2"))
        .unwrap();
    connection.remove_subscription("S1").unwrap();
    assert_eq!(subscription_ids(&connection), vec!["S2".to_string()]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_adds_racing_open_never_reach_the_live_set() {
    for round in 0..100 {
        let transport = ScriptedTransport::new();
        let _feed = transport.push_stream(200);
        let (connection, _events) = multiplexer(transport.clone(), &["S1"]);
        let connection = Arc::new(connection);

        let adder = tokio::task::spawn_blocking({
            let connection = Arc::clone(&connection);
            move || {
                for i in 0..5_000 {
                    let id = format!("X{round}_{i}");
                    if connection
                        .add_subscription(Subscription::streaming(id))
                        .is_err()
                    {
                        break;
                    }
                }
            }
        });
        tokio::task::yield_now().await;
        connection.open().await.unwrap();
        adder.await.unwrap();

        let body = transport.last_body().unwrap();
        for subscription in connection.subscriptions() {
            assert!(
                body.contains(&format!("<t:SubscriptionId>{}</t:SubscriptionId>", subscription.id)),
                "round {round}: {} is live but was not requested",
                subscription.id
            );
        }
        connection.close().await;
    }
}

#[tokio::test]
async fn test_open_without_subscriptions_fails_locally() {
    let transport = ScriptedTransport::new();
    let (connection, _events) = multiplexer(transport.clone(), &[]);

    let err = connection.open().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(transport.sent_count(), 0);
}

#[tokio::test]
async fn test_events_for_unknown_subscriptions_are_dropped() {
    let transport = ScriptedTransport::new();
    let feed = transport.push_stream(200);
    let (connection, mut events) = multiplexer(transport, &["A", "B"]);
    connection.open().await.unwrap();

    feed.push(notifications(
        "OK",
        &[group("A", &created("item-a")), group("C", &created("item-c"))],
    ));
    feed.push(closed());

    match next_event(&mut events).await {
        StreamingEvent::Notification {
            subscription,
            events,
        } => {
            assert_eq!(subscription.id, "A");
            assert_eq!(events.len(), 1);
        }
        other => panic!("unexpected event: {other:?}"),
    }
    match next_event(&mut events).await {
        StreamingEvent::Disconnected { reason, .. } => assert_eq!(reason, DisconnectReason::Clean),
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn test_status_events_are_not_surfaced() {
    let transport = ScriptedTransport::new();
    let feed = transport.push_stream(200);
    let (connection, mut events) = multiplexer(transport, &["S1", "S2"]);
    connection.open().await.unwrap();

    feed.push(notifications(
        "OK",
        &[group("S1", &created("item-1")), group("S2", &status_event())],
    ));
    feed.push(closed());

    match next_event(&mut events).await {
        StreamingEvent::Notification {
            subscription,
            events,
        } => {
            assert_eq!(subscription.id, "S1");
            assert_eq!(events.len(), 1);
            match &events[0] {
                NotificationEvent::Item(item) => {
                    assert_eq!(item.event_type, EventType::Created);
                    assert_eq!(item.item_id.id, "item-1");
                    assert!(item.old_item_id.is_none());
                }
                other => panic!("expected an item event, got {other:?}"),
            }
        }
        other => panic!("unexpected event: {other:?}"),
    }
    assert!(matches!(
        next_event(&mut events).await,
        StreamingEvent::Disconnected {
            reason: DisconnectReason::Clean,
            ..
        }
    ));
}

#[tokio::test]
async fn test_missed_notifications_keep_the_subscription() {
    let transport = ScriptedTransport::new();
    let feed = transport.push_stream(200);
    let (connection, mut events) = multiplexer(transport, &["S1"]);
    connection.open().await.unwrap();

    feed.push(error_document("ErrorMissedNotificationEvents", &["S1"]));
    match next_event(&mut events).await {
        StreamingEvent::SubscriptionError {
            subscription,
            error,
        } => {
            assert_eq!(subscription.id, "S1");
            assert_eq!(error.response_code(), Some("ErrorMissedNotificationEvents"));
        }
        other => panic!("unexpected event: {other:?}"),
    }

    feed.push(notifications("OK", &[group("S1", &created("item-1"))]));
    assert!(matches!(
        next_event(&mut events).await,
        StreamingEvent::Notification { .. }
    ));

    connection.close().await;
    assert_eq!(subscription_ids(&connection), vec!["S1".to_string()]);
}

#[tokio::test]
async fn test_subscription_error_removes_the_subscription() {
    let transport = ScriptedTransport::new();
    let feed = transport.push_stream(200);
    let (connection, mut events) = multiplexer(transport, &["S1", "S2"]);
    connection.open().await.unwrap();

    feed.push(error_document("ErrorSubscriptionNotFound", &["S1"]));
    match next_event(&mut events).await {
        StreamingEvent::SubscriptionError {
            subscription,
            error,
        } => {
            assert_eq!(subscription.id, "S1");
            assert_eq!(error.kind(), ErrorKind::Response);
        }
        other => panic!("unexpected event: {other:?}"),
    }

    feed.push(notifications(
        "OK",
        &[group("S1", &created("late")), group("S2", &created("item-2"))],
    ));
    match next_event(&mut events).await {
        StreamingEvent::Notification { subscription, .. } => assert_eq!(subscription.id, "S2"),
        other => panic!("unexpected event: {other:?}"),
    }

    connection.close().await;
    assert_eq!(subscription_ids(&connection), vec!["S2".to_string()]);
}

#[tokio::test]
async fn test_connection_error_keeps_the_connection_open() {
    let transport = ScriptedTransport::new();
    let feed = transport.push_stream(200);
    let (connection, mut events) = multiplexer(transport, &["S1"]);
    connection.open().await.unwrap();

    feed.push(error_document("ErrorInternalServerTransientError", &[]));
    match next_event(&mut events).await {
        StreamingEvent::ConnectionError { error } => {
            assert_eq!(error.response_code(), Some("ErrorInternalServerTransientError"));
        }
        other => panic!("unexpected event: {other:?}"),
    }
    assert!(connection.is_open());

    feed.push(notifications("OK", &[group("S1", &created("item-1"))]));
    assert!(matches!(
        next_event(&mut events).await,
        StreamingEvent::Notification { .. }
    ));
    connection.close().await;
}

#[tokio::test]
async fn test_silence_past_the_heartbeat_is_a_timeout() {
    let transport = ScriptedTransport::new();
    let _feed = transport.push_stream(200);
    let config = StreamingConnectionConfig {
        heartbeat_frequency: Duration::from_millis(100),
        heartbeat_slack: Duration::from_millis(50),
        ..StreamingConnectionConfig::default()
    };
    let (connection, mut events) =
        StreamingSubscriptionConnection::with_channel(client(transport.clone()), config).unwrap();
    connection
        .add_subscription(Subscription::streaming("S1"))
        .unwrap();
    connection.open().await.unwrap();

    match next_event(&mut events).await {
        StreamingEvent::Disconnected { reason, cause } => {
            assert_eq!(reason, DisconnectReason::Timeout);
            assert!(matches!(
                cause,
                Some(EwsError::Transport(TransportError::ReadTimeout { .. }))
            ));
        }
        other => panic!("unexpected event: {other:?}"),
    }
    assert!(!connection.is_open());
    assert_eq!(transport.sent_count(), 1);
}

#[tokio::test]
async fn test_end_of_stream_is_clean_and_nothing_reconnects() {
    let transport = ScriptedTransport::new();
    let feed = transport.push_stream(200);
    let (connection, mut events) = multiplexer(transport.clone(), &["S1"]);
    connection.open().await.unwrap();

    feed.push(notifications("OK", &[group("S1", &status_event())]));
    feed.finish();
    assert!(matches!(
        next_event(&mut events).await,
        StreamingEvent::Disconnected {
            reason: DisconnectReason::Clean,
            cause: None,
        }
    ));
    assert!(!connection.is_open());

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(transport.sent_count(), 1);

    let _next = transport.push_stream(200);
    connection.open().await.unwrap();
    assert_eq!(transport.sent_count(), 2);
    connection.close().await;
}

#[tokio::test]
async fn test_malformed_stream_is_an_exception() {
    let transport = ScriptedTransport::new();
    let feed = transport.push_stream(200);
    let (connection, mut events) = multiplexer(transport, &["S1"]);
    connection.open().await.unwrap();

    feed.push("<s:Envelope xmlns:s=\"http://schemas.xmlsoap.org/soap/envelope/\"><s:Body></s:Envelope>");
    match next_event(&mut events).await {
        StreamingEvent::Disconnected { reason, cause } => {
            assert_eq!(reason, DisconnectReason::Exception);
            assert!(cause.is_some());
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn test_failed_open_reports_no_disconnect() {
    let transport = ScriptedTransport::new();
    transport.push_error(TransportError::ConnectionFailed("refused".into()));
    let (connection, mut events) = multiplexer(transport, &["S1"]);

    let err = connection.open().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transport);
    assert!(!connection.is_open());
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn test_handler_panic_is_an_exception_disconnect() {
    let transport = ScriptedTransport::new();
    let feed = transport.push_stream(200);
    let (sender, mut disconnects) = mpsc::unbounded_channel::<Disconnect>();

    let handler: ResponseHandler<StreamingResponse> = Arc::new(
        |_batch: ResponseCollection<StreamingResponse>| -> EwsResult<ControlFlow<()>> {
            panic!("handler failure")
        },
    );
    let listener: DisconnectListener = Arc::new(move |disconnect: Disconnect| {
        let _ = sender.send(disconnect);
    });
    let connection = HangingConnection::new(
        client(transport),
        get_streaming_events_operation(["S1"], 5).unwrap(),
        HangingSettings {
            read_timeout: Duration::from_secs(5),
            max_document_size: None,
        },
        handler,
        listener,
    );
    connection.open().await.unwrap();
    feed.push(notifications("OK", &[group("S1", &created("item-1"))]));

    let disconnect = tokio::time::timeout(Duration::from_secs(5), disconnects.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(disconnect.reason, DisconnectReason::Exception);
    assert!(disconnect.cause.is_none());
    assert_eq!(connection.state(), ConnectionState::Disconnected);
    assert!(format!("{connection:?}").contains("state: Disconnected"));

    connection.disconnect().await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(disconnects.try_recv().is_err());
}

#[tokio::test]
async fn test_handler_break_ends_cleanly() {
    let transport = ScriptedTransport::new();
    let feed = transport.push_stream(200);
    let (sender, mut disconnects) = mpsc::unbounded_channel::<Disconnect>();

    let handler: ResponseHandler<StreamingResponse> = Arc::new(
        |batch: ResponseCollection<StreamingResponse>| -> EwsResult<ControlFlow<()>> {
            assert_eq!(batch.len(), 1);
            Ok(ControlFlow::Break(()))
        },
    );
    let connection = HangingConnection::new(
        client(transport),
        get_streaming_events_operation(["S1"], 5).unwrap(),
        HangingSettings {
            read_timeout: Duration::from_secs(5),
            max_document_size: None,
        },
        handler,
        Arc::new(move |disconnect: Disconnect| {
            let _ = sender.send(disconnect);
        }),
    );
    connection.open().await.unwrap();
    feed.push(notifications("OK", &[]));

    let disconnect = tokio::time::timeout(Duration::from_secs(5), disconnects.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(disconnect.reason, DisconnectReason::Clean);
    assert!(feed.is_released());
}
