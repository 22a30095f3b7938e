use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use assert_matches::assert_matches;
use bytes::Bytes;
use courier_messaging::{
    AckPolicy, ClientOptions, Configuration, ConfigurationError, Error, HandlerError, Headers,
    Message, MessageError, MessageHandler, REQUEST_TIMEOUT, RequestHeaders, WireMessage,
};
use courier_messaging_memory::{
    Call, Error as MemoryError, MemoryClient, MemoryStreamConfig, MemoryTransport, Operation,
};
use pretty_assertions::assert_eq;
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep, timeout};
use tracing_test::traced_test;

fn setup(options: ClientOptions) -> (MemoryTransport, MemoryClient) {
    let transport = MemoryTransport::new();
    let client = transport.client(options);
    (transport, client)
}

fn collector() -> (impl MessageHandler, mpsc::UnboundedReceiver<Message>) {
    let (sender, receiver) = mpsc::unbounded_channel();
    let handler = move |message: Message| -> Result<(), HandlerError> {
        sender.send(message)?;
        Ok(())
    };
    (handler, receiver)
}

async fn next<T>(receiver: &mut mpsc::UnboundedReceiver<T>) -> T {
    timeout(Duration::from_secs(1), receiver.recv())
        .await
        .expect("timed out waiting for delivery")
        .expect("delivery channel closed")
}

async fn wait_for_call(transport: &MemoryTransport, call: &Call) {
    timeout(Duration::from_secs(1), async {
        while !transport.calls().contains(call) {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("call was never recorded");
}

fn orders_stream() -> MemoryStreamConfig {
    MemoryStreamConfig::new("ORDERS", ["orders.>"])
}

fn echo(request: WireMessage) -> WireMessage {
    let mut headers = request.headers.clone();
    headers.append("Seen", request.headers.len().to_string());

    WireMessage {
        subject: format!("{}.reply", request.subject),
        payload: request.payload,
        headers,
    }
}

#[tokio::test]
async fn test_publish_delivers_text_as_utf8() {
    let (_, client) = setup(ClientOptions::default());
    let (handler, mut receiver) = collector();

    let _subscription = client.subscribe("orders.*", handler).await.unwrap();
    client.publish("orders.created", "héllo").await.unwrap();

    let message = next(&mut receiver).await;
    assert_eq!(message.topic, "orders.created");
    assert_eq!(message.text.as_deref(), Some("héllo"));
    assert_eq!(message.raw, Some(Bytes::from("héllo".as_bytes().to_vec())));
    assert!(message.headers.is_empty());
}

#[tokio::test]
async fn test_raw_payload_is_delivered_verbatim() {
    let (_, client) = setup(ClientOptions::default());
    let (handler, mut receiver) = collector();
    let payload = Bytes::from_static(&[0x00, 0xff, 0xfe, 0x7f]);

    let _subscription = client.subscribe("blobs", handler).await.unwrap();
    let mut message = Message::raw("blobs", payload.clone());
    message.text = Some("ignored".to_string());
    client.publish_message(&message).await.unwrap();

    let delivered = next(&mut receiver).await;
    assert_eq!(delivered.raw, Some(payload));
    assert_ne!(delivered.text.as_deref(), Some("ignored"));
}

#[tokio::test]
async fn test_headers_round_trip() {
    let (_, client) = setup(ClientOptions::default());
    let (handler, mut receiver) = collector();
    let headers = Headers::from([
        ("Content-Type".to_string(), "application/json".to_string()),
        ("X-Trace".to_string(), "abc".to_string()),
    ]);

    let _subscription = client.subscribe("orders.created", handler).await.unwrap();
    client
        .publish_with_headers("orders.created", "{}", &headers)
        .await
        .unwrap();

    assert_eq!(next(&mut receiver).await.headers, headers);
}

#[tokio::test]
#[traced_test]
async fn test_closed_connection_never_reaches_transport() {
    let (transport, client) = setup(ClientOptions::default());
    let (handler, _receiver) = collector();
    let (durable_handler, _durable_receiver) = collector();

    client.close().await.unwrap();
    assert!(!client.is_connected());
    assert!(logs_contain("closing connection"));
    transport.clear_calls();

    assert_matches!(client.publish("a", "b").await, Err(Error::ConnectionInvalid));
    assert_matches!(
        client.subscribe("a", handler).await,
        Err(Error::ConnectionInvalid)
    );
    assert_matches!(
        client.request("a", "b", &Headers::new()).await,
        Err(Error::ConnectionInvalid)
    );
    assert_matches!(
        client.durable_setup(orders_stream()).await,
        Err(Error::ConnectionInvalid)
    );
    assert_matches!(
        client.durable_delete("ORDERS").await,
        Err(Error::ConnectionInvalid)
    );
    assert_matches!(
        client.durable_publish("orders.created", "b").await,
        Err(Error::ConnectionInvalid)
    );
    assert_matches!(
        client.durable_subscribe("orders.>", durable_handler).await,
        Err(Error::ConnectionInvalid)
    );
    assert_matches!(client.close().await, Err(Error::ConnectionInvalid));

    assert!(transport.calls().is_empty());
    assert_eq!(
        Error::<MemoryError>::ConnectionInvalid.to_string(),
        "the connection is not valid"
    );
}

#[tokio::test]
async fn test_invalid_messages_are_rejected_before_the_transport() {
    let (transport, client) = setup(ClientOptions::default());
    let (handler, _receiver) = collector();

    assert_matches!(
        client.publish("", "x").await,
        Err(Error::InvalidMessage(MessageError::EmptyTopic))
    );
    assert_matches!(
        client
            .publish_message(&Message {
                topic: "orders".to_string(),
                ..Message::default()
            })
            .await,
        Err(Error::InvalidMessage(MessageError::MissingPayload))
    );
    assert_matches!(
        client.subscribe("", handler).await,
        Err(Error::InvalidMessage(MessageError::EmptyTopic))
    );
    assert_matches!(
        client.request("", "x", &Headers::new()).await,
        Err(Error::InvalidMessage(MessageError::EmptyTopic))
    );

    assert!(transport.calls().is_empty());
}

#[tokio::test]
async fn test_durable_setup_creates_then_updates() {
    let (transport, client) = setup(ClientOptions::default());

    client.durable_setup(orders_stream()).await.unwrap();
    assert_eq!(
        transport.calls(),
        vec![
            Call::AcquireDurable,
            Call::StreamInfo {
                name: "ORDERS".to_string()
            },
            Call::CreateStream {
                name: "ORDERS".to_string()
            },
        ]
    );

    transport.clear_calls();
    client.durable_setup(orders_stream()).await.unwrap();
    assert_eq!(
        transport.calls(),
        vec![
            Call::AcquireDurable,
            Call::StreamInfo {
                name: "ORDERS".to_string()
            },
            Call::UpdateStream {
                name: "ORDERS".to_string()
            },
        ]
    );
    assert_eq!(transport.stream_config("ORDERS"), Some(orders_stream()));
}

#[tokio::test]
async fn test_durable_setup_overwrites_existing_configuration() {
    let (transport, client) = setup(ClientOptions::default());

    client.durable_setup(orders_stream()).await.unwrap();
    for n in 0..3 {
        client
            .durable_publish("orders.created", &n.to_string())
            .await
            .unwrap();
    }
    assert_eq!(transport.stream_len("ORDERS"), Some(3));

    client
        .durable_setup(orders_stream().with_max_messages(2))
        .await
        .unwrap();

    assert_eq!(transport.stream_len("ORDERS"), Some(2));
    assert_eq!(
        transport.stream_config("ORDERS").unwrap().max_messages,
        Some(2)
    );
}

#[tokio::test]
async fn test_durable_delete_surfaces_errors() {
    let (transport, client) = setup(ClientOptions::default());

    assert_matches!(
        client.durable_delete("ORDERS").await,
        Err(Error::Transport(MemoryError::StreamNotFound(name))) if name == "ORDERS"
    );

    client.durable_setup(orders_stream()).await.unwrap();
    client.durable_delete("ORDERS").await.unwrap();
    assert_eq!(transport.stream_config("ORDERS"), None);
}

#[tokio::test]
async fn test_durable_publish_requires_a_stream() {
    let (_, client) = setup(ClientOptions::default());

    assert_matches!(
        client.durable_publish("orders.created", "x").await,
        Err(Error::Transport(MemoryError::NoStream(_)))
    );
}

#[tokio::test]
async fn test_durable_subscribe_replays_backlog_then_live_messages() {
    let (_, client) = setup(ClientOptions::default());
    let (handler, mut receiver) = collector();

    client.durable_setup(orders_stream()).await.unwrap();
    client
        .durable_publish("orders.created", "first")
        .await
        .unwrap();

    let _subscription = client
        .durable_subscribe("orders.created", handler)
        .await
        .unwrap();
    client
        .durable_publish("orders.created", "second")
        .await
        .unwrap();

    let first = next(&mut receiver).await;
    let second = next(&mut receiver).await;
    assert_eq!(first.text.as_deref(), Some("first"));
    assert_eq!(first.raw, Some(Bytes::from_static(b"first")));
    assert_eq!(second.text.as_deref(), Some("second"));
}

#[tokio::test]
async fn test_request_returns_reply() {
    let (transport, client) = setup(ClientOptions::default());
    transport.respond("greet", echo);

    let reply = client.request("greet", "hello", &Headers::new()).await.unwrap();

    assert_eq!(reply.topic, "greet.reply");
    assert_eq!(reply.text.as_deref(), Some("hello"));
    assert_eq!(reply.raw, Some(Bytes::from_static(b"hello")));
}

#[tokio::test(start_paused = true)]
async fn test_request_times_out_without_responder() {
    let (_, client) = setup(ClientOptions::default());
    let started = Instant::now();

    let result = client.request("nobody.home", "hello", &Headers::new()).await;

    assert!(started.elapsed() >= REQUEST_TIMEOUT);

    assert_matches!(
        result,
        Err(Error::Timeout { subject, timeout }) if subject == "nobody.home" && timeout == REQUEST_TIMEOUT
    );
    assert_eq!(REQUEST_TIMEOUT, Duration::from_secs(5));
}

#[tokio::test]
async fn test_request_headers_are_sent_with_the_request() {
    let (transport, client) = setup(ClientOptions::default());
    transport.respond("greet", echo);
    let headers = Headers::from([("X-Trace".to_string(), "abc".to_string())]);

    let reply = client.request("greet", "hello", &headers).await.unwrap();

    assert_eq!(reply.headers["X-Trace"], "abc");
    assert_eq!(reply.headers["Seen"], "1");
}

#[tokio::test]
async fn test_request_headers_can_be_merged_into_reply() {
    let (transport, client) = setup(ClientOptions {
        request_headers: RequestHeaders::MergeIntoResponse,
        ..ClientOptions::default()
    });
    transport.respond("greet", echo);
    let headers = Headers::from([("X-Trace".to_string(), "abc".to_string())]);

    let reply = client.request("greet", "hello", &headers).await.unwrap();

    assert_eq!(reply.headers["X-Trace"], "abc");
    assert_eq!(reply.headers["Seen"], "0");
}

#[tokio::test]
async fn test_ack_precedes_handler_by_default() {
    let (transport, client) = setup(ClientOptions::default());
    let observer = transport.clone();
    let (sender, mut receiver) = mpsc::unbounded_channel();
    let handler = move |message: Message| -> Result<(), HandlerError> {
        let acked = observer.calls().contains(&Call::Ack {
            subject: message.topic,
            sequence: 1,
        });
        sender.send(acked)?;
        Err("handler failure does not matter".into())
    };

    client.durable_setup(orders_stream()).await.unwrap();
    let _subscription = client
        .durable_subscribe("orders.>", handler)
        .await
        .unwrap();
    client
        .durable_publish("orders.created", "x")
        .await
        .unwrap();

    assert!(next(&mut receiver).await);
    assert!(
        !transport
            .calls()
            .iter()
            .any(|call| call.operation() == Operation::Nak)
    );
}

#[tokio::test]
async fn test_failed_handler_is_redelivered_after_handler_ack() {
    let (transport, client) = setup(ClientOptions {
        ack_policy: AckPolicy::AfterHandler,
        ..ClientOptions::default()
    });
    let attempts = Arc::new(AtomicUsize::new(0));
    let observer = transport.clone();
    let (sender, mut receiver) = mpsc::unbounded_channel();
    let handler = {
        let attempts = Arc::clone(&attempts);
        move |message: Message| -> Result<(), HandlerError> {
            let acked_early = observer
                .calls()
                .iter()
                .any(|call| call.operation() == Operation::Ack);
            if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err("first attempt fails".into());
            }
            sender.send((message, acked_early))?;
            Ok(())
        }
    };

    client.durable_setup(orders_stream()).await.unwrap();
    let _subscription = client
        .durable_subscribe("orders.created", handler)
        .await
        .unwrap();
    client
        .durable_publish("orders.created", "x")
        .await
        .unwrap();

    let (message, acked_early) = next(&mut receiver).await;
    assert_eq!(message.text.as_deref(), Some("x"));
    assert!(!acked_early);

    let ack = Call::Ack {
        subject: "orders.created".to_string(),
        sequence: 1,
    };
    wait_for_call(&transport, &ack).await;

    let settlements: Vec<_> = transport
        .calls()
        .into_iter()
        .filter(|call| matches!(call.operation(), Operation::Ack | Operation::Nak))
        .collect();
    assert_eq!(
        settlements,
        vec![
            Call::Nak {
                subject: "orders.created".to_string(),
                sequence: 1,
            },
            ack,
        ]
    );
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_release_stops_deliveries() {
    let (transport, client) = setup(ClientOptions::default());
    let (handler, mut receiver) = collector();

    let subscription = client.subscribe("orders.created", handler).await.unwrap();
    assert_eq!(subscription.subject(), "orders.created");

    client.publish("orders.created", "before").await.unwrap();
    assert_eq!(next(&mut receiver).await.text.as_deref(), Some("before"));

    subscription.release().await.unwrap();
    assert!(transport.calls().contains(&Call::Unsubscribe {
        subject: "orders.created".to_string()
    }));

    client.publish("orders.created", "after").await.unwrap();
    assert_matches!(receiver.recv().await, None);
}

#[tokio::test]
async fn test_transport_errors_pass_through() {
    let (transport, client) = setup(ClientOptions::default());
    let (handler, _receiver) = collector();

    transport.fail_next(Operation::Publish);
    assert_matches!(
        client.publish("orders.created", "x").await,
        Err(Error::Transport(MemoryError::Injected(Operation::Publish)))
    );

    transport.fail_next(Operation::Subscribe);
    assert_matches!(
        client.subscribe("orders.created", handler).await,
        Err(Error::Transport(MemoryError::Injected(Operation::Subscribe)))
    );

    transport.fail_next(Operation::Request);
    assert_matches!(
        client.request("greet", "x", &Headers::new()).await,
        Err(Error::Transport(MemoryError::Injected(Operation::Request)))
    );

    client.publish("orders.created", "x").await.unwrap();
}

#[tokio::test]
async fn test_stream_context_failure_is_prefixed() {
    let (transport, client) = setup(ClientOptions::default());

    transport.fail_next(Operation::AcquireDurable);
    let error = client
        .durable_publish("orders.created", "x")
        .await
        .unwrap_err();

    assert_matches!(
        error,
        Error::StreamContext(MemoryError::Injected(Operation::AcquireDurable))
    );
    assert!(
        error
            .to_string()
            .starts_with("cannot acquire stream context: ")
    );
    assert_eq!(
        transport.calls(),
        vec![Call::AcquireDurable],
        "nothing is published without a durable context"
    );
}

#[tokio::test]
async fn test_concurrent_publishes() {
    let (_, client) = setup(ClientOptions::default());
    let client = Arc::new(client);
    let (handler, mut receiver) = collector();

    let _subscription = client.subscribe("load.*", handler).await.unwrap();

    let tasks: Vec<_> = (0..16)
        .map(|n| {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.publish(&format!("load.{n}"), "x").await })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let mut topics = Vec::new();
    for _ in 0..16 {
        topics.push(next(&mut receiver).await.topic);
    }
    topics.sort();
    topics.dedup();
    assert_eq!(topics.len(), 16);
}

#[tokio::test]
async fn test_connect_validates_configuration() {
    assert_matches!(
        MemoryTransport::connect(&Configuration::default()),
        Err(ConfigurationError::NoServers)
    );

    let config = Configuration::from_json(
        r#"{ "servers": ["nats://localhost:4222"], "auth": { "strategy": "token" } }"#,
    )
    .unwrap();
    assert_matches!(
        MemoryTransport::connect(&config),
        Err(ConfigurationError::MissingToken)
    );

    let config = Configuration::from_json(r#"{ "servers": ["nats://localhost:4222"] }"#).unwrap();
    let client = MemoryTransport::connect(&config)
        .unwrap()
        .client(ClientOptions::default());
    assert!(client.is_connected());
}

#[tokio::test]
async fn test_panicking_handler_keeps_subscription_alive() {
    let (_, client) = setup(ClientOptions::default());
    let (sender, mut receiver) = mpsc::unbounded_channel();
    let handler = move |message: Message| -> Result<(), HandlerError> {
        assert_ne!(message.text.as_deref(), Some("boom"), "handler blew up");
        sender.send(message)?;
        Ok(())
    };

    let subscription = client.subscribe("events", handler).await.unwrap();
    client.publish("events", "boom").await.unwrap();
    client.publish("events", "fine").await.unwrap();

    assert_eq!(next(&mut receiver).await.text.as_deref(), Some("fine"));
    subscription.release().await.unwrap();
}

#[tokio::test]
async fn test_close_ends_existing_subscriptions() {
    let (transport, client) = setup(ClientOptions::default());
    let (handler, mut receiver) = collector();
    let (durable_handler, mut durable_receiver) = collector();

    client.durable_setup(orders_stream()).await.unwrap();
    let subscription = client.subscribe("events", handler).await.unwrap();
    let durable_subscription = client
        .durable_subscribe("orders.>", durable_handler)
        .await
        .unwrap();

    client.close().await.unwrap();

    let other = transport.client(ClientOptions::default());
    assert_matches!(
        other.publish("events", "late").await,
        Err(Error::Transport(MemoryError::Closed))
    );

    // Each delivery task ends and drops its handler, closing the channel.
    let ended = timeout(Duration::from_secs(1), receiver.recv()).await;
    assert_matches!(ended, Ok(None));
    let ended = timeout(Duration::from_secs(1), durable_receiver.recv()).await;
    assert_matches!(ended, Ok(None));

    subscription.release().await.unwrap();
    durable_subscription.release().await.unwrap();
}

#[tokio::test]
async fn test_panicking_durable_handler_is_still_acknowledged() {
    let (transport, client) = setup(ClientOptions::default());
    let (sender, mut receiver) = mpsc::unbounded_channel();
    let handler = move |message: Message| -> Result<(), HandlerError> {
        assert_ne!(message.text.as_deref(), Some("boom"), "handler blew up");
        sender.send(message)?;
        Ok(())
    };

    client.durable_setup(orders_stream()).await.unwrap();
    let _subscription = client
        .durable_subscribe("orders.>", handler)
        .await
        .unwrap();
    client
        .durable_publish("orders.created", "boom")
        .await
        .unwrap();
    client
        .durable_publish("orders.created", "fine")
        .await
        .unwrap();

    assert_eq!(next(&mut receiver).await.text.as_deref(), Some("fine"));

    let calls = transport.calls();
    assert!(calls.contains(&Call::Ack {
        subject: "orders.created".to_string(),
        sequence: 1,
    }));
    assert!(!calls.iter().any(|call| call.operation() == Operation::Nak));
}
