use super::link::TransportError;
use super::message::{DeliveryToken, RawMessage};
use super::session::{Transport, TransportState};
use super::testing::ScriptedLink;
use crate::utils::backoff::Backoff;
use tokio_util::sync::CancellationToken;

fn backoff() -> Backoff {
    Backoff::from_millis(100, 1_000, 2.0)
}

fn connect_failure() -> TransportError {
    TransportError::ConnectFailure {
        reason: "connection refused".to_string(),
    }
}

#[tokio::test(start_paused = true)]
async fn test_start_connects_and_subscribes() {
    let (link, handle) = ScriptedLink::new();
    let mut transport = Transport::new(link, "water-meter/data", backoff(), 3);
    let shutdown = CancellationToken::new();

    assert_eq!(transport.state(), TransportState::Disconnected);
    assert!(transport.start(&shutdown).await.unwrap());
    assert_eq!(transport.state(), TransportState::Connected);
    assert_eq!(handle.connects(), 1);
    assert_eq!(handle.subscribes(), vec!["water-meter/data".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_start_retries_connect_failures() {
    let (link, handle) = ScriptedLink::new();
    let link = link.with_connect_results([Err(connect_failure()), Err(connect_failure())]);
    let mut transport = Transport::new(link, "t", backoff(), 3);

    assert!(transport.start(&CancellationToken::new()).await.unwrap());
    assert_eq!(handle.connects(), 3);
    assert_eq!(transport.state(), TransportState::Connected);
}

#[tokio::test(start_paused = true)]
async fn test_start_gives_up_after_startup_attempts() {
    let (link, handle) = ScriptedLink::new();
    let link = link.with_connect_results((0..5).map(|_| Err(connect_failure())));
    let mut transport = Transport::new(link, "t", backoff(), 2);

    let err = transport.start(&CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, TransportError::ConnectFailure { .. }));
    assert_eq!(handle.connects(), 2);
    assert_eq!(transport.state(), TransportState::Failed);
}

#[tokio::test(start_paused = true)]
async fn test_refused_handshake_is_fatal_at_startup() {
    let (link, handle) = ScriptedLink::new();
    let link = link.with_connect_results([Err(TransportError::ConnectRefused {
        reason: "BadUserNamePassword".to_string(),
    })]);
    let mut transport = Transport::new(link, "t", backoff(), 5);

    let err = transport.start(&CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, TransportError::ConnectRefused { .. }));
    assert_eq!(handle.connects(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_subscribe_failure_is_fatal() {
    let (link, _handle) = ScriptedLink::new();
    let link = link.with_subscribe_results([Err(TransportError::SubscribeFailure {
        topic: "t".to_string(),
        reason: "not authorized".to_string(),
    })]);
    let mut transport = Transport::new(link, "t", backoff(), 5);

    let err = transport.start(&CancellationToken::new()).await.unwrap_err();
    assert!(err.is_fatal());
    assert_eq!(transport.state(), TransportState::Failed);
}

#[tokio::test(start_paused = true)]
async fn test_messages_flow_in_arrival_order() {
    let (link, handle) = ScriptedLink::new();
    let mut transport = Transport::new(link, "t", backoff(), 1);
    let shutdown = CancellationToken::new();
    transport.start(&shutdown).await.unwrap();

    handle.publish(r#"{"n":1}"#);
    handle.publish(r#"{"n":2}"#);

    let first = transport.next_message(&shutdown).await.unwrap().unwrap();
    let second = transport.next_message(&shutdown).await.unwrap().unwrap();
    assert_eq!(first.payload, br#"{"n":1}"#);
    assert_eq!(second.payload, br#"{"n":2}"#);
}

#[tokio::test(start_paused = true)]
async fn test_link_loss_reconnects_and_resubscribes() {
    let (link, handle) = ScriptedLink::new();
    // first reconnect attempt fails, second succeeds
    let link = link.with_connect_results([Ok(()), Err(connect_failure())]);
    let mut transport = Transport::new(link, "t", backoff(), 1);
    let shutdown = CancellationToken::new();
    transport.start(&shutdown).await.unwrap();

    handle.publish(r#"{"before":true}"#);
    handle.drop_link("keep-alive timeout");
    handle.publish(r#"{"after":true}"#);

    let before = transport.next_message(&shutdown).await.unwrap().unwrap();
    assert_eq!(before.payload, br#"{"before":true}"#);

    let after = transport.next_message(&shutdown).await.unwrap().unwrap();
    assert_eq!(after.payload, br#"{"after":true}"#);

    assert_eq!(transport.state(), TransportState::Connected);
    assert_eq!(transport.reconnects(), 1);
    assert_eq!(handle.connects(), 3);
    assert_eq!(handle.subscribes().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_resubscribe_failure_after_reconnect_is_fatal() {
    let (link, handle) = ScriptedLink::new();
    let link = link.with_subscribe_results([
        Ok(()),
        Err(TransportError::SubscribeFailure {
            topic: "t".to_string(),
            reason: "topic revoked".to_string(),
        }),
    ]);
    let mut transport = Transport::new(link, "t", backoff(), 1);
    let shutdown = CancellationToken::new();
    transport.start(&shutdown).await.unwrap();

    handle.drop_link("broker restart");
    let err = transport.next_message(&shutdown).await.unwrap_err();
    assert!(matches!(err, TransportError::SubscribeFailure { .. }));
    assert_eq!(transport.state(), TransportState::Failed);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_interrupts_reconnect_backoff() {
    let (link, handle) = ScriptedLink::new();
    let link = link.with_connect_results(
        std::iter::once(Ok(())).chain((0..100).map(|_| Err(connect_failure()))),
    );
    let mut transport = Transport::new(link, "t", backoff(), 1);
    let shutdown = CancellationToken::new();
    transport.start(&shutdown).await.unwrap();

    handle.drop_link("network down");
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_secs(5)).await;
        trigger.cancel();
    });

    let result = transport.next_message(&shutdown).await.unwrap();
    assert!(result.is_none());
    assert!(matches!(
        transport.state(),
        TransportState::Reconnecting { .. }
    ));
}

#[tokio::test(start_paused = true)]
async fn test_acknowledge_forwards_tokens_only_when_present() {
    let (link, handle) = ScriptedLink::new();
    let mut transport = Transport::new(link, "t", backoff(), 1);
    transport.start(&CancellationToken::new()).await.unwrap();

    let token = DeliveryToken {
        packet_id: 7,
        qos: 1,
    };
    transport.acknowledge(None).await;
    transport.acknowledge(Some(token)).await;

    assert_eq!(handle.acks(), vec![token]);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_releases_link() {
    let (link, handle) = ScriptedLink::new();
    let mut transport = Transport::new(link, "t", backoff(), 1);
    transport.start(&CancellationToken::new()).await.unwrap();

    transport.disconnect().await;
    assert_eq!(handle.disconnects(), 1);
    assert_eq!(transport.state(), TransportState::Disconnected);

    let err = transport
        .next_message(&CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::NotConnected));
}

#[test]
fn test_raw_message_builder() {
    let token = DeliveryToken {
        packet_id: 1,
        qos: 2,
    };
    let raw = RawMessage::new("topic", "payload").with_token(token);
    assert_eq!(raw.topic, "topic");
    assert_eq!(raw.payload, b"payload");
    assert_eq!(raw.token, Some(token));
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_after_fatal_resubscribe_closes_open_link() {
    let (link, handle) = ScriptedLink::new();
    let link = link.with_subscribe_results([
        Ok(()),
        Err(TransportError::SubscribeFailure {
            topic: "t".to_string(),
            reason: "not authorized".to_string(),
        }),
    ]);
    let mut transport = Transport::new(link, "t", backoff(), 1);
    let shutdown = CancellationToken::new();
    transport.start(&shutdown).await.unwrap();

    handle.drop_link("broker restarted");
    let err = transport.next_message(&shutdown).await.unwrap_err();
    assert!(matches!(err, TransportError::SubscribeFailure { .. }));
    assert_eq!(transport.state(), TransportState::Failed);

    transport.disconnect().await;
    assert_eq!(handle.disconnects(), 1);
    assert_eq!(transport.state(), TransportState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_skips_lost_link() {
    let (link, handle) = ScriptedLink::new();
    let link = link.with_connect_results([Ok(()), Err(connect_failure())]);
    let mut transport = Transport::new(link, "t", backoff(), 1);
    let shutdown = CancellationToken::new();
    transport.start(&shutdown).await.unwrap();

    handle.drop_link("connection reset");
    let pending = {
        let next = transport.next_message(&shutdown);
        tokio::pin!(next);
        tokio::select! {
            _ = &mut next => false,
            _ = tokio::time::sleep(std::time::Duration::from_millis(150)) => true,
        }
    };
    assert!(pending);
    assert!(matches!(transport.state(), TransportState::Reconnecting { .. }));

    transport.disconnect().await;
    assert_eq!(handle.disconnects(), 0);
}
