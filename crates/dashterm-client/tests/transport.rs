//! Transport session lifecycle over an in-memory WebSocket.

mod common;

use std::time::Duration;

use bytes::Bytes;
use common::{next_binary, socket_pair};
use dashterm_client::{Error, SessionState, TransportEvent, TransportSession};
use futures_util::SinkExt as _;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

#[tokio::test]
async fn test_send_requires_open() {
    let (client, _server) = socket_pair().await;
    let mut session = TransportSession::attach(client);

    assert_eq!(session.state(), SessionState::Connecting);
    assert!(matches!(
        session.send(Bytes::from_static(b"\x00x")),
        Err(Error::NotConnected)
    ));

    assert_eq!(session.next_event().await, Some(TransportEvent::Open));
    assert_eq!(session.state(), SessionState::Open);
}

#[tokio::test]
async fn test_frames_flow_both_ways() {
    let (client, mut server) = socket_pair().await;
    let mut session = TransportSession::attach(client);
    assert_eq!(session.next_event().await, Some(TransportEvent::Open));

    session.send(Bytes::from_static(b"\x00ls\r")).unwrap();
    assert_eq!(next_binary(&mut server).await.unwrap(), b"\x00ls\r");

    server
        .send(Message::binary(&b"\x1b[32mok\x1b[0m"[..]))
        .await
        .unwrap();
    assert_eq!(
        session.next_event().await,
        Some(TransportEvent::Message(Bytes::from_static(b"\x1b[32mok\x1b[0m")))
    );

    // Text frames are delivered as their bytes.
    server.send(Message::text("hello")).await.unwrap();
    assert_eq!(
        session.next_event().await,
        Some(TransportEvent::Message(Bytes::from_static(b"hello")))
    );
}

#[tokio::test]
async fn test_remote_close_is_final() {
    let (client, mut server) = socket_pair().await;
    let mut session = TransportSession::attach(client);
    assert_eq!(session.next_event().await, Some(TransportEvent::Open));

    server
        .close(Some(CloseFrame {
            code: CloseCode::Normal,
            reason: "session ended".into(),
        }))
        .await
        .unwrap();

    assert_eq!(
        session.next_event().await,
        Some(TransportEvent::Closed(Some("session ended".to_string())))
    );
    assert_eq!(session.next_event().await, None);
    assert_eq!(session.state(), SessionState::Closed);
    assert!(matches!(
        session.send(Bytes::from_static(b"\x00x")),
        Err(Error::NotConnected)
    ));
}

#[tokio::test]
async fn test_local_close_is_idempotent() {
    let (client, mut server) = socket_pair().await;
    let mut session = TransportSession::attach(client);
    assert_eq!(session.next_event().await, Some(TransportEvent::Open));

    session.close();
    session.close();
    assert_eq!(session.state(), SessionState::Closed);

    let mut closed = 0;
    while let Some(event) = session.next_event().await {
        assert!(matches!(event, TransportEvent::Closed(_)));
        closed += 1;
    }
    assert_eq!(closed, 1);
    assert_eq!(next_binary(&mut server).await, None);
}

#[tokio::test]
async fn test_close_before_handshake_never_opens() {
    let (client, _server) = socket_pair().await;
    let mut session = TransportSession::attach(client);
    session.close();

    assert_eq!(session.next_event().await, Some(TransportEvent::Closed(None)));
    assert_eq!(session.next_event().await, None);
}

#[tokio::test]
async fn test_send_flushed_waits_for_the_socket() {
    let (client, mut server) = socket_pair().await;
    let mut session = TransportSession::attach(client);
    assert_eq!(session.next_event().await, Some(TransportEvent::Open));

    // Larger than the in-memory pipe, so it only drains as the server reads.
    let frame = Bytes::from(vec![0x5a; 256 * 1024]);
    let flushed = session.send_flushed(frame.clone());
    tokio::pin!(flushed);
    assert!(
        tokio::time::timeout(Duration::from_millis(100), &mut flushed)
            .await
            .is_err()
    );

    let (result, received) = tokio::join!(flushed, next_binary(&mut server));
    result.unwrap();
    assert_eq!(received.unwrap(), frame.to_vec());

    session.close();
    assert!(matches!(
        session.send_flushed(Bytes::from_static(b"x")).await,
        Err(Error::NotConnected)
    ));
}
