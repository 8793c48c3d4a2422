//! Integration tests for the WebSocket relay client.
//!
//! Each test runs a scripted relay server on a random local port and
//! drives a real client against it.

#[cfg(feature = "websocket")]
mod websocket {
    use futures_util::{SinkExt, StreamExt};
    use playlink_protocol::{InputEvent, InputKind, PeerId, RelayFrame};
    use playlink_transport::{
        RelayEvent, SignalingConnection, SignalingRelay, SignalingServer, TransportError,
        WebSocketRelay,
    };
    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::Message;

    type ServerWs = tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>;

    async fn listen() -> (TcpListener, SignalingServer) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("should bind");
        let port = listener.local_addr().unwrap().port();
        (listener, SignalingServer::insecure("local", "127.0.0.1", port))
    }

    async fn accept(listener: &TcpListener) -> ServerWs {
        let (stream, _) = listener.accept().await.expect("should accept");
        tokio_tungstenite::accept_async(stream)
            .await
            .expect("handshake should succeed")
    }

    async fn read_frame(ws: &mut ServerWs) -> RelayFrame {
        loop {
            match ws.next().await.expect("client should send").expect("valid message") {
                Message::Text(text) => {
                    let frame: RelayFrame = serde_json::from_str(text.as_str()).unwrap();
                    if frame != RelayFrame::Heartbeat {
                        return frame;
                    }
                }
                _ => continue,
            }
        }
    }

    async fn write_frame(ws: &mut ServerWs, frame: &RelayFrame) {
        let text = serde_json::to_string(frame).unwrap();
        ws.send(Message::Text(text.into())).await.unwrap();
    }

    #[tokio::test]
    async fn test_open_registers_and_relays_peer_traffic() {
        let (listener, server) = listen().await;
        let input = InputEvent::new(InputKind::Press, "Enter", "Enter", 77);
        let input_json = serde_json::to_value(&input).unwrap();

        let relay_task = tokio::spawn(async move {
            let mut ws = accept(&listener).await;
            let id = match read_frame(&mut ws).await {
                RelayFrame::Register { id } => id,
                other => panic!("expected REGISTER, got {other:?}"),
            };
            write_frame(&mut ws, &RelayFrame::Registered { id }).await;
            write_frame(&mut ws, &RelayFrame::Incoming { peer: PeerId::from("p1") }).await;
            write_frame(
                &mut ws,
                &RelayFrame::Data {
                    peer: PeerId::from("p1"),
                    payload: input_json,
                },
            )
            .await;
            read_frame(&mut ws).await
        });

        let relay = WebSocketRelay::default();
        let mut opened = relay
            .open(&PeerId::from("host-ABC234-u1-1"), &server)
            .await
            .expect("should register");
        assert_eq!(opened.assigned_id.as_str(), "host-ABC234-u1-1");

        assert_eq!(
            opened.events.recv().await,
            Some(RelayEvent::IncomingConnection(PeerId::from("p1")))
        );
        match opened.events.recv().await {
            Some(RelayEvent::Data { peer, payload }) => {
                assert_eq!(peer.as_str(), "p1");
                let back: InputEvent = serde_json::from_value(payload).unwrap();
                assert_eq!(back, input);
            }
            other => panic!("expected data, got {other:?}"),
        }

        opened
            .connection
            .send(&PeerId::from("p1"), serde_json::json!({"hello": "peer"}))
            .unwrap();
        match relay_task.await.unwrap() {
            RelayFrame::Data { peer, payload } => {
                assert_eq!(peer.as_str(), "p1");
                assert_eq!(payload["hello"], "peer");
            }
            other => panic!("expected DATA, got {other:?}"),
        }

        opened.connection.close();
        opened.connection.close();
    }

    #[tokio::test]
    async fn test_open_id_taken_is_server_failure() {
        let (listener, server) = listen().await;
        tokio::spawn(async move {
            let mut ws = accept(&listener).await;
            if let RelayFrame::Register { id } = read_frame(&mut ws).await {
                write_frame(&mut ws, &RelayFrame::IdTaken { id }).await;
            }
        });

        let err = WebSocketRelay::default()
            .open(&PeerId::from("dup"), &server)
            .await
            .err()
            .expect("should be refused");
        assert!(matches!(err, TransportError::IdTaken(_)));
        assert!(err.is_server_failure());
    }

    #[tokio::test]
    async fn test_open_unreachable_server_is_server_failure() {
        let (listener, server) = listen().await;
        drop(listener);

        let err = WebSocketRelay::default()
            .open(&PeerId::from("h"), &server)
            .await
            .err()
            .expect("nothing is listening");
        assert!(err.is_server_failure(), "{err}");
    }

    #[tokio::test]
    async fn test_server_expire_surfaces_identity_expired() {
        let (listener, server) = listen().await;
        tokio::spawn(async move {
            let mut ws = accept(&listener).await;
            if let RelayFrame::Register { id } = read_frame(&mut ws).await {
                write_frame(&mut ws, &RelayFrame::Registered { id }).await;
                write_frame(&mut ws, &RelayFrame::Expire).await;
            }
            // Keep the socket open until the client goes away.
            while ws.next().await.is_some() {}
        });

        let mut opened = WebSocketRelay::default()
            .open(&PeerId::from("h"), &server)
            .await
            .unwrap();
        assert_eq!(opened.events.recv().await, Some(RelayEvent::IdentityExpired));
        opened.connection.close();
    }
}
