// Copyright (c) 2023 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Connect/disconnect over a WebSocket transport.

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

use rill::{Client, ClientStatus, ConnectOptions, ConnectType, Wait, WsConnect};

#[tokio::test]
async fn websocket_connect_roundtrip() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws_stream = tokio_tungstenite::accept_async(stream).await.unwrap();

        // CONNECT arrives as one binary frame.
        let msg = ws_stream.next().await.unwrap().unwrap();
        let Message::Binary(frame) = msg else {
            panic!("expected a binary frame, got: {msg:?}");
        };
        assert_eq!(frame[0], 0x10);

        ws_stream
            .send(Message::Binary(vec![0x20, 0x02, 0x00, 0x00]))
            .await
            .unwrap();

        // DISCONNECT, also binary.
        let msg = ws_stream.next().await.unwrap().unwrap();
        assert_eq!(msg.into_data(), vec![0xe0, 0x00]);
    });

    let mut options = ConnectOptions::default();
    options.set_connect_type(ConnectType::Ws(WsConnect {
        address: addr,
        host: addr.to_string(),
        path: "/mqtt".to_string(),
    }));
    let client = Client::new(options);

    client.connect(60, true, Wait::Forever).await.unwrap();
    assert_eq!(client.status().await.unwrap(), ClientStatus::Connected);
    client.disconnect().await.unwrap();
    server.await.unwrap();
}
