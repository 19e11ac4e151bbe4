// Copyright (c) 2023 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use rill::{Client, ConnectOptions, ConnectType, QoS, Wait, WsConnect};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    std::env::set_var("RUST_LOG", "info");
    env_logger::init();

    let mut options = ConnectOptions::default();
    options.set_connect_type(ConnectType::Ws(WsConnect {
        address: "127.0.0.1:8083".parse()?,
        host: "localhost:8083".to_string(),
        path: "/mqtt".to_string(),
    }));
    let client = Client::new(options);

    client.connect(60, true, Wait::Forever).await?;
    client.subscribe("hello", QoS::AtMostOnce).await?;
    client
        .publish("hello", b"Hello, websocket", QoS::AtMostOnce, false, Wait::Forever)
        .await?;
    client.disconnect().await?;
    Ok(())
}
