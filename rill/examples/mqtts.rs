// Copyright (c) 2023 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::net::ToSocketAddrs;

use rill::{
    Client, ConnectOptions, ConnectType, MqttsConnect, QoS, TlsType, Wait,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    std::env::set_var("RUST_LOG", "info");
    env_logger::init();

    let domain = "test.mosquitto.org";
    let address = (domain, 8883)
        .to_socket_addrs()?
        .next()
        .expect("failed to resolve broker address");

    let mut options = ConnectOptions::default();
    options.set_connect_type(ConnectType::Mqtts(MqttsConnect {
        address,
        domain: domain.to_string(),
        tls_type: TlsType::CASigned,
    }));
    let client = Client::new(options);

    client.connect(60, true, Wait::Forever).await?;
    client
        .publish("hello", b"Hello, tls", QoS::AtLeastOnce, false, Wait::Forever)
        .await?;
    client.disconnect().await?;
    Ok(())
}
