// Copyright (c) 2023 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use rill::{Client, ConnectOptions, QoS, Wait};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    std::env::set_var("RUST_LOG", "info");
    env_logger::init();

    let address = "127.0.0.1:1883";
    let options = ConnectOptions::new(address)?;
    log::info!("options: {options:?}");
    let client = Client::new(options);

    client
        .set_receive_notify(|depth| {
            log::info!("[on_receive] queued messages: {depth}");
        })
        .await?;

    client.connect(60, true, Wait::Forever).await?;
    client.subscribe("hello", QoS::AtMostOnce).await?;
    client
        .publish("hello", b"Hello, world", QoS::AtMostOnce, false, Wait::Forever)
        .await?;

    let mut topic = [0_u8; 256];
    let mut message = [0_u8; 1024];
    loop {
        match client.message_get(&mut topic, &mut message).await {
            Ok((topic_len, message_len)) => {
                log::info!(
                    "topic: {}, message: {}",
                    String::from_utf8_lossy(&topic[..topic_len]),
                    String::from_utf8_lossy(&message[..message_len]),
                );
                break;
            }
            Err(_err) => tokio::time::sleep(std::time::Duration::from_millis(100)).await,
        }
    }

    client.disconnect().await?;
    Ok(())
}
