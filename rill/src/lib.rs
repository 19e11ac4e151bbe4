// Copyright (c) 2023 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Rill is an MQTT 3.1.1 client library.
//!
//! The protocol engine runs as a tokio task which owns the transport,
//! the in-flight queues and the keepalive timer; [`Client`] is a cheap
//! handle that forwards calls to it. Supported transports are plain
//! TCP, TLS, WebSocket and TLS over WebSocket. QoS 0 and QoS 1 delivery
//! are supported; QoS 2 publishes are rejected with
//! [`ErrorKind::QoS2NotSupported`].

pub mod client;
mod command;
pub mod connect_options;
mod engine;
pub mod error;
mod inflight;
mod keepalive;
pub mod status;
mod stream;

pub use client::{
    AckCallback, Client, ConnectCallback, DisconnectCallback, PacketCallback, ReceiveCallback,
    Wait,
};
pub use connect_options::{
    ConnectOptions, ConnectType, MqttConnect, MqttsConnect, TlsType, WillMessage, WsConnect,
    WssConnect,
};
pub use error::{Error, ErrorKind};
pub use inflight::PendingRequest;
pub use status::ClientStatus;

pub use codec::{ConnectReturnCode, PacketId, PacketType, QoS};
