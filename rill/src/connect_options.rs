// Copyright (c) 2023 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::PathBuf;
use std::time::Duration;

use codec::utils::random_client_id;
use codec::QoS;

/// Default MQTT port for plain TCP connections.
pub const DEFAULT_PORT: u16 = 1883;

/// Default MQTT port for TLS connections.
pub const DEFAULT_TLS_PORT: u16 = 8883;

/// Default port for TLS over WebSocket connections.
pub const DEFAULT_WSS_PORT: u16 = 443;

/// Sub-protocol announced during the WebSocket upgrade.
pub const WEBSOCKET_SUB_PROTOCOL: &str = "mqtt";

/// How the TLS peer certificate chain is validated.
#[derive(Clone, Debug)]
pub enum TlsType {
    /// Signed by a root CA from the system trust set, like
    /// `Let's Encrypt`.
    CASigned,

    /// Self signed root certificate, loaded from a PEM file.
    SelfSigned(PathBuf),
}

#[derive(Clone, Debug)]
pub struct MqttConnect {
    pub address: SocketAddr,
}

#[derive(Clone, Debug)]
pub struct MqttsConnect {
    pub address: SocketAddr,

    /// Domain name presented during the TLS handshake.
    pub domain: String,

    pub tls_type: TlsType,
}

#[derive(Clone, Debug)]
pub struct WsConnect {
    pub address: SocketAddr,

    /// Host part of the upgrade request URI.
    pub host: String,

    /// Path part of the upgrade request URI, e.g. `/mqtt`.
    pub path: String,
}

#[derive(Clone, Debug)]
pub struct WssConnect {
    pub address: SocketAddr,
    pub domain: String,
    pub tls_type: TlsType,
    pub path: String,
}

/// Transport stack used to reach the server.
#[derive(Clone, Debug)]
pub enum ConnectType {
    /// Plain TCP, default port 1883.
    Mqtt(MqttConnect),

    /// TLS over TCP, default port 8883.
    Mqtts(MqttsConnect),

    /// WebSocket over TCP.
    Ws(WsConnect),

    /// WebSocket over TLS, default port 443.
    Wss(WssConnect),
}

/// Will message stored by the server and published on an ungraceful
/// disconnect of this client.
#[derive(Clone, Debug)]
pub struct WillMessage {
    topic: String,
    message: Vec<u8>,
    qos: QoS,
    retain: bool,
}

impl WillMessage {
    #[must_use]
    pub fn new(topic: &str, message: &[u8], qos: QoS, retain: bool) -> Self {
        Self {
            topic: topic.to_owned(),
            message: message.to_vec(),
            qos,
            retain,
        }
    }

    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    #[must_use]
    pub fn message(&self) -> &[u8] {
        &self.message
    }

    #[must_use]
    pub const fn qos(&self) -> QoS {
        self.qos
    }

    #[must_use]
    pub const fn retain(&self) -> bool {
        self.retain
    }
}

/// Connection configuration of a client.
///
/// Keepalive interval and the clean-session flag are not part of this
/// struct; they are negotiated per session and passed to
/// `Client::connect()`.
#[derive(Clone, Debug)]
pub struct ConnectOptions {
    connect_type: ConnectType,
    client_id: String,
    connect_timeout: Duration,
    ping_timeout: Duration,
    timer_tick: Duration,
    transmit_queue_depth: Option<usize>,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            connect_type: ConnectType::Mqtt(MqttConnect {
                address: SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT)),
            }),
            client_id: random_client_id(),
            connect_timeout: Duration::from_secs(10),
            ping_timeout: Duration::from_secs(1),
            timer_tick: Duration::from_secs(1),
            transmit_queue_depth: None,
        }
    }
}

impl ConnectOptions {
    /// Create options for a plain TCP connection to `address`, with a
    /// random client id.
    ///
    /// # Errors
    ///
    /// Returns error if `address` does not resolve.
    pub fn new<A: ToSocketAddrs>(address: A) -> io::Result<Self> {
        let address = address
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "no socket address"))?;
        Ok(Self {
            connect_type: ConnectType::Mqtt(MqttConnect { address }),
            ..Self::default()
        })
    }

    pub fn set_connect_type(&mut self, connect_type: ConnectType) -> &mut Self {
        self.connect_type = connect_type;
        self
    }

    #[must_use]
    pub const fn connect_type(&self) -> &ConnectType {
        &self.connect_type
    }

    /// Update WebSocket host and URI path.
    ///
    /// Only meaningful for the `Ws` and `Wss` connect types; ignored
    /// otherwise.
    pub fn set_websocket(&mut self, host: &str, path: &str) -> &mut Self {
        match &mut self.connect_type {
            ConnectType::Ws(ws) => {
                ws.host = host.to_owned();
                ws.path = path.to_owned();
            }
            ConnectType::Wss(wss) => {
                wss.domain = host.to_owned();
                wss.path = path.to_owned();
            }
            _ => log::warn!("connect_options: not a websocket transport"),
        }
        self
    }

    pub fn set_client_id(&mut self, client_id: &str) -> &mut Self {
        self.client_id = client_id.to_owned();
        self
    }

    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Time limit for establishing the transport and, with a waiting
    /// connect, receiving the ConnectAck.
    pub fn set_connect_timeout(&mut self, connect_timeout: Duration) -> &mut Self {
        self.connect_timeout = connect_timeout;
        self
    }

    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Time allowed for the server to answer a ping request before the
    /// session is torn down.
    pub fn set_ping_timeout(&mut self, ping_timeout: Duration) -> &mut Self {
        self.ping_timeout = ping_timeout;
        self
    }

    #[must_use]
    pub const fn ping_timeout(&self) -> Duration {
        self.ping_timeout
    }

    /// Period of the keepalive timer.
    pub fn set_timer_tick(&mut self, timer_tick: Duration) -> &mut Self {
        self.timer_tick = timer_tick;
        self
    }

    #[must_use]
    pub const fn timer_tick(&self) -> Duration {
        self.timer_tick
    }

    /// Limit the number of unacknowledged outbound requests. Exceeding
    /// the limit fails the operation with `QueueFull`.
    pub fn set_transmit_queue_depth(&mut self, depth: usize) -> &mut Self {
        self.transmit_queue_depth = Some(depth);
        self
    }

    #[must_use]
    pub const fn transmit_queue_depth(&self) -> Option<usize> {
        self.transmit_queue_depth
    }
}
