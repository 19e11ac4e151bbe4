// Copyright (c) 2023 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Public client handle.
//!
//! [`Client`] is a thin sender half of the engine mailbox; it can be
//! called from any task. All protocol work happens on the engine task
//! spawned by [`Client::new`].

use bytes::Bytes;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

use codec::{PacketId, PacketType, QoS};

use crate::command::EngineCmd;
use crate::connect_options::{ConnectOptions, WillMessage};
use crate::engine::Engine;
use crate::error::{Error, ErrorKind};
use crate::inflight::PendingRequest;
use crate::status::ClientStatus;

/// Called with the receive-queue depth each time a publish arrives.
pub type ReceiveCallback = Box<dyn FnMut(usize) + Send>;

/// Called with the outcome of a non-waiting connect.
pub type ConnectCallback = Box<dyn FnMut(Result<(), Error>) + Send>;

/// Called once per session when the session ends.
pub type DisconnectCallback = Box<dyn FnMut() + Send>;

/// Called when an acknowledgement releases an in-flight request.
pub type AckCallback = Box<dyn FnMut(PacketType, PacketId, &PendingRequest) + Send>;

/// Raw tap over every complete inbound packet, invoked before normal
/// processing. Returning `true` consumes the packet.
pub type PacketCallback = Box<dyn FnMut(&[u8]) -> bool + Send>;

/// How long an API call may suspend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wait {
    /// Do not wait for the operation to complete; the call resolves
    /// once the request is written to the transport.
    NoWait,

    /// Wait until the operation completes.
    Forever,

    /// Wait up to the given duration, then fail with `Timeout`. Bytes
    /// already written are not rolled back; an in-flight entry stays
    /// queued and may still be acknowledged.
    Timeout(Duration),
}

/// Handle to one MQTT client.
///
/// Clones share the same session. Dropping every handle shuts the
/// engine down; [`Client::delete`] does so explicitly.
#[derive(Clone)]
pub struct Client {
    sender: mpsc::Sender<EngineCmd>,
}

/// Commands queued towards the engine before it applies backpressure.
const COMMAND_QUEUE_SIZE: usize = 32;

impl Client {
    /// Create a client and spawn its engine task.
    ///
    /// Must be called within a tokio runtime.
    #[must_use]
    pub fn new(options: ConnectOptions) -> Self {
        let (sender, receiver) = mpsc::channel(COMMAND_QUEUE_SIZE);
        let engine = Engine::new(options, receiver);
        tokio::spawn(engine.run_loop());
        Self { sender }
    }

    /// Open a session: establish the transport and send CONNECT.
    ///
    /// `keep_alive` is in seconds, 0 disables keepalive. With
    /// `Wait::NoWait` the call returns once the CONNECT packet is
    /// written and the CONNACK outcome is reported through the
    /// connect-result callback; otherwise the call resolves on CONNACK.
    ///
    /// # Errors
    ///
    /// Returns error if the client is not idle, the transport fails,
    /// or the server refuses the connection
    /// (`ErrorKind::ConnectionRefused`).
    pub async fn connect(
        &self,
        keep_alive: u16,
        clean_session: bool,
        wait: Wait,
    ) -> Result<(), Error> {
        let (tx, rx) = oneshot::channel();
        let wait_for_ack = wait != Wait::NoWait;
        self.send_cmd(EngineCmd::Connect {
            keep_alive,
            clean_session,
            wait_for_ack,
            reply: tx,
        })
        .await?;
        Self::wait_reply(rx, wait).await
    }

    /// Publish an application message.
    ///
    /// A QoS 1 publish is queued until the matching PUBACK arrives; the
    /// ack callback reports the release. The call itself resolves once
    /// the packet is written.
    ///
    /// # Errors
    ///
    /// Returns error if not connected, on `QoS2NotSupported`, or
    /// `QueueFull` when the transmit queue limit is reached.
    pub async fn publish(
        &self,
        topic: &str,
        message: &[u8],
        qos: QoS,
        retain: bool,
        wait: Wait,
    ) -> Result<(), Error> {
        if topic.is_empty() {
            return Err(Error::new(ErrorKind::InvalidParameter, "Topic is empty"));
        }
        if qos == QoS::ExactOnce {
            return Err(Error::new(
                ErrorKind::QoS2NotSupported,
                "QoS 2 delivery is not supported",
            ));
        }
        let (tx, rx) = oneshot::channel();
        self.send_cmd(EngineCmd::Publish {
            topic: topic.to_owned(),
            message: Bytes::copy_from_slice(message),
            qos,
            retain,
            reply: tx,
        })
        .await?;
        Self::wait_reply(rx, wait).await
    }

    /// Subscribe to a topic filter with QoS 0 or 1.
    ///
    /// The call resolves once the SUBSCRIBE packet is written; the
    /// SUBACK is reported through the ack callback. A request still
    /// unacknowledged when the session ends is dropped, not
    /// retransmitted; re-subscribe after reconnecting.
    ///
    /// # Errors
    ///
    /// Returns error if not connected or on `QoS2NotSupported`.
    pub async fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), Error> {
        if topic.is_empty() {
            return Err(Error::new(ErrorKind::InvalidParameter, "Topic is empty"));
        }
        if qos == QoS::ExactOnce {
            return Err(Error::new(
                ErrorKind::QoS2NotSupported,
                "QoS 2 delivery is not supported",
            ));
        }
        let (tx, rx) = oneshot::channel();
        self.send_cmd(EngineCmd::Subscribe {
            topic: topic.to_owned(),
            qos,
            reply: tx,
        })
        .await?;
        Self::wait_reply(rx, Wait::Forever).await
    }

    /// Unsubscribe from a topic filter.
    ///
    /// # Errors
    ///
    /// Returns error if not connected.
    pub async fn unsubscribe(&self, topic: &str) -> Result<(), Error> {
        if topic.is_empty() {
            return Err(Error::new(ErrorKind::InvalidParameter, "Topic is empty"));
        }
        let (tx, rx) = oneshot::channel();
        self.send_cmd(EngineCmd::Unsubscribe {
            topic: topic.to_owned(),
            reply: tx,
        })
        .await?;
        Self::wait_reply(rx, Wait::Forever).await
    }

    /// Close the session. Idempotent: calling it while idle is a
    /// no-op returning success, without emitting DISCONNECT.
    ///
    /// # Errors
    ///
    /// Returns error if the engine has terminated.
    pub async fn disconnect(&self) -> Result<(), Error> {
        let (tx, rx) = oneshot::channel();
        self.send_cmd(EngineCmd::Disconnect { reply: tx }).await?;
        Self::wait_reply(rx, Wait::Forever).await
    }

    /// Drain one received message into caller buffers.
    ///
    /// Returns `(topic_length, message_length)`.
    ///
    /// # Errors
    ///
    /// Returns `NoMessage` if nothing is queued and
    /// `InsufficientBuffer` if either buffer is too small, leaving the
    /// message queued.
    pub async fn message_get(
        &self,
        topic_buffer: &mut [u8],
        message_buffer: &mut [u8],
    ) -> Result<(usize, usize), Error> {
        let (tx, rx) = oneshot::channel();
        self.send_cmd(EngineCmd::MessageGet {
            topic_capacity: topic_buffer.len(),
            message_capacity: message_buffer.len(),
            reply: tx,
        })
        .await?;
        let (topic, message) = rx.await??;
        topic_buffer[..topic.len()].copy_from_slice(&topic);
        message_buffer[..message.len()].copy_from_slice(&message);
        Ok((topic.len(), message.len()))
    }

    /// Current lifecycle status.
    ///
    /// # Errors
    ///
    /// Returns error if the engine has terminated.
    pub async fn status(&self) -> Result<ClientStatus, Error> {
        let (tx, rx) = oneshot::channel();
        self.send_cmd(EngineCmd::Status { reply: tx }).await?;
        rx.await.map_err(Into::into)
    }

    /// Set the username and optional password sent with the next
    /// CONNECT. Session scoped: cleared when the session ends.
    ///
    /// # Errors
    ///
    /// Returns error on empty or oversized fields.
    pub async fn set_login(&self, username: &str, password: Option<&[u8]>) -> Result<(), Error> {
        if username.is_empty() || username.len() > usize::from(u16::MAX) {
            return Err(Error::new(
                ErrorKind::InvalidParameter,
                "Invalid username length",
            ));
        }
        if let Some(password) = password {
            if password.len() > usize::from(u16::MAX) {
                return Err(Error::new(
                    ErrorKind::InvalidParameter,
                    "Invalid password length",
                ));
            }
        }
        self.send_cmd(EngineCmd::SetLogin {
            username: username.to_owned(),
            password: password.map(<[u8]>::to_vec),
        })
        .await
    }

    /// Set the will message sent with the next CONNECT. Will QoS 2 is
    /// rejected. Session scoped: cleared when the session ends.
    ///
    /// # Errors
    ///
    /// Returns error on an empty topic or `QoS2NotSupported`.
    pub async fn set_will(
        &self,
        topic: &str,
        message: &[u8],
        qos: QoS,
        retain: bool,
    ) -> Result<(), Error> {
        if topic.is_empty() || topic.len() > usize::from(u16::MAX) {
            return Err(Error::new(
                ErrorKind::InvalidParameter,
                "Invalid will topic length",
            ));
        }
        if qos == QoS::ExactOnce {
            return Err(Error::new(
                ErrorKind::QoS2NotSupported,
                "QoS 2 delivery is not supported",
            ));
        }
        self.send_cmd(EngineCmd::SetWill {
            will: WillMessage::new(topic, message, qos, retain),
        })
        .await
    }

    /// Set WebSocket host and URI path for the `Ws`/`Wss` transports.
    ///
    /// # Errors
    ///
    /// Returns error on empty host.
    pub async fn set_websocket(&self, host: &str, path: &str) -> Result<(), Error> {
        if host.is_empty() {
            return Err(Error::new(ErrorKind::InvalidParameter, "Host is empty"));
        }
        self.send_cmd(EngineCmd::SetWebsocket {
            host: host.to_owned(),
            path: path.to_owned(),
        })
        .await
    }

    /// Install the receive-queue depth callback.
    ///
    /// Callbacks run on the engine task and must not call back into the
    /// client API synchronously; hand work off to another task instead.
    ///
    /// # Errors
    ///
    /// Returns error if the engine has terminated.
    pub async fn set_receive_notify<F>(&self, callback: F) -> Result<(), Error>
    where
        F: FnMut(usize) + Send + 'static,
    {
        self.send_cmd(EngineCmd::SetReceiveNotify(Box::new(callback)))
            .await
    }

    /// Install the connect-result callback used by non-waiting
    /// connects.
    ///
    /// # Errors
    ///
    /// Returns error if the engine has terminated.
    pub async fn set_connect_notify<F>(&self, callback: F) -> Result<(), Error>
    where
        F: FnMut(Result<(), Error>) + Send + 'static,
    {
        self.send_cmd(EngineCmd::SetConnectNotify(Box::new(callback)))
            .await
    }

    /// Install the disconnect callback, fired exactly once per session.
    ///
    /// # Errors
    ///
    /// Returns error if the engine has terminated.
    pub async fn set_disconnect_notify<F>(&self, callback: F) -> Result<(), Error>
    where
        F: FnMut() + Send + 'static,
    {
        self.send_cmd(EngineCmd::SetDisconnectNotify(Box::new(callback)))
            .await
    }

    /// Install the acknowledgement callback, fired when a PUBACK,
    /// SUBACK or UNSUBACK releases an in-flight request.
    ///
    /// # Errors
    ///
    /// Returns error if the engine has terminated.
    pub async fn set_ack_notify<F>(&self, callback: F) -> Result<(), Error>
    where
        F: FnMut(PacketType, PacketId, &PendingRequest) + Send + 'static,
    {
        self.send_cmd(EngineCmd::SetAckNotify(Box::new(callback)))
            .await
    }

    /// Install the raw packet tap.
    ///
    /// # Errors
    ///
    /// Returns error if the engine has terminated.
    pub async fn set_packet_notify<F>(&self, callback: F) -> Result<(), Error>
    where
        F: FnMut(&[u8]) -> bool + Send + 'static,
    {
        self.send_cmd(EngineCmd::SetPacketNotify(Box::new(callback)))
            .await
    }

    /// Tear the client down and stop the engine task. A pending
    /// connect is cancelled, its result callback firing once with
    /// failure.
    ///
    /// # Errors
    ///
    /// Returns error if the engine already terminated.
    pub async fn delete(self) -> Result<(), Error> {
        let (tx, rx) = oneshot::channel();
        self.send_cmd(EngineCmd::Delete { reply: tx }).await?;
        Self::wait_reply(rx, Wait::Forever).await
    }

    async fn send_cmd(&self, cmd: EngineCmd) -> Result<(), Error> {
        self.sender.send(cmd).await.map_err(Into::into)
    }

    async fn wait_reply(
        rx: oneshot::Receiver<Result<(), Error>>,
        wait: Wait,
    ) -> Result<(), Error> {
        match wait {
            Wait::NoWait | Wait::Forever => rx.await?,
            Wait::Timeout(timeout) => match tokio::time::timeout(timeout, rx).await {
                Ok(reply) => reply?,
                Err(_elapsed) => Err(Error::new(
                    ErrorKind::Timeout,
                    "Timed out waiting for the operation",
                )),
            },
        }
    }
}
