// Copyright (c) 2023 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Messages from the public API to the engine task.
//!
//! The mailbox serializes application calls from any task onto the
//! engine, which owns every piece of mutable client state.

use bytes::Bytes;
use tokio::sync::oneshot;

use codec::QoS;

use crate::client::{
    AckCallback, ConnectCallback, DisconnectCallback, PacketCallback, ReceiveCallback,
};
use crate::connect_options::WillMessage;
use crate::error::Error;
use crate::status::ClientStatus;

pub(crate) type Reply<T> = oneshot::Sender<Result<T, Error>>;

pub(crate) enum EngineCmd {
    Connect {
        keep_alive: u16,
        clean_session: bool,
        /// With `wait_for_ack` the reply resolves on CONNACK; without,
        /// it resolves once the CONNECT packet is written.
        wait_for_ack: bool,
        reply: Reply<()>,
    },
    Publish {
        topic: String,
        message: Bytes,
        qos: QoS,
        retain: bool,
        reply: Reply<()>,
    },
    Subscribe {
        topic: String,
        qos: QoS,
        reply: Reply<()>,
    },
    Unsubscribe {
        topic: String,
        reply: Reply<()>,
    },
    Disconnect {
        reply: Reply<()>,
    },
    MessageGet {
        topic_capacity: usize,
        message_capacity: usize,
        reply: Reply<(Bytes, Bytes)>,
    },
    Status {
        reply: oneshot::Sender<ClientStatus>,
    },
    SetLogin {
        username: String,
        password: Option<Vec<u8>>,
    },
    SetWill {
        will: WillMessage,
    },
    SetWebsocket {
        host: String,
        path: String,
    },
    SetReceiveNotify(ReceiveCallback),
    SetConnectNotify(ConnectCallback),
    SetDisconnectNotify(DisconnectCallback),
    SetAckNotify(AckCallback),
    SetPacketNotify(PacketCallback),
    Delete {
        reply: Reply<()>,
    },
}
