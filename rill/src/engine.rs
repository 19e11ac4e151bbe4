// Copyright (c) 2023 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! The protocol engine.
//!
//! One task per client owns the transport receive side, the keepalive
//! timer and the command mailbox, and drives the lifecycle state
//! machine. Callbacks are invoked from this task only, so no callback
//! ever runs concurrently with itself.

use bytes::{Bytes, BytesMut};
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use codec::{
    frame, ByteArray, ConnectAckPacket, ConnectPacket, ConnectReturnCode, DecodePacket,
    DisconnectPacket, EncodePacket, FrameStatus, Packet, PacketId, PacketType, PingRequestPacket,
    PingResponsePacket, PublishAckPacket, PublishCompletePacket, PublishPacket,
    PublishReceivedPacket, PublishReleasePacket, QoS, SubscribeAckPacket, SubscribePacket,
    UnsubscribeAckPacket, UnsubscribePacket,
};

use crate::client::{
    AckCallback, ConnectCallback, DisconnectCallback, PacketCallback, ReceiveCallback,
};
use crate::command::{EngineCmd, Reply};
use crate::connect_options::{ConnectOptions, WillMessage};
use crate::error::{Error, ErrorKind};
use crate::inflight::{PendingRequest, ReceiveQueue, TransmitEntry, TransmitQueue};
use crate::keepalive::{Keepalive, KeepaliveEvent};
use crate::status::ClientStatus;
use crate::stream::Stream;

/// First packet identifier handed out after client creation.
const INITIAL_PACKET_ID: u16 = 1;

#[derive(Default)]
struct Callbacks {
    receive: Option<ReceiveCallback>,
    connect: Option<ConnectCallback>,
    disconnect: Option<DisconnectCallback>,
    ack: Option<AckCallback>,
    packet: Option<PacketCallback>,
}

pub(crate) struct Engine {
    options: ConnectOptions,
    receiver: mpsc::Receiver<EngineCmd>,

    stream: Stream,
    status: ClientStatus,

    /// Session parameters of the current or most recent connect call.
    clean_session: bool,
    keep_alive: u16,

    /// Session scoped; cleared when the session ends.
    login: Option<(String, Option<Vec<u8>>)>,
    will: Option<WillMessage>,

    packet_id: u16,
    transmit_queue: TransmitQueue,
    receive_queue: ReceiveQueue,

    /// Reassembly buffer holding at most one partial control packet at
    /// its tail.
    assembly: BytesMut,

    keepalive: Keepalive,
    callbacks: Callbacks,

    /// Waiter of a connect call that asked to block until CONNACK.
    connect_waiter: Option<Reply<()>>,
}

impl Engine {
    pub fn new(options: ConnectOptions, receiver: mpsc::Receiver<EngineCmd>) -> Self {
        let transmit_queue = TransmitQueue::new(options.transmit_queue_depth());
        let keepalive = Keepalive::new(0, options.timer_tick(), options.ping_timeout());
        Self {
            options,
            receiver,
            stream: Stream::None,
            status: ClientStatus::Idle,
            clean_session: true,
            keep_alive: 0,
            login: None,
            will: None,
            packet_id: INITIAL_PACKET_ID,
            transmit_queue,
            receive_queue: ReceiveQueue::new(),
            assembly: BytesMut::with_capacity(4096),
            keepalive,
            callbacks: Callbacks::default(),
            connect_waiter: None,
        }
    }

    pub async fn run_loop(mut self) {
        log::info!("engine: run loop started");
        let mut timer = tokio::time::interval(self.options.timer_tick());
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                cmd = self.receiver.recv() => {
                    match cmd {
                        Some(EngineCmd::Delete { reply }) => {
                            self.handle_delete(reply).await;
                            break;
                        }
                        Some(cmd) => self.handle_command(cmd).await,
                        // Every client handle is gone.
                        None => {
                            self.end_session(None).await;
                            break;
                        }
                    }
                }
                ret = self.stream.read_buf(&mut self.assembly), if self.stream.is_connected() => {
                    self.handle_read(ret).await;
                }
                _ = timer.tick(), if self.status == ClientStatus::Connected => {
                    self.handle_tick().await;
                }
            }
        }
        log::info!("engine: run loop finished");
    }

    async fn handle_command(&mut self, cmd: EngineCmd) {
        match cmd {
            EngineCmd::Connect {
                keep_alive,
                clean_session,
                wait_for_ack,
                reply,
            } => {
                self.handle_connect(keep_alive, clean_session, wait_for_ack, reply)
                    .await;
            }
            EngineCmd::Publish {
                topic,
                message,
                qos,
                retain,
                reply,
            } => {
                let ret = self.handle_publish(&topic, &message, qos, retain).await;
                let _ret = reply.send(ret);
            }
            EngineCmd::Subscribe { topic, qos, reply } => {
                let ret = self.handle_subscribe(&topic, qos).await;
                let _ret = reply.send(ret);
            }
            EngineCmd::Unsubscribe { topic, reply } => {
                let ret = self.handle_unsubscribe(&topic).await;
                let _ret = reply.send(ret);
            }
            EngineCmd::Disconnect { reply } => {
                let ret = self.handle_disconnect().await;
                let _ret = reply.send(ret);
            }
            EngineCmd::MessageGet {
                topic_capacity,
                message_capacity,
                reply,
            } => {
                let ret = self.receive_queue.pop_into(topic_capacity, message_capacity);
                let _ret = reply.send(ret);
            }
            EngineCmd::Status { reply } => {
                let _ret = reply.send(self.status);
            }
            EngineCmd::SetLogin { username, password } => {
                self.login = Some((username, password));
            }
            EngineCmd::SetWill { will } => {
                self.will = Some(will);
            }
            EngineCmd::SetWebsocket { host, path } => {
                self.options.set_websocket(&host, &path);
            }
            EngineCmd::SetReceiveNotify(callback) => self.callbacks.receive = Some(callback),
            EngineCmd::SetConnectNotify(callback) => self.callbacks.connect = Some(callback),
            EngineCmd::SetDisconnectNotify(callback) => {
                self.callbacks.disconnect = Some(callback);
            }
            EngineCmd::SetAckNotify(callback) => self.callbacks.ack = Some(callback),
            EngineCmd::SetPacketNotify(callback) => self.callbacks.packet = Some(callback),
            EngineCmd::Delete { .. } => unreachable!("Delete is handled in the run loop"),
        }
    }

    async fn handle_connect(
        &mut self,
        keep_alive: u16,
        clean_session: bool,
        wait_for_ack: bool,
        reply: Reply<()>,
    ) {
        match self.status {
            ClientStatus::Connected => {
                let _ret = reply.send(Err(Error::new(
                    ErrorKind::AlreadyConnected,
                    "Client is already connected",
                )));
                return;
            }
            ClientStatus::Connecting => {
                let _ret = reply.send(Err(Error::new(
                    ErrorKind::Connecting,
                    "Connect is already in progress",
                )));
                return;
            }
            ClientStatus::Disconnecting => {
                let _ret = reply.send(Err(Error::new(
                    ErrorKind::InvalidState,
                    "Client is disconnecting",
                )));
                return;
            }
            ClientStatus::Idle => (),
        }

        self.clean_session = clean_session;
        self.keep_alive = keep_alive;
        // A clean session discards state retained from earlier sessions
        // before any CONNECT bytes hit the wire.
        if clean_session {
            self.transmit_queue.clear();
        }

        self.assembly.clear();
        self.status = ClientStatus::Connecting;
        let dial = Stream::connect(self.options.connect_type());
        match tokio::time::timeout(self.options.connect_timeout(), dial).await {
            Ok(Ok(stream)) => self.stream = stream,
            Ok(Err(err)) => {
                log::error!("engine: transport connect failed: {err}");
                self.status = ClientStatus::Idle;
                let _ret = reply.send(Err(Error::from_string(
                    ErrorKind::ConnectFailure,
                    format!("Failed to connect: {err}"),
                )));
                return;
            }
            Err(_elapsed) => {
                self.status = ClientStatus::Idle;
                let _ret = reply.send(Err(Error::new(
                    ErrorKind::ConnectFailure,
                    "Transport connect timed out",
                )));
                return;
            }
        }

        let packet = match self.connect_packet() {
            Ok(packet) => packet,
            Err(err) => {
                self.stream.shutdown().await;
                self.stream = Stream::None;
                self.status = ClientStatus::Idle;
                let _ret = reply.send(Err(err));
                return;
            }
        };
        self.keepalive = Keepalive::new(
            keep_alive,
            self.options.timer_tick(),
            self.options.ping_timeout(),
        );
        if let Err(err) = self.send(packet).await {
            self.stream.shutdown().await;
            self.stream = Stream::None;
            self.status = ClientStatus::Idle;
            let _ret = reply.send(Err(err));
            return;
        }

        if wait_for_ack {
            self.connect_waiter = Some(reply);
        } else {
            // The handshake continues on the event loop; its outcome is
            // reported through the connect-result callback.
            let _ret = reply.send(Ok(()));
        }
    }

    fn connect_packet(&self) -> Result<ConnectPacket, Error> {
        let mut packet = ConnectPacket::new(self.options.client_id())?;
        packet
            .set_keep_alive(self.keep_alive)
            .set_clean_session(self.clean_session);
        if let Some(will) = &self.will {
            packet.set_will(will.topic(), will.message(), will.qos(), will.retain())?;
        }
        if let Some((username, password)) = &self.login {
            packet.set_credentials(username, password.as_deref())?;
        }
        Ok(packet)
    }

    async fn handle_publish(
        &mut self,
        topic: &str,
        message: &[u8],
        qos: QoS,
        retain: bool,
    ) -> Result<(), Error> {
        if self.status != ClientStatus::Connected {
            return Err(Error::new(ErrorKind::NotConnected, "Client is not connected"));
        }
        if qos == QoS::ExactOnce {
            return Err(Error::new(
                ErrorKind::QoS2NotSupported,
                "QoS 2 delivery is not supported",
            ));
        }

        let mut packet = PublishPacket::new(topic, qos, message)?;
        packet.set_retain(retain);
        if qos == QoS::AtLeastOnce {
            let packet_id = self.next_packet_id();
            packet.set_packet_id(packet_id);
            self.transmit_queue.push(TransmitEntry {
                packet_id,
                request: PendingRequest::Publish(packet.clone()),
            })?;
        }

        if let Err(err) = self.send(packet).await {
            // The queued entry survives teardown and is retransmitted
            // on the next clean-session=false connect.
            log::error!("engine: publish send failed: {err}");
            self.end_session(None).await;
            return Err(err);
        }
        Ok(())
    }

    async fn handle_subscribe(&mut self, topic: &str, qos: QoS) -> Result<(), Error> {
        if self.status != ClientStatus::Connected {
            return Err(Error::new(ErrorKind::NotConnected, "Client is not connected"));
        }
        if qos == QoS::ExactOnce {
            return Err(Error::new(
                ErrorKind::QoS2NotSupported,
                "QoS 2 delivery is not supported",
            ));
        }
        log::info!("engine: subscribe to: {topic}");

        let packet_id = self.next_packet_id();
        let packet = SubscribePacket::new(topic, qos, packet_id)?;
        self.transmit_queue.push(TransmitEntry {
            packet_id,
            request: PendingRequest::Subscribe(packet.clone()),
        })?;

        if let Err(err) = self.send(packet).await {
            log::error!("engine: subscribe send failed: {err}");
            self.end_session(None).await;
            return Err(err);
        }
        Ok(())
    }

    async fn handle_unsubscribe(&mut self, topic: &str) -> Result<(), Error> {
        if self.status != ClientStatus::Connected {
            return Err(Error::new(ErrorKind::NotConnected, "Client is not connected"));
        }
        log::info!("engine: unsubscribe from: {topic}");

        let packet_id = self.next_packet_id();
        let packet = UnsubscribePacket::new(topic, packet_id)?;
        self.transmit_queue.push(TransmitEntry {
            packet_id,
            request: PendingRequest::Unsubscribe(packet.clone()),
        })?;

        if let Err(err) = self.send(packet).await {
            log::error!("engine: unsubscribe send failed: {err}");
            self.end_session(None).await;
            return Err(err);
        }
        Ok(())
    }

    /// Disconnect is idempotent: in Idle it only releases resources.
    async fn handle_disconnect(&mut self) -> Result<(), Error> {
        if self.status == ClientStatus::Connected {
            self.status = ClientStatus::Disconnecting;
            if let Err(err) = self.send(DisconnectPacket::new()).await {
                log::warn!("engine: failed to send disconnect packet: {err}");
            }
        }
        self.end_session(None).await;
        Ok(())
    }

    async fn handle_delete(&mut self, reply: Reply<()>) {
        // Deleting mid-connect cancels the handshake; the pending
        // connect resolves with failure exactly once.
        self.end_session(Some(Error::new(ErrorKind::NotRunning, "Client deleted")))
            .await;
        let _ret = reply.send(Ok(()));
    }

    async fn handle_tick(&mut self) {
        match self.keepalive.poll(Instant::now()) {
            Some(KeepaliveEvent::PingTimeout) => {
                log::warn!("engine: ping response timed out, closing session");
                self.end_session(None).await;
            }
            Some(KeepaliveEvent::PingDue) => {
                log::info!("engine: sending ping request");
                match self.send(PingRequestPacket::new()).await {
                    Ok(()) => self.keepalive.ping_sent(Instant::now()),
                    Err(err) => {
                        log::error!("engine: ping send failed: {err}");
                        self.end_session(None).await;
                    }
                }
            }
            None => (),
        }
    }

    async fn handle_read(&mut self, ret: Result<usize, Error>) {
        match ret {
            Ok(0) => {
                log::info!("engine: connection closed by peer");
                self.end_session(None).await;
            }
            Ok(_) => self.drain_assembly().await,
            Err(err) => {
                log::error!("engine: recv failed: {err}");
                self.end_session(Some(Error::from_string(
                    ErrorKind::CommunicationFailure,
                    format!("Recv failed: {err}"),
                )))
                .await;
            }
        }
    }

    /// Split every complete control packet off the reassembly buffer
    /// and dispatch it; stop at the first partial tail.
    async fn drain_assembly(&mut self) {
        loop {
            match frame::probe(&self.assembly) {
                Ok(FrameStatus::Complete { header, frame_len }) => {
                    let packet = self.assembly.split_to(frame_len).freeze();
                    if let Some(callback) = &mut self.callbacks.packet {
                        if callback(&packet) {
                            // Consumed by the raw packet tap.
                            continue;
                        }
                    }
                    if let Err(err) = self.dispatch(header.packet_type(), &packet).await {
                        log::error!("engine: failed to process packet: {err}");
                        self.end_session(Some(err)).await;
                        return;
                    }
                    // A teardown inside dispatch clears the buffer, so
                    // the next probe ends the loop.
                }
                Ok(FrameStatus::Partial) => return,
                Err(err) => {
                    log::error!("engine: malformed packet from server: {err}");
                    self.end_session(Some(Error::from_string(
                        ErrorKind::ServerMessageFailure,
                        format!("Malformed packet: {err}"),
                    )))
                    .await;
                    return;
                }
            }
        }
    }

    async fn dispatch(&mut self, packet_type: PacketType, packet: &Bytes) -> Result<(), Error> {
        match packet_type {
            PacketType::ConnectAck => self.on_connect_ack(packet).await,
            PacketType::Publish { .. } => self.on_message(packet).await,
            PacketType::PublishAck => self.on_publish_ack(packet),
            PacketType::PublishReceived => self.on_publish_received(packet),
            PacketType::PublishRelease => self.on_publish_release(packet).await,
            PacketType::PublishComplete => self.on_publish_complete(packet),
            PacketType::SubscribeAck => self.on_subscribe_ack(packet),
            PacketType::UnsubscribeAck => self.on_unsubscribe_ack(packet),
            PacketType::PingResponse => self.on_ping_resp(packet),
            PacketType::Disconnect => {
                // Non-standard for a server, tolerated as a peer close.
                log::info!("engine: server requested disconnect");
                self.end_session(None).await;
                Ok(())
            }
            t => {
                log::info!("engine: ignoring unexpected packet: {t:?}");
                Ok(())
            }
        }
    }

    async fn on_connect_ack(&mut self, packet: &[u8]) -> Result<(), Error> {
        if self.status != ClientStatus::Connecting {
            log::warn!("engine: unexpected CONNACK in {:?}", self.status);
            return Ok(());
        }
        let mut ba = ByteArray::new(packet);
        let packet = ConnectAckPacket::decode(&mut ba).map_err(|err| {
            Error::from_string(
                ErrorKind::ServerMessageFailure,
                format!("Invalid CONNACK: {err}"),
            )
        })?;

        if packet.return_code() != ConnectReturnCode::Accepted {
            log::warn!(
                "engine: connection refused by server: {:?}",
                packet.return_code()
            );
            let err = Error::from_string(
                ErrorKind::ConnectionRefused(packet.return_code()),
                format!("Connection refused: {:?}", packet.return_code()),
            );
            self.end_session(Some(err)).await;
            return Ok(());
        }
        // The server may not resume a session we asked it to discard
        // [MQTT-3.2.2-1].
        if self.clean_session && packet.session_present() {
            let err = Error::new(
                ErrorKind::ServerMessageFailure,
                "Session-present on a clean session",
            );
            self.end_session(Some(err)).await;
            return Ok(());
        }

        if !self.clean_session {
            self.retransmit_pending().await?;
        }
        self.status = ClientStatus::Connected;
        self.keepalive.start(Instant::now());
        log::info!(
            "engine: connected, session present: {}",
            packet.session_present()
        );
        self.resolve_connect(Ok(()));
        Ok(())
    }

    /// Re-send every queued publish with the DUP flag, oldest first.
    async fn retransmit_pending(&mut self) -> Result<(), Error> {
        let mut buffers = Vec::new();
        for packet in self.transmit_queue.publishes_mut() {
            // Queued publishes are QoS 1, set_dup cannot fail.
            let _ret = packet.set_dup(true);
            let mut buf = Vec::with_capacity(packet.bytes()?);
            packet.encode(&mut buf)?;
            buffers.push(buf);
        }
        if buffers.is_empty() {
            return Ok(());
        }
        log::info!("engine: retransmitting {} publishes", buffers.len());
        for buf in buffers {
            self.stream.write_all(&buf).await.map_err(|err| {
                Error::from_string(
                    ErrorKind::CommunicationFailure,
                    format!("Retransmit failed: {err}"),
                )
            })?;
        }
        self.keepalive.refresh(Instant::now());
        Ok(())
    }

    async fn on_message(&mut self, packet: &[u8]) -> Result<(), Error> {
        let mut ba = ByteArray::new(packet);
        let packet = PublishPacket::decode(&mut ba).map_err(|err| {
            Error::from_string(
                ErrorKind::ServerMessageFailure,
                format!("Invalid PUBLISH: {err}"),
            )
        })?;
        let packet_id = packet.packet_id();

        match packet.qos() {
            QoS::AtMostOnce => {
                self.enqueue_message(packet);
                Ok(())
            }
            QoS::AtLeastOnce => {
                // Receive callback first, ack second.
                self.enqueue_message(packet);
                self.send(PublishAckPacket::new(packet_id)).await
            }
            QoS::ExactOnce => {
                if self.transmit_queue.has_receive_stub(packet_id) {
                    log::info!("engine: duplicate QoS 2 publish: {packet_id}");
                } else {
                    self.enqueue_message(packet);
                    self.transmit_queue.push_receive_stub(packet_id);
                }
                self.send(PublishReceivedPacket::new(packet_id)).await
            }
        }
    }

    fn enqueue_message(&mut self, packet: PublishPacket) {
        self.receive_queue.push(packet);
        let depth = self.receive_queue.depth();
        if let Some(callback) = &mut self.callbacks.receive {
            callback(depth);
        }
    }

    fn on_publish_ack(&mut self, packet: &[u8]) -> Result<(), Error> {
        let mut ba = ByteArray::new(packet);
        let packet = PublishAckPacket::decode(&mut ba).map_err(server_message_failure)?;
        let packet_id = packet.packet_id();
        if let Some(entry) = self
            .transmit_queue
            .acknowledge(PacketType::PublishAck, packet_id)
        {
            log::info!("engine: publish {packet_id} confirmed");
            self.notify_ack(PacketType::PublishAck, packet_id, &entry.request);
        } else {
            log::warn!("engine: no pending publish for ack: {packet_id}");
        }
        Ok(())
    }

    fn on_publish_received(&mut self, packet: &[u8]) -> Result<(), Error> {
        let mut ba = ByteArray::new(packet);
        let packet = PublishReceivedPacket::decode(&mut ba).map_err(server_message_failure)?;
        let packet_id = packet.packet_id();
        // Legacy partial QoS 2: the queued publish is kept as a stub
        // until the server releases it.
        if !self.transmit_queue.mark_publish_received(packet_id) {
            log::warn!("engine: no pending publish for PUBREC: {packet_id}");
        }
        Ok(())
    }

    async fn on_publish_release(&mut self, packet: &[u8]) -> Result<(), Error> {
        let mut ba = ByteArray::new(packet);
        let packet = PublishReleasePacket::decode(&mut ba).map_err(server_message_failure)?;
        let packet_id = packet.packet_id();
        if self
            .transmit_queue
            .acknowledge(PacketType::PublishRelease, packet_id)
            .is_none()
        {
            log::warn!("engine: no receive stub for PUBREL: {packet_id}");
        }
        self.send(PublishCompletePacket::new(packet_id)).await
    }

    fn on_publish_complete(&mut self, packet: &[u8]) -> Result<(), Error> {
        let mut ba = ByteArray::new(packet);
        let packet = PublishCompletePacket::decode(&mut ba).map_err(server_message_failure)?;
        let packet_id = packet.packet_id();
        if self
            .transmit_queue
            .acknowledge(PacketType::PublishComplete, packet_id)
            .is_none()
        {
            log::warn!("engine: no pending entry for PUBCOMP: {packet_id}");
        }
        Ok(())
    }

    fn on_subscribe_ack(&mut self, packet: &[u8]) -> Result<(), Error> {
        let mut ba = ByteArray::new(packet);
        let packet = SubscribeAckPacket::decode(&mut ba).map_err(server_message_failure)?;
        // The client subscribes one filter per request, so a valid ack
        // carries exactly one return code.
        if packet.acknowledgements().len() != 1 {
            return Err(Error::new(
                ErrorKind::ServerMessageFailure,
                "SUBACK carries an unexpected number of return codes",
            ));
        }
        let packet_id = packet.packet_id();
        if let Some(entry) = self
            .transmit_queue
            .acknowledge(PacketType::SubscribeAck, packet_id)
        {
            log::info!(
                "engine: subscription {packet_id} confirmed: {:?}",
                packet.acknowledgements()
            );
            self.notify_ack(PacketType::SubscribeAck, packet_id, &entry.request);
        } else {
            log::warn!("engine: no pending subscribe for ack: {packet_id}");
        }
        Ok(())
    }

    fn on_unsubscribe_ack(&mut self, packet: &[u8]) -> Result<(), Error> {
        let mut ba = ByteArray::new(packet);
        let packet = UnsubscribeAckPacket::decode(&mut ba).map_err(server_message_failure)?;
        let packet_id = packet.packet_id();
        if let Some(entry) = self
            .transmit_queue
            .acknowledge(PacketType::UnsubscribeAck, packet_id)
        {
            log::info!("engine: unsubscribe {packet_id} confirmed");
            self.notify_ack(PacketType::UnsubscribeAck, packet_id, &entry.request);
        } else {
            log::warn!("engine: no pending unsubscribe for ack: {packet_id}");
        }
        Ok(())
    }

    fn on_ping_resp(&mut self, packet: &[u8]) -> Result<(), Error> {
        let mut ba = ByteArray::new(packet);
        let _packet = PingResponsePacket::decode(&mut ba).map_err(server_message_failure)?;
        log::info!("engine: ping response received");
        self.keepalive.pong_received();
        Ok(())
    }

    fn notify_ack(&mut self, ack_type: PacketType, packet_id: PacketId, request: &PendingRequest) {
        if let Some(callback) = &mut self.callbacks.ack {
            callback(ack_type, packet_id, request);
        }
    }

    fn resolve_connect(&mut self, result: Result<(), Error>) {
        if let Some(waiter) = self.connect_waiter.take() {
            let _ret = waiter.send(result);
        } else if let Some(callback) = &mut self.callbacks.connect {
            callback(result);
        }
    }

    /// The only place a session is torn down.
    ///
    /// Closes the transport, drops session-scoped state, fires the
    /// disconnect callback at most once per session, and resolves a
    /// pending connect with `connect_error` when the handshake was
    /// still in progress.
    async fn end_session(&mut self, connect_error: Option<Error>) {
        if self.status == ClientStatus::Idle && !self.stream.is_connected() {
            return;
        }
        let was_connected = matches!(
            self.status,
            ClientStatus::Connected | ClientStatus::Disconnecting
        );
        let was_connecting = self.status == ClientStatus::Connecting;

        self.stream.shutdown().await;
        self.stream = Stream::None;
        self.assembly.clear();
        self.receive_queue.clear();
        self.transmit_queue.end_session(self.clean_session);
        // Login and will are session scoped; set them again before the
        // next connect.
        self.login = None;
        self.will = None;
        self.status = ClientStatus::Idle;

        if was_connecting {
            let err = connect_error.unwrap_or_else(|| {
                Error::new(
                    ErrorKind::ConnectFailure,
                    "Connection closed during handshake",
                )
            });
            self.resolve_connect(Err(err));
        }
        if was_connected {
            if let Some(callback) = &mut self.callbacks.disconnect {
                callback();
            }
        }
    }

    async fn send<P: EncodePacket + Packet>(&mut self, packet: P) -> Result<(), Error> {
        let mut buf = Vec::with_capacity(packet.bytes()?);
        packet.encode(&mut buf)?;
        self.stream.write_all(&buf).await.map_err(|err| {
            Error::from_string(
                ErrorKind::CommunicationFailure,
                format!("Failed to send packet: {err}"),
            )
        })?;
        // Any transmission defers the next ping, except the ping
        // itself: a lost PINGREQ must not push out its own timeout.
        if packet.packet_type() != PacketType::PingRequest {
            self.keepalive.refresh(Instant::now());
        }
        Ok(())
    }

    /// Allocate the next packet identifier: post-incrementing rolling
    /// counter, skipping zero and ids still in flight.
    fn next_packet_id(&mut self) -> PacketId {
        loop {
            let id = self.packet_id;
            self.packet_id = self.packet_id.wrapping_add(1);
            if self.packet_id == 0 {
                self.packet_id = 1;
            }
            if id != 0 && !self.transmit_queue.contains(PacketId::new(id)) {
                return PacketId::new(id);
            }
        }
    }
}

fn server_message_failure(err: codec::DecodeError) -> Error {
    Error::from_string(
        ErrorKind::ServerMessageFailure,
        format!("Invalid packet from server: {err}"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn test_engine() -> Engine {
        let (_sender, receiver) = mpsc::channel(4);
        Engine::new(ConnectOptions::default(), receiver)
    }

    #[test]
    fn test_next_packet_id_skips_zero() {
        let mut engine = test_engine();
        engine.packet_id = u16::MAX;
        assert_eq!(engine.next_packet_id(), PacketId::new(u16::MAX));
        assert_eq!(engine.next_packet_id(), PacketId::new(1));
    }

    #[test]
    fn test_next_packet_id_skips_in_flight() {
        let mut engine = test_engine();
        engine
            .transmit_queue
            .push(TransmitEntry {
                packet_id: PacketId::new(1),
                request: PendingRequest::PublishReceived,
            })
            .unwrap();
        assert_eq!(engine.next_packet_id(), PacketId::new(2));
    }

    // Feeding a byte stream in arbitrary chunks must produce the same
    // dispatches as feeding it whole.
    #[tokio::test]
    async fn test_reassembly_across_chunks() {
        let first = PublishPacket::new("t", QoS::AtMostOnce, b"hello").unwrap();
        let second = PublishPacket::new("other/topic", QoS::AtMostOnce, b"x").unwrap();
        let mut wire = Vec::new();
        first.encode(&mut wire).unwrap();
        second.encode(&mut wire).unwrap();

        for chunk_len in 1..wire.len() {
            let mut engine = test_engine();
            let received = Arc::new(AtomicUsize::new(0));
            let counter = Arc::clone(&received);
            engine.callbacks.receive = Some(Box::new(move |_depth| {
                counter.fetch_add(1, Ordering::SeqCst);
            }));

            for chunk in wire.chunks(chunk_len) {
                engine.assembly.extend_from_slice(chunk);
                engine.drain_assembly().await;
            }

            assert_eq!(received.load(Ordering::SeqCst), 2, "chunk_len {chunk_len}");
            assert_eq!(engine.receive_queue.depth(), 2);
            let (topic, message) = engine.receive_queue.pop_into(64, 64).unwrap();
            assert_eq!(topic.as_ref(), b"t");
            assert_eq!(message.as_ref(), b"hello");
            let (topic, message) = engine.receive_queue.pop_into(64, 64).unwrap();
            assert_eq!(topic.as_ref(), b"other/topic");
            assert_eq!(message.as_ref(), b"x");
        }
    }

    #[tokio::test]
    async fn test_raw_packet_tap_consumes_frames() {
        let mut engine = test_engine();
        let received = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&received);
        engine.callbacks.packet = Some(Box::new(move |_packet| {
            counter.fetch_add(1, Ordering::SeqCst);
            true
        }));

        let packet = PublishPacket::new("t", QoS::AtMostOnce, b"hello").unwrap();
        let mut wire = Vec::new();
        packet.encode(&mut wire).unwrap();
        engine.assembly.extend_from_slice(&wire);
        engine.drain_assembly().await;

        assert_eq!(received.load(Ordering::SeqCst), 1);
        assert_eq!(engine.receive_queue.depth(), 0);
    }
}
