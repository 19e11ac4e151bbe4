// Copyright (c) 2023 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! In-flight bookkeeping: outbound requests awaiting acknowledgement
//! and inbound messages awaiting application pickup.

use bytes::Bytes;
use std::collections::VecDeque;

use codec::{PacketId, PacketType, PublishPacket, QoS, SubscribePacket, UnsubscribePacket};

use crate::error::{Error, ErrorKind};

/// The original request a transmit-queue entry keeps until its
/// acknowledgement arrives. Handed to the ack callback on release.
#[derive(Clone, Debug)]
pub enum PendingRequest {
    /// A QoS 1 publish awaiting PUBACK.
    Publish(PublishPacket),

    /// A subscribe awaiting SUBACK.
    Subscribe(SubscribePacket),

    /// An unsubscribe awaiting UNSUBACK.
    Unsubscribe(UnsubscribePacket),

    /// A PUBREC stub of a received QoS 2 publish, awaiting PUBREL.
    PublishReceived,
}

#[derive(Debug)]
pub(crate) struct TransmitEntry {
    pub packet_id: PacketId,
    pub request: PendingRequest,
}

/// Ordered queue of unacknowledged outbound requests.
///
/// Entries leave the queue when the matching acknowledgement arrives or
/// when the session ends. Only publish entries survive a session with
/// clean-session unset; they are retransmitted, in order, after the
/// next successful connect.
#[derive(Debug, Default)]
pub(crate) struct TransmitQueue {
    entries: VecDeque<TransmitEntry>,
    max_depth: Option<usize>,
}

impl TransmitQueue {
    pub fn new(max_depth: Option<usize>) -> Self {
        Self {
            entries: VecDeque::new(),
            max_depth,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn contains(&self, packet_id: PacketId) -> bool {
        self.entries
            .iter()
            .any(|entry| entry.packet_id == packet_id)
    }

    /// Append an application request.
    ///
    /// # Errors
    ///
    /// Returns `QueueFull` when the configured depth limit is reached,
    /// `InternalError` if `packet_id` is already queued.
    pub fn push(&mut self, entry: TransmitEntry) -> Result<(), Error> {
        if let Some(max_depth) = self.max_depth {
            if self.entries.len() >= max_depth {
                return Err(Error::new(
                    ErrorKind::QueueFull,
                    "Transmit queue depth limit reached",
                ));
            }
        }
        if self.contains(entry.packet_id) {
            return Err(Error::from_string(
                ErrorKind::InternalError,
                format!("Duplicate in-flight packet id: {}", entry.packet_id),
            ));
        }
        self.entries.push_back(entry);
        Ok(())
    }

    /// Record a PUBREC stub for an inbound QoS 2 publish. Stub ids live
    /// in the server's id space and are exempt from the depth limit.
    pub fn push_receive_stub(&mut self, packet_id: PacketId) {
        if !self.contains(packet_id) {
            self.entries.push_back(TransmitEntry {
                packet_id,
                request: PendingRequest::PublishReceived,
            });
        }
    }

    pub fn has_receive_stub(&self, packet_id: PacketId) -> bool {
        self.entries.iter().any(|entry| {
            entry.packet_id == packet_id
                && matches!(entry.request, PendingRequest::PublishReceived)
        })
    }

    /// Release the entry matched by an acknowledgement.
    ///
    /// An ack whose id is unknown, or whose queued request is of a
    /// different kind than the ack type, releases nothing; the caller
    /// ignores it.
    pub fn acknowledge(&mut self, ack_type: PacketType, packet_id: PacketId) -> Option<TransmitEntry> {
        let pos = self.entries.iter().position(|entry| {
            entry.packet_id == packet_id
                && match (&ack_type, &entry.request) {
                    (PacketType::PublishAck, PendingRequest::Publish(packet)) => {
                        packet.qos() == QoS::AtLeastOnce
                    }
                    (PacketType::SubscribeAck, PendingRequest::Subscribe(_)) => true,
                    (PacketType::UnsubscribeAck, PendingRequest::Unsubscribe(_)) => true,
                    (
                        PacketType::PublishRelease | PacketType::PublishComplete,
                        PendingRequest::PublishReceived,
                    ) => true,
                    _ => false,
                }
        })?;
        self.entries.remove(pos)
    }

    /// Turn a queued publish into a PUBREC stub after the server
    /// answered it with PUBREC. Legacy partial QoS 2 handling.
    pub fn mark_publish_received(&mut self, packet_id: PacketId) -> bool {
        for entry in &mut self.entries {
            if entry.packet_id == packet_id {
                if matches!(entry.request, PendingRequest::Publish(_)) {
                    entry.request = PendingRequest::PublishReceived;
                    return true;
                }
                return false;
            }
        }
        false
    }

    /// Queued publishes, oldest first, for retransmission.
    pub fn publishes_mut(&mut self) -> impl Iterator<Item = &mut PublishPacket> {
        self.entries.iter_mut().filter_map(|entry| match &mut entry.request {
            PendingRequest::Publish(packet) => Some(packet),
            _ => None,
        })
    }

    /// Drop session-scoped entries when the session ends.
    ///
    /// Subscribe/unsubscribe requests and QoS 2 stubs never survive a
    /// session. Publishes survive iff the session was not clean.
    pub fn end_session(&mut self, clean_session: bool) {
        if clean_session {
            self.entries.clear();
        } else {
            self.entries
                .retain(|entry| matches!(entry.request, PendingRequest::Publish(_)));
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// FIFO of received publishes awaiting `message_get`.
#[derive(Debug, Default)]
pub(crate) struct ReceiveQueue {
    entries: VecDeque<PublishPacket>,
}

impl ReceiveQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, packet: PublishPacket) {
        self.entries.push_back(packet);
    }

    pub fn depth(&self) -> usize {
        self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Pop the oldest message if it fits the caller's buffers.
    ///
    /// # Errors
    ///
    /// Returns `NoMessage` if the queue is empty, `InsufficientBuffer`
    /// if either capacity is too small; the message stays queued so the
    /// caller can retry with bigger buffers.
    pub fn pop_into(
        &mut self,
        topic_capacity: usize,
        message_capacity: usize,
    ) -> Result<(Bytes, Bytes), Error> {
        let Some(head) = self.entries.pop_front() else {
            return Err(Error::new(ErrorKind::NoMessage, "Receive queue is empty"));
        };
        if head.topic().len() > topic_capacity || head.message().len() > message_capacity {
            self.entries.push_front(head);
            return Err(Error::new(
                ErrorKind::InsufficientBuffer,
                "Topic or message buffer is too small",
            ));
        }
        Ok((
            Bytes::copy_from_slice(head.topic()),
            Bytes::copy_from_slice(head.message()),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn publish_entry(id: u16) -> TransmitEntry {
        let mut packet = PublishPacket::new("t", QoS::AtLeastOnce, b"m").unwrap();
        packet.set_packet_id(PacketId::new(id));
        TransmitEntry {
            packet_id: PacketId::new(id),
            request: PendingRequest::Publish(packet),
        }
    }

    fn subscribe_entry(id: u16) -> TransmitEntry {
        let packet = SubscribePacket::new("t", QoS::AtMostOnce, PacketId::new(id)).unwrap();
        TransmitEntry {
            packet_id: PacketId::new(id),
            request: PendingRequest::Subscribe(packet),
        }
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let mut queue = TransmitQueue::new(None);
        queue.push(publish_entry(1)).unwrap();
        let err = queue.push(publish_entry(1)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InternalError);
    }

    #[test]
    fn test_depth_limit() {
        let mut queue = TransmitQueue::new(Some(2));
        queue.push(publish_entry(1)).unwrap();
        queue.push(publish_entry(2)).unwrap();
        let err = queue.push(publish_entry(3)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::QueueFull);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_acknowledge_matches_kind() {
        let mut queue = TransmitQueue::new(None);
        queue.push(publish_entry(1)).unwrap();
        queue.push(subscribe_entry(2)).unwrap();

        // Wrong ack type for the queued request releases nothing.
        assert!(queue
            .acknowledge(PacketType::SubscribeAck, PacketId::new(1))
            .is_none());
        // Unknown id releases nothing.
        assert!(queue
            .acknowledge(PacketType::PublishAck, PacketId::new(9))
            .is_none());
        assert_eq!(queue.len(), 2);

        assert!(queue
            .acknowledge(PacketType::PublishAck, PacketId::new(1))
            .is_some());
        assert!(queue
            .acknowledge(PacketType::SubscribeAck, PacketId::new(2))
            .is_some());
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn test_end_session_retains_publishes() {
        let mut queue = TransmitQueue::new(None);
        queue.push(publish_entry(1)).unwrap();
        queue.push(subscribe_entry(2)).unwrap();
        queue.push_receive_stub(PacketId::new(3));

        queue.end_session(false);
        assert_eq!(queue.len(), 1);
        assert!(queue.contains(PacketId::new(1)));

        queue.end_session(true);
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn test_receive_stub_dedup() {
        let mut queue = TransmitQueue::new(None);
        queue.push_receive_stub(PacketId::new(7));
        queue.push_receive_stub(PacketId::new(7));
        assert_eq!(queue.len(), 1);
        assert!(queue.has_receive_stub(PacketId::new(7)));

        assert!(queue
            .acknowledge(PacketType::PublishRelease, PacketId::new(7))
            .is_some());
        assert!(!queue.has_receive_stub(PacketId::new(7)));
    }

    #[test]
    fn test_mark_publish_received() {
        let mut queue = TransmitQueue::new(None);
        queue.push(publish_entry(4)).unwrap();
        assert!(queue.mark_publish_received(PacketId::new(4)));
        assert!(queue.has_receive_stub(PacketId::new(4)));
        assert!(!queue.mark_publish_received(PacketId::new(4)));
    }

    #[test]
    fn test_receive_queue_buffers() {
        let mut queue = ReceiveQueue::new();
        assert_eq!(
            queue.pop_into(16, 16).unwrap_err().kind(),
            ErrorKind::NoMessage
        );

        queue.push(PublishPacket::new("topic", QoS::AtMostOnce, b"payload").unwrap());
        assert_eq!(
            queue.pop_into(3, 16).unwrap_err().kind(),
            ErrorKind::InsufficientBuffer
        );
        // Entry is still there after a failed pop.
        assert_eq!(queue.depth(), 1);

        let (topic, message) = queue.pop_into(16, 16).unwrap();
        assert_eq!(topic.as_ref(), b"topic");
        assert_eq!(message.as_ref(), b"payload");
        assert_eq!(queue.depth(), 0);
    }
}
