// Copyright (c) 2023 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use bytes::Bytes;
use std::io::Write;

use crate::{
    ByteArray, DecodeError, DecodePacket, EncodeError, EncodePacket, FixedHeader, Packet, PacketId,
    PacketType, QoS,
};

/// PUBLISH transports an application message, in either direction.
///
/// Basic structure of packet:
///
/// ```txt
///  7                     0
/// +-----------------------+
/// | Fixed header          |
/// |                       |
/// +-----------------------+
/// | Topic name length     |
/// |                       |
/// +-----------------------+
/// | Topic name ...        |
/// +-----------------------+
/// | Packet identifier     |
/// |                       |
/// +-----------------------+
/// | Msg payload ...       |
/// +-----------------------+
/// ```
///
/// The packet identifier is only present when QoS is 1 or 2, and the
/// payload is the raw remainder of the body, no length prefix.
///
/// The topic is held as raw bytes: inbound topics are surfaced to the
/// application byte for byte, without UTF-8 validation. Outbound topics
/// are built from `&str` and so are valid UTF-8 by construction.
#[allow(clippy::module_name_repetitions)]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PublishPacket {
    /// False on the first delivery attempt of a packet, true on
    /// retransmission. MUST be false when QoS is 0 [MQTT-3.3.1-2].
    dup: bool,

    qos: QoS,

    /// Ask the broker to keep this message as the last known good value
    /// for the topic and hand it to future subscribers.
    retain: bool,

    topic: Bytes,

    /// Meaningless when QoS is 0.
    packet_id: PacketId,

    msg: Bytes,
}

impl PublishPacket {
    /// Create a new publish packet.
    ///
    /// # Errors
    ///
    /// Returns error if `topic` is empty or too long.
    pub fn new(topic: &str, qos: QoS, msg: &[u8]) -> Result<Self, EncodeError> {
        if topic.is_empty() {
            return Err(EncodeError::InvalidData);
        }
        if topic.len() > usize::from(u16::MAX) {
            return Err(EncodeError::TooManyData);
        }
        Ok(Self {
            dup: false,
            qos,
            retain: false,
            topic: Bytes::copy_from_slice(topic.as_bytes()),
            packet_id: PacketId::new(0),
            msg: Bytes::copy_from_slice(msg),
        })
    }

    /// Update `dup` flag.
    ///
    /// # Errors
    ///
    /// Returns error if `dup` is set on a QoS 0 packet [MQTT-3.3.1-2].
    pub fn set_dup(&mut self, dup: bool) -> Result<&mut Self, EncodeError> {
        if dup && self.qos == QoS::AtMostOnce {
            return Err(EncodeError::InvalidData);
        }
        self.dup = dup;
        Ok(self)
    }

    #[must_use]
    pub const fn dup(&self) -> bool {
        self.dup
    }

    pub fn set_retain(&mut self, retain: bool) -> &mut Self {
        self.retain = retain;
        self
    }

    #[must_use]
    pub const fn retain(&self) -> bool {
        self.retain
    }

    #[must_use]
    pub const fn qos(&self) -> QoS {
        self.qos
    }

    /// The packet identifier field is only present where the QoS level
    /// is 1 or 2.
    pub fn set_packet_id(&mut self, packet_id: PacketId) -> &mut Self {
        self.packet_id = packet_id;
        self
    }

    #[must_use]
    pub const fn packet_id(&self) -> PacketId {
        self.packet_id
    }

    /// Topic bytes, exactly as they appeared on the wire.
    #[must_use]
    pub fn topic(&self) -> &[u8] {
        &self.topic
    }

    #[must_use]
    pub fn message(&self) -> &[u8] {
        &self.msg
    }

    fn get_fixed_header(&self) -> Result<FixedHeader, EncodeError> {
        let mut remaining_length = 2 + self.topic.len() + self.msg.len();
        if self.qos != QoS::AtMostOnce {
            remaining_length += PacketId::bytes();
        }

        let packet_type = PacketType::Publish {
            dup: self.dup,
            qos: self.qos,
            retain: self.retain,
        };
        FixedHeader::new(packet_type, remaining_length)
    }
}

impl DecodePacket for PublishPacket {
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let fixed_header = FixedHeader::decode(ba)?;

        let PacketType::Publish { dup, qos, retain } = fixed_header.packet_type() else {
            return Err(DecodeError::InvalidPacketType);
        };

        // The DUP flag MUST be 0 for all QoS 0 messages [MQTT-3.3.1-2].
        if dup && qos == QoS::AtMostOnce {
            return Err(DecodeError::InvalidPacketFlags);
        }

        let topic_len = ba.read_u16()? as usize;
        let mut used = 2 + topic_len;
        if qos != QoS::AtMostOnce {
            used += PacketId::bytes();
        }
        // A body shorter than the declared topic (and packet id) is
        // malformed; the payload itself may be empty.
        if fixed_header.remaining_length() < used {
            log::error!(
                "publish: body too short, remaining length {}, topic length {}",
                fixed_header.remaining_length(),
                topic_len
            );
            return Err(DecodeError::InvalidRemainingLength);
        }
        let topic = Bytes::copy_from_slice(ba.read_bytes(topic_len)?);

        let packet_id = if qos == QoS::AtMostOnce {
            PacketId::new(0)
        } else {
            let packet_id = PacketId::decode(ba)?;
            if packet_id.value() == 0 {
                // [MQTT-2.3.1-1]
                return Err(DecodeError::InvalidPacketId);
            }
            packet_id
        };

        let msg_len = fixed_header.remaining_length() - used;
        let msg = Bytes::copy_from_slice(ba.read_bytes(msg_len)?);

        Ok(Self {
            dup,
            qos,
            retain,
            topic,
            packet_id,
            msg,
        })
    }
}

impl EncodePacket for PublishPacket {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        let old_len = buf.len();

        let fixed_header = self.get_fixed_header()?;
        fixed_header.encode(buf)?;

        #[allow(clippy::cast_possible_truncation)]
        let topic_len = self.topic.len() as u16;
        buf.extend_from_slice(&topic_len.to_be_bytes());
        buf.write_all(&self.topic)?;

        if self.qos != QoS::AtMostOnce {
            self.packet_id.encode(buf)?;
        }

        buf.write_all(&self.msg)?;

        Ok(buf.len() - old_len)
    }
}

impl Packet for PublishPacket {
    fn packet_type(&self) -> PacketType {
        PacketType::Publish {
            dup: self.dup,
            qos: self.qos,
            retain: self.retain,
        }
    }

    fn bytes(&self) -> Result<usize, EncodeError> {
        let fixed_header = self.get_fixed_header()?;
        Ok(fixed_header.bytes() + fixed_header.remaining_length())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_qos0() {
        let packet = PublishPacket::new("t", QoS::AtMostOnce, b"hi").unwrap();
        let mut buf = Vec::new();
        packet.encode(&mut buf).unwrap();
        assert_eq!(&buf, &[0x30, 0x05, 0x00, 0x01, b't', b'h', b'i']);
    }

    #[test]
    fn test_encode_qos1_flags() {
        let mut packet = PublishPacket::new("t", QoS::AtLeastOnce, b"x").unwrap();
        packet.set_packet_id(PacketId::new(5));
        packet.set_retain(true);
        packet.set_dup(true).unwrap();
        let mut buf = Vec::new();
        packet.encode(&mut buf).unwrap();
        assert_eq!(&buf, &[0x3b, 0x06, 0x00, 0x01, b't', 0x00, 0x05, b'x']);
    }

    #[test]
    fn test_decode_qos1() {
        let buf = [0x32, 0x08, 0x00, 0x03, b'a', b'/', b'b', 0x00, 0x07, b'm'];
        let mut ba = ByteArray::new(&buf);
        let packet = PublishPacket::decode(&mut ba).unwrap();
        assert_eq!(packet.qos(), QoS::AtLeastOnce);
        assert_eq!(packet.packet_id(), PacketId::new(7));
        assert_eq!(packet.topic(), b"a/b");
        assert_eq!(packet.message(), b"m");
        assert!(!packet.retain());
    }

    #[test]
    fn test_decode_empty_payload() {
        let buf = [0x30, 0x03, 0x00, 0x01, b't'];
        let mut ba = ByteArray::new(&buf);
        let packet = PublishPacket::decode(&mut ba).unwrap();
        assert_eq!(packet.message(), b"");
    }

    #[test]
    fn test_decode_topic_overruns_body() {
        // Declared topic length 9 but remaining length only 5.
        let buf = [0x30, 0x05, 0x00, 0x09, b't', b'h', b'i'];
        let mut ba = ByteArray::new(&buf);
        assert_eq!(
            PublishPacket::decode(&mut ba),
            Err(DecodeError::InvalidRemainingLength)
        );
    }

    #[test]
    fn test_dup_on_qos0_rejected() {
        let mut packet = PublishPacket::new("t", QoS::AtMostOnce, b"").unwrap();
        assert_eq!(packet.set_dup(true).unwrap_err(), EncodeError::InvalidData);

        let buf = [0x38, 0x03, 0x00, 0x01, b't'];
        let mut ba = ByteArray::new(&buf);
        assert_eq!(
            PublishPacket::decode(&mut ba),
            Err(DecodeError::InvalidPacketFlags)
        );
    }

    #[test]
    fn test_decode_zero_packet_id() {
        let buf = [0x32, 0x05, 0x00, 0x01, b't', 0x00, 0x00];
        let mut ba = ByteArray::new(&buf);
        assert_eq!(
            PublishPacket::decode(&mut ba),
            Err(DecodeError::InvalidPacketId)
        );
    }
}
