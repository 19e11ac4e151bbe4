// Copyright (c) 2023 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::convert::TryFrom;

use crate::{
    ByteArray, DecodeError, DecodePacket, EncodeError, EncodePacket, QoS, VarInt,
};

/// Control packet type, parsed together with its flag nibble.
///
/// Where a flag bit is marked as "Reserved", it MUST be set to the value
/// listed for that packet type; a receiver MUST close the network
/// connection on any other value [MQTT-2.2.2-2].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PacketType {
    /// Request to connect to broker
    #[default]
    Connect,

    /// Broker reply to connect request
    ConnectAck,

    /// Publish message
    Publish { dup: bool, qos: QoS, retain: bool },

    /// Publish acknowledgement
    PublishAck,

    /// Publish received
    PublishReceived,

    /// Publish release
    PublishRelease,

    /// Publish complete
    PublishComplete,

    /// Client subscribe request
    Subscribe,

    /// Subscribe acknowledgement
    SubscribeAck,

    /// Unsubscribe request
    Unsubscribe,

    /// Unsubscribe acknowledgement
    UnsubscribeAck,

    /// Client ping request
    PingRequest,

    /// Server ping response
    PingResponse,

    /// Client is disconnecting
    Disconnect,
}

impl PacketType {
    /// Get byte length used in packet.
    #[must_use]
    pub const fn bytes() -> usize {
        1
    }
}

impl From<PacketType> for u8 {
    fn from(packet_type: PacketType) -> Self {
        let type_bits = match packet_type {
            PacketType::Connect => 1,
            PacketType::ConnectAck => 2,
            PacketType::Publish { .. } => 3,
            PacketType::PublishAck => 4,
            PacketType::PublishReceived => 5,
            PacketType::PublishRelease => 6,
            PacketType::PublishComplete => 7,
            PacketType::Subscribe => 8,
            PacketType::SubscribeAck => 9,
            PacketType::Unsubscribe => 10,
            PacketType::UnsubscribeAck => 11,
            PacketType::PingRequest => 12,
            PacketType::PingResponse => 13,
            PacketType::Disconnect => 14,
        };

        let flag_bits = match packet_type {
            PacketType::Publish { dup, qos, retain } => {
                let dup = if dup { 0b0000_1000 } else { 0b0000_0000 };
                let qos = (qos as u8) << 1;
                let retain = u8::from(retain);
                dup | qos | retain
            }
            // Bits 3,2,1 and 0 of the fixed header in the PUBREL, SUBSCRIBE
            // and UNSUBSCRIBE packets are reserved and MUST be set to
            // 0,0,1 and 0 respectively [MQTT-3.6.1-1], [MQTT-3.8.1-1],
            // [MQTT-3.10.1-1].
            PacketType::PublishRelease | PacketType::Subscribe | PacketType::Unsubscribe => {
                0b0000_0010
            }
            _ => 0b0000_0000,
        };

        (type_bits << 4) | flag_bits
    }
}

impl TryFrom<u8> for PacketType {
    type Error = DecodeError;

    /// Parse packet type from the control byte.
    ///
    /// # Errors
    ///
    /// Returns `InvalidPacketFlags` if the flag nibble carries a value
    /// other than the one mandated for the type, `InvalidPacketType` for
    /// type nibbles 0 and 15.
    fn try_from(v: u8) -> Result<Self, Self::Error> {
        let type_bits = (v & 0b1111_0000) >> 4;
        let flag = v & 0b0000_1111;

        if type_bits == 3 {
            let dup = (flag & 0b0000_1000) == 0b0000_1000;
            let retain = (flag & 0b0000_0001) == 0b0000_0001;
            let qos = QoS::try_from((flag & 0b0000_0110) >> 1)
                .map_err(|_| DecodeError::InvalidPacketFlags)?;
            return Ok(Self::Publish { dup, qos, retain });
        }

        let (packet_type, expected_flag) = match type_bits {
            1 => (Self::Connect, 0b0000_0000),
            2 => (Self::ConnectAck, 0b0000_0000),
            4 => (Self::PublishAck, 0b0000_0000),
            5 => (Self::PublishReceived, 0b0000_0000),
            6 => (Self::PublishRelease, 0b0000_0010),
            8 => (Self::Subscribe, 0b0000_0010),
            9 => (Self::SubscribeAck, 0b0000_0000),
            10 => (Self::Unsubscribe, 0b0000_0010),
            11 => (Self::UnsubscribeAck, 0b0000_0000),
            12 => (Self::PingRequest, 0b0000_0000),
            13 => (Self::PingResponse, 0b0000_0000),
            14 => (Self::Disconnect, 0b0000_0000),
            t => {
                log::error!("header: Invalid packet type bits: {t:#b}");
                return Err(DecodeError::InvalidPacketType);
            }
        };

        if flag == expected_flag {
            Ok(packet_type)
        } else {
            log::error!("header: Got invalid flag in {packet_type:?}: {flag:#b}");
            Err(DecodeError::InvalidPacketFlags)
        }
    }
}

/// Fixed header part of a mqtt control packet.
///
/// ```txt
///  7 6 5 4 3 2 1 0
/// +-------+-------+
/// | Type  | Flags |
/// +-------+-------+
/// | Remaining Len |
/// +-------+-------+
/// ```
#[allow(clippy::module_name_repetitions)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FixedHeader {
    packet_type: PacketType,
    remaining_length: VarInt,
}

impl FixedHeader {
    /// Create a new fixed header with `packet_type` and `remaining_length`.
    ///
    /// # Errors
    ///
    /// Returns error if `remaining_length` is out of range.
    pub const fn new(packet_type: PacketType, remaining_length: usize) -> Result<Self, EncodeError> {
        let remaining_length = match VarInt::new(remaining_length) {
            Ok(v) => v,
            Err(err) => return Err(err),
        };
        Ok(Self {
            packet_type,
            remaining_length,
        })
    }

    #[must_use]
    pub const fn packet_type(&self) -> PacketType {
        self.packet_type
    }

    /// Byte length of the packet body following this header.
    #[must_use]
    pub const fn remaining_length(&self) -> usize {
        self.remaining_length.value()
    }

    /// Get byte length in packet.
    #[must_use]
    pub const fn bytes(&self) -> usize {
        PacketType::bytes() + self.remaining_length.bytes()
    }
}

impl DecodePacket for FixedHeader {
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let control = ba.read_byte()?;
        let packet_type = PacketType::try_from(control)?;
        let remaining_length = VarInt::decode(ba)?;

        Ok(Self {
            packet_type,
            remaining_length,
        })
    }
}

impl EncodePacket for FixedHeader {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        let control: u8 = self.packet_type.into();
        buf.push(control);

        let length_bytes = self.remaining_length.encode(buf)?;
        Ok(PacketType::bytes() + length_bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_ping_request() {
        let mut buf = Vec::new();
        let fixed_header = FixedHeader::new(PacketType::PingRequest, 0).unwrap();
        assert_eq!(fixed_header.encode(&mut buf), Ok(2));
        assert_eq!(&buf, &[0xc0, 0x00]);
    }

    #[test]
    fn test_decode_publish() {
        let buf = [0x3d, 0x13];
        let mut ba = ByteArray::new(&buf);
        let fixed_header = FixedHeader::decode(&mut ba).unwrap();
        assert_eq!(
            fixed_header.packet_type(),
            PacketType::Publish {
                dup: true,
                qos: QoS::ExactOnce,
                retain: true,
            }
        );
        assert_eq!(fixed_header.remaining_length(), 19);
    }

    #[test]
    fn test_reserved_flags_rejected() {
        // SUBSCRIBE with flag nibble 0 instead of 2.
        assert_eq!(
            PacketType::try_from(0x80),
            Err(DecodeError::InvalidPacketFlags)
        );
        // PUBLISH with QoS bits set to 3.
        assert_eq!(
            PacketType::try_from(0x36),
            Err(DecodeError::InvalidPacketFlags)
        );
        // Type nibbles 0 and 15 do not exist in 3.1.1.
        assert_eq!(
            PacketType::try_from(0x00),
            Err(DecodeError::InvalidPacketType)
        );
        assert_eq!(
            PacketType::try_from(0xf0),
            Err(DecodeError::InvalidPacketType)
        );
    }

    #[test]
    fn test_subscribe_control_byte() {
        let control: u8 = PacketType::Subscribe.into();
        assert_eq!(control, 0x82);
        let control: u8 = PacketType::PublishRelease.into();
        assert_eq!(control, 0x62);
    }
}
