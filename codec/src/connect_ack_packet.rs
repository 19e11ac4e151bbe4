// Copyright (c) 2023 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::convert::TryFrom;

use crate::{ByteArray, DecodeError, DecodePacket, FixedHeader, PacketType};

/// Return code of a CONNACK packet.
///
/// If a server sends a CONNACK packet with a non-zero return code it
/// MUST then close the network connection [MQTT-3.2.2-5].
#[repr(u8)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConnectReturnCode {
    /// Connection accepted.
    #[default]
    Accepted = 0,

    /// The server does not support the MQTT protocol level requested by
    /// the client.
    UnacceptedProtocol = 1,

    /// The client identifier is correct UTF-8 but not allowed by the
    /// server.
    IdentifierRejected = 2,

    /// The network connection has been made but the MQTT service is
    /// unavailable.
    ServerUnavailable = 3,

    /// The data in the username or password is malformed.
    MalformedUsernamePassword = 4,

    /// The client is not authorized to connect.
    Unauthorized = 5,
}

impl TryFrom<u8> for ConnectReturnCode {
    type Error = DecodeError;

    /// Values 6..=255 are reserved and treated as malformed
    /// [MQTT-3.2.2-6].
    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(Self::Accepted),
            1 => Ok(Self::UnacceptedProtocol),
            2 => Ok(Self::IdentifierRejected),
            3 => Ok(Self::ServerUnavailable),
            4 => Ok(Self::MalformedUsernamePassword),
            5 => Ok(Self::Unauthorized),
            _ => Err(DecodeError::InvalidReturnCode),
        }
    }
}

/// The first packet sent from the server to the client MUST be a
/// CONNACK packet [MQTT-3.2.0-1].
///
/// Basic packet structure:
/// ```txt
///  7                       0
/// +-------------------------+
/// | Fixed header            |
/// |                         |
/// +-------------------------+
/// | Ack flags               |
/// +-------------------------+
/// | Return code             |
/// +-------------------------+
/// ```
///
/// This packet does not contain payload; its remaining length is always
/// exactly 2.
#[allow(clippy::module_name_repetitions)]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConnectAckPacket {
    /// Bit 0 of the ack flags byte. Indicates that the server holds
    /// session state from a prior session of this client id. Must be
    /// false when the return code is non-zero [MQTT-3.2.2-4].
    session_present: bool,

    return_code: ConnectReturnCode,
}

impl ConnectAckPacket {
    #[must_use]
    pub const fn return_code(&self) -> ConnectReturnCode {
        self.return_code
    }

    #[must_use]
    pub const fn session_present(&self) -> bool {
        self.session_present
    }
}

impl DecodePacket for ConnectAckPacket {
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let fixed_header = FixedHeader::decode(ba)?;
        if fixed_header.packet_type() != PacketType::ConnectAck {
            return Err(DecodeError::InvalidPacketType);
        }
        if fixed_header.remaining_length() != 2 {
            return Err(DecodeError::InvalidRemainingLength);
        }

        let ack_flags = ba.read_byte()?;
        let session_present = ack_flags & 0b0000_0001 == 0b0000_0001;
        let return_code = ConnectReturnCode::try_from(ba.read_byte()?)?;

        Ok(Self {
            session_present,
            return_code,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_accepted() {
        let buf: Vec<u8> = vec![0x20, 0x02, 0x00, 0x00];
        let mut ba = ByteArray::new(&buf);
        let packet = ConnectAckPacket::decode(&mut ba).unwrap();
        assert!(!packet.session_present());
        assert_eq!(packet.return_code(), ConnectReturnCode::Accepted);
    }

    #[test]
    fn test_decode_unauthorized() {
        let buf: Vec<u8> = vec![0x20, 0x02, 0x00, 0x05];
        let mut ba = ByteArray::new(&buf);
        let packet = ConnectAckPacket::decode(&mut ba).unwrap();
        assert_eq!(packet.return_code(), ConnectReturnCode::Unauthorized);
    }

    #[test]
    fn test_decode_session_present() {
        let buf: Vec<u8> = vec![0x20, 0x02, 0x01, 0x00];
        let mut ba = ByteArray::new(&buf);
        let packet = ConnectAckPacket::decode(&mut ba).unwrap();
        assert!(packet.session_present());
    }

    #[test]
    fn test_reject_bad_length() {
        let buf: Vec<u8> = vec![0x20, 0x03, 0x00, 0x00, 0x00];
        let mut ba = ByteArray::new(&buf);
        assert_eq!(
            ConnectAckPacket::decode(&mut ba),
            Err(DecodeError::InvalidRemainingLength)
        );
    }

    #[test]
    fn test_reject_bad_return_code() {
        let buf: Vec<u8> = vec![0x20, 0x02, 0x00, 0x06];
        let mut ba = ByteArray::new(&buf);
        assert_eq!(
            ConnectAckPacket::decode(&mut ba),
            Err(DecodeError::InvalidReturnCode)
        );
    }
}
