// Copyright (c) 2023 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use crate::{
    BinaryData, ConnectFlags, EncodeError, EncodePacket, FixedHeader, Packet, PacketType, QoS,
    StringData,
};

/// Protocol name carried in every CONNECT packet.
pub const PROTOCOL_NAME: &str = "MQTT";

/// Protocol level of MQTT 3.1.1.
pub const PROTOCOL_LEVEL: u8 = 4;

/// The first packet a client sends after the network connection is
/// established MUST be a CONNECT packet [MQTT-3.1.0-1].
///
/// Basic packet structure:
/// ```txt
///  7                          0
/// +----------------------------+
/// | Fixed header               |
/// |                            |
/// +----------------------------+
/// | Protocol name "MQTT"       |
/// +----------------------------+
/// | Protocol level 4           |
/// +----------------------------+
/// | Connect flags              |
/// +----------------------------+
/// | Keep alive (seconds)       |
/// |                            |
/// +----------------------------+
/// | Client id                  |
/// +----------------------------+
/// | Will topic, will message   |
/// +----------------------------+
/// | Username, password         |
/// +----------------------------+
/// ```
///
/// Will topic/message are present iff the will flag is set; username and
/// password iff their flags are set, and the password flag requires the
/// username flag. The flags byte is composed from the optional fields at
/// encode time, so it can never disagree with the payload.
#[allow(clippy::module_name_repetitions)]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConnectPacket {
    client_id: StringData,
    keep_alive: u16,
    clean_session: bool,
    will_topic: Option<StringData>,
    will_message: Option<BinaryData>,
    will_qos: QoS,
    will_retain: bool,
    username: Option<StringData>,
    password: Option<BinaryData>,
}

impl ConnectPacket {
    /// Create a new connect packet with `client_id` and clean session
    /// set.
    ///
    /// # Errors
    ///
    /// Returns error if `client_id` is too long.
    pub fn new(client_id: &str) -> Result<Self, EncodeError> {
        Ok(Self {
            client_id: StringData::from(client_id)?,
            clean_session: true,
            ..Self::default()
        })
    }

    #[must_use]
    pub fn client_id(&self) -> &str {
        self.client_id.as_ref()
    }

    pub fn set_keep_alive(&mut self, keep_alive: u16) -> &mut Self {
        self.keep_alive = keep_alive;
        self
    }

    #[must_use]
    pub const fn keep_alive(&self) -> u16 {
        self.keep_alive
    }

    pub fn set_clean_session(&mut self, clean_session: bool) -> &mut Self {
        self.clean_session = clean_session;
        self
    }

    #[must_use]
    pub const fn clean_session(&self) -> bool {
        self.clean_session
    }

    /// Attach a will message.
    ///
    /// # Errors
    ///
    /// Returns error if `topic` is empty or either field is too long.
    pub fn set_will(
        &mut self,
        topic: &str,
        message: &[u8],
        qos: QoS,
        retain: bool,
    ) -> Result<&mut Self, EncodeError> {
        if topic.is_empty() {
            return Err(EncodeError::InvalidData);
        }
        self.will_topic = Some(StringData::from(topic)?);
        self.will_message = Some(BinaryData::from_slice(message)?);
        self.will_qos = qos;
        self.will_retain = retain;
        Ok(self)
    }

    /// Attach username and optional password.
    ///
    /// # Errors
    ///
    /// Returns error if either field is too long.
    pub fn set_credentials(
        &mut self,
        username: &str,
        password: Option<&[u8]>,
    ) -> Result<&mut Self, EncodeError> {
        self.username = Some(StringData::from(username)?);
        self.password = match password {
            Some(password) => Some(BinaryData::from_slice(password)?),
            None => None,
        };
        Ok(self)
    }

    fn connect_flags(&self) -> ConnectFlags {
        let mut flags = ConnectFlags::default();
        flags.set_clean_session(self.clean_session);
        if self.will_topic.is_some() {
            flags
                .set_will(true)
                .set_will_qos(self.will_qos)
                .set_will_retain(self.will_retain);
        }
        if self.username.is_some() {
            flags
                .set_has_username(true)
                .set_has_password(self.password.is_some());
        }
        flags
    }

    fn remaining_length(&self) -> usize {
        let mut len = 2 + PROTOCOL_NAME.len()         // protocol name
            + 1                                       // protocol level
            + ConnectFlags::bytes()                   // connect flags
            + 2                                       // keep alive
            + self.client_id.bytes();
        if let Some(will_topic) = &self.will_topic {
            len += will_topic.bytes();
        }
        if let Some(will_message) = &self.will_message {
            len += will_message.bytes();
        }
        if let Some(username) = &self.username {
            len += username.bytes();
        }
        if let Some(password) = &self.password {
            len += password.bytes();
        }
        len
    }
}

impl EncodePacket for ConnectPacket {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        let old_len = buf.len();

        let fixed_header = FixedHeader::new(PacketType::Connect, self.remaining_length())?;
        fixed_header.encode(buf)?;

        StringData::from(PROTOCOL_NAME)?.encode(buf)?;
        buf.push(PROTOCOL_LEVEL);
        self.connect_flags().encode(buf)?;
        buf.extend_from_slice(&self.keep_alive.to_be_bytes());

        self.client_id.encode(buf)?;
        if let Some(will_topic) = &self.will_topic {
            will_topic.encode(buf)?;
        }
        if let Some(will_message) = &self.will_message {
            will_message.encode(buf)?;
        }
        if let Some(username) = &self.username {
            username.encode(buf)?;
        }
        if let Some(password) = &self.password {
            password.encode(buf)?;
        }

        Ok(buf.len() - old_len)
    }
}

impl Packet for ConnectPacket {
    fn packet_type(&self) -> PacketType {
        PacketType::Connect
    }

    fn bytes(&self) -> Result<usize, EncodeError> {
        let fixed_header = FixedHeader::new(PacketType::Connect, self.remaining_length())?;
        Ok(fixed_header.bytes() + fixed_header.remaining_length())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_minimal() {
        let mut packet = ConnectPacket::new("c1").unwrap();
        packet.set_keep_alive(60);
        let mut buf = Vec::new();
        packet.encode(&mut buf).unwrap();
        assert_eq!(
            &buf,
            &[
                0x10, 0x0e, // fixed header
                0x00, 0x04, b'M', b'Q', b'T', b'T', // protocol name
                0x04, // protocol level
                0b0000_0010, // clean session
                0x00, 0x3c, // keep alive
                0x00, 0x02, b'c', b'1', // client id
            ]
        );
    }

    #[test]
    fn test_encode_will_and_credentials() {
        let mut packet = ConnectPacket::new("c1").unwrap();
        packet.set_clean_session(false);
        packet
            .set_will("gone", b"bye", QoS::AtLeastOnce, true)
            .unwrap();
        packet.set_credentials("user", Some(b"pass")).unwrap();
        let mut buf = Vec::new();
        packet.encode(&mut buf).unwrap();

        assert_eq!(buf[9], 0b1110_1100);
        // Payload order: client id, will topic, will message, username,
        // password.
        assert_eq!(
            &buf[12..],
            &[
                0x00, 0x02, b'c', b'1', //
                0x00, 0x04, b'g', b'o', b'n', b'e', //
                0x00, 0x03, b'b', b'y', b'e', //
                0x00, 0x04, b'u', b's', b'e', b'r', //
                0x00, 0x04, b'p', b'a', b's', b's',
            ]
        );
    }

    #[test]
    fn test_password_without_username_not_encoded() {
        let packet = ConnectPacket::new("c1").unwrap();
        let flags = packet.connect_flags();
        assert!(!flags.has_username());
        assert!(!flags.has_password());
    }
}
