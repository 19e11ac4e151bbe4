// Copyright (c) 2023 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use byteorder::{BigEndian, WriteBytesExt};
use std::io::Write;

use crate::{ByteArray, DecodeError, DecodePacket, EncodeError, EncodePacket};

/// A length-prefixed field of raw bytes.
///
/// Binary Data is represented by a two byte big-endian length followed
/// by that many bytes; the length is limited to 65,535 bytes. Byte
/// identity is preserved, no character validation happens here.
///
/// ```txt
/// +-------------------+
/// | Binary Length     |
/// |                   |
/// +-------------------+
/// | Bytes ...         |
/// +-------------------+
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BinaryData(Vec<u8>);

impl BinaryData {
    /// Convert a byte slice into binary data.
    ///
    /// # Errors
    ///
    /// Returns `TooManyData` if `data` is longer than 65,535 bytes.
    pub fn from_slice(data: &[u8]) -> Result<Self, EncodeError> {
        if data.len() > usize::from(u16::MAX) {
            return Err(EncodeError::TooManyData);
        }
        Ok(Self(data.to_vec()))
    }

    /// Get byte length in packet, length prefix included.
    #[must_use]
    pub fn bytes(&self) -> usize {
        2 + self.0.len()
    }
}

impl AsRef<[u8]> for BinaryData {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl DecodePacket for BinaryData {
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let len = ba.read_u16()? as usize;
        let data = ba.read_bytes(len)?;
        Ok(Self(data.to_vec()))
    }
}

impl EncodePacket for BinaryData {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        #[allow(clippy::cast_possible_truncation)]
        let len = self.0.len() as u16;
        buf.write_u16::<BigEndian>(len)?;
        buf.write_all(&self.0)?;
        Ok(self.bytes())
    }
}
