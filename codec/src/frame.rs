// Copyright (c) 2023 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Framing probe for a receive reassembly buffer.
//!
//! The transport delivers arbitrary chunks of the byte stream; [`probe`]
//! tells the caller whether the buffer currently starts with a complete
//! control packet, without allocating or consuming anything.

use std::convert::TryFrom;

use crate::{DecodeError, FixedHeader, PacketType};

/// Outcome of probing a reassembly buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameStatus {
    /// The buffer starts with one whole control packet of `frame_len`
    /// bytes, fixed header included.
    Complete {
        header: FixedHeader,
        frame_len: usize,
    },

    /// More bytes are required, possibly inside the Remaining Length
    /// field itself.
    Partial,
}

/// Check whether `buf` starts with a complete control packet.
///
/// # Errors
///
/// Returns error if the control byte or the Remaining Length field is
/// malformed. Truncated input is not an error; it reports
/// [`FrameStatus::Partial`].
pub fn probe(buf: &[u8]) -> Result<FrameStatus, DecodeError> {
    if buf.is_empty() {
        return Ok(FrameStatus::Partial);
    }
    let packet_type = PacketType::try_from(buf[0])?;

    // Walk the Remaining Length by hand so that running out of bytes can
    // be told apart from a malformed field.
    let mut remaining_length: usize = 0;
    let mut multiplier: usize = 1;
    let mut offset = 1;
    loop {
        if offset > 4 {
            return Err(DecodeError::InvalidVarInt);
        }
        let Some(&byte) = buf.get(offset) else {
            return Ok(FrameStatus::Partial);
        };
        remaining_length += (byte as usize & 0x7f) * multiplier;
        multiplier *= 128;
        offset += 1;
        if byte & 0x80 == 0 {
            break;
        }
    }

    let frame_len = offset + remaining_length;
    if buf.len() < frame_len {
        return Ok(FrameStatus::Partial);
    }

    // The header is re-parsed through the regular decoder so both paths
    // agree on validity.
    let header = FixedHeader::new(packet_type, remaining_length)
        .map_err(|_| DecodeError::InvalidVarInt)?;
    Ok(FrameStatus::Complete { header, frame_len })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::QoS;

    // PUBLISH "t" -> "hi", QoS 0.
    const PUBLISH: &[u8] = &[0x30, 0x05, 0x00, 0x01, b't', b'h', b'i'];

    #[test]
    fn test_complete() {
        let status = probe(PUBLISH).unwrap();
        assert_eq!(
            status,
            FrameStatus::Complete {
                header: FixedHeader::new(
                    PacketType::Publish {
                        dup: false,
                        qos: QoS::AtMostOnce,
                        retain: false,
                    },
                    5,
                )
                .unwrap(),
                frame_len: 7,
            }
        );
    }

    #[test]
    fn test_every_prefix_is_partial() {
        for len in 0..PUBLISH.len() {
            assert_eq!(probe(&PUBLISH[..len]), Ok(FrameStatus::Partial));
        }
    }

    #[test]
    fn test_trailing_bytes_ignored() {
        let mut buf = PUBLISH.to_vec();
        buf.extend_from_slice(&[0xd0, 0x00]);
        let status = probe(&buf).unwrap();
        assert!(matches!(status, FrameStatus::Complete { frame_len: 7, .. }));
    }

    #[test]
    fn test_invalid_control_byte() {
        assert_eq!(probe(&[0x00, 0x00]), Err(DecodeError::InvalidPacketType));
        assert_eq!(probe(&[0x21, 0x02]), Err(DecodeError::InvalidPacketFlags));
    }

    #[test]
    fn test_oversized_length_field() {
        let buf = [0x30, 0xff, 0xff, 0xff, 0xff, 0x7f];
        assert_eq!(probe(&buf), Err(DecodeError::InvalidVarInt));
    }

    #[test]
    fn test_partial_inside_length_field() {
        let buf = [0x30, 0x80];
        assert_eq!(probe(&buf), Ok(FrameStatus::Partial));
    }
}
