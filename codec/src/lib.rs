// Copyright (c) 2023 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Wire codec for MQTT 3.1.1 control packets, as used by a client.
//!
//! Packets the client transmits implement [`EncodePacket`], packets it
//! receives implement [`DecodePacket`], and the small acknowledgement
//! packets implement both. Nothing in this crate performs I/O.

mod base;
mod binary_data;
mod byte_array;
mod connect_ack_packet;
mod connect_flags;
mod connect_packet;
mod disconnect_packet;
mod error;
pub mod frame;
mod header;
mod ping_request_packet;
mod ping_response_packet;
mod publish_ack_packet;
mod publish_complete_packet;
mod publish_packet;
mod publish_received_packet;
mod publish_release_packet;
mod string_data;
mod subscribe_ack_packet;
mod subscribe_packet;
mod unsubscribe_ack_packet;
mod unsubscribe_packet;
pub mod utils;
mod var_int;

pub use base::{DecodePacket, EncodePacket, Packet, PacketId, QoS};
pub use binary_data::BinaryData;
pub use byte_array::ByteArray;
pub use connect_ack_packet::{ConnectAckPacket, ConnectReturnCode};
pub use connect_flags::ConnectFlags;
pub use connect_packet::{ConnectPacket, PROTOCOL_LEVEL, PROTOCOL_NAME};
pub use disconnect_packet::DisconnectPacket;
pub use error::{DecodeError, EncodeError};
pub use frame::FrameStatus;
pub use header::{FixedHeader, PacketType};
pub use ping_request_packet::PingRequestPacket;
pub use ping_response_packet::PingResponsePacket;
pub use publish_ack_packet::PublishAckPacket;
pub use publish_complete_packet::PublishCompletePacket;
pub use publish_packet::PublishPacket;
pub use publish_received_packet::PublishReceivedPacket;
pub use publish_release_packet::PublishReleasePacket;
pub use string_data::StringData;
pub use subscribe_ack_packet::{SubscribeAck, SubscribeAckPacket};
pub use subscribe_packet::{SubscribePacket, SubscribeTopic};
pub use unsubscribe_ack_packet::UnsubscribeAckPacket;
pub use unsubscribe_packet::UnsubscribePacket;
pub use var_int::{VarInt, MAX_REMAINING_LENGTH};
