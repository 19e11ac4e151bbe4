// Copyright (c) 2023 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! A scripted broker for driving the client end to end: each test
//! accepts a connection and plays a fixed packet exchange.

#![allow(dead_code)]

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

pub const CONNECT: u8 = 1;
pub const PUBLISH: u8 = 3;
pub const PUBACK: u8 = 4;
pub const SUBSCRIBE: u8 = 8;
pub const UNSUBSCRIBE: u8 = 10;
pub const PINGREQ: u8 = 12;
pub const DISCONNECT: u8 = 14;

/// Read one complete control packet, returning the whole frame.
pub async fn read_frame(stream: &mut TcpStream) -> Vec<u8> {
    let mut frame = vec![stream.read_u8().await.unwrap()];
    let mut remaining_length: usize = 0;
    let mut multiplier: usize = 1;
    loop {
        let byte = stream.read_u8().await.unwrap();
        frame.push(byte);
        remaining_length += (byte as usize & 0x7f) * multiplier;
        multiplier *= 128;
        if byte & 0x80 == 0 {
            break;
        }
    }
    let body_start = frame.len();
    frame.resize(body_start + remaining_length, 0);
    stream.read_exact(&mut frame[body_start..]).await.unwrap();
    frame
}

pub fn packet_type(frame: &[u8]) -> u8 {
    frame[0] >> 4
}

/// Expect the next packet to have the given type and return its frame.
pub async fn expect_packet(stream: &mut TcpStream, expected: u8) -> Vec<u8> {
    let frame = read_frame(stream).await;
    assert_eq!(packet_type(&frame), expected, "frame: {frame:?}");
    frame
}

/// Connect flags byte of a CONNECT frame.
pub fn connect_flags(frame: &[u8]) -> u8 {
    // fixed header (2) + protocol name (6) + level (1)
    frame[9]
}

pub fn connack(return_code: u8, session_present: bool) -> Vec<u8> {
    vec![0x20, 0x02, u8::from(session_present), return_code]
}

pub fn suback(packet_id: u16, granted_qos: u8) -> Vec<u8> {
    let id = packet_id.to_be_bytes();
    vec![0x90, 0x03, id[0], id[1], granted_qos]
}

pub fn unsuback(packet_id: u16) -> Vec<u8> {
    let id = packet_id.to_be_bytes();
    vec![0xb0, 0x02, id[0], id[1]]
}

pub fn puback(packet_id: u16) -> Vec<u8> {
    let id = packet_id.to_be_bytes();
    vec![0x40, 0x02, id[0], id[1]]
}

pub fn pingresp() -> Vec<u8> {
    vec![0xd0, 0x00]
}

/// Decoded view of a PUBLISH frame sent by the client.
pub struct PublishFrame {
    pub dup: bool,
    pub qos: u8,
    pub retain: bool,
    pub packet_id: u16,
    pub topic: Vec<u8>,
    pub payload: Vec<u8>,
}

pub fn parse_publish(frame: &[u8]) -> PublishFrame {
    assert_eq!(packet_type(frame), PUBLISH);
    let dup = frame[0] & 0x08 != 0;
    let qos = (frame[0] >> 1) & 0x03;
    let retain = frame[0] & 0x01 != 0;

    // Remaining length is single byte in every test exchange.
    assert!(frame[1] < 128);
    let body = &frame[2..];
    let topic_len = usize::from(u16::from_be_bytes([body[0], body[1]]));
    let topic = body[2..2 + topic_len].to_vec();
    let mut offset = 2 + topic_len;
    let packet_id = if qos > 0 {
        let id = u16::from_be_bytes([body[offset], body[offset + 1]]);
        offset += 2;
        id
    } else {
        0
    };
    let payload = body[offset..].to_vec();
    PublishFrame {
        dup,
        qos,
        retain,
        packet_id,
        topic,
        payload,
    }
}

/// Packet id field of a SUBSCRIBE/UNSUBSCRIBE frame.
pub fn request_packet_id(frame: &[u8]) -> u16 {
    u16::from_be_bytes([frame[2], frame[3]])
}
