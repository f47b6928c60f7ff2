// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Pure packet codec for MQTT 3.1.1. No I/O, no state kept across packets.

mod base;
mod byte_array;
mod connect;
mod connect_ack;
mod disconnect;
mod error;
mod header;
mod ping;
mod publish;
mod publish_ack;
mod publish_complete;
mod publish_received;
mod publish_release;
mod subscribe;
mod subscribe_ack;
mod topic;
mod unsubscribe;
mod unsubscribe_ack;
pub mod utils;
mod var_int;

pub use base::{PacketId, ProtocolLevel, QoS};
pub use byte_array::{ByteArray, ByteArrayError};
pub use connect::{ConnectPacket, LastWill};
pub use connect_ack::{ConnectAckPacket, ConnectReturnCode};
pub use disconnect::DisconnectPacket;
pub use error::{DecodeError, EncodeError};
pub use header::{FixedHeader, Packet, PacketType};
pub use ping::{PingRequestPacket, PingResponsePacket};
pub use publish::PublishPacket;
pub use publish_ack::PublishAckPacket;
pub use publish_complete::PublishCompletePacket;
pub use publish_received::PublishReceivedPacket;
pub use publish_release::PublishReleasePacket;
pub use subscribe::{SubscribePacket, SubscribeTopic};
pub use subscribe_ack::{SubscribeAck, SubscribeAckPacket};
pub use topic::{is_valid_topic_filter, is_valid_topic_name, topic_matches_filter};
pub use unsubscribe::UnsubscribePacket;
pub use unsubscribe_ack::UnsubscribeAckPacket;
pub use var_int::{VarInt, MAX_REMAINING_LENGTH};

/// Decode a value out of a byte cursor.
pub trait DecodePacket: Sized {
    /// # Errors
    /// Returns an error if the bytes do not form a valid value of this type.
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError>;
}

/// Encode a value onto the wire, appending to `buf`.
pub trait EncodePacket {
    /// # Errors
    /// Returns an error if the value cannot be represented on the wire
    /// (oversized string, missing packet identifier, etc).
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError>;
}

/// Attempt to read one whole packet off the front of `buf`.
///
/// Returns `Ok(None)` when `buf` does not yet contain a full packet (the
/// caller should read more bytes and retry); this is the "peek the
/// remaining length, wait for the body" framing loop sitting on top of the
/// otherwise stateless codec.
///
/// # Errors
/// Returns an error if the bytes available so far are already malformed.
pub fn try_decode_packet(buf: &[u8]) -> Result<Option<(Packet, usize)>, DecodeError> {
    let mut ba = ByteArray::new(buf);
    let fixed_header = match FixedHeader::decode(&mut ba) {
        Ok(header) => header,
        Err(DecodeError::OutOfRange) => return Ok(None),
        Err(e) => return Err(e),
    };
    let consumed_by_header = ba.offset();
    let total_len = consumed_by_header + fixed_header.remaining_length();
    if buf.len() < total_len {
        return Ok(None);
    }

    let mut ba = ByteArray::new(&buf[..total_len]);
    let packet = Packet::decode_body(&mut ba, fixed_header)?;
    Ok(Some((packet, total_len)))
}
