// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use crate::byte_array::write_string;
use crate::{ByteArray, DecodeError, EncodeError, PacketId, QoS};

/// An application message in transit. DUP, QoS and retain live in the fixed
/// header flags rather than the variable header, so encode/decode take them
/// as separate parameters instead of round-tripping through `Self`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishPacket {
    topic: String,
    packet_id: Option<PacketId>,
    payload: Vec<u8>,
    qos: QoS,
    dup: bool,
    retain: bool,
}

impl PublishPacket {
    /// # Errors
    /// Returns [`DecodeError::InvalidTopic`] if `topic` contains a wildcard,
    /// or [`DecodeError::InvalidDup`] if `qos` is `AtMostOnce` and the caller
    /// nonetheless asked for `dup`.
    pub fn new(topic: &str, qos: QoS, payload: Vec<u8>) -> Result<Self, DecodeError> {
        if !crate::topic::is_valid_topic_name(topic) {
            return Err(DecodeError::InvalidTopic);
        }
        Ok(Self {
            topic: topic.to_string(),
            packet_id: None,
            payload,
            qos,
            dup: false,
            retain: false,
        })
    }

    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    #[must_use]
    pub const fn qos(&self) -> QoS {
        self.qos
    }

    #[must_use]
    pub const fn dup(&self) -> bool {
        self.dup
    }

    #[must_use]
    pub const fn retain(&self) -> bool {
        self.retain
    }

    pub fn set_retain(&mut self, retain: bool) -> &mut Self {
        self.retain = retain;
        self
    }

    #[must_use]
    pub const fn packet_id(&self) -> Option<PacketId> {
        self.packet_id
    }

    pub fn set_packet_id(&mut self, packet_id: PacketId) -> &mut Self {
        self.packet_id = Some(packet_id);
        self
    }

    /// Return a copy with `dup` set, used by the QoS-1/2 retry paths.
    #[must_use]
    pub fn with_dup(&self, dup: bool) -> Self {
        let mut copy = self.clone();
        copy.dup = dup;
        copy
    }

    pub(crate) fn encode_variable(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        if self.qos != QoS::AtMostOnce && self.dup && self.packet_id.is_none() {
            return Err(EncodeError::MissingPacketId);
        }
        let old_len = buf.len();
        write_string(buf, &self.topic)?;
        if self.qos != QoS::AtMostOnce {
            let packet_id = self.packet_id.ok_or(EncodeError::MissingPacketId)?;
            buf.extend_from_slice(&packet_id.to_be_bytes());
        }
        buf.extend_from_slice(&self.payload);
        Ok(buf.len() - old_len)
    }

    pub(crate) fn decode(
        ba: &mut ByteArray,
        dup: bool,
        qos: QoS,
        retain: bool,
    ) -> Result<Self, DecodeError> {
        if dup && qos == QoS::AtMostOnce {
            return Err(DecodeError::InvalidDup);
        }
        let topic_len = ba.read_u16()? as usize;
        let topic = ba.read_string(topic_len)?;
        if !crate::topic::is_valid_topic_name(&topic) {
            return Err(DecodeError::InvalidTopic);
        }
        let packet_id = if qos == QoS::AtMostOnce {
            None
        } else {
            Some(ba.read_u16()?)
        };
        let payload = ba.read_bytes(ba.remaining_bytes())?.to_vec();
        Ok(Self {
            topic,
            packet_id,
            payload,
            qos,
            dup,
            retain,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qos0_round_trip() {
        let packet = PublishPacket::new("a", QoS::AtMostOnce, b"x".to_vec()).unwrap();
        let mut buf = Vec::new();
        packet.encode_variable(&mut buf).unwrap();
        let mut ba = ByteArray::new(&buf);
        let decoded = PublishPacket::decode(&mut ba, false, QoS::AtMostOnce, false).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn test_qos1_round_trip_with_packet_id() {
        let mut packet = PublishPacket::new("a/b", QoS::AtLeastOnce, vec![]).unwrap();
        packet.set_packet_id(42);
        let mut buf = Vec::new();
        packet.encode_variable(&mut buf).unwrap();
        let mut ba = ByteArray::new(&buf);
        let decoded = PublishPacket::decode(&mut ba, false, QoS::AtLeastOnce, false).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn test_rejects_wildcard_topic() {
        assert!(PublishPacket::new("a/+", QoS::AtMostOnce, vec![]).is_err());
    }

    #[test]
    fn test_rejects_dup_on_qos0() {
        let buf = [0x00, 0x01, b'a'];
        let mut ba = ByteArray::new(&buf);
        assert_eq!(
            PublishPacket::decode(&mut ba, true, QoS::AtMostOnce, false),
            Err(DecodeError::InvalidDup)
        );
    }
}
