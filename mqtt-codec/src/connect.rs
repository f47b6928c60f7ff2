// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::convert::TryFrom;

use crate::byte_array::write_string;
use crate::{ByteArray, DecodeError, DecodePacket, EncodeError, EncodePacket, ProtocolLevel, QoS};

const PROTOCOL_NAME: &str = "MQTT";

/// The client's "Last Will and Testament": a message the broker publishes on
/// the client's behalf if the network connection is lost ungracefully.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastWill {
    pub topic: String,
    pub message: Vec<u8>,
    pub qos: QoS,
    pub retain: bool,
}

/// The first packet a client sends after opening the network connection.
///
/// ```txt
/// +-----------------------------+
/// | Protocol name "MQTT"        |
/// | Protocol level              |
/// | Connect flags               |
/// | Keep alive                  |
/// +-----------------------------+
/// | Client id                   |
/// | Will topic (optional)       |
/// | Will message (optional)     |
/// | Username (optional)         |
/// | Password (optional)         |
/// +-----------------------------+
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectPacket {
    protocol_level: ProtocolLevel,
    client_id: String,
    clean_session: bool,
    keep_alive: u16,
    username: Option<String>,
    password: Option<String>,
    will: Option<LastWill>,
}

impl ConnectPacket {
    /// # Errors
    /// Returns [`DecodeError::InvalidClientId`] if `client_id` is empty.
    pub fn new(client_id: &str) -> Result<Self, DecodeError> {
        crate::utils::check_client_id(client_id)?;
        Ok(Self {
            protocol_level: ProtocolLevel::V311,
            client_id: client_id.to_string(),
            clean_session: true,
            keep_alive: 60,
            username: None,
            password: None,
            will: None,
        })
    }

    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    #[must_use]
    pub const fn clean_session(&self) -> bool {
        self.clean_session
    }

    pub fn set_clean_session(&mut self, clean_session: bool) -> &mut Self {
        self.clean_session = clean_session;
        self
    }

    #[must_use]
    pub const fn keep_alive(&self) -> u16 {
        self.keep_alive
    }

    pub fn set_keep_alive(&mut self, keep_alive: u16) -> &mut Self {
        self.keep_alive = keep_alive;
        self
    }

    pub fn set_credentials(&mut self, username: String, password: Option<String>) -> &mut Self {
        self.username = Some(username);
        self.password = password;
        self
    }

    pub fn set_will(&mut self, will: LastWill) -> &mut Self {
        self.will = Some(will);
        self
    }

    #[must_use]
    pub fn will(&self) -> Option<&LastWill> {
        self.will.as_ref()
    }

    fn connect_flags(&self) -> u8 {
        let mut flags = 0u8;
        if self.clean_session {
            flags |= 0b0000_0010;
        }
        if let Some(will) = &self.will {
            flags |= 0b0000_0100;
            flags |= (will.qos as u8) << 3;
            if will.retain {
                flags |= 0b0010_0000;
            }
        }
        if self.password.is_some() {
            flags |= 0b0100_0000;
        }
        if self.username.is_some() {
            flags |= 0b1000_0000;
        }
        flags
    }

    pub(crate) fn encode_variable(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        let old_len = buf.len();
        write_string(buf, PROTOCOL_NAME)?;
        buf.push(self.protocol_level as u8);
        buf.push(self.connect_flags());
        buf.extend_from_slice(&self.keep_alive.to_be_bytes());

        write_string(buf, &self.client_id)?;
        if let Some(will) = &self.will {
            write_string(buf, &will.topic)?;
            if will.message.len() > u16::MAX as usize {
                return Err(EncodeError::TooManyData);
            }
            buf.extend_from_slice(&(will.message.len() as u16).to_be_bytes());
            buf.extend_from_slice(&will.message);
        }
        if let Some(username) = &self.username {
            write_string(buf, username)?;
        }
        if let Some(password) = &self.password {
            write_string(buf, password)?;
        }

        Ok(buf.len() - old_len)
    }
}

impl DecodePacket for ConnectPacket {
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let name_len = ba.read_u16()? as usize;
        let name = ba.read_string(name_len)?;
        if name != PROTOCOL_NAME {
            return Err(DecodeError::InvalidProtocolLevel);
        }
        let protocol_level = ProtocolLevel::try_from(ba.read_byte()?)?;
        let flags = ba.read_byte()?;
        let clean_session = flags & 0b0000_0010 != 0;
        let has_will = flags & 0b0000_0100 != 0;
        let will_qos = QoS::try_from((flags & 0b0001_1000) >> 3)?;
        let will_retain = flags & 0b0010_0000 != 0;
        let has_password = flags & 0b0100_0000 != 0;
        let has_username = flags & 0b1000_0000 != 0;

        let keep_alive = ba.read_u16()?;

        let client_id_len = ba.read_u16()? as usize;
        let client_id = ba.read_string(client_id_len)?;

        let will = if has_will {
            let topic_len = ba.read_u16()? as usize;
            let topic = ba.read_string(topic_len)?;
            let message_len = ba.read_u16()? as usize;
            let message = ba.read_bytes(message_len)?.to_vec();
            Some(LastWill {
                topic,
                message,
                qos: will_qos,
                retain: will_retain,
            })
        } else {
            None
        };

        let username = if has_username {
            let len = ba.read_u16()? as usize;
            Some(ba.read_string(len)?)
        } else {
            None
        };
        let password = if has_password {
            let len = ba.read_u16()? as usize;
            Some(ba.read_string(len)?)
        } else {
            None
        };

        Ok(Self {
            protocol_level,
            client_id,
            clean_session,
            keep_alive,
            username,
            password,
            will,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_round_trip() {
        let mut packet = ConnectPacket::new("c1").unwrap();
        packet.set_keep_alive(30);
        packet.set_credentials("user".to_string(), Some("pass".to_string()));
        packet.set_will(LastWill {
            topic: "a/b".to_string(),
            message: b"bye".to_vec(),
            qos: QoS::AtLeastOnce,
            retain: true,
        });

        let mut buf = Vec::new();
        packet.encode_variable(&mut buf).unwrap();
        let mut ba = ByteArray::new(&buf);
        let decoded = ConnectPacket::decode(&mut ba).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn test_connect_rejects_empty_client_id() {
        assert!(ConnectPacket::new("").is_err());
    }
}
